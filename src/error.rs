use thiserror::Error;

/// Error raised by a routine during a resume step.
///
/// Routine failures are arbitrary caller errors; they cross the bridge
/// verbatim and settle the owning promise, so the concrete type is erased
/// but the value is preserved (no wrapping).
pub type Failure = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the bridge itself (as opposed to routine failures).
#[derive(Debug, Error)]
pub enum Error {
    /// The main context has not been installed, or was already torn down.
    #[error("main context is not installed")]
    NotInstalled,

    /// A call that must run on the main context was made from another thread.
    #[error("called off the main context")]
    NotMainContext,

    /// Background threads were required but are unavailable on this platform.
    #[error("background threads unavailable on this platform")]
    BackgroundUnsupported,
}
