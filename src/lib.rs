//! # Bridge between yield-based routines and futures #
//!
//! A host runtime that advances work one step per frame (routines that
//! suspend on wait conditions) and async code built on [`std::future::Future`]
//! do not compose by themselves. This crate bridges the two: futures can
//! drive yield-based routines and observe their results and failures, and
//! routines can wait on promise-based work, whether the host is actively
//! ticking frames, or idle and relying on the crate's own scheduler to make
//! progress.
//!
//! # Examples #
//!
//! [`Bridge::bridge()`] turns a routine into a [`Promise`]; pumping the
//! bridge advances it:
//! ```
//! use weft::{routine, Bridge, Step, Yielded};
//!
//! let bridge = Bridge::install();
//! let mut ticks = 0;
//! let mut promise = bridge.bridge(routine::from_fn(move || {
//!     ticks += 1;
//!     if ticks < 3 {
//!         Ok(Step::Yield(Yielded::Pass))
//!     } else {
//!         Ok(Step::done_with(42i32))
//!     }
//! }));
//!
//! let value = loop {
//!     match promise.try_take() {
//!         Ok(outcome) => break outcome.unwrap().unwrap(),
//!         Err(pending) => {
//!             promise = pending;
//!             bridge.pump();
//!         }
//!     }
//! };
//! assert_eq!(*value.downcast::<i32>().unwrap(), 42);
//! ```
//!
//! A [`Promise`] is a [`Future`](std::future::Future), so async code awaits
//! bridged work directly:
//! ```
//! use weft::{Bridge, Yielded};
//!
//! let bridge = Bridge::install();
//! let promise = bridge.bridge_wait(Yielded::wait_secs(0.5));
//! let joined = async move {
//!     promise.await.expect("the wait cannot fail");
//! };
//! # drop(joined);
//! ```
//!
//! The other direction works too: [`routine::from_future`] and
//! [`Promise::into_routine`] let a routine yield until promise-based work
//! settles, re-raising its failure if any.
//!
//! Every bridged promise must be awaited, taken, or explicitly
//! [`detach`](Promise::detach)ed; an unobserved dropped handle takes its
//! failure with it.

/// Crate error types.
mod error;

/// Routines, their suspension shapes, and adapters into them.
pub mod routine;

/// Nested routine interpreter.
mod flatten;

/// Single-settlement promise cells.
mod promise;

/// Self-driving scheduler and the driver seam.
mod scheduler;

/// Main-context dispatcher and background switch.
mod dispatch;

/// Bridging context and adapters.
mod bridge;

mod utils;

pub use bridge::Bridge;
pub use dispatch::{background, background_required, BackgroundSwitch, MainContext, MainHandle};
pub use error::{Error, Failure};
pub use flatten::Flatten;
pub use promise::{Promise, PromiseRoutine};
pub use routine::{BoxRoutine, Pollable, Predicate, Routine, Step, Value, Yielded};
pub use scheduler::{Driver, Scheduler};
