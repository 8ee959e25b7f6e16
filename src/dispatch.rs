use crate::error::Error;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

type Action = Box<dyn FnOnce() + Send>;

struct Shared {
    main: ThreadId,
    queue: Mutex<VecDeque<Action>>,
}

/// The captured main execution context.
///
/// Owns the action queue and must be pumped from the thread it was installed
/// on; its lifetime is the readiness window of the dispatcher. Dropping it
/// tears the context down: outstanding [`MainHandle`]s then fail with
/// [`Error::NotInstalled`].
pub struct MainContext {
    shared: Arc<Shared>,
}

/// Cheap cloneable handle for posting work to the main context from
/// anywhere.
#[derive(Clone)]
pub struct MainHandle {
    shared: Weak<Shared>,
}

impl MainContext {
    /// Captures the calling thread as the main context. Call once, during
    /// startup, from the thread that will pump.
    pub fn install() -> MainContext {
        let main = thread::current().id();
        log::debug!("main context captured on {main:?}");
        MainContext {
            shared: Arc::new(Shared {
                main,
                queue: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn handle(&self) -> MainHandle {
        MainHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Is the calling thread the captured main thread?
    pub fn is_main(&self) -> bool {
        thread::current().id() == self.shared.main
    }

    /// Runs the actions posted since the last pump, in posting order.
    /// Returns how many ran. Actions posted by the batch itself run on the
    /// next pump, not this one.
    pub fn pump(&self) -> usize {
        debug_assert!(self.is_main(), "pump called off the main context");
        let batch: Vec<Action> = self.shared.queue.lock().drain(..).collect();
        let count = batch.len();
        for action in batch {
            action();
        }
        count
    }
}

impl MainHandle {
    /// Executes `action` on the main context: inline, before returning, when
    /// the caller is already there; otherwise posted FIFO for the next pump.
    pub fn run_on_main(&self, action: impl FnOnce() + Send + 'static) -> Result<(), Error> {
        let shared = self.shared.upgrade().ok_or(Error::NotInstalled)?;
        if thread::current().id() == shared.main {
            action();
        } else {
            shared.queue.lock().push_back(Box::new(action));
        }
        Ok(())
    }
}

/// Yields once and resumes off the main context where the platform allows
/// it.
///
/// The switch itself only arranges to be woken from a freshly spawned
/// background thread; which thread the continuation actually runs on is the
/// awaiting executor's business, as with any waker-driven future. Where
/// threads are unavailable it wakes inline and the continuation resumes on
/// the current context, unless constructed with
/// [`background_required`], which fails instead.
pub struct BackgroundSwitch {
    require: bool,
    yielded: bool,
}

/// A switch that falls back to resuming inline when backgrounding is
/// unavailable.
pub fn background() -> BackgroundSwitch {
    BackgroundSwitch {
        require: false,
        yielded: false,
    }
}

/// A switch that fails with [`Error::BackgroundUnsupported`] when
/// backgrounding is unavailable.
pub fn background_required() -> BackgroundSwitch {
    BackgroundSwitch {
        require: true,
        yielded: false,
    }
}

fn platform_supports_background() -> bool {
    cfg!(not(target_family = "wasm"))
}

impl Future for BackgroundSwitch {
    type Output = Result<(), Error>;

    fn poll(mut self: Pin<&mut Self>, context: &mut Context) -> Poll<Self::Output> {
        if self.yielded {
            return Poll::Ready(Ok(()));
        }
        self.yielded = true;
        if platform_supports_background() {
            let waker = context.waker().clone();
            let spawned = thread::Builder::new()
                .name("weft-background".into())
                .spawn(move || waker.wake());
            match spawned {
                Ok(_) => Poll::Pending,
                Err(err) if self.require => {
                    log::error!("background thread unavailable: {err}");
                    Poll::Ready(Err(Error::BackgroundUnsupported))
                }
                Err(err) => {
                    log::warn!("background thread unavailable ({err}), resuming inline");
                    context.waker().wake_by_ref();
                    Poll::Pending
                }
            }
        } else if self.require {
            Poll::Ready(Err(Error::BackgroundUnsupported))
        } else {
            context.waker().wake_by_ref();
            Poll::Pending
        }
    }
}
