use crate::error::Failure;
use crate::routine::{Routine, Step, Yielded};
use crate::utils::update_waker;
use core::any::Any;
use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use parking_lot::Mutex;
use std::sync::Arc;

/// Single-assignment result cell, settled by the producer at most once.
enum State<T> {
    Pending {
        /// [`Waker`] of the task blocked on our [`Promise`].
        waker: Option<Waker>,
        /// The consumer gave up its handle via [`Promise::detach`]; a later
        /// failure is logged instead of vanishing.
        detached: bool,
    },
    // Options so the terminal value can be consumed exactly once.
    Resolved(Option<T>),
    Failed(Option<Failure>),
}

/// The completion (and result) of a bridged operation.
///
/// A `Promise` is the consumer half of a single-settlement cell: it
/// implements [`Future`] for asynchronous waiting, and settlement can be
/// manually tested in a non-blocking way with [`try_take`](Promise::try_take).
/// The cell itself is thread-safe, so a settled result may be observed from
/// off the main context.
///
/// A bridged promise that is neither awaited, taken, nor
/// [`detach`](Promise::detach)ed loses its failure silently; always do one of
/// the three.
pub struct Promise<T> {
    shared: Arc<Mutex<State<T>>>,
}

/// Producer half of the cell. Settling consumes it, so settling twice is
/// structurally impossible; the cell still checks loudly in debug builds.
pub(crate) struct Settler<T> {
    shared: Arc<Mutex<State<T>>>,
}

/// Creates a pending promise and its settler.
pub(crate) fn pair<T>() -> (Promise<T>, Settler<T>) {
    let shared = Arc::new(Mutex::new(State::Pending {
        waker: None,
        detached: false,
    }));
    (
        Promise {
            shared: shared.clone(),
        },
        Settler { shared },
    )
}

/// Creates a promise that is already failed.
pub(crate) fn failed<T>(failure: Failure) -> Promise<T> {
    let (promise, settler) = pair();
    settler.fail(failure);
    promise
}

impl<T> Settler<T> {
    pub fn resolve(self, value: T) {
        settle(&self.shared, State::Resolved(Some(value)));
    }

    pub fn fail(self, failure: Failure) {
        settle(&self.shared, State::Failed(Some(failure)));
    }
}

fn settle<T>(shared: &Mutex<State<T>>, outcome: State<T>) {
    let waker = {
        let mut state = shared.lock();
        match &mut *state {
            State::Pending { waker, detached } => {
                if *detached {
                    if let State::Failed(Some(failure)) = &outcome {
                        log::error!("detached bridged operation failed: {failure}");
                    }
                }
                let waker = waker.take();
                *state = outcome;
                waker
            }
            _ => {
                debug_assert!(false, "promise settled twice");
                log::error!("promise settled twice, keeping the first settlement");
                return;
            }
        }
    };
    // Wake outside the lock: the continuation may run inline and re-enter.
    if let Some(waker) = waker {
        waker.wake()
    }
}

impl<T> Promise<T> {
    /// Test settlement without blocking.
    /// If settled, return the outcome, consuming the handle.
    /// If still pending, give the handle back.
    pub fn try_take(self) -> Result<Result<T, Failure>, Self> {
        let outcome = {
            let mut state = self.shared.lock();
            match &mut *state {
                State::Pending { .. } => None,
                State::Resolved(value) => Some(Ok(value
                    .take()
                    .expect("promise result already consumed"))),
                State::Failed(failure) => Some(Err(failure
                    .take()
                    .expect("promise failure already consumed"))),
            }
        };
        match outcome {
            Some(outcome) => Ok(outcome),
            None => Err(self),
        }
    }

    /// Give up observing this promise, but keep its failure visible: if the
    /// operation later fails (or has already failed), the failure is logged
    /// as an error instead of disappearing with the handle.
    pub fn detach(self) {
        let mut state = self.shared.lock();
        match &mut *state {
            State::Pending { detached, .. } => *detached = true,
            State::Failed(Some(failure)) => {
                log::error!("detached bridged operation failed: {failure}")
            }
            _ => (),
        }
    }

    /// Adapts this promise into a routine, so yield-based code can wait for
    /// promise-based work: the routine passes each tick until settlement,
    /// then terminates with the value, or re-raises the exact failure into
    /// the waiting computation.
    pub fn into_routine(self) -> PromiseRoutine<T>
    where
        T: Any + Send,
    {
        PromiseRoutine {
            shared: self.shared,
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = match &*self.shared.lock() {
            State::Pending { .. } => "Pending",
            State::Resolved(_) => "Resolved",
            State::Failed(_) => "Failed",
        };
        write!(f, "Promise({state})")
    }
}

impl<T> Future for Promise<T> {
    type Output = Result<T, Failure>;

    fn poll(self: Pin<&mut Self>, context: &mut Context) -> Poll<Self::Output> {
        let mut state = self.shared.lock();
        match &mut *state {
            State::Pending { waker, .. } => {
                update_waker(waker, context.waker());
                Poll::Pending
            }
            State::Resolved(value) => Poll::Ready(Ok(value
                .take()
                .expect("promise polled again after completion"))),
            State::Failed(failure) => Poll::Ready(Err(failure
                .take()
                .expect("promise polled again after completion"))),
        }
    }
}

/// Routine returned by [`Promise::into_routine`].
pub struct PromiseRoutine<T> {
    shared: Arc<Mutex<State<T>>>,
}

impl<T: Any + Send> Routine for PromiseRoutine<T> {
    fn resume(&mut self) -> Result<Step, Failure> {
        let mut state = self.shared.lock();
        match &mut *state {
            State::Pending { .. } => Ok(Step::Yield(Yielded::Pass)),
            State::Resolved(value) => match value.take() {
                Some(value) => Ok(Step::done_with(value)),
                None => Ok(Step::done()),
            },
            State::Failed(failure) => match failure.take() {
                Some(failure) => Err(failure),
                None => Ok(Step::done()),
            },
        }
    }
}
