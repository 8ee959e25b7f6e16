use crate::error::Failure;
use crate::utils::make_noop_waker;
use core::any::Any;
use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

/// Dynamically typed payload carried across the bridge.
///
/// Routines terminate with (and pollable operations produce) values of
/// caller-chosen types; the bridge moves them as erased boxes and the
/// awaiting side downcasts. `Send` is required because a settled result may
/// be observed from off the main context after a background switch.
pub type Value = Box<dyn Any + Send>;

/// Boxed routine, as stored by drivers and the interpreter stack.
pub type BoxRoutine = Box<dyn Routine>;

/// Predicate evaluated by the scheduler once per tick.
pub type Predicate = Box<dyn FnMut() -> bool>;

/// A resumable unit of sequential work.
///
/// Each call to [`resume`](Routine::resume) either terminates with an
/// optional final value ([`Step::Done`]), terminates by failing (`Err`), or
/// suspends with a classified value ([`Step::Yield`]) to be interpreted by
/// whichever driver currently owns the routine.
///
/// A routine is owned by exactly one driver or interpreter at a time and is
/// resumed once per scheduling opportunity, in yield order.
pub trait Routine {
    fn resume(&mut self) -> Result<Step, Failure>;
}

impl<R: Routine + ?Sized> Routine for Box<R> {
    fn resume(&mut self) -> Result<Step, Failure> {
        (**self).resume()
    }
}

/// Outcome of one resume step.
pub enum Step {
    /// The routine terminated, with an optional final value.
    Done(Option<Value>),
    /// The routine suspended on the given condition.
    Yield(Yielded),
}

impl Step {
    /// Terminate with no value.
    pub fn done() -> Step {
        Step::Done(None)
    }

    /// Terminate with a final value.
    pub fn done_with<T: Any + Send>(value: T) -> Step {
        Step::Done(Some(Box::new(value)))
    }
}

/// Classified meaning of a suspension: the finite set of wait-condition
/// shapes a driver knows how to interpret.
///
/// This is the single classification point: a routine yields a `Yielded`
/// value directly, and both the interpreter and the scheduler match on it
/// once. Supporting a new wait shape means adding a variant and a match arm.
pub enum Yielded {
    /// Wait for a duration, in seconds. `realtime` selects unscaled time on
    /// hosts that distinguish scaled from realtime clocks; the self-driving
    /// scheduler has no scaled time and treats both identically.
    Timed { seconds: f32, realtime: bool },
    /// Wait until the predicate evaluates true.
    Until(Predicate),
    /// Wait while the predicate evaluates true (resume once it is false).
    While(Predicate),
    /// Wait for a pollable asynchronous operation to report completion.
    Pending(Box<dyn Pollable>),
    /// A nested routine: interpreted by [`Flatten`](crate::Flatten) by
    /// descending into it; a bare scheduler resumes the owner every tick.
    Nested(BoxRoutine),
    /// No special meaning: suspend for one tick.
    Pass,
}

impl Yielded {
    /// Wait for `seconds` of (scaled, where the host distinguishes) time.
    pub fn wait_secs(seconds: f32) -> Yielded {
        Yielded::Timed {
            seconds,
            realtime: false,
        }
    }

    /// Wait for `seconds` of realtime.
    pub fn wait_secs_realtime(seconds: f32) -> Yielded {
        Yielded::Timed {
            seconds,
            realtime: true,
        }
    }

    /// Wait until `predicate` returns true.
    pub fn wait_until(predicate: impl FnMut() -> bool + 'static) -> Yielded {
        Yielded::Until(Box::new(predicate))
    }

    /// Wait while `predicate` returns true.
    pub fn wait_while(predicate: impl FnMut() -> bool + 'static) -> Yielded {
        Yielded::While(Box::new(predicate))
    }

    /// Wait for a pollable operation.
    pub fn wait_for(operation: impl Pollable + 'static) -> Yielded {
        Yielded::Pending(Box::new(operation))
    }
}

impl fmt::Debug for Yielded {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Yielded::Timed { seconds, realtime } => f
                .debug_struct("Timed")
                .field("seconds", seconds)
                .field("realtime", realtime)
                .finish(),
            Yielded::Until(_) => f.write_str("Until(..)"),
            Yielded::While(_) => f.write_str("While(..)"),
            Yielded::Pending(_) => f.write_str("Pending(..)"),
            Yielded::Nested(_) => f.write_str("Nested(..)"),
            Yielded::Pass => f.write_str("Pass"),
        }
    }
}

/// A pollable asynchronous operation: exposes done-ness, checked once per
/// tick, and an optional result payload extracted after completion.
///
/// This is the seam for host operation types (asset requests, downloads,
/// process handles); implement it instead of teaching the scheduler about
/// concrete types.
///
/// ```no_run
/// use std::process::{Child, Command};
/// use weft::{Pollable, Value};
///
/// /// Waits for a spawned process; resolves with its exit code.
/// struct ProcessExit(Child);
///
/// impl Pollable for ProcessExit {
///     fn is_done(&mut self) -> bool {
///         matches!(self.0.try_wait(), Ok(Some(_)))
///     }
///     fn take_result(&mut self) -> Option<Value> {
///         let status = self.0.wait().ok()?;
///         Some(Box::new(status.code()))
///     }
/// }
///
/// let child = Command::new("editor").spawn().unwrap();
/// let wait = weft::Yielded::wait_for(ProcessExit(child));
/// ```
pub trait Pollable {
    /// Has the operation completed? Called at most once per scheduling tick.
    fn is_done(&mut self) -> bool;

    /// The operation's result payload, if it has one. Called after
    /// [`is_done`](Pollable::is_done) first returns true.
    fn take_result(&mut self) -> Option<Value> {
        None
    }
}

/// Builds a routine from a closure, in the manner of [`core::iter::from_fn`].
///
/// ```
/// use weft::{routine, Routine, Step, Yielded};
///
/// let mut calls = 0;
/// let mut r = routine::from_fn(move || {
///     calls += 1;
///     if calls < 3 {
///         Ok(Step::Yield(Yielded::Pass))
///     } else {
///         Ok(Step::done_with(calls))
///     }
/// });
/// assert!(matches!(r.resume(), Ok(Step::Yield(Yielded::Pass))));
/// ```
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: FnMut() -> Result<Step, Failure>,
{
    FromFn(f)
}

/// Routine returned by [`from_fn`].
pub struct FromFn<F>(F);

impl<F> Routine for FromFn<F>
where
    F: FnMut() -> Result<Step, Failure>,
{
    fn resume(&mut self) -> Result<Step, Failure> {
        (self.0)()
    }
}

/// Adapts a future into a routine that passes each tick until the future is
/// ready, then terminates with the output.
///
/// The future is polled once per resume with a no-op waker, matching the
/// tick-granular progress model of the yield side; futures that only make
/// progress when woken by their own waker will still be observed, one tick
/// late at worst, as long as their readiness is visible to `poll`.
pub fn from_future<F>(future: F) -> FutureRoutine<F>
where
    F: Future + 'static,
    F::Output: Any + Send,
{
    FutureRoutine(Box::pin(future))
}

/// Routine returned by [`from_future`].
pub struct FutureRoutine<F>(Pin<Box<F>>);

impl<F> Routine for FutureRoutine<F>
where
    F: Future,
    F::Output: Any + Send,
{
    fn resume(&mut self) -> Result<Step, Failure> {
        let waker = make_noop_waker();
        match self.0.as_mut().poll(&mut Context::from_waker(&waker)) {
            Poll::Pending => Ok(Step::Yield(Yielded::Pass)),
            Poll::Ready(value) => Ok(Step::done_with(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_fn_counts_resumes() {
        let mut n = 0;
        let mut r = from_fn(move || {
            n += 1;
            if n < 3 {
                Ok(Step::Yield(Yielded::Pass))
            } else {
                Ok(Step::done_with(n))
            }
        });
        assert!(matches!(r.resume(), Ok(Step::Yield(Yielded::Pass))));
        assert!(matches!(r.resume(), Ok(Step::Yield(Yielded::Pass))));
        match r.resume() {
            Ok(Step::Done(Some(v))) => assert_eq!(*v.downcast::<i32>().unwrap(), 3),
            _ => panic!("expected termination with value"),
        }
    }

    #[test]
    fn from_future_ready_terminates_immediately() {
        let mut r = from_future(async { 7u32 });
        match r.resume() {
            Ok(Step::Done(Some(v))) => assert_eq!(*v.downcast::<u32>().unwrap(), 7),
            _ => panic!("ready future should terminate on first resume"),
        }
    }

    #[test]
    fn yielded_debug_names_variants() {
        assert_eq!(format!("{:?}", Yielded::Pass), "Pass");
        assert_eq!(format!("{:?}", Yielded::wait_until(|| true)), "Until(..)");
        assert_eq!(
            format!("{:?}", Yielded::wait_secs_realtime(2.0)),
            "Timed { seconds: 2.0, realtime: true }"
        );
    }
}
