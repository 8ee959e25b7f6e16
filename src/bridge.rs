use crate::dispatch::{MainContext, MainHandle};
use crate::error::{Error, Failure};
use crate::flatten::Flatten;
use crate::promise::{self, Promise, Settler};
use crate::routine::{Pollable, Routine, Step, Value, Yielded};
use crate::scheduler::{Driver, Scheduler};
use std::rc::Rc;

/// The owned scheduling context: main-context dispatcher, self-driving
/// scheduler, and (optionally) a host driver with its mode query.
///
/// One `Bridge` is created at startup and torn down at shutdown; every
/// bridging call goes through it by reference. There is no process-wide
/// instance.
///
/// The bridge is `!Send`: bridging and pumping are confined to the main
/// context by construction. Work posted from other threads goes through
/// [`MainHandle`].
pub struct Bridge {
    main: MainContext,
    scheduler: Rc<Scheduler>,
    host: Option<Rc<dyn Driver>>,
    is_ticking: Box<dyn Fn() -> bool>,
}

impl Bridge {
    /// Captures the calling thread as the main context and sets up a
    /// self-driving scheduler. The result has no host driver: every bridged
    /// routine is advanced by [`pump`](Bridge::pump).
    pub fn install() -> Bridge {
        Bridge::new(MainContext::install())
    }

    /// Builds a bridge around an already-captured main context.
    pub fn new(main: MainContext) -> Bridge {
        Bridge {
            main,
            scheduler: Rc::new(Scheduler::new()),
            host: None,
            is_ticking: Box::new(|| false),
        }
    }

    /// Replaces the self-driving scheduler, e.g. with one built by
    /// [`Scheduler::with_clock`].
    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Bridge {
        self.scheduler = Rc::new(scheduler);
        self
    }

    /// Attaches the host's own driver and the query telling whether the host
    /// is actively ticking. The query is evaluated fresh at every
    /// registration, never cached: running mode can change across the
    /// process lifetime.
    pub fn with_host(
        mut self,
        driver: Rc<dyn Driver>,
        is_ticking: impl Fn() -> bool + 'static,
    ) -> Bridge {
        self.host = Some(driver);
        self.is_ticking = Box::new(is_ticking);
        self
    }

    pub fn main(&self) -> &MainContext {
        &self.main
    }

    /// A `Send + Clone` handle for [`run_on_main`](MainHandle::run_on_main).
    pub fn handle(&self) -> MainHandle {
        self.main.handle()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The external scheduling signal: drains main-context actions, then
    /// advances the self-driving scheduler one tick. Call once per frame (or
    /// per editor update, or per test step).
    pub fn pump(&self) {
        self.main.pump();
        self.scheduler.tick();
    }

    fn driver(&self) -> &dyn Driver {
        match &self.host {
            Some(host) if (self.is_ticking)() => host.as_ref(),
            _ => self.scheduler.as_ref(),
        }
    }

    /// Bridges a routine: drives it (and any routines it yields, at any
    /// nesting depth) to completion under the currently selected driver, and
    /// returns a promise settling with its final value or failure.
    ///
    /// The mandatory first resume happens inside this call, so a routine
    /// that terminates immediately settles the promise before `bridge`
    /// returns.
    ///
    /// The returned promise must be awaited, [`try_take`](Promise::try_take)n
    /// or [`detach`](Promise::detach)ed; an unobserved handle loses the
    /// failure with it.
    pub fn bridge(&self, routine: impl Routine + 'static) -> Promise<Option<Value>> {
        if !self.main.is_main() {
            log::error!("bridge called off the main context");
            return promise::failed(Box::new(Error::NotMainContext));
        }
        let (promise, settler) = promise::pair();
        self.driver().register(Box::new(Bridged {
            inner: Flatten::new(routine),
            settler: Some(settler),
        }));
        promise
    }

    /// Bridges a single wait condition: the promise settles once the
    /// condition is satisfied, with the condition-specific value: a pollable
    /// operation's result payload, a nested routine's final value, and no
    /// value for the other shapes.
    pub fn bridge_wait(&self, condition: Yielded) -> Promise<Option<Value>> {
        self.bridge(WaitRoutine {
            state: WaitState::Fresh(condition),
        })
    }
}

/// Settling shim between a [`Flatten`] and its promise: the outermost
/// routine a driver actually steps. Completion and failure settle exactly
/// once; afterwards the shim is inert.
struct Bridged {
    inner: Flatten,
    settler: Option<Settler<Option<Value>>>,
}

impl Routine for Bridged {
    fn resume(&mut self) -> Result<Step, Failure> {
        if self.settler.is_none() {
            return Ok(Step::done());
        }
        match self.inner.resume() {
            Err(failure) => {
                // Failures at any nesting depth end here, in the one
                // settlement that owns this stack.
                self.settler.take().expect("checked above").fail(failure);
                Ok(Step::done())
            }
            Ok(Step::Done(value)) => {
                self.settler.take().expect("checked above").resolve(value);
                Ok(Step::done())
            }
            Ok(step) => Ok(step),
        }
    }
}

/// Thin wrapper turning one wait condition into a routine: suspend once on
/// the condition, then terminate with its natural result.
struct WaitRoutine {
    state: WaitState,
}

enum WaitState {
    Fresh(Yielded),
    /// Pollable operations stay here so their result payload can be
    /// extracted after completion; the scheduler never owns the operation.
    Polling(Box<dyn Pollable>),
    /// Condition handed to the driver; being resumed means it was satisfied.
    Suspended,
    Finished,
}

impl Routine for WaitRoutine {
    fn resume(&mut self) -> Result<Step, Failure> {
        match std::mem::replace(&mut self.state, WaitState::Finished) {
            WaitState::Fresh(Yielded::Pending(operation)) => {
                self.state = WaitState::Polling(operation);
                Ok(Step::Yield(Yielded::Pass))
            }
            WaitState::Fresh(condition) => {
                self.state = WaitState::Suspended;
                Ok(Step::Yield(condition))
            }
            WaitState::Polling(mut operation) => {
                if operation.is_done() {
                    Ok(Step::Done(operation.take_result()))
                } else {
                    self.state = WaitState::Polling(operation);
                    Ok(Step::Yield(Yielded::Pass))
                }
            }
            WaitState::Suspended | WaitState::Finished => Ok(Step::done()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routine::{from_fn, BoxRoutine};
    use core::time::Duration;
    use std::cell::{Cell, RefCell};
    use std::fmt;
    use std::time::Instant;

    #[derive(Debug)]
    struct Boom;

    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("x")
        }
    }

    impl std::error::Error for Boom {}

    fn manual_bridge() -> (Rc<Cell<Instant>>, Bridge) {
        let clock = Rc::new(Cell::new(Instant::now()));
        let handle = clock.clone();
        let bridge = Bridge::install().with_scheduler(Scheduler::with_clock(move || handle.get()));
        (clock, bridge)
    }

    /// Pumps until the promise settles, with an upper bound on ticks.
    fn settle<T>(
        bridge: &Bridge,
        clock: &Rc<Cell<Instant>>,
        dt: Duration,
        mut promise: Promise<T>,
        max_ticks: u32,
    ) -> Result<T, Failure> {
        let mut ticks = 0;
        loop {
            match promise.try_take() {
                Ok(outcome) => return outcome,
                Err(pending) => promise = pending,
            }
            assert!(ticks < max_ticks, "promise did not settle in {max_ticks} ticks");
            ticks += 1;
            clock.set(clock.get() + dt);
            bridge.pump();
        }
    }

    #[test]
    fn immediate_return_settles_inside_bridge() {
        let (_clock, bridge) = manual_bridge();
        let resumes = Rc::new(Cell::new(0));
        let counted = resumes.clone();
        let promise = bridge.bridge(from_fn(move || {
            counted.set(counted.get() + 1);
            Ok(Step::done_with(42i32))
        }));
        // Settled synchronously, after exactly one resume.
        let value = promise.try_take().expect("settled").unwrap().unwrap();
        assert_eq!(*value.downcast::<i32>().unwrap(), 42);
        assert_eq!(resumes.get(), 1);
        assert!(bridge.scheduler().is_empty());
    }

    #[test]
    fn timed_routine_settles_at_the_threshold_tick() {
        let (clock, bridge) = manual_bridge();
        let mut waited = false;
        let mut promise = bridge.bridge(from_fn(move || {
            if !waited {
                waited = true;
                Ok(Step::Yield(Yielded::wait_secs(1.0)))
            } else {
                Ok(Step::done_with("done"))
            }
        }));
        let frame = Duration::from_secs_f64(1.0 / 60.0);
        // Pending through the 60 ticks the timer can observe below 1s.
        for _ in 0..60 {
            clock.set(clock.get() + frame);
            bridge.pump();
            promise = match promise.try_take() {
                Err(pending) => pending,
                Ok(_) => panic!("settled before the threshold"),
            };
        }
        clock.set(clock.get() + frame);
        bridge.pump();
        let value = promise.try_take().expect("threshold reached").unwrap().unwrap();
        assert_eq!(*value.downcast::<&str>().unwrap(), "done");
    }

    #[test]
    fn nested_failure_settles_the_outer_promise_with_the_exact_error() {
        let (_clock, bridge) = manual_bridge();
        let outer_resumes = Rc::new(Cell::new(0));
        let counted = outer_resumes.clone();
        let promise = bridge.bridge(from_fn(move || {
            counted.set(counted.get() + 1);
            Ok(Step::Yield(Yielded::Nested(Box::new(from_fn(|| {
                Err(Box::new(Boom) as Failure)
            })))))
        }));
        let failure = match promise.try_take().expect("failed synchronously") {
            Err(failure) => failure,
            Ok(_) => panic!("expected a failure"),
        };
        assert!(failure.downcast::<Boom>().is_ok());
        // The outer routine was never resumed again after the push.
        assert_eq!(outer_resumes.get(), 1);
        assert!(bridge.scheduler().is_empty());
    }

    #[test]
    fn settled_promise_observes_without_rerunning() {
        let (_clock, bridge) = manual_bridge();
        let resumes = Rc::new(Cell::new(0));
        let counted = resumes.clone();
        let promise = bridge.bridge(from_fn(move || {
            counted.set(counted.get() + 1);
            Ok(Step::done_with(1i32))
        }));
        bridge.pump();
        bridge.pump();
        assert!(promise.try_take().is_ok());
        assert_eq!(resumes.get(), 1);
    }

    #[test]
    fn wait_for_resolves_with_the_operation_payload() {
        struct Operation {
            done: Rc<Cell<bool>>,
        }
        impl Pollable for Operation {
            fn is_done(&mut self) -> bool {
                self.done.get()
            }
            fn take_result(&mut self) -> Option<Value> {
                Some(Box::new(123i32))
            }
        }

        let (clock, bridge) = manual_bridge();
        let done = Rc::new(Cell::new(false));
        let promise = bridge.bridge_wait(Yielded::wait_for(Operation { done: done.clone() }));
        done.set(true);
        let value = settle(&bridge, &clock, Duration::from_millis(16), promise, 4)
            .unwrap()
            .unwrap();
        assert_eq!(*value.downcast::<i32>().unwrap(), 123);
    }

    #[test]
    fn wait_secs_resolves_with_no_value() {
        let (clock, bridge) = manual_bridge();
        let promise = bridge.bridge_wait(Yielded::wait_secs(0.0));
        let outcome = settle(&bridge, &clock, Duration::from_millis(16), promise, 4).unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn bridging_a_nested_condition_resolves_with_its_final_value() {
        let (clock, bridge) = manual_bridge();
        let promise = bridge.bridge_wait(Yielded::Nested(Box::new(from_fn(|| {
            Ok(Step::done_with(7i32))
        }))));
        let value = settle(&bridge, &clock, Duration::from_millis(16), promise, 4)
            .unwrap()
            .unwrap();
        assert_eq!(*value.downcast::<i32>().unwrap(), 7);
    }

    #[test]
    fn reverse_bridge_carries_a_value_between_bridged_routines() {
        let (clock, bridge) = manual_bridge();
        // First routine: finishes with 5 after one pass.
        let mut passed = false;
        let first = bridge.bridge(from_fn(move || {
            if !passed {
                passed = true;
                Ok(Step::Yield(Yielded::Pass))
            } else {
                Ok(Step::done_with(5i32))
            }
        }));
        // Second routine: yield-waits on the first promise.
        let mut waiting = Some(first.into_routine());
        let second = bridge.bridge(from_fn(move || match waiting.take() {
            Some(routine) => Ok(Step::Yield(Yielded::Nested(Box::new(routine)))),
            None => Ok(Step::done()),
        }));
        let value = settle(&bridge, &clock, Duration::from_millis(16), second, 8)
            .unwrap()
            .unwrap();
        // The nested promise-routine's final value flows through.
        let inner = value.downcast::<Option<Value>>().unwrap().unwrap();
        assert_eq!(*inner.downcast::<i32>().unwrap(), 5);
    }

    struct Recording {
        registered: RefCell<Vec<BoxRoutine>>,
    }

    impl Driver for Recording {
        fn register(&self, routine: BoxRoutine) {
            self.registered.borrow_mut().push(routine);
        }
    }

    #[test]
    fn running_mode_is_queried_fresh_at_every_registration() {
        let host = Rc::new(Recording {
            registered: RefCell::new(Vec::new()),
        });
        let ticking = Rc::new(Cell::new(false));
        let flag = ticking.clone();
        let bridge = Bridge::install().with_host(host.clone(), move || flag.get());

        let idle = bridge.bridge(from_fn(|| Ok(Step::Yield(Yielded::Pass))));
        assert_eq!(bridge.scheduler().len(), 1);
        assert_eq!(host.registered.borrow().len(), 0);

        ticking.set(true);
        let running = bridge.bridge(from_fn(|| Ok(Step::Yield(Yielded::Pass))));
        assert_eq!(bridge.scheduler().len(), 1);
        assert_eq!(host.registered.borrow().len(), 1);

        idle.detach();
        running.detach();
    }

    #[test]
    fn bridging_off_the_main_context_fails_that_call_only() {
        let main = MainContext::install();
        let (sender, receiver) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            // A bridge wired to a context captured on another thread.
            let bridge = Bridge::new(main);
            let promise = bridge.bridge(from_fn(|| Ok(Step::done_with(1i32))));
            let failure = match promise.try_take().expect("settled") {
                Err(failure) => failure,
                Ok(_) => panic!("expected a failure"),
            };
            sender.send(failure).unwrap();
        })
        .join()
        .unwrap();
        let failure = receiver.recv().unwrap();
        match failure.downcast::<Error>() {
            Ok(error) => assert!(matches!(*error, Error::NotMainContext)),
            Err(_) => panic!("expected the bridge's own error"),
        }
    }
}
