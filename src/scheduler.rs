use crate::routine::{BoxRoutine, Routine, Step, Yielded};
use core::cell::{Cell, RefCell};
use core::time::Duration;
use std::time::Instant;

/// Registration seam between the bridge and whatever advances routines.
///
/// In running mode the host's own per-frame mechanism implements this; in
/// idle mode the [`Scheduler`] does. The bridge picks one per registration.
///
/// Implementations perform the routine's mandatory first resume
/// synchronously inside `register`, so its first suspension is observed
/// before the call returns and an immediately-terminating routine completes
/// inline.
pub trait Driver {
    fn register(&self, routine: BoxRoutine);
}

/// Upper bound on the per-tick delta fed to wait timers.
///
/// A pump that pauses (editor stall, breakpoint, laptop sleep) must not
/// fast-forward timed waits when it resumes; elapsed time accumulates only
/// at tick cadence.
const MAX_TICK_DELTA: Duration = Duration::from_millis(250);

/// Elapsed-time accumulator emulating a timed wait.
///
/// Started when the timed condition is first observed, fed the scheduler's
/// clamped tick deltas; done once the accumulated time reaches the target.
struct WaitTimer {
    target: Duration,
    elapsed: Duration,
}

impl WaitTimer {
    fn new(seconds: f32) -> WaitTimer {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        WaitTimer {
            target: Duration::from_secs_f32(seconds),
            elapsed: Duration::ZERO,
        }
    }

    fn advance(&mut self, dt: Duration) {
        self.elapsed += dt;
    }

    fn is_done(&self) -> bool {
        self.elapsed >= self.target
    }
}

/// A live routine, with its last observed suspension and, only while that
/// suspension is an unelapsed timed wait, its timer.
struct Entry {
    routine: BoxRoutine,
    yielded: Yielded,
    timer: Option<WaitTimer>,
}

/// Advances registered routines itself, for when nothing else is ticking
/// them.
///
/// A host that is actively running steps live routines once per frame and
/// interprets their suspensions; this scheduler reproduces that behavior
/// from an external pump signal: call [`tick`](Scheduler::tick) once per
/// scheduling opportunity, and every live routine is advanced according to
/// its last observed suspension.
///
/// The scheduler is deliberately single-threaded (`!Send`): registration and
/// ticking are confined to the main context, which is what makes the
/// lock-free live set sound.
pub struct Scheduler {
    entries: RefCell<Vec<Entry>>,
    /// Registered while a tick was in progress; joins the live set at the
    /// end of that tick, so the creating tick never steps it.
    parked: RefCell<Vec<Entry>>,
    ticking: Cell<bool>,
    last_tick: Cell<Option<Instant>>,
    now: Box<dyn Fn() -> Instant>,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler::with_clock(Instant::now)
    }

    /// A scheduler reading time from `now` instead of the system monotonic
    /// clock. For hosts with their own notion of time, and for deterministic
    /// tests.
    pub fn with_clock(now: impl Fn() -> Instant + 'static) -> Scheduler {
        Scheduler {
            entries: RefCell::new(Vec::new()),
            parked: RefCell::new(Vec::new()),
            ticking: Cell::new(false),
            last_tick: Cell::new(None),
            now: Box::new(now),
        }
    }

    /// Number of live routines (including ones parked mid-tick).
    pub fn len(&self) -> usize {
        self.entries.borrow().len() + self.parked.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a routine and performs its mandatory first resume
    /// immediately, so its suspension is available for classification. A
    /// routine that terminates (or fails) on that first resume never enters
    /// the live set.
    pub fn register(&self, routine: impl Routine + 'static) {
        self.register_boxed(Box::new(routine))
    }

    fn register_boxed(&self, mut routine: BoxRoutine) {
        match routine.resume() {
            Err(failure) => log::error!("routine failed outside a bridge: {failure}"),
            Ok(Step::Done(_)) => (),
            Ok(Step::Yield(yielded)) => {
                log::trace!("scheduler registered a routine suspended on {yielded:?}");
                let entry = Entry {
                    routine,
                    yielded,
                    timer: None,
                };
                if self.ticking.get() {
                    self.parked.borrow_mut().push(entry)
                } else {
                    self.entries.borrow_mut().push(entry)
                }
            }
        }
    }

    /// One scheduling opportunity: advance every live routine once according
    /// to its suspension, and drop the ones that terminated.
    pub fn tick(&self) {
        let now = (self.now)();
        let dt = match self.last_tick.replace(Some(now)) {
            Some(previous) => now.saturating_duration_since(previous).min(MAX_TICK_DELTA),
            None => Duration::ZERO,
        };

        self.ticking.set(true);
        // Walk in reverse registration order so removing the current entry
        // never skips another one.
        let count = self.entries.borrow().len();
        for index in (0..count).rev() {
            let mut entry = self.entries.borrow_mut().remove(index);
            // The entry is out of the live set while its own code runs, so
            // predicates and resumes are free to re-enter `register`.
            if Self::step(&mut entry, dt) {
                self.entries.borrow_mut().insert(index, entry);
            }
        }
        self.ticking.set(false);

        let mut parked = self.parked.borrow_mut();
        self.entries.borrow_mut().append(&mut parked);
    }

    /// Advances one entry. Returns whether it stays live.
    fn step(entry: &mut Entry, dt: Duration) -> bool {
        let due = match &mut entry.yielded {
            Yielded::Timed { seconds, .. } => {
                // The timer starts at first observation; the creating tick's
                // delta predates the wait and is not counted.
                let timer = match &mut entry.timer {
                    Some(timer) => {
                        timer.advance(dt);
                        timer
                    }
                    slot @ None => slot.insert(WaitTimer::new(*seconds)),
                };
                timer.is_done()
            }
            Yielded::Until(predicate) => predicate(),
            Yielded::While(predicate) => !predicate(),
            Yielded::Pending(operation) => operation.is_done(),
            // A nested routine yielded straight to a driver is not
            // interpreted here (that is Flatten's job); the owner is simply
            // advanced every tick, like any suspension with no special
            // meaning.
            Yielded::Nested(_) | Yielded::Pass => true,
        };
        if !due {
            return true;
        }
        // A satisfied condition alone never removes an entry; only
        // termination observed after the resume does.
        match entry.routine.resume() {
            Err(failure) => {
                log::error!("routine failed outside a bridge: {failure}");
                false
            }
            Ok(Step::Done(_)) => false,
            Ok(Step::Yield(yielded)) => {
                entry.yielded = yielded;
                entry.timer = None;
                true
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Scheduler {
        Scheduler::new()
    }
}

impl Driver for Scheduler {
    fn register(&self, routine: BoxRoutine) {
        self.register_boxed(routine)
    }
}
