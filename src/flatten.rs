use crate::error::Failure;
use crate::routine::{BoxRoutine, Routine, Step, Value, Yielded};

/// Drives a routine to completion, transparently descending into nested
/// routines it yields.
///
/// `Flatten` is itself a [`Routine`]: drivers step it like any other, but a
/// whole tree of nested routines behaves as a single flat one. Descending
/// into (and returning from) a nested routine happens within the same
/// scheduling opportunity, so nesting depth costs no extra ticks; only
/// non-nested suspensions propagate outward to the driver.
///
/// Interpreting nested routines here, instead of re-yielding them to the
/// driver, is what lets an error raised at any nesting depth reach the
/// single outward completion instead of being lost one level down.
pub struct Flatten {
    /// Top of the stack is the routine currently being driven. Never empty
    /// except once the whole computation has completed.
    stack: Vec<BoxRoutine>,
    /// Most recent final value produced by a terminated routine; the
    /// completion value of the whole tree once the stack empties.
    result: Option<Value>,
}

impl Flatten {
    pub fn new(root: impl Routine + 'static) -> Flatten {
        Flatten {
            stack: vec![Box::new(root)],
            result: None,
        }
    }
}

impl Routine for Flatten {
    fn resume(&mut self) -> Result<Step, Failure> {
        loop {
            let top = match self.stack.last_mut() {
                Some(top) => top,
                // Completed (or resumed again afterwards).
                None => return Ok(Step::Done(self.result.take())),
            };
            // A failure unwinds the whole tree at once: the stack is left as
            // is and the layer above settles the single outward promise.
            match top.resume()? {
                Step::Done(value) => {
                    if value.is_some() {
                        self.result = value;
                    }
                    self.stack.pop();
                    if self.stack.is_empty() {
                        return Ok(Step::Done(self.result.take()));
                    }
                    // The revealed routine continues this same opportunity.
                }
                Step::Yield(Yielded::Nested(inner)) => self.stack.push(inner),
                Step::Yield(other) => return Ok(Step::Yield(other)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routine::from_fn;
    use std::cell::Cell;
    use std::fmt;
    use std::rc::Rc;

    #[derive(Debug)]
    struct Boom;

    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("x")
        }
    }

    impl std::error::Error for Boom {}

    /// Yields `passes` times, then terminates with `value`.
    fn counting(passes: u32, value: i32) -> impl Routine {
        let mut left = passes;
        from_fn(move || {
            if left > 0 {
                left -= 1;
                Ok(Step::Yield(Yielded::Pass))
            } else {
                Ok(Step::done_with(value))
            }
        })
    }

    /// Yields `child` as a nested routine once, then terminates valueless.
    fn parent_of(child: impl Routine + 'static) -> impl Routine {
        let mut child = Some(Box::new(child) as BoxRoutine);
        from_fn(move || match child.take() {
            Some(child) => Ok(Step::Yield(Yielded::Nested(child))),
            None => Ok(Step::done()),
        })
    }

    #[test]
    fn innermost_final_value_reaches_the_outside() {
        // a yields b, b yields c, c finishes with 42; a and b add nothing.
        let a = parent_of(parent_of(counting(0, 42)));
        let mut flat = Flatten::new(a);
        match flat.resume() {
            Ok(Step::Done(Some(v))) => assert_eq!(*v.downcast::<i32>().unwrap(), 42),
            _ => panic!("expected the innermost value in one opportunity"),
        }
    }

    #[test]
    fn descent_consumes_no_extra_opportunities() {
        // The inner routine suspends twice; nesting it one level deeper must
        // not change how many resumes the outside observes.
        let mut flat = Flatten::new(parent_of(counting(2, 7)));
        assert!(matches!(flat.resume(), Ok(Step::Yield(Yielded::Pass))));
        assert!(matches!(flat.resume(), Ok(Step::Yield(Yielded::Pass))));
        match flat.resume() {
            Ok(Step::Done(Some(v))) => assert_eq!(*v.downcast::<i32>().unwrap(), 7),
            _ => panic!("expected completion on the third opportunity"),
        }
    }

    #[test]
    fn nested_failure_unwinds_to_the_root_untouched() {
        let outer_resumes = Rc::new(Cell::new(0u32));
        let observed = outer_resumes.clone();
        let mut yielded = false;
        let root = from_fn(move || {
            observed.set(observed.get() + 1);
            assert!(!yielded, "outer routine resumed after the failing push");
            yielded = true;
            Ok(Step::Yield(Yielded::Nested(Box::new(from_fn(|| {
                Err(Box::new(Boom) as Failure)
            })))))
        });
        let mut flat = Flatten::new(root);
        match flat.resume() {
            Err(failure) => assert!(failure.downcast::<Boom>().is_ok()),
            _ => panic!("expected the nested failure"),
        }
        assert_eq!(outer_resumes.get(), 1);
    }

    #[test]
    fn non_nested_suspensions_propagate_outward() {
        let mut first = true;
        let root = from_fn(move || {
            if first {
                first = false;
                Ok(Step::Yield(Yielded::wait_secs(1.0)))
            } else {
                Ok(Step::done())
            }
        });
        let mut flat = Flatten::new(root);
        match flat.resume() {
            Ok(Step::Yield(Yielded::Timed { seconds, realtime })) => {
                assert_eq!(seconds, 1.0);
                assert!(!realtime);
            }
            _ => panic!("the timed wait should reach the driver"),
        }
        assert!(matches!(flat.resume(), Ok(Step::Done(None))));
    }

    #[test]
    fn resumed_after_completion_stays_done() {
        let mut flat = Flatten::new(counting(0, 1));
        assert!(matches!(flat.resume(), Ok(Step::Done(Some(_)))));
        assert!(matches!(flat.resume(), Ok(Step::Done(None))));
    }
}
