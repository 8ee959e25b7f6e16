use core::task::{RawWaker, RawWakerVTable, Waker};

/// Waker that does nothing.
///
/// Used when polling a future outside of an await context: the reverse
/// bridge re-polls once per tick anyway, and blocking-style completion tests
/// re-check state themselves.
pub fn make_noop_waker() -> Waker {
    // SAFETY: all vtable entries ignore the (null) data pointer.
    unsafe { Waker::from_raw(noop_rawwaker()) }
}

fn noop_rawwaker() -> RawWaker {
    RawWaker::new(core::ptr::null(), &NOOP_VTABLE)
}

const NOOP_VTABLE: RawWakerVTable = RawWakerVTable::new(
    |_ptr| noop_rawwaker(), // clone
    |_ptr| (),              // wake
    |_ptr| (),              // wake_by_ref
    |_ptr| (),              // drop
);

/// Replace a stored waker, skipping the clone when it would wake the same
/// task anyway.
pub fn update_waker(stored: &mut Option<Waker>, replacement: &Waker) {
    match stored {
        Some(stored) if replacement.will_wake(stored) => (),
        stored => *stored = Some(replacement.clone()),
    }
}

#[test]
fn noop_waker_survives_clone_and_wake() {
    let waker = make_noop_waker();
    let clone = waker.clone();
    waker.wake_by_ref();
    clone.wake();
}
