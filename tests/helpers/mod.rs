//! Test doubles to simulate the CAN bus and clock during integration tests.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use isobus_core::transport::CanFrame;
use isobus_core::{CanBus, Clock};

/// In-memory CAN bus reproducing the `CanBus` trait's non-blocking contract.
pub struct MockCanBus {
    tx: Rc<RefCell<VecDeque<CanFrame>>>,
    rx: Rc<RefCell<VecDeque<CanFrame>>>,
}

impl MockCanBus {
    /// Construct a pair of interconnected buses (two control functions on
    /// the same segment).
    pub fn create_pair() -> (Self, Self) {
        let a_to_b = Rc::new(RefCell::new(VecDeque::new()));
        let b_to_a = Rc::new(RefCell::new(VecDeque::new()));
        let a = Self { tx: Rc::clone(&a_to_b), rx: Rc::clone(&b_to_a) };
        let b = Self { tx: b_to_a, rx: a_to_b };
        (a, b)
    }
}

impl CanBus for MockCanBus {
    type Error = std::convert::Infallible;

    fn open(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<CanFrame>, Self::Error> {
        Ok(self.rx.borrow_mut().pop_front())
    }

    fn write_frame(&mut self, frame: &CanFrame) -> Result<bool, Self::Error> {
        self.tx.borrow_mut().push_back(frame.clone());
        Ok(true)
    }
}

/// Shared, steppable clock: every DUT/host pair in a test advances the same
/// instant together so their timers stay comparable.
#[derive(Clone, Default)]
pub struct SharedClock {
    now: Rc<RefCell<Duration>>,
}

impl SharedClock {
    pub fn advance(&self, by: Duration) {
        *self.now.borrow_mut() += by;
    }
}

impl Clock for SharedClock {
    fn now(&self) -> Duration {
        *self.now.borrow()
    }
}

/// Advance `clock` by `step` and `pump()` both managers once, repeating up
/// to `max_steps` times or until `done` returns `true`. Panics if `done`
/// never becomes true, so a stalled scenario fails the test loudly instead
/// of looping forever.
pub fn run_until<B1, B2>(
    clock: &SharedClock,
    step: Duration,
    max_steps: usize,
    a: &mut isobus_core::NetworkManager<B1, SharedClock>,
    b: &mut isobus_core::NetworkManager<B2, SharedClock>,
    mut done: impl FnMut(&isobus_core::NetworkManager<B1, SharedClock>, &isobus_core::NetworkManager<B2, SharedClock>) -> bool,
) where
    B1: CanBus,
    B2: CanBus,
{
    for _ in 0..max_steps {
        clock.advance(step);
        a.pump().ok();
        b.pump().ok();
        if done(a, b) {
            return;
        }
    }
    panic!("scenario did not converge within {max_steps} steps");
}
