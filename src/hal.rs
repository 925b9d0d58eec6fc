//! Hardware abstraction layer contract (§6): the core depends on this trait,
//! never on a concrete transport (socket-CAN, USB-CAN, SPI-MCP2515, ...).
//! Unlike the teacher's `CanBus`/`KorriTimer` traits, these are synchronous
//! and non-blocking on the read side, matching this crate's tick-driven,
//! OS-thread concurrency model (§5) rather than a single async executor.
use std::time::Duration;

use crate::transport::CanFrame;

/// A CAN bus the core can read from and write to. Implementations are free
/// to back this with socket-CAN, a USB-CAN adapter, SPI-MCP2515, or an
/// in-memory double for tests.
pub trait CanBus {
    type Error: std::fmt::Debug;

    /// Open the bus for use. Called once before the first `read_frame`.
    fn open(&mut self) -> Result<(), Self::Error>;

    /// Close the bus. No further calls are made after this succeeds.
    fn close(&mut self) -> Result<(), Self::Error>;

    /// Return the next received frame without blocking, or `None` if the
    /// bus has nothing buffered right now. The RX thread (§5) is the only
    /// caller allowed to block (by polling this in a loop); the core itself
    /// treats this call as instantaneous.
    fn read_frame(&mut self) -> Result<Option<CanFrame>, Self::Error>;

    /// Transmit `frame`. Returns `Ok(true)` on success, `Ok(false)` if the
    /// underlying controller's TX buffer is full (the caller should retry).
    fn write_frame(&mut self, frame: &CanFrame) -> Result<bool, Self::Error>;
}

/// Monotonic clock abstraction so the core's timers never depend on the
/// wall clock or a specific executor.
pub trait Clock {
    /// Elapsed time since some arbitrary, fixed epoch (e.g. process start).
    fn now(&self) -> Duration;
}

/// [`Clock`] backed by [`std::time::Instant`], for production use.
#[derive(Debug)]
pub struct SystemClock {
    start: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self { start: std::time::Instant::now() }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
pub mod test_support {
    //! In-memory bus and clock doubles, analogous to the teacher's mock CAN
    //! bus/timer, used throughout the integration tests.
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Default)]
    pub struct MemoryBus {
        pub inbound: VecDeque<CanFrame>,
        pub outbound: Vec<CanFrame>,
    }

    impl CanBus for MemoryBus {
        type Error = std::convert::Infallible;

        fn open(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn close(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn read_frame(&mut self) -> Result<Option<CanFrame>, Self::Error> {
            Ok(self.inbound.pop_front())
        }

        fn write_frame(&mut self, frame: &CanFrame) -> Result<bool, Self::Error> {
            self.outbound.push(frame.clone());
            Ok(true)
        }
    }

    #[derive(Debug, Default)]
    pub struct ManualClock {
        pub now: Duration,
    }

    impl Clock for ManualClock {
        fn now(&self) -> Duration {
            self.now
        }
    }
}
