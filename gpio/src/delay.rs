//! Blocking waits on the host.
//!
//! Drivers wait through [DelayNs], so any `embedded-hal` delay provider fits. Every timing
//! requirement is a minimum: an implementation may wait longer than asked, never shorter.
pub use embedded_hal::delay::DelayNs;
use std::hint::spin_loop;
use std::thread::sleep;
use std::time::{Duration, Instant};

/// Waits by putting the thread to sleep. Cheap on the CPU, but the OS usually rounds short
/// waits up to tens of microseconds.
#[derive(Copy, Clone, Debug, Default)]
pub struct SleepDelay;

impl DelayNs for SleepDelay {
    fn delay_ns(&mut self, ns: u32) {
        sleep(Duration::from_nanos(ns.into()));
    }

    fn delay_us(&mut self, us: u32) {
        sleep(Duration::from_micros(us.into()));
    }

    fn delay_ms(&mut self, ms: u32) {
        sleep(Duration::from_millis(ms.into()));
    }
}

/// Waits by spinning on the monotonic clock. Keeps sub-microsecond waits short at the cost of
/// a busy CPU.
#[derive(Copy, Clone, Debug, Default)]
pub struct SpinDelay;

impl SpinDelay {
    fn spin(duration: Duration) {
        let start = Instant::now();
        while start.elapsed() < duration {
            spin_loop();
        }
    }
}

impl DelayNs for SpinDelay {
    fn delay_ns(&mut self, ns: u32) {
        Self::spin(Duration::from_nanos(ns.into()));
    }

    fn delay_us(&mut self, us: u32) {
        Self::spin(Duration::from_micros(us.into()));
    }

    fn delay_ms(&mut self, ms: u32) {
        Self::spin(Duration::from_millis(ms.into()));
    }
}
