//! Coarse cache clock.
//!
//! Record stamps are 32-bit ticks of 1024 ms since the clock started, which
//! keeps them small enough to live in a record trailer.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

/// Source of the ticks used to stamp and expire records.
pub trait Clock: Send + Sync {
    /// Current tick.
    fn now(&self) -> u32;
}

/// Ticks of 1024 ms since construction.
pub struct MonotonicClock {
    started: Instant,
}

impl MonotonicClock {
    /// Starts a clock at tick 0.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> u32 {
        (self.started.elapsed().as_millis() >> 10) as u32
    }
}

impl fmt::Debug for MonotonicClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonotonicClock")
            .field("now", &self.now())
            .finish()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU32,
}

impl ManualClock {
    /// Creates a clock stopped at `now`.
    pub fn new(now: u32) -> Self {
        Self {
            now: AtomicU32::new(now),
        }
    }

    /// Moves the clock forward by `ticks`.
    pub fn advance(&self, ticks: u32) {
        self.now.fetch_add(ticks, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u32 {
        self.now.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_starts_at_zero() {
        assert_eq!(MonotonicClock::new().now(), 0);
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(5);
        clock.advance(3);
        assert_eq!(clock.now(), 8);
    }
}
