//! Escalating backoff for lock-word contention.
//!
//! Every place that fails to take a lock word (or observes one locked while
//! reading optimistically) retries through [`Backoff::snooze`]. The policy
//! escalates in three steps so the uncontended path stays a handful of
//! instructions while heavy contention cannot livelock:
//!
//! ```text
//! attempt:  0 ........ 127 ........ 1023 ........ 2047 ....
//!           spin       yield        sleep 100us    sleep 200us (capped at 1ms)
//! ```
//!
//! On single-CPU hosts spinning can never help, so every attempt sleeps.

use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// Attempts between `thread::yield_now` calls (mask).
const YIELD_MASK: u32 = 0x7f;

/// Attempts between timed sleeps (mask).
const SLEEP_MASK: u32 = 0x3ff;

/// Base sleep unit, multiplied by the escalation step.
const SLEEP_UNIT: Duration = Duration::from_micros(100);

/// Upper bound for the escalation multiplier.
const MAX_SLEEP_STEPS: u32 = 10;

fn single_cpu() -> bool {
    static SINGLE: OnceLock<bool> = OnceLock::new();
    *SINGLE.get_or_init(|| {
        thread::available_parallelism()
            .map(|p| p.get() == 1)
            .unwrap_or(false)
    })
}

/// Retry counter implementing the spin → yield → sleep escalation.
#[derive(Debug, Default)]
pub(crate) struct Backoff {
    attempt: u32,
}

impl Backoff {
    #[inline]
    pub(crate) fn new() -> Self {
        Self { attempt: 0 }
    }

    /// Number of times [`snooze`](Self::snooze) has been called.
    #[inline]
    pub(crate) fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Waits a little before the caller retries.
    pub(crate) fn snooze(&mut self) {
        let attempt = self.attempt;
        self.attempt = self.attempt.wrapping_add(1);

        if single_cpu() || attempt & SLEEP_MASK == SLEEP_MASK {
            let steps = MAX_SLEEP_STEPS.min(1 + (attempt >> 10));
            thread::sleep(SLEEP_UNIT * steps);
            return;
        }

        if attempt & YIELD_MASK == YIELD_MASK {
            thread::yield_now();
        } else {
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempts_are_counted() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.attempts(), 0);
        for _ in 0..130 {
            backoff.snooze();
        }
        assert_eq!(backoff.attempts(), 130);
    }
}
