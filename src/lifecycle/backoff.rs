//! Exponential backoff schedule for restart attempts.

use std::time::Duration;

/// Default first delay: 1 second.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1_000);

/// Default growth factor per attempt.
pub const DEFAULT_MULTIPLIER: u32 = 2;

/// Default ceiling: 30 seconds.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Pure backoff calculator: `initial * multiplier^n`, capped at `max`.
///
/// The calculator only computes delays; sleeping is the caller's business.
/// Each instance tracks how many delays it has handed out so far.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    multiplier: u32,
    max: Duration,
    attempts: u32,
}

impl Backoff {
    /// Create a calculator with explicit parameters.
    #[must_use]
    pub fn new(initial: Duration, multiplier: u32, max: Duration) -> Self {
        Self {
            initial,
            multiplier,
            max,
            attempts: 0,
        }
    }

    /// Delay for the next attempt, advancing the internal counter.
    ///
    /// The first call returns the initial delay, each further call grows it
    /// by the multiplier, and the result never exceeds the configured cap.
    pub fn next_delay(&mut self) -> Duration {
        let factor = self.multiplier.saturating_pow(self.attempts);
        let delay = self.initial.saturating_mul(factor).min(self.max);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Number of delays handed out since creation or the last reset.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Start the schedule over from the initial delay.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_DELAY, DEFAULT_MULTIPLIER, DEFAULT_MAX_DELAY)
    }
}
