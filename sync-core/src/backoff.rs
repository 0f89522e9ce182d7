//! Exponential backoff values.
//!
//! Only the arithmetic lives here. Waiting is done by the client's
//! `ExponentialRetryDelay`, which owns one of these.

use std::time::Duration;

/// Default first delay.
pub const DEFAULT_START: Duration = Duration::from_secs(2);
/// Default delay cap.
pub const DEFAULT_MAX: Duration = Duration::from_secs(5 * 60);

/// Doubling delay, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    start: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Create a backoff starting at `start` and never exceeding `max`.
    ///
    /// A `start` above `max` is clamped to `max`.
    pub fn new(start: Duration, max: Duration) -> Self {
        let start = start.min(max);
        Self {
            start,
            max,
            current: start,
        }
    }

    /// The delay the next wait will use.
    pub fn next_value(&self) -> Duration {
        self.current
    }

    /// Double the current delay, capped at the maximum.
    pub fn advance(&mut self) {
        self.current = self.current.saturating_mul(2).min(self.max);
    }

    /// Restore the start value.
    pub fn reset(&mut self) {
        self.current = self.start;
    }

    /// First delay.
    pub fn start(&self) -> Duration {
        self.start
    }

    /// Delay cap.
    pub fn max(&self) -> Duration {
        self.max
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_START, DEFAULT_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(backoff.next_value(), Duration::from_millis(100));

        backoff.advance();
        assert_eq!(backoff.next_value(), Duration::from_millis(200));
        backoff.advance();
        assert_eq!(backoff.next_value(), Duration::from_millis(400));
        backoff.advance();
        assert_eq!(backoff.next_value(), Duration::from_millis(500));
        backoff.advance();
        assert_eq!(backoff.next_value(), Duration::from_millis(500));
    }

    #[test]
    fn reset_restores_start() {
        let mut backoff = Backoff::default();
        backoff.advance();
        backoff.advance();
        assert_eq!(backoff.next_value(), Duration::from_secs(8));

        backoff.reset();
        assert_eq!(backoff.next_value(), DEFAULT_START);
    }

    #[test]
    fn start_above_max_is_clamped() {
        let backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(backoff.next_value(), Duration::from_secs(1));
    }

    #[test]
    fn huge_values_do_not_overflow() {
        let mut backoff = Backoff::new(Duration::MAX / 2 + Duration::from_secs(1), Duration::MAX);
        backoff.advance();
        assert_eq!(backoff.next_value(), Duration::MAX);
    }
}
