//! # Fibonacci Backoff
//!
//! Progressive requeue intervals for failing resources: 1, 1, 2, 3, 5, 8, ... times the
//! minimum, capped at the maximum.

use std::time::Duration;

/// Per-resource backoff sequence
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_secs: u64,
    max_secs: u64,
    previous: u64,
    current: u64,
}

impl FibonacciBackoff {
    /// Sequence starting at `min_minutes`, capped at `max_minutes`
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self::with_seconds(min_minutes * 60, max_minutes * 60)
    }

    /// Sequence starting at `min_secs`, capped at `max_secs`
    pub fn with_seconds(min_secs: u64, max_secs: u64) -> Self {
        let min_secs = min_secs.max(1);
        Self {
            min_secs,
            max_secs: max_secs.max(min_secs),
            previous: 0,
            current: 1,
        }
    }

    /// Next interval in seconds; advances the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let seconds = self.current.saturating_mul(self.min_secs).min(self.max_secs);
        if seconds < self.max_secs {
            let next = self.previous.saturating_add(self.current);
            self.previous = self.current;
            self.current = next;
        }
        seconds
    }

    /// Restart the sequence after a success
    pub fn reset(&mut self) {
        self.previous = 0;
        self.current = 1;
    }

    /// Interval for the `error_count`-th consecutive error (0-indexed)
    pub fn calculate_for_error_count(error_count: u32, min_minutes: u64, max_minutes: u64) -> Duration {
        let mut backoff = Self::new(min_minutes, max_minutes);
        let mut seconds = backoff.next_backoff_seconds();
        for _ in 0..error_count {
            seconds = backoff.next_backoff_seconds();
        }
        Duration::from_secs(seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence() {
        let mut backoff = FibonacciBackoff::with_seconds(5, 60);
        let seq: Vec<u64> = (0..8).map(|_| backoff.next_backoff_seconds()).collect();
        assert_eq!(seq, vec![5, 5, 10, 15, 25, 40, 60, 60]);
    }

    #[test]
    fn test_reset() {
        let mut backoff = FibonacciBackoff::new(1, 10);
        backoff.next_backoff_seconds();
        backoff.next_backoff_seconds();
        backoff.next_backoff_seconds();
        backoff.reset();
        assert_eq!(backoff.next_backoff_seconds(), 60);
    }

    #[test]
    fn test_calculate_for_error_count() {
        assert_eq!(
            FibonacciBackoff::calculate_for_error_count(0, 1, 60),
            Duration::from_secs(60)
        );
        assert_eq!(
            FibonacciBackoff::calculate_for_error_count(4, 1, 60),
            Duration::from_secs(300)
        );
        assert_eq!(
            FibonacciBackoff::calculate_for_error_count(20, 1, 60),
            Duration::from_secs(3600)
        );
    }
}
