//! # Fibonacci Backoff
//!
//! Delays between retries of an allocation that lost a race.
//! Grows more slowly than exponential backoff, so a burst of bulk-import
//! allocations against one region spreads out without stalling any request for long.
//!
//! Sequence with the defaults (50ms min, 500ms max): 50, 50, 100, 150, 250, 400, 500 (max).

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at `max_millis`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Previous delay in milliseconds
    prev_millis: u64,
    /// Current delay in milliseconds
    current_millis: u64,
    /// Maximum delay in milliseconds
    max_millis: u64,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with minimum and maximum delays in milliseconds
    ///
    /// # Arguments
    ///
    /// * `min_millis` - First (and second) delay
    /// * `max_millis` - Cap for every later delay
    #[must_use]
    pub fn new(min_millis: u64, max_millis: u64) -> Self {
        Self {
            prev_millis: 0,
            current_millis: min_millis.min(max_millis),
            max_millis,
        }
    }

    /// Build from `Duration` bounds
    #[must_use]
    pub fn from_bounds(min: Duration, max: Duration) -> Self {
        let to_millis = |d: Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Self::new(to_millis(min), to_millis(max))
    }

    /// Get the next delay in milliseconds and advance the sequence
    pub fn next_backoff_millis(&mut self) -> u64 {
        let result = self.current_millis;

        let next = self.prev_millis.saturating_add(self.current_millis);
        self.prev_millis = self.current_millis;
        self.current_millis = std::cmp::min(next, self.max_millis);

        result
    }

    /// Get the next delay as a `Duration` and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_millis(self.next_backoff_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(50, 500);

        assert_eq!(backoff.next_backoff_millis(), 50);
        assert_eq!(backoff.next_backoff_millis(), 50);
        assert_eq!(backoff.next_backoff_millis(), 100);
        assert_eq!(backoff.next_backoff_millis(), 150);
        assert_eq!(backoff.next_backoff_millis(), 250);
        assert_eq!(backoff.next_backoff_millis(), 400);
        assert_eq!(backoff.next_backoff_millis(), 500); // max
    }

    #[test]
    fn test_fibonacci_backoff_max_cap() {
        let mut backoff = FibonacciBackoff::new(50, 500);
        for _ in 0..7 {
            backoff.next_backoff_millis();
        }
        // Next would be 650 (400+250), capped
        assert_eq!(backoff.next_backoff_millis(), 500);
        assert_eq!(backoff.next_backoff_millis(), 500);
    }

    #[test]
    fn test_min_above_max_is_capped() {
        let mut backoff = FibonacciBackoff::from_bounds(Duration::from_millis(900), Duration::from_millis(200));
        assert_eq!(backoff.next_backoff_millis(), 200);
        assert_eq!(backoff.next_backoff_millis(), 200);
    }
}
