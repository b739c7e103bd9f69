//! # Fibonacci Backoff
//!
//! Progressive backoff that grows more slowly than exponential backoff. Used
//! both for requeueing failed resources (seconds to minutes) and for spacing
//! out conflict retries (milliseconds).
//!
//! ## Usage
//!
//! ```rust
//! use terraform_operator::controller::backoff::FibonacciBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = FibonacciBackoff::new(Duration::from_secs(5), Duration::from_secs(300));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(10));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(15));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(25));
//! ```

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, starting from `min` twice and
/// capped at `max`. State is kept in milliseconds.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_ms: u64,
    prev_ms: u64,
    current_ms: u64,
    max_ms: u64,
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl FibonacciBackoff {
    /// Create a backoff starting at `min` and capped at `max`
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        let min_ms = as_millis(min).max(1);
        Self {
            min_ms,
            prev_ms: 0,
            current_ms: min_ms,
            max_ms: as_millis(max).max(min_ms),
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_ms;
        let next = self.prev_ms.saturating_add(self.current_ms);
        self.prev_ms = self.current_ms;
        self.current_ms = std::cmp::min(next, self.max_ms);
        Duration::from_millis(result)
    }

    /// Get the next backoff in whole seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        self.next_backoff().as_secs()
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev_ms = 0;
        self.current_ms = self.min_ms;
    }
}
