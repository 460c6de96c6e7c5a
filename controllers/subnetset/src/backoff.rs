//! # Fibonacci Backoff
//!
//! Progressive requeue delays for retryable reconciliation failures. The
//! sequence grows more slowly than exponential backoff: min, min, 2·min,
//! 3·min, 5·min, ... capped at max.
//!
//! [`RequeueTracker`] keeps one sequence per object and is reset once the
//! object reconciles cleanly.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, capped at `max_secs`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Minimum backoff value in seconds (for reset)
    min_secs: u64,
    /// Previous backoff value in seconds
    prev_secs: u64,
    /// Current backoff value in seconds
    current_secs: u64,
    /// Maximum backoff value in seconds
    max_secs: u64,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with minimum and maximum values in seconds
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            min_secs,
            prev_secs: 0,
            current_secs: min_secs,
            max_secs,
        }
    }

    /// Get the next backoff duration in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_secs;

        let next = self.prev_secs + self.current_secs;
        self.prev_secs = self.current_secs;
        self.current_secs = std::cmp::min(next, self.max_secs);

        result
    }

    /// Get the next backoff duration as a `Duration` and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev_secs = 0;
        self.current_secs = self.min_secs;
    }
}

/// Per-object backoff state, keyed by `namespace/name`
#[derive(Debug)]
pub struct RequeueTracker {
    min_secs: u64,
    max_secs: u64,
    states: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl RequeueTracker {
    /// Creates a tracker whose sequences run from `min` to `max`
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min_secs: min.as_secs().max(1),
            max_secs: max.as_secs().max(1),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Next requeue delay for `key`, advancing its sequence
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states
            .entry(key.to_string())
            .or_insert_with(|| FibonacciBackoff::new(self.min_secs, self.max_secs))
            .next_backoff()
    }

    /// Forgets the sequence of `key` after a successful reconciliation
    pub fn reset(&self, key: &str) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Number of objects currently backing off
    pub fn len(&self) -> usize {
        self.states.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True when no object is backing off
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
