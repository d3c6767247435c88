//! Bounded exponential backoff

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry budget and backoff curve for one kind of operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound on any single delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Growth factor between consecutive delays
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Policy for classification calls: 4 attempts, 250ms doubling up to 10s
    pub fn classifier() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }

    /// Policy for sink writes: 3 attempts, 100ms doubling up to 2s
    pub fn sink() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            multiplier: 2.0,
        }
    }

    /// Policy for re-reading an unavailable source: unbounded, 500ms up to 30s
    pub fn source() -> Self {
        Self {
            max_attempts: u32::MAX,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exp = failed_attempt.saturating_sub(1).min(32) as i32;
        let raw = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exp);
        let capped = raw.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Whether another attempt is allowed after `attempts` have been made
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::classifier()
    }
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::classifier();
        assert_eq!(policy.backoff(1), Duration::from_millis(250));
        assert_eq!(policy.backoff(2), Duration::from_millis(500));
        assert_eq!(policy.backoff(3), Duration::from_millis(1000));
        assert_eq!(policy.backoff(10), Duration::from_millis(10_000));
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::sink();
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }
}
