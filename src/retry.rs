//! Connect retry policy
//!
//! A device that cannot reach the broker retries its connect with exponential
//! backoff and gives up after `max_attempts`. Publish and subscribe failures
//! are never retried here; the next tick is the retry.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total connect attempts, including the first one. `1` disables retrying.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Tracks attempts made under a [`RetryPolicy`]
#[derive(Debug, Default)]
pub struct RetryState {
    attempts: u32,
}

impl RetryState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    #[must_use]
    pub fn should_retry(&self, policy: &RetryPolicy) -> bool {
        self.attempts < policy.max_attempts.max(1)
    }

    /// Delay before the next attempt, growing with each recorded attempt
    #[must_use]
    pub fn next_delay(&self, policy: &RetryPolicy) -> Duration {
        let exponent = i32::try_from(self.attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = policy.backoff_factor.max(1.0).powi(exponent);
        let secs = policy.initial_delay.min(policy.max_delay).as_secs_f64() * factor;
        Duration::try_from_secs_f64(secs).map_or(policy.max_delay, |d| d.min(policy.max_delay))
    }
}
