use std::time::Duration;

use crate::config::RetryConfig;

/// Exponential backoff schedule and attempt ceiling for failed
/// deliveries. A leaf policy: it computes, it never stores.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Backoff before the retry that follows the `attempt`-th failure
    /// (1-based): `base_delay * 2^(attempt-1)`, capped at `max_delay`.
    /// The first retry waits `base_delay`; each failure doubles it.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let multiplier = 1u64.checked_shl(exp).unwrap_or(u64::MAX);
        let delay_ms = (self.base_delay.as_millis() as u64).saturating_mul(multiplier);
        Duration::from_millis(delay_ms).min(self.max_delay)
    }

    /// True once `attempt` attempts have been spent — the job has no
    /// retries left and must be parked as Failed.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
