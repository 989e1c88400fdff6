use std::time::Duration;

/// Bounded retry budget with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Hard attempt ceiling per subtask, first attempt included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `failed_attempts` failures:
    /// base * 2^(failed_attempts - 1), capped at `max_delay`.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exp = failed_attempts.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay)
    }
}
