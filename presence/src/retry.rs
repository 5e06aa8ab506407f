//! Exponential backoff for persistence writes.

use std::time::Duration;

/// Exponential backoff retry policy.
///
/// Retries failed writes with exponentially increasing delays, capped at a maximum.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// # Arguments
    ///
    /// * `max_retries` - Retries allowed after the first attempt
    /// * `base_delay` - Delay before the first retry
    /// * `max_delay` - Upper bound for any single delay
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// How long to wait before the next attempt, given how many retries have
    /// already been made. `None` once the budget is spent.
    pub fn delay_for(&self, n_past_retries: u32) -> Option<Duration> {
        if n_past_retries >= self.max_retries {
            None
        } else {
            Some(self.exponential_delay(n_past_retries))
        }
    }

    /// Calculate exponential backoff delay.
    fn exponential_delay(&self, n_attempts: u32) -> Duration {
        let exponent = n_attempts.min(i32::MAX as u32) as i32;
        let delay = self.base_delay.as_secs_f64() * 2_f64.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(200), Duration::from_secs(10))
    }
}
