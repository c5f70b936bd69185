//! Bounded retry policy with exponential backoff and jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::Config;

/// ±10% of the computed delay.
const JITTER_RATIO: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never below 1.
    pub max_attempts: u32,
    /// Bound on each individual attempt.
    pub attempt_timeout: Duration,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(30),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self::default()
            .with_max_attempts(config.bedrock_max_retries)
            .with_attempt_timeout(config.bedrock_timeout)
            .with_base_delay(config.bedrock_retry_delay)
            .with_max_delay(config.bedrock_retry_max_delay)
            .with_jitter(config.bedrock_retry_jitter)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after `failed_attempt` (1-based) before trying again.
    pub fn backoff_delay(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(32) as i32;
        let base_ms = self.base_delay.as_millis() as f64;
        let capped_ms = (base_ms * self.multiplier.powi(exponent)).min(self.max_delay.as_millis() as f64);

        let jitter_range = capped_ms * JITTER_RATIO;
        let delay_ms = if self.jitter && jitter_range > 0.0 {
            capped_ms + rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            capped_ms
        };

        Duration::from_millis(delay_ms.max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_without_jitter() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_millis(100))
            .with_jitter(false);

        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_secs(5))
            .with_max_delay(Duration::from_secs(8))
            .with_jitter(false);

        assert_eq!(policy.backoff_delay(10), Duration::from_secs(8));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::default().with_base_delay(Duration::from_millis(1000));
        for _ in 0..50 {
            let delay = policy.backoff_delay(1).as_millis();
            assert!((900..=1100).contains(&delay), "delay {delay}ms out of range");
        }
    }

    #[test]
    fn test_zero_base_delay_with_jitter_does_not_panic() {
        let policy = RetryPolicy::default().with_base_delay(Duration::ZERO);
        assert_eq!(policy.backoff_delay(2), Duration::ZERO);
    }

    #[test]
    fn test_max_attempts_never_below_one() {
        assert_eq!(RetryPolicy::default().with_max_attempts(0).max_attempts, 1);
    }
}
