//! Backoff policy with a bounded retry budget.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::RetryClass;

/// Jitter strategy applied on top of the exponential delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Retry budget and backoff parameters.
///
/// `max_retries` counts retries beyond the first try, so a job runs at most
/// `max_retries + 1` times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Optional cap on a single delay in milliseconds.
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    2000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: None,
            jitter: JitterStrategy::None,
        }
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more retries, give up.
    GiveUp,
    /// Don't retry, the error is not retryable.
    NotRetryable,
}

impl RetryPolicy {
    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Caps each delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Total attempts a job may make, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff before the retry that follows `attempt` failed attempts.
    ///
    /// delay = base * 2^attempt, saturating, optionally capped and jittered.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let mut delay = self.base_delay_ms.saturating_mul(factor);
        if let Some(max) = self.max_delay_ms {
            delay = delay.min(max);
        }

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }

    /// Decides what to do after a failure.
    ///
    /// `failed_attempts` is the number of retries already scheduled for the
    /// job (zero after the first failure).
    #[must_use]
    pub fn decide(&self, failed_attempts: u32, class: RetryClass) -> RetryDecision {
        match class {
            RetryClass::Fatal => RetryDecision::NotRetryable,
            RetryClass::Retryable if failed_attempts >= self.max_retries => RetryDecision::GiveUp,
            RetryClass::Retryable => RetryDecision::Retry(self.delay(failed_attempts)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_strategy_default() {
        assert_eq!(JitterStrategy::default(), JitterStrategy::None);
    }

    #[test]
    fn test_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.base_delay_ms, 2000);
        assert_eq!(policy.max_delay_ms, None);
    }

    #[test]
    fn test_policy_builder() {
        let policy = RetryPolicy::new()
            .with_max_retries(5)
            .with_base_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(10))
            .with_jitter(JitterStrategy::Equal);

        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.base_delay_ms, 500);
        assert_eq!(policy.max_delay_ms, Some(10_000));
        assert_eq!(policy.jitter, JitterStrategy::Equal);
    }

    #[test]
    fn test_exponential_delay_no_jitter() {
        let policy = RetryPolicy::new().with_base_delay(Duration::from_millis(100));

        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_monotonic() {
        let policy = RetryPolicy::default();
        for attempt in 0..80 {
            assert!(policy.delay(attempt + 1) >= policy.delay(attempt));
        }
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy::new()
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5));

        assert_eq!(policy.delay(10), Duration::from_secs(5));
    }

    #[test]
    fn test_full_jitter_bounds() {
        let policy = RetryPolicy::new()
            .with_base_delay(Duration::from_millis(100))
            .with_jitter(JitterStrategy::Full);

        for _ in 0..50 {
            assert!(policy.delay(0) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_equal_jitter_bounds() {
        let policy = RetryPolicy::new()
            .with_base_delay(Duration::from_millis(100))
            .with_jitter(JitterStrategy::Equal);

        for _ in 0..50 {
            let delay = policy.delay(0);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_decide() {
        let policy = RetryPolicy::new().with_base_delay(Duration::from_millis(10));

        assert_eq!(
            policy.decide(0, RetryClass::Retryable),
            RetryDecision::Retry(Duration::from_millis(10))
        );
        assert_eq!(
            policy.decide(1, RetryClass::Retryable),
            RetryDecision::Retry(Duration::from_millis(20))
        );
        assert_eq!(policy.decide(2, RetryClass::Retryable), RetryDecision::GiveUp);
        assert_eq!(policy.decide(0, RetryClass::Fatal), RetryDecision::NotRetryable);
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_retries": 4}"#).unwrap();
        assert_eq!(policy.max_retries, 4);
        assert_eq!(policy.base_delay_ms, 2000);
    }
}
