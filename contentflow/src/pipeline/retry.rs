//! Step retry policy with linear or exponential backoff.
//!
//! A step's `retry: { max, backoff }` allows `max` additional attempts after
//! the first failure. Before retry `k` (starting at 1) the executor waits:
//!
//! - `linear`: `base * k`
//! - `exponential`: `base * 2^(k-1)`
//!
//! capped at `max_delay_ms`, then jittered per [`JitterStrategy`].

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Delay grows proportionally to the retry number.
    Linear,
    /// Delay doubles every retry.
    #[default]
    Exponential,
}

/// Randomisation applied on top of the computed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterStrategy {
    /// Exact delays.
    #[default]
    None,
    /// Uniform in `0..=delay`.
    Full,
    /// Half fixed, half uniform.
    Equal,
}

/// Retry settings declared on a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max: u32,
    /// Delay growth.
    #[serde(default)]
    pub backoff: BackoffStrategy,
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(max: u32, backoff: BackoffStrategy) -> Self {
        Self { max, backoff }
    }

    /// Total invocations allowed, counting the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max.saturating_add(1)
    }
}

/// Engine-wide delay parameters shared by every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay unit in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound before jitter.
    pub max_delay_ms: u64,
    /// Jitter applied to every delay.
    pub jitter: JitterStrategy,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter: JitterStrategy::None,
        }
    }
}

impl BackoffConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns the delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for(&self, strategy: BackoffStrategy, retry: u32) -> Duration {
        let retry = retry.max(1);
        let base = self.base_delay_ms;
        let delay = match strategy {
            BackoffStrategy::Linear => base.saturating_mul(u64::from(retry)),
            BackoffStrategy::Exponential => {
                base.saturating_mul(2u64.saturating_pow(retry - 1))
            }
        }
        .min(self.max_delay_ms);

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
}

/// Result of a retried operation together with the number of invocations.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T, E> {
    /// The final result.
    pub result: Result<T, E>,
    /// Invocations made, counting the first.
    pub attempts: u32,
}

/// Runs `operation` until it succeeds or the policy is exhausted.
///
/// The operation receives the 1-based attempt number. Without a policy it
/// runs exactly once.
pub async fn with_retry<T, E, F, Fut>(
    policy: Option<&RetryPolicy>,
    backoff: &BackoffConfig,
    key: &str,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.map_or(1, RetryPolicy::max_attempts);
    let strategy = policy.map(|p| p.backoff).unwrap_or_default();
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(e) if attempt < max_attempts => {
                let delay = backoff.delay_for(strategy, attempt);
                tracing::warn!(
                    key,
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Retrying after error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return RetryOutcome {
                    result: Err(e),
                    attempts: attempt,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> BackoffConfig {
        BackoffConfig::new().with_base_delay_ms(1)
    }

    #[test]
    fn test_defaults() {
        assert_eq!(BackoffStrategy::default(), BackoffStrategy::Exponential);
        assert_eq!(JitterStrategy::default(), JitterStrategy::None);
        let config = BackoffConfig::default();
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 30_000);
    }

    #[test]
    fn test_policy_deserializes_lowercase() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max": 2, "backoff": "linear"}"#).unwrap();
        assert_eq!(policy, RetryPolicy::new(2, BackoffStrategy::Linear));
        let policy: RetryPolicy = serde_json::from_str(r#"{"max": 1}"#).unwrap();
        assert_eq!(policy.backoff, BackoffStrategy::Exponential);
        assert_eq!(policy.max_attempts(), 2);
    }

    #[test]
    fn test_linear_delay() {
        let config = BackoffConfig::new().with_base_delay_ms(100);
        assert_eq!(config.delay_for(BackoffStrategy::Linear, 1), Duration::from_millis(100));
        assert_eq!(config.delay_for(BackoffStrategy::Linear, 2), Duration::from_millis(200));
        assert_eq!(config.delay_for(BackoffStrategy::Linear, 3), Duration::from_millis(300));
    }

    #[test]
    fn test_exponential_delay() {
        let config = BackoffConfig::new().with_base_delay_ms(100);
        let delays: Vec<_> = (1..=4)
            .map(|k| config.delay_for(BackoffStrategy::Exponential, k).as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800]);
    }

    #[test]
    fn test_delay_capped() {
        let config = BackoffConfig::new().with_max_delay_ms(5000);
        assert_eq!(
            config.delay_for(BackoffStrategy::Exponential, 20),
            Duration::from_millis(5000)
        );
    }

    #[test]
    fn test_jitter_bounds() {
        let full = BackoffConfig::new()
            .with_base_delay_ms(100)
            .with_jitter(JitterStrategy::Full);
        let equal = full.with_jitter(JitterStrategy::Equal);
        for _ in 0..20 {
            assert!(full.delay_for(BackoffStrategy::Linear, 1).as_millis() <= 100);
            let d = equal.delay_for(BackoffStrategy::Linear, 1).as_millis();
            assert!((50..=100).contains(&d));
        }
    }

    #[tokio::test]
    async fn test_no_policy_runs_once() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<(), String> = with_retry(None, &fast(), "step", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("boom".to_string()) }
        })
        .await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let policy = RetryPolicy::new(3, BackoffStrategy::Linear);
        let outcome: RetryOutcome<u32, String> =
            with_retry(Some(&policy), &fast(), "step", |attempt| async move {
                if attempt < 3 {
                    Err(format!("attempt {attempt}"))
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(outcome.result, Ok(3));
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_exhaustion_makes_max_plus_one_attempts() {
        let policy = RetryPolicy::new(2, BackoffStrategy::Exponential);
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<(), String> = with_retry(Some(&policy), &fast(), "step", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("always".to_string()) }
        })
        .await;
        assert_eq!(outcome.result, Err("always".to_string()));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
