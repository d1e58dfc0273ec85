//! Retry policy for transient collaborator faults.
//!
//! Retries apply only to errors the pipeline classifies as transient;
//! permanent faults and validation verdicts return immediately.
//! `max_attempts` counts total calls, so a config of 3 means one
//! initial call plus at most two retries.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 1000;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Doubles the base delay each attempt.
    #[default]
    Exponential,
    /// Grows the base delay linearly with the attempt number.
    Linear,
    /// Uses the base delay unchanged.
    Constant,
}

/// How the computed delay is randomized to avoid thundering herds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Use the computed delay as-is.
    None,
    /// Uniform over `[0, delay]`.
    #[default]
    Full,
    /// Uniform over `[delay/2, delay]`.
    Equal,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total calls allowed, including the first.
    pub max_attempts: u32,
    /// Base delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any computed delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Delay growth strategy.
    pub backoff_strategy: BackoffStrategy,
    /// Delay randomization strategy.
    pub jitter_strategy: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            backoff_strategy: BackoffStrategy::default(),
            jitter_strategy: JitterStrategy::default(),
        }
    }
}

impl RetryConfig {
    /// Sets the total number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the base delay in milliseconds.
    #[must_use]
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Sets the delay cap in milliseconds.
    #[must_use]
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter_strategy(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }
}

/// Computes the delay before the retry that follows `attempt` (1-based).
#[must_use]
pub fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let raw = match config.backoff_strategy {
        BackoffStrategy::Exponential => config
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent)),
        BackoffStrategy::Linear => config.base_delay_ms.saturating_mul(u64::from(attempt)),
        BackoffStrategy::Constant => config.base_delay_ms,
    };
    let capped = raw.min(config.max_delay_ms);
    let jittered = match config.jitter_strategy {
        JitterStrategy::None => capped,
        JitterStrategy::Full => rand::thread_rng().gen_range(0..=capped),
        JitterStrategy::Equal => {
            let half = capped / 2;
            half + rand::thread_rng().gen_range(0..=capped - half)
        }
    };
    Duration::from_millis(jittered)
}

/// Runs an operation under the retry policy.
///
/// Non-retryable errors return immediately; retryable ones are retried
/// with backoff until `max_attempts` total calls have been made.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    mut op: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation, attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) if attempt >= config.max_attempts => {
                tracing::warn!(operation, attempt, error = %err, "giving up after final attempt");
                return Err(err);
            }
            Err(err) => {
                let delay = backoff_delay(attempt, config);
                tracing::debug!(
                    operation,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "retrying after transient fault"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn no_jitter() -> RetryConfig {
        RetryConfig::default().with_jitter_strategy(JitterStrategy::None)
    }

    #[test]
    fn test_exponential_backoff_doubles() {
        let config = no_jitter();
        assert_eq!(backoff_delay(1, &config), Duration::from_millis(1000));
        assert_eq!(backoff_delay(2, &config), Duration::from_millis(2000));
        assert_eq!(backoff_delay(3, &config), Duration::from_millis(4000));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = no_jitter().with_max_delay_ms(2500);
        assert_eq!(backoff_delay(5, &config), Duration::from_millis(2500));
    }

    #[test]
    fn test_linear_and_constant_strategies() {
        let linear = no_jitter().with_backoff_strategy(BackoffStrategy::Linear);
        assert_eq!(backoff_delay(3, &linear), Duration::from_millis(3000));

        let constant = no_jitter().with_backoff_strategy(BackoffStrategy::Constant);
        assert_eq!(backoff_delay(7, &constant), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let full = RetryConfig::default().with_jitter_strategy(JitterStrategy::Full);
        for _ in 0..50 {
            assert!(backoff_delay(2, &full) <= Duration::from_millis(2000));
        }

        let equal = RetryConfig::default().with_jitter_strategy(JitterStrategy::Equal);
        for _ in 0..50 {
            let delay = backoff_delay(2, &equal);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(2000));
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_faults() {
        let config = no_jitter().with_base_delay_ms(1);
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retry(&config, "fetch standings", || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(PipelineError::from_collaborator("fetch", "timeout", true))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let config = no_jitter().with_base_delay_ms(1).with_max_attempts(3);
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = with_retry(&config, "fetch standings", || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::from_collaborator("fetch", "timeout", true))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let config = no_jitter().with_base_delay_ms(1);
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = with_retry(&config, "validate dev", || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::from_collaborator("validate", "row count drifted", false))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
