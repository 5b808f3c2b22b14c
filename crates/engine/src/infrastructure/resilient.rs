//! Retry with exponential backoff and jitter.
//!
//! `RetryConfig` is shared by the planner wrapper below and by remote batch
//! submission, which retries by rescheduling its queue item instead of sleeping.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;

use crate::infrastructure::ports::{PlannerError, PlannerProviderPort};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one (1 = no retries)
    pub max_attempts: u32,
    /// Delay after failed attempt `n` is `multiplier_ms * 2^(n-1)`, clamped to the bounds below
    pub multiplier_ms: u64,
    /// Minimum delay in milliseconds
    pub min_delay_ms: u64,
    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,
    /// Jitter factor (0.0-1.0) for randomizing delays to prevent thundering herd
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            multiplier_ms: 500,
            min_delay_ms: 1000,
            max_delay_ms: 30000,
            jitter_factor: 0.2,
        }
    }
}

impl RetryConfig {
    /// OpenAI-like providers: 3 attempts, 0.5s..4s.
    pub fn openai() -> Self {
        Self {
            max_attempts: 3,
            multiplier_ms: 500,
            min_delay_ms: 500,
            max_delay_ms: 4000,
            jitter_factor: 0.1,
        }
    }

    /// Anthropic-like providers: 2 attempts, 0.5s..3s.
    pub fn anthropic() -> Self {
        Self {
            max_attempts: 2,
            multiplier_ms: 700,
            min_delay_ms: 500,
            max_delay_ms: 3000,
            jitter_factor: 0.1,
        }
    }

    /// Together-like providers: 2 attempts, 0.5s..3s.
    pub fn together() -> Self {
        Self::anthropic()
    }

    /// Remote batch submission: base 1s, cap 30s.
    pub fn batch_submit(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Calculate the delay after failed attempt `attempt` (1-based) using
    /// exponential backoff with jitter. Jittered delays stay within
    /// `min_delay_ms..=max_delay_ms`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let max = self.max_delay_ms.max(self.min_delay_ms);
        let exponential = self
            .multiplier_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let capped = exponential.clamp(self.min_delay_ms, max);

        // Add jitter: ±jitter_factor around the delay
        let jitter_range = (capped as f64 * self.jitter_factor) as i64;
        let millis = if jitter_range > 0 {
            let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
            (capped as i64 + jitter).max(0) as u64
        } else {
            capped
        };
        Duration::from_millis(millis.clamp(self.min_delay_ms, max))
    }
}

/// Wrapper that adds retry logic to any planner provider.
///
/// Each provider gets its own wrapper and its own [`RetryConfig`]; nothing is
/// shared between providers.
pub struct ResilientPlanner {
    inner: Arc<dyn PlannerProviderPort>,
    config: RetryConfig,
}

impl ResilientPlanner {
    /// Create a new resilient wrapper around an existing provider
    pub fn new(inner: Arc<dyn PlannerProviderPort>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

#[async_trait]
impl PlannerProviderPort for ResilientPlanner {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn propose(&self, prompt: &str, schema: &Value) -> Result<Value, PlannerError> {
        let provider = self.inner.name();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match self.inner.propose(prompt, schema).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(provider, attempt, "Planner request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                tracing::error!(
                    provider,
                    attempt,
                    error = %error,
                    "Planner request failed with non-retryable error"
                );
                return Err(error);
            }

            if attempt >= max_attempts {
                tracing::error!(
                    provider,
                    attempts = attempt,
                    error = %error,
                    "Planner request failed after all retry attempts"
                );
                return Err(error);
            }

            let delay = self.config.calculate_delay(attempt);
            tracing::warn!(
                provider,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Planner request failed, retrying..."
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Provider that fails a configurable number of times before succeeding
    struct FailingProvider {
        failures_remaining: AtomicU32,
        calls: AtomicU32,
        error: PlannerError,
    }

    impl FailingProvider {
        fn new(failure_count: u32, error: PlannerError) -> Self {
            Self {
                failures_remaining: AtomicU32::new(failure_count),
                calls: AtomicU32::new(0),
                error,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PlannerProviderPort for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn propose(&self, _prompt: &str, _schema: &Value) -> Result<Value, PlannerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
                Err(self.error.clone())
            } else {
                Ok(serde_json::json!({"ok": true}))
            }
        }
    }

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            multiplier_ms: 1, // Fast for tests
            min_delay_ms: 1,
            max_delay_ms: 5,
            jitter_factor: 0.0,
        }
    }

    #[tokio::test]
    async fn test_succeeds_without_retry() {
        let mock = Arc::new(FailingProvider::new(0, PlannerError::transport("x")));
        let planner = ResilientPlanner::new(mock.clone(), fast(3));

        let result = planner.propose("p", &Value::Null).await;

        assert!(result.is_ok());
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_succeeds_on_last_attempt() {
        let mock = Arc::new(FailingProvider::new(2, PlannerError::provider("no choices")));
        let planner = ResilientPlanner::new(mock.clone(), fast(3));

        let result = planner.propose("p", &Value::Null).await;

        assert!(result.is_ok());
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_fails_after_max_attempts_with_last_error() {
        let mock = Arc::new(FailingProvider::new(10, PlannerError::transport("persistent")));
        let planner = ResilientPlanner::new(mock.clone(), fast(2));

        let result = planner.propose("p", &Value::Null).await;

        assert!(matches!(result, Err(PlannerError::Transport(ref m)) if m == "persistent"));
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_parse_error_is_not_retried() {
        let mock = Arc::new(FailingProvider::new(10, PlannerError::parse("eof")));
        let planner = ResilientPlanner::new(mock.clone(), fast(3));

        let result = planner.propose("p", &Value::Null).await;

        assert!(matches!(result, Err(PlannerError::Parse(_))));
        assert_eq!(mock.calls(), 1);
    }

    #[test]
    fn test_calculate_delay_is_clamped() {
        let config = RetryConfig {
            max_attempts: 5,
            multiplier_ms: 500,
            min_delay_ms: 500,
            max_delay_ms: 4000,
            jitter_factor: 0.0,
        };
        assert_eq!(config.calculate_delay(1), Duration::from_millis(500));
        assert_eq!(config.calculate_delay(2), Duration::from_millis(1000));
        assert_eq!(config.calculate_delay(3), Duration::from_millis(2000));
        assert_eq!(config.calculate_delay(4), Duration::from_millis(4000));
        assert_eq!(config.calculate_delay(10), Duration::from_millis(4000));
    }

    #[test]
    fn test_first_retry_waits_one_multiplier() {
        let openai = RetryConfig::openai();
        for _ in 0..200 {
            let delay = openai.calculate_delay(1);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(550));
        }
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        for config in [
            RetryConfig::openai(),
            RetryConfig::anthropic(),
            RetryConfig::batch_submit(5),
        ] {
            for attempt in 1..8 {
                let base = (config.multiplier_ms << (attempt - 1))
                    .clamp(config.min_delay_ms, config.max_delay_ms) as f64;
                for _ in 0..50 {
                    let delay = config.calculate_delay(attempt).as_millis() as u64;
                    assert!(delay >= config.min_delay_ms, "{delay} below min for {config:?}");
                    assert!(delay <= config.max_delay_ms, "{delay} above max for {config:?}");
                    let delay = delay as f64;
                    let spread = base * config.jitter_factor + 1.0;
                    assert!(delay >= base - spread && delay <= base + spread);
                }
            }
        }
    }
}
