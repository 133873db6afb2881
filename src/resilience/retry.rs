//! Bounded retry with exponential backoff and jitter.

use crate::config::RetryConfig;
use crate::error::{AgentError, Result};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Predicate deciding whether an error is worth another attempt
pub type RetryPredicate = Arc<dyn Fn(&AgentError) -> bool + Send + Sync>;

/// Retry policy configuration.
///
/// `max_attempts` counts every call, the first one included, so a policy with
/// `max_attempts = 1` never retries.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the computed delay applied as random jitter (0.0 - 1.0)
    pub jitter: f64,
    retryable: RetryPredicate,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            jitter: config.jitter.clamp(0.0, 1.0),
            retryable: Arc::new(AgentError::is_retryable),
        }
    }

    /// A policy that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Replace the retryable-error classification
    pub fn with_retryable<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&AgentError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    pub fn is_retryable(&self, error: &AgentError) -> bool {
        (self.retryable)(error)
    }

    /// Delay before retry number `retry` (1 for the first retry).
    pub fn delay_for_retry(&self, retry: usize) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as usize) as i32;
        let base = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let delay = if self.jitter > 0.0 {
            let spread = capped * self.jitter * rand::thread_rng().gen_range(-1.0..=1.0);
            (capped + spread).clamp(0.0, self.max_delay.as_secs_f64())
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_observed(operation, |_, _, _| {}).await
    }

    /// Like [`execute`](Self::execute), calling `on_retry(attempt, error, delay)`
    /// before sleeping ahead of each retry.
    ///
    /// The operation receives the 1-based attempt number.
    pub async fn execute_observed<F, Fut, T, O>(&self, mut operation: F, mut on_retry: O) -> Result<T>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T>>,
        O: FnMut(usize, &AgentError, Duration),
    {
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !self.is_retryable(&error) {
                        debug!(attempt, error = %error, "Non-retryable error");
                        return Err(error);
                    }

                    if attempt >= self.max_attempts {
                        warn!(attempts = attempt, error = %error, "Retries exhausted");
                        return Err(AgentError::RetriesExhausted {
                            attempts: attempt,
                            last: Box::new(error),
                        });
                    }

                    let delay = self.delay_for_retry(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "Retrying");
                    on_retry(attempt, &error, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_delays(Duration::from_millis(10), Duration::from_millis(100))
            .with_jitter(0.0)
    }

    #[test]
    fn test_delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy::default()
            .with_delays(Duration::from_millis(100), Duration::from_millis(1000))
            .with_jitter(0.0);

        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_retry(10), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::default()
            .with_delays(Duration::from_millis(100), Duration::from_secs(10))
            .with_jitter(0.5);

        for _ in 0..100 {
            let delay = policy.delay_for_retry(1);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let policy = fast_policy(3);

        let result = policy
            .execute(|_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(AgentError::TimeoutError("slow".into()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_never_exceed_max() {
        for max_attempts in 1..=5 {
            let calls = AtomicUsize::new(0);
            let policy = fast_policy(max_attempts);

            let result: Result<()> = policy
                .execute(|_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(AgentError::RateLimited("429".into())) }
                })
                .await;

            assert_eq!(calls.load(Ordering::SeqCst), max_attempts);
            match result {
                Err(AgentError::RetriesExhausted { attempts, .. }) => {
                    assert_eq!(attempts, max_attempts)
                }
                other => panic!("Expected RetriesExhausted, got {:?}", other),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returns_immediately() {
        let calls = AtomicUsize::new(0);
        let policy = fast_policy(5);

        let result: Result<()> = policy
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(AgentError::ApiError {
                        status: Some(401),
                        message: "unauthorized".into(),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(AgentError::ApiError { status: Some(401), .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_retryable_predicate() {
        let calls = AtomicUsize::new(0);
        let policy =
            fast_policy(3).with_retryable(|e| matches!(e, AgentError::ToolError(_)));

        let result: Result<()> = policy
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AgentError::ToolError("flaky".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_each_retry() {
        let mut observed = Vec::new();
        let policy = fast_policy(3);

        let _: Result<()> = policy
            .execute_observed(
                |_| async { Err(AgentError::TimeoutError("t".into())) },
                |attempt, _, delay| observed.push((attempt, delay)),
            )
            .await;

        assert_eq!(
            observed,
            vec![(1, Duration::from_millis(10)), (2, Duration::from_millis(20))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_receives_attempt_number() {
        let mut seen = Vec::new();
        let policy = fast_policy(3);

        let _: Result<()> = policy
            .execute(|attempt| {
                seen.push(attempt);
                async { Err(AgentError::TimeoutError("t".into())) }
            })
            .await;

        assert_eq!(seen, vec![1, 2, 3]);
    }
}
