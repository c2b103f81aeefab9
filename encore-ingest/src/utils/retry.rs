//! Bounded retry with exponential backoff
//!
//! One policy type serves every retry site: external catalog calls (via the
//! batch executor) and writes that hit SQLite lock contention.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use encore_common::config::PipelineSettings;

/// Errors that know whether another attempt may succeed
pub trait Retryable {
    /// Transient failure (rate limit, 5xx, network, lock contention)
    fn is_retryable(&self) -> bool;

    /// Server-provided minimum wait before the next attempt
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for encore_common::Error {
    fn is_retryable(&self) -> bool {
        self.is_lock_contention()
    }
}

/// Retry policy: attempt cap, exponential backoff, optional time budget
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Stop retrying once this much time has elapsed
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            multiplier: 2.0,
            max_elapsed: None,
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            ..Self::default()
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` (1-based) just failed
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Run `operation` until it succeeds, fails permanently, or the policy is exhausted
    ///
    /// Returns the last error when giving up.
    pub async fn run<T, E, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T, E>
    where
        E: Retryable + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let start_time = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms = start_time.elapsed().as_millis() as u64,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if !err.is_retryable() {
                        return Err(err);
                    }

                    let elapsed = start_time.elapsed();
                    let over_budget = self.max_elapsed.is_some_and(|budget| elapsed >= budget);

                    if attempt >= self.max_attempts || over_budget {
                        tracing::warn!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms = elapsed.as_millis() as u64,
                            error = %err,
                            "Retries exhausted"
                        );
                        return Err(err);
                    }

                    let mut delay = self.backoff_for(attempt);
                    if let Some(hint) = err.retry_after() {
                        delay = delay.max(hint.min(self.max_backoff));
                    }
                    if let Some(budget) = self.max_elapsed {
                        delay = delay.min(budget.saturating_sub(elapsed));
                    }

                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, will retry after backoff"
                    );

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Retry a database operation on lock contention until `max_wait_ms` elapses
///
/// Backoff starts at 10ms and doubles up to 1000ms. Non-lock errors fail
/// immediately.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    operation: F,
) -> encore_common::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = encore_common::Result<T>>,
{
    let policy = RetryPolicy {
        max_attempts: u32::MAX,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(1000),
        multiplier: 2.0,
        max_elapsed: Some(Duration::from_millis(max_wait_ms)),
    };

    policy.run(operation_name, operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError {
        transient: bool,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (transient={})", self.transient)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.transient
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_for(30), Duration::from_millis(350));
    }

    #[test]
    fn test_from_settings() {
        let settings = PipelineSettings {
            max_attempts: 6,
            initial_backoff_ms: 250,
            max_backoff_ms: 2000,
            ..PipelineSettings::default()
        };
        let policy = RetryPolicy::from_settings(&settings);
        assert_eq!(policy.max_attempts, 6);
        assert_eq!(policy.initial_backoff, Duration::from_millis(250));
        assert_eq!(policy.max_backoff, Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let result = fast_policy(3)
            .run("test_op", || async { Ok::<i32, TestError>(42) })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = fast_policy(4)
            .run("test_op", || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(TestError { transient: true })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = fast_policy(3)
            .run("test_op", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TestError { transient: true }) }
            })
            .await;

        assert!(result.unwrap_err().transient);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_fails_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = fast_policy(5)
            .run("test_op", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TestError { transient: false }) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_on_lock_non_lock_error_fails_immediately() {
        let mut attempts = 0;

        let result = retry_on_lock("test_op", 5000, || {
            attempts += 1;
            async { Err::<i32, _>(encore_common::Error::Internal("other error".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
