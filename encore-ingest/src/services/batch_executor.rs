//! Rate-limited batch execution of external calls
//!
//! Work items run in batches of at most `concurrency` concurrent calls, with
//! a fixed pause between batches. Every call is retried under the shared
//! [`RetryPolicy`]. This is the pipeline's only backpressure mechanism.

use encore_common::config::PipelineSettings;
use futures::future::join_all;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::utils::{RetryPolicy, Retryable};

#[derive(Debug, Clone)]
pub struct BatchExecutor {
    concurrency: usize,
    batch_delay: Duration,
    retry: RetryPolicy,
}

impl BatchExecutor {
    pub fn new(concurrency: usize, batch_delay: Duration, retry: RetryPolicy) -> Self {
        Self {
            concurrency: concurrency.max(1),
            batch_delay,
            retry,
        }
    }

    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::new(
            settings.batch_concurrency,
            settings.batch_delay(),
            RetryPolicy::from_settings(settings),
        )
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn batch_delay(&self) -> Duration {
        self.batch_delay
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Inter-batch delay
    pub async fn pause(&self) {
        if !self.batch_delay.is_zero() {
            tokio::time::sleep(self.batch_delay).await;
        }
    }

    /// Single call with retry
    pub async fn call<T, E, F, Fut>(&self, label: &str, operation: F) -> Result<T, E>
    where
        E: Retryable + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.retry.run(label, operation).await
    }

    /// Run one batch concurrently; results are in input order
    ///
    /// `items` longer than the concurrency limit are split into sequential
    /// sub-batches separated by the inter-batch delay.
    pub async fn run_batch<'a, I, T, E, F, Fut>(
        &self,
        label: &str,
        items: &'a [I],
        operation: F,
    ) -> Vec<Result<T, E>>
    where
        E: Retryable + Display,
        F: Fn(&'a I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut results = Vec::with_capacity(items.len());

        for (index, chunk) in items.chunks(self.concurrency).enumerate() {
            if index > 0 {
                self.pause().await;
            }

            tracing::debug!(operation = label, batch = index, size = chunk.len(), "Running batch");

            let calls = chunk
                .iter()
                .map(|item| self.retry.run(label, || operation(item)));
            results.extend(join_all(calls).await);
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    #[derive(Debug)]
    struct Flaky;

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("flaky")
        }
    }

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            true
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            ..RetryPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let executor = BatchExecutor::new(3, Duration::ZERO, fast_retry(1));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let items: Vec<u32> = (0..10).collect();

        let results = executor
            .run_batch("test", &items, |item| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                let item = *item;
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<u32, Flaky>(item * 2)
                }
            })
            .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
        let values: Vec<u32> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, items.iter().map(|i| i * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_calls_may_borrow_items() {
        let executor = BatchExecutor::new(2, Duration::ZERO, fast_retry(1));
        let ids = vec!["A1".to_string(), "A22".to_string(), "A333".to_string()];

        let results = executor
            .run_batch("test", &ids, |id| async move { Ok::<&str, Flaky>(id.as_str()) })
            .await;

        let echoed: Vec<&str> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(echoed, ["A1", "A22", "A333"]);
    }

    #[tokio::test]
    async fn test_pause_between_batches() {
        let executor = BatchExecutor::new(2, Duration::from_millis(20), fast_retry(1));
        let items = [1, 2, 3, 4, 5];
        let start = Instant::now();

        executor
            .run_batch("test", &items, |_| async { Ok::<(), Flaky>(()) })
            .await;

        // Three batches, two pauses
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_item_failures_are_independent() {
        let executor = BatchExecutor::new(3, Duration::ZERO, fast_retry(3));
        let attempts = Arc::new(Mutex::new(Vec::new()));

        let results = executor
            .run_batch("test", &[1, 2, 3], |item| {
                let attempts = attempts.clone();
                let item = *item;
                async move {
                    attempts.lock().unwrap().push(item);
                    if item == 2 {
                        Err(Flaky)
                    } else {
                        Ok(item)
                    }
                }
            })
            .await;

        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
        // Failing item was attempted max_attempts times, others once
        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.iter().filter(|i| **i == 2).count(), 3);
        assert_eq!(attempts.iter().filter(|i| **i == 1).count(), 1);
    }

    #[tokio::test]
    async fn test_call_retries_until_success() {
        let executor = BatchExecutor::new(1, Duration::ZERO, fast_retry(4));
        let calls = AtomicUsize::new(0);

        let value = executor
            .call("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err(Flaky) } else { Ok(n) } }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
    }
}
