//! Per-attempt timeout and exponential backoff for provider calls

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

use crate::config::RetryConfig;
use crate::error::{ProviderError, ProviderResult};

/// Retry policy for one provider role
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    attempt_timeout: Duration,
}

/// Outcome of a retried call, with the number of attempts made
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: ProviderResult<T>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            attempt_timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Backoff before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails structurally or exhausts the retries.
    ///
    /// Each attempt is bounded by the attempt timeout; a timeout counts as a
    /// transient failure.
    pub async fn run<F, Fut, T>(&self, provider: &str, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut attempt = 0;
        loop {
            let started = Instant::now();
            let result = match timeout(self.attempt_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout {
                    provider: provider.to_string(),
                    elapsed: started.elapsed(),
                }),
            };

            match result {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt + 1,
                    }
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}, retrying in {:?}",
                        provider,
                        attempt + 1,
                        self.max_attempts(),
                        e,
                        delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return RetryOutcome {
                        result: Err(e),
                        attempts: attempt + 1,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(&RetryConfig {
            max_retries,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            timeout_ms: 500,
        })
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let p = policy(5);
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(2), Duration::from_millis(400));
        assert_eq!(p.delay_for(5), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let outcome = policy(2)
            .run("mock", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ProviderError::unavailable("mock", "flaky"))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(outcome.result.unwrap(), 7);
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_structural_error_not_retried() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = policy(2)
            .run("mock", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::rejected("mock", "bad request"))
            })
            .await;
        assert!(outcome.result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_failure() {
        let started = Instant::now();
        let outcome: RetryOutcome<()> = policy(1)
            .run("slow", || async {
                sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(outcome.result, Err(ProviderError::Timeout { .. })));
        assert_eq!(outcome.attempts, 2);
        // two timeouts plus one backoff
        assert!(started.elapsed() >= Duration::from_millis(1_100));
        assert!(started.elapsed() < Duration::from_secs(60));
    }
}
