//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failure is worth retrying
//! - Execute retries with exponential backoff + jitter
//! - Surface the last error, annotated with the attempt count, on exhaustion
//!
//! # Design Decisions
//! - Only transient errors are retried; everything else propagates unchanged
//! - A backend `Retry-After` replaces the computed backoff for that attempt,
//!   but never beyond `max_delay`; a longer request surfaces the error
//! - Jittered backoff prevents synchronized retry storms across clients

use std::future::Future;
use std::time::Duration;

use crate::client::types::{ClientError, ClientResult};
use crate::config::schema::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::backoff_delay;

/// Retry bounds for one logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Delay before retry `retry` (0-based) after `error`. `None` when the
    /// backend asked for a longer wait than `max_delay` allows.
    pub fn delay_after(&self, retry: u32, error: &ClientError) -> Option<Duration> {
        match error.retry_after() {
            Some(requested) if requested > self.max_delay => None,
            Some(requested) => Some(requested),
            None => Some(backoff_delay(retry, self.base_delay, self.max_delay)),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Ephemeral record of one failed attempt, used to schedule the next.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt_number: u32,
    /// Delay waited before this attempt.
    pub delay_before_attempt: Duration,
    /// Failure of the previous attempt; `None` for the first.
    pub error: Option<ClientError>,
}

#[derive(Debug, Clone, Default)]
pub struct RetryCoordinator {
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails permanently, or the retry
    /// budget is spent. The closure receives the 1-based attempt number.
    pub async fn execute_with_retry<T, F, Fut>(&self, name: &str, mut operation: F) -> ClientResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let mut attempt = RetryAttempt {
            attempt_number: 1,
            delay_before_attempt: Duration::ZERO,
            error: None,
        };

        loop {
            let error = match operation(attempt.attempt_number).await {
                Ok(value) => {
                    if attempt.attempt_number > 1 {
                        tracing::info!(
                            operation = name,
                            attempts = attempt.attempt_number,
                            "Succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_transient() {
                return Err(error);
            }

            let retries_used = attempt.attempt_number - 1;
            if retries_used >= self.policy.max_retries {
                tracing::warn!(
                    operation = name,
                    attempts = attempt.attempt_number,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(ClientError::MaxRetriesExceeded {
                    attempts: attempt.attempt_number,
                    last: Box::new(error),
                });
            }

            let Some(delay) = self.policy.delay_after(retries_used, &error) else {
                tracing::warn!(
                    operation = name,
                    attempts = attempt.attempt_number,
                    max_delay_ms = self.policy.max_delay.as_millis() as u64,
                    error = %error,
                    "Backend retry delay exceeds bound, not retrying"
                );
                return Err(error);
            };
            tracing::debug!(
                operation = name,
                attempt = attempt.attempt_number,
                previous_delay_ms = attempt.delay_before_attempt.as_millis() as u64,
                previous_error = attempt.error.as_ref().map(ClientError::kind),
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, retrying"
            );
            metrics::record_retry(name, error.kind());

            tokio::time::sleep(delay).await;
            attempt = RetryAttempt {
                attempt_number: attempt.attempt_number + 1,
                delay_before_attempt: delay,
                error: Some(error),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn coordinator(max_retries: u32) -> RetryCoordinator {
        RetryCoordinator::new(RetryPolicy::new(
            max_retries,
            Duration::from_secs(1),
            Duration::from_secs(30),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let retry = coordinator(3);
        let start = Instant::now();
        let result = retry
            .execute_with_retry("translate", |attempt| async move {
                if attempt < 3 {
                    Err(ClientError::ServiceUnavailable { status: 503 })
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(result, Ok(3));
        // 1s + 2s, each within ±10%.
        let waited = start.elapsed().as_secs_f64();
        assert!((2.7..=3.3).contains(&waited), "{waited}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let retry = coordinator(2);
        let result: ClientResult<()> = retry
            .execute_with_retry("translate", |attempt| async move {
                Err(ClientError::Network(format!("reset on attempt {attempt}")))
            })
            .await;
        assert_eq!(
            result,
            Err(ClientError::MaxRetriesExceeded {
                attempts: 3,
                last: Box::new(ClientError::Network("reset on attempt 3".into())),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_not_retried() {
        let retry = coordinator(5);
        let calls = Mutex::new(0);
        let result: ClientResult<()> = retry
            .execute_with_retry("translate", |_| {
                *calls.lock().unwrap() += 1;
                async { Err(ClientError::Unauthenticated) }
            })
            .await;
        assert_eq!(result, Err(ClientError::Unauthenticated));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_honors_retry_after() {
        let retry = coordinator(1);
        let start = Instant::now();
        let result = retry
            .execute_with_retry("translate", |attempt| async move {
                if attempt == 1 {
                    Err(ClientError::RateLimited {
                        retry_after: Some(Duration::from_secs(7)),
                    })
                } else {
                    Ok(())
                }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_beyond_max_delay_is_surfaced() {
        let retry = coordinator(3);
        let start = Instant::now();
        let calls = Mutex::new(0);
        let result: ClientResult<()> = retry
            .execute_with_retry("translate", |_| {
                *calls.lock().unwrap() += 1;
                async {
                    Err(ClientError::RateLimited {
                        retry_after: Some(Duration::from_secs(86_400)),
                    })
                }
            })
            .await;
        assert_eq!(
            result,
            Err(ClientError::RateLimited {
                retry_after: Some(Duration::from_secs(86_400)),
            })
        );
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_delay_after_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30));
        let limited = |secs| ClientError::RateLimited {
            retry_after: Some(Duration::from_secs(secs)),
        };
        assert_eq!(policy.delay_after(0, &limited(30)), Some(Duration::from_secs(30)));
        assert_eq!(policy.delay_after(0, &limited(31)), None);
        let backoff = policy
            .delay_after(5, &ClientError::ServiceUnavailable { status: 503 })
            .unwrap();
        assert!(backoff <= Duration::from_secs(33));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries() {
        let retry = coordinator(0);
        let result: ClientResult<()> = retry
            .execute_with_retry("tts", |_| async { Err(ClientError::Timeout(Duration::from_secs(5))) })
            .await;
        assert!(matches!(
            result,
            Err(ClientError::MaxRetriesExceeded { attempts: 1, .. })
        ));
    }
}
