//! Bounded retry with exponential backoff around single completion calls.
//!
//! Retries are orthogonal to the review budget: a call that is retried still
//! counts as one stage invocation.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::llm::CompletionError;

/// Retry policy for one completion call.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Extra attempts after the first one (0 = fail fast).
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
    /// Deadline for each individual attempt.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
            attempt_timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (1-based). Attempt 0 never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32 - 1);
        let capped = base.min(self.max_delay.as_millis() as f64);
        let delay = if self.jitter {
            capped * (1.0 + rand::thread_rng().gen_range(0.0..0.25))
        } else {
            capped
        };
        Duration::from_millis(delay as u64)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempts run out. Returns the last error in the failure case.
pub async fn retry_async<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, CompletionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CompletionError>>,
{
    let mut attempt = 0u32;
    loop {
        let result = match config.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, op()).await {
                Ok(r) => r,
                Err(_) => Err(CompletionError::Timeout(limit)),
            },
            None => op().await,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;
                let mut delay = config.delay_for_attempt(attempt);
                if let CompletionError::RateLimited {
                    retry_after: Some(secs),
                } = e
                {
                    delay = delay.max(Duration::from_secs(secs).min(config.max_delay));
                }
                tracing::warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "Completion failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 2.0,
            jitter: false,
            attempt_timeout: None,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let cfg = RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            jitter: false,
            ..Default::default()
        };
        assert_eq!(cfg.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(cfg.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(cfg.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(cfg.delay_for_attempt(3), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_quarter() {
        let cfg = RetryConfig {
            initial_delay: Duration::from_millis(1000),
            ..Default::default()
        };
        for _ in 0..50 {
            let d = cfg.delay_for_attempt(1).as_millis();
            assert!((1000..=1250).contains(&d), "delay {d} out of range");
        }
    }

    #[tokio::test]
    async fn recovers_from_transient_failures() {
        let calls = &AtomicU32::new(0);
        let out = retry_async(&fast(3), || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CompletionError::Transport("connection reset".into()))
            } else {
                Ok("done")
            }
        })
        .await
        .unwrap();
        assert_eq!(out, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = &AtomicU32::new(0);
        let err = retry_async(&fast(2), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(CompletionError::Http {
                status: 503,
                body: "busy".into(),
            })
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CompletionError::Http { status: 503, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_after_is_capped_by_max_delay() {
        let cfg = RetryConfig {
            max_delay: Duration::from_millis(10),
            ..fast(1)
        };
        let calls = &AtomicU32::new(0);
        let out = tokio::time::timeout(
            Duration::from_secs(2),
            retry_async(&cfg, || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(CompletionError::RateLimited {
                        retry_after: Some(3600),
                    })
                } else {
                    Ok("done")
                }
            }),
        )
        .await
        .expect("server retry-after must not outlast max_delay")
        .unwrap();
        assert_eq!(out, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_auth_failures() {
        let calls = &AtomicU32::new(0);
        let err = retry_async(&fast(5), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(CompletionError::Auth("invalid x-api-key".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CompletionError::Auth(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_attempt_times_out() {
        let cfg = RetryConfig {
            attempt_timeout: Some(Duration::from_millis(20)),
            ..fast(0)
        };
        let err = retry_async(&cfg, || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, CompletionError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CompletionError::Timeout(_)));
    }
}
