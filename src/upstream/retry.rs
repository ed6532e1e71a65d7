use std::future::Future;
use std::time::Duration;
use tokio_retry::RetryIf;

use super::{ChartApiError, ChartApiResult};

/// Bounded exponential backoff: `base_delay * 2^attempt_index`, capped at `max_delay`
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt_index` (0-based)
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt_index).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let policy = *self;
        (0..policy.max_retries).map(move |i| policy.delay_for(i))
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or the
/// policy's retries are spent. The last error is returned on exhaustion.
pub async fn retry_with_backoff<F, Fut, T>(operation: F, policy: &RetryPolicy) -> ChartApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ChartApiResult<T>>,
{
    RetryIf::spawn(policy.delays(), operation, |e: &ChartApiError| {
        if e.is_retryable() {
            tracing::warn!("Retryable upstream error: {}", e);
            true
        } else {
            tracing::error!("Non-retryable upstream error: {}", e);
            false
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_delays_double_from_base() {
        let policy = RetryPolicy {
            max_retries: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        };
        let delays: Vec<_> = policy.delays().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            max_retries: 40,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_for(10), Duration::from_secs(5));
        assert_eq!(policy.delay_for(39), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };
        let start = Instant::now();

        let result = retry_with_backoff(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ChartApiError::from_status(502, "bad gateway", None))
                } else {
                    Ok(n)
                }
            },
            &policy,
        )
        .await;

        assert_eq!(result.expect("eventual success"), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms of backoff
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: ChartApiResult<()> = retry_with_backoff(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ChartApiError::from_status(401, "unauthorized", None))
            },
            &RetryPolicy::default(),
        )
        .await;

        assert!(matches!(result, Err(ChartApiError::Api { status_code: 401, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 2,
            ..RetryPolicy::default()
        };
        let result: ChartApiResult<()> = retry_with_backoff(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(ChartApiError::Api {
                    status_code: 500,
                    message: format!("failure {}", n),
                })
            },
            &policy,
        )
        .await;

        match result {
            Err(ChartApiError::Api { message, .. }) => assert_eq!(message, "failure 2"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
