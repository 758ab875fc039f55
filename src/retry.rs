//! Bounded exponential backoff for rate-limited HTTP calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::RetryPolicy;
use crate::error::{LlmError, LookupError};

/// Errors that can signal a rate limit.
pub trait RateLimitSignal {
    /// `Some(retry_after)` if the call was rejected with HTTP 429.
    fn rate_limit(&self) -> Option<Option<Duration>>;
}

impl RateLimitSignal for LookupError {
    fn rate_limit(&self) -> Option<Option<Duration>> {
        match self {
            Self::RateLimited(after) => Some(*after),
            _ => None,
        }
    }
}

impl RateLimitSignal for LlmError {
    fn rate_limit(&self) -> Option<Option<Duration>> {
        match self {
            Self::RateLimited(after) => Some(*after),
            _ => None,
        }
    }
}

/// Runs `op`, retrying rate-limited failures according to `policy`.
///
/// Other errors are returned immediately. After `max_attempts` the last
/// rate-limit error is returned.
pub async fn with_backoff<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: RateLimitSignal,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let Some(retry_after) = err.rate_limit() else {
                    return Err(err);
                };
                if attempt + 1 >= policy.max_attempts {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt, retry_after);
                warn!(call = what, attempt = attempt + 1, delay = ?delay, "rate limited; backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_retries_rate_limit_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<u32, LookupError> = with_backoff(&fast_policy(3), "test", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(LookupError::RateLimited(None))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), LlmError> = with_backoff(&fast_policy(2), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::RateLimited(Some(Duration::from_millis(1))))
        })
        .await;
        assert!(matches!(result, Err(LlmError::RateLimited(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), LookupError> = with_backoff(&fast_policy(5), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LookupError::Status { status: 500 })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
