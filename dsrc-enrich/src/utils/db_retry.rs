//! SQLite lock retry
//!
//! Writes that hit "database is locked" are retried with doubling sleeps
//! (10 ms up to 1 s) until `database.max_lock_wait_ms` has passed. Any
//! other error returns at once.

use crate::error::{EnrichError, EnrichResult};
use std::time::{Duration, Instant};

const FIRST_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Run `operation`, retrying lock errors for at most `max_wait_ms`.
/// When the window closes the last lock error is returned.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> EnrichResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = EnrichResult<T>>,
{
    let started = Instant::now();
    let window = Duration::from_millis(max_wait_ms);
    let mut backoff = FIRST_BACKOFF;
    let mut attempt = 1u32;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        waited_ms = started.elapsed().as_millis(),
                        "Database write went through after lock retries"
                    );
                }
                return Ok(value);
            }
            Err(err) if is_lock_error(&err) => err,
            Err(err) => return Err(err),
        };

        let waited = started.elapsed();
        if waited >= window {
            tracing::error!(
                operation = operation_name,
                attempt,
                waited_ms = waited.as_millis(),
                max_wait_ms,
                "Database still locked, giving up"
            );
            return Err(err);
        }

        tracing::warn!(
            operation = operation_name,
            attempt,
            backoff_ms = backoff.as_millis(),
            "Database locked, retrying"
        );
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
        attempt += 1;
    }
}

fn is_lock_error(err: &EnrichError) -> bool {
    match err {
        EnrichError::Common(common) => common.is_lock_error(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locked() -> EnrichError {
        EnrichError::from(sqlx::Error::Protocol("database is locked".to_string()))
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let result = retry_on_lock("test_op", 5000, || async { Ok::<i32, EnrichError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_lock_errors() {
        let mut attempts = 0;

        let result = retry_on_lock("test_op", 5000, || {
            attempts += 1;
            let current = attempts;
            async move {
                if current < 3 {
                    Err(locked())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_wait() {
        let start = Instant::now();
        let result = retry_on_lock("test_op", 50, || async { Err::<i32, EnrichError>(locked()) }).await;

        assert!(matches!(result, Err(EnrichError::Common(_))));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_non_lock_error_fails_immediately() {
        let mut attempts = 0;

        let result = retry_on_lock("test_op", 5000, || {
            attempts += 1;
            async move { Err::<i32, EnrichError>(EnrichError::InvalidInput("other error".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
