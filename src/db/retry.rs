use crate::errors::ServiceError;
use metrics::counter;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Factor to multiply delay by after each attempt
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// `retries` conflict replays on top of the first attempt.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_attempts: retries + 1,
            ..Default::default()
        }
    }
}

/// Retry policy for determining if an error is retryable
pub trait RetryPolicy<E> {
    fn is_retryable(&self, error: &E) -> bool;
}

/// Replays transactions aborted by a write conflict and nothing else.
pub struct ConflictRetryPolicy;

impl RetryPolicy<ServiceError> for ConflictRetryPolicy {
    fn is_retryable(&self, error: &ServiceError) -> bool {
        error.is_transient_conflict()
    }
}

/// Execute an async function with retries
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    policy: impl RetryPolicy<E>,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!("Operation succeeded after {} attempts", attempts);
                }
                return Ok(result);
            }
            Err(error) => {
                if attempts >= config.max_attempts || !policy.is_retryable(&error) {
                    if attempts > 1 {
                        warn!("Operation failed after {} attempts: {}", attempts, error);
                    }
                    return Err(error);
                }

                warn!(
                    "Attempt {} failed: {}. Retrying in {:?}...",
                    attempts, error, delay
                );
                counter!("resto_db.tx_retries", 1);

                sleep(delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_factor)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

/// Runs one whole transaction body under [`ConflictRetryPolicy`].
///
/// The closure must open and commit its own transaction so every replay
/// starts from fresh reads.
pub async fn with_tx_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    with_retry(config, ConflictRetryPolicy, operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_factor: 2.0,
        }
    }

    #[tokio::test]
    async fn conflicts_are_replayed_until_success() {
        let calls = &AtomicU32::new(0);
        let result = with_tx_retry(&fast_config(4), move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(ServiceError::ConcurrentModification(Uuid::nil()))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_the_last_error() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_tx_retry(&fast_config(3), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::DatabaseError(sea_orm::DbErr::Custom(
                "database is locked".to_string(),
            )))
        })
        .await;

        assert!(matches!(result, Err(ServiceError::DatabaseError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_conflict_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_tx_retry(&fast_config(5), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::NotFound("order".into()))
        })
        .await;

        assert!(matches!(result, Err(ServiceError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn with_retries_counts_the_first_attempt() {
        assert_eq!(RetryConfig::with_retries(3).max_attempts, 4);
        assert_eq!(RetryConfig::with_retries(0).max_attempts, 1);
    }
}
