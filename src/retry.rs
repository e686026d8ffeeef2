use crate::config::StockConfig;
use crate::errors::ServiceError;
use metrics::counter;
use rand::Rng;
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
            max_attempts: 6,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(250),
            backoff_factor: 2.0,
        }
    }
}

impl From<&StockConfig> for RetryConfig {
    fn from(cfg: &StockConfig) -> Self {
        Self {
            max_attempts: cfg.max_write_retries.saturating_add(1),
            ..Default::default()
        }
    }
}

/// Retry policy for determining if an error is retryable
pub trait RetryPolicy<E> {
    fn is_retryable(&self, error: &E) -> bool;
}

/// Re-runs a unit of work that lost a check-and-set race, collided on a
/// unique index or ran into lock contention.
pub struct WriteConflictPolicy;

impl RetryPolicy<ServiceError> for WriteConflictPolicy {
    fn is_retryable(&self, error: &ServiceError) -> bool {
        error.is_retryable()
    }
}

/// Execute an async function with retries
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &'static str,
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
                    debug!(
                        operation = operation_name,
                        "Operation succeeded after {} attempts", attempts
                    );
                }
                return Ok(result);
            }
            Err(error) => {
                if attempts >= config.max_attempts || !policy.is_retryable(&error) {
                    if attempts > 1 {
                        warn!(
                            operation = operation_name,
                            "Operation failed after {} attempts: {}", attempts, error
                        );
                    }
                    return Err(error);
                }

                counter!("stock_ledger.write_retries", 1, "operation" => operation_name);
                debug!(
                    operation = operation_name,
                    "Attempt {} failed: {}. Retrying in {:?}", attempts, error, delay
                );

                sleep(jittered(delay)).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_factor)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

/// Scales `delay` into `[delay / 2, delay]` so contending writers wake at
/// different times.
fn jittered(delay: Duration) -> Duration {
    delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
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
    async fn lost_races_are_retried_until_success() {
        let attempts_seen = AtomicU32::new(0);
        let calls = &attempts_seen;
        let result = with_retry(&fast_config(5), "test", WriteConflictPolicy, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ServiceError::ConcurrentModification(Uuid::nil()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts_seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn business_errors_are_not_retried() {
        let attempts_seen = AtomicU32::new(0);
        let calls = &attempts_seen;
        let result: Result<(), _> =
            with_retry(&fast_config(5), "test", WriteConflictPolicy, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::NotFound("reservation".into()))
            })
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
        assert_eq!(attempts_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let attempts_seen = AtomicU32::new(0);
        let calls = &attempts_seen;
        let result: Result<(), _> =
            with_retry(&fast_config(3), "test", WriteConflictPolicy, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::ConcurrentModification(Uuid::nil()))
            })
            .await;
        assert!(matches!(
            result,
            Err(ServiceError::ConcurrentModification(_))
        ));
        assert_eq!(attempts_seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn jitter_stays_within_half_to_full_delay() {
        let delay = Duration::from_millis(40);
        for _ in 0..100 {
            let slept = jittered(delay);
            assert!(slept >= delay / 2 && slept <= delay, "{:?}", slept);
        }
    }

    #[test]
    fn retries_map_to_attempts() {
        let cfg = StockConfig {
            max_write_retries: 4,
            ..Default::default()
        };
        assert_eq!(RetryConfig::from(&cfg).max_attempts, 5);
    }
}
