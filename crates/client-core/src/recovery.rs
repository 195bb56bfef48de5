//! Retry with bounded exponential backoff
//!
//! Store writes ride a network; transient failures are expected and
//! retried here. Only errors marked recoverable are retried - a
//! validation failure comes back immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Ceiling for the per-attempt delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each attempt
    pub backoff_multiplier: f64,
    /// Randomize each delay by +/-20% to avoid thundering herds
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Quick retries for short store operations
    pub fn quick() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            use_jitter: true,
        }
    }
}

/// Run `operation`, retrying recoverable failures per `config`.
///
/// The final error is returned unchanged once attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    config: RetryConfig,
    mut operation: F,
) -> ClientResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    let mut delay = config.initial_delay;
    // The operation always runs at least once, whatever the config says.
    let max_attempts = config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_recoverable() && attempt < max_attempts => {
                let wait = if config.use_jitter {
                    let factor = rand::thread_rng().gen_range(0.8..1.2);
                    delay.mul_f64(factor)
                } else {
                    delay
                };
                warn!(
                    operation = operation_name,
                    attempt,
                    error = %e,
                    delay_ms = wait.as_millis() as u64,
                    "operation failed, retrying"
                );
                sleep(wait).await;
                delay = delay.mul_f64(config.backoff_multiplier).min(config.max_delay);
            }
            Err(e) => return Err(e),
        }
    }

    unreachable!("loop returns on the final attempt")
}

/// Attach context to an error while preserving its variant where it
/// matters for handling
pub trait ErrorContext<T> {
    fn with_context<F: FnOnce() -> String>(self, context: F) -> ClientResult<T>;
}

impl<T> ErrorContext<T> for ClientResult<T> {
    fn with_context<F: FnOnce() -> String>(self, context: F) -> ClientResult<T> {
        self.map_err(|e| match e {
            // Variants the caller matches on pass through untouched.
            e @ (ClientError::NotFound { .. }
            | ClientError::InvalidHandle { .. }
            | ClientError::UnknownContact { .. }
            | ClientError::StaleCall { .. }
            | ClientError::PermissionDenied
            | ClientError::AlreadyInCall) => e,
            other => ClientError::internal(format!("{}: {}", context(), other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_recoverable_errors_until_success() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            use_jitter: false,
        };

        let result = retry_with_backoff("test_op", config, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ClientError::setup("transient"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn validation_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: ClientResult<()> =
            retry_with_backoff("test_op", RetryConfig::quick(), || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(ClientError::PermissionDenied) }
            })
            .await;

        assert!(matches!(result, Err(ClientError::PermissionDenied)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_returns_the_last_error() {
        let config = RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2.0,
            use_jitter: false,
        };
        let result: ClientResult<()> = retry_with_backoff("test_op", config, || async {
            Err(ClientError::setup("still down"))
        })
        .await;
        assert!(matches!(result, Err(ClientError::CallSetupFailed { .. })));
    }

    #[tokio::test]
    async fn zero_max_attempts_still_runs_once() {
        let config = RetryConfig {
            max_attempts: 0,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2.0,
            use_jitter: false,
        };
        let attempts = AtomicU32::new(0);
        let result: ClientResult<()> = retry_with_backoff("test_op", config, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ClientError::setup("still down")) }
        })
        .await;

        assert!(matches!(result, Err(ClientError::CallSetupFailed { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn context_preserves_matchable_variants() {
        let stale: ClientResult<()> = Err(ClientError::stale_call("c1"));
        let wrapped = stale.with_context(|| "accepting".to_string());
        assert!(matches!(wrapped, Err(ClientError::StaleCall { .. })));

        let setup: ClientResult<()> = Err(ClientError::setup("boom"));
        let wrapped = setup.with_context(|| "accepting".to_string());
        assert!(matches!(wrapped, Err(ClientError::InternalError { .. })));
    }
}
