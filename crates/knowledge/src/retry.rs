//! Bounded retries with per-attempt timeouts for external calls.

use crate::config::RetryConfig;
use ragbridge_core::{AppError, AppResult};
use std::future::Future;
use std::time::Duration;

/// Retry budget for one external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1`, doubling from the initial backoff.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Run `f` until it succeeds, fails permanently, or the budget is spent.
///
/// Each attempt is bounded by `timeout`; an elapsed attempt counts as a
/// retryable `AppError::Timeout`. Errors for which
/// `AppError::is_retryable` is false are returned immediately.
pub async fn retry_with_timeout<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    op_name: &str,
    mut f: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let outcome = match tokio::time::timeout(timeout, f()).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "{} did not complete within {}ms",
                op_name,
                timeout.as_millis()
            ))),
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(op = op_name, attempt, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let backoff = policy.backoff_for(attempt);
                tracing::warn!(
                    op = op_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Retryable failure, backing off"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) if err.is_retryable() => {
                tracing::error!(op = op_name, attempts = attempt, error = %err, "Retries exhausted");
                return Err(exhausted(err, op_name, attempt));
            }
            Err(err) => return Err(err),
        }
    }
}

/// Keep the error's kind, but record how many attempts were spent.
fn exhausted(err: AppError, op_name: &str, attempts: u32) -> AppError {
    let wrap = |msg: String| format!("{} failed after {} attempts: {}", op_name, attempts, msg);
    match err {
        AppError::RateLimited(msg) => AppError::RateLimited(wrap(msg)),
        AppError::Timeout(msg) => AppError::Timeout(wrap(msg)),
        AppError::ServiceUnavailable(msg) => AppError::ServiceUnavailable(wrap(msg)),
        AppError::Backend(msg) => AppError::Backend(wrap(msg)),
        other => other,
    }
}
