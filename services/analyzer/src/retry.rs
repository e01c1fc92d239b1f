//! services/analyzer/src/retry.rs
//!
//! The retry loop shared by every model call: exponential backoff on
//! retryable port errors, a shared rate limiter, and cancellation.

use std::future::Future;
use std::time::Duration;

use intent_core::{PortError, PortResult};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::rate_limit::RateLimiter;

/// Why a call ended without a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error(transparent)]
    Service(#[from] PortError),
    #[error("cancelled before completion")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the given (1-based) failed attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff.saturating_mul(multiplier)
    }

    pub(crate) fn normalized(self) -> Self {
        Self {
            max_attempts: self.max_attempts.max(1),
            ..self
        }
    }
}

/// Runs `call` until it succeeds, fails with a non-retryable error, runs out of
/// attempts or `cancel` fires. Every attempt takes a slot from `limiter`; a
/// rate-limit error pauses the limiter for the backoff so other callers wait too.
///
/// On failure, returns the number of attempts made and the reason.
pub(crate) async fn retry_port_call<T, F, Fut>(
    policy: RetryPolicy,
    limiter: &RateLimiter,
    cancel: &CancellationToken,
    label: &str,
    mut call: F,
) -> Result<T, (u32, FailureReason)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PortResult<T>>,
{
    let mut attempt = 0_u32;
    loop {
        attempt = attempt.saturating_add(1);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err((attempt - 1, FailureReason::Cancelled));
            }
            outcome = async {
                limiter.acquire().await;
                call().await
            } => outcome,
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() || attempt >= policy.max_attempts {
            error!("{} failed after {} attempt(s): {}", label, attempt, err);
            return Err((attempt, FailureReason::Service(err)));
        }

        let backoff = policy.backoff_for(attempt);
        if matches!(err, PortError::RateLimited(_)) {
            limiter.pause_for(backoff);
        }
        warn!(
            "{} attempt {} failed: {}. Retrying in {:?}",
            label, attempt, err, backoff
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err((attempt, FailureReason::Cancelled));
            }
            _ = sleep(backoff) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_backoff: Duration::from_millis(250),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(250));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(1000));
    }

    #[test]
    fn zero_attempts_means_one() {
        let policy = RetryPolicy {
            max_attempts: 0,
            base_backoff: Duration::from_millis(10),
        };
        assert_eq!(policy.normalized().max_attempts, 1);
    }
}
