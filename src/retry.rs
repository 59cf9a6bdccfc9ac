//! Throttling-aware retry for Graph calls.
//!
//! Only throttling-class responses (429, 503, 504) are retried. The delay
//! before the next attempt is the server's `Retry-After` hint when present,
//! otherwise the policy default, and it is always raced against a
//! cancellation token.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// MARK: - Constants

/// Default number of attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Delay used when a throttling response carries no `Retry-After`.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Upper bound applied to server-supplied delays.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

/// HTTP statuses treated as throttling signals.
pub const THROTTLE_STATUSES: [u16; 3] = [429, 503, 504];

// MARK: - Classification

/// A throttling signal extracted from a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleHint {
    pub status: u16,
    pub retry_after: Option<Duration>,
}

/// Errors that can tell the orchestrator whether they are worth retrying.
pub trait Retryable {
    /// `Some` for throttling-class failures, `None` for everything else.
    fn throttle_hint(&self) -> Option<ThrottleHint>;
}

/// Outcome of a retried operation that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("{0}")]
    Fatal(E),

    #[error("retry cancelled")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// The underlying error, if the operation produced one.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::Fatal(e) => Some(e),
            Self::Cancelled => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

impl From<RetryError<crate::GraphError>> for crate::GraphError {
    fn from(err: RetryError<crate::GraphError>) -> Self {
        err.into_inner().unwrap_or(crate::GraphError::Cancelled)
    }
}

// MARK: - Retry Policy

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first.
    pub max_attempts: u32,
    /// Delay when the server gives no hint.
    pub default_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            default_delay: DEFAULT_RETRY_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before the next attempt for a given throttling hint.
    pub fn delay_for(&self, hint: &ThrottleHint) -> Duration {
        hint.retry_after
            .unwrap_or(self.default_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&crate::config::RetryConfig> for RetryPolicy {
    fn from(config: &crate::config::RetryConfig) -> Self {
        Self::new()
            .with_max_attempts(config.max_attempts)
            .with_default_delay(Duration::from_secs(config.default_delay_secs))
            .with_max_delay(Duration::from_secs(config.max_delay_secs))
    }
}

// MARK: - Retry Executor

/// Run `operation` until it succeeds, fails non-retryably, exhausts the
/// attempt budget, or `cancel` fires.
///
/// The closure receives the 1-based attempt number.
pub async fn execute_with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;

        let error = match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(attempt, "Request succeeded after retry");
                }
                return Ok(result);
            }
            Err(error) => error,
        };

        let Some(hint) = error.throttle_hint() else {
            debug!(attempt, error = %error, "Request failed with non-retryable error");
            return Err(RetryError::Fatal(error));
        };

        if attempt >= policy.max_attempts {
            warn!(
                attempt,
                max_attempts = policy.max_attempts,
                status = hint.status,
                error = %error,
                "Max attempts exceeded"
            );
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: error,
            });
        }

        let delay = policy.delay_for(&hint);
        warn!(
            attempt,
            status = hint.status,
            delay_ms = delay.as_millis() as u64,
            server_hint = hint.retry_after.is_some(),
            "Request throttled, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(attempt, "Retry delay cancelled");
                return Err(RetryError::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

// MARK: - Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GraphError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn throttled(secs: Option<u64>) -> GraphError {
        GraphError::Throttled {
            status: 429,
            retry_after: secs.map(Duration::from_secs),
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::new();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.default_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, DEFAULT_MAX_DELAY);
    }

    #[test]
    fn test_delay_prefers_server_hint() {
        let policy = RetryPolicy::new();
        let hint = ThrottleHint {
            status: 429,
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(policy.delay_for(&hint), Duration::from_secs(3));

        let no_hint = ThrottleHint {
            status: 503,
            retry_after: None,
        };
        assert_eq!(policy.delay_for(&no_hint), Duration::from_secs(1));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new().with_max_delay(Duration::from_secs(10));
        let hint = ThrottleHint {
            status: 429,
            retry_after: Some(Duration::from_secs(3600)),
        };
        assert_eq!(policy.delay_for(&hint), Duration::from_secs(10));
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        assert_eq!(RetryPolicy::new().with_max_attempts(0).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_honours_retry_after_between_attempts() {
        let policy = RetryPolicy::new();
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let stamps = Arc::new(std::sync::Mutex::new(Vec::new()));

        let seen = stamps.clone();
        let result = execute_with_retry(&policy, &cancel, |attempt| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(start.elapsed());
                if attempt < 3 {
                    Err(throttled(Some(3)))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps.len(), 3);
        assert!(stamps[1] - stamps[0] >= Duration::from_secs(3));
        assert!(stamps[2] - stamps[1] >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_delay_without_hint() {
        let policy = RetryPolicy::new();
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let result = execute_with_retry(&policy, &cancel, |attempt| async move {
            if attempt == 1 {
                Err(throttled(None))
            } else {
                Ok(())
            }
        })
        .await;

        assert!(result.is_ok());
        assert!(start.elapsed() >= DEFAULT_RETRY_DELAY);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_after_one_attempt() {
        let policy = RetryPolicy::new();
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result: Result<(), _> = execute_with_retry(&policy, &cancel, |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(GraphError::Api {
                    status: 401,
                    message: "InvalidAuthenticationToken".into(),
                })
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(RetryError::Fatal(GraphError::Api { status: 401, .. }))
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_max_attempts() {
        let policy = RetryPolicy::new();
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result: Result<(), _> = execute_with_retry(&policy, &cancel, |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(GraphError::Throttled {
                    status: 503,
                    retry_after: None,
                })
            }
        })
        .await;

        match result {
            Err(RetryError::Exhausted { attempts: n, last }) => {
                assert_eq!(n, 5);
                assert!(matches!(last, GraphError::Throttled { status: 503, .. }));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delay() {
        let policy = RetryPolicy::new();
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let counter = attempts.clone();
        let result: Result<(), _> = execute_with_retry(&policy, &cancel, |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(throttled(Some(60)))
            }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_never_runs() {
        let policy = RetryPolicy::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), RetryError<GraphError>> =
            execute_with_retry(&policy, &cancel, |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(RetryError::Cancelled)));
    }

    #[test]
    fn test_retry_error_into_graph_error() {
        let err: GraphError = RetryError::Fatal(GraphError::NotConnected).into();
        assert!(matches!(err, GraphError::NotConnected));

        let err: GraphError = RetryError::<GraphError>::Cancelled.into();
        assert!(matches!(err, GraphError::Cancelled));
    }
}
