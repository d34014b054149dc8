//! Bounded retry with exponential backoff
//!
//! Every cluster write runs through [`with_retry`]. Only errors accepted by
//! the policy's `retryable` predicate are retried; anything else is returned
//! as-is on the first failure. Sleeps between attempts observe the caller's
//! cancellation token.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{KubeError, Result};

/// How often and how patiently an operation is retried
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub delay: Duration,

    /// Total attempts, including the first one
    pub attempts: u32,

    /// Factor applied to the delay after each retry
    pub multiplier: f64,

    /// Upper bound for the delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Which errors are worth another attempt
    #[serde(skip, default = "default_retryable")]
    pub retryable: fn(&KubeError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(100),
            attempts: 5,
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            retryable: default_retryable(),
        }
    }
}

fn default_retryable() -> fn(&KubeError) -> bool {
    KubeError::is_transient
}

impl RetryPolicy {
    /// Run once, never retry
    pub fn none() -> Self {
        Self {
            attempts: 1,
            ..Default::default()
        }
    }

    /// Fixed `delay` between up to `attempts` tries
    pub fn fixed(delay: Duration, attempts: u32) -> Self {
        Self {
            delay,
            attempts,
            multiplier: 1.0,
            max_delay: delay,
            ..Default::default()
        }
    }

    pub fn with_retryable(mut self, retryable: fn(&KubeError) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Delay after the given (1-based) failed attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let secs = self.delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Run `operation` until it succeeds, fails terminally or the policy runs out
///
/// An exhausted policy yields [`KubeError::RetriesExhausted`] wrapping the
/// last error.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match cancellable(cancel, operation()).await {
            Ok(value) => return Ok(value),
            Err(KubeError::Cancelled) => return Err(KubeError::Cancelled),
            Err(e) if !(policy.retryable)(&e) => return Err(e),
            Err(e) if attempt >= attempts => {
                tracing::error!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    "operation failed after max retries"
                );
                return Err(KubeError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(e),
                });
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "operation failed, retrying"
                );
                sleep(delay, cancel).await?;
            }
        }
    }
}

/// Await `future` unless `cancel` fires first
pub async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(KubeError::Cancelled),
        result = future => result,
    }
}

/// Sleep for `duration`, returning early with an error on cancellation
pub async fn sleep(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    cancellable(cancel, async {
        tokio::time::sleep(duration).await;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(1), attempts)
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let result = with_retry(&fast(5), &cancel, "op", || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(KubeError::Transient("busy".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let result: Result<()> = with_retry(&fast(5), &cancel, "op", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(KubeError::InvalidConfig("bad".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(KubeError::InvalidConfig(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_budget() {
        let cancel = CancellationToken::new();
        let result: Result<()> = with_retry(&fast(3), &cancel, "op", || async {
            Err(KubeError::Transient("busy".to_string()))
        })
        .await;

        match result {
            Err(KubeError::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(source.is_transient());
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_custom_predicate() {
        let cancel = CancellationToken::new();
        let policy = fast(3).with_retryable(|_| false);
        let result: Result<()> = with_retry(&policy, &cancel, "op", || async {
            Err(KubeError::Transient("busy".to_string()))
        })
        .await;

        assert!(matches!(result, Err(KubeError::Transient(_))));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let policy = RetryPolicy::fixed(Duration::from_secs(60), 3);

        let result: Result<()> = with_retry(&policy, &cancel, "op", || async {
            Err(KubeError::Transient("busy".to_string()))
        })
        .await;

        assert!(matches!(result, Err(KubeError::Cancelled)));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(300),
            ..Default::default()
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(300));
    }

    #[test]
    fn test_policy_from_yaml() {
        let policy: RetryPolicy = serde_yaml::from_str("delay: 2s\nattempts: 3\n").unwrap();
        assert_eq!(policy.delay, Duration::from_secs(2));
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.max_delay, Duration::from_secs(10));
        assert!((policy.retryable)(&KubeError::Transient("x".to_string())));
    }
}
