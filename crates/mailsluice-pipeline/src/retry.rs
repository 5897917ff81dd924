//! Retry policy and classification-aware retry execution.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default maximum number of attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay between attempts.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default ceiling on the computed delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default backoff multiplier.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Retry policy for transient failures.
///
/// Delays grow exponentially: `base_delay × backoff_factor^(attempt − 1)`,
/// capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (≥ 1).
    pub max_attempts: u32,
    /// Delay before the first retry (> 0).
    pub base_delay: Duration,
    /// Ceiling on the computed delay (≥ `base_delay`).
    pub max_delay: Duration,
    /// Backoff multiplier (≥ 1.0).
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// Creates a validated policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `max_attempts` is zero,
    /// `base_delay` is zero, `max_delay` is below `base_delay`, or
    /// `backoff_factor` is below 1.0.
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
    ) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::Configuration(
                "retry policy requires at least one attempt".to_string(),
            ));
        }
        if base_delay.is_zero() {
            return Err(Error::Configuration(
                "retry base delay must be positive".to_string(),
            ));
        }
        if max_delay < base_delay {
            return Err(Error::Configuration(
                "retry max delay must be at least the base delay".to_string(),
            ));
        }
        if backoff_factor < 1.0 {
            return Err(Error::Configuration(
                "retry backoff factor must be at least 1.0".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            base_delay,
            max_delay,
            backoff_factor,
        })
    }

    /// Computes the delay before the retry following attempt number
    /// `attempt` (1-indexed).
    ///
    /// With base 1s and factor 2.0: attempt 1 → 1s, attempt 2 → 2s,
    /// attempt 3 → 4s, capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32);
        #[allow(clippy::cast_possible_wrap)]
        let scaled = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent as i32);
        if scaled.is_finite() {
            Duration::from_secs_f64(scaled).min(self.max_delay)
        } else {
            self.max_delay
        }
    }
}

/// Executes fallible operations under a [`RetryPolicy`].
///
/// Retrying is classification-aware: an error whose
/// [`is_retryable`](Error::is_retryable) reports `false` stops the loop
/// immediately, so permanent failures (bad credentials, protocol errors)
/// never burn attempts.
///
/// The inter-attempt sleep is an ordinary await; dropping the returned
/// future (e.g. from a surrounding `tokio::time::timeout`) abandons the
/// retry loop promptly.
#[derive(Debug, Clone)]
pub struct RetryManager {
    policy: RetryPolicy,
}

impl RetryManager {
    /// Creates a manager with the given policy.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Returns the active policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` up to `max_attempts` times.
    ///
    /// `operation` is a closure returning a fresh future per attempt.
    ///
    /// # Errors
    ///
    /// Returns the original error unchanged when it is classified as
    /// permanent, or [`Error::RetriesExhausted`] wrapping the last failure
    /// once all attempts are spent.
    pub async fn execute_with_retry<T, F, Fut>(&self, name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error: Option<Error> = None;

        for attempt in 1..=self.policy.max_attempts {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(operation = name, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => {
                    tracing::debug!(operation = name, attempt, error = %err, "permanent failure, not retrying");
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.policy.delay_for(attempt);
                    tracing::warn!(
                        operation = name,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "attempt failed"
                    );
                    last_error = Some(err);
                    if attempt < self.policy.max_attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(Error::RetriesExhausted {
            operation: name.to_string(),
            attempts: self.policy.max_attempts,
            source: Box::new(last_error.unwrap_or_else(|| {
                Error::Configuration("retry loop completed without recording an error".to_string())
            })),
        })
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::new(0, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, 2.0).is_err());
        assert!(RetryPolicy::new(3, Duration::ZERO, DEFAULT_MAX_DELAY, 2.0).is_err());
        assert!(
            RetryPolicy::new(3, Duration::from_secs(10), Duration::from_secs(1), 2.0).is_err()
        );
        assert!(RetryPolicy::new(3, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, 0.5).is_err());
        assert!(RetryPolicy::new(3, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, 2.0).is_ok());
    }

    #[test]
    fn test_exponential_delay_with_cap() {
        let policy =
            RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(5), 2.0).unwrap();

        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        // 8s exceeds the 5s cap.
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for(5), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let manager = RetryManager::new(RetryPolicy::default());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = manager
            .execute_with_retry("flaky", move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::Connection("reset".to_string()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_bound() {
        let policy =
            RetryPolicy::new(4, Duration::from_millis(10), Duration::from_millis(10), 1.0)
                .unwrap();
        let manager = RetryManager::new(policy);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<()> = manager
            .execute_with_retry("doomed", move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::ServerUnavailable("down".to_string()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(Error::RetriesExhausted {
                operation,
                attempts,
                source,
            }) => {
                assert_eq!(operation, "doomed");
                assert_eq!(attempts, 4);
                assert!(matches!(*source, Error::ServerUnavailable(_)));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_stops_after_one_attempt() {
        let manager = RetryManager::new(RetryPolicy::default());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<()> = manager
            .execute_with_retry("auth", move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Auth("bad password".to_string()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(Error::Auth(_))));
    }
}
