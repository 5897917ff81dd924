//! Error types for the ingestion pipeline.
//!
//! The taxonomy distinguishes four kinds of failure:
//!
//! - **Transient** (connection loss, timeouts, rate limits): safe to retry,
//!   governed by the active [`RetryPolicy`](crate::retry::RetryPolicy).
//! - **Permanent** (authentication, protocol violations, quota): never
//!   retried, surfaced immediately.
//! - **Capacity** (closed or full buffers): flow-control signals, not
//!   failures. Callers slow down or finish the batch partially.
//! - **Configuration** (missing fallback strategy, unconfigured search):
//!   programming or deployment errors caught at construction time.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in the ingestion pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Connecting to the mail provider failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// An operation exceeded its deadline.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The provider reported itself unavailable.
    #[error("Server unavailable: {0}")]
    ServerUnavailable(String),

    /// The provider throttled the request.
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Authentication with the provider failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The provider returned a malformed or unexpected response.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The account's storage or request quota is exhausted.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The requested mailbox does not exist.
    #[error("Mailbox not found: {0}")]
    MailboxNotFound(String),

    /// The message queue has been closed.
    #[error("queue is closed")]
    QueueClosed,

    /// A single batch can never fit into the queue.
    #[error("batch of {requested} messages exceeds queue capacity {capacity}")]
    BatchExceedsCapacity {
        /// Number of messages in the rejected batch.
        requested: usize,
        /// Total capacity of the queue.
        capacity: usize,
    },

    /// The worker pool's submission channel is full.
    #[error("worker queue full (capacity {capacity})")]
    WorkerQueueFull {
        /// Capacity of the worker submission channel.
        capacity: usize,
    },

    /// The worker pool is not running.
    #[error("worker pool is not running")]
    PoolNotRunning,

    /// An operation was attempted in an invalid lifecycle state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Static configuration is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A search strategy was used before being configured.
    #[error("search strategy for provider '{0}' is not configured")]
    StrategyNotConfigured(String),

    /// The strategy registry is missing its mandatory generic fallback.
    #[error("no generic fallback strategy registered")]
    MissingGenericStrategy,

    /// All retry attempts were exhausted.
    #[error("operation '{operation}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Name of the retried operation.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
        /// The last underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Processing a single message failed.
    #[error("Processing failed: {0}")]
    Processing(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if the error is transient and the operation may be
    /// retried.
    ///
    /// Retries are pointless (or harmful) for permanent failures such as
    /// bad credentials, and misleading for capacity signals, so only the
    /// transient network-facing variants qualify.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Timeout(_)
                | Self::ServerUnavailable(_)
                | Self::RateLimited(_)
        )
    }

    /// Returns `true` if the error is a flow-control signal rather than a
    /// failure.
    ///
    /// Capacity signals are counted in metrics and expected during normal
    /// operation under load; they must not abort a batch or trip health.
    #[must_use]
    pub const fn is_capacity(&self) -> bool {
        matches!(
            self,
            Self::QueueClosed | Self::BatchExceedsCapacity { .. } | Self::WorkerQueueFull { .. }
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

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
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(Error::Connection("reset".to_string()).is_retryable());
        assert!(Error::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(Error::ServerUnavailable("maintenance".to_string()).is_retryable());
        assert!(Error::RateLimited("slow down".to_string()).is_retryable());
    }

    #[test]
    fn test_permanent_errors_are_not_retryable() {
        assert!(!Error::Auth("bad password".to_string()).is_retryable());
        assert!(!Error::Protocol("garbage".to_string()).is_retryable());
        assert!(!Error::QuotaExceeded("full".to_string()).is_retryable());
        assert!(!Error::MailboxNotFound("INBOX".to_string()).is_retryable());
    }

    #[test]
    fn test_capacity_signals() {
        assert!(Error::QueueClosed.is_capacity());
        assert!(
            Error::WorkerQueueFull { capacity: 8 }.is_capacity(),
            "a full worker queue is backpressure, not failure"
        );
        assert!(!Error::Auth("nope".to_string()).is_capacity());
        // Capacity signals are also never retryable as-is.
        assert!(!Error::QueueClosed.is_retryable());
    }

    #[test]
    fn test_retries_exhausted_carries_cause() {
        let err = Error::RetriesExhausted {
            operation: "fetch_batch".to_string(),
            attempts: 3,
            source: Box::new(Error::Connection("refused".to_string())),
        };
        let text = err.to_string();
        assert!(text.contains("fetch_batch"));
        assert!(text.contains("3 attempts"));
        assert!(text.contains("refused"));
    }
}
