//! Ingestion configuration.
//!
//! [`IngestConfig`] carries the deployment-level settings (provider,
//! mailbox, poll cadence, shutdown deadline) plus optional per-provider
//! [`StrategyOverrides`]. Unset override fields fall back to the
//! provider strategy's own defaults, so a minimal config is always valid.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default poll interval between batches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Default deadline for graceful shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Overrides for a provider's retry policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOverrides {
    /// Maximum attempts.
    pub max_attempts: Option<u32>,
    /// Base delay in milliseconds.
    pub base_delay_ms: Option<u64>,
    /// Delay ceiling in milliseconds.
    pub max_delay_ms: Option<u64>,
    /// Backoff multiplier.
    pub backoff_factor: Option<f64>,
}

/// Overrides for a provider's thread-search tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOverrides {
    /// Maximum correlation ids per query.
    pub max_message_ids: Option<usize>,
    /// Search window in days.
    pub timeframe_days: Option<u32>,
}

/// Overrides for one provider's pipeline strategy.
///
/// Every field is optional; anything unset keeps the provider default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyOverrides {
    /// Messages fetched per batch.
    pub batch_size: Option<usize>,
    /// Number of concurrent workers.
    pub worker_count: Option<usize>,
    /// Capacity of the bounded message queue.
    pub queue_capacity: Option<usize>,
    /// Deadline for one gateway fetch call, in seconds.
    pub fetch_timeout_secs: Option<u64>,
    /// Deadline for processing one message, in seconds.
    pub process_timeout_secs: Option<u64>,
    /// Retry policy overrides.
    pub retry: RetryOverrides,
    /// Thread-search overrides.
    pub search: SearchOverrides,
}

/// Deployment configuration for one ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Provider identifier, e.g. `gmail` or `imap.yandex.ru`.
    pub provider: String,
    /// Mailbox to poll.
    pub mailbox: String,
    /// Seconds between poll ticks.
    pub poll_interval_secs: u64,
    /// Seconds allowed for graceful shutdown.
    pub shutdown_timeout_secs: u64,
    /// Restrict polling to unseen messages.
    pub unseen_only: bool,
    /// Per-provider strategy overrides, keyed by provider.
    pub strategies: HashMap<String, StrategyOverrides>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            provider: String::new(),
            mailbox: "INBOX".to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT.as_secs(),
            unseen_only: true,
            strategies: HashMap::new(),
        }
    }
}

impl IngestConfig {
    /// Creates a configuration for the given provider with defaults.
    #[must_use]
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ..Self::default()
        }
    }

    /// Parses a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serde`](crate::Error::Serde) on malformed input.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Shutdown deadline as a [`Duration`].
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Overrides registered for `provider`, or defaults when absent.
    #[must_use]
    pub fn overrides_for(&self, provider: &str) -> StrategyOverrides {
        self.strategies.get(provider).cloned().unwrap_or_default()
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
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IngestConfig::new("gmail");
        assert_eq!(config.provider, "gmail");
        assert_eq!(config.mailbox, "INBOX");
        assert_eq!(config.poll_interval(), DEFAULT_POLL_INTERVAL);
        assert_eq!(config.shutdown_timeout(), DEFAULT_SHUTDOWN_TIMEOUT);
        assert!(config.unseen_only);
    }

    #[test]
    fn test_from_json_minimal() {
        let config = IngestConfig::from_json(r#"{"provider": "yandex"}"#).unwrap();
        assert_eq!(config.provider, "yandex");
        assert_eq!(config.mailbox, "INBOX");
        assert!(config.strategies.is_empty());
    }

    #[test]
    fn test_from_json_with_overrides() {
        let json = r#"{
            "provider": "imap.yandex.ru",
            "mailbox": "Support",
            "poll_interval_secs": 30,
            "strategies": {
                "yandex": {
                    "batch_size": 10,
                    "retry": { "max_attempts": 5 },
                    "search": { "timeframe_days": 7 }
                }
            }
        }"#;

        let config = IngestConfig::from_json(json).unwrap();
        assert_eq!(config.mailbox, "Support");
        assert_eq!(config.poll_interval(), Duration::from_secs(30));

        let overrides = config.overrides_for("yandex");
        assert_eq!(overrides.batch_size, Some(10));
        assert_eq!(overrides.worker_count, None);
        assert_eq!(overrides.retry.max_attempts, Some(5));
        assert_eq!(overrides.search.timeframe_days, Some(7));

        // Unknown provider falls back to empty overrides.
        assert_eq!(config.overrides_for("gmail"), StrategyOverrides::default());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(IngestConfig::from_json("{not json").is_err());
    }
}
