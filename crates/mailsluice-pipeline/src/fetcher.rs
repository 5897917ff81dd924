//! Batch and thread fetching.
//!
//! The fetcher delegates retrieval to the [`MailGateway`] and keeps a
//! running progress estimate. It never retries: every failure propagates
//! to the orchestrator, which owns the retry decision.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::criteria::{FetchCriteria, ThreadSearchCriteria};
use crate::error::{Error, Result};
use crate::gateway::MailGateway;
use crate::message::EmailMessage;
use crate::strategy::SearchStrategy;

/// What the fetcher is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FetchStatus {
    /// No fetch has run yet or the last batch is done.
    #[default]
    Idle,
    /// A fetch is in flight.
    Fetching,
    /// The last fetch failed.
    Failed,
}

/// Read-only snapshot of fetch progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchProgress {
    /// Messages the provider reports as pending, when known.
    pub expected_total: Option<u64>,
    /// Messages fetched so far.
    pub fetched: u64,
    /// Number of completed batches.
    pub batch_number: u64,
    /// Wall-clock time of the last completed fetch.
    pub last_fetch_at: Option<DateTime<Utc>>,
    /// Estimated time to drain the remaining backlog, when computable.
    pub estimated_remaining: Option<Duration>,
    /// Current status.
    pub status: FetchStatus,
}

#[derive(Debug, Default)]
struct ProgressState {
    expected_total: Option<u64>,
    fetched: u64,
    batch_number: u64,
    last_fetch_at: Option<DateTime<Utc>>,
    elapsed_total: Duration,
    status: FetchStatus,
}

impl ProgressState {
    /// Moving estimate: average time per fetched message times the
    /// outstanding count.
    #[allow(clippy::cast_precision_loss)]
    fn estimated_remaining(&self) -> Option<Duration> {
        let expected = self.expected_total?;
        if self.fetched == 0 {
            return None;
        }
        let outstanding = expected.saturating_sub(self.fetched);
        let avg = self.elapsed_total.as_secs_f64() / self.fetched as f64;
        Some(Duration::from_secs_f64(avg * outstanding as f64))
    }
}

/// Retrieves message batches and thread siblings through the gateway.
pub struct Fetcher {
    gateway: Arc<dyn MailGateway>,
    search: Arc<dyn SearchStrategy>,
    fetch_timeout: Duration,
    progress: Mutex<ProgressState>,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("search", &self.search)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    /// Creates a fetcher bound to a gateway and a search strategy.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn MailGateway>,
        search: Arc<dyn SearchStrategy>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            search,
            fetch_timeout,
            progress: Mutex::new(ProgressState::default()),
        }
    }

    fn lock_progress(&self) -> MutexGuard<'_, ProgressState> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetches one batch of messages matching `criteria`.
    ///
    /// Bounded by the strategy's fetch timeout; records batch count and
    /// elapsed time into the progress tracker.
    ///
    /// # Errors
    ///
    /// Propagates gateway failures unchanged and reports
    /// [`Error::Timeout`] when the deadline expires. The fetcher itself
    /// never retries.
    pub async fn fetch_batch(&self, criteria: &FetchCriteria) -> Result<Vec<EmailMessage>> {
        self.lock_progress().status = FetchStatus::Fetching;
        let started = Instant::now();

        let outcome =
            tokio::time::timeout(self.fetch_timeout, self.gateway.fetch_messages(criteria)).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(messages)) => {
                let mut progress = self.lock_progress();
                progress.fetched += messages.len() as u64;
                progress.batch_number += 1;
                progress.last_fetch_at = Some(Utc::now());
                progress.elapsed_total += elapsed;
                progress.status = FetchStatus::Idle;
                drop(progress);

                tracing::debug!(
                    mailbox = %criteria.mailbox,
                    count = messages.len(),
                    ?elapsed,
                    "fetched batch"
                );
                Ok(messages)
            }
            Ok(Err(err)) => {
                self.lock_progress().status = FetchStatus::Failed;
                Err(err)
            }
            Err(_) => {
                self.lock_progress().status = FetchStatus::Failed;
                Err(Error::Timeout(self.fetch_timeout))
            }
        }
    }

    /// Fetches the remaining messages of a thread.
    ///
    /// The active search strategy first translates the criteria into a
    /// provider-safe query; strategy and gateway failures both propagate —
    /// there is no silent empty-result fallback.
    ///
    /// # Errors
    ///
    /// Returns strategy translation errors, gateway errors, or
    /// [`Error::Timeout`].
    pub async fn fetch_thread(&self, criteria: &ThreadSearchCriteria) -> Result<Vec<EmailMessage>> {
        let query = self.search.thread_query(criteria)?;
        tracing::debug!(
            ids = query.message_ids.len(),
            mailbox = %query.mailbox,
            "searching thread"
        );

        match tokio::time::timeout(
            self.fetch_timeout,
            self.gateway.search_thread_messages(&query),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.fetch_timeout)),
        }
    }

    /// Records the provider-reported backlog size for remaining-time
    /// estimation.
    pub fn set_expected_total(&self, total: u64) {
        self.lock_progress().expected_total = Some(total);
    }

    /// Takes a progress snapshot.
    #[must_use]
    pub fn progress(&self) -> FetchProgress {
        let state = self.lock_progress();
        FetchProgress {
            expected_total: state.expected_total,
            fetched: state.fetched,
            batch_number: state.batch_number,
            last_fetch_at: state.last_fetch_at,
            estimated_remaining: state.estimated_remaining(),
            status: state.status,
        }
    }

    /// Verifies the gateway is reachable.
    ///
    /// # Errors
    ///
    /// Propagates the gateway's health-check failure.
    pub async fn health(&self) -> Result<()> {
        self.gateway.health_check().await
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
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::gateway::MailboxInfo;
    use crate::strategy::{GenericSearchStrategy, ThreadQuery};

    /// Gateway returning a fixed batch, optionally failing or hanging.
    #[derive(Default)]
    struct FixedGateway {
        batch_size: usize,
        fail: AtomicBool,
        hang: bool,
    }

    #[async_trait]
    impl MailGateway for FixedGateway {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        async fn health_check(&self) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                Err(Error::Connection("unreachable".to_string()))
            } else {
                Ok(())
            }
        }

        async fn fetch_messages(&self, criteria: &FetchCriteria) -> Result<Vec<EmailMessage>> {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::ServerUnavailable("maintenance".to_string()));
            }
            Ok((0..self.batch_size.min(criteria.max_results))
                .map(|i| EmailMessage::new(format!("{i}"), format!("{i}@test")))
                .collect())
        }

        async fn search_thread_messages(&self, query: &ThreadQuery) -> Result<Vec<EmailMessage>> {
            Ok(query
                .message_ids
                .iter()
                .map(|id| EmailMessage::new(id.clone(), id.clone()))
                .collect())
        }

        async fn send_message(&self, _message: &EmailMessage) -> Result<()> {
            Ok(())
        }

        async fn mark_as_read(&self, _message_id: &str) -> Result<()> {
            Ok(())
        }

        async fn list_mailboxes(&self) -> Result<Vec<String>> {
            Ok(vec!["INBOX".to_string()])
        }

        async fn select_mailbox(&self, _mailbox: &str) -> Result<()> {
            Ok(())
        }

        async fn mailbox_info(&self, mailbox: &str) -> Result<MailboxInfo> {
            Ok(MailboxInfo {
                name: mailbox.to_string(),
                total: 100,
                unseen: 10,
            })
        }
    }

    fn configured_search() -> Arc<dyn SearchStrategy> {
        let mut search = GenericSearchStrategy::new();
        search.configure(GenericSearchStrategy::default_tuning());
        Arc::new(search)
    }

    fn fetcher(gateway: FixedGateway) -> Fetcher {
        Fetcher::new(Arc::new(gateway), configured_search(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_fetch_batch_tracks_progress() {
        let fetcher = fetcher(FixedGateway {
            batch_size: 4,
            ..FixedGateway::default()
        });
        fetcher.set_expected_total(8);

        let criteria = FetchCriteria::builder("INBOX").max_results(10).build();
        let messages = fetcher.fetch_batch(&criteria).await.unwrap();
        assert_eq!(messages.len(), 4);

        let progress = fetcher.progress();
        assert_eq!(progress.fetched, 4);
        assert_eq!(progress.batch_number, 1);
        assert_eq!(progress.status, FetchStatus::Idle);
        assert!(progress.last_fetch_at.is_some());
        assert!(progress.estimated_remaining.is_some());
    }

    #[tokio::test]
    async fn test_fetch_batch_propagates_failure() {
        let gateway = FixedGateway {
            batch_size: 4,
            ..FixedGateway::default()
        };
        gateway.fail.store(true, Ordering::SeqCst);
        let fetcher = fetcher(gateway);

        let criteria = FetchCriteria::builder("INBOX").build();
        let err = fetcher.fetch_batch(&criteria).await.unwrap_err();
        assert!(matches!(err, Error::ServerUnavailable(_)));
        assert_eq!(fetcher.progress().status, FetchStatus::Failed);
        assert_eq!(fetcher.progress().fetched, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_batch_times_out() {
        let fetcher = Fetcher::new(
            Arc::new(FixedGateway {
                batch_size: 1,
                hang: true,
                ..FixedGateway::default()
            }),
            configured_search(),
            Duration::from_millis(100),
        );

        let criteria = FetchCriteria::builder("INBOX").build();
        let err = fetcher.fetch_batch(&criteria).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(fetcher.progress().status, FetchStatus::Failed);
    }

    #[tokio::test]
    async fn test_fetch_thread_translates_criteria() {
        let fetcher = fetcher(FixedGateway {
            batch_size: 0,
            ..FixedGateway::default()
        });

        let criteria = ThreadSearchCriteria::new("<root@test>", "INBOX")
            .parent("<parent@test>")
            .subject("hello");
        let messages = fetcher.fetch_thread(&criteria).await.unwrap();
        // The mock echoes the normalized query ids back as messages.
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "root@test");
    }

    #[tokio::test]
    async fn test_fetch_thread_requires_configured_strategy() {
        let fetcher = Fetcher::new(
            Arc::new(FixedGateway::default()),
            Arc::new(GenericSearchStrategy::new()),
            Duration::from_secs(5),
        );

        let criteria = ThreadSearchCriteria::new("<root@test>", "INBOX");
        let err = fetcher.fetch_thread(&criteria).await.unwrap_err();
        assert!(matches!(err, Error::StrategyNotConfigured(_)));
    }

    #[tokio::test]
    async fn test_health_delegates_to_gateway() {
        let gateway = FixedGateway::default();
        gateway.fail.store(true, Ordering::SeqCst);
        let fetcher = fetcher(gateway);
        assert!(fetcher.health().await.is_err());
    }
}
