//! Pipeline orchestration.
//!
//! The [`Pipeline`] wires fetcher → queue → worker pool together and
//! exposes the lifecycle the driver sees: start, stop, process one
//! batch, health, metrics.
//!
//! ## Lifecycle
//!
//! ```text
//! created ── start() ──→ running ── stop() ──→ stopping ──→ stopped
//! ```
//!
//! `stopped` is terminal. Within `running`, an observability-only phase
//! tracks what the pipeline is doing (fetching, queuing, processing,
//! idle); the phase never drives control flow.
//!
//! ## Failure containment
//!
//! A fetch or enqueue failure aborts only the current batch: it is
//! recorded in metrics and `last_error`, and the orchestrator stays
//! `running` for the next scheduled batch. A single message's submit
//! rejection or processing failure never aborts its siblings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::config::IngestConfig;
use crate::criteria::FetchCriteria;
use crate::error::{Error, Result};
use crate::fetcher::Fetcher;
use crate::gateway::{MailGateway, MessageProcessor};
use crate::queue::{MessageQueue, QueueMetrics};
use crate::retry::RetryManager;
use crate::strategy::{PipelineStrategy, StrategyFactory};
use crate::worker::{WorkerMetrics, WorkerPool};

/// Lifecycle state of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Built but not started.
    Created,
    /// Started and accepting batches.
    Running,
    /// Shutting down.
    Stopping,
    /// Terminal.
    Stopped,
}

impl PipelineStatus {
    /// Whether `self → next` is a legal lifecycle transition.
    #[must_use]
    pub const fn can_advance(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Running)
                | (Self::Running, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }
}

/// Observability sub-state within the running pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    /// Component checks and worker startup.
    Initialization,
    /// Fetching a batch from the gateway.
    Fetching,
    /// Buffering the batch into the queue.
    Queuing,
    /// Dispatching messages to the worker pool.
    Processing,
    /// Waiting for the next batch.
    Idle,
    /// Shutting down.
    Shutdown,
}

/// Health of one named component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name.
    pub name: String,
    /// Whether the component reported healthy.
    pub healthy: bool,
    /// Error detail when unhealthy.
    pub detail: Option<String>,
}

/// Aggregated health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineHealth {
    /// Healthy only when every component is healthy.
    pub healthy: bool,
    /// Per-component reports, by name.
    pub components: Vec<ComponentHealth>,
}

/// Snapshot of the pipeline's lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Lifecycle state.
    pub status: PipelineStatus,
    /// Observability phase.
    pub phase: PipelinePhase,
    /// When the pipeline entered `running`, if it has.
    pub active_since: Option<DateTime<Utc>>,
    /// Most recent batch-level failure.
    pub last_error: Option<String>,
}

/// Aggregated metrics snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    /// Lifecycle snapshot.
    pub status: StatusSnapshot,
    /// Queue counters and gauges.
    pub queue: QueueMetrics,
    /// Worker counters and gauges.
    pub workers: WorkerMetrics,
    /// Batches completed end to end.
    pub batches_processed: u64,
    /// Batches aborted by a fetch or enqueue failure.
    pub batches_failed: u64,
    /// Messages fetched from the gateway.
    pub messages_fetched: u64,
    /// Message submissions rejected by the worker pool.
    pub submit_rejections: u64,
}

/// Outcome of one `process_batch` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Messages fetched from the gateway.
    pub fetched: usize,
    /// Messages buffered into the queue.
    pub enqueued: usize,
    /// Messages accepted by the worker pool.
    pub submitted: usize,
    /// Messages rejected by the worker pool.
    pub rejected: usize,
}

#[derive(Debug)]
struct State {
    status: PipelineStatus,
    phase: PipelinePhase,
    active_since: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl State {
    /// Validated lifecycle transition; illegal transitions fail loudly
    /// instead of silently rewriting state.
    fn advance(&mut self, next: PipelineStatus) -> Result<()> {
        if self.status.can_advance(next) {
            self.status = next;
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "cannot transition pipeline from {:?} to {next:?}",
                self.status
            )))
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    batches_processed: AtomicU64,
    batches_failed: AtomicU64,
    messages_fetched: AtomicU64,
    submit_rejections: AtomicU64,
}

/// The fetch→queue→dispatch orchestrator.
pub struct Pipeline {
    fetcher: Arc<Fetcher>,
    queue: Arc<MessageQueue>,
    workers: Arc<WorkerPool>,
    strategies: Arc<StrategyFactory>,
    strategy: Arc<dyn PipelineStrategy>,
    retry: RetryManager,
    config: IngestConfig,
    state: Mutex<State>,
    counters: Counters,
    /// Serializes `process_batch` invocations; batches are independent
    /// units of work and must not interleave phases.
    batch_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("provider", &self.strategy.provider())
            .field("mailbox", &self.config.mailbox)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a builder.
    #[must_use]
    pub fn builder(config: IngestConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: PipelinePhase) {
        self.lock_state().phase = phase;
    }

    fn ensure_running(&self) -> Result<()> {
        let state = self.lock_state();
        if state.status == PipelineStatus::Running {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "pipeline is {:?}, expected Running",
                state.status
            )))
        }
    }

    /// Starts the pipeline.
    ///
    /// Health-checks every wired component, then starts the worker pool.
    /// Any failure leaves the pipeline in `created` with nothing started.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] when not in `created`, or the
    /// first failing component's error.
    pub async fn start(&self) -> Result<()> {
        {
            let state = self.lock_state();
            if !state.status.can_advance(PipelineStatus::Running) {
                return Err(Error::InvalidState(format!(
                    "cannot start pipeline from {:?}",
                    state.status
                )));
            }
        }

        self.strategies.health()?;
        self.queue.health()?;
        self.fetcher.health().await?;
        self.workers.start()?;

        {
            let mut state = self.lock_state();
            state.advance(PipelineStatus::Running)?;
            state.phase = PipelinePhase::Initialization;
            state.active_since = Some(Utc::now());
        }
        tracing::info!(
            provider = %self.strategy.provider(),
            mailbox = %self.config.mailbox,
            workers = self.strategy.worker_count(),
            batch_size = self.strategy.batch_size(),
            "pipeline started"
        );
        self.set_phase(PipelinePhase::Idle);
        Ok(())
    }

    /// Stops the pipeline.
    ///
    /// Shutdown is best-effort terminal: worker-pool and queue cleanup
    /// failures are logged, never returned, and the pipeline always ends
    /// in `stopped`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] when the pipeline is not running.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.lock_state();
            state.advance(PipelineStatus::Stopping)?;
            state.phase = PipelinePhase::Shutdown;
        }
        tracing::info!("pipeline stopping");

        if let Err(err) = self.workers.stop(self.config.shutdown_timeout()).await {
            tracing::warn!(error = %err, "worker pool did not stop cleanly");
        }
        self.queue.clear();
        self.queue.close();

        let mut state = self.lock_state();
        state.advance(PipelineStatus::Stopped)?;
        tracing::info!("pipeline stopped");
        Ok(())
    }

    /// Fetches, enqueues and dispatches one batch.
    ///
    /// The four phases run in strict order: fetch (under the strategy's
    /// retry policy), enqueue, dispatch (one short-lived task per
    /// message, joined before returning), metrics update. Per-message
    /// submit rejections are counted individually and never abort the
    /// rest of the batch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] when the pipeline is not running,
    /// or the fetch/enqueue failure that aborted the batch. The pipeline
    /// itself stays `running` either way.
    pub async fn process_batch(&self) -> Result<BatchReport> {
        self.ensure_running()?;
        let _batch = self.batch_lock.lock().await;
        // Re-check: stop() may have won the race for the lock gap.
        self.ensure_running()?;

        // Phase 1: fetch.
        self.set_phase(PipelinePhase::Fetching);
        let criteria = FetchCriteria::builder(self.config.mailbox.clone())
            .max_results(self.strategy.batch_size())
            .unseen_only(self.config.unseen_only)
            .build();
        let fetched = match self
            .retry
            .execute_with_retry("fetch_batch", || self.fetcher.fetch_batch(&criteria))
            .await
        {
            Ok(messages) => messages,
            Err(err) => return Err(self.fail_batch("fetch", err)),
        };
        let fetched_count = fetched.len();
        self.counters
            .messages_fetched
            .fetch_add(fetched_count as u64, Ordering::Relaxed);

        if fetched.is_empty() {
            self.counters.batches_processed.fetch_add(1, Ordering::Relaxed);
            self.set_phase(PipelinePhase::Idle);
            tracing::debug!("no new messages");
            return Ok(BatchReport::default());
        }

        // Phase 2: enqueue. Bounded by the process timeout: the queue
        // only frees up as fast as the workers drain it.
        self.set_phase(PipelinePhase::Queuing);
        let enqueue = tokio::time::timeout(
            self.strategy.process_timeout(),
            self.queue.enqueue(fetched),
        );
        match enqueue.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(self.fail_batch("enqueue", err)),
            Err(_) => {
                return Err(
                    self.fail_batch("enqueue", Error::Timeout(self.strategy.process_timeout()))
                );
            }
        }

        // Phase 3: dispatch. One task per message, joined before the
        // phase completes; a rejected message never blocks its siblings.
        self.set_phase(PipelinePhase::Processing);
        let batch = match self.queue.dequeue(fetched_count).await {
            Ok(batch) => batch,
            Err(err) => return Err(self.fail_batch("dispatch", err)),
        };

        let mut dispatch = JoinSet::new();
        let enqueued = batch.len();
        for message in batch {
            let workers = Arc::clone(&self.workers);
            dispatch.spawn(async move { workers.submit(message) });
        }

        let mut submitted = 0usize;
        let mut rejected = 0usize;
        while let Some(joined) = dispatch.join_next().await {
            match joined {
                Ok(Ok(())) => submitted += 1,
                Ok(Err(err)) => {
                    rejected += 1;
                    if err.is_capacity() {
                        tracing::debug!(error = %err, "submission rejected, backpressure");
                    } else {
                        tracing::warn!(error = %err, "submission failed");
                    }
                }
                Err(join_err) => {
                    rejected += 1;
                    tracing::warn!(error = %join_err, "dispatch task failed");
                }
            }
        }
        self.counters
            .submit_rejections
            .fetch_add(rejected as u64, Ordering::Relaxed);

        // Phase 4: metrics.
        self.counters.batches_processed.fetch_add(1, Ordering::Relaxed);
        self.set_phase(PipelinePhase::Idle);

        let report = BatchReport {
            fetched: fetched_count,
            enqueued,
            submitted,
            rejected,
        };
        tracing::debug!(
            fetched = report.fetched,
            submitted = report.submitted,
            rejected = report.rejected,
            "batch dispatched"
        );
        Ok(report)
    }

    /// Records a batch-level failure without terminating the pipeline.
    fn fail_batch(&self, stage: &str, err: Error) -> Error {
        self.counters.batches_failed.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.lock_state();
            state.last_error = Some(format!("{stage}: {err}"));
            // Keep the shutdown phase if a stop raced the batch.
            if state.status == PipelineStatus::Running {
                state.phase = PipelinePhase::Idle;
            }
        }
        tracing::error!(stage, error = %err, "batch aborted");
        err
    }

    /// Probes every component and aggregates the result.
    ///
    /// Health reporting is itself robust: this never fails, a degraded
    /// component shows up by name with its own error detail.
    pub async fn health(&self) -> PipelineHealth {
        let mut components = Vec::with_capacity(4);

        let fetcher = self.fetcher.health().await;
        components.push(component_health("fetcher", fetcher));
        components.push(component_health("queue", self.queue.health()));
        components.push(component_health("worker_pool", self.workers.health()));
        components.push(component_health("strategy_factory", self.strategies.health()));

        PipelineHealth {
            healthy: components.iter().all(|c| c.healthy),
            components,
        }
    }

    /// Takes an aggregated metrics snapshot. Read-only, no side effects.
    #[must_use]
    pub fn metrics(&self) -> PipelineMetrics {
        PipelineMetrics {
            status: self.status(),
            queue: self.queue.metrics(),
            workers: self.workers.metrics(),
            batches_processed: self.counters.batches_processed.load(Ordering::Relaxed),
            batches_failed: self.counters.batches_failed.load(Ordering::Relaxed),
            messages_fetched: self.counters.messages_fetched.load(Ordering::Relaxed),
            submit_rejections: self.counters.submit_rejections.load(Ordering::Relaxed),
        }
    }

    /// Takes a lifecycle snapshot.
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        let state = self.lock_state();
        StatusSnapshot {
            status: state.status,
            phase: state.phase,
            active_since: state.active_since,
            last_error: state.last_error.clone(),
        }
    }

    /// The fetcher, for progress inspection.
    #[must_use]
    pub fn fetcher(&self) -> &Arc<Fetcher> {
        &self.fetcher
    }
}

fn component_health(name: &str, result: Result<()>) -> ComponentHealth {
    match result {
        Ok(()) => ComponentHealth {
            name: name.to_string(),
            healthy: true,
            detail: None,
        },
        Err(err) => ComponentHealth {
            name: name.to_string(),
            healthy: false,
            detail: Some(err.to_string()),
        },
    }
}

/// Builder wiring a pipeline from its collaborators and configuration.
///
/// Component sizing (queue capacity, worker count, timeouts) comes from
/// the strategy the factory resolves for the configured provider.
pub struct PipelineBuilder {
    config: IngestConfig,
    gateway: Option<Arc<dyn MailGateway>>,
    processor: Option<Arc<dyn MessageProcessor>>,
    strategies: Option<Arc<StrategyFactory>>,
}

impl PipelineBuilder {
    /// Creates a builder for the given configuration.
    #[must_use]
    pub const fn new(config: IngestConfig) -> Self {
        Self {
            config,
            gateway: None,
            processor: None,
            strategies: None,
        }
    }

    /// Sets the mail gateway.
    #[must_use]
    pub fn gateway(mut self, gateway: Arc<dyn MailGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Sets the message processor.
    #[must_use]
    pub fn processor(mut self, processor: Arc<dyn MessageProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Sets a custom strategy factory. Defaults to
    /// [`StrategyFactory::with_defaults`].
    #[must_use]
    pub fn strategies(mut self, strategies: Arc<StrategyFactory>) -> Self {
        self.strategies = Some(strategies);
        self
    }

    /// Builds the pipeline in the `created` state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when a required collaborator is
    /// missing or the strategy configuration is invalid, and
    /// [`Error::MissingGenericStrategy`] when a custom factory lacks its
    /// fallback.
    pub fn build(self) -> Result<Pipeline> {
        let gateway = self.gateway.ok_or_else(|| {
            Error::Configuration("pipeline requires a mail gateway".to_string())
        })?;
        let processor = self.processor.ok_or_else(|| {
            Error::Configuration("pipeline requires a message processor".to_string())
        })?;

        let strategies = match self.strategies {
            Some(factory) => factory,
            None => Arc::new(StrategyFactory::with_defaults(&self.config)?),
        };
        strategies.health()?;

        let strategy = strategies.resolve_pipeline(&self.config.provider)?;
        tracing::debug!(
            provider = %self.config.provider,
            resolved = %strategy.provider(),
            "resolved pipeline strategy"
        );

        let queue = Arc::new(MessageQueue::new(strategy.queue_capacity())?);
        let workers = Arc::new(WorkerPool::new(
            strategy.worker_count(),
            strategy.queue_capacity(),
            strategy.process_timeout(),
            processor,
        )?);
        let fetcher = Arc::new(Fetcher::new(
            gateway,
            strategy.search_strategy(),
            strategy.fetch_timeout(),
        ));
        let retry = RetryManager::new(strategy.retry_policy());

        Ok(Pipeline {
            fetcher,
            queue,
            workers,
            strategies,
            strategy,
            retry,
            config: self.config,
            state: Mutex::new(State {
                status: PipelineStatus::Created,
                phase: PipelinePhase::Initialization,
                active_since: None,
                last_error: None,
            }),
            counters: Counters::default(),
            batch_lock: tokio::sync::Mutex::new(()),
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
    use super::*;

    #[test]
    fn test_status_transitions() {
        use PipelineStatus::{Created, Running, Stopped, Stopping};

        assert!(Created.can_advance(Running));
        assert!(Running.can_advance(Stopping));
        assert!(Stopping.can_advance(Stopped));

        // Everything else is illegal; stopped is terminal.
        assert!(!Created.can_advance(Stopping));
        assert!(!Created.can_advance(Stopped));
        assert!(!Running.can_advance(Created));
        assert!(!Running.can_advance(Stopped));
        assert!(!Stopped.can_advance(Created));
        assert!(!Stopped.can_advance(Running));
        assert!(!Stopping.can_advance(Running));
    }

    #[test]
    fn test_state_advance_is_loud() {
        let mut state = State {
            status: PipelineStatus::Created,
            phase: PipelinePhase::Initialization,
            active_since: None,
            last_error: None,
        };
        state.advance(PipelineStatus::Running).unwrap();

        let err = state.advance(PipelineStatus::Running).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        // The failed transition must not have rewritten the state.
        assert_eq!(state.status, PipelineStatus::Running);
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let err = Pipeline::builder(IngestConfig::new("gmail")).build().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_component_health_detail() {
        let healthy = component_health("queue", Ok(()));
        assert!(healthy.healthy);
        assert!(healthy.detail.is_none());

        let degraded = component_health("queue", Err(Error::QueueClosed));
        assert!(!degraded.healthy);
        assert_eq!(degraded.detail.as_deref(), Some("queue is closed"));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&PipelineStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let json = serde_json::to_string(&PipelinePhase::Shutdown).unwrap();
        assert_eq!(json, "\"shutdown\"");
    }
}
