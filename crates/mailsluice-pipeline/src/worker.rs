//! Fixed-size worker pool.
//!
//! Workers are spawned once at [`WorkerPool::start`] and live until
//! [`WorkerPool::stop`]. They all pull from a single shared bounded
//! channel fed by [`WorkerPool::submit`].
//!
//! `submit` is deliberately fail-fast: when the channel is full it
//! rejects with [`Error::WorkerQueueFull`] instead of blocking. This is
//! the inner of the pipeline's two flow-control tiers — the outer
//! [`MessageQueue`](crate::queue::MessageQueue) blocks, the inner
//! channel rejects, so dispatch latency stays bounded and overload is
//! pushed back to the next poll tick.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::gateway::MessageProcessor;
use crate::message::EmailMessage;

/// Read-only snapshot of worker counters and gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerMetrics {
    /// Configured number of workers.
    pub worker_count: usize,
    /// Workers currently processing a message.
    pub active_workers: usize,
    /// Workers currently waiting for work.
    pub idle_workers: usize,
    /// Messages processed successfully.
    pub total_processed: u64,
    /// Messages whose processing failed or timed out.
    pub total_failed: u64,
    /// Submissions rejected because the channel was full.
    pub total_rejected: u64,
    /// Cumulative processing time in milliseconds.
    pub total_processing_ms: u64,
}

/// Shared counters updated from the worker loops.
///
/// `idle` is derived as `worker_count − active` at snapshot time, so the
/// `active + idle == worker_count` invariant holds at every observation
/// point by construction.
#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    processed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    processing_ms: AtomicU64,
}

/// RAII guard flipping a worker into the active state.
///
/// Dropping the guard restores the idle state on every path out of the
/// processing block, including failures and timeouts.
struct ActivityGuard<'a> {
    counters: &'a Counters,
}

impl<'a> ActivityGuard<'a> {
    fn begin(counters: &'a Counters) -> Self {
        counters.active.fetch_add(1, Ordering::SeqCst);
        Self { counters }
    }
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Runtime {
    tx: mpsc::Sender<EmailMessage>,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Pool of concurrent message-processing workers.
pub struct WorkerPool {
    worker_count: usize,
    submit_capacity: usize,
    process_timeout: Duration,
    processor: Arc<dyn MessageProcessor>,
    counters: Arc<Counters>,
    runtime: Mutex<Option<Runtime>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.worker_count)
            .field("submit_capacity", &self.submit_capacity)
            .field("process_timeout", &self.process_timeout)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Creates a stopped pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for a zero worker count or
    /// submission capacity.
    pub fn new(
        worker_count: usize,
        submit_capacity: usize,
        process_timeout: Duration,
        processor: Arc<dyn MessageProcessor>,
    ) -> Result<Self> {
        if worker_count == 0 {
            return Err(Error::Configuration(
                "worker count must be positive".to_string(),
            ));
        }
        if submit_capacity == 0 {
            return Err(Error::Configuration(
                "worker submission capacity must be positive".to_string(),
            ));
        }
        Ok(Self {
            worker_count,
            submit_capacity,
            process_timeout,
            processor,
            counters: Arc::new(Counters::default()),
            runtime: Mutex::new(None),
        })
    }

    fn lock_runtime(&self) -> MutexGuard<'_, Option<Runtime>> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns the worker loops.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the pool is already running.
    pub fn start(&self) -> Result<()> {
        let mut runtime = self.lock_runtime();
        if runtime.is_some() {
            return Err(Error::InvalidState(
                "worker pool is already running".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel::<EmailMessage>(self.submit_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = (0..self.worker_count)
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                let shutdown = shutdown_rx.clone();
                let processor = Arc::clone(&self.processor);
                let counters = Arc::clone(&self.counters);
                let process_timeout = self.process_timeout;
                tokio::spawn(async move {
                    worker_loop(worker_id, rx, shutdown, processor, counters, process_timeout)
                        .await;
                })
            })
            .collect();

        *runtime = Some(Runtime {
            tx,
            shutdown: shutdown_tx,
            handles,
        });
        tracing::info!(workers = self.worker_count, "worker pool started");
        Ok(())
    }

    /// Hands one message to the pool without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerQueueFull`] when the submission channel is
    /// full (a flow-control signal, counted in metrics) and
    /// [`Error::PoolNotRunning`] when the pool is stopped.
    pub fn submit(&self, message: EmailMessage) -> Result<()> {
        let tx = {
            let runtime = self.lock_runtime();
            match runtime.as_ref() {
                Some(runtime) => runtime.tx.clone(),
                None => return Err(Error::PoolNotRunning),
            }
        };

        match tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(Error::WorkerQueueFull {
                    capacity: self.submit_capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::PoolNotRunning),
        }
    }

    /// Signals shutdown and waits for every worker to exit.
    ///
    /// Workers finish their in-flight message first. Workers still alive
    /// past `deadline` are aborted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the pool is not running and
    /// [`Error::Timeout`] if the deadline expired before every worker
    /// exited (the stragglers are aborted regardless).
    pub async fn stop(&self, deadline: Duration) -> Result<()> {
        let runtime = {
            let mut runtime = self.lock_runtime();
            runtime
                .take()
                .ok_or_else(|| Error::InvalidState("worker pool is not running".to_string()))?
        };

        let Runtime {
            tx,
            shutdown,
            handles,
        } = runtime;

        // Ignore send errors: every worker having exited already is fine.
        let _ = shutdown.send(true);

        // The tokio clock, not the system clock: the join timeouts below
        // run on it, and the two must agree on how much time is left.
        let expiry = tokio::time::Instant::now() + deadline;
        let mut timed_out = false;
        for mut handle in handles {
            let remaining = expiry.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(_) => {}
                Err(_) => {
                    handle.abort();
                    timed_out = true;
                }
            }
        }

        // Close the submission channel last so queued messages were still
        // drainable during the graceful window.
        drop(tx);

        if timed_out {
            tracing::warn!(?deadline, "worker pool shutdown deadline exceeded");
            Err(Error::Timeout(deadline))
        } else {
            tracing::info!("worker pool stopped");
            Ok(())
        }
    }

    /// Configured number of workers.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Reports whether the pool is running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolNotRunning`] when the pool is stopped.
    pub fn health(&self) -> Result<()> {
        if self.lock_runtime().is_some() {
            Ok(())
        } else {
            Err(Error::PoolNotRunning)
        }
    }

    /// Takes a metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> WorkerMetrics {
        let running = self.lock_runtime().is_some();
        let active = if running {
            self.counters
                .active
                .load(Ordering::SeqCst)
                .min(self.worker_count)
        } else {
            0
        };
        WorkerMetrics {
            worker_count: self.worker_count,
            active_workers: active,
            idle_workers: self.worker_count - active,
            total_processed: self.counters.processed.load(Ordering::Relaxed),
            total_failed: self.counters.failed.load(Ordering::Relaxed),
            total_rejected: self.counters.rejected.load(Ordering::Relaxed),
            total_processing_ms: self.counters.processing_ms.load(Ordering::Relaxed),
        }
    }
}

/// One worker: pull a message or observe shutdown, never starving either.
async fn worker_loop(
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<EmailMessage>>>,
    mut shutdown: watch::Receiver<bool>,
    processor: Arc<dyn MessageProcessor>,
    counters: Arc<Counters>,
    process_timeout: Duration,
) {
    tracing::debug!(worker_id, "worker started");
    loop {
        let message = tokio::select! {
            _ = shutdown.changed() => {
                tracing::debug!(worker_id, "worker observed shutdown");
                break;
            }
            received = async { rx.lock().await.recv().await } => match received {
                Some(message) => message,
                None => break,
            },
        };

        let guard = ActivityGuard::begin(&counters);
        let started = Instant::now();
        let outcome = tokio::time::timeout(process_timeout, processor.process_incoming(&message)).await;
        let elapsed = started.elapsed();
        counters.processing_ms.fetch_add(
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );

        match outcome {
            Ok(Ok(())) => {
                counters.processed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(worker_id, id = %message.id, ?elapsed, "message processed");
            }
            Ok(Err(err)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(worker_id, id = %message.id, error = %err, "processing failed");
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    worker_id,
                    id = %message.id,
                    timeout = ?process_timeout,
                    "processing timed out"
                );
            }
        }
        drop(guard);
    }
    tracing::debug!(worker_id, "worker exited");
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
    use async_trait::async_trait;

    use super::*;

    /// Processor that fails ids listed in `fail_ids` and can be slowed
    /// down to keep workers busy.
    struct ScriptedProcessor {
        fail_ids: Vec<String>,
        delay: Duration,
    }

    impl ScriptedProcessor {
        fn instant() -> Self {
            Self {
                fail_ids: Vec::new(),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl MessageProcessor for ScriptedProcessor {
        async fn process_incoming(&self, message: &EmailMessage) -> Result<()> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_ids.contains(&message.id) {
                Err(Error::Processing(format!("scripted failure for {}", message.id)))
            } else {
                Ok(())
            }
        }

        async fn process_outgoing(&self, _message: &EmailMessage) -> Result<()> {
            Ok(())
        }
    }

    fn pool(workers: usize, capacity: usize, processor: ScriptedProcessor) -> WorkerPool {
        WorkerPool::new(
            workers,
            capacity,
            Duration::from_secs(5),
            Arc::new(processor),
        )
        .unwrap()
    }

    async fn drain(pool: &WorkerPool, expected: u64) {
        loop {
            let metrics = pool.metrics();
            if metrics.total_processed + metrics.total_failed >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let processor = Arc::new(ScriptedProcessor::instant());
        assert!(WorkerPool::new(0, 4, Duration::from_secs(1), processor.clone()).is_err());
        assert!(WorkerPool::new(4, 0, Duration::from_secs(1), processor).is_err());
    }

    #[tokio::test]
    async fn test_submit_requires_running_pool() {
        let pool = pool(2, 4, ScriptedProcessor::instant());
        assert!(matches!(
            pool.submit(EmailMessage::new("1", "1@test")),
            Err(Error::PoolNotRunning)
        ));
        assert!(pool.health().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_processes_submitted_messages() {
        let pool = pool(3, 16, ScriptedProcessor::instant());
        pool.start().unwrap();
        assert!(pool.health().is_ok());

        for i in 0..10 {
            pool.submit(EmailMessage::new(format!("{i}"), format!("{i}@test")))
                .unwrap();
        }
        drain(&pool, 10).await;

        let metrics = pool.metrics();
        assert_eq!(metrics.total_processed, 10);
        assert_eq!(metrics.total_failed, 0);

        pool.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failures_are_counted_not_fatal() {
        let pool = pool(
            2,
            16,
            ScriptedProcessor {
                fail_ids: vec!["2".to_string()],
                delay: Duration::ZERO,
            },
        );
        pool.start().unwrap();

        for i in 0..5 {
            pool.submit(EmailMessage::new(format!("{i}"), format!("{i}@test")))
                .unwrap();
        }
        drain(&pool, 5).await;

        let metrics = pool.metrics();
        assert_eq!(metrics.total_processed, 4);
        assert_eq!(metrics.total_failed, 1);
        assert!(pool.health().is_ok(), "one bad message must not stop the pool");

        pool.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_rejects_when_full() {
        // One worker with a long delay: the channel fills up.
        let pool = pool(
            1,
            2,
            ScriptedProcessor {
                fail_ids: Vec::new(),
                delay: Duration::from_secs(60),
            },
        );
        pool.start().unwrap();

        let mut rejected = 0u32;
        for i in 0..8 {
            match pool.submit(EmailMessage::new(format!("{i}"), format!("{i}@test"))) {
                Ok(()) => {}
                Err(Error::WorkerQueueFull { capacity }) => {
                    assert_eq!(capacity, 2);
                    rejected += 1;
                }
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert!(rejected > 0, "channel of capacity 2 must reject some of 8");
        assert_eq!(u64::from(rejected), pool.metrics().total_rejected);

        // Wait until the worker has actually picked up a message so the
        // "mid-processing" precondition below holds before we stop.
        while pool.metrics().active_workers == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // Workers are mid-processing; stop must still return in time.
        let result = pool.stop(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert!(pool.health().is_err(), "pool reports not running after stop");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_active_idle_invariant() {
        let pool = pool(
            2,
            8,
            ScriptedProcessor {
                fail_ids: Vec::new(),
                delay: Duration::from_millis(20),
            },
        );
        pool.start().unwrap();

        for i in 0..6 {
            let _ = pool.submit(EmailMessage::new(format!("{i}"), format!("{i}@test")));
        }
        for _ in 0..50 {
            let metrics = pool.metrics();
            assert_eq!(
                metrics.active_workers + metrics.idle_workers,
                metrics.worker_count
            );
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        pool.stop(Duration::from_secs(5)).await.unwrap();
        let metrics = pool.metrics();
        assert_eq!(metrics.active_workers, 0);
        assert_eq!(metrics.idle_workers, metrics.worker_count);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_restart_after_stop() {
        let pool = pool(2, 8, ScriptedProcessor::instant());
        pool.start().unwrap();
        assert!(pool.start().is_err(), "double start is an invalid state");
        pool.stop(Duration::from_secs(5)).await.unwrap();
        assert!(pool.stop(Duration::from_secs(5)).await.is_err());

        pool.start().unwrap();
        pool.submit(EmailMessage::new("r", "r@test")).unwrap();
        drain(&pool, 1).await;
        pool.stop(Duration::from_secs(5)).await.unwrap();
    }
}
