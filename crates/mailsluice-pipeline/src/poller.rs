//! Timer-driven batch polling.
//!
//! The poller is the pipeline's external driver: a plain interval task
//! that calls [`Pipeline::process_batch`] each tick and logs the
//! outcome. It never reaches into the fetcher, queue or worker pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::pipeline::Pipeline;

/// Interval driver for a running [`Pipeline`].
#[derive(Debug)]
pub struct Poller {
    pipeline: Arc<Pipeline>,
    interval: Duration,
}

/// Handle to a spawned poller task.
#[derive(Debug)]
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Poller {
    /// Creates a poller ticking every `interval`.
    #[must_use]
    pub const fn new(pipeline: Arc<Pipeline>, interval: Duration) -> Self {
        Self { pipeline, interval }
    }

    /// Spawns the polling loop.
    ///
    /// Ticks lost while a slow batch is in flight are skipped rather
    /// than bursted afterwards.
    #[must_use]
    pub fn spawn(self) -> PollerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let Self { pipeline, interval } = self;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(?interval, "poller started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        match pipeline.process_batch().await {
                            Ok(report) => {
                                if report.fetched > 0 {
                                    tracing::info!(
                                        fetched = report.fetched,
                                        submitted = report.submitted,
                                        rejected = report.rejected,
                                        "poll tick"
                                    );
                                }
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "poll tick failed");
                            }
                        }
                    }
                }
            }
            tracing::info!("poller stopped");
        });

        PollerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

impl PollerHandle {
    /// Signals the poller to stop and waits for the loop to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    /// Whether the polling task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
