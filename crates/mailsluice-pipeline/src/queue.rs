//! Bounded blocking message queue.
//!
//! This is the pipeline's primary backpressure stage: a slow worker pool
//! fills the queue and stalls the fetcher; an empty queue idles the
//! consumers. Both directions block by waiting, never by polling.
//!
//! ## Concurrency discipline
//!
//! A single mutex guards the buffer; two [`Notify`] values provide the
//! condition-variable semantics (`space_freed` wakes blocked producers,
//! `messages_ready` wakes blocked consumers). Waiters register with the
//! notifier *before* releasing the buffer lock, so a notification fired
//! between unlock and await cannot be missed.
//!
//! All waits are cancel-safe: dropping a blocked `enqueue`/`dequeue`
//! future (for instance from `tokio::time::timeout`) abandons the wait
//! without enqueuing or removing anything.

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::message::EmailMessage;

/// Read-only snapshot of queue counters and gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    /// Configured capacity.
    pub capacity: usize,
    /// Messages currently buffered.
    pub size: usize,
    /// Messages ever enqueued.
    pub total_enqueued: u64,
    /// Messages ever dequeued.
    pub total_dequeued: u64,
    /// Messages dropped by [`MessageQueue::clear`].
    pub total_cleared: u64,
    /// Whether the queue has been closed.
    pub closed: bool,
}

#[derive(Debug)]
struct QueueState {
    buffer: VecDeque<EmailMessage>,
    closed: bool,
    total_enqueued: u64,
    total_dequeued: u64,
    total_cleared: u64,
}

/// Bounded FIFO buffer between the fetcher and the worker pool.
#[derive(Debug)]
pub struct MessageQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    space_freed: tokio::sync::Notify,
    messages_ready: tokio::sync::Notify,
}

impl MessageQueue {
    /// Creates a queue with the given capacity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for a zero capacity.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Configuration(
                "queue capacity must be positive".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            state: Mutex::new(QueueState {
                buffer: VecDeque::with_capacity(capacity),
                closed: false,
                total_enqueued: 0,
                total_dequeued: 0,
                total_cleared: 0,
            }),
            space_freed: tokio::sync::Notify::new(),
            messages_ready: tokio::sync::Notify::new(),
        })
    }

    /// Locks the buffer, recovering from a poisoned lock.
    ///
    /// State mutations never panic mid-update, so a poisoned guard still
    /// holds a consistent buffer.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues a batch, waiting until the queue has room for all of it.
    ///
    /// The batch is appended atomically: either every message is buffered
    /// or none is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BatchExceedsCapacity`] when the batch could never
    /// fit, and [`Error::QueueClosed`] when the queue is closed before or
    /// while waiting.
    pub async fn enqueue(&self, batch: Vec<EmailMessage>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        if batch.len() > self.capacity {
            return Err(Error::BatchExceedsCapacity {
                requested: batch.len(),
                capacity: self.capacity,
            });
        }

        let mut batch = batch;
        loop {
            let mut notified = pin!(self.space_freed.notified());
            {
                let mut state = self.lock();
                if state.closed {
                    return Err(Error::QueueClosed);
                }
                if self.capacity - state.buffer.len() >= batch.len() {
                    state.total_enqueued += batch.len() as u64;
                    state.buffer.extend(batch.drain(..));
                    drop(state);
                    self.messages_ready.notify_waiters();
                    return Ok(());
                }
                // Register before unlocking so a dequeue between unlock
                // and await cannot slip past unobserved.
                notified.as_mut().enable();
            }
            notified.await;
        }
    }

    /// Dequeues up to `max_batch` messages, waiting while the queue is
    /// empty.
    ///
    /// A partial batch (`min(max_batch, available)`) is a normal outcome,
    /// not an error. On a closed queue, buffered messages are drained
    /// first; only an empty closed queue reports closure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueClosed`] once the queue is closed and empty.
    pub async fn dequeue(&self, max_batch: usize) -> Result<Vec<EmailMessage>> {
        if max_batch == 0 {
            return Ok(Vec::new());
        }

        loop {
            let mut notified = pin!(self.messages_ready.notified());
            {
                let mut state = self.lock();
                if !state.buffer.is_empty() {
                    let count = max_batch.min(state.buffer.len());
                    let drained: Vec<EmailMessage> = state.buffer.drain(..count).collect();
                    state.total_dequeued += count as u64;
                    drop(state);
                    self.space_freed.notify_waiters();
                    return Ok(drained);
                }
                if state.closed {
                    return Err(Error::QueueClosed);
                }
                notified.as_mut().enable();
            }
            notified.await;
        }
    }

    /// Number of messages currently buffered.
    #[must_use]
    pub fn size(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discards all buffered messages and wakes blocked producers.
    pub fn clear(&self) {
        let dropped = {
            let mut state = self.lock();
            let dropped = state.buffer.len();
            state.total_cleared += dropped as u64;
            state.buffer.clear();
            dropped
        };
        if dropped > 0 {
            tracing::debug!(dropped, "cleared message queue");
        }
        self.space_freed.notify_waiters();
    }

    /// Closes the queue. Irreversible; all current and future waiters
    /// fail with [`Error::QueueClosed`].
    pub fn close(&self) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        tracing::debug!("message queue closed");
        self.space_freed.notify_waiters();
        self.messages_ready.notify_waiters();
    }

    /// Reports whether the queue is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueClosed`] once the queue is closed.
    pub fn health(&self) -> Result<()> {
        if self.lock().closed {
            Err(Error::QueueClosed)
        } else {
            Ok(())
        }
    }

    /// Takes a metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> QueueMetrics {
        let state = self.lock();
        QueueMetrics {
            capacity: self.capacity,
            size: state.buffer.len(),
            total_enqueued: state.total_enqueued,
            total_dequeued: state.total_dequeued,
            total_cleared: state.total_cleared,
            closed: state.closed,
        }
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
    use std::time::Duration;

    use super::*;

    fn batch(prefix: &str, count: usize) -> Vec<EmailMessage> {
        (0..count)
            .map(|i| EmailMessage::new(format!("{prefix}-{i}"), format!("{prefix}-{i}@test")))
            .collect()
    }

    #[tokio::test]
    async fn test_enqueue_dequeue_fifo() {
        let queue = MessageQueue::new(10).unwrap();
        queue.enqueue(batch("a", 3)).await.unwrap();

        let first = queue.dequeue(2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].id, "a-0");
        assert_eq!(first[1].id, "a-1");

        // Partial batch: only one message left.
        let rest = queue.dequeue(5).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, "a-2");
    }

    #[tokio::test]
    async fn test_oversized_batch_fails_fast() {
        let queue = MessageQueue::new(4).unwrap();
        let err = queue.enqueue(batch("a", 5)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::BatchExceedsCapacity {
                requested: 5,
                capacity: 4
            }
        ));
    }

    #[tokio::test]
    async fn test_enqueue_blocks_until_space() {
        let queue = Arc::new(MessageQueue::new(10).unwrap());
        queue.enqueue(batch("a", 8)).await.unwrap();
        assert_eq!(queue.size(), 8);

        // A 5-message batch does not fit; the producer must block.
        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.enqueue(batch("b", 5)).await })
        };
        tokio::task::yield_now().await;
        assert!(!producer.is_finished());

        // Freeing 3 slots admits the whole batch (8 - 3 + 5 = 10).
        let drained = queue.dequeue(3).await.unwrap();
        assert_eq!(drained.len(), 3);

        producer.await.unwrap().unwrap();

        let metrics = queue.metrics();
        assert_eq!(metrics.total_enqueued, 13);
        assert_eq!(metrics.total_dequeued, 3);
        assert_eq!(metrics.size, 10);
        assert_eq!(
            metrics.total_enqueued - metrics.total_dequeued,
            metrics.size as u64
        );
    }

    #[tokio::test]
    async fn test_dequeue_blocks_until_messages() {
        let queue = Arc::new(MessageQueue::new(4).unwrap());

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue(4).await })
        };
        tokio::task::yield_now().await;
        assert!(!consumer.is_finished());

        queue.enqueue(batch("a", 2)).await.unwrap();
        let drained = consumer.await.unwrap().unwrap();
        assert_eq!(drained.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_enqueue_cancels_within_bound() {
        let queue = Arc::new(MessageQueue::new(2).unwrap());
        queue.enqueue(batch("a", 2)).await.unwrap();

        let started = tokio::time::Instant::now();
        let result =
            tokio::time::timeout(Duration::from_millis(50), queue.enqueue(batch("b", 1))).await;
        assert!(result.is_err(), "blocked enqueue must be cancellable");
        assert!(started.elapsed() < Duration::from_millis(100));

        // The abandoned wait must not have enqueued anything.
        assert_eq!(queue.size(), 2);
        assert_eq!(queue.metrics().total_enqueued, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_dequeue_cancels_within_bound() {
        let queue = MessageQueue::new(2).unwrap();

        let started = tokio::time::Instant::now();
        let result = tokio::time::timeout(Duration::from_millis(50), queue.dequeue(1)).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(queue.metrics().total_dequeued, 0);
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_producer() {
        let queue = Arc::new(MessageQueue::new(1).unwrap());
        queue.enqueue(batch("a", 1)).await.unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.enqueue(batch("b", 1)).await })
        };
        tokio::task::yield_now().await;

        queue.close();
        let result = producer.await.unwrap();
        assert!(matches!(result, Err(Error::QueueClosed)));
    }

    #[tokio::test]
    async fn test_close_drains_then_fails() {
        let queue = MessageQueue::new(4).unwrap();
        queue.enqueue(batch("a", 2)).await.unwrap();
        queue.close();

        assert!(queue.health().is_err());
        assert!(matches!(queue.enqueue(batch("b", 1)).await, Err(Error::QueueClosed)));

        // Buffered messages survive closing and drain normally.
        assert_eq!(queue.dequeue(10).await.unwrap().len(), 2);
        assert!(matches!(queue.dequeue(1).await, Err(Error::QueueClosed)));
    }

    #[tokio::test]
    async fn test_clear_frees_space() {
        let queue = Arc::new(MessageQueue::new(2).unwrap());
        queue.enqueue(batch("a", 2)).await.unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.enqueue(batch("b", 2)).await })
        };
        tokio::task::yield_now().await;

        queue.clear();
        producer.await.unwrap().unwrap();

        let metrics = queue.metrics();
        assert_eq!(metrics.size, 2);
        assert_eq!(metrics.total_cleared, 2);
        assert_eq!(metrics.total_enqueued, 4);
    }

    #[tokio::test]
    async fn test_concurrent_producers_consumers_preserve_count() {
        let queue = Arc::new(MessageQueue::new(8).unwrap());
        let mut tasks = Vec::new();

        for p in 0..4 {
            let queue = Arc::clone(&queue);
            tasks.push(tokio::spawn(async move {
                for i in 0..5 {
                    queue.enqueue(batch(&format!("p{p}-{i}"), 3)).await.unwrap();
                }
            }));
        }

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let mut seen = 0usize;
                while seen < 4 * 5 * 3 {
                    let drained = queue.dequeue(4).await.unwrap();
                    assert!(drained.len() <= 4);
                    seen += drained.len();
                    assert!(queue.size() <= queue.capacity());
                }
                seen
            })
        };

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(consumer.await.unwrap(), 60);

        let metrics = queue.metrics();
        assert_eq!(metrics.total_enqueued, 60);
        assert_eq!(metrics.total_dequeued, 60);
        assert_eq!(metrics.size, 0);
    }
}
