//! Integration tests for the ingestion pipeline.
//!
//! These tests use mock gateway/processor collaborators to exercise the
//! full fetch→queue→dispatch path without a real mail server.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use mailsluice_pipeline::{
    EmailMessage, Error, FetchCriteria, IngestConfig, MailGateway, MailboxInfo, MessageProcessor,
    Pipeline, PipelineStatus, Poller, Result, ThreadQuery, ThreadSearchCriteria,
};

/// Gateway returning scripted fetch results, then empty batches.
struct ScriptedGateway {
    batches: Mutex<VecDeque<Result<Vec<EmailMessage>>>>,
    healthy: Mutex<bool>,
}

impl ScriptedGateway {
    fn new(batches: Vec<Result<Vec<EmailMessage>>>) -> Self {
        Self {
            batches: Mutex::new(batches.into_iter().collect()),
            healthy: Mutex::new(true),
        }
    }

    fn empty() -> Self {
        Self::new(Vec::new())
    }

    fn set_healthy(&self, healthy: bool) {
        *self.healthy.lock().unwrap() = healthy;
    }
}

#[async_trait]
impl MailGateway for ScriptedGateway {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        if *self.healthy.lock().unwrap() {
            Ok(())
        } else {
            Err(Error::Connection("gateway unreachable".to_string()))
        }
    }

    async fn fetch_messages(&self, _criteria: &FetchCriteria) -> Result<Vec<EmailMessage>> {
        self.batches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
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
            total: 0,
            unseen: 0,
        })
    }
}

/// Processor failing scripted ids, optionally slow.
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
            Err(Error::Processing(format!("rejected {}", message.id)))
        } else {
            Ok(())
        }
    }

    async fn process_outgoing(&self, _message: &EmailMessage) -> Result<()> {
        Ok(())
    }
}

fn batch(count: usize) -> Vec<EmailMessage> {
    (0..count)
        .map(|i| {
            let mut msg = EmailMessage::new(format!("{i}"), format!("{i}@example.com"));
            msg.subject = format!("message {i}");
            msg.mailbox = "INBOX".to_string();
            msg
        })
        .collect()
}

fn pipeline(gateway: ScriptedGateway, processor: ScriptedProcessor) -> Pipeline {
    Pipeline::builder(IngestConfig::new("gmail"))
        .gateway(Arc::new(gateway))
        .processor(Arc::new(processor))
        .build()
        .unwrap()
}

/// Polls until the worker pool has finished `expected` messages.
async fn drain(pipeline: &Pipeline, expected: u64) {
    loop {
        let workers = pipeline.metrics().workers;
        if workers.total_processed + workers.total_failed >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_batch() {
    let pipeline = pipeline(
        ScriptedGateway::new(vec![Ok(batch(5))]),
        ScriptedProcessor::instant(),
    );
    pipeline.start().await.unwrap();

    let report = pipeline.process_batch().await.unwrap();
    assert_eq!(report.fetched, 5);
    assert_eq!(report.enqueued, 5);
    assert_eq!(report.submitted, 5);
    assert_eq!(report.rejected, 0);

    drain(&pipeline, 5).await;
    let metrics = pipeline.metrics();
    assert_eq!(metrics.workers.total_processed, 5);
    assert_eq!(metrics.workers.total_failed, 0);
    assert_eq!(metrics.messages_fetched, 5);
    assert_eq!(metrics.batches_processed, 1);
    assert_eq!(metrics.queue.size, 0);

    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_batch_isolation_one_bad_message() {
    let pipeline = pipeline(
        ScriptedGateway::new(vec![Ok(batch(5))]),
        ScriptedProcessor {
            fail_ids: vec!["2".to_string()],
            delay: Duration::ZERO,
        },
    );
    pipeline.start().await.unwrap();

    let report = pipeline.process_batch().await.unwrap();
    assert_eq!(report.submitted, 5, "submission happens before processing");

    drain(&pipeline, 5).await;
    let metrics = pipeline.metrics();
    assert_eq!(metrics.workers.total_processed, 4);
    assert_eq!(metrics.workers.total_failed, 1);
    assert_eq!(
        pipeline.status().status,
        PipelineStatus::Running,
        "a single bad message must not stop the pipeline"
    );

    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_fetch_failure_aborts_only_that_batch() {
    let pipeline = pipeline(
        ScriptedGateway::new(vec![
            Err(Error::Auth("bad credentials".to_string())),
            Ok(batch(2)),
        ]),
        ScriptedProcessor::instant(),
    );
    pipeline.start().await.unwrap();

    // Permanent failure: no retries, batch aborts.
    let err = pipeline.process_batch().await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)));

    let status = pipeline.status();
    assert_eq!(status.status, PipelineStatus::Running);
    assert!(status.last_error.unwrap().contains("fetch"));
    assert_eq!(pipeline.metrics().batches_failed, 1);

    // The next scheduled batch gets a fresh attempt.
    let report = pipeline.process_batch().await.unwrap();
    assert_eq!(report.fetched, 2);

    drain(&pipeline, 2).await;
    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_transient_fetch_failure_is_retried() {
    let pipeline = pipeline(
        ScriptedGateway::new(vec![
            Err(Error::ServerUnavailable("blip".to_string())),
            Ok(batch(1)),
        ]),
        ScriptedProcessor::instant(),
    );
    pipeline.start().await.unwrap();

    // The retry manager absorbs the transient error within the same batch.
    let report = pipeline.process_batch().await.unwrap();
    assert_eq!(report.fetched, 1);
    assert_eq!(pipeline.metrics().batches_failed, 0);

    drain(&pipeline, 1).await;
    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn test_process_batch_requires_running() {
    let pipeline = pipeline(ScriptedGateway::empty(), ScriptedProcessor::instant());
    let err = pipeline.process_batch().await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[tokio::test]
async fn test_start_fails_fast_on_unhealthy_gateway() {
    let gateway = ScriptedGateway::empty();
    gateway.set_healthy(false);
    let pipeline = pipeline(gateway, ScriptedProcessor::instant());

    let err = pipeline.start().await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)));

    // No partial start: still created, workers never spawned.
    assert_eq!(pipeline.status().status, PipelineStatus::Created);
    let health = pipeline.health().await;
    assert!(!health.healthy);
    let worker = health
        .components
        .iter()
        .find(|c| c.name == "worker_pool")
        .unwrap();
    assert!(!worker.healthy);
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_transitions_are_enforced() {
    let pipeline = pipeline(ScriptedGateway::empty(), ScriptedProcessor::instant());

    // Stop before start is illegal.
    assert!(matches!(
        pipeline.stop().await,
        Err(Error::InvalidState(_))
    ));

    pipeline.start().await.unwrap();
    assert!(matches!(
        pipeline.start().await,
        Err(Error::InvalidState(_))
    ));

    pipeline.stop().await.unwrap();
    assert_eq!(pipeline.status().status, PipelineStatus::Stopped);

    // Stopped is terminal.
    assert!(matches!(
        pipeline.start().await,
        Err(Error::InvalidState(_))
    ));
    assert!(matches!(
        pipeline.stop().await,
        Err(Error::InvalidState(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stop_with_busy_workers_honors_deadline() {
    let pipeline = pipeline(
        ScriptedGateway::new(vec![Ok(batch(3))]),
        ScriptedProcessor {
            fail_ids: Vec::new(),
            // Far beyond the process timeout; workers stay busy.
            delay: Duration::from_secs(3600),
        },
    );
    pipeline.start().await.unwrap();
    pipeline.process_batch().await.unwrap();

    // Workers are mid-processing; stop must still complete.
    let started = tokio::time::Instant::now();
    pipeline.stop().await.unwrap();
    assert!(started.elapsed() <= Duration::from_secs(31));

    assert_eq!(pipeline.status().status, PipelineStatus::Stopped);
    let health = pipeline.health().await;
    assert!(!health.healthy);
    for name in ["worker_pool", "queue"] {
        let component = health.components.iter().find(|c| c.name == name).unwrap();
        assert!(!component.healthy, "{name} must report stopped");
    }
}

#[tokio::test(start_paused = true)]
async fn test_poller_drives_batches() {
    let pipeline = Arc::new(pipeline(
        ScriptedGateway::new(vec![Ok(batch(2)), Ok(batch(1))]),
        ScriptedProcessor::instant(),
    ));
    pipeline.start().await.unwrap();

    let poller = Poller::new(Arc::clone(&pipeline), Duration::from_secs(1)).spawn();
    tokio::time::sleep(Duration::from_secs(5)).await;
    poller.stop().await;

    let metrics = pipeline.metrics();
    assert!(
        metrics.batches_processed >= 2,
        "poller must have driven several batches, got {}",
        metrics.batches_processed
    );
    assert_eq!(metrics.messages_fetched, 3);

    drain(&pipeline, 3).await;
    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_provider_resolution_shapes_the_pipeline() {
    // A raw hostname resolves by substring to the yandex strategy.
    let pipeline = Pipeline::builder(IngestConfig::new("imap.yandex.ru"))
        .gateway(Arc::new(ScriptedGateway::empty()))
        .processor(Arc::new(ScriptedProcessor::instant()))
        .build()
        .unwrap();

    assert_eq!(pipeline.metrics().workers.worker_count, 4);
    assert_eq!(pipeline.metrics().queue.capacity, 100);

    // Unknown providers get the generic fallback.
    let fallback = Pipeline::builder(IngestConfig::new("mail.example.org"))
        .gateway(Arc::new(ScriptedGateway::empty()))
        .processor(Arc::new(ScriptedProcessor::instant()))
        .build()
        .unwrap();
    assert_eq!(fallback.metrics().queue.capacity, 100);
    assert_eq!(fallback.metrics().workers.worker_count, 4);
}

#[tokio::test(start_paused = true)]
async fn test_thread_fetch_through_the_fetcher() {
    let pipeline = pipeline(ScriptedGateway::empty(), ScriptedProcessor::instant());
    pipeline.start().await.unwrap();

    let criteria = ThreadSearchCriteria::new("<root@example.com>", "INBOX")
        .parent("<parent@example.com>")
        .subject("hello");
    let thread = pipeline.fetcher().fetch_thread(&criteria).await.unwrap();

    // The scripted gateway echoes the normalized query ids.
    assert_eq!(thread.len(), 2);
    assert_eq!(thread[0].id, "root@example.com");

    pipeline.stop().await.unwrap();
}

mod properties {
    use proptest::prelude::*;

    use super::*;
    use mailsluice_pipeline::{GmailSearchStrategy, MessageQueue, SearchStrategy};

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Queue size never exceeds capacity or goes negative, and the
        /// counters always reconcile, for arbitrary operation sequences.
        #[test]
        fn queue_counters_reconcile(ops in proptest::collection::vec((1usize..=5, 0usize..=5), 1..20)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            rt.block_on(async move {
                let queue = MessageQueue::new(8).unwrap();
                for (enq, deq) in ops {
                    let msgs: Vec<EmailMessage> = (0..enq)
                        .map(|i| EmailMessage::new(format!("{i}"), format!("{i}@p")))
                        .collect();
                    let _ = tokio::time::timeout(Duration::from_millis(5), queue.enqueue(msgs)).await;
                    let _ = tokio::time::timeout(Duration::from_millis(5), queue.dequeue(deq)).await;

                    let metrics = queue.metrics();
                    prop_assert!(metrics.size <= metrics.capacity);
                    prop_assert_eq!(
                        metrics.total_enqueued - metrics.total_dequeued,
                        metrics.size as u64
                    );
                }
                Ok(())
            })?;
        }

        /// Thread queries never exceed the id cap, never contain
        /// duplicates, and never leak envelope brackets.
        #[test]
        fn thread_query_ids_are_normalized(
            primary in "[a-z]{1,8}@[a-z]{1,8}",
            parent in proptest::option::of("[a-z]{1,8}@[a-z]{1,8}"),
            ancestors in proptest::collection::vec("[a-z]{1,8}@[a-z]{1,8}", 0..20),
        ) {
            let mut strategy = GmailSearchStrategy::new();
            strategy.configure(GmailSearchStrategy::default_tuning());

            let mut criteria = ThreadSearchCriteria::new(format!("<{primary}>"), "INBOX")
                .ancestors(ancestors.iter().map(|a| format!("<{a}>")).collect());
            if let Some(parent) = parent {
                criteria = criteria.parent(format!("<{parent}>"));
            }

            let query = strategy.thread_query(&criteria).unwrap();
            prop_assert!(query.message_ids.len() <= strategy.max_message_ids());
            prop_assert_eq!(query.message_ids[0].clone(), primary);
            for id in &query.message_ids {
                prop_assert!(!id.contains('<') && !id.contains('>'));
            }
            let mut deduped = query.message_ids.clone();
            deduped.sort();
            deduped.dedup();
            prop_assert_eq!(deduped.len(), query.message_ids.len());
        }
    }
}
