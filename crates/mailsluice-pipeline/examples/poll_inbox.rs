//! Runs the pipeline against an in-memory gateway.
//!
//! ```sh
//! cargo run --example poll_inbox
//! ```

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use mailsluice_pipeline::{
    EmailMessage, FetchCriteria, IngestConfig, LoggingProcessor, MailGateway, MailboxInfo,
    Pipeline, Poller, Result, ThreadQuery,
};

/// Gateway serving a fixed set of messages from memory.
struct MemoryGateway {
    inbox: Mutex<Vec<EmailMessage>>,
}

impl MemoryGateway {
    fn with_messages(count: usize) -> Self {
        let inbox = (0..count)
            .map(|i| {
                let mut msg = EmailMessage::new(format!("{i}"), format!("{i}@example.com"));
                msg.subject = format!("Hello #{i}");
                msg.from = "sender@example.com".to_string();
                msg.mailbox = "INBOX".to_string();
                msg
            })
            .collect();
        Self {
            inbox: Mutex::new(inbox),
        }
    }
}

#[async_trait]
impl MailGateway for MemoryGateway {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_messages(&self, criteria: &FetchCriteria) -> Result<Vec<EmailMessage>> {
        let mut inbox = self.inbox.lock().unwrap();
        let take = criteria.max_results.min(inbox.len());
        Ok(inbox.drain(..take).collect())
    }

    async fn search_thread_messages(&self, _query: &ThreadQuery) -> Result<Vec<EmailMessage>> {
        Ok(Vec::new())
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
        let total = self.inbox.lock().unwrap().len() as u64;
        Ok(MailboxInfo {
            name: mailbox.to_string(),
            total,
            unseen: total,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mailsluice_pipeline=debug".into()),
        )
        .init();

    let mut config = IngestConfig::new("imap.example.org");
    config.poll_interval_secs = 1;

    let pipeline = Arc::new(
        Pipeline::builder(config.clone())
            .gateway(Arc::new(MemoryGateway::with_messages(120)))
            .processor(Arc::new(LoggingProcessor))
            .build()?,
    );
    pipeline.start().await?;

    let poller = Poller::new(Arc::clone(&pipeline), config.poll_interval()).spawn();
    tokio::time::sleep(Duration::from_secs(6)).await;
    poller.stop().await;

    let metrics = pipeline.metrics();
    println!(
        "fetched={} processed={} failed={} batches={}",
        metrics.messages_fetched,
        metrics.workers.total_processed,
        metrics.workers.total_failed,
        metrics.batches_processed,
    );

    pipeline.stop().await?;
    Ok(())
}
