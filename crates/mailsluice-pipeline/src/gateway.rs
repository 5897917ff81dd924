//! Capability boundaries to the outside world.
//!
//! The pipeline never parses wire protocol and never contains business
//! logic. Everything provider-facing goes through [`MailGateway`];
//! everything domain-facing goes through [`MessageProcessor`]. Both are
//! object-safe async traits so the composition root can plug in an IMAP
//! client, an HTTP API client, or a test double without touching the
//! pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::criteria::FetchCriteria;
use crate::error::Result;
use crate::message::EmailMessage;
use crate::strategy::ThreadQuery;

/// Status summary of a mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxInfo {
    /// Mailbox name.
    pub name: String,
    /// Total number of messages.
    pub total: u64,
    /// Number of unseen messages.
    pub unseen: u64,
}

/// Access to an external mailbox provider.
///
/// Implementations own connection management, protocol parsing and
/// provider authentication. All methods are expected to be safe to call
/// concurrently; the pipeline bounds each call with the active strategy's
/// timeouts.
#[async_trait]
pub trait MailGateway: Send + Sync {
    /// Establishes the provider connection.
    async fn connect(&self) -> Result<()>;

    /// Tears down the provider connection.
    async fn disconnect(&self) -> Result<()>;

    /// Verifies the provider is reachable and the session is usable.
    async fn health_check(&self) -> Result<()>;

    /// Fetches messages matching the criteria, up to
    /// [`FetchCriteria::max_results`].
    async fn fetch_messages(&self, criteria: &FetchCriteria) -> Result<Vec<EmailMessage>>;

    /// Searches for the messages of a thread using a provider-safe query.
    async fn search_thread_messages(&self, query: &ThreadQuery) -> Result<Vec<EmailMessage>>;

    /// Sends an outgoing message.
    async fn send_message(&self, message: &EmailMessage) -> Result<()>;

    /// Marks a message as read.
    async fn mark_as_read(&self, message_id: &str) -> Result<()>;

    /// Lists available mailboxes.
    async fn list_mailboxes(&self) -> Result<Vec<String>>;

    /// Selects the mailbox subsequent operations apply to.
    async fn select_mailbox(&self, mailbox: &str) -> Result<()>;

    /// Returns status counters for a mailbox.
    async fn mailbox_info(&self, mailbox: &str) -> Result<MailboxInfo>;
}

/// Consumer of pipeline output.
///
/// Invoked once per message by each worker. Ticket creation,
/// deduplication and any other business rules live entirely behind this
/// trait.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Processes one inbound message.
    async fn process_incoming(&self, message: &EmailMessage) -> Result<()>;

    /// Processes one outbound message.
    async fn process_outgoing(&self, message: &EmailMessage) -> Result<()>;
}

/// A processor that logs each message and does nothing else.
///
/// Useful as a placeholder while wiring a deployment, and in examples.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingProcessor;

#[async_trait]
impl MessageProcessor for LoggingProcessor {
    async fn process_incoming(&self, message: &EmailMessage) -> Result<()> {
        tracing::info!(id = %message.id, subject = %message.subject, "incoming message");
        Ok(())
    }

    async fn process_outgoing(&self, message: &EmailMessage) -> Result<()> {
        tracing::info!(id = %message.id, subject = %message.subject, "outgoing message");
        Ok(())
    }
}
