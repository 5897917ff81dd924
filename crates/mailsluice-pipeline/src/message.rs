//! The message value type that flows through the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An email message as seen by the pipeline.
///
/// This is the normalized, provider-independent form produced by the mail
/// gateway. Wire-level details (MIME structure, raw headers) never cross
/// into the pipeline; only the fields the pipeline and its processors need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Provider-assigned identifier (UID or equivalent), unique within a
    /// mailbox.
    pub id: String,
    /// RFC 5322 `Message-ID` header, without envelope angle brackets.
    pub message_id: String,
    /// `In-Reply-To` header, if present.
    pub in_reply_to: Option<String>,
    /// `References` header ids, oldest first.
    pub references: Vec<String>,
    /// Message subject.
    pub subject: String,
    /// Sender address.
    pub from: String,
    /// Primary recipient address.
    pub to: String,
    /// Mailbox the message was fetched from.
    pub mailbox: String,
    /// When the message was received by the provider.
    pub received_at: DateTime<Utc>,
    /// Whether the message has been read.
    pub seen: bool,
    /// Short plain-text preview of the body.
    pub snippet: String,
}

impl EmailMessage {
    /// Creates a message with the given identifiers and empty metadata.
    ///
    /// Intended for gateways that fill remaining fields afterwards, and for
    /// tests.
    #[must_use]
    pub fn new(id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message_id: message_id.into(),
            in_reply_to: None,
            references: Vec::new(),
            subject: String::new(),
            from: String::new(),
            to: String::new(),
            mailbox: String::new(),
            received_at: Utc::now(),
            seen: false,
            snippet: String::new(),
        }
    }

    /// Returns `true` if the message carries any thread-correlation ids.
    ///
    /// A message without a message id, reply id, or references cannot be
    /// joined to a conversation and is always treated as a thread root.
    #[must_use]
    pub fn has_correlation(&self) -> bool {
        !self.message_id.is_empty() || self.in_reply_to.is_some() || !self.references.is_empty()
    }

    /// Returns `true` if the message is a reply to another message.
    #[must_use]
    pub const fn is_reply(&self) -> bool {
        self.in_reply_to.is_some()
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
    fn test_new_message_defaults() {
        let msg = EmailMessage::new("42", "abc@example.com");
        assert_eq!(msg.id, "42");
        assert_eq!(msg.message_id, "abc@example.com");
        assert!(msg.references.is_empty());
        assert!(!msg.seen);
    }

    #[test]
    fn test_has_correlation() {
        let mut msg = EmailMessage::new("1", "");
        assert!(!msg.has_correlation());

        msg.in_reply_to = Some("parent@example.com".to_string());
        assert!(msg.has_correlation());
        assert!(msg.is_reply());

        let threaded = EmailMessage::new("2", "child@example.com");
        assert!(threaded.has_correlation());
        assert!(!threaded.is_reply());
    }
}
