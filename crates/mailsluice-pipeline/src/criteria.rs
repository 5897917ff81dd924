//! Fetch and thread-search criteria.
//!
//! Both types are immutable values constructed per call. [`FetchCriteria`]
//! drives ordinary polling; [`ThreadSearchCriteria`] is used only when
//! resolving a whole conversation thread.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Criteria for fetching one batch of messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchCriteria {
    /// Only messages received at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Provider-specific monotonic cursor (e.g. last seen UID) to resume
    /// from. Takes precedence over `since` where the provider supports it.
    pub since_cursor: Option<String>,
    /// Target mailbox.
    pub mailbox: String,
    /// Maximum number of messages to return.
    pub max_results: usize,
    /// Restrict to unseen messages.
    pub unseen_only: bool,
    /// Optional substring filter on the subject.
    pub subject_filter: Option<String>,
}

impl FetchCriteria {
    /// Creates a criteria builder for the given mailbox.
    #[must_use]
    pub fn builder(mailbox: impl Into<String>) -> FetchCriteriaBuilder {
        FetchCriteriaBuilder::new(mailbox)
    }
}

/// Builder for [`FetchCriteria`].
#[derive(Debug, Clone)]
pub struct FetchCriteriaBuilder {
    since: Option<DateTime<Utc>>,
    since_cursor: Option<String>,
    mailbox: String,
    max_results: usize,
    unseen_only: bool,
    subject_filter: Option<String>,
}

impl FetchCriteriaBuilder {
    /// Creates a new builder targeting the given mailbox.
    #[must_use]
    pub fn new(mailbox: impl Into<String>) -> Self {
        Self {
            since: None,
            since_cursor: None,
            mailbox: mailbox.into(),
            max_results: 50,
            unseen_only: true,
            subject_filter: None,
        }
    }

    /// Only fetch messages received at or after `since`.
    #[must_use]
    pub const fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Resume from a provider-specific cursor.
    #[must_use]
    pub fn since_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.since_cursor = Some(cursor.into());
        self
    }

    /// Sets the maximum batch size.
    #[must_use]
    pub const fn max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    /// Restrict to unseen messages (default) or include seen ones.
    #[must_use]
    pub const fn unseen_only(mut self, unseen: bool) -> Self {
        self.unseen_only = unseen;
        self
    }

    /// Only fetch messages whose subject contains `filter`.
    #[must_use]
    pub fn subject_filter(mut self, filter: impl Into<String>) -> Self {
        self.subject_filter = Some(filter.into());
        self
    }

    /// Builds the criteria.
    #[must_use]
    pub fn build(self) -> FetchCriteria {
        FetchCriteria {
            since: self.since,
            since_cursor: self.since_cursor,
            mailbox: self.mailbox,
            max_results: self.max_results,
            unseen_only: self.unseen_only,
            subject_filter: self.subject_filter,
        }
    }
}

/// Criteria for locating the rest of an email thread.
///
/// Correlation ids are collected by priority: the primary id first, then
/// the parent id, then ancestor ids. How many of them actually reach the
/// provider is decided by the active
/// [`SearchStrategy`](crate::strategy::SearchStrategy).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSearchCriteria {
    /// The message id anchoring the thread (usually the newest message).
    pub message_id: String,
    /// The `In-Reply-To` id of the anchoring message, if any.
    pub parent_id: Option<String>,
    /// Ancestor ids from the `References` header, oldest first.
    pub ancestor_ids: Vec<String>,
    /// Subject of the anchoring message.
    pub subject: String,
    /// Mailbox to search in.
    pub mailbox: String,
}

impl ThreadSearchCriteria {
    /// Creates criteria anchored on a single message id.
    #[must_use]
    pub fn new(message_id: impl Into<String>, mailbox: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            parent_id: None,
            ancestor_ids: Vec::new(),
            subject: String::new(),
            mailbox: mailbox.into(),
        }
    }

    /// Derives thread criteria from a fetched message.
    #[must_use]
    pub fn for_message(message: &crate::message::EmailMessage) -> Self {
        Self {
            message_id: message.message_id.clone(),
            parent_id: message.in_reply_to.clone(),
            ancestor_ids: message.references.clone(),
            subject: message.subject.clone(),
            mailbox: message.mailbox.clone(),
        }
    }

    /// Sets the parent id.
    #[must_use]
    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Sets the ancestor ids (oldest first).
    #[must_use]
    pub fn ancestors(mut self, ids: Vec<String>) -> Self {
        self.ancestor_ids = ids;
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
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
    use crate::message::EmailMessage;

    #[test]
    fn test_fetch_criteria_builder_defaults() {
        let criteria = FetchCriteria::builder("INBOX").build();
        assert_eq!(criteria.mailbox, "INBOX");
        assert_eq!(criteria.max_results, 50);
        assert!(criteria.unseen_only);
        assert!(criteria.since.is_none());
        assert!(criteria.subject_filter.is_none());
    }

    #[test]
    fn test_fetch_criteria_builder() {
        let criteria = FetchCriteria::builder("Support")
            .max_results(20)
            .unseen_only(false)
            .since_cursor("uid:1042")
            .subject_filter("[ticket]")
            .build();

        assert_eq!(criteria.mailbox, "Support");
        assert_eq!(criteria.max_results, 20);
        assert!(!criteria.unseen_only);
        assert_eq!(criteria.since_cursor.as_deref(), Some("uid:1042"));
        assert_eq!(criteria.subject_filter.as_deref(), Some("[ticket]"));
    }

    #[test]
    fn test_thread_criteria_for_message() {
        let mut msg = EmailMessage::new("7", "newest@example.com");
        msg.in_reply_to = Some("middle@example.com".to_string());
        msg.references = vec!["root@example.com".to_string(), "middle@example.com".to_string()];
        msg.subject = "Printer on fire".to_string();
        msg.mailbox = "INBOX".to_string();

        let criteria = ThreadSearchCriteria::for_message(&msg);
        assert_eq!(criteria.message_id, "newest@example.com");
        assert_eq!(criteria.parent_id.as_deref(), Some("middle@example.com"));
        assert_eq!(criteria.ancestor_ids.len(), 2);
        assert_eq!(criteria.subject, "Printer on fire");
    }
}
