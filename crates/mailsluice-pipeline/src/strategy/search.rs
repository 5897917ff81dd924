//! Thread-search strategies.
//!
//! A search strategy translates [`ThreadSearchCriteria`] into a
//! [`ThreadQuery`] the provider will actually accept. Correlation ids are
//! collected by priority (primary, then parent, then ancestors newest
//! first), normalized, deduplicated and capped at the provider's limit;
//! the search window is bounded by the provider's timeframe.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use super::SearchComplexity;
use crate::criteria::ThreadSearchCriteria;
use crate::error::{Error, Result};

/// A provider-safe thread-search query.
///
/// This is what crosses the gateway boundary: only ids and terms the
/// provider is known to tolerate, already normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadQuery {
    /// Correlation ids to match, highest priority first.
    pub message_ids: Vec<String>,
    /// Subject terms to widen recall with, possibly empty.
    pub subject_terms: Vec<String>,
    /// Mailbox to search.
    pub mailbox: String,
    /// Only messages received after this instant.
    pub since: DateTime<Utc>,
}

/// Configured limits for a search strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTuning {
    /// Maximum number of correlation ids per query.
    pub max_message_ids: usize,
    /// Search window in days.
    pub timeframe_days: u32,
}

/// Per-provider thread-search policy.
///
/// A strategy must be configured (via its `configure` method) before
/// [`thread_query`](SearchStrategy::thread_query) is called; using an
/// unconfigured strategy is a programming error reported as
/// [`Error::StrategyNotConfigured`], never a panic.
pub trait SearchStrategy: Send + Sync + std::fmt::Debug {
    /// Canonical provider key.
    fn provider(&self) -> &str;

    /// How rich a query this provider tolerates.
    fn complexity(&self) -> SearchComplexity;

    /// Maximum correlation ids per query.
    fn max_message_ids(&self) -> usize;

    /// Search window in days.
    fn timeframe_days(&self) -> u32;

    /// Builds a provider-safe query for the given thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StrategyNotConfigured`] if the strategy was never
    /// configured, and [`Error::Configuration`] if the criteria carry no
    /// correlation ids at all.
    fn thread_query(&self, criteria: &ThreadSearchCriteria) -> Result<ThreadQuery>;
}

/// Strips envelope angle brackets and surrounding whitespace from a
/// correlation id.
fn normalize_id(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
        .to_string()
}

/// Collects correlation ids by priority: primary id, then parent id, then
/// ancestors most-recent-first; normalized, deduplicated, capped at `cap`.
fn collect_correlation_ids(criteria: &ThreadSearchCriteria, cap: usize) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();

    let mut push = |raw: &str| {
        if ids.len() >= cap {
            return;
        }
        let id = normalize_id(raw);
        if !id.is_empty() && !ids.contains(&id) {
            ids.push(id);
        }
    };

    push(&criteria.message_id);
    if let Some(parent) = &criteria.parent_id {
        push(parent);
    }
    // References are stored oldest first; recent ancestors are the most
    // likely to still be within the provider's search window.
    for ancestor in criteria.ancestor_ids.iter().rev() {
        push(ancestor);
    }

    ids
}

/// Start of the search window for a timeframe of `days`.
fn window_start(days: u32) -> DateTime<Utc> {
    Utc::now() - ChronoDuration::days(i64::from(days))
}

/// Shared query construction for all built-in strategies.
fn build_query(
    provider: &str,
    tuning: Option<SearchTuning>,
    criteria: &ThreadSearchCriteria,
    subject_terms: impl FnOnce(&str) -> Vec<String>,
) -> Result<ThreadQuery> {
    let tuning = tuning.ok_or_else(|| Error::StrategyNotConfigured(provider.to_string()))?;

    let message_ids = collect_correlation_ids(criteria, tuning.max_message_ids);
    if message_ids.is_empty() {
        return Err(Error::Configuration(
            "thread search requires at least one correlation id".to_string(),
        ));
    }

    Ok(ThreadQuery {
        message_ids,
        subject_terms: subject_terms(&criteria.subject),
        mailbox: criteria.mailbox.clone(),
        since: window_start(tuning.timeframe_days),
    })
}

/// Gmail thread search: tolerates rich queries.
///
/// Many correlation ids plus reply/forward subject variants to widen
/// recall across clients that rewrite headers.
#[derive(Debug, Default)]
pub struct GmailSearchStrategy {
    tuning: Option<SearchTuning>,
}

impl GmailSearchStrategy {
    /// Default cap on correlation ids per query.
    pub const DEFAULT_MAX_MESSAGE_IDS: usize = 10;
    /// Default search window.
    pub const DEFAULT_TIMEFRAME_DAYS: u32 = 30;

    /// Creates an unconfigured strategy.
    #[must_use]
    pub const fn new() -> Self {
        Self { tuning: None }
    }

    /// Applies tuning. Must be called before building queries.
    pub const fn configure(&mut self, tuning: SearchTuning) {
        self.tuning = Some(tuning);
    }

    /// Default tuning for this provider.
    #[must_use]
    pub const fn default_tuning() -> SearchTuning {
        SearchTuning {
            max_message_ids: Self::DEFAULT_MAX_MESSAGE_IDS,
            timeframe_days: Self::DEFAULT_TIMEFRAME_DAYS,
        }
    }
}

impl SearchStrategy for GmailSearchStrategy {
    fn provider(&self) -> &str {
        "gmail"
    }

    fn complexity(&self) -> SearchComplexity {
        SearchComplexity::Complex
    }

    fn max_message_ids(&self) -> usize {
        self.tuning
            .map_or(Self::DEFAULT_MAX_MESSAGE_IDS, |t| t.max_message_ids)
    }

    fn timeframe_days(&self) -> u32 {
        self.tuning
            .map_or(Self::DEFAULT_TIMEFRAME_DAYS, |t| t.timeframe_days)
    }

    fn thread_query(&self, criteria: &ThreadSearchCriteria) -> Result<ThreadQuery> {
        build_query(self.provider(), self.tuning, criteria, |subject| {
            if subject.is_empty() {
                return Vec::new();
            }
            // Subject variants catch clients that rewrite the prefix.
            vec![
                subject.to_string(),
                format!("Re: {subject}"),
                format!("Fwd: {subject}"),
                format!("Fw: {subject}"),
            ]
        })
    }
}

/// Yandex thread search: single-criterion only.
///
/// The server rejects multi-criterion header search, so queries are
/// limited to exactly one correlation id and no subject terms.
#[derive(Debug, Default)]
pub struct YandexSearchStrategy {
    tuning: Option<SearchTuning>,
}

impl YandexSearchStrategy {
    /// Default cap on correlation ids per query.
    pub const DEFAULT_MAX_MESSAGE_IDS: usize = 1;
    /// Default search window.
    pub const DEFAULT_TIMEFRAME_DAYS: u32 = 14;

    /// Creates an unconfigured strategy.
    #[must_use]
    pub const fn new() -> Self {
        Self { tuning: None }
    }

    /// Applies tuning. Must be called before building queries.
    ///
    /// The id cap is clamped to 1 regardless of configuration; the server
    /// does not accept more.
    pub fn configure(&mut self, tuning: SearchTuning) {
        self.tuning = Some(SearchTuning {
            max_message_ids: tuning.max_message_ids.min(1),
            timeframe_days: tuning.timeframe_days,
        });
    }

    /// Default tuning for this provider.
    #[must_use]
    pub const fn default_tuning() -> SearchTuning {
        SearchTuning {
            max_message_ids: Self::DEFAULT_MAX_MESSAGE_IDS,
            timeframe_days: Self::DEFAULT_TIMEFRAME_DAYS,
        }
    }
}

impl SearchStrategy for YandexSearchStrategy {
    fn provider(&self) -> &str {
        "yandex"
    }

    fn complexity(&self) -> SearchComplexity {
        SearchComplexity::Simple
    }

    fn max_message_ids(&self) -> usize {
        self.tuning
            .map_or(Self::DEFAULT_MAX_MESSAGE_IDS, |t| t.max_message_ids)
    }

    fn timeframe_days(&self) -> u32 {
        self.tuning
            .map_or(Self::DEFAULT_TIMEFRAME_DAYS, |t| t.timeframe_days)
    }

    fn thread_query(&self, criteria: &ThreadSearchCriteria) -> Result<ThreadQuery> {
        build_query(self.provider(), self.tuning, criteria, |_| Vec::new())
    }
}

/// Conservative strategy for unknown providers.
#[derive(Debug, Default)]
pub struct GenericSearchStrategy {
    tuning: Option<SearchTuning>,
}

impl GenericSearchStrategy {
    /// Default cap on correlation ids per query.
    pub const DEFAULT_MAX_MESSAGE_IDS: usize = 5;
    /// Default search window.
    pub const DEFAULT_TIMEFRAME_DAYS: u32 = 21;

    /// Creates an unconfigured strategy.
    #[must_use]
    pub const fn new() -> Self {
        Self { tuning: None }
    }

    /// Applies tuning. Must be called before building queries.
    pub const fn configure(&mut self, tuning: SearchTuning) {
        self.tuning = Some(tuning);
    }

    /// Default tuning for this provider.
    #[must_use]
    pub const fn default_tuning() -> SearchTuning {
        SearchTuning {
            max_message_ids: Self::DEFAULT_MAX_MESSAGE_IDS,
            timeframe_days: Self::DEFAULT_TIMEFRAME_DAYS,
        }
    }
}

impl SearchStrategy for GenericSearchStrategy {
    fn provider(&self) -> &str {
        super::GENERIC_PROVIDER
    }

    fn complexity(&self) -> SearchComplexity {
        SearchComplexity::Moderate
    }

    fn max_message_ids(&self) -> usize {
        self.tuning
            .map_or(Self::DEFAULT_MAX_MESSAGE_IDS, |t| t.max_message_ids)
    }

    fn timeframe_days(&self) -> u32 {
        self.tuning
            .map_or(Self::DEFAULT_TIMEFRAME_DAYS, |t| t.timeframe_days)
    }

    fn thread_query(&self, criteria: &ThreadSearchCriteria) -> Result<ThreadQuery> {
        build_query(self.provider(), self.tuning, criteria, |subject| {
            if subject.is_empty() {
                Vec::new()
            } else {
                vec![subject.to_string()]
            }
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

    fn thread_criteria() -> ThreadSearchCriteria {
        ThreadSearchCriteria::new("<newest@example.com>", "INBOX")
            .parent("<middle@example.com>")
            .ancestors(vec![
                "<root@example.com>".to_string(),
                "<middle@example.com>".to_string(),
            ])
            .subject("Printer on fire")
    }

    #[test]
    fn test_normalize_strips_brackets() {
        assert_eq!(normalize_id(" <a@b.c> "), "a@b.c");
        assert_eq!(normalize_id("a@b.c"), "a@b.c");
        assert_eq!(normalize_id("<>"), "");
    }

    #[test]
    fn test_collect_priority_and_dedupe() {
        let ids = collect_correlation_ids(&thread_criteria(), 10);
        // middle appears as both parent and ancestor; it must appear once,
        // at its parent-priority position.
        assert_eq!(
            ids,
            vec![
                "newest@example.com".to_string(),
                "middle@example.com".to_string(),
                "root@example.com".to_string(),
            ]
        );
    }

    #[test]
    fn test_collect_respects_cap() {
        let ids = collect_correlation_ids(&thread_criteria(), 2);
        assert_eq!(
            ids,
            vec!["newest@example.com".to_string(), "middle@example.com".to_string()]
        );
    }

    #[test]
    fn test_unconfigured_strategy_fails_loudly() {
        let strategy = GmailSearchStrategy::new();
        let err = strategy.thread_query(&thread_criteria()).unwrap_err();
        assert!(matches!(err, Error::StrategyNotConfigured(p) if p == "gmail"));
    }

    #[test]
    fn test_gmail_query_is_rich() {
        let mut strategy = GmailSearchStrategy::new();
        strategy.configure(GmailSearchStrategy::default_tuning());

        let query = strategy.thread_query(&thread_criteria()).unwrap();
        assert_eq!(query.message_ids.len(), 3);
        assert!(query.subject_terms.contains(&"Printer on fire".to_string()));
        assert!(query.subject_terms.contains(&"Re: Printer on fire".to_string()));
        assert_eq!(query.mailbox, "INBOX");
    }

    #[test]
    fn test_yandex_query_is_single_criterion() {
        let mut strategy = YandexSearchStrategy::new();
        strategy.configure(SearchTuning {
            // Misconfiguration upwards must not widen the query.
            max_message_ids: 25,
            timeframe_days: 14,
        });

        let query = strategy.thread_query(&thread_criteria()).unwrap();
        assert_eq!(query.message_ids, vec!["newest@example.com".to_string()]);
        assert!(query.subject_terms.is_empty());
    }

    #[test]
    fn test_generic_query_is_moderate() {
        let mut strategy = GenericSearchStrategy::new();
        strategy.configure(GenericSearchStrategy::default_tuning());

        let query = strategy.thread_query(&thread_criteria()).unwrap();
        assert_eq!(query.message_ids.len(), 3);
        assert_eq!(query.subject_terms, vec!["Printer on fire".to_string()]);
        assert_eq!(strategy.complexity(), SearchComplexity::Moderate);
    }

    #[test]
    fn test_empty_criteria_rejected() {
        let mut strategy = GenericSearchStrategy::new();
        strategy.configure(GenericSearchStrategy::default_tuning());

        let criteria = ThreadSearchCriteria::new("", "INBOX");
        let err = strategy.thread_query(&criteria).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_window_is_in_the_past() {
        let start = window_start(14);
        assert!(start < Utc::now());
    }
}
