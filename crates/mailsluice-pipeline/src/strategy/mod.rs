//! Provider-adaptive pipeline tuning.
//!
//! Mail providers differ sharply in what they tolerate: batch sizes, safe
//! concurrency, timeouts, and above all what kind of correlated thread
//! search their servers accept. One provider rejects multi-criterion
//! header search and must be limited to a single correlation id; another
//! happily answers a rich multi-id, multi-header query.
//!
//! Centralizing those constraints as data keeps provider quirks out of
//! the orchestration code. A [`PipelineStrategy`] bundles the tuning
//! values for one provider; a [`SearchStrategy`] owns its thread-search
//! policy; the [`StrategyFactory`] resolves a provider string to both,
//! with a mandatory `generic` fallback.

mod factory;
mod providers;
mod search;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

pub use factory::{GENERIC_PROVIDER, StrategyFactory};
pub use providers::{GenericStrategy, GmailStrategy, YandexStrategy};
pub use search::{
    GenericSearchStrategy, GmailSearchStrategy, SearchStrategy, SearchTuning, ThreadQuery,
    YandexSearchStrategy,
};

/// How rich a thread-search query a provider tolerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchComplexity {
    /// Single correlation id, no additional criteria.
    Simple,
    /// A handful of correlation ids, subject as-is.
    Moderate,
    /// Many correlation ids plus subject-prefix variants.
    Complex,
}

/// Per-provider tuning for one pipeline instance.
///
/// Selected once at pipeline-build time and never mutated afterwards.
/// Every value has a provider-specific fallback default, so none of the
/// accessors can ever observe zero or undefined tuning.
pub trait PipelineStrategy: Send + Sync + std::fmt::Debug {
    /// Canonical provider key this strategy was registered under.
    fn provider(&self) -> &str;

    /// Messages fetched per batch.
    fn batch_size(&self) -> usize;

    /// Number of concurrent workers.
    fn worker_count(&self) -> usize;

    /// Capacity of the pipeline's bounded message queue.
    fn queue_capacity(&self) -> usize;

    /// Deadline for one gateway fetch call.
    fn fetch_timeout(&self) -> Duration;

    /// Deadline for processing one message.
    fn process_timeout(&self) -> Duration;

    /// Retry policy for transient failures.
    fn retry_policy(&self) -> RetryPolicy;

    /// The provider's thread-search policy.
    fn search_strategy(&self) -> Arc<dyn SearchStrategy>;
}
