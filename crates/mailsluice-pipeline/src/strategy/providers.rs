//! Built-in provider strategies.
//!
//! Each strategy is a table of tuned values for one provider, resolved
//! once from configuration overrides plus provider defaults. The numbers
//! encode observed provider behavior: Gmail sustains wide fetches and
//! high concurrency; Yandex throttles aggressively and needs smaller,
//! slower batches; the generic entry is deliberately conservative.

use std::sync::Arc;
use std::time::Duration;

use super::search::{
    GenericSearchStrategy, GmailSearchStrategy, SearchStrategy, SearchTuning,
    YandexSearchStrategy,
};
use super::{GENERIC_PROVIDER, PipelineStrategy};
use crate::config::{RetryOverrides, SearchOverrides, StrategyOverrides};
use crate::error::Result;
use crate::retry::RetryPolicy;

/// Resolved tuning values shared by all built-in strategies.
#[derive(Debug, Clone)]
struct Tuning {
    batch_size: usize,
    worker_count: usize,
    queue_capacity: usize,
    fetch_timeout: Duration,
    process_timeout: Duration,
    retry: RetryPolicy,
}

/// Provider defaults used where configuration is silent.
#[derive(Debug, Clone, Copy)]
struct Defaults {
    batch_size: usize,
    worker_count: usize,
    queue_capacity: usize,
    fetch_timeout: Duration,
    process_timeout: Duration,
    retry_max_attempts: u32,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
    retry_backoff_factor: f64,
}

impl Tuning {
    /// Merges overrides onto provider defaults, validating the result.
    fn resolve(defaults: &Defaults, overrides: &StrategyOverrides) -> Result<Self> {
        let retry = resolve_retry(defaults, &overrides.retry)?;
        Ok(Self {
            batch_size: overrides.batch_size.unwrap_or(defaults.batch_size),
            worker_count: overrides.worker_count.unwrap_or(defaults.worker_count),
            queue_capacity: overrides.queue_capacity.unwrap_or(defaults.queue_capacity),
            fetch_timeout: overrides
                .fetch_timeout_secs
                .map_or(defaults.fetch_timeout, Duration::from_secs),
            process_timeout: overrides
                .process_timeout_secs
                .map_or(defaults.process_timeout, Duration::from_secs),
            retry,
        })
    }
}

fn resolve_retry(defaults: &Defaults, overrides: &RetryOverrides) -> Result<RetryPolicy> {
    RetryPolicy::new(
        overrides.max_attempts.unwrap_or(defaults.retry_max_attempts),
        overrides
            .base_delay_ms
            .map_or(defaults.retry_base_delay, Duration::from_millis),
        overrides
            .max_delay_ms
            .map_or(defaults.retry_max_delay, Duration::from_millis),
        overrides
            .backoff_factor
            .unwrap_or(defaults.retry_backoff_factor),
    )
}

fn resolve_search(defaults: SearchTuning, overrides: &SearchOverrides) -> SearchTuning {
    SearchTuning {
        max_message_ids: overrides.max_message_ids.unwrap_or(defaults.max_message_ids),
        timeframe_days: overrides.timeframe_days.unwrap_or(defaults.timeframe_days),
    }
}

macro_rules! strategy_accessors {
    () => {
        fn batch_size(&self) -> usize {
            self.tuning.batch_size
        }

        fn worker_count(&self) -> usize {
            self.tuning.worker_count
        }

        fn queue_capacity(&self) -> usize {
            self.tuning.queue_capacity
        }

        fn fetch_timeout(&self) -> Duration {
            self.tuning.fetch_timeout
        }

        fn process_timeout(&self) -> Duration {
            self.tuning.process_timeout
        }

        fn retry_policy(&self) -> RetryPolicy {
            self.tuning.retry.clone()
        }

        fn search_strategy(&self) -> Arc<dyn SearchStrategy> {
            Arc::clone(&self.search)
        }
    };
}

/// Strategy tuned for Gmail.
#[derive(Debug, Clone)]
pub struct GmailStrategy {
    tuning: Tuning,
    search: Arc<dyn SearchStrategy>,
}

impl GmailStrategy {
    const DEFAULTS: Defaults = Defaults {
        batch_size: 50,
        worker_count: 8,
        queue_capacity: 200,
        fetch_timeout: Duration::from_secs(30),
        process_timeout: Duration::from_secs(60),
        retry_max_attempts: 5,
        retry_base_delay: Duration::from_secs(1),
        retry_max_delay: Duration::from_secs(60),
        retry_backoff_factor: 2.0,
    };

    /// Builds the strategy from configuration overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`](crate::Error::Configuration) when
    /// the overridden retry values are inconsistent.
    pub fn new(overrides: &StrategyOverrides) -> Result<Self> {
        let mut search = GmailSearchStrategy::new();
        search.configure(resolve_search(
            GmailSearchStrategy::default_tuning(),
            &overrides.search,
        ));
        Ok(Self {
            tuning: Tuning::resolve(&Self::DEFAULTS, overrides)?,
            search: Arc::new(search),
        })
    }
}

impl PipelineStrategy for GmailStrategy {
    fn provider(&self) -> &str {
        "gmail"
    }

    strategy_accessors!();
}

/// Strategy tuned for Yandex.
///
/// Yandex throttles aggressively; batches are small and timeouts long.
#[derive(Debug, Clone)]
pub struct YandexStrategy {
    tuning: Tuning,
    search: Arc<dyn SearchStrategy>,
}

impl YandexStrategy {
    const DEFAULTS: Defaults = Defaults {
        batch_size: 20,
        worker_count: 4,
        queue_capacity: 100,
        fetch_timeout: Duration::from_secs(45),
        process_timeout: Duration::from_secs(90),
        retry_max_attempts: 3,
        retry_base_delay: Duration::from_secs(2),
        retry_max_delay: Duration::from_secs(120),
        retry_backoff_factor: 2.0,
    };

    /// Builds the strategy from configuration overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`](crate::Error::Configuration) when
    /// the overridden retry values are inconsistent.
    pub fn new(overrides: &StrategyOverrides) -> Result<Self> {
        let mut search = YandexSearchStrategy::new();
        search.configure(resolve_search(
            YandexSearchStrategy::default_tuning(),
            &overrides.search,
        ));
        Ok(Self {
            tuning: Tuning::resolve(&Self::DEFAULTS, overrides)?,
            search: Arc::new(search),
        })
    }
}

impl PipelineStrategy for YandexStrategy {
    fn provider(&self) -> &str {
        "yandex"
    }

    strategy_accessors!();
}

/// Conservative catch-all strategy for unrecognized providers.
#[derive(Debug, Clone)]
pub struct GenericStrategy {
    tuning: Tuning,
    search: Arc<dyn SearchStrategy>,
}

impl GenericStrategy {
    const DEFAULTS: Defaults = Defaults {
        batch_size: 25,
        worker_count: 4,
        queue_capacity: 100,
        fetch_timeout: Duration::from_secs(30),
        process_timeout: Duration::from_secs(60),
        retry_max_attempts: 3,
        retry_base_delay: Duration::from_secs(1),
        retry_max_delay: Duration::from_secs(30),
        retry_backoff_factor: 2.0,
    };

    /// Builds the strategy from configuration overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`](crate::Error::Configuration) when
    /// the overridden retry values are inconsistent.
    pub fn new(overrides: &StrategyOverrides) -> Result<Self> {
        let mut search = GenericSearchStrategy::new();
        search.configure(resolve_search(
            GenericSearchStrategy::default_tuning(),
            &overrides.search,
        ));
        Ok(Self {
            tuning: Tuning::resolve(&Self::DEFAULTS, overrides)?,
            search: Arc::new(search),
        })
    }
}

impl PipelineStrategy for GenericStrategy {
    fn provider(&self) -> &str {
        GENERIC_PROVIDER
    }

    strategy_accessors!();
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
    use crate::strategy::SearchComplexity;

    #[test]
    fn test_defaults_are_never_zero() {
        for strategy in [
            &GmailStrategy::new(&StrategyOverrides::default()).unwrap() as &dyn PipelineStrategy,
            &YandexStrategy::new(&StrategyOverrides::default()).unwrap(),
            &GenericStrategy::new(&StrategyOverrides::default()).unwrap(),
        ] {
            assert!(strategy.batch_size() > 0, "{}", strategy.provider());
            assert!(strategy.worker_count() > 0, "{}", strategy.provider());
            assert!(strategy.queue_capacity() > 0, "{}", strategy.provider());
            assert!(!strategy.fetch_timeout().is_zero(), "{}", strategy.provider());
            assert!(!strategy.process_timeout().is_zero(), "{}", strategy.provider());
            assert!(strategy.retry_policy().max_attempts >= 1, "{}", strategy.provider());
        }
    }

    #[test]
    fn test_overrides_take_precedence() {
        let overrides = StrategyOverrides {
            batch_size: Some(5),
            worker_count: Some(2),
            fetch_timeout_secs: Some(7),
            ..StrategyOverrides::default()
        };
        let strategy = GmailStrategy::new(&overrides).unwrap();

        assert_eq!(strategy.batch_size(), 5);
        assert_eq!(strategy.worker_count(), 2);
        assert_eq!(strategy.fetch_timeout(), Duration::from_secs(7));
        // Unset fields keep provider defaults.
        assert_eq!(strategy.queue_capacity(), 200);
    }

    #[test]
    fn test_invalid_retry_override_fails_fast() {
        let overrides = StrategyOverrides {
            retry: RetryOverrides {
                max_attempts: Some(0),
                ..RetryOverrides::default()
            },
            ..StrategyOverrides::default()
        };
        assert!(GmailStrategy::new(&overrides).is_err());
    }

    #[test]
    fn test_search_strategies_match_provider_shape() {
        let gmail = GmailStrategy::new(&StrategyOverrides::default()).unwrap();
        assert_eq!(gmail.search_strategy().complexity(), SearchComplexity::Complex);

        let yandex = YandexStrategy::new(&StrategyOverrides::default()).unwrap();
        assert_eq!(yandex.search_strategy().complexity(), SearchComplexity::Simple);
        assert_eq!(yandex.search_strategy().max_message_ids(), 1);

        let generic = GenericStrategy::new(&StrategyOverrides::default()).unwrap();
        assert_eq!(generic.search_strategy().complexity(), SearchComplexity::Moderate);
    }
}
