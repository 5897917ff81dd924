//! Strategy resolution.
//!
//! The factory maps a provider string (a registry key like `gmail`, or a
//! raw hostname like `imap.yandex.ru`) to a registered strategy.
//! Resolution is total: every provider string resolves to exactly one
//! strategy, with `generic` as the guaranteed catch-all.

use std::collections::HashMap;
use std::sync::Arc;

use super::search::SearchStrategy;
use super::{GenericStrategy, GmailStrategy, PipelineStrategy, YandexStrategy};
use crate::config::IngestConfig;
use crate::error::{Error, Result};

/// Key of the mandatory fallback strategy.
pub const GENERIC_PROVIDER: &str = "generic";

/// Registry of pipeline and search strategies keyed by provider.
///
/// Resolution order:
///
/// 1. exact, case-sensitive key match;
/// 2. case-insensitive substring match (`imap.yandex.ru` matches the
///    registered key `yandex`), keys tried in sorted order so the result
///    is deterministic;
/// 3. the `generic` fallback, which must always be present.
///
/// Registering over an existing key is a supported customization path —
/// it is logged as a warning, never treated as an error.
#[derive(Debug, Default)]
pub struct StrategyFactory {
    pipeline: HashMap<String, Arc<dyn PipelineStrategy>>,
    search: HashMap<String, Arc<dyn SearchStrategy>>,
}

impl StrategyFactory {
    /// Creates an empty factory.
    ///
    /// An empty factory is unhealthy until a `generic` strategy is
    /// registered; prefer [`StrategyFactory::with_defaults`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a factory with the built-in gmail, yandex and generic
    /// strategies, tuned from the configuration's overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when an override carries
    /// inconsistent values (e.g. a zero retry attempt count).
    pub fn with_defaults(config: &IngestConfig) -> Result<Self> {
        let mut factory = Self::new();

        let gmail = GmailStrategy::new(&config.overrides_for("gmail"))?;
        factory.register_search("gmail", gmail.search_strategy());
        factory.register_pipeline("gmail", Arc::new(gmail));

        let yandex = YandexStrategy::new(&config.overrides_for("yandex"))?;
        factory.register_search("yandex", yandex.search_strategy());
        factory.register_pipeline("yandex", Arc::new(yandex));

        let generic = GenericStrategy::new(&config.overrides_for(GENERIC_PROVIDER))?;
        factory.register_search(GENERIC_PROVIDER, generic.search_strategy());
        factory.register_pipeline(GENERIC_PROVIDER, Arc::new(generic));

        Ok(factory)
    }

    /// Registers a pipeline strategy, overwriting any existing entry.
    pub fn register_pipeline(
        &mut self,
        provider: impl Into<String>,
        strategy: Arc<dyn PipelineStrategy>,
    ) {
        let provider = provider.into();
        if self.pipeline.insert(provider.clone(), strategy).is_some() {
            tracing::warn!(provider = %provider, "overwriting registered pipeline strategy");
        }
    }

    /// Registers a search strategy, overwriting any existing entry.
    pub fn register_search(
        &mut self,
        provider: impl Into<String>,
        strategy: Arc<dyn SearchStrategy>,
    ) {
        let provider = provider.into();
        if self.search.insert(provider.clone(), strategy).is_some() {
            tracing::warn!(provider = %provider, "overwriting registered search strategy");
        }
    }

    /// Resolves the pipeline strategy for a provider string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingGenericStrategy`] only when no match is
    /// found and the mandatory fallback is absent.
    pub fn resolve_pipeline(&self, provider: &str) -> Result<Arc<dyn PipelineStrategy>> {
        Self::resolve_in(&self.pipeline, provider)
    }

    /// Resolves the search strategy for a provider string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingGenericStrategy`] only when no match is
    /// found and the mandatory fallback is absent.
    pub fn resolve_search(&self, provider: &str) -> Result<Arc<dyn SearchStrategy>> {
        Self::resolve_in(&self.search, provider)
    }

    fn resolve_in<S: ?Sized>(
        registry: &HashMap<String, Arc<S>>,
        provider: &str,
    ) -> Result<Arc<S>> {
        if let Some(strategy) = registry.get(provider) {
            return Ok(Arc::clone(strategy));
        }

        let lowered = provider.to_lowercase();
        let mut keys: Vec<&String> = registry.keys().collect();
        keys.sort();
        for key in keys {
            if key == GENERIC_PROVIDER {
                continue;
            }
            if lowered.contains(&key.to_lowercase()) {
                tracing::debug!(provider = %provider, matched = %key, "substring strategy match");
                return Ok(Arc::clone(&registry[key]));
            }
        }

        registry
            .get(GENERIC_PROVIDER)
            .map(Arc::clone)
            .ok_or(Error::MissingGenericStrategy)
    }

    /// Providers with a registered pipeline strategy, sorted.
    #[must_use]
    pub fn supported_providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = self.pipeline.keys().cloned().collect();
        providers.sort();
        providers
    }

    /// Verifies the mandatory generic fallback is present in both
    /// registries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingGenericStrategy`] when either registry
    /// lacks its fallback.
    pub fn health(&self) -> Result<()> {
        if self.pipeline.contains_key(GENERIC_PROVIDER)
            && self.search.contains_key(GENERIC_PROVIDER)
        {
            Ok(())
        } else {
            Err(Error::MissingGenericStrategy)
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
    use super::*;
    use crate::config::StrategyOverrides;

    fn factory() -> StrategyFactory {
        StrategyFactory::with_defaults(&IngestConfig::default()).unwrap()
    }

    #[test]
    fn test_exact_match() {
        let strategy = factory().resolve_pipeline("gmail").unwrap();
        assert_eq!(strategy.provider(), "gmail");
    }

    #[test]
    fn test_substring_match() {
        let strategy = factory().resolve_pipeline("imap.yandex.ru").unwrap();
        assert_eq!(strategy.provider(), "yandex");

        let search = factory().resolve_search("IMAP.GMAIL.COM").unwrap();
        assert_eq!(search.provider(), "gmail");
    }

    #[test]
    fn test_unknown_falls_back_to_generic() {
        let strategy = factory().resolve_pipeline("mail.example.org").unwrap();
        assert_eq!(strategy.provider(), GENERIC_PROVIDER);
    }

    #[test]
    fn test_resolution_is_total() {
        let factory = factory();
        for provider in ["gmail", "yandex", "imap.fastmail.com", "x", ""] {
            assert!(
                factory.resolve_pipeline(provider).is_ok(),
                "provider {provider:?} must resolve"
            );
            assert!(factory.resolve_search(provider).is_ok());
        }
    }

    #[test]
    fn test_missing_generic_is_unhealthy() {
        let mut factory = StrategyFactory::new();
        assert!(matches!(
            factory.health(),
            Err(Error::MissingGenericStrategy)
        ));
        assert!(matches!(
            factory.resolve_pipeline("nobody"),
            Err(Error::MissingGenericStrategy)
        ));

        let generic = GenericStrategy::new(&StrategyOverrides::default()).unwrap();
        factory.register_search(GENERIC_PROVIDER, generic.search_strategy());
        factory.register_pipeline(GENERIC_PROVIDER, Arc::new(generic));
        assert!(factory.health().is_ok());
    }

    #[test]
    fn test_overwrite_is_allowed() {
        let mut factory = factory();
        let replacement = GenericStrategy::new(&StrategyOverrides {
            batch_size: Some(99),
            ..StrategyOverrides::default()
        })
        .unwrap();
        factory.register_pipeline("gmail", Arc::new(replacement));

        assert_eq!(factory.resolve_pipeline("gmail").unwrap().batch_size(), 99);
    }

    #[test]
    fn test_supported_providers_sorted() {
        assert_eq!(
            factory().supported_providers(),
            vec!["generic".to_string(), "gmail".to_string(), "yandex".to_string()]
        );
    }
}
