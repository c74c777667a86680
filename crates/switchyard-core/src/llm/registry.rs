//! Provider registry and factories.
//!
//! A [`ProviderRegistry`] is built once from configuration and never mutated
//! afterwards, apart from the router-owned state inside each entry (breaker,
//! limiter, statistics). Re-registration builds a fresh registry and the
//! router swaps it in whole.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use switchyard_types::config::ProviderConfig;
use switchyard_types::error::ProviderError;
use switchyard_types::llm::RateLimit;

use super::box_provider::BoxLlmProvider;
use super::circuit_breaker::CircuitBreaker;
use super::rate_limiter::RateLimiter;
use super::stats::ProviderStatistics;

/// One registered provider plus the state the router owns for it.
#[derive(Debug)]
pub struct ProviderEntry {
    pub name: String,
    pub provider_type: String,
    /// Lower dispatches first.
    pub priority: u32,
    pub config: ProviderConfig,
    pub provider: BoxLlmProvider,
    pub breaker: CircuitBreaker,
    pub limiter: RateLimiter,
    stats: Mutex<ProviderStatistics>,
}

impl ProviderEntry {
    /// Wrap an adapter, taking rate limits from the config override or the
    /// adapter's own descriptor.
    pub fn new(config: ProviderConfig, provider: BoxLlmProvider) -> Self {
        let name = config.name().to_string();
        let advertised = provider.rate_limit();
        let limits = RateLimit {
            requests_per_minute: config
                .requests_per_minute
                .unwrap_or(advertised.requests_per_minute),
            tokens_per_minute: config
                .tokens_per_minute
                .unwrap_or(advertised.tokens_per_minute),
            ..advertised
        };

        Self {
            limiter: RateLimiter::from_descriptor(name.clone(), &limits),
            breaker: CircuitBreaker::new(),
            stats: Mutex::new(ProviderStatistics::default()),
            provider_type: config.provider_type.clone(),
            priority: config.priority,
            name,
            config,
            provider,
        }
    }

    /// Breaker usability AND the adapter's cached availability.
    pub fn is_usable(&self) -> bool {
        self.breaker.is_usable() && self.provider.is_available()
    }

    /// Same answer as [`is_usable`](Self::is_usable) without any breaker
    /// transition, for operator views.
    pub fn looks_usable(&self) -> bool {
        self.breaker.would_admit() && self.provider.is_available()
    }

    /// Update statistics and breaker after a completed attempt.
    pub fn record_attempt(&self, elapsed: Duration, success: bool) {
        self.stats
            .lock()
            .expect("provider stats lock poisoned")
            .record(elapsed, success);
        if success {
            self.breaker.record_success();
        } else {
            self.breaker.record_failure();
        }
    }

    pub fn statistics(&self) -> ProviderStatistics {
        self.stats.lock().expect("provider stats lock poisoned").clone()
    }
}

/// Immutable, priority-ordered set of providers.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    entries: Vec<Arc<ProviderEntry>>,
    by_name: HashMap<String, usize>,
    /// Every configured provider, including disabled or unloadable ones.
    configs: Vec<ProviderConfig>,
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from entries, stable-sorted by ascending priority.
    ///
    /// When two entries share a name, the first in priority order wins.
    pub fn from_entries(mut entries: Vec<ProviderEntry>, configs: Vec<ProviderConfig>) -> Self {
        entries.sort_by_key(|e| e.priority);

        let mut kept = Vec::with_capacity(entries.len());
        let mut by_name = HashMap::new();
        for entry in entries {
            if by_name.contains_key(&entry.name) {
                tracing::warn!(provider = %entry.name, "Duplicate provider name, skipping");
                continue;
            }
            by_name.insert(entry.name.clone(), kept.len());
            kept.push(Arc::new(entry));
        }

        Self {
            entries: kept,
            by_name,
            configs,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ProviderEntry>> {
        self.by_name.get(name).map(|&idx| &self.entries[idx])
    }

    /// Entries in dispatch (priority) order.
    pub fn entries(&self) -> &[Arc<ProviderEntry>] {
        &self.entries
    }

    pub fn configs(&self) -> &[ProviderConfig] {
        &self.configs
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds an adapter from its configuration.
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderConfig) -> Result<BoxLlmProvider, ProviderError> + Send + Sync>;

/// Factories keyed by provider-type string.
#[derive(Clone, Default)]
pub struct FactoryRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any existing one for the same type.
    pub fn register<F>(&mut self, provider_type: impl Into<String>, factory: F)
    where
        F: Fn(&ProviderConfig) -> Result<BoxLlmProvider, ProviderError> + Send + Sync + 'static,
    {
        self.factories.insert(provider_type.into(), Arc::new(factory));
    }

    pub fn contains(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }

    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    /// Construct one adapter. `None` when no factory is registered for its type.
    pub fn create(&self, config: &ProviderConfig) -> Option<Result<BoxLlmProvider, ProviderError>> {
        self.factories
            .get(&config.provider_type)
            .map(|factory| factory(config))
    }

    /// Turn a config list into a registry.
    ///
    /// Disabled providers, unknown types, and failed factories are skipped
    /// with a warning.
    pub fn build(&self, configs: &[ProviderConfig]) -> ProviderRegistry {
        let mut entries = Vec::new();
        for config in configs {
            let name = config.name();
            if !config.enabled {
                tracing::debug!(provider = %name, "Provider disabled, skipping");
                continue;
            }
            match self.create(config) {
                None => {
                    tracing::warn!(
                        provider = %name,
                        provider_type = %config.provider_type,
                        "No factory registered for provider type"
                    );
                }
                Some(Err(err)) => {
                    tracing::warn!(provider = %name, error = %err, "Failed to create provider");
                }
                Some(Ok(provider)) => {
                    tracing::info!(provider = %name, priority = config.priority, "Provider registered");
                    entries.push(ProviderEntry::new(config.clone(), provider));
                }
            }
        }
        ProviderRegistry::from_entries(entries, configs.to_vec())
    }
}

impl fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::MockProvider;
    use switchyard_types::error::ErrorKind;

    fn mock_factories() -> FactoryRegistry {
        let mut factories = FactoryRegistry::new();
        factories.register("mock", |config: &ProviderConfig| {
            Ok(BoxLlmProvider::new(MockProvider::ok(config.name())))
        });
        factories.register("broken", |config: &ProviderConfig| {
            Err(ProviderError::auth(config.name(), "missing api key"))
        });
        factories
    }

    #[test]
    fn test_build_sorts_by_priority() {
        let configs = vec![
            ProviderConfig::new("mock").with_name("a").with_priority(2),
            ProviderConfig::new("mock").with_name("b").with_priority(1),
            ProviderConfig::new("mock").with_name("c").with_priority(3),
        ];
        let registry = mock_factories().build(&configs);
        assert_eq!(registry.names(), vec!["b", "a", "c"]);
        assert_eq!(registry.configs().len(), 3);
    }

    #[test]
    fn test_equal_priorities_keep_config_order() {
        let configs = vec![
            ProviderConfig::new("mock").with_name("first"),
            ProviderConfig::new("mock").with_name("second"),
        ];
        let registry = mock_factories().build(&configs);
        assert_eq!(registry.names(), vec!["first", "second"]);
    }

    #[test]
    fn test_build_skips_disabled_unknown_and_failed() {
        let mut disabled = ProviderConfig::new("mock").with_name("off");
        disabled.enabled = false;
        let configs = vec![
            disabled,
            ProviderConfig::new("nonexistent"),
            ProviderConfig::new("broken"),
            ProviderConfig::new("mock").with_name("ok"),
        ];
        let registry = mock_factories().build(&configs);
        assert_eq!(registry.names(), vec!["ok"]);
        assert!(registry.get("off").is_none());
        assert_eq!(registry.configs().len(), 4);
    }

    #[test]
    fn test_duplicate_names_first_by_priority_wins() {
        let configs = vec![
            ProviderConfig::new("mock").with_name("dup").with_priority(5),
            ProviderConfig::new("mock").with_name("dup").with_priority(1),
        ];
        let registry = mock_factories().build(&configs);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("dup").map(|e| e.priority), Some(1));
    }

    #[test]
    fn test_entry_limits_prefer_config_override() {
        let mut config = ProviderConfig::new("mock").with_name("limited");
        config.requests_per_minute = Some(7);
        let provider = BoxLlmProvider::new(
            MockProvider::ok("limited").with_rate_limit(RateLimit::per_minute(100, 5_000)),
        );
        let entry = ProviderEntry::new(config, provider);
        assert_eq!(entry.limiter.requests_per_minute(), 7);
        assert_eq!(entry.limiter.tokens_per_minute(), 5_000);
    }

    #[test]
    fn test_record_attempt_updates_stats_and_breaker() {
        let entry = ProviderEntry::new(
            ProviderConfig::new("mock"),
            BoxLlmProvider::new(MockProvider::ok("mock")),
        );
        entry.record_attempt(Duration::from_millis(10), false);
        entry.record_attempt(Duration::from_millis(30), true);

        let stats = entry.statistics();
        assert_eq!(stats.request_count, 2);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.average_response_ms(), 20);
        assert_eq!(entry.breaker.consecutive_failures(), 0);
    }

    #[test]
    fn test_unavailable_adapter_is_not_usable() {
        let entry = ProviderEntry::new(
            ProviderConfig::new("mock"),
            BoxLlmProvider::new(MockProvider::ok("mock").unavailable()),
        );
        assert!(entry.breaker.is_usable());
        assert!(!entry.is_usable());
    }

    #[test]
    fn test_factory_create_reports_errors() {
        let factories = mock_factories();
        let err = factories
            .create(&ProviderConfig::new("broken"))
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);
        assert!(factories.create(&ProviderConfig::new("nope")).is_none());
        assert_eq!(factories.types(), vec!["broken", "mock"]);
    }
}
