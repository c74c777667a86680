//! Router configuration types.
//!
//! `RouterConfig` is the top-level `switchyard.toml`: the provider list plus
//! the fallback/retry/timeout knobs. All fields have defaults so an empty
//! file yields a usable (if provider-less) router.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level router configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Backends to register, in any order (dispatch order comes from `priority`).
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Provider tried first for requests without an explicit override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,

    /// Whether failed requests move on to other providers.
    #[serde(default = "default_fallback_enabled")]
    pub fallback_enabled: bool,

    /// Pause before the next provider after a retryable failure.
    #[serde(default = "default_fallback_delay_ms")]
    pub fallback_delay_ms: u64,

    /// Number of passes over the provider list.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Overall deadline per dispatch; `0` disables it.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_fallback_enabled() -> bool {
    true
}

fn default_fallback_delay_ms() -> u64 {
    2_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            default_provider: None,
            fallback_enabled: default_fallback_enabled(),
            fallback_delay_ms: default_fallback_delay_ms(),
            max_retries: default_max_retries(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl RouterConfig {
    pub fn fallback_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_delay_ms)
    }

    /// `None` when the global deadline is disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// Configuration for one backend.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Factory key (e.g. "openai", "anthropic", "ollama").
    #[serde(rename = "type")]
    pub provider_type: String,

    /// Unique registry name; defaults to the type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Base URL override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable to read the API key from when `api_key` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,

    /// Lower dispatches first.
    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Overrides the adapter's advertised per-minute request cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u32>,

    /// Overrides the adapter's advertised per-minute token cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_minute: Option<u32>,

    /// Adapter-specific settings.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> u32 {
    10
}

impl ProviderConfig {
    /// A minimal enabled config for the given factory key.
    pub fn new(provider_type: impl Into<String>) -> Self {
        Self {
            provider_type: provider_type.into(),
            name: None,
            enabled: true,
            url: None,
            api_key: None,
            api_key_env: None,
            default_model: None,
            max_tokens: None,
            models: Vec::new(),
            priority: default_priority(),
            requests_per_minute: None,
            tokens_per_minute: None,
            extra: HashMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Registry name: the explicit `name`, else the type.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.provider_type)
    }
}

// Hand-written so the API key never reaches logs.
impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider_type", &self.provider_type)
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_key_env", &self.api_key_env)
            .field("default_model", &self.default_model)
            .field("max_tokens", &self.max_tokens)
            .field("models", &self.models)
            .field("priority", &self.priority)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("tokens_per_minute", &self.tokens_per_minute)
            .field("extra", &self.extra)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_config_default_values() {
        let config = RouterConfig::default();
        assert!(config.providers.is_empty());
        assert!(config.fallback_enabled);
        assert_eq!(config.fallback_delay(), Duration::from_secs(2));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_router_config_deserialize_with_defaults() {
        let config: RouterConfig = toml::from_str("").unwrap();
        assert_eq!(config, RouterConfig::default());
    }

    #[test]
    fn test_router_config_deserialize_with_values() {
        let toml_str = r#"
default_provider = "ollama"
fallback_enabled = false
fallback_delay_ms = 500
max_retries = 2
timeout_ms = 0

[[providers]]
type = "openai"
api_key_env = "OPENAI_API_KEY"
default_model = "gpt-4o-mini"
priority = 2
requests_per_minute = 60

[[providers]]
type = "ollama"
name = "local"
url = "http://localhost:11434"
priority = 1
models = ["llama3.2", "qwen2.5"]

[providers.extra]
keep_alive = "5m"
"#;
        let config: RouterConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.default_provider.as_deref(), Some("ollama"));
        assert!(!config.fallback_enabled);
        assert_eq!(config.fallback_delay(), Duration::from_millis(500));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.timeout(), None);

        assert_eq!(config.providers.len(), 2);
        let openai = &config.providers[0];
        assert_eq!(openai.name(), "openai");
        assert!(openai.enabled);
        assert_eq!(openai.requests_per_minute, Some(60));

        let local = &config.providers[1];
        assert_eq!(local.name(), "local");
        assert_eq!(local.provider_type, "ollama");
        assert_eq!(local.models.len(), 2);
        assert_eq!(local.extra["keep_alive"], serde_json::json!("5m"));
    }

    #[test]
    fn test_provider_config_debug_redacts_api_key() {
        let mut config = ProviderConfig::new("openai");
        config.api_key = Some("sk-very-secret".to_string());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_provider_config_default_priority() {
        let config = ProviderConfig::new("anthropic");
        assert_eq!(config.priority, 10);
        assert_eq!(config.name(), "anthropic");
        let renamed = config.with_name("claude").with_priority(1);
        assert_eq!(renamed.name(), "claude");
        assert_eq!(renamed.priority, 1);
    }
}
