//! Router configuration loader for Switchyard.
//!
//! Reads `switchyard.toml` and deserializes it into [`RouterConfig`]. Falls
//! back to defaults when the file is missing or malformed. API keys that are
//! not written in the file are resolved from the environment afterwards.

use std::path::Path;

use thiserror::Error;

use switchyard_types::config::RouterConfig;
use switchyard_types::llm::ProviderType;

/// Errors from persisting a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Load the router configuration from `path`.
///
/// - If the file does not exist, returns [`RouterConfig::default()`].
/// - If the file cannot be read or fails to parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config.
pub async fn load_router_config(path: &Path) -> RouterConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return RouterConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return RouterConfig::default();
        }
    };

    match toml::from_str::<RouterConfig>(&content) {
        Ok(config) => {
            tracing::debug!(
                path = %path.display(),
                providers = config.providers.len(),
                "Loaded router config"
            );
            config
        }
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            RouterConfig::default()
        }
    }
}

/// Well-known environment variable holding the key for a built-in type.
pub fn default_key_env(provider_type: &str) -> Option<&'static str> {
    match provider_type.parse::<ProviderType>().ok()? {
        ProviderType::OpenAi => Some("OPENAI_API_KEY"),
        ProviderType::Anthropic => Some("ANTHROPIC_API_KEY"),
        ProviderType::Gemini => Some("GEMINI_API_KEY"),
        ProviderType::Ollama | ProviderType::OpenAiCompatible => None,
    }
}

/// Fill in missing API keys.
///
/// Priority:
/// 1. `api_key` written in the config (left untouched)
/// 2. the variable named by `api_key_env`
/// 3. the well-known variable for the provider type
///
/// `lookup` is `std::env::var(..).ok()` in production.
pub fn resolve_api_keys(config: &mut RouterConfig, lookup: impl Fn(&str) -> Option<String>) {
    for provider in &mut config.providers {
        if provider.api_key.as_deref().is_some_and(|k| !k.trim().is_empty()) {
            continue;
        }
        let var = provider
            .api_key_env
            .as_deref()
            .or_else(|| default_key_env(&provider.provider_type));
        let Some(var) = var else { continue };

        match lookup(var).filter(|v| !v.trim().is_empty()) {
            Some(key) => {
                tracing::debug!(provider = %provider.name(), env = var, "Resolved API key from environment");
                provider.api_key = Some(key);
            }
            None => {
                tracing::debug!(provider = %provider.name(), env = var, "API key variable not set");
            }
        }
    }
}

/// Merge live router settings onto the config as it was read from disk.
///
/// Global knobs come from `live`. Providers keep their on-disk entries, so
/// keys resolved from the environment are never written back; only
/// `enabled` and `priority` are taken from the matching live entry.
pub fn persistable_config(on_disk: &RouterConfig, live: &RouterConfig) -> RouterConfig {
    let providers = on_disk
        .providers
        .iter()
        .map(|stored| {
            let mut merged = stored.clone();
            if let Some(current) = live.providers.iter().find(|p| p.name() == stored.name()) {
                merged.enabled = current.enabled;
                merged.priority = current.priority;
            }
            merged
        })
        .collect();

    RouterConfig {
        providers,
        default_provider: live.default_provider.clone(),
        fallback_enabled: live.fallback_enabled,
        fallback_delay_ms: live.fallback_delay_ms,
        max_retries: live.max_retries,
        timeout_ms: live.timeout_ms,
    }
}

/// Write `config` to `path` as pretty TOML, creating parent directories.
pub async fn save_router_config(path: &Path, config: &RouterConfig) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    let write_err = |source| ConfigError::Write {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    tokio::fs::write(path, content).await.map_err(write_err)?;
    tracing::info!(path = %path.display(), "Saved router config");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use switchyard_types::config::ProviderConfig;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
default_provider = "ollama"
fallback_delay_ms = 500
max_retries = 2

[[providers]]
type = "openai"
priority = 1
default_model = "gpt-4o-mini"

[[providers]]
type = "ollama"
url = "http://gpu-box:11434"
priority = 0

[[providers]]
type = "anthropic"
name = "claude"
enabled = false
api_key_env = "CLAUDE_KEY"
"#;

    #[tokio::test]
    async fn load_router_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_router_config(&tmp.path().join("switchyard.toml")).await;
        assert_eq!(config, RouterConfig::default());
    }

    #[tokio::test]
    async fn load_router_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("switchyard.toml");
        tokio::fs::write(&path, SAMPLE).await.unwrap();

        let config = load_router_config(&path).await;
        assert_eq!(config.default_provider.as_deref(), Some("ollama"));
        assert_eq!(config.fallback_delay_ms, 500);
        assert_eq!(config.max_retries, 2);
        assert!(config.fallback_enabled);
        assert_eq!(config.timeout_ms, 30_000);
        assert_eq!(config.providers.len(), 3);
        assert_eq!(config.providers[1].url.as_deref(), Some("http://gpu-box:11434"));
        assert_eq!(config.providers[2].name(), "claude");
        assert!(!config.providers[2].enabled);
    }

    #[tokio::test]
    async fn load_router_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("switchyard.toml");
        tokio::fs::write(&path, "this is not { valid toml !!!").await.unwrap();

        let config = load_router_config(&path).await;
        assert_eq!(config, RouterConfig::default());
    }

    #[test]
    fn resolve_api_keys_prefers_file_then_named_env_then_default_env() {
        let mut config: RouterConfig = toml::from_str(SAMPLE).unwrap();
        config.providers.push({
            let mut written = ProviderConfig::new("openai").with_name("written");
            written.api_key = Some("sk-from-file".into());
            written
        });
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-env"),
            ("CLAUDE_KEY", "ak-env"),
            ("ANTHROPIC_API_KEY", "ak-default"),
        ]
        .into_iter()
        .collect();

        resolve_api_keys(&mut config, |var| env.get(var).map(|v| v.to_string()));

        assert_eq!(config.providers[0].api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.providers[1].api_key, None);
        assert_eq!(config.providers[2].api_key.as_deref(), Some("ak-env"));
        assert_eq!(config.providers[3].api_key.as_deref(), Some("sk-from-file"));
    }

    #[test]
    fn resolve_api_keys_ignores_blank_values() {
        let mut config = RouterConfig {
            providers: vec![ProviderConfig::new("openai")],
            ..RouterConfig::default()
        };
        resolve_api_keys(&mut config, |_| Some("   ".into()));
        assert!(config.providers[0].api_key.is_none());
    }

    #[test]
    fn persistable_config_keeps_disk_keys_and_live_knobs() {
        let on_disk: RouterConfig = toml::from_str(SAMPLE).unwrap();
        let mut live = on_disk.clone();
        resolve_api_keys(&mut live, |_| Some("sk-secret".into()));
        live.providers[0].priority = 7;
        live.providers[2].enabled = true;
        live.max_retries = 5;
        live.default_provider = None;

        let merged = persistable_config(&on_disk, &live);
        assert_eq!(merged.max_retries, 5);
        assert_eq!(merged.default_provider, None);
        assert_eq!(merged.providers[0].priority, 7);
        assert!(merged.providers[2].enabled);
        assert!(merged.providers.iter().all(|p| p.api_key.is_none()));
    }

    #[tokio::test]
    async fn save_then_load_preserves_config() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/dir/switchyard.toml");
        let config: RouterConfig = toml::from_str(SAMPLE).unwrap();

        save_router_config(&path, &config).await.unwrap();
        let loaded = load_router_config(&path).await;
        assert_eq!(loaded, config);
    }

    #[test]
    fn default_key_env_per_type() {
        assert_eq!(default_key_env("openai"), Some("OPENAI_API_KEY"));
        assert_eq!(default_key_env("claude"), Some("ANTHROPIC_API_KEY"));
        assert_eq!(default_key_env("gemini"), Some("GEMINI_API_KEY"));
        assert_eq!(default_key_env("ollama"), None);
        assert_eq!(default_key_env("gopher"), None);
    }
}
