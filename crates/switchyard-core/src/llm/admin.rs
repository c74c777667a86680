//! Operator-facing router administration.
//!
//! Nothing here is on the dispatch path: settings views, runtime updates,
//! connection probes and the statistics snapshot.

use std::collections::HashSet;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::time::Instant;

use switchyard_types::config::{ProviderConfig, RouterConfig};
use switchyard_types::error::RouterError;
use switchyard_types::llm::{ChatMessage, ChatOptions};
use switchyard_types::status::{
    ConnectionStatus, ConnectionTestResult, ProviderSettings, ProviderStats, RouterSettings,
    RouterStats, SettingsUpdate,
};

use super::registry::ProviderRegistry;
use super::router::LlmRouter;
use crate::request_context::RequestContext;

/// Probe message sent by [`LlmRouter::test_connection`].
pub const PROBE_MESSAGE: &str = "Hello";

/// Token cap for the probe reply.
pub const PROBE_MAX_TOKENS: u32 = 16;

impl LlmRouter {
    /// Current settings, covering every configured provider.
    pub fn settings(&self) -> RouterSettings {
        let registry = self.registry_snapshot();
        let settings = self.settings_snapshot();

        let mut configs: Vec<&ProviderConfig> = registry.configs().iter().collect();
        configs.sort_by_key(|config| config.priority);

        let providers = configs
            .into_iter()
            .map(|config| ProviderSettings {
                name: config.name().to_string(),
                provider_type: config.provider_type.clone(),
                enabled: config.enabled,
                priority: config.priority,
                default_model: config.default_model.clone(),
                status: connection_status(&registry, config),
                models: config.models.clone(),
            })
            .collect();

        RouterSettings {
            providers,
            default_provider: settings.default_provider,
            fallback_enabled: settings.fallback_enabled,
            fallback_delay_ms: settings.fallback_delay_ms,
            max_retries: settings.max_retries,
            timeout_ms: settings.timeout_ms,
        }
    }

    /// The effective configuration, suitable for writing back to disk.
    pub fn current_config(&self) -> RouterConfig {
        let registry = self.registry_snapshot();
        let settings = self.settings_snapshot();
        RouterConfig {
            providers: registry.configs().to_vec(),
            default_provider: settings.default_provider,
            fallback_enabled: settings.fallback_enabled,
            fallback_delay_ms: settings.fallback_delay_ms,
            max_retries: settings.max_retries,
            timeout_ms: settings.timeout_ms,
        }
    }

    /// Apply a runtime settings change.
    ///
    /// The whole update is validated before anything is applied. Provider
    /// changes re-register the provider set, which resets breakers and
    /// statistics.
    pub async fn update_settings(&self, update: SettingsUpdate) -> Result<RouterSettings, RouterError> {
        let registry = self.registry_snapshot();
        let known: HashSet<&str> = registry.configs().iter().map(|c| c.name()).collect();

        if let Some(name) = update.default_provider.as_deref() {
            if !name.is_empty() && !known.contains(name) {
                return Err(RouterError::InvalidSettings(format!(
                    "unknown default provider '{name}'"
                )));
            }
        }
        if let Some(unknown) = update
            .providers
            .iter()
            .find(|change| !known.contains(change.name.as_str()))
        {
            return Err(RouterError::InvalidSettings(format!(
                "unknown provider '{}'",
                unknown.name
            )));
        }

        let mut settings = self.settings_snapshot();
        if let Some(name) = update.default_provider {
            settings.default_provider = (!name.is_empty()).then_some(name);
        }
        if let Some(enabled) = update.fallback_enabled {
            settings.fallback_enabled = enabled;
        }
        if let Some(delay) = update.fallback_delay_ms {
            settings.fallback_delay_ms = delay;
        }
        if let Some(retries) = update.max_retries {
            settings.max_retries = retries;
        }
        if let Some(timeout) = update.timeout_ms {
            settings.timeout_ms = timeout;
        }
        self.replace_settings(settings);

        if !update.providers.is_empty() {
            let mut configs = registry.configs().to_vec();
            for change in &update.providers {
                for config in configs.iter_mut().filter(|c| c.name() == change.name) {
                    if let Some(enabled) = change.enabled {
                        config.enabled = enabled;
                    }
                    if let Some(priority) = change.priority {
                        config.priority = priority;
                    }
                }
            }
            self.load_providers(&configs);
            if let Err(err) = self.initialize().await {
                tracing::warn!(error = %err, "Re-registered providers failed to initialize");
            }
        }

        tracing::info!("Router settings updated");
        Ok(self.settings())
    }

    /// Probe one provider with a trivial chat.
    ///
    /// Goes straight to the adapter: breaker, limiter and statistics are
    /// untouched. Only the context ending is an error; every other outcome
    /// is reported in the result.
    pub async fn test_connection(
        &self,
        ctx: &RequestContext,
        name: &str,
        model: Option<&str>,
    ) -> Result<ConnectionTestResult, RouterError> {
        ctx.check()?;
        let registry = self.registry_snapshot();

        let Some(entry) = registry.get(name) else {
            return Ok(failed_probe(name, format!("provider '{name}' is not registered"), None));
        };
        if !entry.provider.is_available() {
            return Ok(failed_probe(name, "provider is not available".to_string(), None));
        }

        let messages = [ChatMessage::user(PROBE_MESSAGE)];
        let options = ChatOptions {
            model: model.map(str::to_string),
            max_tokens: Some(PROBE_MAX_TOKENS),
            ..ChatOptions::default()
        };

        let start = Instant::now();
        let outcome = tokio::select! {
            biased;
            err = ctx.done() => return Err(err),
            outcome = entry.provider.chat(&messages, &options) => outcome,
        };
        let latency_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(response) => {
                let models = match entry.provider.models().await {
                    Ok(models) => models.into_iter().map(|m| m.id).collect(),
                    Err(err) => {
                        tracing::debug!(provider = %name, error = %err, "Model listing failed after probe");
                        Vec::new()
                    }
                };
                tracing::info!(provider = %name, latency_ms, "Connection test succeeded");
                Ok(ConnectionTestResult {
                    provider: name.to_string(),
                    success: true,
                    message: format!("Connected to {name} (model {})", response.model),
                    latency_ms: Some(latency_ms),
                    models,
                    error_detail: None,
                    tested_at: Utc::now(),
                })
            }
            Err(err) => {
                tracing::warn!(provider = %name, error = %err, "Connection test failed");
                Ok(failed_probe(
                    name,
                    format!("Connection test failed: {}", err.kind),
                    Some((latency_ms, err.to_string())),
                ))
            }
        }
    }

    /// Snapshot of every registered provider, with a live health check each.
    pub async fn stats(&self) -> RouterStats {
        let registry = self.registry_snapshot();
        let settings = self.settings_snapshot();

        let providers = join_all(registry.entries().iter().map(|entry| async move {
            let health = entry.provider.health_check().await;
            let statistics = entry.statistics();
            let breaker = entry.breaker.snapshot();
            let (window_requests, window_tokens) = entry.limiter.usage();
            ProviderStats {
                name: entry.name.clone(),
                provider_type: entry.provider_type.clone(),
                priority: entry.priority,
                request_count: statistics.request_count,
                error_count: statistics.error_count,
                average_response_ms: statistics.average_response_ms(),
                last_used_at: statistics.last_used_at,
                circuit_state: breaker.state,
                consecutive_failures: breaker.consecutive_failures,
                available: entry.provider.is_available(),
                healthy: health.is_ok(),
                health_error: health.err().map(|err| err.to_string()),
                window_requests,
                window_tokens,
            }
        }))
        .await;

        RouterStats {
            total_providers: providers.len(),
            providers,
            default_provider: settings.default_provider,
            fallback_enabled: settings.fallback_enabled,
        }
    }
}

fn connection_status(registry: &ProviderRegistry, config: &ProviderConfig) -> ConnectionStatus {
    if !config.enabled {
        return ConnectionStatus::NotLoaded;
    }
    match registry.get(config.name()) {
        None => ConnectionStatus::NotLoaded,
        Some(entry) if entry.looks_usable() => ConnectionStatus::Connected,
        Some(_) => ConnectionStatus::Disconnected,
    }
}

fn failed_probe(name: &str, message: String, detail: Option<(u64, String)>) -> ConnectionTestResult {
    let (latency_ms, error_detail) = match detail {
        Some((latency, detail)) => (Some(latency), Some(detail)),
        None => (None, None),
    };
    ConnectionTestResult {
        provider: name.to_string(),
        success: false,
        message,
        latency_ms,
        models: Vec::new(),
        error_detail,
        tested_at: Utc::now(),
    }
}
