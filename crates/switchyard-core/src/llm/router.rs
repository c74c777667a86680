//! Multi-provider router with circuit breaking, rate limiting and fallback.
//!
//! Requests without an explicit provider are walked across the registry in
//! priority order (default provider first) for up to `max_retries` rounds.
//! A retryable failure pauses for `fallback_delay` before the next candidate
//! that is actually attempted; a non-retryable one moves on immediately, and
//! nothing waits once no usable candidate remains. Pinned requests get exactly one
//! attempt and never fall back.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::Instant;
use tracing::Instrument;

use switchyard_types::config::{ProviderConfig, RouterConfig};
use switchyard_types::error::{ProviderError, RouterError};
use switchyard_types::llm::{
    ChatMessage, ChatOptions, ChatResponse, CompletionOptions, CompletionResponse, ModelInfo,
};

use super::box_provider::BoxLlmProvider;
use super::registry::{FactoryRegistry, ProviderEntry, ProviderRegistry};
use crate::request_context::RequestContext;

/// Provider name carried by errors the router raises itself.
pub const ROUTER_ERROR_SOURCE: &str = "router";

/// Global dispatch knobs, adjustable at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    pub default_provider: Option<String>,
    pub fallback_enabled: bool,
    pub fallback_delay_ms: u64,
    pub max_retries: u32,
    pub timeout_ms: u64,
}

impl DispatchSettings {
    pub fn fallback_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_delay_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// Number of passes over the provider list. Never less than one.
    pub fn rounds(&self) -> u32 {
        self.max_retries.max(1)
    }
}

impl From<&RouterConfig> for DispatchSettings {
    fn from(config: &RouterConfig) -> Self {
        Self {
            default_provider: config.default_provider.clone(),
            fallback_enabled: config.fallback_enabled,
            fallback_delay_ms: config.fallback_delay_ms,
            max_retries: config.max_retries,
            timeout_ms: config.timeout_ms,
        }
    }
}

/// Post-processing applied to every successful response.
trait Stamp {
    fn stamp(&mut self, provider: &str, elapsed: Duration, request_metadata: &HashMap<String, String>);
}

fn merge_metadata(target: &mut HashMap<String, String>, request: &HashMap<String, String>) {
    for (key, value) in request {
        target.entry(key.clone()).or_insert_with(|| value.clone());
    }
}

impl Stamp for CompletionResponse {
    fn stamp(&mut self, provider: &str, elapsed: Duration, request_metadata: &HashMap<String, String>) {
        self.provider = provider.to_string();
        if self.processing_time_ms == 0 {
            self.processing_time_ms = elapsed.as_millis() as u64;
        }
        merge_metadata(&mut self.metadata, request_metadata);
    }
}

impl Stamp for ChatResponse {
    fn stamp(&mut self, provider: &str, elapsed: Duration, request_metadata: &HashMap<String, String>) {
        self.provider = provider.to_string();
        if self.processing_time_ms == 0 {
            self.processing_time_ms = elapsed.as_millis() as u64;
        }
        merge_metadata(&mut self.metadata, request_metadata);
    }
}

/// What a single dispatch needs besides the adapter call itself.
struct DispatchRequest<'a> {
    operation: &'static str,
    pinned: Option<&'a str>,
    /// Text the adapter estimates tokens from for rate-limit admission.
    estimate_text: &'a str,
    metadata: &'a HashMap<String, String>,
}

/// Routes chat and completion requests across registered providers.
///
/// Dispatch never holds a lock across an await: the registry is an
/// `Arc` snapshot, and each entry guards its own breaker, limiter and
/// statistics.
pub struct LlmRouter {
    registry: RwLock<Arc<ProviderRegistry>>,
    settings: RwLock<DispatchSettings>,
    factories: RwLock<FactoryRegistry>,
}

impl LlmRouter {
    /// Build a router and register every enabled provider in `config`.
    pub fn new(config: &RouterConfig, factories: FactoryRegistry) -> Self {
        let registry = factories.build(&config.providers);
        tracing::info!(
            providers = registry.len(),
            configured = config.providers.len(),
            "Router created"
        );
        Self {
            registry: RwLock::new(Arc::new(registry)),
            settings: RwLock::new(DispatchSettings::from(config)),
            factories: RwLock::new(factories),
        }
    }

    /// Register (or replace) the factory for a provider type.
    ///
    /// Takes effect on the next [`load_providers`](Self::load_providers).
    pub fn register_factory<F>(&self, provider_type: impl Into<String>, factory: F)
    where
        F: Fn(&ProviderConfig) -> Result<BoxLlmProvider, ProviderError> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .expect("factory lock poisoned")
            .register(provider_type, factory);
    }

    /// Rebuild the registry from `configs` and swap it in atomically.
    ///
    /// Breakers, limiters and statistics of the previous registry are
    /// discarded. Returns the number of providers now registered.
    pub fn load_providers(&self, configs: &[ProviderConfig]) -> usize {
        let registry = self
            .factories
            .read()
            .expect("factory lock poisoned")
            .build(configs);
        let loaded = registry.len();
        *self.registry.write().expect("registry lock poisoned") = Arc::new(registry);
        tracing::info!(providers = loaded, "Providers loaded");
        loaded
    }

    /// Run every adapter's `initialize` hook concurrently.
    ///
    /// Fails only when providers are registered and none of them initialized.
    pub async fn initialize(&self) -> Result<(), RouterError> {
        let registry = self.registry_snapshot();
        if registry.is_empty() {
            tracing::warn!("No providers registered");
            return Ok(());
        }

        let results = join_all(registry.entries().iter().map(|entry| async move {
            entry.provider.initialize().await.map_err(|err| {
                tracing::warn!(provider = %entry.name, error = %err, "Provider failed to initialize");
                err
            })
        }))
        .await;

        let total = results.len();
        let failures: Vec<ProviderError> = results.into_iter().filter_map(Result::err).collect();
        if failures.len() == total {
            return Err(RouterError::InitializationFailed { failures });
        }
        tracing::info!(
            initialized = total - failures.len(),
            failed = failures.len(),
            "Router initialized"
        );
        Ok(())
    }

    /// Run every adapter's `shutdown` hook. Failures are logged, not returned.
    pub async fn shutdown(&self) {
        let registry = self.registry_snapshot();
        join_all(registry.entries().iter().map(|entry| async move {
            if let Err(err) = entry.provider.shutdown().await {
                tracing::warn!(provider = %entry.name, error = %err, "Provider shutdown failed");
            }
        }))
        .await;
        tracing::debug!("Router shut down");
    }

    /// Answer a conversation.
    ///
    /// A non-empty `system_prompt` becomes a leading system message and is
    /// cleared from the options the adapter sees.
    pub async fn chat(
        &self,
        ctx: &RequestContext,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse, RouterError> {
        let mut options = options.clone();
        let mut prepared = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = options.system_prompt.take().filter(|s| !s.trim().is_empty()) {
            prepared.push(ChatMessage::system(system));
        }
        prepared.extend_from_slice(messages);

        let estimate_text = prepared
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let request = DispatchRequest {
            operation: "chat",
            pinned: options.provider.as_deref(),
            estimate_text: &estimate_text,
            metadata: &options.metadata,
        };

        let (prepared, options) = (&prepared, &options);
        self.dispatch(ctx, request, move |provider: BoxLlmProvider| async move {
            provider.chat(prepared, options).await
        })
        .await
    }

    /// Complete a single prompt.
    pub async fn complete(
        &self,
        ctx: &RequestContext,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, RouterError> {
        let request = DispatchRequest {
            operation: "complete",
            pinned: options.provider.as_deref(),
            estimate_text: prompt,
            metadata: &options.metadata,
        };

        self.dispatch(ctx, request, move |provider: BoxLlmProvider| async move {
            provider.complete(prompt, options).await
        })
        .await
    }

    /// Registered provider names in dispatch order.
    pub fn provider_names(&self) -> Vec<String> {
        self.registry_snapshot()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Union of models across usable providers.
    ///
    /// A provider whose listing fails is logged and left out.
    pub async fn models(&self) -> Vec<ModelInfo> {
        let registry = self.registry_snapshot();
        let listings = join_all(
            registry
                .entries()
                .iter()
                .filter(|entry| entry.looks_usable())
                .map(|entry| async move { (entry, entry.provider.models().await) }),
        )
        .await;

        let mut models = Vec::new();
        for (entry, listing) in listings {
            match listing {
                Ok(mut found) => {
                    for model in &mut found {
                        model.provider = entry.name.clone();
                    }
                    models.extend(found);
                }
                Err(err) => {
                    tracing::warn!(provider = %entry.name, error = %err, "Failed to list models");
                }
            }
        }
        models
    }

    pub(crate) fn registry_snapshot(&self) -> Arc<ProviderRegistry> {
        Arc::clone(&self.registry.read().expect("registry lock poisoned"))
    }

    pub(crate) fn settings_snapshot(&self) -> DispatchSettings {
        self.settings.read().expect("settings lock poisoned").clone()
    }

    pub(crate) fn replace_settings(&self, settings: DispatchSettings) {
        *self.settings.write().expect("settings lock poisoned") = settings;
    }

    async fn dispatch<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        request: DispatchRequest<'_>,
        call: F,
    ) -> Result<T, RouterError>
    where
        T: Stamp,
        F: Fn(BoxLlmProvider) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let span = tracing::info_span!(
            "dispatch",
            request_id = %ctx.request_id,
            operation = request.operation,
            pinned = request.pinned.unwrap_or(""),
        );
        self.run_dispatch(ctx, &request, &call).instrument(span).await
    }

    async fn run_dispatch<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        request: &DispatchRequest<'_>,
        call: &F,
    ) -> Result<T, RouterError>
    where
        T: Stamp,
        F: Fn(BoxLlmProvider) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let settings = self.settings_snapshot();
        let ctx = match settings.timeout() {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.clone(),
        };
        ctx.check()?;

        let registry = self.registry_snapshot();

        if let Some(name) = request.pinned {
            let entry = registry.get(name).ok_or_else(|| {
                ProviderError::not_found(name, format!("provider '{name}' is not registered"))
            })?;
            if !entry.is_usable() {
                return Err(ProviderError::unavailable(name, "provider is not available").into());
            }
            return self
                .attempt(&ctx, entry, request, call)
                .await?
                .map_err(RouterError::from);
        }

        if !settings.fallback_enabled {
            let entry = single_candidate(&registry, settings.default_provider.as_deref())
                .ok_or_else(|| {
                    ProviderError::unavailable(ROUTER_ERROR_SOURCE, "no provider available")
                })?;
            return self
                .attempt(&ctx, &entry, request, call)
                .await?
                .map_err(RouterError::from);
        }

        let candidates = candidate_order(&registry, settings.default_provider.as_deref());
        let rounds = settings.rounds();
        let delay = settings.fallback_delay();
        let mut last_error: Option<ProviderError> = None;
        // Set after a retryable failure; the pause is taken only once another
        // usable candidate is actually about to be attempted.
        let mut pause_pending = false;

        for round in 1..=rounds {
            for entry in &candidates {
                if !entry.is_usable() {
                    tracing::debug!(provider = %entry.name, round, "Provider unavailable, skipping");
                    continue;
                }

                if std::mem::take(&mut pause_pending) {
                    tracing::debug!(
                        delay_ms = settings.fallback_delay_ms,
                        next = %entry.name,
                        "Waiting before fallback"
                    );
                    ctx.sleep(delay).await?;
                    if !entry.is_usable() {
                        tracing::debug!(provider = %entry.name, round, "Provider unavailable after delay, skipping");
                        continue;
                    }
                }

                match self.attempt(&ctx, entry, request, call).await? {
                    Ok(response) => return Ok(response),
                    Err(err) => {
                        tracing::warn!(
                            provider = %entry.name,
                            round,
                            error = %err,
                            retryable = err.retryable,
                            "Provider failed, trying next"
                        );
                        pause_pending = err.retryable && !delay.is_zero();
                        last_error = Some(err);
                    }
                }
            }
        }

        let err = last_error.unwrap_or_else(|| {
            ProviderError::unavailable(ROUTER_ERROR_SOURCE, "all providers are unavailable")
        });
        Err(err.into())
    }

    /// One attempt against one provider.
    ///
    /// The outer error is the context ending (the attempt is then not
    /// recorded); the inner result is the provider's outcome.
    async fn attempt<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        entry: &ProviderEntry,
        request: &DispatchRequest<'_>,
        call: &F,
    ) -> Result<Result<T, ProviderError>, RouterError>
    where
        T: Stamp,
        F: Fn(BoxLlmProvider) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        ctx.check()?;

        let estimated = entry.provider.estimate_tokens(request.estimate_text);
        if let Err(err) = entry.limiter.check(estimated) {
            entry.record_attempt(Duration::ZERO, false);
            return Ok(Err(err));
        }

        tracing::debug!(
            provider = %entry.name,
            estimated_tokens = estimated,
            remaining_ms = ?ctx.remaining().map(|left| left.as_millis() as u64),
            "Attempting provider"
        );
        let start = Instant::now();
        let outcome = tokio::select! {
            biased;
            err = ctx.done() => {
                tracing::debug!(provider = %entry.name, error = %err, "Attempt interrupted");
                return Err(err);
            }
            outcome = call(entry.provider.clone()) => outcome,
        };
        let elapsed = start.elapsed();
        entry.record_attempt(elapsed, outcome.is_ok());

        Ok(outcome.map(|mut response| {
            response.stamp(&entry.name, elapsed, request.metadata);
            tracing::debug!(
                provider = %entry.name,
                elapsed_ms = elapsed.as_millis() as u64,
                "Provider succeeded"
            );
            response
        }))
    }
}

/// Default provider first (if registered), then the rest by priority.
fn candidate_order(registry: &ProviderRegistry, default: Option<&str>) -> Vec<Arc<ProviderEntry>> {
    let primary = default.and_then(|name| registry.get(name));
    let mut order = Vec::with_capacity(registry.len());
    if let Some(primary) = primary {
        order.push(Arc::clone(primary));
    }
    order.extend(
        registry
            .entries()
            .iter()
            .filter(|entry| primary.is_none_or(|p| !Arc::ptr_eq(p, entry)))
            .cloned(),
    );
    order
}

/// The one provider a no-fallback dispatch may use.
///
/// A registered default provider is used only if usable; otherwise the first
/// usable provider in priority order.
fn single_candidate(registry: &ProviderRegistry, default: Option<&str>) -> Option<Arc<ProviderEntry>> {
    if let Some(primary) = default.and_then(|name| registry.get(name)) {
        return primary.is_usable().then(|| Arc::clone(primary));
    }
    registry.entries().iter().find(|entry| entry.is_usable()).cloned()
}
