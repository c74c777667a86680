//! BoxLlmProvider -- object-safe dynamic dispatch wrapper for LlmProvider.
//!
//! 1. Define an object-safe `LlmProviderDyn` trait with boxed futures
//! 2. Blanket-impl `LlmProviderDyn` for all `T: LlmProvider`
//! 3. `BoxLlmProvider` wraps `Arc<dyn LlmProviderDyn>` and delegates
//!
//! The handle is `Arc`-backed so the router can clone it out of the registry
//! and release the registry lock before awaiting the adapter.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use switchyard_types::error::ProviderError;
use switchyard_types::llm::{
    ChatMessage, ChatOptions, ChatResponse, CompletionOptions, CompletionResponse, ModelInfo,
    RateLimit,
};

use super::provider::LlmProvider;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`LlmProvider`] with boxed futures.
///
/// This trait exists solely to enable dynamic dispatch (`dyn LlmProviderDyn`).
/// A blanket implementation is provided for all types implementing `LlmProvider`.
pub trait LlmProviderDyn: Send + Sync {
    fn name(&self) -> &str;

    fn complete_boxed<'a>(
        &'a self,
        prompt: &'a str,
        options: &'a CompletionOptions,
    ) -> BoxFuture<'a, Result<CompletionResponse, ProviderError>>;

    fn chat_boxed<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        options: &'a ChatOptions,
    ) -> BoxFuture<'a, Result<ChatResponse, ProviderError>>;

    fn is_available(&self) -> bool;

    fn models_boxed(&self) -> BoxFuture<'_, Result<Vec<ModelInfo>, ProviderError>>;

    fn estimate_tokens(&self, text: &str) -> u32;

    fn rate_limit(&self) -> RateLimit;

    fn health_check_boxed(&self) -> BoxFuture<'_, Result<(), ProviderError>>;

    fn initialize_boxed(&self) -> BoxFuture<'_, Result<(), ProviderError>>;

    fn shutdown_boxed(&self) -> BoxFuture<'_, Result<(), ProviderError>>;
}

/// Blanket implementation: any `LlmProvider` automatically implements `LlmProviderDyn`.
impl<T: LlmProvider> LlmProviderDyn for T {
    fn name(&self) -> &str {
        LlmProvider::name(self)
    }

    fn complete_boxed<'a>(
        &'a self,
        prompt: &'a str,
        options: &'a CompletionOptions,
    ) -> BoxFuture<'a, Result<CompletionResponse, ProviderError>> {
        Box::pin(self.complete(prompt, options))
    }

    fn chat_boxed<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        options: &'a ChatOptions,
    ) -> BoxFuture<'a, Result<ChatResponse, ProviderError>> {
        Box::pin(self.chat(messages, options))
    }

    fn is_available(&self) -> bool {
        LlmProvider::is_available(self)
    }

    fn models_boxed(&self) -> BoxFuture<'_, Result<Vec<ModelInfo>, ProviderError>> {
        Box::pin(self.models())
    }

    fn estimate_tokens(&self, text: &str) -> u32 {
        LlmProvider::estimate_tokens(self, text)
    }

    fn rate_limit(&self) -> RateLimit {
        LlmProvider::rate_limit(self)
    }

    fn health_check_boxed(&self) -> BoxFuture<'_, Result<(), ProviderError>> {
        Box::pin(self.health_check())
    }

    fn initialize_boxed(&self) -> BoxFuture<'_, Result<(), ProviderError>> {
        Box::pin(self.initialize())
    }

    fn shutdown_boxed(&self) -> BoxFuture<'_, Result<(), ProviderError>> {
        Box::pin(self.shutdown())
    }
}

/// Type-erased provider handle for runtime provider selection.
///
/// Since `LlmProvider` uses RPITIT, it cannot be used as a trait object directly.
/// `BoxLlmProvider` provides equivalent methods that delegate to the inner
/// `LlmProviderDyn` trait object. Cloning is cheap and shares the adapter.
#[derive(Clone)]
pub struct BoxLlmProvider {
    inner: Arc<dyn LlmProviderDyn>,
}

impl BoxLlmProvider {
    /// Wrap a concrete `LlmProvider` in a type-erased handle.
    pub fn new<T: LlmProvider + 'static>(provider: T) -> Self {
        Self {
            inner: Arc::new(provider),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, ProviderError> {
        self.inner.complete_boxed(prompt, options).await
    }

    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        self.inner.chat_boxed(messages, options).await
    }

    pub fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    pub async fn models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        self.inner.models_boxed().await
    }

    pub fn estimate_tokens(&self, text: &str) -> u32 {
        self.inner.estimate_tokens(text)
    }

    pub fn rate_limit(&self) -> RateLimit {
        self.inner.rate_limit()
    }

    pub async fn health_check(&self) -> Result<(), ProviderError> {
        self.inner.health_check_boxed().await
    }

    pub async fn initialize(&self) -> Result<(), ProviderError> {
        self.inner.initialize_boxed().await
    }

    pub async fn shutdown(&self) -> Result<(), ProviderError> {
        self.inner.shutdown_boxed().await
    }
}

impl fmt::Debug for BoxLlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxLlmProvider")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}
