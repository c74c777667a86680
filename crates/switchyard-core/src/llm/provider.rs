//! LlmProvider trait definition.
//!
//! This is the capability contract every backend adapter implements. The
//! router calls only this contract and never inspects adapter internals.

use std::future::Future;

use switchyard_types::error::ProviderError;
use switchyard_types::llm::{
    ChatMessage, ChatOptions, ChatResponse, CompletionOptions, CompletionResponse, ModelInfo,
    RateLimit,
};

use super::estimate;

/// Trait for AI backend adapters (OpenAI, Anthropic, Ollama, ...).
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition) for the
/// network-bound operations. The cheap, cached queries (`name`,
/// `is_available`, `estimate_tokens`, `rate_limit`) are synchronous so the
/// router can consult them on the hot path without suspending.
///
/// Cancellation is by drop: the router races these futures against the
/// request context and drops them when it ends.
///
/// Implementations live in switchyard-infra.
pub trait LlmProvider: Send + Sync {
    /// Registry name of this provider (e.g., "openai", "local-ollama").
    fn name(&self) -> &str;

    /// Complete a single prompt.
    fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> impl Future<Output = Result<CompletionResponse, ProviderError>> + Send;

    /// Answer a conversation.
    fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> impl Future<Output = Result<ChatResponse, ProviderError>> + Send;

    /// Cached availability. Must not block; adapters refresh it in the background.
    fn is_available(&self) -> bool;

    /// Models this provider can serve.
    fn models(&self) -> impl Future<Output = Result<Vec<ModelInfo>, ProviderError>> + Send;

    /// Heuristic token estimate used for rate-limit admission.
    fn estimate_tokens(&self, text: &str) -> u32 {
        estimate::estimate_tokens(text)
    }

    /// Advertised rate limits.
    fn rate_limit(&self) -> RateLimit;

    /// Live connectivity check.
    fn health_check(&self) -> impl Future<Output = Result<(), ProviderError>> + Send;

    /// Called once after registration.
    fn initialize(&self) -> impl Future<Output = Result<(), ProviderError>> + Send {
        async { Ok(()) }
    }

    /// Called when the router shuts down.
    fn shutdown(&self) -> impl Future<Output = Result<(), ProviderError>> + Send {
        async { Ok(()) }
    }
}
