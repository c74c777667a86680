//! AnthropicProvider -- concrete [`LlmProvider`] implementation for Anthropic Claude.
//!
//! Sends requests to the Anthropic Messages API (`/v1/messages`) with
//! proper authentication headers. System messages are lifted into the
//! top-level `system` field and tool-use blocks become tool calls.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is never logged
//! or included in `Debug` output.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};

use switchyard_core::llm::provider::LlmProvider;
use switchyard_types::config::ProviderConfig;
use switchyard_types::error::ProviderError;
use switchyard_types::llm::{
    ChatMessage, ChatOptions, ChatResponse, CompletionOptions, CompletionResponse, FinishReason,
    MessageRole, ModelInfo, RateLimit, TokenUsage, ToolCall, ToolChoice,
};

use super::types::{
    AnthropicContentBlock, AnthropicMessage, AnthropicModelList, AnthropicRequest,
    AnthropicResponse, AnthropicTool,
};
use crate::llm::health::{CLOUD_HEALTH_TTL, HealthCache};
use crate::llm::http;

/// Anthropic Claude adapter.
///
/// # API Key Security
///
/// The API key is stored as a [`SecretString`] and is only exposed when
/// constructing HTTP request headers. It never appears in Debug output,
/// Display output, or tracing logs.
#[derive(Clone)]
pub struct AnthropicProvider {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    client: reqwest::Client,
    probe_client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    max_tokens: u32,
    health: HealthCache,
}

impl AnthropicProvider {
    /// The Anthropic API version header value.
    const API_VERSION: &'static str = "2023-06-01";

    pub const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";

    pub const DEFAULT_MODEL: &'static str = "claude-3-5-haiku-latest";

    /// The Messages API requires `max_tokens`; used when neither the request
    /// nor the config sets one.
    pub const DEFAULT_MAX_TOKENS: u32 = 4_096;

    /// Create a new Anthropic provider.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Anthropic API key wrapped in SecretString
    /// * `model` - Model identifier (e.g., "claude-3-5-haiku-latest")
    pub fn new(api_key: SecretString, model: String) -> Result<Self, ProviderError> {
        Self::build("anthropic", api_key, Self::DEFAULT_BASE_URL, model, Self::DEFAULT_MAX_TOKENS)
    }

    /// Build from a provider config. A missing key is an `auth` error.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let name = config.name();
        let key = config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ProviderError::auth(name, "Anthropic API key is required"))?;

        Self::build(
            name,
            SecretString::from(key.to_string()),
            config.url.as_deref().unwrap_or(Self::DEFAULT_BASE_URL),
            config
                .default_model
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string()),
            config.max_tokens.unwrap_or(Self::DEFAULT_MAX_TOKENS),
        )
    }

    fn build(
        name: &str,
        api_key: SecretString,
        base_url: &str,
        model: String,
        max_tokens: u32,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                client: http::build_client(name, http::REQUEST_TIMEOUT)?,
                probe_client: http::build_client(name, http::PROBE_TIMEOUT)?,
                api_key,
                base_url: base_url.to_string(),
                model,
                max_tokens,
                health: HealthCache::new(CLOUD_HEALTH_TTL, true),
            }),
        })
    }

    /// The default model for this provider.
    pub fn model(&self) -> &str {
        &self.inner.model
    }

    /// Override the base URL (useful for testing or proxies).
    pub fn with_base_url(self, base_url: String) -> Self {
        let inner = &self.inner;
        Self {
            inner: Arc::new(Inner {
                name: inner.name.clone(),
                client: inner.client.clone(),
                probe_client: inner.probe_client.clone(),
                api_key: SecretString::from(inner.api_key.expose_secret().to_string()),
                base_url,
                model: inner.model.clone(),
                max_tokens: inner.max_tokens,
                health: HealthCache::new(CLOUD_HEALTH_TTL, true),
            }),
        }
    }

    /// Convert generic chat inputs into an [`AnthropicRequest`].
    fn to_anthropic_request(&self, messages: &[ChatMessage], options: &ChatOptions) -> AnthropicRequest {
        let mut system_parts: Vec<&str> = Vec::new();
        if let Some(prompt) = options.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
            system_parts.push(prompt);
        }

        let mut wire: Vec<AnthropicMessage> = Vec::with_capacity(messages.len());
        for message in messages {
            let (role, blocks) = match message.role {
                MessageRole::System => {
                    system_parts.push(&message.content);
                    continue;
                }
                MessageRole::User => ("user", vec![text_block(&message.content)]),
                MessageRole::Assistant => ("assistant", assistant_blocks(message)),
                MessageRole::Tool => (
                    "user",
                    vec![AnthropicContentBlock::ToolResult {
                        tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                        content: message.content.clone(),
                    }],
                ),
            };

            // The API wants alternating turns; fold consecutive same-role messages.
            if let Some(last) = wire.last_mut().filter(|last| last.role == role) {
                last.content.extend(blocks);
            } else {
                wire.push(AnthropicMessage {
                    role: role.to_string(),
                    content: blocks,
                });
            }
        }

        let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));

        AnthropicRequest {
            model: options.model.clone().unwrap_or_else(|| self.inner.model.clone()),
            max_tokens: options.max_tokens.unwrap_or(self.inner.max_tokens),
            messages: wire,
            system,
            stream: false,
            temperature: options.temperature,
            top_p: options.top_p,
            stop_sequences: options.stop.clone(),
            tools: options
                .tools
                .iter()
                .map(|tool| AnthropicTool {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    input_schema: if tool.parameters.is_null() {
                        serde_json::json!({"type": "object", "properties": {}})
                    } else {
                        tool.parameters.clone()
                    },
                })
                .collect(),
            tool_choice: options.tool_choice.as_ref().map(|choice| match choice {
                ToolChoice::Auto => serde_json::json!({"type": "auto"}),
                ToolChoice::None => serde_json::json!({"type": "none"}),
                ToolChoice::Required => serde_json::json!({"type": "any"}),
                ToolChoice::Tool(name) => serde_json::json!({"type": "tool", "name": name}),
            }),
        }
    }

    async fn send(&self, body: &AnthropicRequest) -> Result<AnthropicResponse, ProviderError> {
        let inner = &self.inner;
        let response = inner
            .with_headers(inner.client.post(inner.url("/v1/messages")))
            .json(body)
            .send()
            .await
            .map_err(|e| http::transport_error(&inner.name, e))?;
        let parsed = http::read_json(&inner.name, response).await?;
        inner.health.record(true);
        Ok(parsed)
    }
}

impl Inner {
    /// Build the full API URL for a given path.
    fn url(&self, path: &str) -> String {
        http::join_url(&self.base_url, path)
    }

    fn with_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", AnthropicProvider::API_VERSION)
    }

    async fn list_models(&self) -> Result<AnthropicModelList, ProviderError> {
        let response = self
            .with_headers(self.probe_client.get(self.url("/v1/models")))
            .send()
            .await
            .map_err(|e| http::transport_error(&self.name, e))?;
        http::read_json(&self.name, response).await
    }
}

// AnthropicProvider intentionally does NOT derive Debug. The SecretString
// field keeps the key out of output, and omitting Debug keeps the rest of
// the client state out too.

fn text_block(text: &str) -> AnthropicContentBlock {
    AnthropicContentBlock::Text {
        text: text.to_string(),
    }
}

fn assistant_blocks(message: &ChatMessage) -> Vec<AnthropicContentBlock> {
    let mut blocks = Vec::with_capacity(1 + message.tool_calls.len());
    if !message.content.is_empty() || message.tool_calls.is_empty() {
        blocks.push(text_block(&message.content));
    }
    blocks.extend(message.tool_calls.iter().map(|call| AnthropicContentBlock::ToolUse {
        id: call.id.clone(),
        name: call.name.clone(),
        input: match &call.arguments {
            serde_json::Value::String(raw) => {
                serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({}))
            }
            serde_json::Value::Null => serde_json::json!({}),
            other => other.clone(),
        },
    }));
    blocks
}

/// Split response blocks into the joined text and the tool calls.
fn from_content(blocks: Vec<AnthropicContentBlock>) -> (String, Vec<ToolCall>) {
    let mut text = String::new();
    let mut calls = Vec::new();
    for block in blocks {
        match block {
            AnthropicContentBlock::Text { text: t } => text.push_str(&t),
            AnthropicContentBlock::ToolUse { id, name, input } => calls.push(ToolCall {
                id,
                name,
                arguments: input,
            }),
            AnthropicContentBlock::ToolResult { .. } | AnthropicContentBlock::Unsupported => {}
        }
    }
    (text, calls)
}

/// Published Anthropic tier limits.
fn anthropic_rate_limit() -> RateLimit {
    RateLimit {
        requests_per_minute: 1_000,
        requests_per_hour: 5_000,
        requests_per_day: 50_000,
        tokens_per_minute: 40_000,
        tokens_per_hour: 240_000,
        tokens_per_day: 1_200_000,
        retry_after_ms: None,
    }
}

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, ProviderError> {
        let chat_options = ChatOptions {
            model: options.model.clone(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            stop: options.stop.clone(),
            metadata: options.metadata.clone(),
            ..ChatOptions::default()
        };
        let chat = self.chat(&[ChatMessage::user(prompt)], &chat_options).await?;
        Ok(CompletionResponse {
            id: chat.id,
            text: chat.message.content,
            finish_reason: chat.finish_reason,
            usage: chat.usage,
            model: chat.model,
            provider: chat.provider,
            processing_time_ms: chat.processing_time_ms,
            metadata: chat.metadata,
            created_at: chat.created_at,
        })
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        let started = Instant::now();
        let body = self.to_anthropic_request(messages, options);
        let resp = self.send(&body).await?;

        let (text, tool_calls) = from_content(resp.content);
        let mut message = ChatMessage::assistant(text);
        message.tool_calls = tool_calls;

        Ok(ChatResponse {
            id: resp.id,
            message,
            finish_reason: resp
                .stop_reason
                .as_deref()
                .map(FinishReason::from_vendor)
                .unwrap_or_default(),
            usage: TokenUsage::new(resp.usage.input_tokens, resp.usage.output_tokens),
            model: if resp.model.is_empty() { body.model } else { resp.model },
            provider: self.inner.name.clone(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            metadata: options.metadata.clone(),
            created_at: Utc::now(),
        })
    }

    fn is_available(&self) -> bool {
        let inner = Arc::clone(&self.inner);
        self.inner.health.refresh_if_stale(&self.inner.name, move || async move {
            inner.list_models().await.map(|_| ())
        });
        self.inner.health.is_available()
    }

    async fn models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let list = self.inner.list_models().await?;
        Ok(list
            .data
            .into_iter()
            .map(|model| {
                let mut info = ModelInfo::named(model.id, self.inner.name.as_str());
                if let Some(display) = model.display_name {
                    info.name = display;
                }
                info.max_tokens = Some(200_000);
                info.capabilities = vec!["chat".into(), "completion".into(), "tools".into()];
                info
            })
            .collect())
    }

    fn rate_limit(&self) -> RateLimit {
        anthropic_rate_limit()
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let result = self.inner.list_models().await.map(|_| ());
        self.inner.health.record(result.is_ok());
        result
    }
}
