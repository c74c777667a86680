//! Google Gemini adapter.
//!
//! Talks to the Generative Language REST API (`/v1beta`). The API key is
//! passed as the `key` query parameter. Gemini has no system role, so the
//! system prompt is sent as a leading user turn acknowledged by the model.

pub mod types;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use switchyard_core::llm::estimate::estimate_tokens_by_chars;
use switchyard_core::llm::provider::LlmProvider;
use switchyard_types::config::ProviderConfig;
use switchyard_types::error::ProviderError;
use switchyard_types::llm::{
    ChatMessage, ChatOptions, ChatResponse, CompletionOptions, CompletionResponse, FinishReason,
    LlmTool, MessageRole, ModelInfo, RateLimit, TokenUsage, ToolCall, ToolChoice,
};

use self::types::{
    FunctionCallingConfig, FunctionDeclaration, GeminiContent, GeminiModelList, GeminiPart,
    GeminiRequest, GeminiResponse, GeminiTool, GenerationConfig, ToolConfig,
};
use super::health::{CLOUD_HEALTH_TTL, HealthCache};
use super::http;

/// Reply the model "gives" to the system prompt turn.
const SYSTEM_ACK: &str = "I understand. How can I help you?";

/// Output limit assumed when the model list does not report one.
const DEFAULT_OUTPUT_LIMIT: u32 = 8_192;

/// Gemini adapter. Cheap to clone; clones share the HTTP client and health cache.
#[derive(Clone)]
pub struct GeminiProvider {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    client: reqwest::Client,
    probe_client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    max_tokens: Option<u32>,
    health: HealthCache,
}

impl GeminiProvider {
    pub const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com/v1beta";

    pub const DEFAULT_MODEL: &'static str = "gemini-1.5-flash";

    /// Build from a provider config. A missing key is an `auth` error.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let name = config.name();
        let key = config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ProviderError::auth(name, "Gemini API key is required"))?;

        Ok(Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                client: http::build_client(name, http::REQUEST_TIMEOUT)?,
                probe_client: http::build_client(name, http::PROBE_TIMEOUT)?,
                api_key: SecretString::from(key.to_string()),
                base_url: config
                    .url
                    .clone()
                    .unwrap_or_else(|| Self::DEFAULT_BASE_URL.to_string()),
                model: config
                    .default_model
                    .clone()
                    .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string()),
                max_tokens: config.max_tokens,
                health: HealthCache::new(CLOUD_HEALTH_TTL, true),
            }),
        })
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

    pub fn model(&self) -> &str {
        &self.inner.model
    }

    fn to_gemini_request(&self, messages: &[ChatMessage], options: &ChatOptions) -> GeminiRequest {
        let mut contents = Vec::with_capacity(messages.len() + 2);

        if let Some(prompt) = options.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
            contents.push(turn("user", prompt));
            contents.push(turn("model", SYSTEM_ACK));
        }

        for message in messages {
            match message.role {
                MessageRole::System => continue,
                MessageRole::Assistant => contents.push(model_turn(message)),
                MessageRole::User | MessageRole::Tool => contents.push(turn("user", &message.content)),
            }
        }

        let generation_config = GenerationConfig {
            max_output_tokens: options.max_tokens.or(self.inner.max_tokens),
            temperature: options.temperature,
            top_p: options.top_p,
            stop_sequences: options.stop.clone(),
        };
        let has_generation_config = generation_config.max_output_tokens.is_some()
            || generation_config.temperature.is_some()
            || generation_config.top_p.is_some()
            || !generation_config.stop_sequences.is_empty();

        let tools = convert_tools(&options.tools);
        let tool_config = match (&options.tool_choice, tools.is_empty()) {
            (Some(choice), false) => Some(calling_config(choice)),
            _ => None,
        };

        GeminiRequest {
            contents,
            generation_config: has_generation_config.then_some(generation_config),
            tools,
            tool_config,
        }
    }

    async fn send(&self, model: &str, body: &GeminiRequest) -> Result<GeminiResponse, ProviderError> {
        let inner = &self.inner;
        let response = inner
            .client
            .post(inner.url(&format!("/models/{model}:generateContent")))
            .query(&[("key", inner.api_key.expose_secret())])
            .json(body)
            .send()
            .await
            .map_err(|e| http::transport_error(&inner.name, e))?;
        let parsed = http::read_json(&inner.name, response).await?;
        inner.health.record(true);
        Ok(parsed)
    }

    /// Static list served when the model listing is unreachable or empty.
    fn known_models(&self) -> Vec<ModelInfo> {
        let available = self.inner.health.is_available();
        [
            ("gemini-pro", "Gemini Pro", "Google's most capable generative AI model", false),
            ("gemini-pro-vision", "Gemini Pro Vision", "Gemini Pro with vision capabilities", true),
        ]
        .into_iter()
        .map(|(id, name, description, vision)| {
            let mut info = ModelInfo::named(id, self.inner.name.as_str());
            info.name = name.to_string();
            info.description = Some(description.to_string());
            info.max_tokens = Some(DEFAULT_OUTPUT_LIMIT);
            info.capabilities = vec!["chat".into(), "completion".into()];
            if vision {
                info.capabilities.push("vision".into());
            }
            info.available = available;
            info
        })
        .collect()
    }
}

impl Inner {
    fn url(&self, path: &str) -> String {
        http::join_url(&self.base_url, path)
    }

    async fn list_models(&self) -> Result<GeminiModelList, ProviderError> {
        let response = self
            .probe_client
            .get(self.url("/models"))
            .query(&[("key", self.api_key.expose_secret())])
            .send()
            .await
            .map_err(|e| http::transport_error(&self.name, e))?;
        http::read_json(&self.name, response).await
    }
}

fn turn(role: &str, text: &str) -> GeminiContent {
    GeminiContent {
        role: role.to_string(),
        parts: vec![GeminiPart::text(text)],
    }
}

fn model_turn(message: &ChatMessage) -> GeminiContent {
    let mut parts = Vec::with_capacity(1 + message.tool_calls.len());
    if !message.content.is_empty() || message.tool_calls.is_empty() {
        parts.push(GeminiPart::text(message.content.as_str()));
    }
    parts.extend(message.tool_calls.iter().map(|call| GeminiPart {
        text: None,
        function_call: Some(types::FunctionCall {
            name: call.name.clone(),
            args: match &call.arguments {
                serde_json::Value::String(raw) => {
                    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({}))
                }
                serde_json::Value::Null => serde_json::json!({}),
                other => other.clone(),
            },
        }),
    }));
    GeminiContent {
        role: "model".to_string(),
        parts,
    }
}

/// One `tools` entry per tool, each holding a single declaration.
fn convert_tools(tools: &[LlmTool]) -> Vec<GeminiTool> {
    tools
        .iter()
        .map(|tool| GeminiTool {
            function_declarations: vec![FunctionDeclaration {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: if tool.parameters.is_null() {
                    serde_json::json!({"type": "object", "properties": {}})
                } else {
                    fix_schema(tool.parameters.clone())
                },
            }],
        })
        .collect()
}

/// Gemini rejects array schemas without `items`; fill them in recursively.
fn fix_schema(mut schema: serde_json::Value) -> serde_json::Value {
    let Some(object) = schema.as_object_mut() else {
        return schema;
    };

    if let Some(properties) = object.get_mut("properties").and_then(|p| p.as_object_mut()) {
        for value in properties.values_mut() {
            *value = fix_schema(value.take());
        }
    }

    if object.get("type").and_then(|t| t.as_str()) == Some("array") {
        match object.get_mut("items") {
            Some(items) => *items = fix_schema(items.take()),
            None => {
                object.insert(
                    "items".to_string(),
                    serde_json::json!({"type": "object", "description": "Array item"}),
                );
            }
        }
    }

    schema
}

fn calling_config(choice: &ToolChoice) -> ToolConfig {
    let (mode, allowed) = match choice {
        ToolChoice::Auto => ("AUTO", Vec::new()),
        ToolChoice::None => ("NONE", Vec::new()),
        ToolChoice::Required => ("ANY", Vec::new()),
        ToolChoice::Tool(name) => ("ANY", vec![name.clone()]),
    };
    ToolConfig {
        function_calling_config: FunctionCallingConfig {
            mode: mode.to_string(),
            allowed_function_names: allowed,
        },
    }
}

/// Split the first candidate's parts into joined text and tool calls.
fn from_parts(parts: Vec<GeminiPart>) -> (String, Vec<ToolCall>) {
    let mut text = String::new();
    let mut calls = Vec::new();
    for part in parts {
        if let Some(t) = part.text {
            text.push_str(&t);
        }
        if let Some(call) = part.function_call {
            let index = calls.len();
            calls.push(ToolCall {
                id: format!("call_{}_{}_{index}", call.name, Uuid::now_v7().simple()),
                arguments: if call.args.is_object() {
                    call.args
                } else {
                    serde_json::json!({})
                },
                name: call.name,
            });
        }
    }
    (text, calls)
}

/// Published free-tier limits.
fn gemini_rate_limit() -> RateLimit {
    RateLimit {
        requests_per_minute: 60,
        requests_per_hour: 1_000,
        requests_per_day: 10_000,
        tokens_per_minute: 32_000,
        tokens_per_hour: 200_000,
        tokens_per_day: 1_000_000,
        retry_after_ms: None,
    }
}

impl LlmProvider for GeminiProvider {
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
        let model = options.model.clone().unwrap_or_else(|| self.inner.model.clone());
        let body = self.to_gemini_request(messages, options);
        let resp = self.send(&model, &body).await?;

        let candidate = resp
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::internal(&self.inner.name, "No candidates in Gemini response"))?;
        let parts = candidate
            .content
            .map(|content| content.parts)
            .filter(|parts| !parts.is_empty())
            .ok_or_else(|| ProviderError::internal(&self.inner.name, "No content parts in Gemini response"))?;

        let (text, tool_calls) = from_parts(parts);
        let finish_reason = if tool_calls.is_empty() {
            candidate
                .finish_reason
                .as_deref()
                .map(|reason| FinishReason::from_vendor(&reason.to_lowercase()))
                .unwrap_or_default()
        } else {
            FinishReason::ToolCalls
        };
        let mut message = ChatMessage::assistant(text);
        message.tool_calls = tool_calls;

        let usage = resp.usage_metadata.unwrap_or_default();
        let mut usage_total = TokenUsage::new(usage.prompt_token_count, usage.candidates_token_count);
        if usage.total_token_count > 0 {
            usage_total.total_tokens = usage.total_token_count;
        }

        Ok(ChatResponse {
            id: resp
                .response_id
                .unwrap_or_else(|| format!("gemini-{}", Uuid::now_v7())),
            message,
            finish_reason,
            usage: usage_total,
            model: resp.model_version.unwrap_or(model),
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

    /// Models that support `generateContent`. Falls back to a known list
    /// when the listing fails or comes back empty.
    async fn models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let list = match self.inner.list_models().await {
            Ok(list) => list,
            Err(err) => {
                tracing::debug!(provider = %self.inner.name, error = %err, "Model listing failed, using known models");
                return Ok(self.known_models());
            }
        };

        let models: Vec<ModelInfo> = list
            .models
            .into_iter()
            .filter(|model| {
                model
                    .supported_generation_methods
                    .iter()
                    .any(|method| method == "generateContent")
            })
            .map(|model| {
                let id = model
                    .name
                    .strip_prefix("models/")
                    .unwrap_or(&model.name)
                    .to_string();
                let mut info = ModelInfo::named(id, self.inner.name.as_str());
                if let Some(display) = model.display_name {
                    info.name = display;
                }
                info.description = model.description;
                info.max_tokens = Some(model.output_token_limit.unwrap_or(DEFAULT_OUTPUT_LIMIT));
                info.capabilities = vec!["chat".into(), "completion".into(), "tools".into()];
                info
            })
            .collect();

        if models.is_empty() {
            return Ok(self.known_models());
        }
        Ok(models)
    }

    /// Larger of 1.3 tokens per word and four characters per token.
    fn estimate_tokens(&self, text: &str) -> u32 {
        let words = (text.split_whitespace().count() as f64 * 1.3) as u32;
        words.max(estimate_tokens_by_chars(text))
    }

    fn rate_limit(&self) -> RateLimit {
        gemini_rate_limit()
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let result = self.inner.list_models().await.map(|_| ());
        self.inner.health.record(result.is_ok());
        result
    }
}
