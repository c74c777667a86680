//! OpenAI-compatible backend adapter.
//!
//! A single [`OpenAiCompatibleProvider`] serves the hosted OpenAI API and any
//! self-hosted server that speaks the Chat Completions protocol (vLLM,
//! LM Studio, llama.cpp server, ...). Completions are sent as a one-message
//! chat.

pub mod config;
pub mod types;

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use switchyard_core::llm::provider::LlmProvider;
use switchyard_types::error::ProviderError;
use switchyard_types::llm::{
    ChatMessage, ChatOptions, ChatResponse, CompletionOptions, CompletionResponse, FinishReason,
    LlmTool, MessageRole, ModelInfo, RateLimit, TokenUsage, ToolCall, ToolChoice,
};

use super::health::{CLOUD_HEALTH_TTL, HealthCache};
use super::http;
use self::config::OpenAiCompatConfig;
use self::types::{
    ChatCompletionRequest, ChatCompletionResponse, ModelList, WireFunction, WireFunctionCall,
    WireMessage, WireTool, WireToolCall,
};

/// Adapter for any OpenAI-compatible API.
///
/// Cheap to clone; clones share the HTTP client and health cache.
///
/// # API Key Security
///
/// Does NOT derive Debug. The key lives in a [`SecretString`] and is only
/// exposed when building the `Authorization` header.
#[derive(Clone)]
pub struct OpenAiCompatibleProvider {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    client: reqwest::Client,
    probe_client: reqwest::Client,
    api_key: Option<SecretString>,
    base_url: String,
    model: String,
    max_tokens: Option<u32>,
    rate_limit: RateLimit,
    health: HealthCache,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: OpenAiCompatConfig) -> Result<Self, ProviderError> {
        let name = config.provider_name;
        let client = http::build_client(&name, http::REQUEST_TIMEOUT)?;
        let probe_client = http::build_client(&name, http::PROBE_TIMEOUT)?;
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                probe_client,
                api_key: config.api_key,
                base_url: config.base_url,
                model: config.model,
                max_tokens: config.max_tokens,
                rate_limit: config.rate_limit,
                health: HealthCache::new(CLOUD_HEALTH_TTL, true),
                name,
            }),
        })
    }

    /// Model used when a request does not name one.
    pub fn model(&self) -> &str {
        &self.inner.model
    }

    fn to_wire_request(&self, messages: &[ChatMessage], options: &ChatOptions) -> ChatCompletionRequest {
        let mut wire_messages = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = options.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
            wire_messages.push(to_wire_message(&ChatMessage::system(system)));
        }
        wire_messages.extend(messages.iter().map(to_wire_message));

        ChatCompletionRequest {
            model: options.model.clone().unwrap_or_else(|| self.inner.model.clone()),
            messages: wire_messages,
            max_tokens: options.max_tokens.or(self.inner.max_tokens),
            temperature: options.temperature,
            top_p: options.top_p,
            stop: options.stop.clone(),
            stream: false,
            tools: options.tools.iter().map(to_wire_tool).collect(),
            tool_choice: options.tool_choice.as_ref().map(to_wire_tool_choice),
        }
    }

    async fn send_chat(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ProviderError> {
        let inner = &self.inner;
        let response = inner
            .authorized(inner.client.post(http::join_url(&inner.base_url, "chat/completions")))
            .json(request)
            .send()
            .await
            .map_err(|e| http::transport_error(&inner.name, e))?;
        let body = http::read_json(&inner.name, response).await?;
        inner.health.record(true);
        Ok(body)
    }

    fn first_choice(
        &self,
        response: ChatCompletionResponse,
    ) -> Result<(ChatMessage, FinishReason, Meta), ProviderError> {
        let meta = Meta {
            id: response.id,
            model: response.model,
            created: response.created,
            usage: response
                .usage
                .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
                .unwrap_or_default(),
        };
        let choice = response.choices.into_iter().next().ok_or_else(|| {
            ProviderError::internal(&self.inner.name, "no choices returned")
        })?;
        let finish_reason = choice
            .finish_reason
            .as_deref()
            .map(FinishReason::from_vendor)
            .unwrap_or_default();
        Ok((from_wire_message(choice.message), finish_reason, meta))
    }
}

impl Inner {
    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }

    async fn list_models(&self) -> Result<ModelList, ProviderError> {
        let response = self
            .authorized(self.probe_client.get(http::join_url(&self.base_url, "models")))
            .send()
            .await
            .map_err(|e| http::transport_error(&self.name, e))?;
        http::read_json(&self.name, response).await
    }
}

// OpenAiCompatibleProvider intentionally does NOT derive Debug.

struct Meta {
    id: String,
    model: String,
    created: i64,
    usage: TokenUsage,
}

fn created_at(created: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(created, 0)
        .filter(|_| created > 0)
        .unwrap_or_else(Utc::now)
}

fn response_id(id: String) -> String {
    if id.is_empty() {
        format!("chatcmpl-{}", uuid::Uuid::now_v7())
    } else {
        id
    }
}

fn to_wire_message(message: &ChatMessage) -> WireMessage {
    let tool_calls: Vec<WireToolCall> = message
        .tool_calls
        .iter()
        .map(|call| WireToolCall {
            id: call.id.clone(),
            call_type: "function".into(),
            function: WireFunctionCall {
                name: call.name.clone(),
                arguments: match &call.arguments {
                    serde_json::Value::String(raw) => raw.clone(),
                    serde_json::Value::Null => "{}".into(),
                    other => other.to_string(),
                },
            },
        })
        .collect();

    let content = if message.content.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(message.content.clone())
    };

    WireMessage {
        role: message.role.to_string(),
        content,
        name: message.name.clone(),
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    }
}

fn from_wire_message(message: WireMessage) -> ChatMessage {
    let role = message.role.parse().unwrap_or(MessageRole::Assistant);
    let mut out = ChatMessage::new(role, message.content.unwrap_or_default());
    out.name = message.name;
    out.tool_calls = message
        .tool_calls
        .into_iter()
        .map(|call| ToolCall {
            id: call.id,
            name: call.function.name,
            arguments: serde_json::from_str(&call.function.arguments)
                .unwrap_or(serde_json::Value::String(call.function.arguments)),
        })
        .collect();
    out
}

fn to_wire_tool(tool: &LlmTool) -> WireTool {
    let parameters = if tool.parameters.is_null() {
        serde_json::json!({"type": "object", "properties": {}})
    } else {
        tool.parameters.clone()
    };
    WireTool {
        tool_type: "function".into(),
        function: WireFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters,
        },
    }
}

fn to_wire_tool_choice(choice: &ToolChoice) -> serde_json::Value {
    match choice {
        ToolChoice::Tool(name) => serde_json::json!({
            "type": "function",
            "function": {"name": name},
        }),
        other => serde_json::Value::String(other.to_string()),
    }
}

impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, ProviderError> {
        let started = Instant::now();
        let chat_options = ChatOptions {
            model: options.model.clone(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            stop: options.stop.clone(),
            ..ChatOptions::default()
        };
        let request = self.to_wire_request(&[ChatMessage::user(prompt)], &chat_options);
        let response = self.send_chat(&request).await?;
        let (message, finish_reason, meta) = self.first_choice(response)?;

        Ok(CompletionResponse {
            id: response_id(meta.id),
            text: message.content,
            finish_reason,
            usage: meta.usage,
            model: if meta.model.is_empty() { request.model } else { meta.model },
            provider: self.inner.name.clone(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            metadata: options.metadata.clone(),
            created_at: created_at(meta.created),
        })
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        let started = Instant::now();
        let request = self.to_wire_request(messages, options);
        let response = self.send_chat(&request).await?;
        let (message, finish_reason, meta) = self.first_choice(response)?;

        tracing::debug!(
            provider = %self.inner.name,
            model = %request.model,
            tool_calls = message.tool_calls.len(),
            "Chat completion received"
        );

        Ok(ChatResponse {
            id: response_id(meta.id),
            message,
            finish_reason,
            usage: meta.usage,
            model: if meta.model.is_empty() { request.model } else { meta.model },
            provider: self.inner.name.clone(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            metadata: options.metadata.clone(),
            created_at: created_at(meta.created),
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
            .map(|entry| {
                let mut info = ModelInfo::named(entry.id, self.inner.name.as_str());
                info.description = entry.owned_by.map(|owner| format!("owned by {owner}"));
                info.capabilities = vec!["chat".into(), "completion".into()];
                info
            })
            .collect())
    }

    fn rate_limit(&self) -> RateLimit {
        self.inner.rate_limit
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let result = self.inner.list_models().await.map(|_| ());
        self.inner.health.record(result.is_ok());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_types::error::ErrorKind;

    fn provider_at(url: &str) -> OpenAiCompatibleProvider {
        let mut config = config::openai_defaults(SecretString::from("sk-test"), "gpt-4o-mini");
        config.base_url = format!("{url}/v1");
        OpenAiCompatibleProvider::new(config).unwrap()
    }

    const CHAT_BODY: &str = r#"{
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "created": 1700000000,
        "model": "gpt-4o-mini-2024-07-18",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Hi there"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
    }"#;

    #[test]
    fn test_wire_request_prepends_system_prompt_and_defaults_model() {
        let provider = provider_at("http://localhost");
        let options = ChatOptions {
            system_prompt: Some("Be brief".into()),
            max_tokens: Some(64),
            ..ChatOptions::default()
        };
        let req = provider.to_wire_request(&[ChatMessage::user("hi")], &options);
        assert_eq!(req.model, "gpt-4o-mini");
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, "system");
        assert_eq!(req.messages[0].content.as_deref(), Some("Be brief"));
        assert_eq!(req.max_tokens, Some(64));
        assert!(!req.stream);
    }

    #[test]
    fn test_wire_request_serializes_tools() {
        let provider = provider_at("http://localhost");
        let options = ChatOptions {
            tools: vec![LlmTool {
                name: "get_weather".into(),
                description: "Look up weather".into(),
                parameters: serde_json::Value::Null,
            }],
            tool_choice: Some(ToolChoice::Tool("get_weather".into())),
            ..ChatOptions::default()
        };
        let req = provider.to_wire_request(&[ChatMessage::user("weather?")], &options);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["tools"][0]["type"], "function");
        assert_eq!(json["tools"][0]["function"]["name"], "get_weather");
        assert_eq!(json["tools"][0]["function"]["parameters"]["type"], "object");
        assert_eq!(json["tool_choice"]["function"]["name"], "get_weather");
    }

    #[test]
    fn test_tool_call_arguments_round_trip_through_wire_strings() {
        let mut msg = ChatMessage::assistant("");
        msg.tool_calls.push(ToolCall {
            id: "call_1".into(),
            name: "lookup".into(),
            arguments: serde_json::json!({"q": "rust"}),
        });
        let wire = to_wire_message(&msg);
        assert!(wire.content.is_none());
        assert_eq!(wire.tool_calls[0].function.arguments, r#"{"q":"rust"}"#);

        let back = from_wire_message(wire);
        assert_eq!(back.tool_calls[0].arguments["q"], "rust");
    }

    #[tokio::test]
    async fn test_chat_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(CHAT_BODY)
            .create_async()
            .await;

        let provider = provider_at(&server.url());
        let mut options = ChatOptions::default();
        options.metadata.insert("trace".into(), "abc".into());
        let resp = provider
            .chat(&[ChatMessage::user("hello")], &options)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(resp.id, "chatcmpl-123");
        assert_eq!(resp.message.content, "Hi there");
        assert_eq!(resp.message.role, MessageRole::Assistant);
        assert_eq!(resp.finish_reason, FinishReason::Stop);
        assert_eq!(resp.usage.total_tokens, 12);
        assert_eq!(resp.model, "gpt-4o-mini-2024-07-18");
        assert_eq!(resp.provider, "openai");
        assert_eq!(resp.metadata.get("trace").map(String::as_str), Some("abc"));
        assert_eq!(resp.created_at.timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn test_complete_sends_single_user_message() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "messages": [{"role": "user", "content": "Say hi"}],
                "max_tokens": 5
            })))
            .with_status(200)
            .with_body(CHAT_BODY)
            .create_async()
            .await;

        let provider = provider_at(&server.url());
        let options = CompletionOptions {
            max_tokens: Some(5),
            ..CompletionOptions::default()
        };
        let resp = provider.complete("Say hi", &options).await.unwrap();
        mock.assert_async().await;
        assert_eq!(resp.text, "Hi there");
    }

    #[tokio::test]
    async fn test_chat_parses_tool_calls() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(
                r#"{"id": "c1", "model": "gpt-4o", "choices": [{
                    "message": {"role": "assistant", "content": null, "tool_calls": [
                        {"id": "call_9", "type": "function",
                         "function": {"name": "lookup", "arguments": "{\"q\":\"tokio\"}"}}
                    ]},
                    "finish_reason": "tool_calls"
                }]}"#,
            )
            .create_async()
            .await;

        let provider = provider_at(&server.url());
        let resp = provider
            .chat(&[ChatMessage::user("search")], &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.finish_reason, FinishReason::ToolCalls);
        assert_eq!(resp.message.content, "");
        assert_eq!(resp.message.tool_calls.len(), 1);
        assert_eq!(resp.message.tool_calls[0].name, "lookup");
        assert_eq!(resp.message.tool_calls[0].arguments["q"], "tokio");
        assert_eq!(resp.usage, TokenUsage::default());
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_auth() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(401)
            .with_body(r#"{"error": {"message": "Incorrect API key provided"}}"#)
            .create_async()
            .await;

        let provider = provider_at(&server.url());
        let err = provider
            .chat(&[ChatMessage::user("hi")], &ChatOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);
        assert!(!err.retryable);
        assert_eq!(err.code.as_deref(), Some("401"));
        assert!(err.message.contains("Incorrect API key"));
    }

    #[tokio::test]
    async fn test_rate_limited_carries_retry_after() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_header("retry-after", "20")
            .with_body(r#"{"error": {"message": "Rate limit reached"}}"#)
            .create_async()
            .await;

        let provider = provider_at(&server.url());
        let err = provider
            .chat(&[ChatMessage::user("hi")], &ChatOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert!(err.retryable);
        assert_eq!(err.retry_after_ms, Some(20_000));
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(503)
            .with_body("upstream unavailable")
            .create_async()
            .await;

        let provider = provider_at(&server.url());
        let err = provider
            .chat(&[ChatMessage::user("hi")], &ChatOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let provider = provider_at(&server.url());
        let err = provider
            .chat(&[ChatMessage::user("hi")], &ChatOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ParseError);
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn test_connection_refused_is_network() {
        // Nothing listens on port 9 of localhost.
        let provider = provider_at("http://127.0.0.1:9");
        let err = provider.health_check().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Network);
        assert!(err.retryable);
        assert!(!provider.inner.health.is_available());
    }

    #[tokio::test]
    async fn test_models_and_health() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/models")
            .with_status(200)
            .with_body(
                r#"{"object": "list", "data": [
                    {"id": "gpt-4o", "object": "model", "owned_by": "openai"},
                    {"id": "gpt-4o-mini", "object": "model", "owned_by": "openai"}
                ]}"#,
            )
            .expect_at_least(2)
            .create_async()
            .await;

        let provider = provider_at(&server.url());
        provider.health_check().await.unwrap();
        assert!(provider.is_available());

        let models = provider.models().await.unwrap();
        let ids: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["gpt-4o", "gpt-4o-mini"]);
        assert!(models.iter().all(|m| m.provider == "openai" && !m.local));
    }

    #[test]
    fn test_rate_limit_advertised() {
        let provider = provider_at("http://localhost");
        assert_eq!(provider.rate_limit().requests_per_minute, 3_500);
        assert_eq!(provider.rate_limit().tokens_per_minute, 90_000);
    }
}
