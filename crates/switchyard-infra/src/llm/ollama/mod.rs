//! Ollama adapter for a locally hosted inference server.
//!
//! No API key and no advertised rate limit. Availability starts out false
//! and flips once a health check (or `initialize`) reaches the server.

pub mod types;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use uuid::Uuid;

use switchyard_core::llm::estimate::estimate_tokens_by_chars;
use switchyard_core::llm::provider::LlmProvider;
use switchyard_types::config::ProviderConfig;
use switchyard_types::error::ProviderError;
use switchyard_types::llm::{
    ChatMessage, ChatOptions, ChatResponse, CompletionOptions, CompletionResponse, FinishReason,
    MessageRole, ModelInfo, RateLimit, TokenUsage,
};

use super::health::{HealthCache, LOCAL_HEALTH_TTL};
use super::http;
use self::types::{
    GenerateRequest, GenerateResponse, OllamaChatRequest, OllamaChatResponse, OllamaMessage,
    OllamaOptions, TagList,
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub const DEFAULT_MODEL: &str = "llama3.2";

/// How long `initialize` waits for the server to answer.
pub const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while waiting for readiness.
pub const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct OllamaProvider {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    client: reqwest::Client,
    probe_client: reqwest::Client,
    base_url: String,
    model: String,
    max_tokens: Option<u32>,
    health: HealthCache,
    ready_timeout: Duration,
    ready_poll: Duration,
}

impl OllamaProvider {
    pub fn new(name: &str, base_url: &str, model: &str) -> Result<Self, ProviderError> {
        Ok(Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                client: http::build_client(name, http::REQUEST_TIMEOUT)?,
                probe_client: http::build_client(name, http::PROBE_TIMEOUT)?,
                base_url: base_url.to_string(),
                model: model.to_string(),
                max_tokens: None,
                health: HealthCache::new(LOCAL_HEALTH_TTL, false),
                ready_timeout: READY_TIMEOUT,
                ready_poll: READY_POLL_INTERVAL,
            }),
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let provider = Self::new(
            config.name(),
            config.url.as_deref().unwrap_or(DEFAULT_BASE_URL),
            config.default_model.as_deref().unwrap_or(DEFAULT_MODEL),
        )?;
        Ok(provider.with_max_tokens(config.max_tokens))
    }

    fn map_inner(self, f: impl FnOnce(&mut Inner)) -> Self {
        let mut inner = match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            Err(shared) => Inner {
                name: shared.name.clone(),
                client: shared.client.clone(),
                probe_client: shared.probe_client.clone(),
                base_url: shared.base_url.clone(),
                model: shared.model.clone(),
                max_tokens: shared.max_tokens,
                health: HealthCache::new(LOCAL_HEALTH_TTL, false),
                ready_timeout: shared.ready_timeout,
                ready_poll: shared.ready_poll,
            },
        };
        f(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn with_max_tokens(self, max_tokens: Option<u32>) -> Self {
        self.map_inner(|inner| inner.max_tokens = max_tokens)
    }

    /// Override how long `initialize` waits and how often it polls.
    pub fn with_ready_wait(self, timeout: Duration, poll: Duration) -> Self {
        self.map_inner(|inner| {
            inner.ready_timeout = timeout;
            inner.ready_poll = poll;
        })
    }

    pub fn model(&self) -> &str {
        &self.inner.model
    }

    fn options(&self, max_tokens: Option<u32>, temperature: Option<f64>, top_p: Option<f64>, stop: &[String]) -> Option<OllamaOptions> {
        OllamaOptions {
            num_predict: max_tokens.or(self.inner.max_tokens),
            temperature,
            top_p,
            stop: stop.to_vec(),
        }
        .non_empty()
    }

    fn usage(&self, prompt_eval: Option<u32>, eval: Option<u32>, prompt: &str, output: &str) -> TokenUsage {
        TokenUsage::new(
            prompt_eval.unwrap_or_else(|| self.estimate_tokens(prompt)),
            eval.unwrap_or_else(|| self.estimate_tokens(output)),
        )
    }

    async fn post<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ProviderError> {
        let inner = &self.inner;
        let response = inner
            .client
            .post(http::join_url(&inner.base_url, path))
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
    async fn tags(&self) -> Result<TagList, ProviderError> {
        let response = self
            .probe_client
            .get(http::join_url(&self.base_url, "api/tags"))
            .send()
            .await
            .map_err(|e| http::transport_error(&self.name, e))?;
        http::read_json(&self.name, response).await
    }
}

fn ollama_role(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    }
}

fn finish_reason(done_reason: Option<&str>) -> FinishReason {
    done_reason.map(FinishReason::from_vendor).unwrap_or(FinishReason::Stop)
}

impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, ProviderError> {
        let started = Instant::now();
        let request = GenerateRequest {
            model: options.model.clone().unwrap_or_else(|| self.inner.model.clone()),
            prompt: prompt.to_string(),
            stream: false,
            options: self.options(options.max_tokens, options.temperature, options.top_p, &options.stop),
        };
        let resp: GenerateResponse = self.post("api/generate", &request).await?;

        Ok(CompletionResponse {
            id: Uuid::now_v7().to_string(),
            usage: self.usage(resp.prompt_eval_count, resp.eval_count, prompt, &resp.response),
            finish_reason: finish_reason(resp.done_reason.as_deref()),
            text: resp.response,
            model: if resp.model.is_empty() { request.model } else { resp.model },
            provider: self.inner.name.clone(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            metadata: options.metadata.clone(),
            created_at: Utc::now(),
        })
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        let started = Instant::now();
        let mut wire = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = options.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
            wire.push(OllamaMessage {
                role: "system".into(),
                content: system.to_string(),
            });
        }
        wire.extend(messages.iter().map(|m| OllamaMessage {
            role: ollama_role(m.role).into(),
            content: m.content.clone(),
        }));
        let prompt_text: String = wire.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n");

        let request = OllamaChatRequest {
            model: options.model.clone().unwrap_or_else(|| self.inner.model.clone()),
            messages: wire,
            stream: false,
            options: self.options(options.max_tokens, options.temperature, options.top_p, &options.stop),
        };
        let resp: OllamaChatResponse = self.post("api/chat", &request).await?;

        let role = resp.message.role.parse().unwrap_or(MessageRole::Assistant);
        Ok(ChatResponse {
            id: Uuid::now_v7().to_string(),
            usage: self.usage(resp.prompt_eval_count, resp.eval_count, &prompt_text, &resp.message.content),
            finish_reason: finish_reason(resp.done_reason.as_deref()),
            message: ChatMessage::new(role, resp.message.content),
            model: if resp.model.is_empty() { request.model } else { resp.model },
            provider: self.inner.name.clone(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            metadata: options.metadata.clone(),
            created_at: Utc::now(),
        })
    }

    fn is_available(&self) -> bool {
        let inner = Arc::clone(&self.inner);
        self.inner.health.refresh_if_stale(&self.inner.name, move || async move {
            inner.tags().await.map(|_| ())
        });
        self.inner.health.is_available()
    }

    async fn models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let tags = self.inner.tags().await?;
        Ok(tags
            .models
            .into_iter()
            .map(|tag| {
                let mut info = ModelInfo::named(tag.name, self.inner.name.as_str());
                info.description = Some(format!(
                    "Ollama model {} ({:.2} GB)",
                    info.id,
                    tag.size as f64 / (1024.0 * 1024.0 * 1024.0)
                ));
                info.capabilities = vec!["chat".into(), "completion".into()];
                info.local = true;
                info
            })
            .collect())
    }

    fn estimate_tokens(&self, text: &str) -> u32 {
        estimate_tokens_by_chars(text)
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit::unlimited()
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let result = self.inner.tags().await.map(|_| ());
        self.inner.health.record(result.is_ok());
        result
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        let deadline = tokio::time::Instant::now() + self.inner.ready_timeout;
        loop {
            match self.health_check().await {
                Ok(()) => {
                    tracing::info!(provider = %self.inner.name, url = %self.inner.base_url, "Ollama is ready");
                    return Ok(());
                }
                Err(err) if tokio::time::Instant::now() + self.inner.ready_poll > deadline => {
                    return Err(ProviderError::unavailable(
                        &self.inner.name,
                        format!(
                            "Ollama did not become ready within {:?}: {}",
                            self.inner.ready_timeout, err.message
                        ),
                    ));
                }
                Err(err) => {
                    tracing::debug!(provider = %self.inner.name, error = %err, "Waiting for Ollama");
                    tokio::time::sleep(self.inner.ready_poll).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_types::error::ErrorKind;

    fn provider_at(url: &str) -> OllamaProvider {
        OllamaProvider::new("ollama", url, "llama3.2").unwrap()
    }

    const TAGS_BODY: &str = r#"{"models": [
        {"name": "llama3.2:latest", "size": 2019393189, "digest": "a80c"},
        {"name": "qwen2.5:7b", "size": 4683087332, "digest": "845d"}
    ]}"#;

    #[test]
    fn test_starts_unavailable_and_unlimited() {
        let provider = provider_at("http://localhost:11434");
        assert!(!provider.inner.health.is_available());
        assert_eq!(provider.rate_limit(), RateLimit::unlimited());
        assert_eq!(provider.estimate_tokens("abcdefgh"), 2);
    }

    #[test]
    fn test_estimate_counts_characters_not_bytes() {
        let provider = provider_at("http://localhost:11434");
        assert_eq!(provider.estimate_tokens("日本語日本語日本"), 2);
        assert_eq!(provider.estimate_tokens("héllo wörld!"), 3);
    }

    #[test]
    fn test_from_config_defaults() {
        let provider = OllamaProvider::from_config(&ProviderConfig::new("ollama")).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.model(), DEFAULT_MODEL);
        assert_eq!(provider.inner.base_url, DEFAULT_BASE_URL);
    }

    #[tokio::test]
    async fn test_chat_sends_options_and_parses_reply() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "llama3.2",
                "stream": false,
                "messages": [{"role": "user", "content": "Why is the sky blue?"}],
                "options": {"num_predict": 50, "temperature": 0.2}
            })))
            .with_status(200)
            .with_body(
                r#"{"model": "llama3.2", "created_at": "2024-07-22T20:33:28Z",
                    "message": {"role": "assistant", "content": "Rayleigh scattering."},
                    "done": true, "done_reason": "stop",
                    "prompt_eval_count": 26, "eval_count": 4}"#,
            )
            .create_async()
            .await;

        let provider = provider_at(&server.url());
        let options = ChatOptions {
            max_tokens: Some(50),
            temperature: Some(0.2),
            ..ChatOptions::default()
        };
        let resp = provider
            .chat(&[ChatMessage::user("Why is the sky blue?")], &options)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(resp.message.content, "Rayleigh scattering.");
        assert_eq!(resp.message.role, MessageRole::Assistant);
        assert_eq!(resp.usage, TokenUsage::new(26, 4));
        assert_eq!(resp.finish_reason, FinishReason::Stop);
        assert_eq!(resp.provider, "ollama");
        // A successful call marks the server reachable.
        assert!(provider.inner.health.is_available());
    }

    #[tokio::test]
    async fn test_generate_estimates_usage_when_counts_missing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/generate")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "prompt": "12345678",
                "stream": false
            })))
            .with_status(200)
            .with_body(r#"{"model": "llama3.2", "response": "abcdefghijkl", "done": true}"#)
            .create_async()
            .await;

        let provider = provider_at(&server.url());
        let resp = provider
            .complete("12345678", &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.text, "abcdefghijkl");
        assert_eq!(resp.usage, TokenUsage::new(2, 3));
        assert!(!resp.id.is_empty());
    }

    #[tokio::test]
    async fn test_missing_model_is_model_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(404)
            .with_body(r#"{"error": "model \"mistral\" not found, try pulling it first"}"#)
            .create_async()
            .await;

        let provider = provider_at(&server.url());
        let options = ChatOptions {
            model: Some("mistral".into()),
            ..ChatOptions::default()
        };
        let err = provider
            .chat(&[ChatMessage::user("hi")], &options)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ModelError);
        assert!(err.message.contains("try pulling it first"));
    }

    #[tokio::test]
    async fn test_models_are_local() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(TAGS_BODY)
            .create_async()
            .await;

        let provider = provider_at(&server.url());
        let models = provider.models().await.unwrap();
        assert_eq!(models.len(), 2);
        assert!(models.iter().all(|m| m.local && m.provider == "ollama"));
        assert_eq!(models[0].id, "llama3.2:latest");
        assert!(models[0].description.as_deref().unwrap().contains("GB"));
    }

    #[tokio::test]
    async fn test_initialize_succeeds_when_server_answers() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(TAGS_BODY)
            .create_async()
            .await;

        let provider = provider_at(&server.url());
        provider.initialize().await.unwrap();
        assert!(provider.is_available());
    }

    #[tokio::test]
    async fn test_initialize_gives_up_after_ready_timeout() {
        let provider = provider_at("http://127.0.0.1:9")
            .with_ready_wait(Duration::from_millis(60), Duration::from_millis(20));
        let err = provider.initialize().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);
        assert!(err.retryable);
        assert!(!provider.inner.health.is_available());
    }
}
