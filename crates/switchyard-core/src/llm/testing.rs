//! Scriptable in-memory provider for router tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use switchyard_types::error::ProviderError;
use switchyard_types::llm::{
    ChatMessage, ChatOptions, ChatResponse, CompletionOptions, CompletionResponse, FinishReason,
    ModelInfo, RateLimit, TokenUsage,
};

use super::provider::LlmProvider;

/// Provider names in the order they were called, shared across mocks.
pub(crate) type CallLog = Arc<Mutex<Vec<String>>>;

pub(crate) fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// A provider whose outcomes are scripted up front.
///
/// Scripted outcomes are consumed in order; once exhausted every call
/// returns `steady`. Clones share all state, so a test can keep one handle
/// and box the other.
#[derive(Clone)]
pub(crate) struct MockProvider {
    name: String,
    script: Arc<Mutex<VecDeque<Result<(), ProviderError>>>>,
    steady: Result<(), ProviderError>,
    available: Arc<AtomicBool>,
    healthy: Arc<AtomicBool>,
    init_error: Option<ProviderError>,
    rate_limit: RateLimit,
    latency: Duration,
    models: Vec<String>,
    calls: Arc<AtomicUsize>,
    log: Option<CallLog>,
    seen_messages: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    seen_options: Arc<Mutex<Vec<ChatOptions>>>,
    response_metadata: HashMap<String, String>,
}

impl MockProvider {
    /// Always succeeds.
    pub(crate) fn ok(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            steady: Ok(()),
            available: Arc::new(AtomicBool::new(true)),
            healthy: Arc::new(AtomicBool::new(true)),
            init_error: None,
            rate_limit: RateLimit::unlimited(),
            latency: Duration::ZERO,
            models: vec![format!("{name}-model")],
            calls: Arc::new(AtomicUsize::new(0)),
            log: None,
            seen_messages: Arc::new(Mutex::new(Vec::new())),
            seen_options: Arc::new(Mutex::new(Vec::new())),
            response_metadata: HashMap::new(),
        }
    }

    /// Always fails with `error`.
    pub(crate) fn failing(name: &str, error: ProviderError) -> Self {
        Self {
            steady: Err(error),
            ..Self::ok(name)
        }
    }

    /// Fails `times` times with `error`, then succeeds.
    pub(crate) fn flaky(name: &str, error: ProviderError, times: usize) -> Self {
        let mock = Self::ok(name);
        mock.script
            .lock()
            .unwrap()
            .extend(std::iter::repeat_n(Err(error), times));
        mock
    }

    pub(crate) fn unavailable(self) -> Self {
        self.available.store(false, Ordering::SeqCst);
        self
    }

    pub(crate) fn unhealthy(self) -> Self {
        self.healthy.store(false, Ordering::SeqCst);
        self
    }

    pub(crate) fn with_init_error(mut self, error: ProviderError) -> Self {
        self.init_error = Some(error);
        self
    }

    pub(crate) fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn with_log(mut self, log: &CallLog) -> Self {
        self.log = Some(Arc::clone(log));
        self
    }

    pub(crate) fn with_response_metadata(mut self, key: &str, value: &str) -> Self {
        self.response_metadata
            .insert(key.to_string(), value.to_string());
        self
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_messages(&self) -> Option<Vec<ChatMessage>> {
        self.seen_messages.lock().unwrap().last().cloned()
    }

    pub(crate) fn last_options(&self) -> Option<ChatOptions> {
        self.seen_options.lock().unwrap().last().cloned()
    }

    async fn next_outcome(&self) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().unwrap().push(self.name.clone());
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.steady.clone())
    }
}

impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, ProviderError> {
        self.next_outcome().await?;
        Ok(CompletionResponse {
            id: format!("cmpl-{}", self.name),
            text: format!("{} says: {prompt}", self.name),
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::new(5, 7),
            model: options
                .model
                .clone()
                .unwrap_or_else(|| format!("{}-model", self.name)),
            provider: String::new(),
            processing_time_ms: 0,
            metadata: self.response_metadata.clone(),
            created_at: Utc::now(),
        })
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        self.seen_messages.lock().unwrap().push(messages.to_vec());
        self.seen_options.lock().unwrap().push(options.clone());
        self.next_outcome().await?;
        Ok(ChatResponse {
            id: format!("chat-{}", self.name),
            message: ChatMessage::assistant(format!("Hello from {}", self.name)),
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::new(10, 20),
            model: options
                .model
                .clone()
                .unwrap_or_else(|| format!("{}-model", self.name)),
            provider: String::new(),
            processing_time_ms: 0,
            metadata: self.response_metadata.clone(),
            created_at: Utc::now(),
        })
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(ProviderError::network(&self.name, "connection refused"));
        }
        Ok(self
            .models
            .iter()
            .map(|id| ModelInfo::named(id.as_str(), self.name.as_str()))
            .collect())
    }

    fn rate_limit(&self) -> RateLimit {
        self.rate_limit
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProviderError::network(&self.name, "connection refused"))
        }
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        match &self.init_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
