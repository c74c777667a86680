//! Configuration and defaults for OpenAI-compatible backends.
//!
//! The hosted OpenAI API and any self-hosted server speaking the same
//! protocol share one adapter; they differ only in base URL, key handling
//! and advertised limits.

use secrecy::SecretString;

use switchyard_types::config::ProviderConfig;
use switchyard_types::error::ProviderError;
use switchyard_types::llm::RateLimit;

/// Hosted OpenAI endpoint.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Model used when neither the request nor the config names one.
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Settings for one [`super::OpenAiCompatibleProvider`].
pub struct OpenAiCompatConfig {
    /// Registry name (e.g., "openai", "local-vllm").
    pub provider_name: String,
    /// Base URL including the version segment (e.g., "https://api.openai.com/v1").
    pub base_url: String,
    /// Sent as a bearer token when present.
    pub api_key: Option<SecretString>,
    pub model: String,
    /// Applied when a request leaves `max_tokens` unset.
    pub max_tokens: Option<u32>,
    pub rate_limit: RateLimit,
}

/// Published OpenAI tier limits.
pub fn openai_rate_limit() -> RateLimit {
    RateLimit {
        requests_per_minute: 3_500,
        requests_per_hour: 10_000,
        requests_per_day: 100_000,
        tokens_per_minute: 90_000,
        tokens_per_hour: 540_000,
        tokens_per_day: 2_000_000,
        retry_after_ms: None,
    }
}

/// Hosted OpenAI defaults.
pub fn openai_defaults(api_key: SecretString, model: &str) -> OpenAiCompatConfig {
    OpenAiCompatConfig {
        provider_name: "openai".into(),
        base_url: OPENAI_BASE_URL.into(),
        api_key: Some(api_key),
        model: model.into(),
        max_tokens: None,
        rate_limit: openai_rate_limit(),
    }
}

impl OpenAiCompatConfig {
    /// Hosted OpenAI from a provider config. The key is mandatory.
    pub fn openai(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let name = config.name();
        let key = config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ProviderError::auth(name, "OpenAI API key is required"))?;

        let mut oai = openai_defaults(
            SecretString::from(key.to_string()),
            config.default_model.as_deref().unwrap_or(OPENAI_DEFAULT_MODEL),
        );
        oai.provider_name = name.to_string();
        if let Some(url) = &config.url {
            oai.base_url = url.clone();
        }
        oai.max_tokens = config.max_tokens;
        Ok(oai)
    }

    /// A self-hosted server speaking the OpenAI protocol.
    ///
    /// Needs a `url` and a `default_model`; the key is optional and no
    /// rate limit is advertised.
    pub fn compatible(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let name = config.name();
        let base_url = config.url.clone().ok_or_else(|| {
            ProviderError::internal(name, "openai_compatible provider requires a url")
        })?;
        let model = config.default_model.clone().ok_or_else(|| {
            ProviderError::internal(name, "openai_compatible provider requires a default_model")
        })?;

        Ok(Self {
            provider_name: name.to_string(),
            base_url,
            api_key: config
                .api_key
                .as_deref()
                .filter(|k| !k.trim().is_empty())
                .map(|k| SecretString::from(k.to_string())),
            model,
            max_tokens: config.max_tokens,
            rate_limit: RateLimit::unlimited(),
        })
    }
}
