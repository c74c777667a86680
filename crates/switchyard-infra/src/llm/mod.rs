//! Backend adapter implementations.
//!
//! Contains concrete implementations of the [`LlmProvider`] trait defined
//! in `switchyard-core`: an OpenAI-compatible adapter, Anthropic, Gemini
//! and Ollama.
//!
//! Also provides a provider factory ([`create_provider`]) that constructs
//! the right adapter from a [`ProviderConfig`], and [`default_factories`],
//! the factory table the router is seeded with.
//!
//! [`LlmProvider`]: switchyard_core::llm::provider::LlmProvider

pub mod anthropic;
pub mod gemini;
pub mod health;
pub mod http;
pub mod ollama;
pub mod openai_compat;

use switchyard_core::llm::box_provider::BoxLlmProvider;
use switchyard_core::llm::registry::FactoryRegistry;
use switchyard_types::config::ProviderConfig;
use switchyard_types::error::ProviderError;
use switchyard_types::llm::ProviderType;

use self::anthropic::AnthropicProvider;
use self::gemini::GeminiProvider;
use self::ollama::OllamaProvider;
use self::openai_compat::OpenAiCompatibleProvider;
use self::openai_compat::config::OpenAiCompatConfig;

/// Create a [`BoxLlmProvider`] from a [`ProviderConfig`].
///
/// Matches on the provider type to construct the appropriate concrete
/// adapter. The API key must already be resolved into `config.api_key`
/// (see [`crate::config::resolve_api_keys`]).
///
/// # Errors
///
/// - `not_found` if the type is not a built-in one
/// - `auth` if a cloud adapter has no API key
/// - `internal` if an `openai_compatible` entry lacks its url or model
pub fn create_provider(config: &ProviderConfig) -> Result<BoxLlmProvider, ProviderError> {
    let provider_type: ProviderType = config
        .provider_type
        .parse()
        .map_err(|e: String| ProviderError::not_found(config.name(), e))?;

    match provider_type {
        ProviderType::OpenAi => {
            let provider = OpenAiCompatibleProvider::new(OpenAiCompatConfig::openai(config)?)?;
            Ok(BoxLlmProvider::new(provider))
        }
        ProviderType::OpenAiCompatible => {
            let provider = OpenAiCompatibleProvider::new(OpenAiCompatConfig::compatible(config)?)?;
            Ok(BoxLlmProvider::new(provider))
        }
        ProviderType::Anthropic => Ok(BoxLlmProvider::new(AnthropicProvider::from_config(config)?)),
        ProviderType::Gemini => Ok(BoxLlmProvider::new(GeminiProvider::from_config(config)?)),
        ProviderType::Ollama => Ok(BoxLlmProvider::new(OllamaProvider::from_config(config)?)),
    }
}

/// Factory table with every built-in adapter type registered.
///
/// `claude` is accepted as an alias for `anthropic`.
pub fn default_factories() -> FactoryRegistry {
    let mut factories = FactoryRegistry::new();
    for provider_type in ProviderType::ALL {
        factories.register(provider_type.to_string(), create_provider);
    }
    factories.register("claude", create_provider);
    factories
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_types::error::ErrorKind;

    fn keyed(provider_type: &str) -> ProviderConfig {
        let mut config = ProviderConfig::new(provider_type);
        config.api_key = Some("sk-test-key".into());
        config
    }

    #[test]
    fn test_create_provider_openai() {
        let provider = create_provider(&keyed("openai")).unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.rate_limit().requests_per_minute, 3_500);
    }

    #[test]
    fn test_create_provider_anthropic_with_custom_name() {
        let provider = create_provider(&keyed("anthropic").with_name("claude-main")).unwrap();
        assert_eq!(provider.name(), "claude-main");
        assert_eq!(provider.rate_limit().tokens_per_minute, 40_000);
    }

    #[test]
    fn test_create_provider_claude_alias() {
        let provider = create_provider(&keyed("claude")).unwrap();
        assert_eq!(provider.name(), "claude");
    }

    #[test]
    fn test_create_provider_gemini() {
        let provider = create_provider(&keyed("gemini")).unwrap();
        assert_eq!(provider.name(), "gemini");
        assert_eq!(provider.rate_limit().requests_per_minute, 60);
    }

    #[test]
    fn test_create_provider_ollama_needs_no_key() {
        let provider = create_provider(&ProviderConfig::new("ollama")).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.estimate_tokens("abcdefgh"), 2);
    }

    #[test]
    fn test_create_provider_openai_compatible() {
        let mut config = ProviderConfig::new("openai_compatible").with_name("vllm");
        config.url = Some("http://localhost:8000/v1".into());
        config.default_model = Some("qwen2.5-7b".into());
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.name(), "vllm");
    }

    #[test]
    fn test_create_provider_missing_key() {
        for provider_type in ["openai", "anthropic", "gemini"] {
            match create_provider(&ProviderConfig::new(provider_type)) {
                Err(err) => assert_eq!(err.kind, ErrorKind::Auth),
                Ok(_) => panic!("Expected auth error for {provider_type}"),
            }
        }
    }

    #[test]
    fn test_create_provider_unknown_type() {
        match create_provider(&ProviderConfig::new("gopher")) {
            Err(err) => assert_eq!(err.kind, ErrorKind::NotFound),
            Ok(_) => panic!("Expected not_found"),
        }
    }

    #[test]
    fn test_default_factories_cover_builtin_types() {
        let factories = default_factories();
        assert_eq!(
            factories.types(),
            vec!["anthropic", "claude", "gemini", "ollama", "openai", "openai_compatible"]
        );
    }

    #[test]
    fn test_default_factories_build_registry() {
        let mut disabled = keyed("anthropic");
        disabled.enabled = false;
        let configs = vec![
            ProviderConfig::new("ollama").with_priority(1),
            keyed("openai").with_priority(0),
            disabled,
            ProviderConfig::new("anthropic").with_name("keyless"),
        ];
        let registry = default_factories().build(&configs);
        assert_eq!(registry.names(), vec!["openai", "ollama"]);
        assert_eq!(registry.configs().len(), 4);
    }
}
