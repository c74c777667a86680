//! LLM provider abstractions and routing.
//!
//! - `LlmProvider`: RPITIT trait for concrete backend adapters
//! - `BoxLlmProvider`: Object-safe, cloneable wrapper for dynamic dispatch
//! - `CircuitBreaker` / `RateLimiter`: per-provider admission guards
//! - `ProviderRegistry` / `FactoryRegistry`: the priority-ordered provider set
//! - `LlmRouter`: dispatch with fallback, plus the admin surface

pub mod admin;
pub mod box_provider;
pub mod circuit_breaker;
pub mod estimate;
pub mod provider;
pub mod rate_limiter;
pub mod registry;
pub mod router;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;
