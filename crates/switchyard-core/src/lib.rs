//! Routing core for Switchyard.
//!
//! This crate defines the provider contract that backend adapters implement
//! and the machinery around it: per-provider circuit breakers and rate
//! limiters, usage statistics, the provider registry, and the fallback
//! router. It depends only on `switchyard-types` -- never on
//! `switchyard-infra` or any HTTP client.

pub mod llm;
pub mod request_context;
