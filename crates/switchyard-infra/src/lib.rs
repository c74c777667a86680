//! Infrastructure layer for Switchyard.
//!
//! Concrete backend adapters behind the `LlmProvider` contract from
//! `switchyard-core`, plus TOML configuration loading.

pub mod config;
pub mod llm;
