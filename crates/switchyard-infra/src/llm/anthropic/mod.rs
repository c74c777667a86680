//! Anthropic Claude adapter.

pub mod client;
pub mod types;

pub use client::AnthropicProvider;
