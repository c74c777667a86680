//! Shared domain types for Switchyard.
//!
//! This crate contains the provider-agnostic data shapes used across the
//! router: chat/completion envelopes, the provider error taxonomy, router
//! configuration, and the status/settings views exposed to operators.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod config;
pub mod error;
pub mod llm;
pub mod status;
