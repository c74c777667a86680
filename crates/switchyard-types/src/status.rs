//! Read-only views of router state for operators.
//!
//! None of these feed back into dispatch decisions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Attempts pass through.
    Closed,
    /// Attempts blocked until the cooldown elapses.
    Open,
    /// Cooldown elapsed; the provider is being probed.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time copy of one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

/// Per-provider statistics and health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStats {
    pub name: String,
    pub provider_type: String,
    pub priority: u32,
    pub request_count: u64,
    pub error_count: u64,
    /// Derived: cumulative response time / request count.
    pub average_response_ms: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    /// The adapter's cached availability.
    pub available: bool,
    /// Result of a live health check.
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_error: Option<String>,
    /// Requests admitted in the current rate-limit window.
    pub window_requests: u32,
    /// Estimated tokens admitted in the current rate-limit window.
    pub window_tokens: u64,
}

/// Aggregate snapshot across all registered providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterStats {
    pub providers: Vec<ProviderStats>,
    pub default_provider: Option<String>,
    pub fallback_enabled: bool,
    pub total_providers: usize,
}

/// Connectivity as seen by the settings view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    /// Configured but disabled, or its factory failed.
    NotLoaded,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::NotLoaded => write!(f, "not_loaded"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub name: String,
    pub provider_type: String,
    pub enabled: bool,
    pub priority: u32,
    pub default_model: Option<String>,
    pub status: ConnectionStatus,
    #[serde(default)]
    pub models: Vec<String>,
}

/// Current router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    pub providers: Vec<ProviderSettings>,
    pub default_provider: Option<String>,
    pub fallback_enabled: bool,
    pub fallback_delay_ms: u64,
    pub max_retries: u32,
    pub timeout_ms: u64,
}

/// Per-provider changes within a [`SettingsUpdate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettingsUpdate {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
}

/// Runtime settings change. Absent fields are left as they are.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsUpdate {
    /// `Some("")` clears the default provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<ProviderSettingsUpdate>,
}

/// Outcome of probing one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTestResult {
    pub provider: String,
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub tested_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_state_serde_matches_display() {
        for state in [CircuitState::Closed, CircuitState::Open, CircuitState::HalfOpen] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
    }

    #[test]
    fn test_settings_update_empty_json() {
        let update: SettingsUpdate = serde_json::from_str("{}").unwrap();
        assert!(update.default_provider.is_none());
        assert!(update.providers.is_empty());
    }

    #[test]
    fn test_connection_status_display() {
        assert_eq!(ConnectionStatus::NotLoaded.to_string(), "not_loaded");
        assert_eq!(ConnectionStatus::Connected.to_string(), "connected");
    }
}
