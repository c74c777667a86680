//! Error taxonomy shared by adapters and the router.
//!
//! [`ProviderError`] is the value adapters raise and the fallback loop
//! inspects: its `retryable` flag alone decides whether the router advances
//! to the next provider immediately or waits first. [`RouterError`] is what a
//! dispatch returns to the caller.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of provider error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or missing credentials.
    Auth,
    /// Transport failure.
    Network,
    /// Local or remote throttling.
    RateLimit,
    /// Bad request or unsupported model.
    ModelError,
    /// Circuit open or provider not configured.
    Unavailable,
    /// Named provider unknown.
    NotFound,
    /// Malformed response from the backend.
    ParseError,
    Internal,
}

impl ErrorKind {
    /// Retryability a freshly constructed error of this kind starts with.
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::RateLimit | ErrorKind::Unavailable
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Auth => "auth",
            ErrorKind::Network => "network",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ModelError => "model_error",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auth" => Ok(ErrorKind::Auth),
            "network" => Ok(ErrorKind::Network),
            "rate_limit" => Ok(ErrorKind::RateLimit),
            "model_error" => Ok(ErrorKind::ModelError),
            "unavailable" => Ok(ErrorKind::Unavailable),
            "not_found" => Ok(ErrorKind::NotFound),
            "parse_error" => Ok(ErrorKind::ParseError),
            "internal" => Ok(ErrorKind::Internal),
            other => Err(format!("invalid error kind: '{other}'")),
        }
    }
}

/// A typed failure from one provider attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{provider}: {kind}: {message}")]
pub struct ProviderError {
    pub provider: String,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ProviderError {
    /// Create an error whose retryability starts at the kind's default.
    pub fn new(provider: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind,
            message: message.into(),
            code: None,
            retryable: kind.default_retryable(),
            retry_after_ms: None,
        }
    }

    pub fn auth(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ErrorKind::Auth, message)
    }

    pub fn network(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ErrorKind::Network, message)
    }

    /// Throttling error carrying an optional retry hint.
    pub fn rate_limited(
        provider: impl Into<String>,
        message: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        let err = Self::new(provider, ErrorKind::RateLimit, message);
        match retry_after {
            Some(after) => err.with_retry_after(after),
            None => err,
        }
    }

    pub fn model_error(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ErrorKind::ModelError, message)
    }

    pub fn unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ErrorKind::Unavailable, message)
    }

    pub fn not_found(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ErrorKind::NotFound, message)
    }

    pub fn parse_error(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ErrorKind::ParseError, message)
    }

    pub fn internal(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ErrorKind::Internal, message)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_retry_after(mut self, after: Duration) -> Self {
        self.retry_after_ms = Some(after.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    /// Override the retryable flag explicitly.
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_ms.map(Duration::from_millis)
    }
}

/// Outcome of a failed dispatch or router administration call.
#[derive(Debug, Clone, Error)]
pub enum RouterError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    #[error("failed to initialize any provider ({} failures)", .failures.len())]
    InitializationFailed { failures: Vec<ProviderError> },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

impl RouterError {
    /// The provider error kind, if this failure came from a provider.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.provider_error().map(|e| e.kind)
    }

    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            RouterError::Provider(err) => Some(err),
            _ => None,
        }
    }

    /// True for cancellation and deadline expiry.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, RouterError::Cancelled | RouterError::DeadlineExceeded(_))
    }
}
