//! Shared HTTP plumbing for the adapters.
//!
//! Every adapter funnels its responses through [`read_json`], so status
//! codes map onto the error taxonomy the same way everywhere.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;

use switchyard_types::error::{ErrorKind, ProviderError};

/// Per-request timeout for generation calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for health probes and model listings.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the HTTP client an adapter keeps for its lifetime.
pub fn build_client(provider: &str, timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::internal(provider, format!("failed to create HTTP client: {e}")))
}

/// Map a transport-level failure.
pub fn transport_error(provider: &str, err: reqwest::Error) -> ProviderError {
    if err.is_decode() {
        return ProviderError::parse_error(provider, format!("failed to decode response: {err}"));
    }
    let message = if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        format!("HTTP request failed: {err}")
    };
    ProviderError::network(provider, message)
}

/// Map a non-success HTTP status onto a provider error.
pub fn status_error(
    provider: &str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> ProviderError {
    let detail = extract_error_message(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string()
    });
    let message = format!("HTTP {}: {detail}", status.as_u16());

    let err = match status.as_u16() {
        401 | 403 => ProviderError::auth(provider, message),
        429 => {
            let retry_after = headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            ProviderError::rate_limited(provider, message, retry_after)
        }
        400 | 404 | 422 => ProviderError::model_error(provider, message),
        code if code >= 500 => ProviderError::new(provider, ErrorKind::Internal, message).retryable(true),
        _ => ProviderError::internal(provider, message),
    };
    err.with_code(status.as_u16().to_string())
}

/// Parse a `Retry-After` header given in whole seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Pull a human-readable message out of a vendor error body.
///
/// Understands `{"error": {"message": ...}}` (OpenAI, Anthropic) and
/// `{"error": "..."}` (Ollama); falls back to the raw body.
pub fn extract_error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    let from_json = serde_json::from_str::<serde_json::Value>(trimmed)
        .ok()
        .and_then(|value| {
            let error = value.get("error")?;
            error
                .get("message")
                .and_then(|m| m.as_str())
                .or_else(|| error.as_str())
                .map(str::to_string)
        });
    Some(from_json.unwrap_or_else(|| trimmed.chars().take(500).collect()))
}

/// Check the status and decode a JSON body.
pub async fn read_json<T: DeserializeOwned>(
    provider: &str,
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        let err = status_error(provider, status, &headers, &body);
        tracing::debug!(provider, status = status.as_u16(), error = %err, "Backend returned error status");
        return Err(err);
    }

    let body = response
        .text()
        .await
        .map_err(|e| transport_error(provider, e))?;
    serde_json::from_str(&body).map_err(|e| {
        ProviderError::parse_error(provider, format!("failed to parse response: {e}"))
    })
}

/// Check only the status, discarding the body.
pub async fn expect_success(provider: &str, response: reqwest::Response) -> Result<(), ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();
    Err(status_error(provider, status, &headers, &body))
}

/// Join a base URL and a path without doubling the slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn map(code: u16, headers: &HeaderMap, body: &str) -> ProviderError {
        status_error("openai", StatusCode::from_u16(code).unwrap(), headers, body)
    }

    #[test]
    fn test_auth_statuses() {
        for code in [401, 403] {
            let err = map(code, &HeaderMap::new(), "");
            assert_eq!(err.kind, ErrorKind::Auth);
            assert!(!err.retryable);
            assert_eq!(err.code.as_deref(), Some(code.to_string().as_str()));
        }
    }

    #[test]
    fn test_rate_limit_with_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("17"));
        let err = map(429, &headers, r#"{"error": {"message": "slow down"}}"#);
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert!(err.retryable);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(17)));
        assert_eq!(err.message, "HTTP 429: slow down");
    }

    #[test]
    fn test_rate_limit_without_retry_after() {
        let err = map(429, &HeaderMap::new(), "");
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert!(err.retry_after().is_none());
    }

    #[test]
    fn test_client_errors_are_model_errors() {
        for code in [400, 404, 422] {
            let err = map(code, &HeaderMap::new(), r#"{"error": "model 'x' not found"}"#);
            assert_eq!(err.kind, ErrorKind::ModelError);
            assert!(!err.retryable);
        }
        let err = map(404, &HeaderMap::new(), r#"{"error": "model 'x' not found"}"#);
        assert!(err.message.contains("model 'x' not found"));
    }

    #[test]
    fn test_server_errors_are_retryable_internal() {
        for code in [500, 502, 503, 529] {
            let err = map(code, &HeaderMap::new(), "overloaded");
            assert_eq!(err.kind, ErrorKind::Internal);
            assert!(err.retryable, "HTTP {code} should be retryable");
        }
    }

    #[test]
    fn test_other_statuses_are_plain_internal() {
        let err = map(418, &HeaderMap::new(), "");
        assert_eq!(err.kind, ErrorKind::Internal);
        assert!(!err.retryable);
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after(" 5 "), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_extract_error_message_shapes() {
        assert_eq!(
            extract_error_message(r#"{"error": {"type": "x", "message": "bad key"}}"#).as_deref(),
            Some("bad key")
        );
        assert_eq!(
            extract_error_message(r#"{"error": "no model"}"#).as_deref(),
            Some("no model")
        );
        assert_eq!(extract_error_message("plain text").as_deref(), Some("plain text"));
        assert_eq!(extract_error_message("   "), None);
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://x/v1/", "/models"), "http://x/v1/models");
        assert_eq!(join_url("http://x", "api/tags"), "http://x/api/tags");
    }
}
