//! Sliding-window request and token limiter.
//!
//! Two logs are kept per provider: admission timestamps and
//! `(timestamp, estimated_tokens)` pairs. Both are pruned to the trailing
//! window on every check, and a new entry is appended only after admission
//! succeeds, so the token sum inside the window never exceeds the cap.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use switchyard_types::error::ProviderError;
use switchyard_types::llm::RateLimit;

/// Length of the sliding window.
pub const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct WindowLog {
    requests: VecDeque<Instant>,
    tokens: VecDeque<(Instant, u32)>,
}

impl WindowLog {
    fn prune(&mut self, now: Instant, window: Duration) {
        let expired = |at: Instant| now.saturating_duration_since(at) >= window;
        while self.requests.front().is_some_and(|&at| expired(at)) {
            self.requests.pop_front();
        }
        while self.tokens.front().is_some_and(|&(at, _)| expired(at)) {
            self.tokens.pop_front();
        }
    }

    fn token_sum(&self) -> u64 {
        self.tokens.iter().map(|&(_, t)| u64::from(t)).sum()
    }
}

/// Local admission control for one provider.
///
/// A cap of `0` disables that dimension.
#[derive(Debug)]
pub struct RateLimiter {
    provider: String,
    requests_per_minute: u32,
    tokens_per_minute: u32,
    window: Duration,
    log: Mutex<WindowLog>,
}

impl RateLimiter {
    pub fn new(provider: impl Into<String>, requests_per_minute: u32, tokens_per_minute: u32) -> Self {
        Self {
            provider: provider.into(),
            requests_per_minute,
            tokens_per_minute,
            window: WINDOW,
            log: Mutex::new(WindowLog::default()),
        }
    }

    /// Build from an advertised descriptor, using only the per-minute caps.
    pub fn from_descriptor(provider: impl Into<String>, limit: &RateLimit) -> Self {
        Self::new(provider, limit.requests_per_minute, limit.tokens_per_minute)
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    pub fn tokens_per_minute(&self) -> u32 {
        self.tokens_per_minute
    }

    /// Admit a call estimated at `estimated_tokens`, or reject with `rate_limit`.
    pub fn check(&self, estimated_tokens: u32) -> Result<(), ProviderError> {
        self.check_at(Instant::now(), estimated_tokens)
    }

    /// Admission check at an explicit instant.
    pub fn check_at(&self, now: Instant, estimated_tokens: u32) -> Result<(), ProviderError> {
        let mut log = self.log.lock().expect("rate limiter lock poisoned");
        log.prune(now, self.window);

        if self.requests_per_minute > 0 && log.requests.len() >= self.requests_per_minute as usize {
            tracing::debug!(
                provider = %self.provider,
                in_window = log.requests.len(),
                cap = self.requests_per_minute,
                "Request rate limit reached"
            );
            return Err(self.rejection("request rate limit exceeded"));
        }

        if self.tokens_per_minute > 0
            && u64::from(estimated_tokens) + log.token_sum() > u64::from(self.tokens_per_minute)
        {
            tracing::debug!(
                provider = %self.provider,
                estimated_tokens,
                cap = self.tokens_per_minute,
                "Token rate limit reached"
            );
            return Err(self.rejection("token rate limit exceeded"));
        }

        log.requests.push_back(now);
        log.tokens.push_back((now, estimated_tokens));
        Ok(())
    }

    /// Requests and estimated tokens admitted within the current window.
    pub fn usage(&self) -> (u32, u64) {
        self.usage_at(Instant::now())
    }

    pub fn usage_at(&self, now: Instant) -> (u32, u64) {
        let mut log = self.log.lock().expect("rate limiter lock poisoned");
        log.prune(now, self.window);
        (log.requests.len() as u32, log.token_sum())
    }

    fn rejection(&self, message: &str) -> ProviderError {
        ProviderError::rate_limited(self.provider.clone(), message, Some(WINDOW))
    }
}
