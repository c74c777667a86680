//! Cached adapter availability.
//!
//! `is_available` sits on the router's hot path, so adapters answer it from
//! this cache and refresh it with a background health check once the TTL
//! has lapsed.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use switchyard_types::error::ProviderError;

/// Refresh interval for cloud APIs.
pub const CLOUD_HEALTH_TTL: Duration = Duration::from_secs(5 * 60);

/// Refresh interval for a locally hosted server.
pub const LOCAL_HEALTH_TTL: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct HealthState {
    available: bool,
    checked_at: Option<Instant>,
    refreshing: bool,
}

/// Shared availability flag with a staleness TTL.
///
/// Clones share the same state, so a spawned refresh can write back into it.
#[derive(Debug, Clone)]
pub struct HealthCache {
    state: Arc<Mutex<HealthState>>,
    ttl: Duration,
}

impl HealthCache {
    pub fn new(ttl: Duration, initially_available: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(HealthState {
                available: initially_available,
                checked_at: None,
                refreshing: false,
            })),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached flag. Never blocks on I/O.
    pub fn is_available(&self) -> bool {
        self.state.lock().expect("health cache lock poisoned").available
    }

    /// Whether the cached value is older than the TTL (or was never checked).
    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Instant::now())
    }

    pub fn is_stale_at(&self, now: Instant) -> bool {
        let state = self.state.lock().expect("health cache lock poisoned");
        state
            .checked_at
            .is_none_or(|at| now.saturating_duration_since(at) > self.ttl)
    }

    /// Store the outcome of a check.
    pub fn record(&self, available: bool) {
        self.record_at(Instant::now(), available);
    }

    pub fn record_at(&self, now: Instant, available: bool) {
        let mut state = self.state.lock().expect("health cache lock poisoned");
        state.available = available;
        state.checked_at = Some(now);
        state.refreshing = false;
    }

    /// Claim the single in-flight refresh slot if the value is stale.
    fn begin_refresh(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().expect("health cache lock poisoned");
        let stale = state
            .checked_at
            .is_none_or(|at| now.saturating_duration_since(at) > self.ttl);
        if !stale || state.refreshing {
            return false;
        }
        state.refreshing = true;
        true
    }

    fn abandon_refresh(&self) {
        self.state.lock().expect("health cache lock poisoned").refreshing = false;
    }

    /// Spawn `check` on the current Tokio runtime if the cache is stale.
    ///
    /// At most one refresh runs at a time. Outside a runtime this is a no-op
    /// and the cached value is served as is.
    pub fn refresh_if_stale<F, Fut>(&self, provider: &str, check: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), ProviderError>> + Send + 'static,
    {
        if !self.begin_refresh() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.abandon_refresh();
            return;
        };

        let cache = self.clone();
        let provider = provider.to_string();
        let probe = check();
        handle.spawn(async move {
            let result = probe.await;
            match &result {
                Ok(()) => tracing::debug!(provider = %provider, "Health check passed"),
                Err(err) => tracing::debug!(provider = %provider, error = %err, "Health check failed"),
            }
            cache.record(result.is_ok());
        });
    }
}
