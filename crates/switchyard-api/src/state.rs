//! Application state wiring the router together.
//!
//! AppState owns the live router plus the configuration exactly as it was
//! read from disk, so `settings set` can persist without leaking keys that
//! were resolved from the environment.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use switchyard_core::llm::router::LlmRouter;
use switchyard_core::request_context::RequestContext;
use switchyard_infra::config::{load_router_config, resolve_api_keys};
use switchyard_infra::llm::default_factories;
use switchyard_types::config::RouterConfig;

/// Shared application state for CLI commands.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<LlmRouter>,
    pub config_path: PathBuf,
    pub on_disk: RouterConfig,
    /// Cancelled on Ctrl-C; commands derive their request contexts from it.
    pub interrupt: RequestContext,
}

impl AppState {
    /// Load the config, resolve API keys, build and initialize the router.
    ///
    /// An initialization failure is logged rather than returned so that
    /// status and settings commands still work with every backend down.
    pub async fn init(config_path: &Path) -> anyhow::Result<Self> {
        let on_disk = load_router_config(config_path).await;

        let mut live = on_disk.clone();
        resolve_api_keys(&mut live, |var| std::env::var(var).ok());

        let router = LlmRouter::new(&live, default_factories());
        if let Err(err) = router.initialize().await {
            tracing::warn!(error = %err, "Router initialization failed");
        }

        Ok(Self {
            router: Arc::new(router),
            config_path: config_path.to_path_buf(),
            on_disk,
            interrupt: crate::cli::interrupt_on_ctrl_c(),
        })
    }

    /// Run adapter shutdown hooks.
    pub async fn shutdown(&self) {
        self.router.shutdown().await;
    }
}
