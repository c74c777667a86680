//! Switchyard operator CLI entry point.
//!
//! Binary name: `syard`
//!
//! Parses CLI arguments, sets up tracing, builds the router from the config
//! file, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;
use switchyard_observe::tracing_setup::{init_tracing, shutdown_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_filter(), cli.otel).map_err(|e| anyhow::anyhow!("{e}"))?;

    // Shell completions don't need the router
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "syard", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init(&cli.config).await?;
    let result = run(cli, &state).await;

    state.shutdown().await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli, state: &AppState) -> anyhow::Result<()> {
    let json = cli.json;
    match cli.command {
        Commands::Chat {
            message,
            target,
            system,
            temperature,
        } => cli::chat::chat(state, message, target, system, temperature, json).await,
        Commands::Complete { prompt, target } => cli::chat::complete(state, prompt, target, json).await,
        Commands::Provider { action } => cli::provider::handle_provider_command(action, state, json).await,
        Commands::Models => cli::provider::list_models(state, json).await,
        Commands::Settings { action } => cli::settings::handle_settings_command(action, state, json).await,
        Commands::Completions { .. } => Ok(()),
    }
}
