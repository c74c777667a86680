//! Provider CLI commands: status, list, test, plus the `models` listing.
//!
//! Everything here reads from the live router built at startup, so circuit
//! state and counters reflect only this process.

use std::io::Write as _;

use anyhow::Result;
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use switchyard_types::llm::ModelInfo;
use switchyard_types::status::{CircuitState, ConnectionStatus, ProviderSettings, ProviderStats};

use crate::state::AppState;

/// Provider subcommands.
#[derive(Subcommand)]
pub enum ProviderCommand {
    /// Show circuit state, counters and health of registered providers.
    Status,

    /// List configured providers in priority order.
    List,

    /// Send a probe message to one provider.
    Test {
        /// Provider name.
        name: String,

        /// Model to probe with instead of the provider default.
        #[arg(long)]
        model: Option<String>,
    },
}

pub async fn handle_provider_command(cmd: ProviderCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        ProviderCommand::Status => provider_status(state, json).await,
        ProviderCommand::List => provider_list(state, json),
        ProviderCommand::Test { name, model } => provider_test(state, &name, model.as_deref(), json).await,
    }
}

fn print_empty_hint() {
    println!();
    println!(
        "  {} No providers registered. Add {} entries to {}.",
        style("i").blue().bold(),
        style("[[providers]]").cyan(),
        style("switchyard.toml").cyan()
    );
    println!();
}

/// Display live statistics for every registered provider.
async fn provider_status(state: &AppState, json: bool) -> Result<()> {
    let stats = state.router.stats().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    if stats.providers.is_empty() {
        print_empty_hint();
        return Ok(());
    }

    println!();
    println!("  {}", style("Provider Health Status").bold());
    println!();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Priority").fg(Color::White),
        Cell::new("Provider").fg(Color::White),
        Cell::new("Type").fg(Color::White),
        Cell::new("Circuit").fg(Color::White),
        Cell::new("Health").fg(Color::White),
        Cell::new("Requests").fg(Color::White),
        Cell::new("Errors").fg(Color::White),
        Cell::new("Avg ms").fg(Color::White),
        Cell::new("Last Used").fg(Color::White),
    ]);

    for provider in &stats.providers {
        table.add_row(status_row(provider));
    }

    println!("{table}");
    println!();
    println!(
        "  {} provider{} · default {} · fallback {}",
        style(stats.total_providers).bold(),
        if stats.total_providers == 1 { "" } else { "s" },
        style(stats.default_provider.as_deref().unwrap_or("-")).cyan(),
        if stats.fallback_enabled {
            style("on").green()
        } else {
            style("off").red()
        }
    );
    println!();

    Ok(())
}

fn status_row(provider: &ProviderStats) -> Vec<Cell> {
    let circuit_cell = match provider.circuit_state {
        CircuitState::Closed => Cell::new("closed").fg(Color::Green),
        CircuitState::Open => Cell::new("OPEN").fg(Color::Red),
        CircuitState::HalfOpen => Cell::new("half_open").fg(Color::Yellow),
    };

    let health_cell = match (provider.healthy, &provider.health_error) {
        (true, _) => Cell::new("ok").fg(Color::Green),
        (false, Some(err)) => Cell::new(truncate(err, 40)).fg(Color::Red),
        (false, None) => Cell::new("down").fg(Color::Red),
    };

    let last_used = provider
        .last_used_at
        .map(|at| at.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());

    vec![
        Cell::new(provider.priority).fg(Color::Cyan),
        Cell::new(&provider.name).fg(Color::White),
        Cell::new(&provider.provider_type).fg(Color::DarkGrey),
        circuit_cell,
        health_cell,
        Cell::new(provider.request_count).fg(Color::White),
        Cell::new(provider.error_count).fg(Color::White),
        Cell::new(provider.average_response_ms).fg(Color::White),
        Cell::new(last_used).fg(Color::DarkGrey),
    ]
}

/// List every configured provider, registered or not.
fn provider_list(state: &AppState, json: bool) -> Result<()> {
    let providers = state.router.settings().providers;

    if json {
        println!("{}", serde_json::to_string_pretty(&providers)?);
        return Ok(());
    }
    if providers.is_empty() {
        print_empty_hint();
        return Ok(());
    }

    println!();
    println!("  {}", style("Fallback Chain Order").bold());
    println!();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Priority").fg(Color::White),
        Cell::new("Name").fg(Color::White),
        Cell::new("Type").fg(Color::White),
        Cell::new("Model").fg(Color::White),
        Cell::new("Enabled").fg(Color::White),
        Cell::new("Status").fg(Color::White),
    ]);

    for provider in &providers {
        table.add_row(list_row(provider));
    }

    println!("{table}");
    println!();
    println!(
        "  {} provider{} configured",
        style(providers.len()).bold(),
        if providers.len() == 1 { "" } else { "s" }
    );
    println!();

    Ok(())
}

fn list_row(provider: &ProviderSettings) -> Vec<Cell> {
    let enabled_cell = if provider.enabled {
        Cell::new("yes").fg(Color::Green)
    } else {
        Cell::new("no").fg(Color::Red)
    };
    let status_cell = match provider.status {
        ConnectionStatus::Connected => Cell::new("connected").fg(Color::Green),
        ConnectionStatus::Disconnected => Cell::new("disconnected").fg(Color::Red),
        ConnectionStatus::NotLoaded => Cell::new("not loaded").fg(Color::DarkGrey),
    };

    vec![
        Cell::new(provider.priority).fg(Color::Cyan),
        Cell::new(&provider.name).fg(Color::White),
        Cell::new(&provider.provider_type).fg(Color::DarkGrey),
        Cell::new(provider.default_model.as_deref().unwrap_or("-")).fg(Color::DarkGrey),
        enabled_cell,
        status_cell,
    ]
}

async fn provider_test(state: &AppState, name: &str, model: Option<&str>, json: bool) -> Result<()> {
    if !json {
        print!("  Testing {}... ", style(name).cyan());
        std::io::stdout().flush()?;
    }

    let ctx = state.interrupt.child();
    let result = state.router.test_connection(&ctx, name, model).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if result.success {
        println!("{}", style("connected").green().bold());
        if let Some(latency) = result.latency_ms {
            println!("  {} {latency}ms", style("latency").dim());
        }
        if !result.models.is_empty() {
            println!("  {} {}", style("models").dim(), result.models.join(", "));
        }
    } else {
        println!("{}", style("FAILED").red().bold());
        eprintln!("  {} {}", style("!").red().bold(), result.message);
        if let Some(detail) = &result.error_detail {
            eprintln!("  {}", style(detail).dim());
        }
    }
    Ok(())
}

/// List models across usable providers.
pub async fn list_models(state: &AppState, json: bool) -> Result<()> {
    let models = state.router.models().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }
    if models.is_empty() {
        println!();
        println!("  {} No models reported by any usable provider.", style("i").blue().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Provider").fg(Color::White),
        Cell::new("Model").fg(Color::White),
        Cell::new("Where").fg(Color::White),
        Cell::new("Description").fg(Color::White),
    ]);
    for model in &models {
        table.add_row(model_row(model));
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn model_row(model: &ModelInfo) -> Vec<Cell> {
    let place = if model.local {
        Cell::new("local").fg(Color::Green)
    } else {
        Cell::new("cloud").fg(Color::Cyan)
    };
    vec![
        Cell::new(&model.provider).fg(Color::Cyan),
        Cell::new(&model.id).fg(Color::White),
        place,
        Cell::new(model.description.as_deref().unwrap_or("")).fg(Color::DarkGrey),
    ]
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate("timeout", 40), "timeout");
    }

    #[test]
    fn truncate_is_char_safe() {
        let text = "ü".repeat(50);
        let cut = truncate(&text, 10);
        assert_eq!(cut.chars().count(), 10);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn status_row_has_one_cell_per_header() {
        let stats = ProviderStats {
            name: "openai".into(),
            provider_type: "openai".into(),
            priority: 0,
            request_count: 3,
            error_count: 1,
            average_response_ms: 120,
            last_used_at: None,
            circuit_state: CircuitState::HalfOpen,
            consecutive_failures: 0,
            available: true,
            healthy: false,
            health_error: Some("connection refused".into()),
            window_requests: 1,
            window_tokens: 40,
        };
        assert_eq!(status_row(&stats).len(), 9);
    }
}
