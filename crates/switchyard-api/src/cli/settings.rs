//! `settings show` / `settings set`.
//!
//! `set` applies the change to the live router first; only a change the
//! router accepted is written back to the config file.

use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand, ValueEnum};
use console::style;

use switchyard_infra::config::{persistable_config, save_router_config};
use switchyard_types::status::{ProviderSettingsUpdate, RouterSettings, SettingsUpdate};

use crate::state::AppState;

#[derive(Subcommand)]
pub enum SettingsCommand {
    /// Show the current router settings.
    Show,

    /// Change router settings and persist them.
    Set(SetArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

#[derive(Args, Debug, Default)]
pub struct SetArgs {
    /// Provider tried first. Pass an empty string to clear.
    #[arg(long)]
    pub default_provider: Option<String>,

    /// Whether failed requests move on to the next provider.
    #[arg(long, value_enum)]
    pub fallback: Option<Toggle>,

    /// Rounds over the candidate list.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Per-request deadline in milliseconds (0 disables it).
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Pause between candidates in milliseconds.
    #[arg(long)]
    pub fallback_delay_ms: Option<u64>,

    /// Enable a configured provider (repeatable).
    #[arg(long, value_name = "NAME")]
    pub enable: Vec<String>,

    /// Disable a configured provider (repeatable).
    #[arg(long, value_name = "NAME")]
    pub disable: Vec<String>,
}

impl SetArgs {
    /// Translate flags into a router update.
    pub fn to_update(&self) -> SettingsUpdate {
        let toggled = |names: &[String], enabled: bool| {
            names
                .iter()
                .map(move |name| ProviderSettingsUpdate {
                    name: name.clone(),
                    enabled: Some(enabled),
                    priority: None,
                })
                .collect::<Vec<_>>()
        };

        let mut providers = toggled(&self.enable, true);
        providers.extend(toggled(&self.disable, false));

        SettingsUpdate {
            default_provider: self.default_provider.clone(),
            fallback_enabled: self.fallback.map(|t| t == Toggle::On),
            fallback_delay_ms: self.fallback_delay_ms,
            max_retries: self.max_retries,
            timeout_ms: self.timeout_ms,
            providers,
        }
    }
}

fn is_empty(update: &SettingsUpdate) -> bool {
    update.default_provider.is_none()
        && update.fallback_enabled.is_none()
        && update.fallback_delay_ms.is_none()
        && update.max_retries.is_none()
        && update.timeout_ms.is_none()
        && update.providers.is_empty()
}

pub async fn handle_settings_command(cmd: SettingsCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        SettingsCommand::Show => {
            print_settings(&state.router.settings(), json)?;
            Ok(())
        }
        SettingsCommand::Set(args) => settings_set(state, &args, json).await,
    }
}

async fn settings_set(state: &AppState, args: &SetArgs, json: bool) -> Result<()> {
    let update = args.to_update();
    if is_empty(&update) {
        bail!("nothing to change; see `syard settings set --help`");
    }

    let settings = state.router.update_settings(update).await?;

    let merged = persistable_config(&state.on_disk, &state.router.current_config());
    save_router_config(&state.config_path, &merged)
        .await
        .with_context(|| format!("failed to persist settings to {}", state.config_path.display()))?;

    if !json {
        println!();
        println!(
            "  {} Settings saved to {}",
            style("✓").green().bold(),
            style(state.config_path.display()).cyan()
        );
    }
    print_settings(&settings, json)
}

fn print_settings(settings: &RouterSettings, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(settings)?);
        return Ok(());
    }

    let on_off = |flag: bool| {
        if flag {
            style("on").green()
        } else {
            style("off").red()
        }
    };

    println!();
    println!("  {}", style("Router Settings").bold());
    println!();
    println!(
        "  {:<20} {}",
        style("default provider").dim(),
        style(settings.default_provider.as_deref().unwrap_or("-")).cyan()
    );
    println!("  {:<20} {}", style("fallback").dim(), on_off(settings.fallback_enabled));
    println!("  {:<20} {}ms", style("fallback delay").dim(), settings.fallback_delay_ms);
    println!("  {:<20} {}", style("max retries").dim(), settings.max_retries);
    println!("  {:<20} {}ms", style("timeout").dim(), settings.timeout_ms);
    println!();

    for provider in &settings.providers {
        println!(
            "  {} {} {} {}",
            style(format!("[{}]", provider.priority)).cyan(),
            style(&provider.name).bold(),
            style(&provider.provider_type).dim(),
            if provider.enabled {
                style(provider.status.to_string()).green()
            } else {
                style("disabled".to_string()).red()
            }
        );
    }
    if !settings.providers.is_empty() {
        println!();
    }
    Ok(())
}
