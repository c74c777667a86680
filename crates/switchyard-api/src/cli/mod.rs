//! CLI command definitions for the `syard` binary.
//!
//! Uses clap derive macros for argument parsing. Every command accepts
//! `--json` for machine-readable output.

pub mod chat;
pub mod provider;
pub mod settings;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use switchyard_core::request_context::RequestContext;

/// Route LLM requests across providers with fallback.
#[derive(Parser)]
#[command(name = "syard", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Router config file.
    #[arg(
        long,
        global = true,
        env = "SWITCHYARD_CONFIG",
        default_value = "switchyard.toml"
    )]
    pub config: PathBuf,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log filter for the requested verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "warn",
            1 => "info,switchyard=debug",
            _ => "trace",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send one chat message through the router.
    Chat {
        /// Message text.
        message: String,

        #[command(flatten)]
        target: chat::TargetArgs,

        /// System prompt placed before the message.
        #[arg(long)]
        system: Option<String>,

        /// Sampling temperature.
        #[arg(long)]
        temperature: Option<f64>,
    },

    /// Complete a single prompt.
    Complete {
        /// Prompt text.
        prompt: String,

        #[command(flatten)]
        target: chat::TargetArgs,
    },

    /// Inspect and probe providers.
    Provider {
        #[command(subcommand)]
        action: provider::ProviderCommand,
    },

    /// List models across usable providers.
    Models,

    /// Show or change router settings.
    Settings {
        #[command(subcommand)]
        action: settings::SettingsCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Process-wide context whose token is cancelled on Ctrl-C.
///
/// Commands run on a [`RequestContext::child`] of it, so an interrupt ends
/// whatever request is in flight.
pub fn interrupt_on_ctrl_c() -> RequestContext {
    let root = RequestContext::new();
    let watched = root.cancellation.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, cancelling request");
                watched.cancel();
            }
            _ = watched.cancelled() => {}
        }
    });
    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn log_filter_follows_verbosity() {
        let parse = |args: &[&str]| Cli::try_parse_from(args).unwrap();
        assert_eq!(parse(&["syard", "models"]).log_filter(), "warn");
        assert_eq!(parse(&["syard", "--quiet", "models"]).log_filter(), "error");
        assert_eq!(parse(&["syard", "-v", "models"]).log_filter(), "info,switchyard=debug");
        assert_eq!(parse(&["syard", "-vv", "models"]).log_filter(), "trace");
    }

    #[test]
    fn chat_arguments_parse() {
        let cli = Cli::try_parse_from([
            "syard", "chat", "hi there", "--provider", "ollama", "--max-tokens", "64",
            "--system", "be brief",
        ])
        .unwrap();
        match cli.command {
            Commands::Chat { message, target, system, temperature } => {
                assert_eq!(message, "hi there");
                assert_eq!(target.provider.as_deref(), Some("ollama"));
                assert_eq!(target.max_tokens, Some(64));
                assert_eq!(system.as_deref(), Some("be brief"));
                assert!(temperature.is_none());
            }
            _ => panic!("expected chat"),
        }
    }

    #[tokio::test]
    async fn interrupt_reaches_command_contexts() {
        let root = interrupt_on_ctrl_c();
        let command = root.child();
        assert!(!command.is_cancelled());

        root.cancel();
        assert!(command.is_cancelled());
    }
}
