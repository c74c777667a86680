//! One-shot `chat` and `complete` commands.

use anyhow::Result;
use clap::Args;
use console::style;

use switchyard_types::llm::{ChatMessage, ChatOptions, CompletionOptions, TokenUsage};

use crate::state::AppState;

/// Routing and sizing flags shared by `chat` and `complete`.
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Pin the request to one provider (disables fallback).
    #[arg(long)]
    pub provider: Option<String>,

    /// Model override passed to the adapter.
    #[arg(long)]
    pub model: Option<String>,

    /// Reply token cap.
    #[arg(long)]
    pub max_tokens: Option<u32>,
}

/// Build chat options from CLI flags.
pub fn chat_options(target: &TargetArgs, system: Option<String>, temperature: Option<f64>) -> ChatOptions {
    ChatOptions {
        provider: target.provider.clone(),
        model: target.model.clone(),
        max_tokens: target.max_tokens,
        system_prompt: system,
        temperature,
        ..ChatOptions::default()
    }
}

/// Build completion options from CLI flags.
pub fn completion_options(target: &TargetArgs) -> CompletionOptions {
    CompletionOptions {
        provider: target.provider.clone(),
        model: target.model.clone(),
        max_tokens: target.max_tokens,
        ..CompletionOptions::default()
    }
}

pub async fn chat(
    state: &AppState,
    message: String,
    target: TargetArgs,
    system: Option<String>,
    temperature: Option<f64>,
    json: bool,
) -> Result<()> {
    let options = chat_options(&target, system, temperature);
    let ctx = state.interrupt.child();
    let response = state
        .router
        .chat(&ctx, &[ChatMessage::user(message)], &options)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("{}", response.message.content);
    for call in &response.message.tool_calls {
        println!(
            "  {} {}({})",
            style("tool").yellow().bold(),
            style(&call.name).cyan(),
            call.arguments
        );
    }
    print_footer(&response.provider, &response.model, response.usage, response.processing_time_ms);
    Ok(())
}

pub async fn complete(state: &AppState, prompt: String, target: TargetArgs, json: bool) -> Result<()> {
    let options = completion_options(&target);
    let ctx = state.interrupt.child();
    let response = state.router.complete(&ctx, &prompt, &options).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("{}", response.text);
    print_footer(&response.provider, &response.model, response.usage, response.processing_time_ms);
    Ok(())
}

fn print_footer(provider: &str, model: &str, usage: TokenUsage, elapsed_ms: u64) {
    eprintln!();
    eprintln!(
        "  {}",
        style(format!(
            "{provider} / {model} · {} in, {} out · {elapsed_ms}ms",
            usage.prompt_tokens, usage.completion_tokens
        ))
        .dim()
    );
}
