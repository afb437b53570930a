//! CLI entry point for AgriSage.
//!
//! This binary provides the `agrisage` command with subcommands for
//! answering a question, inspecting how a question is routed and listing the
//! demo catalog.

mod catalog;
mod cli;
mod helpers;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use agrisage_agent::{
    AgrisageConfig, LlmClient, LlmCompletionProvider, LlmIntentFallback, OrchestrationResult,
    Orchestrator, Query, ReasoningStep, RunOptions,
};
use agrisage_intent::{IntentClassifier, IntentFallback, ToolSelector};

use crate::cli::{AskArgs, Cli, Commands};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    helpers::init_tracing("info", cli.log_json);

    match cli.command {
        Commands::Ask(args) => cmd_ask(cli.config.as_deref(), args).await,
        Commands::Classify { query } => cmd_classify(cli.config.as_deref(), &query).await,
        Commands::Tools => cmd_tools(),
    }
}

// ---------------------------------------------------------------------------
// Subcommand: ask
// ---------------------------------------------------------------------------

async fn cmd_ask(config_path: Option<&Path>, args: AskArgs) -> Result<()> {
    let config = helpers::load_config(config_path)?;
    let registry = Arc::new(catalog::demo_catalog().context("failed to build the demo catalog")?);

    let client = LlmClient::new(helpers::resolve_llm_config(&config.llm)?)?;
    info!(model = client.default_model(), "completion provider ready");
    let provider = Arc::new(LlmCompletionProvider::new(client.clone(), &config.llm));
    let fallback = Arc::new(LlmIntentFallback::new(client, &config.llm));

    let orchestrator = Orchestrator::new(registry, provider, config)
        .context("failed to build the orchestrator")?
        .with_fallback(fallback);

    let query = Query::with_context(args.query.as_str(), helpers::parse_context(&args.context)?);

    // 1. Ctrl-C cancels the run; the loop stops at its next boundary.
    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        }
    });

    // 2. Optional step stream, printed as steps land in the trace.
    let mut options = RunOptions::default().with_cancel(cancel);
    let printer = if args.stream {
        let (tx, mut rx) = mpsc::unbounded_channel();
        options = options.with_step_stream(tx);
        Some(tokio::spawn(async move {
            while let Some(step) = rx.recv().await {
                print_step(&step);
            }
        }))
    } else {
        None
    };

    let result = orchestrator.orchestrate_with(&query, options).await;
    interrupt.abort();
    if let Some(printer) = printer {
        // The sender was dropped with the options, so the printer drains and exits.
        let _ = printer.await;
    }

    if args.strict {
        result
            .ensure_consistent()
            .context("sources disagree and --strict was given")?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

fn print_step(step: &ReasoningStep) {
    println!(
        "  [{}] {} ({:?}, {} ms)",
        step.index, step.tool_name, step.status, step.duration_ms
    );
    println!("      {}", truncate(&step.observation.render(), 160));
}

fn print_result(result: &OrchestrationResult) {
    println!();
    println!("{}", result.final_answer);
    println!();
    println!(
        "  {} | {} iteration(s) | tools: {}",
        result.terminated_reason.as_str(),
        result.iteration_count,
        if result.tools_invoked.is_empty() {
            "none".to_owned()
        } else {
            result.tools_invoked.join(", ")
        }
    );
    if let Some(failure) = &result.failure {
        println!("  failure: {:?}: {}", failure.kind, failure.message);
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= max_chars {
        return single_line;
    }
    let cut: String = single_line.chars().take(max_chars).collect();
    format!("{cut}...")
}

// ---------------------------------------------------------------------------
// Subcommand: classify
// ---------------------------------------------------------------------------

async fn cmd_classify(config_path: Option<&Path>, text: &str) -> Result<()> {
    let config: AgrisageConfig = helpers::load_config(config_path)?;
    let registry = catalog::demo_catalog().context("failed to build the demo catalog")?;
    let classifier = IntentClassifier::new(config.classifier.clone())?;
    let selector = ToolSelector::new(config.selector.clone());

    // The fallback is only consulted when a key is configured.
    let fallback: Option<Arc<dyn IntentFallback>> = match helpers::resolve_llm_config(&config.llm) {
        Ok(llm) => {
            let client = LlmClient::new(llm)?;
            Some(Arc::new(LlmIntentFallback::new(client, &config.llm)) as Arc<dyn IntentFallback>)
        }
        Err(_) => None,
    };

    let intents = classifier
        .classify_with_fallback(text, fallback.as_deref())
        .await;
    let selection = selector.select(&intents, &registry, text);

    println!();
    println!("  Intents:");
    if intents.is_empty() {
        println!("    (none)");
    }
    for intent in &intents {
        println!("    {:<20} {:.2}", intent.tag.as_str(), intent.confidence);
    }

    println!();
    println!("  Selected tools:");
    if selection.is_empty() {
        println!("    (none)");
    }
    for tool in selection.iter() {
        println!("    {:<28} {:.2}  {:?}", tool.name(), tool.score, tool.reason);
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: tools
// ---------------------------------------------------------------------------

fn cmd_tools() -> Result<()> {
    let registry = catalog::demo_catalog().context("failed to build the demo catalog")?;

    println!();
    println!("  Demo catalog ({} tools):", registry.len());
    for descriptor in registry.descriptors() {
        let tags: Vec<&str> = descriptor.tags.iter().map(|t| t.as_str()).collect();
        let marker = if descriptor.delegatable { " [agent]" } else { "" };
        println!("    {}{marker}", descriptor.name);
        println!("      {}", descriptor.description);
        println!("      intents: {}", tags.join(", "));
        if !descriptor.dependencies.is_empty() {
            println!("      requires: {}", descriptor.dependencies.join(", "));
        }
    }
    println!();
    Ok(())
}
