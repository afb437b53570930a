//! CLI argument definitions for AgriSage.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// AgriSage -- agronomy question answering over specialised tools.
#[derive(Parser)]
#[command(
    name = "agrisage",
    version,
    about = "AgriSage -- agronomy query orchestrator",
    long_about = "Classifies a farmer's question, selects the relevant agronomy tools, \
                  runs a bounded reasoning loop over them and synthesizes an answer that \
                  discloses every disagreement between sources."
)]
pub struct Cli {
    /// Configuration file (TOML, or JSON when the extension is `.json`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines instead of the compact format.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Answer a question against the demo catalog.
    Ask(AskArgs),

    /// Show the intents and the tool selection for a question.
    Classify {
        /// The question to classify.
        query: String,
    },

    /// List the demo catalog.
    Tools,
}

/// Arguments of `agrisage ask`.
#[derive(Args)]
pub struct AskArgs {
    /// The question to answer.
    pub query: String,

    /// Farm context as `key=value` (location, crop, parcel_id,
    /// growth_stage, season, language, farm_type).  May be repeated; other
    /// keys are ignored.
    #[arg(long = "context", short = 'c', value_name = "KEY=VALUE")]
    pub context: Vec<String>,

    /// Print the full orchestration result as JSON.
    #[arg(long)]
    pub json: bool,

    /// Print reasoning steps as they complete.
    #[arg(long)]
    pub stream: bool,

    /// Refuse answers whose sources disagree.
    #[arg(long)]
    pub strict: bool,
}
