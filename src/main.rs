use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;

mod checker;
mod config;
mod context;
mod error;
mod evaluators;
mod inference;
mod models;
mod processor;
mod registry;
mod runner;
mod sanitize;

use crate::context::AppContext;

/// Where the benchmark configuration is read from
#[derive(Debug, Clone, ValueEnum)]
enum ConfigSource {
    Env,
    Json,
}

/// Code-generation benchmark evaluation - feeds problems to an LLM backend,
/// sanitizes the completions and aggregates checker pass-rates over rounds
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source of the benchmark configuration
    #[arg(short = 's', long, value_enum, default_value = "env")]
    config_source: ConfigSource,

    /// Path of the JSON configuration file
    #[arg(short = 'p', long)]
    json_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let ctx = AppContext::initialize()?;

    match args.config_source {
        ConfigSource::Json => {
            let path = args
                .json_file
                .context("--json-file is required when --config-source is json")?;
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let value = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?;

            info!("Start parsing parameters from json file.");
            runner::evaluate_from_json(&value, &ctx).await?;
        }
        ConfigSource::Env => {
            info!("Start parsing parameters from environment variables.");
            runner::evaluate_from_env(&ctx).await?;
        }
    }

    Ok(())
}
