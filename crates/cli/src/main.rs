//! Colony CLI entry point.
//!
//! Commands:
//! - `run`     Spawn the configured workers and run until Ctrl+C
//! - `config`  Print the default config or validate the current one
//! - `memory`  Search, inspect and sweep the persisted memory store
//! - `events`  Show the most recent journaled events

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "colony",
    about = "Colony: multi-agent runtime with shared memory",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a config file (defaults to ~/.colony/config.toml)
    #[arg(short, long, global = true, env = "COLONY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Spawn the configured workers and run until interrupted
    Run {
        /// Send this task to every worker after startup (repeatable)
        #[arg(short, long)]
        task: Vec<String>,

        /// Stop after this many seconds instead of waiting for Ctrl+C
        #[arg(long)]
        duration_secs: Option<u64>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Memory store commands
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Show recent events from the event journal
    Events {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the default configuration as TOML
    Show,
    /// Load and validate the configuration
    Validate,
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Rank records by similarity to a query
    Search {
        query: String,
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
        /// Substring match instead of similarity ranking
        #[arg(long)]
        text: bool,
        /// Tags used for overlap scoring (similarity) or as required filters (text)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Record counts by kind
    Stats,
    /// Run one retention pass now
    Sweep {
        /// Only list what would be evicted
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run { task, duration_secs } => commands::run::run(config_path, task, duration_secs).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(),
            ConfigAction::Validate => commands::config_cmd::validate(config_path)?,
        },
        Commands::Memory { action } => match action {
            MemoryAction::Search { query, limit, text, tags } => {
                commands::memory::search(config_path, &query, limit, text, tags).await?
            }
            MemoryAction::Stats => commands::memory::stats(config_path).await?,
            MemoryAction::Sweep { dry_run } => commands::memory::sweep(config_path, dry_run).await?,
        },
        Commands::Events { limit } => commands::events::run(config_path, limit)?,
    }

    Ok(())
}
