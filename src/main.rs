mod cli;

use agentdb::config::{self, AgentDbConfig};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "agentdb", version, about = "Proof-gated vector memory engine")]
struct Cli {
    /// Config file (default: ~/.agentdb/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show index, quantizer, cache and audit statistics
    Stats,
    /// Nearest-neighbor query
    Search {
        /// Query vector: `0.1,0.2,...` or a JSON array
        #[arg(long, allow_hyphen_values = true)]
        vector: String,
        #[arg(short, long, default_value_t = 10)]
        k: usize,
        /// Minimum similarity
        #[arg(long)]
        threshold: Option<f32>,
        /// Metadata equality filter as a JSON object
        #[arg(long)]
        filter: Option<String>,
        /// Force attention re-ranking on or off
        #[arg(long)]
        attention: Option<bool>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import vectors from a JSON Lines file
    Import {
        file: PathBuf,
        #[arg(long, default_value_t = 256)]
        batch_size: usize,
    },
    /// Remove a vector by id
    Remove { id: String },
    /// Train the configured quantizer and report its quality
    Train {
        /// Give up after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Check SIMD capability, backend selection and audit chain integrity
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AgentDbConfig::load_from(path)?,
        None => AgentDbConfig::load_from(config::default_config_path())?,
    };

    // stdout is reserved for command output.
    let filter = EnvFilter::try_new(&config.logging.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Stats => cli::stats::stats(&config).await?,
        Command::Search {
            vector,
            k,
            threshold,
            filter,
            attention,
            json,
        } => {
            let args = cli::search::SearchArgs {
                vector,
                k,
                threshold,
                filter,
                attention,
                json,
            };
            cli::search::search(&config, args).await?
        }
        Command::Import { file, batch_size } => {
            cli::import::import(&config, &file, batch_size).await?
        }
        Command::Remove { id } => cli::remove::remove(&config, &id).await?,
        Command::Train { timeout_secs } => {
            cli::train::train(&config, timeout_secs.map(Duration::from_secs)).await?
        }
        Command::Doctor => cli::doctor::doctor(&config).await?,
    }

    Ok(())
}
