use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use refrain::cli::{candidates, index, patterns, purge, search, stats, watch};
use refrain::{Config, Engine};

#[derive(Parser)]
#[command(name = "refrain")]
#[command(about = "Find the prompts you keep typing into your AI coding assistant")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "refrain.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Index transcripts from all available sources
    Index,

    /// Find stored messages similar to a query
    Search {
        /// Free-text query
        query: String,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Re-cluster all prompts and list repeated patterns
    Patterns {
        /// Print patterns as JSON
        #[arg(long)]
        json: bool,
    },

    /// Repeat candidate management
    Candidates {
        #[command(subcommand)]
        command: CandidateCommands,
    },

    /// Delete every stored message of a session
    Purge {
        /// Session ID
        session_id: String,
    },

    /// Show statistics
    Stats,

    /// Keep indexing and detecting in the background
    Watch {
        /// Seconds between indexing runs
        #[arg(long, default_value_t = 60)]
        index_every: u64,

        /// Seconds between detection runs
        #[arg(long, default_value_t = 600)]
        detect_every: u64,
    },
}

#[derive(Subcommand)]
enum CandidateCommands {
    /// List repeat candidates
    List {
        /// Include dismissed candidates
        #[arg(long)]
        all: bool,
    },
    /// Dismiss a candidate until it repeats again
    Dismiss {
        /// Candidate ID
        id: i64,
    },
    /// Mark a candidate as turned into a reusable artifact
    Convert {
        /// Candidate ID
        id: i64,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Load config
    let config = Config::load(&cli.config).unwrap_or_default();

    // Open store and start the embedder
    let engine = Arc::new(Engine::open(config)?);

    match cli.command {
        Commands::Index => {
            let engine = engine.clone();
            tokio::task::spawn_blocking(move || index::run(&engine)).await??;
        }
        Commands::Search { query, limit, json } => {
            search::run(&engine, &query, limit, json)?;
        }
        Commands::Patterns { json } => {
            let engine = engine.clone();
            tokio::task::spawn_blocking(move || patterns::run(&engine, json)).await??;
        }
        Commands::Candidates { command } => match command {
            CandidateCommands::List { all } => {
                candidates::list(&engine, all)?;
            }
            CandidateCommands::Dismiss { id } => {
                candidates::dismiss(&engine, id)?;
            }
            CandidateCommands::Convert { id } => {
                candidates::convert(&engine, id)?;
            }
        },
        Commands::Purge { session_id } => {
            purge::run(&engine, &session_id)?;
        }
        Commands::Stats => {
            stats::run(&engine)?;
        }
        Commands::Watch {
            index_every,
            detect_every,
        } => {
            watch::run(
                engine.clone(),
                Duration::from_secs(index_every.max(1)),
                Duration::from_secs(detect_every.max(1)),
            )
            .await?;
        }
    }

    Ok(())
}
