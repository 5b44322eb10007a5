//! Tessera CLI - grounded question answering over a local hybrid index.
//!
//! # Usage
//!
//! ```bash
//! # Ingest pre-chunked documents (one JSON object per line)
//! tessera ingest docs.jsonl
//!
//! # Ask a question, or chat with session memory
//! tessera ask "how does reciprocal rank fusion work?"
//! tessera chat
//!
//! # Inspect retrieval and citations
//! tessera debug-retrieval "rank fusion" --json
//! tessera debug-citations "rank fusion"
//!
//! # Maintenance
//! tessera stats
//! tessera delete 3
//! tessera compact
//!
//! # Start over, e.g. after changing the embedding model
//! tessera reset --yes
//! ```

mod commands;
mod config;
mod ollama;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::CliConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Tessera: hybrid BM25 + vector retrieval with cited answers.
#[derive(Parser)]
#[command(name = "tessera", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Custom data directory (default: platform standard location)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a JSONL file of pre-chunked documents
    Ingest {
        /// Path to the JSONL file
        path: PathBuf,
    },
    /// Answer a question from the indexed documents
    Ask { query: String },
    /// Interactive chat with session memory
    Chat,
    /// Show lexical, vector, and fused rankings for a query
    DebugRetrieval { query: String },
    /// Show citation extraction and validation for an answer
    DebugCitations { query: String },
    /// Show index statistics
    Stats,
    /// Delete a document and all of its chunks
    Delete {
        /// Document id (see `ingest` output)
        id: u64,
    },
    /// Rebuild the vector graph without deleted entries
    Compact,
    /// Delete every document and clear both indexes
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let data_dir = config::get_data_dir(cli.data_dir.as_ref())?;
    let config = CliConfig::load(&data_dir)?;
    let engine = commands::open_engine(&config, &data_dir).await?;
    let json = cli.json;

    let output = match &cli.command {
        Command::Ingest { path } => commands::ingest(&engine, path, json).await?,
        Command::Ask { query } => commands::ask(&engine, &config, query, json).await?,
        Command::Chat => {
            commands::chat(&engine, &config, json).await?;
            return Ok(());
        }
        Command::DebugRetrieval { query } => {
            commands::debug_retrieval(&engine, &config, query, json).await?
        }
        Command::DebugCitations { query } => {
            commands::debug_citations(&engine, &config, query, json).await?
        }
        Command::Stats => commands::stats(&engine, json).await?,
        Command::Delete { id } => commands::delete(&engine, *id, json).await?,
        Command::Compact => {
            let removed = engine.writer().await.compact()?;
            format!("Compacted vector index, dropped {} deleted entries", removed)
        }
        Command::Reset { yes } => commands::reset(&engine, *yes, json).await?,
    };

    println!("{}", output);
    Ok(())
}
