//! Mavuno CLI
//!
//! Command-line tools for inspecting and repairing the offline store of a
//! Mavuno client.
//!
//! # Commands
//!
//! - `queue` - List mutations waiting for replay
//! - `cache` - List cached responses with age and freshness
//! - `drop-op` - Remove one queued mutation
//! - `clear-cache` - Clear one or all cached responses

mod commands;

use clap::{Parser, Subcommand};
use mavuno_sync_engine::{SyncConfig, DEFAULT_CACHE_PREFIX, DEFAULT_QUEUE_KEY};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Mavuno offline store tools.
#[derive(Parser)]
#[command(name = "mavuno")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    store: Option<PathBuf>,

    /// Store key holding the mutation queue
    #[arg(global = true, long, default_value = DEFAULT_QUEUE_KEY)]
    queue_key: String,

    /// Store key prefix of cached responses
    #[arg(global = true, long, default_value = DEFAULT_CACHE_PREFIX)]
    cache_prefix: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List mutations waiting for replay
    Queue {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List cached responses
    Cache {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Remove one queued mutation
    DropOp {
        /// Operation id as shown by `queue`
        id: String,
    },

    /// Clear cached responses
    ClearCache {
        /// Clear only this endpoint
        #[arg(short, long)]
        endpoint: Option<String>,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = SyncConfig::new()
        .with_queue_key(cli.queue_key)
        .with_cache_prefix(cli.cache_prefix);

    match cli.command {
        Commands::Queue { format } => {
            let path = cli.store.ok_or("Store directory required for queue")?;
            commands::queue::run(&path, &config, &format).await?;
        }
        Commands::Cache { format } => {
            let path = cli.store.ok_or("Store directory required for cache")?;
            commands::cache::run(&path, &config, &format).await?;
        }
        Commands::DropOp { id } => {
            let path = cli.store.ok_or("Store directory required for drop-op")?;
            commands::drop_op::run(&path, &config, &id).await?;
        }
        Commands::ClearCache { endpoint } => {
            let path = cli.store.ok_or("Store directory required for clear-cache")?;
            commands::clear_cache::run(&path, &config, endpoint.as_deref()).await?;
        }
        Commands::Version => {
            println!("Mavuno CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
