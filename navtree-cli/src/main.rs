//! # navtree CLI
//!
//! Operator commands for inspecting and maintaining a hierarchy cache.

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use navtree_cache::{CacheConfig, HierarchyCache};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "navtree")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "navtree.yml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show store contents and size
    Stats {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Evict least recently used connections until the store fits its budget
    Compact {
        /// Byte budget; defaults to the configured size limit
        #[arg(long)]
        limit_bytes: Option<u64>,
    },

    /// List cached hierarchy levels
    Levels {
        /// Only levels of this connection
        #[arg(long)]
        connection: Option<String>,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Delete cached data of one connection, or everything
    Clear {
        #[arg(long)]
        connection: Option<String>,
    },
}

fn open_cache(config_path: &Path) -> anyhow::Result<HierarchyCache> {
    let config = CacheConfig::from_file(config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    if config.is_memory() {
        tracing::warn!("configured store is in memory, nothing persisted to inspect");
    }
    HierarchyCache::open(config).context("Failed to open hierarchy cache")
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON output stays clean
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cache = open_cache(&cli.config)?;
    match cli.command {
        Commands::Stats { json } => commands::show_stats(&cache, json),
        Commands::Compact { limit_bytes } => commands::compact(&cache, limit_bytes),
        Commands::Levels { connection, json } => commands::list_levels(&cache, connection.as_deref(), json),
        Commands::Clear { connection } => commands::clear(&cache, connection.as_deref()),
    }
}
