//! Command-line interface for precache.

mod status;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use precache::config::Config;
use precache::network::HttpNetwork;
use precache::storage::CacheStorage;
use precache::worker::{OfflineWorker, WorkerSettings};

#[derive(Parser, Debug)]
#[command(name = "precache")]
#[command(about = "Seed an offline cache and serve requests cache-first")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ~/.precache/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Cache bucket name
    #[arg(long, global = true)]
    pub cache_name: Option<String>,

    /// Origin URL assets and proxied paths resolve against
    #[arg(long, global = true)]
    pub origin: Option<String>,

    /// Directory holding cache buckets
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Seed the cache bucket with every configured asset
    Install {
        /// Replace the configured asset list (repeatable)
        #[arg(long = "asset")]
        assets: Vec<String>,
    },
    /// Fetch one path cache-first and print the body
    Fetch {
        /// Path relative to the origin, e.g. ./index.html
        path: String,
        /// Write the body to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the status line and headers before the body
        #[arg(short, long)]
        include: bool,
    },
    /// Install, then serve the origin through the cache on a local port
    Serve {
        /// Bind address
        #[arg(long)]
        bind: Option<String>,
        /// Listen port
        #[arg(long)]
        port: Option<u16>,
        /// Serve whatever the bucket already holds without installing first
        #[arg(long)]
        skip_install: bool,
    },
    /// Show cache buckets and the entries of the configured one
    Status,
}

/// Dispatch a parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli, |key| std::env::var(key).ok())?;
    match cli.command {
        Commands::Install { assets } => worker::cmd_install(config, assets).await,
        Commands::Fetch {
            path,
            output,
            include,
        } => worker::cmd_fetch(config, &path, output, include).await,
        Commands::Serve {
            bind,
            port,
            skip_install,
        } => worker::cmd_serve(config, bind, port, skip_install).await,
        Commands::Status => status::cmd_status(config).await,
    }
}

/// File, then environment (read through `env`), then flags.
fn load_config(cli: &Cli, env: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let path = cli.config.clone().unwrap_or_else(Config::path);
    let mut config = Config::load_from_path(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.apply_overrides(env);
    if let Some(name) = &cli.cache_name {
        config.cache_name = name.clone();
    }
    if let Some(origin) = &cli.origin {
        config.origin = origin.clone();
    }
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
    Ok(config)
}

/// Build a worker over the configured bucket and a real HTTP network.
pub(crate) fn build_worker(config: &Config) -> Result<Arc<OfflineWorker>> {
    config.validate().context("Invalid configuration")?;
    let settings = WorkerSettings::from_config(config)?;
    let network = HttpNetwork::new(&config.network)?;
    let storage = CacheStorage::new(config.cache_dir());
    Ok(Arc::new(OfflineWorker::new(
        settings,
        storage,
        Arc::new(network),
    )))
}
