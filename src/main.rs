//! vitals CLI
//!
//! Finds dead links in Chrome bookmark exports without re-checking fresh ones.

use anyhow::{Context, Result};
use bookmark_vitals::cache::{run_cache, CacheArgs};
use bookmark_vitals::check::{run_check, CheckArgs};
use bookmark_vitals::config::Config;
use bookmark_vitals::init::{run_init, InitArgs};
use bookmark_vitals::inspect::{run_list, run_stats, run_unvisited, ListArgs, StatsArgs, UnvisitedArgs};
use bookmark_vitals::logging::init_logging;
use bookmark_vitals::validate::{run_validate, ValidateArgs};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vitals")]
#[command(author = "RoyalBit Inc.")]
#[command(version)]
#[command(about = "Liveness checks for exported browser bookmarks")]
#[command(long_about = "Checks which bookmarks still resolve, caching verdicts in SQLite.\n\nCommands:\n  validate    Check every bookmark in an export\n  check       Check single URLs\n  cache       Inspect the check cache\n  list        Show the bookmark tree\n  stats       Summarize an export\n  unvisited   Bookmarks never opened\n  init        Create vitals.yaml")]
struct Cli {
    /// YAML config file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite cache file
    #[arg(long, global = true, env = "VITALS_CACHE", value_name = "FILE")]
    cache: Option<PathBuf>,

    /// Log as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every bookmark in a Chrome export
    Validate(ValidateArgs),
    /// Check single URLs (--url or --stdin)
    Check(CheckArgs),
    /// Inspect and administer the check cache
    Cache(CacheArgs),
    /// Show the bookmark tree (or a flat list)
    List(ListArgs),
    /// Counts, duplicates and top hostnames
    Stats(StatsArgs),
    /// Bookmarks that were never opened
    Unvisited(UnvisitedArgs),
    /// Create vitals.yaml template
    Init(InitArgs),
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load_or_default(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("Failed to load config: {}", path.display()),
        None => "Failed to load default config".to_string(),
    })?;
    if let Some(cache) = &cli.cache {
        config.cache_path = cache.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Validate(args) => run_validate(args, config).await,
        Commands::Check(args) => run_check(args, config).await,
        Commands::Cache(args) => run_cache(args, &config).await,
        Commands::List(args) => run_list(args, &config).await,
        Commands::Stats(args) => run_stats(args).await,
        Commands::Unvisited(args) => run_unvisited(args).await,
        Commands::Init(args) => run_init(args).await,
    }
}
