//! cache command: inspect and administer the check cache

use super::{normalize_url, CheckCache};
use crate::config::Config;
use crate::schema::{BrokenStatus, CacheEntry, ErrorCategory};
use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Subcommand)]
pub enum CacheCommand {
    /// Counts by status, login state and failure category
    Stats,
    /// Delete every cached verdict
    Clear {
        /// Required: clearing cannot be undone
        #[arg(long)]
        yes: bool,
    },
    /// Show the cached verdict for one bookmark id or URL
    Show {
        /// Bookmark id
        #[arg(conflicts_with = "url", required_unless_present = "url")]
        id: Option<String>,

        /// Look up by URL instead of id
        #[arg(long)]
        url: Option<String>,
    },
    /// List broken entries
    Broken {
        /// Only this category (e.g. not_found, dns_failure)
        #[arg(long, value_parser = parse_category)]
        category: Option<ErrorCategory>,
    },
    /// Remove one entry
    Delete {
        /// Bookmark id
        id: String,
    },
}

#[derive(Debug, Serialize)]
struct ClearOutput {
    cleared: usize,
}

#[derive(Debug, Serialize)]
struct DeleteOutput<'a> {
    id: &'a str,
    deleted: bool,
}

fn parse_category(s: &str) -> std::result::Result<ErrorCategory, String> {
    s.parse()
}

pub async fn run_cache(args: CacheArgs, config: &Config) -> Result<()> {
    let cache = CheckCache::open(&config.cache_path)?;

    match args.command {
        CacheCommand::Stats => {
            println!("{}", serde_json::to_string(&cache.stats()?)?);
        }
        CacheCommand::Clear { yes } => {
            if !yes {
                bail!("Refusing to clear {} without --yes", cache.location());
            }
            let cleared = cache.clear()?;
            println!("{}", serde_json::to_string(&ClearOutput { cleared })?);
        }
        CacheCommand::Show { id, url } => {
            let (entry, key) = match (id, url) {
                (Some(id), _) => (cache.get(&id)?, id),
                (None, Some(url)) => (cache.get_by_url(&url)?, normalize_url(&url)),
                (None, None) => bail!("Usage: vitals cache show <ID> | --url <URL>"),
            };
            match entry {
                Some(entry) => println!("{}", serde_json::to_string(&entry)?),
                None => bail!("No cached verdict for {}", key),
            }
        }
        CacheCommand::Broken { category } => {
            let broken: Vec<CacheEntry> = cache
                .get_by_status(BrokenStatus::Broken)?
                .into_iter()
                .filter(|e| category.is_none() || e.category() == category)
                .collect();
            println!("{}", serde_json::to_string(&broken)?);
        }
        CacheCommand::Delete { id } => {
            let deleted = cache.delete(&id)?;
            println!("{}", serde_json::to_string(&DeleteOutput { id: &id, deleted })?);
        }
    }

    Ok(())
}
