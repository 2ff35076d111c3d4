//! list, stats and unvisited commands
//!
//! Read-only views of a bookmark export. Compact JSON on stdout.

use crate::bookmarks::{self, Bookmark, BookmarkNode, BookmarkStats, Folder, ParsedTree};
use crate::cache::CheckCache;
use crate::config::Config;
use crate::schema::{BrokenStatus, LoginRequired};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct ListArgs {
    /// Chrome `Bookmarks` export (JSON)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// One row per bookmark instead of the folder tree
    #[arg(long)]
    pub flat: bool,

    /// Attach the cached verdict to each row (implies --flat)
    #[arg(long)]
    pub with_status: bool,
}

#[derive(Args)]
pub struct StatsArgs {
    /// Chrome `Bookmarks` export (JSON)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Hostnames to include in the histogram
    #[arg(long, default_value = "10")]
    pub top: usize,
}

#[derive(Args)]
pub struct UnvisitedArgs {
    /// Chrome `Bookmarks` export (JSON)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

/// Flat listing row
#[derive(Debug, Serialize)]
pub struct Row {
    pub id: String,
    pub name: String,
    pub url: String,
    /// Folder names from the bar down
    pub folder: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BrokenStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<LoginRequired>,
}

#[derive(Debug, Serialize)]
pub struct StatsOutput<'a> {
    pub total_bookmarks: usize,
    pub total_folders: usize,
    pub empty_folders: usize,
    pub unvisited_bookmarks: usize,
    pub duplicate_urls: usize,
    pub invalid_urls: usize,
    pub unique_hostnames: usize,
    pub top_hostnames: Vec<(&'a str, usize)>,
}

impl<'a> StatsOutput<'a> {
    pub fn new(stats: &'a BookmarkStats, top: usize) -> Self {
        Self {
            total_bookmarks: stats.total_bookmarks,
            total_folders: stats.total_folders,
            empty_folders: stats.empty_folders,
            unvisited_bookmarks: stats.unvisited_bookmarks,
            duplicate_urls: stats.duplicate_urls,
            invalid_urls: stats.invalid_urls,
            unique_hostnames: stats.unique_hostnames.len(),
            top_hostnames: stats.top_hostnames(top),
        }
    }
}

async fn load(path: &Path) -> Result<ParsedTree> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    Ok(bookmarks::parse_str(&json)?)
}

pub async fn run_list(args: ListArgs, config: &Config) -> Result<()> {
    let tree = load(&args.file).await?;

    if !args.flat && !args.with_status {
        println!("{}", serde_json::to_string(&tree.root)?);
        return Ok(());
    }

    let mut rows = flatten(&tree.root);
    if args.with_status {
        let cache = CheckCache::open(&config.cache_path)?;
        for row in &mut rows {
            if let Some(entry) = cache.get(&row.id)? {
                row.status = Some(entry.broken_status);
                row.login = Some(entry.login_required);
            }
        }
    }
    println!("{}", serde_json::to_string(&rows)?);
    Ok(())
}

pub async fn run_stats(args: StatsArgs) -> Result<()> {
    let tree = load(&args.file).await?;
    let stats = tree.stats();
    println!("{}", serde_json::to_string(&StatsOutput::new(&stats, args.top))?);
    Ok(())
}

pub async fn run_unvisited(args: UnvisitedArgs) -> Result<()> {
    let tree = load(&args.file).await?;
    let rows: Vec<Row> = flatten(&tree.root)
        .into_iter()
        .filter(|row| row.last_used.is_none())
        .collect();
    eprintln!("{} of {} bookmarks never opened", rows.len(), tree.links.len());
    println!("{}", serde_json::to_string(&rows)?);
    Ok(())
}

/// Pre-order rows with folder paths
pub fn flatten(root: &Folder) -> Vec<Row> {
    let mut rows = Vec::new();
    let mut path = Vec::new();
    walk(root, &mut path, &mut rows);
    rows
}

fn walk<'a>(folder: &'a Folder, path: &mut Vec<&'a str>, rows: &mut Vec<Row>) {
    path.push(&folder.name);
    for child in &folder.children {
        match child {
            BookmarkNode::Link(bookmark) => rows.push(row(bookmark, path)),
            BookmarkNode::Folder(sub) => walk(sub, path, rows),
        }
    }
    path.pop();
}

fn row(bookmark: &Bookmark, path: &[&str]) -> Row {
    Row {
        id: bookmark.id.clone(),
        name: bookmark.name.clone(),
        url: bookmark.url.clone(),
        folder: path.join("/"),
        added: bookmark.added_at(),
        last_used: bookmark.last_used_at(),
        status: None,
        login: None,
    }
}
