//! check command: check URLs outside any bookmark export
//!
//! URLs come from `--url` or stdin and are cached under `url:<normalized>`
//! identities, so repeated checks of the same URL are free within the
//! freshness window.

use crate::cache::{anonymous_id, CheckCache};
use crate::clock::SystemClock;
use crate::config::Config;
use crate::probe::{CheckTarget, HttpProbe};
use crate::validate::{ValidateOptions, Validator, Verdict};
use anyhow::{bail, Result};
use clap::Args;
use serde::Serialize;
use std::io::{self, BufRead};
use std::sync::Arc;

#[derive(Args)]
pub struct CheckArgs {
    /// Check a single URL
    #[arg(long)]
    pub url: Option<String>,

    /// Read URLs from stdin (one per line)
    #[arg(long)]
    pub stdin: bool,

    /// Reuse verdicts younger than this many hours
    #[arg(long, env = "CACHE_FRESHNESS_HOURS")]
    pub freshness_hours: Option<u64>,

    /// Ignore cached verdicts
    #[arg(long)]
    pub force: bool,
}

/// A line that could not be checked
#[derive(Debug, Serialize)]
pub struct Rejected {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub ok: usize,
    pub gated: usize,
    pub broken: usize,
    pub cache_hits: usize,
    pub results: Vec<Verdict>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<Rejected>,
}

/// Run the check command
pub async fn run_check(args: CheckArgs, mut config: Config) -> Result<()> {
    let urls = get_urls(&args)?;
    if urls.is_empty() {
        bail!("No URLs found.");
    }
    if let Some(hours) = args.freshness_hours {
        config.freshness_hours = hours;
    }
    config.validate()?;

    let (targets, rejected) = to_targets(&urls);

    let cache = Arc::new(CheckCache::open(&config.cache_path)?);
    let config = Arc::new(config);
    let mut options = ValidateOptions::from_config(&config);
    options.force = args.force;

    let probe = HttpProbe::new(Arc::clone(&config))?;
    let validator = Validator::new(probe, cache, Arc::new(SystemClock), options);
    let report = validator.validate_targets(targets).await?;

    let output = CheckReport {
        ok: report.ok,
        gated: report.login_required + report.bot_protected,
        broken: report.broken,
        cache_hits: report.cache_hits,
        results: report.verdicts,
        rejected,
    };
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

fn get_urls(args: &CheckArgs) -> Result<Vec<String>> {
    if let Some(url) = &args.url {
        return Ok(vec![url.clone()]);
    }

    if args.stdin {
        let stdin = io::stdin();
        let urls = stdin
            .lock()
            .lines()
            .map_while(std::result::Result::ok)
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect();
        return Ok(urls);
    }

    bail!(
        "Usage:\n  vitals check --url <URL>  Check single URL\n  vitals check --stdin      Read URLs from stdin"
    )
}

/// Anonymous targets for checkable URLs; everything else is rejected
fn to_targets(urls: &[String]) -> (Vec<CheckTarget>, Vec<Rejected>) {
    let mut targets = Vec::new();
    let mut rejected = Vec::new();
    for url in urls {
        match CheckTarget::new(anonymous_id(url), None, url.as_str()) {
            Some(target) => targets.push(target),
            None => rejected.push(Rejected {
                url: url.clone(),
                error: "not an http(s) URL".to_string(),
            }),
        }
    }
    (targets, rejected)
}
