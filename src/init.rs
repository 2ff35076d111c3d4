//! init command: Create vitals.yaml template
//!
//! Writes the default configuration plus an example per-domain strategy list.

use crate::config::{CheckStrategy, Config};
use anyhow::{bail, Result};
use chrono::Utc;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Args)]
pub struct InitArgs {
    /// Output file path (default: vitals.yaml)
    #[arg(short, long, default_value = "vitals.yaml")]
    pub output: PathBuf,

    /// Overwrite existing file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct InitOutput {
    pub created: String,
    pub file: String,
}

/// Sites that misreport HEAD or serve login pages with 200
const EXAMPLE_STRATEGIES: &[(&str, CheckStrategy)] = &[
    ("docs.google.com", CheckStrategy::GetRange),
    ("drive.google.com", CheckStrategy::GetRange),
    ("twitter.com", CheckStrategy::GetRange),
    ("x.com", CheckStrategy::GetRange),
    ("linkedin.com", CheckStrategy::GetRange),
    ("facebook.com", CheckStrategy::GetRange),
    ("instagram.com", CheckStrategy::GetRange),
    ("notion.so", CheckStrategy::GetRange),
    ("github.com", CheckStrategy::Head),
    ("reddit.com", CheckStrategy::Head),
    ("stackoverflow.com", CheckStrategy::Head),
    ("youtube.com", CheckStrategy::Head),
    ("medium.com", CheckStrategy::Head),
];

/// Default config with the example strategies filled in
pub fn template() -> Config {
    let mut config = Config::default();
    config.domain_strategies = EXAMPLE_STRATEGIES
        .iter()
        .map(|(host, strategy)| (host.to_string(), *strategy))
        .collect();
    config
}

pub async fn run_init(args: InitArgs) -> Result<()> {
    if args.output.exists() && !args.force {
        let error = serde_json::json!({
            "error": "file_exists",
            "message": format!("{} already exists. Use --force to overwrite.", args.output.display()),
            "file": args.output.display().to_string()
        });
        println!("{}", serde_json::to_string(&error)?);
        bail!("File exists");
    }

    let yaml = format!(
        "# bookmark-vitals configuration\n# Environment variables VITALS_CACHE, VITALS_CONCURRENCY and\n# CACHE_FRESHNESS_HOURS override these values.\n{}",
        serde_yaml::to_string(&template())?
    );
    tokio::fs::write(&args.output, yaml).await?;

    let output = InitOutput {
        created: Utc::now().to_rfc3339(),
        file: args.output.display().to_string(),
    };
    println!("{}", serde_json::to_string(&output)?);

    Ok(())
}
