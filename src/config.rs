//! vitals.yaml configuration
//!
//! Defaults, then the YAML file, then environment/flags (applied by the CLI).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_FRESHNESS_HOURS: u64 = 168;
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;
pub const MAX_CONCURRENCY_LIMIT: usize = 64;
pub const DEFAULT_CACHE_PATH: &str = "data/bookmarks_cache.db";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// How to probe a host over HTTP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStrategy {
    /// HEAD only
    Head,
    /// Skip HEAD; sites that misreport HEAD or need body inspection
    GetRange,
    /// HEAD, then GET-range when HEAD is unsupported
    #[default]
    HeadWithFallback,
}

/// Per-stage timeouts in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// None: platform resolver default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_ms: Option<u64>,
    pub tcp_ms: u64,
    pub head_ms: u64,
    pub get_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            dns_ms: None,
            tcp_ms: 3_000,
            head_ms: 8_000,
            get_ms: 10_000,
        }
    }
}

impl Timeouts {
    pub fn dns(&self) -> Option<Duration> {
        self.dns_ms.map(Duration::from_millis)
    }

    pub fn tcp(&self) -> Duration {
        Duration::from_millis(self.tcp_ms)
    }

    pub fn head(&self) -> Duration {
        Duration::from_millis(self.head_ms)
    }

    pub fn get(&self) -> Duration {
        Duration::from_millis(self.get_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache_path: PathBuf,
    pub freshness_hours: u64,
    pub max_concurrency: usize,
    /// Completions between progress reports
    pub progress_interval: usize,
    pub timeouts: Timeouts,
    /// Bytes requested by the GET-range fallback
    pub range_bytes: u64,
    pub max_redirects: usize,
    pub user_agent: String,
    /// Host (or parent domain) to preferred strategy
    pub domain_strategies: BTreeMap<String, CheckStrategy>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
            freshness_hours: DEFAULT_FRESHNESS_HOURS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            progress_interval: 10,
            timeouts: Timeouts::default(),
            range_bytes: 2048,
            max_redirects: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            domain_strategies: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load and validate a YAML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 || self.max_concurrency > MAX_CONCURRENCY_LIMIT {
            return Err(Error::Config(format!(
                "max_concurrency must be between 1 and {} (got {})",
                MAX_CONCURRENCY_LIMIT, self.max_concurrency
            )));
        }
        if self.freshness_hours == 0 {
            return Err(Error::Config("freshness_hours must be positive".into()));
        }
        if self.progress_interval == 0 {
            return Err(Error::Config("progress_interval must be positive".into()));
        }
        if self.range_bytes == 0 || self.range_bytes > 65_536 {
            return Err(Error::Config(format!(
                "range_bytes must be between 1 and 65536 (got {})",
                self.range_bytes
            )));
        }
        let t = &self.timeouts;
        if t.tcp_ms == 0 || t.head_ms == 0 || t.get_ms == 0 || t.dns_ms == Some(0) {
            return Err(Error::Config("timeouts must be positive".into()));
        }
        Ok(())
    }

    /// Strategy for `host`: exact match first, then the closest parent domain
    pub fn strategy_for(&self, host: &str) -> CheckStrategy {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        let mut candidate = host.as_str();
        loop {
            if let Some(strategy) = self.domain_strategies.get(candidate) {
                return *strategy;
            }
            match candidate.split_once('.') {
                Some((_, parent)) if parent.contains('.') => candidate = parent,
                _ => return CheckStrategy::default(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.freshness_hours, 168);
        assert_eq!(config.timeouts.head(), Duration::from_secs(8));
        assert_eq!(config.timeouts.dns(), None);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
freshness_hours: 24
timeouts:
  head_ms: 5000
domain_strategies:
  docs.google.com: get_range
  github.com: head
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.freshness_hours, 24);
        assert_eq!(config.timeouts.head_ms, 5000);
        assert_eq!(config.timeouts.tcp_ms, 3000);
        assert_eq!(config.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.domain_strategies.len(), 2);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config {
            max_concurrency: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
        config.max_concurrency = 65;
        assert!(config.validate().is_err());
        config.max_concurrency = 8;
        config.timeouts.dns_ms = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_strategy_for_suffix_match() {
        let mut config = Config::default();
        config
            .domain_strategies
            .insert("docs.google.com".into(), CheckStrategy::GetRange);
        config
            .domain_strategies
            .insert("github.com".into(), CheckStrategy::Head);

        assert_eq!(config.strategy_for("docs.google.com"), CheckStrategy::GetRange);
        assert_eq!(config.strategy_for("WWW.Docs.Google.com"), CheckStrategy::GetRange);
        assert_eq!(config.strategy_for("gist.github.com"), CheckStrategy::Head);
        assert_eq!(config.strategy_for("google.com"), CheckStrategy::HeadWithFallback);
        assert_eq!(config.strategy_for("example.org"), CheckStrategy::HeadWithFallback);
    }
}
