//! validate command: check every bookmark in an export
//!
//! Fresh cache entries are reused; everything else is probed with at most
//! `max_concurrency` checks in flight. Output is one compact JSON report on
//! stdout; progress goes to the log.

use crate::bookmarks::{self, Bookmark};
use crate::cache::{is_fresh, CheckCache};
use crate::checker::LinkChecker;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::probe::{CheckTarget, HttpProbe, Probe};
use crate::schema::{BrokenStatus, CacheEntry, LoginRequired};
use anyhow::Context;
use clap::Args;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

#[derive(Args)]
pub struct ValidateArgs {
    /// Chrome `Bookmarks` export (JSON)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Maximum checks in flight (1-64)
    #[arg(short, long, env = "VITALS_CONCURRENCY", value_parser = clap::value_parser!(u16).range(1..=64))]
    pub concurrency: Option<u16>,

    /// Reuse verdicts younger than this many hours
    #[arg(long, env = "CACHE_FRESHNESS_HOURS")]
    pub freshness_hours: Option<u64>,

    /// Ignore cached verdicts and re-check everything
    #[arg(long)]
    pub force: bool,

    /// Include every verdict in the output (default: broken and gated only)
    #[arg(long)]
    pub all: bool,
}

/// Knobs for one batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidateOptions {
    pub max_concurrency: usize,
    pub freshness_hours: u64,
    pub progress_interval: usize,
    /// Treat every cache entry as stale
    pub force: bool,
}

impl ValidateOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            freshness_hours: config.freshness_hours,
            progress_interval: config.progress_interval,
            force: false,
        }
    }
}

/// Running counters, reported every `progress_interval` completions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub completed: usize,
    /// Checks scheduled this run (cache hits excluded)
    pub pending: usize,
    pub cache_hits: usize,
    pub ok: usize,
    pub login_required: usize,
    pub bot_protected: usize,
    pub broken: usize,
    pub dns_failures: usize,
    pub tcp_failures: usize,
    pub bytes_transferred: u64,
}

impl BatchProgress {
    fn record(&mut self, entry: &CacheEntry) {
        self.completed += 1;
        match (entry.broken_status, entry.login_required) {
            (BrokenStatus::Broken, _) => self.broken += 1,
            (_, LoginRequired::Yes) => self.login_required += 1,
            (_, LoginRequired::BotProtected) => self.bot_protected += 1,
            _ => self.ok += 1,
        }
        if let Some(details) = &entry.error_details {
            if details.dns_resolved == Some(false) {
                self.dns_failures += 1;
            }
            if details.tcp_connectable == Some(false) {
                self.tcp_failures += 1;
            }
            self.bytes_transferred += details.bytes_transferred;
        }
    }
}

/// One bookmark's verdict after a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    #[serde(flatten)]
    pub entry: CacheEntry,
    /// Served from the cache rather than checked this run
    pub cached: bool,
}

/// Summary of a batch run. Outcome counters cover checks made this run;
/// reused verdicts are only counted in `cache_hits`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    /// Checkable bookmarks considered (duplicates excluded)
    pub total: usize,
    pub cache_hits: usize,
    pub checked: usize,
    pub ok: usize,
    pub login_required: usize,
    pub bot_protected: usize,
    pub broken: usize,
    pub dns_failures: usize,
    pub tcp_failures: usize,
    pub bytes_transferred: u64,
    /// Parsed URLs with a scheme other than http(s)
    pub unsupported: usize,
    /// URLs that failed to parse
    pub invalid: usize,
    /// Repeated ids, checked once
    pub duplicates: usize,
    pub elapsed_ms: u64,
    /// Input order
    pub verdicts: Vec<Verdict>,
}

impl BatchReport {
    pub fn broken_verdicts(&self) -> impl Iterator<Item = &Verdict> {
        self.verdicts
            .iter()
            .filter(|v| v.entry.broken_status == BrokenStatus::Broken)
    }

    pub fn gated_verdicts(&self) -> impl Iterator<Item = &Verdict> {
        self.verdicts
            .iter()
            .filter(|v| v.entry.broken_status == BrokenStatus::Ok && v.entry.login_required.is_gated())
    }

    fn absorb(&mut self, progress: &BatchProgress) {
        self.checked = progress.completed;
        self.ok = progress.ok;
        self.login_required = progress.login_required;
        self.bot_protected = progress.bot_protected;
        self.broken = progress.broken;
        self.dns_failures = progress.dns_failures;
        self.tcp_failures = progress.tcp_failures;
        self.bytes_transferred = progress.bytes_transferred;
    }
}

type ProgressFn = Box<dyn Fn(&BatchProgress) + Send + Sync>;

/// Batch orchestrator
pub struct Validator<P> {
    checker: Arc<LinkChecker<P>>,
    options: ValidateOptions,
    on_progress: Option<ProgressFn>,
}

impl<P: Probe> Validator<P> {
    pub fn new(probe: P, cache: Arc<CheckCache>, clock: Arc<dyn Clock>, options: ValidateOptions) -> Self {
        Self {
            checker: Arc::new(LinkChecker::new(probe, cache, clock)),
            options,
            on_progress: None,
        }
    }

    /// Called with the running counters at every progress report
    pub fn on_progress(mut self, callback: impl Fn(&BatchProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    pub fn cache(&self) -> &Arc<CheckCache> {
        self.checker.cache()
    }

    /// Check every checkable bookmark, reusing fresh verdicts
    pub async fn validate_all(&self, bookmarks: &[Bookmark]) -> Result<BatchReport> {
        let mut unsupported = 0;
        let mut invalid = 0;
        let mut targets = Vec::with_capacity(bookmarks.len());
        for bookmark in bookmarks {
            match CheckTarget::from_bookmark(bookmark) {
                Some(target) => targets.push(target),
                None if bookmark.parsed.is_some() => unsupported += 1,
                None => invalid += 1,
            }
        }

        let mut report = self.validate_targets(targets).await?;
        report.unsupported = unsupported;
        report.invalid = invalid;
        Ok(report)
    }

    /// Check arbitrary targets (bookmarks or anonymous URLs)
    pub async fn validate_targets(&self, targets: Vec<CheckTarget>) -> Result<BatchReport> {
        let started = Instant::now();
        let cache = Arc::clone(self.checker.cache());

        // Nowhere to record results: stop before any network traffic
        cache.ping()?;

        let now = self.checker.clock().now();
        let mut report = BatchReport::default();
        let mut verdicts: Vec<Option<Verdict>> = Vec::with_capacity(targets.len());
        let mut pending: Vec<(usize, CheckTarget)> = Vec::new();
        let mut seen = HashSet::new();

        let mut unique = Vec::with_capacity(targets.len());
        for target in targets {
            if seen.insert(target.id.clone()) {
                unique.push(target);
            } else {
                report.duplicates += 1;
            }
        }

        let cached: Vec<Option<CacheEntry>> = if self.options.force {
            unique.iter().map(|_| None).collect()
        } else {
            let cache = Arc::clone(&cache);
            let ids: Vec<String> = unique.iter().map(|t| t.id.clone()).collect();
            tokio::task::spawn_blocking(move || ids.iter().map(|id| cache.get(id)).collect::<Result<Vec<_>>>())
                .await??
        };

        for (target, entry) in unique.into_iter().zip(cached) {
            let slot = verdicts.len();
            match entry {
                Some(entry) if is_fresh(&entry, self.options.freshness_hours, now) => {
                    report.cache_hits += 1;
                    verdicts.push(Some(Verdict { entry, cached: true }));
                }
                _ => {
                    verdicts.push(None);
                    pending.push((slot, target));
                }
            }
        }
        report.total = verdicts.len();

        info!(
            total = report.total,
            cache_hits = report.cache_hits,
            to_check = pending.len(),
            concurrency = self.options.max_concurrency,
            "starting validation"
        );

        let mut progress = BatchProgress {
            pending: pending.len(),
            cache_hits: report.cache_hits,
            ..BatchProgress::default()
        };
        let mut failure: Option<Error> = None;

        if !pending.is_empty() {
            let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
            let abort = Arc::new(AtomicBool::new(false));
            let (tx, mut rx) = mpsc::unbounded_channel();

            let scheduler = {
                let checker = Arc::clone(&self.checker);
                let abort = Arc::clone(&abort);
                tokio::spawn(async move {
                    for (slot, target) in pending {
                        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                            break;
                        };
                        if abort.load(Ordering::SeqCst) {
                            break;
                        }
                        let checker = Arc::clone(&checker);
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            // A panicking check still reports back
                            let check = tokio::spawn(async move { checker.check(&target).await });
                            let outcome = check.await.unwrap_or_else(|err| Err(Error::from(err)));
                            drop(permit);
                            let _ = tx.send((slot, outcome));
                        });
                    }
                })
            };

            let interval = self.options.progress_interval.max(1);
            while let Some((slot, outcome)) = rx.recv().await {
                match outcome {
                    Ok(entry) => {
                        progress.record(&entry);
                        verdicts[slot] = Some(Verdict { entry, cached: false });
                    }
                    Err(err) => {
                        warn!(error = %err, "check could not be recorded, stopping validation");
                        abort.store(true, Ordering::SeqCst);
                        progress.completed += 1;
                        failure.get_or_insert(err);
                    }
                }
                if progress.completed % interval == 0 {
                    self.report_progress(&progress);
                }
            }
            // Already done: its sender was dropped before the channel closed
            let _ = scheduler.await;

            if progress.completed % interval != 0 {
                self.report_progress(&progress);
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }

        let missing = verdicts.iter().filter(|v| v.is_none()).count();
        if missing > 0 {
            warn!(missing, "checks ended without a verdict");
        }
        report.absorb(&progress);
        report.verdicts = verdicts.into_iter().flatten().collect();
        report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            total = report.total,
            cache_hits = report.cache_hits,
            checked = report.checked,
            ok = report.ok,
            login_required = report.login_required,
            broken = report.broken,
            bytes = report.bytes_transferred,
            elapsed_ms = report.elapsed_ms,
            "validation finished"
        );
        Ok(report)
    }

    fn report_progress(&self, progress: &BatchProgress) {
        info!(
            completed = progress.completed,
            pending = progress.pending,
            ok = progress.ok,
            login_required = progress.login_required,
            broken = progress.broken,
            dns_failures = progress.dns_failures,
            tcp_failures = progress.tcp_failures,
            bytes = progress.bytes_transferred,
            "progress"
        );
        if let Some(callback) = &self.on_progress {
            callback(progress);
        }
    }
}

/// Run the validate command
pub async fn run_validate(args: ValidateArgs, mut config: Config) -> anyhow::Result<()> {
    if let Some(concurrency) = args.concurrency {
        config.max_concurrency = usize::from(concurrency);
    }
    if let Some(hours) = args.freshness_hours {
        config.freshness_hours = hours;
    }
    config.validate()?;

    let json = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Failed to read file: {}", args.file.display()))?;
    let tree = bookmarks::parse_str(&json)?;
    for problem in &tree.errors {
        warn!(id = %problem.id, url = %problem.url, reason = %problem.reason, "skipping invalid URL");
    }

    let cache = Arc::new(CheckCache::open(&config.cache_path)?);
    let config = Arc::new(config);
    let mut options = ValidateOptions::from_config(&config);
    options.force = args.force;

    let probe = HttpProbe::new(Arc::clone(&config))?;
    let validator = Validator::new(probe, cache, Arc::new(SystemClock), options);
    let mut report = validator.validate_all(&tree.links).await?;

    if !args.all {
        report.verdicts.retain(|v| {
            v.entry.broken_status == BrokenStatus::Broken || v.entry.login_required.is_gated()
        });
    }
    println!("{}", serde_json::to_string(&report)?);

    eprintln!(
        "Done: {} ok, {} gated, {} broken ({} from cache)",
        report.ok,
        report.login_required + report.bot_protected,
        report.broken,
        report.cache_hits
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ErrorCategory, ErrorDetails};

    fn entry(status: BrokenStatus, login: LoginRequired) -> CacheEntry {
        let mut details = ErrorDetails::new(ErrorCategory::Other, "test");
        details.bytes_transferred = 700;
        CacheEntry {
            broken_status: status,
            login_required: login,
            error_details: Some(details),
            ..CacheEntry::unchecked("1", "https://example.com", None)
        }
    }

    #[test]
    fn test_progress_record() {
        let mut progress = BatchProgress::default();
        progress.record(&entry(BrokenStatus::Ok, LoginRequired::No));
        progress.record(&entry(BrokenStatus::Ok, LoginRequired::Yes));
        progress.record(&entry(BrokenStatus::Ok, LoginRequired::BotProtected));
        progress.record(&entry(BrokenStatus::Broken, LoginRequired::No));

        let mut dns = entry(BrokenStatus::Broken, LoginRequired::No);
        if let Some(details) = dns.error_details.as_mut() {
            details.dns_resolved = Some(false);
            details.bytes_transferred = 50;
        }
        progress.record(&dns);

        assert_eq!(progress.completed, 5);
        assert_eq!(progress.ok, 1);
        assert_eq!(progress.login_required, 1);
        assert_eq!(progress.bot_protected, 1);
        assert_eq!(progress.broken, 2);
        assert_eq!(progress.dns_failures, 1);
        assert_eq!(progress.bytes_transferred, 4 * 700 + 50);
    }

    #[test]
    fn test_verdict_serializes_flat() {
        let verdict = Verdict {
            entry: entry(BrokenStatus::Broken, LoginRequired::No),
            cached: true,
        };
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["id"], "1");
        assert_eq!(json["broken_status"], "broken");
        assert_eq!(json["cached"], true);
    }
}
