//! Probe plus write-through to the cache
//!
//! A check is only finished once its verdict is persisted: [`LinkChecker::check`]
//! upserts before returning, so a repeated call within the freshness window is
//! answered from the cache.

use crate::cache::{is_fresh, CheckCache};
use crate::clock::Clock;
use crate::error::Result;
use crate::probe::{CheckResult, CheckTarget, Probe};
use crate::schema::CacheEntry;
use std::sync::Arc;
use tracing::debug;

pub struct LinkChecker<P> {
    probe: P,
    cache: Arc<CheckCache>,
    clock: Arc<dyn Clock>,
}

impl<P: Probe> LinkChecker<P> {
    pub fn new(probe: P, cache: Arc<CheckCache>, clock: Arc<dyn Clock>) -> Self {
        Self { probe, cache, clock }
    }

    pub fn cache(&self) -> &Arc<CheckCache> {
        &self.cache
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Probe `target` and persist the verdict. Errors only when the cache
    /// write fails; network failures are part of the returned entry.
    pub async fn check(&self, target: &CheckTarget) -> Result<CacheEntry> {
        let result = self.probe.probe(&target.url).await;
        let entry = into_entry(target, result, self.clock.now());
        let cache = Arc::clone(&self.cache);
        let entry = tokio::task::spawn_blocking(move || cache.upsert(&entry).map(|()| entry)).await??;

        debug!(
            id = %entry.id,
            status = %entry.broken_status,
            login = %entry.login_required,
            "checked"
        );
        Ok(entry)
    }

    /// Cached verdict if fresh, otherwise a new check. The flag is true for
    /// a cache hit.
    pub async fn check_cached(&self, target: &CheckTarget, freshness_hours: u64) -> Result<(CacheEntry, bool)> {
        let cache = Arc::clone(&self.cache);
        let id = target.id.clone();
        if let Some(entry) = tokio::task::spawn_blocking(move || cache.get(&id)).await?? {
            if is_fresh(&entry, freshness_hours, self.clock.now()) {
                return Ok((entry, true));
            }
        }
        Ok((self.check(target).await?, false))
    }
}

/// Cache row for a finished check
pub fn into_entry(target: &CheckTarget, result: CheckResult, checked_at: chrono::DateTime<chrono::Utc>) -> CacheEntry {
    CacheEntry {
        id: target.id.clone(),
        url: target.raw.clone(),
        name: target.name.clone(),
        last_checked: Some(checked_at),
        broken_status: result.broken_status(),
        login_required: result.login_required,
        error_details: Some(result.details),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BrokenStatus, ErrorCategory, ErrorDetails, LoginRequired};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use url::Url;

    struct CountingProbe {
        calls: AtomicUsize,
        status: u16,
    }

    impl Probe for CountingProbe {
        fn probe(&self, _url: &Url) -> impl Future<Output = CheckResult> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut details = ErrorDetails::new(ErrorCategory::NotFound, "HTTP 404 Not Found");
            details.status_code = Some(self.status);
            async move { CheckResult::broken(details) }
        }
    }

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn setup() -> (LinkChecker<CountingProbe>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock(Mutex::new(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap())));
        let probe = CountingProbe {
            calls: AtomicUsize::new(0),
            status: 404,
        };
        let cache = Arc::new(CheckCache::open_in_memory().unwrap());
        let checker = LinkChecker::new(probe, cache, clock.clone() as Arc<dyn Clock>);
        (checker, clock)
    }

    #[tokio::test]
    async fn test_check_writes_through() {
        let (checker, clock) = setup();
        let target = CheckTarget::new("7", Some("Gone".into()), "https://gone.example/").unwrap();

        let entry = checker.check(&target).await.unwrap();
        assert_eq!(entry.broken_status, BrokenStatus::Broken);
        assert_eq!(entry.login_required, LoginRequired::No);
        assert_eq!(entry.last_checked, Some(clock.now()));
        assert_eq!(checker.cache().get("7").unwrap(), Some(entry));
    }

    #[tokio::test]
    async fn test_second_check_is_served_from_cache() {
        let (checker, clock) = setup();
        let target = CheckTarget::new("7", None, "https://gone.example/").unwrap();

        let (first, cached) = checker.check_cached(&target, 168).await.unwrap();
        assert!(!cached);
        clock.advance(Duration::minutes(1));
        let (second, cached) = checker.check_cached(&target, 168).await.unwrap();
        assert!(cached);
        assert_eq!(first, second);
        assert_eq!(checker.probe.calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::hours(168));
        let (_, cached) = checker.check_cached(&target, 168).await.unwrap();
        assert!(!cached);
        assert_eq!(checker.probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_checks_all_persist() {
        let (checker, _) = setup();
        let checker = Arc::new(checker);

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let checker = Arc::clone(&checker);
                tokio::spawn(async move {
                    let target = CheckTarget::new(i.to_string(), None, format!("https://h{}.example/", i)).unwrap();
                    checker.check(&target).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(checker.cache().get_all().unwrap().len(), 20);
        assert_eq!(checker.probe.calls.load(Ordering::SeqCst), 20);
    }
}
