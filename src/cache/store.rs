//! SQLite-backed check cache
//!
//! One row per checked identity. Every write is a single statement, so
//! concurrent callers never observe a torn row. A small in-process map sits in
//! front of point lookups by id.

use super::migrations;
use crate::error::{Error, Result};
use crate::schema::{BrokenStatus, CacheEntry, ErrorDetails, LoginRequired};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};
use tracing::debug;
use url::Url;

const SELECT_COLUMNS: &str =
    "id, url, name, last_checked, broken_status, login_required, error_details";

pub struct CheckCache {
    conn: Mutex<Connection>,
    memo: RwLock<HashMap<String, CacheEntry>>,
    location: String,
}

impl CheckCache {
    /// Open (or create) the cache file and run migrations.
    ///
    /// Any failure here is reported as [`Error::CacheUnavailable`] so callers
    /// can stop before issuing network requests.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let location = path.display().to_string();
        let unavailable = |reason: String| Error::CacheUnavailable {
            path: location.clone(),
            reason,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| unavailable(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(|e| unavailable(e.to_string()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| unavailable(e.to_string()))?;
        migrations::run_all(&conn).map_err(|e| unavailable(e.to_string()))?;

        debug!(path = %location, "opened check cache");
        Ok(Self::from_connection(conn, location))
    }

    /// In-memory cache, discarded on drop
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_all(&conn)?;
        Ok(Self::from_connection(conn, ":memory:".to_string()))
    }

    fn from_connection(conn: Connection, location: String) -> Self {
        Self {
            conn: Mutex::new(conn),
            memo: RwLock::new(HashMap::new()),
            location,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // Statements are atomic; a panic elsewhere cannot leave a torn row
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Confirm the store answers queries
    pub fn ping(&self) -> Result<()> {
        self.conn()
            .query_row("SELECT COUNT(*) FROM check_cache", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(|e| Error::CacheUnavailable {
                path: self.location.clone(),
                reason: e.to_string(),
            })
    }

    pub fn get(&self, id: &str) -> Result<Option<CacheEntry>> {
        if let Some(entry) = self.memo.read().unwrap_or_else(|e| e.into_inner()).get(id) {
            return Ok(Some(entry.clone()));
        }

        let entry = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM check_cache WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                row_to_entry,
            )
            .optional()?;

        if let Some(entry) = &entry {
            self.remember(entry);
        }
        Ok(entry)
    }

    /// Most recently checked entry for a URL (normalized before lookup)
    pub fn get_by_url(&self, url: &str) -> Result<Option<CacheEntry>> {
        let key = normalize_url(url);
        let entry = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {} FROM check_cache WHERE url_key = ?1
                     ORDER BY last_checked DESC LIMIT 1",
                    SELECT_COLUMNS
                ),
                params![key],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// Insert or fully replace the row for `entry.id`; last write wins
    pub fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        let details = entry
            .error_details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn().execute(
            "INSERT INTO check_cache (
                 id, url, url_key, name, last_checked, broken_status,
                 login_required, category, status_code, error_details
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                 url = excluded.url,
                 url_key = excluded.url_key,
                 name = excluded.name,
                 last_checked = excluded.last_checked,
                 broken_status = excluded.broken_status,
                 login_required = excluded.login_required,
                 category = excluded.category,
                 status_code = excluded.status_code,
                 error_details = excluded.error_details",
            params![
                entry.id,
                entry.url,
                normalize_url(&entry.url),
                entry.name,
                entry.last_checked.map(format_timestamp),
                entry.broken_status.as_str(),
                entry.login_required.as_str(),
                entry.category().map(|c| c.as_str()),
                entry.status_code(),
                details,
            ],
        )?;

        self.remember(entry);
        Ok(())
    }

    /// Every entry, unordered
    pub fn get_all(&self) -> Result<Vec<CacheEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {} FROM check_cache", SELECT_COLUMNS))?;
        let entries = stmt
            .query_map([], row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Entries never checked or checked at least `max_age_hours` before `now`
    pub fn get_stale(&self, max_age_hours: u64, now: DateTime<Utc>) -> Result<Vec<CacheEntry>> {
        let cutoff = now
            .checked_sub_signed(hours(max_age_hours))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let cutoff = format_timestamp(cutoff);
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM check_cache WHERE last_checked IS NULL OR last_checked <= ?1 OR last_checked > ?2",
            SELECT_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![cutoff, format_timestamp(now)], row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Entries whose last verdict is `status`
    pub fn get_by_status(&self, status: BrokenStatus) -> Result<Vec<CacheEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM check_cache WHERE broken_status = ?1 ORDER BY id",
            SELECT_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![status.as_str()], row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Returns whether a row was removed
    pub fn delete(&self, id: &str) -> Result<bool> {
        let removed = self
            .conn()
            .execute("DELETE FROM check_cache WHERE id = ?1", params![id])?;
        self.memo
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        Ok(removed > 0)
    }

    /// Remove every entry in one statement. Returns the number removed.
    pub fn clear(&self) -> Result<usize> {
        let removed = self.conn().execute("DELETE FROM check_cache", [])?;
        self.memo.write().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let conn = self.conn();
        let mut stats = CacheStats::default();

        let mut stmt =
            conn.prepare("SELECT broken_status, COUNT(*) FROM check_cache GROUP BY broken_status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (status, count) = row?;
            let count = count as usize;
            stats.total += count;
            match status.parse::<BrokenStatus>() {
                Ok(BrokenStatus::Ok) => stats.ok += count,
                Ok(BrokenStatus::Broken) => stats.broken += count,
                _ => stats.unknown += count,
            }
        }

        let mut stmt =
            conn.prepare("SELECT login_required, COUNT(*) FROM check_cache GROUP BY login_required")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (login, count) = row?;
            match login.parse::<LoginRequired>() {
                Ok(LoginRequired::Yes) => stats.login_required += count as usize,
                Ok(LoginRequired::BotProtected) => stats.bot_protected += count as usize,
                _ => {}
            }
        }

        let mut stmt = conn.prepare(
            "SELECT category, COUNT(*) FROM check_cache
             WHERE broken_status = 'broken' AND category IS NOT NULL
             GROUP BY category",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (category, count) = row?;
            stats.broken_by_category.insert(category, count as usize);
        }

        let (checked, oldest, newest): (i64, Option<String>, Option<String>) = conn.query_row(
            "SELECT COUNT(last_checked), MIN(last_checked), MAX(last_checked) FROM check_cache",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        stats.checked = checked as usize;
        stats.never_checked = stats.total - stats.checked;
        stats.oldest_check = oldest.as_deref().and_then(parse_timestamp);
        stats.newest_check = newest.as_deref().and_then(parse_timestamp);

        Ok(stats)
    }

    fn remember(&self, entry: &CacheEntry) {
        self.memo
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(entry.id.clone(), entry.clone());
    }
}

/// Counts for cache reports
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total: usize,
    pub checked: usize,
    pub never_checked: usize,
    pub ok: usize,
    pub broken: usize,
    pub unknown: usize,
    pub login_required: usize,
    pub bot_protected: usize,
    pub broken_by_category: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_check: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_check: Option<DateTime<Utc>>,
}

/// `last_checked` is set and younger than `max_age_hours` at `now`. A check
/// stamped in the future (clock skew) is stale.
pub fn is_fresh(entry: &CacheEntry, max_age_hours: u64, now: DateTime<Utc>) -> bool {
    entry.last_checked.is_some_and(|checked| {
        let age = now.signed_duration_since(checked);
        age >= Duration::zero() && age < hours(max_age_hours)
    })
}

/// Canonical form used for URL lookups: lowercase scheme and host, default
/// port and fragment dropped. Unparseable input is only trimmed.
pub fn normalize_url(raw: &str) -> String {
    match Url::parse(raw.trim()) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.trim().to_string(),
    }
}

/// Cache identity for a URL checked outside any bookmark
pub fn anonymous_id(url: &str) -> String {
    format!("url:{}", normalize_url(url))
}

fn hours(h: u64) -> Duration {
    let max = i64::MAX / 3_600_000;
    Duration::hours(i64::try_from(h).unwrap_or(max).min(max))
}

/// Fixed-width RFC 3339 so text comparison matches time order
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<CacheEntry> {
    let last_checked: Option<String> = row.get(3)?;
    let broken_status: String = row.get(4)?;
    let login_required: String = row.get(5)?;
    let details: Option<String> = row.get(6)?;

    Ok(CacheEntry {
        id: row.get(0)?,
        url: row.get(1)?,
        name: row.get(2)?,
        last_checked: last_checked
            .map(|s| parse_timestamp(&s).ok_or_else(|| conversion(3, format!("bad timestamp `{}`", s))))
            .transpose()?,
        broken_status: broken_status.parse().map_err(|e| conversion(4, e))?,
        login_required: login_required.parse().map_err(|e| conversion(5, e))?,
        error_details: details
            .map(|s| serde_json::from_str::<ErrorDetails>(&s).map_err(|e| conversion(6, e.to_string())))
            .transpose()?,
    })
}

fn conversion(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, message.into())
}
