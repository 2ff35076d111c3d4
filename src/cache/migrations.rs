//! Schema migrations for the check cache
//!
//! A `schema_version` table records applied migrations; each runs once.

use rusqlite::Connection;

/// Bump when adding a migration.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Schema version of the database (0 when nothing has been applied)
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// Apply pending migrations. Safe to call on every open.
pub fn run_all(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         CREATE TABLE IF NOT EXISTS schema_version (
             version INTEGER PRIMARY KEY,
             applied_at TEXT NOT NULL,
             description TEXT NOT NULL
         );",
    )?;

    let current = get_schema_version(conn);

    if current < 1 {
        migration_v1(conn)?;
        record_version(conn, 1, "check_cache table")?;
    }

    if current < 2 {
        migration_v2(conn)?;
        record_version(conn, 2, "lookup indexes for url, status and age")?;
    }

    Ok(())
}

fn record_version(conn: &Connection, version: i32, description: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at, description) VALUES (?1, ?2, ?3)",
        rusqlite::params![version, chrono::Utc::now().to_rfc3339(), description],
    )?;
    Ok(())
}

/// V1: one row per checked identity.
fn migration_v1(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS check_cache (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            url_key TEXT NOT NULL,
            name TEXT,
            last_checked TEXT,
            broken_status TEXT NOT NULL DEFAULT 'unknown',
            login_required TEXT NOT NULL DEFAULT 'no',
            category TEXT,
            status_code INTEGER,
            error_details TEXT
        );
        ",
    )
}

/// V2: indexes for URL lookup, status reports and staleness scans.
fn migration_v2(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_check_cache_url_key ON check_cache(url_key);
        CREATE INDEX IF NOT EXISTS idx_check_cache_broken_status ON check_cache(broken_status);
        CREATE INDEX IF NOT EXISTS idx_check_cache_last_checked ON check_cache(last_checked);
        ",
    )
}
