//! Persistent check cache
//!
//! One SQLite file holds the last verdict for every checked identity. The
//! store is opened once per process and shared by reference (`Arc`) between
//! the orchestrator, single-URL checks and the admin commands.

pub mod command;
pub mod migrations;
mod store;

pub use command::{run_cache, CacheArgs};
pub use store::{anonymous_id, is_fresh, normalize_url, CacheStats, CheckCache};
