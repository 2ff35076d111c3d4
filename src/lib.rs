//! bookmark-vitals: liveness checking for Chrome bookmark exports
//!
//! Commands:
//! - validate: Check every bookmark, reusing fresh cached verdicts
//! - check: Check single URLs
//! - cache: Inspect and administer the check cache
//! - list / stats / unvisited: Read-only views of an export
//! - init: Write a vitals.yaml template

pub mod bookmarks;
pub mod cache;
pub mod check;
pub mod checker;
pub mod classify;
pub mod clock;
pub mod config;
pub mod error;
pub mod init;
pub mod inspect;
pub mod logging;
pub mod probe;
pub mod schema;
pub mod validate;

pub use cache::{is_fresh, CheckCache};
pub use checker::LinkChecker;
pub use classify::classify;
pub use clock::{Clock, SystemClock};
pub use config::{CheckStrategy, Config};
pub use error::{Error, Result};
pub use probe::{CheckResult, CheckTarget, HttpProbe, Probe};
pub use schema::{BrokenStatus, CacheEntry, ErrorCategory, ErrorDetails, LoginRequired};
pub use validate::{BatchProgress, BatchReport, ValidateOptions, Validator, Verdict};
