//! Error taxonomy
//!
//! Structural errors (malformed export) and operational errors (cache,
//! configuration) surface here. Network failures never do: a dead link is a
//! `CheckResult`, not an error.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The bookmark export is malformed at `path`.
    #[error("malformed bookmark export at {path}: {reason}")]
    Structure { path: String, reason: String },

    #[error("invalid bookmark JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cache storage error: {0}")]
    Cache(#[from] rusqlite::Error),

    /// The store could not be opened or answered a health check.
    #[error("cache unavailable at {path}: {reason}")]
    CacheUnavailable { path: String, reason: String },

    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid config file: {0}")]
    ConfigFile(#[from] serde_yaml::Error),

    /// A check or cache task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn structure(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Structure {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for errors caused by the input tree rather than the environment.
    pub fn is_structural(&self) -> bool {
        matches!(self, Error::Structure { .. } | Error::Json(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_display() {
        let err = Error::structure("bookmark_bar/children[1]", "unknown node type `widget`");
        assert_eq!(
            err.to_string(),
            "malformed bookmark export at bookmark_bar/children[1]: unknown node type `widget`"
        );
        assert!(err.is_structural());
    }

    #[test]
    fn test_operational_not_structural() {
        let err = Error::Config("max_concurrency must be between 1 and 64".to_string());
        assert!(!err.is_structural());
    }
}
