//! Check cache schema
//!
//! Central types for persisted liveness verdicts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// One persisted verdict, keyed by bookmark id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Bookmark id, or `url:<normalized-url>` for anonymous checks
    pub id: String,
    /// URL as it appeared in the export
    pub url: String,
    /// Human-readable title
    pub name: Option<String>,
    /// When the last check completed (None if never checked)
    pub last_checked: Option<DateTime<Utc>>,
    /// Liveness verdict, meaningful only once `last_checked` is set
    pub broken_status: BrokenStatus,
    /// Whether the site gates access
    pub login_required: LoginRequired,
    /// Category, status code and diagnostics of the last check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
}

impl CacheEntry {
    /// A placeholder for an identity that has not been checked yet
    pub fn unchecked(id: impl Into<String>, url: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            name,
            last_checked: None,
            broken_status: BrokenStatus::Unknown,
            login_required: LoginRequired::No,
            error_details: None,
        }
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        self.error_details.as_ref().map(|d| d.category)
    }

    pub fn status_code(&self) -> Option<u16> {
        self.error_details.as_ref().and_then(|d| d.status_code)
    }
}

/// Liveness verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokenStatus {
    /// Never checked
    Unknown,
    /// Reachable (possibly gated)
    Ok,
    /// DNS failure, connection failure, 404/410, 5xx, timeout
    Broken,
}

impl BrokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokenStatus::Unknown => "unknown",
            BrokenStatus::Ok => "ok",
            BrokenStatus::Broken => "broken",
        }
    }
}

impl std::fmt::Display for BrokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BrokenStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(BrokenStatus::Unknown),
            "ok" => Ok(BrokenStatus::Ok),
            "broken" => Ok(BrokenStatus::Broken),
            other => Err(format!("unknown broken status `{}`", other)),
        }
    }
}

/// Whether a reachable site gates its content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginRequired {
    No,
    /// 401/403 or a login page in the body
    Yes,
    /// 429/999: rate-limited or blocking automated clients
    BotProtected,
}

impl LoginRequired {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginRequired::No => "no",
            LoginRequired::Yes => "yes",
            LoginRequired::BotProtected => "bot_protected",
        }
    }

    pub fn is_gated(&self) -> bool {
        !matches!(self, LoginRequired::No)
    }
}

impl std::fmt::Display for LoginRequired {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoginRequired {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no" => Ok(LoginRequired::No),
            "yes" => Ok(LoginRequired::Yes),
            "bot_protected" => Ok(LoginRequired::BotProtected),
            other => Err(format!("unknown login state `{}`", other)),
        }
    }
}

/// Failure category; exactly one per failed check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    DnsFailure,
    SslError,
    AuthRequired,
    NotFound,
    ServerError,
    Timeout,
    ConnectionError,
    Other,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 8] = [
        ErrorCategory::DnsFailure,
        ErrorCategory::SslError,
        ErrorCategory::AuthRequired,
        ErrorCategory::NotFound,
        ErrorCategory::ServerError,
        ErrorCategory::Timeout,
        ErrorCategory::ConnectionError,
        ErrorCategory::Other,
    ];

    /// Stable storage key
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::DnsFailure => "dns_failure",
            ErrorCategory::SslError => "ssl_error",
            ErrorCategory::AuthRequired => "auth_required",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::ConnectionError => "connection_error",
            ErrorCategory::Other => "other",
        }
    }

    /// Label for display
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::DnsFailure => "DNS Failure",
            ErrorCategory::SslError => "SSL Error",
            ErrorCategory::AuthRequired => "Authentication Required",
            ErrorCategory::NotFound => "Not Found",
            ErrorCategory::ServerError => "Server Error",
            ErrorCategory::Timeout => "Timeout",
            ErrorCategory::ConnectionError => "Connection Error",
            ErrorCategory::Other => "Other",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown error category `{}`", s))
    }
}

/// Which stage produced the verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckMethod {
    Dns,
    Tcp,
    Head,
    GetRange,
}

impl std::fmt::Display for CheckMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckMethod::Dns => write!(f, "DNS"),
            CheckMethod::Tcp => write!(f, "TCP"),
            CheckMethod::Head => write!(f, "HEAD"),
            CheckMethod::GetRange => write!(f, "GET_RANGE"),
        }
    }
}

/// Structured outcome details: fixed fields plus an open `extra` map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub category: ErrorCategory,
    /// Human-readable summary
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<CheckMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_resolved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_connectable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_preview: Option<String>,
    /// Approximate bytes moved over the wire for this check
    #[serde(default)]
    pub bytes_transferred: u64,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ErrorDetails {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            status_code: None,
            method: None,
            dns_resolved: None,
            tcp_connectable: None,
            response_time_ms: None,
            final_url: None,
            content_type: None,
            content_preview: None,
            bytes_transferred: 0,
            extra: BTreeMap::new(),
        }
    }
}
