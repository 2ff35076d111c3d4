//! Failure classification
//!
//! Maps a failure message and optional HTTP status onto an [`ErrorCategory`].
//! Rules are evaluated top to bottom and the first match wins; a message can
//! satisfy several rules ("DNS resolution failed: connection refused"), so the
//! order is part of the contract.

use crate::schema::ErrorCategory;
use regex::Regex;
use std::sync::LazyLock;

/// Resolver failures as phrased by us, hyper, getaddrinfo and browsers
static DNS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)dns (resolution|lookup|error)|failed to lookup address|name or service not known|nodename nor servname|no such host|name_not_resolved",
    )
    .unwrap()
});

/// Classify a failure. Pure and deterministic.
pub fn classify(message: &str, status_code: Option<u16>) -> ErrorCategory {
    let lower = message.to_lowercase();

    if DNS_REGEX.is_match(message) {
        return ErrorCategory::DnsFailure;
    }

    if ["ssl", "tls", "certificate"].iter().any(|t| lower.contains(t)) {
        return ErrorCategory::SslError;
    }

    if matches!(status_code, Some(401) | Some(403))
        || lower.contains("unauthorized")
        || lower.contains("forbidden")
    {
        return ErrorCategory::AuthRequired;
    }

    if status_code == Some(404) || lower.contains("not found") {
        return ErrorCategory::NotFound;
    }

    if matches!(status_code, Some(500..=599)) {
        return ErrorCategory::ServerError;
    }

    if lower.contains("timeout") || lower.contains("timed out") {
        return ErrorCategory::Timeout;
    }

    if ["connection", "connect", "network"].iter().any(|t| lower.contains(t)) {
        return ErrorCategory::ConnectionError;
    }

    ErrorCategory::Other
}

/// Render an error with its full source chain, so classification sees the
/// root cause (`reqwest` wraps hyper wraps io).
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
