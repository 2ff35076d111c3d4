//! Staged network probe
//!
//! DNS, then TCP (https only), then HEAD, then a ranged GET. Each stage can
//! end the check early; the first definitive answer wins. Every outcome,
//! including transport failures, comes back as a [`CheckResult`] value.

use crate::bookmarks::Bookmark;
use crate::classify::{classify, error_chain};
use crate::config::{CheckStrategy, Config};
use crate::error::Result;
use crate::schema::{BrokenStatus, CheckMethod, ErrorCategory, ErrorDetails, LoginRequired};
use regex::Regex;
use reqwest::header::{CONTENT_TYPE, RANGE};
use reqwest::{redirect, Client, Response, StatusCode};
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::OnceCell;
use tracing::debug;
use url::{Host, Url};

/// Wire-cost estimates for stages that do not report bytes
const DNS_FAILURE_BYTES: u64 = 50;
const TCP_FAILURE_BYTES: u64 = 150;
const REQUEST_OVERHEAD_BYTES: u64 = 500;

const PREVIEW_SOURCE_BYTES: usize = 1024;
const PREVIEW_CHARS: usize = 500;

/// Login page signatures, matched against the body prefix
static LOGIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<form[^>]*(login|log-in|signin|sign-in)|<input[^>]*password|<title>[^<]*(sign|log)\s*-?\s*in|class\s*=\s*["']?login|id\s*=\s*["']?login|authentication required|access denied|unauthorized|(sign|log) ?in to continue|please (sign|log) ?in"#,
    )
    .unwrap()
});

/// Elements that only appear on gated pages
const LOGIN_SELECTORS: &[&str] = &[
    "input[type='password']",
    "form[action*='login']",
    "form[action*='signin']",
    "[class*='login-wall']",
    "[class*='auth-wall']",
    "[id*='login-modal']",
];

/// Something the probe can check
#[derive(Debug, Clone, PartialEq)]
pub struct CheckTarget {
    /// Cache identity
    pub id: String,
    pub name: Option<String>,
    /// URL as given, stored verbatim in the cache
    pub raw: String,
    pub url: Url,
}

impl CheckTarget {
    /// None unless `raw` parses with an http(s) scheme and a host
    pub fn new(id: impl Into<String>, name: Option<String>, raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let url = Url::parse(raw.trim()).ok()?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().map_or(true, str::is_empty) {
            return None;
        }
        Some(Self {
            id: id.into(),
            name,
            raw,
            url,
        })
    }

    pub fn from_bookmark(bookmark: &Bookmark) -> Option<Self> {
        if !bookmark.is_checkable() {
            return None;
        }
        Self::new(&bookmark.id, Some(bookmark.name.clone()), &bookmark.url)
    }
}

/// Outcome of one probe
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub reachable: bool,
    pub login_required: LoginRequired,
    pub details: ErrorDetails,
}

impl CheckResult {
    pub fn reachable(details: ErrorDetails, login_required: LoginRequired) -> Self {
        Self {
            reachable: true,
            login_required,
            details,
        }
    }

    pub fn broken(details: ErrorDetails) -> Self {
        Self {
            reachable: false,
            login_required: LoginRequired::No,
            details,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        self.details.category
    }

    pub fn status_code(&self) -> Option<u16> {
        self.details.status_code
    }

    pub fn broken_status(&self) -> BrokenStatus {
        if self.reachable {
            BrokenStatus::Ok
        } else {
            BrokenStatus::Broken
        }
    }
}

/// A network check for one URL. Implementations never fail: every failure
/// mode is a [`CheckResult`].
pub trait Probe: Send + Sync + 'static {
    fn probe(&self, url: &Url) -> impl Future<Output = CheckResult> + Send;
}

type DnsOutcome = std::result::Result<Vec<IpAddr>, String>;

/// The real probe: tokio resolver and sockets, reqwest for HTTP
pub struct HttpProbe {
    client: Client,
    config: Arc<Config>,
    /// One resolution per hostname for the lifetime of the probe
    dns_memo: Mutex<HashMap<String, Arc<OnceCell<DnsOutcome>>>>,
}

impl HttpProbe {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(redirect::Policy::limited(config.max_redirects))
            .connect_timeout(config.timeouts.tcp())
            .build()?;

        Ok(Self {
            client,
            config,
            dns_memo: Mutex::new(HashMap::new()),
        })
    }

    async fn resolve(&self, host: &str, port: u16) -> DnsOutcome {
        let cell = {
            let mut memo = self.dns_memo.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(memo.entry(host.to_ascii_lowercase()).or_default())
        };
        cell.get_or_init(|| lookup(host, port, self.config.timeouts.dns()))
            .await
            .clone()
    }

    async fn check(&self, url: &Url) -> CheckResult {
        let Some(host) = url.host() else {
            let mut details = ErrorDetails::new(ErrorCategory::Other, "URL has no host");
            details.method = Some(CheckMethod::Dns);
            return CheckResult::broken(details);
        };
        let port = url.port_or_known_default().unwrap_or(443);
        let host_label = url.host_str().unwrap_or_default().to_string();

        let addrs = match host {
            Host::Ipv4(ip) => vec![IpAddr::V4(ip)],
            Host::Ipv6(ip) => vec![IpAddr::V6(ip)],
            Host::Domain(domain) => match self.resolve(domain, port).await {
                Ok(addrs) => addrs,
                Err(reason) => {
                    debug!(host = %host_label, %reason, "dns failed");
                    let mut details = ErrorDetails::new(
                        ErrorCategory::DnsFailure,
                        format!("DNS resolution failed for {}: {}", host_label, reason),
                    );
                    details.method = Some(CheckMethod::Dns);
                    details.dns_resolved = Some(false);
                    details.bytes_transferred = DNS_FAILURE_BYTES;
                    return CheckResult::broken(details);
                }
            },
        };

        let mut tcp_connectable = None;
        if url.scheme() == "https" {
            let sockets: Vec<SocketAddr> = addrs.iter().map(|ip| SocketAddr::new(*ip, port)).collect();
            if let Err(reason) = tcp_connect(&sockets, self.config.timeouts.tcp()).await {
                debug!(host = %host_label, %reason, "tcp connect failed");
                let mut details = ErrorDetails::new(
                    ErrorCategory::ConnectionError,
                    format!("TCP connect to {}:{} failed: {}", host_label, port, reason),
                );
                details.method = Some(CheckMethod::Tcp);
                details.dns_resolved = Some(true);
                details.tcp_connectable = Some(false);
                details.bytes_transferred = TCP_FAILURE_BYTES;
                return CheckResult::broken(details);
            }
            tcp_connectable = Some(true);
        }

        let strategy = self.config.strategy_for(&host_label);
        let mut result = match strategy {
            CheckStrategy::GetRange => self.get_range(url).await,
            CheckStrategy::Head | CheckStrategy::HeadWithFallback => match self.head(url).await {
                HeadOutcome::Done(result) => result,
                HeadOutcome::Fallback { reason, .. } if strategy == CheckStrategy::HeadWithFallback => {
                    debug!(url = %url, %reason, "HEAD unsupported, falling back to GET");
                    self.get_range(url).await
                }
                HeadOutcome::Fallback { result, .. } => result,
            },
        };

        result.details.dns_resolved = Some(true);
        result.details.tcp_connectable = tcp_connectable;
        result
    }

    async fn head(&self, url: &Url) -> HeadOutcome {
        let started = Instant::now();
        let sent = self
            .client
            .head(url.clone())
            .timeout(self.config.timeouts.head())
            .send()
            .await;

        match sent {
            Ok(response) => {
                let status = response.status();
                let mut result = status_result(status, &response, CheckMethod::Head, started);
                result.details.bytes_transferred = REQUEST_OVERHEAD_BYTES;
                if status == StatusCode::METHOD_NOT_ALLOWED {
                    HeadOutcome::Fallback {
                        reason: "HTTP 405".to_string(),
                        result,
                    }
                } else {
                    HeadOutcome::Done(result)
                }
            }
            Err(err) => {
                // A GET would hit the same timeout or the same handshake
                let final_answer = err.is_timeout() || is_tls_failure(&err);
                let result = transport_failure(err, CheckMethod::Head, started);
                if final_answer {
                    HeadOutcome::Done(result)
                } else {
                    HeadOutcome::Fallback {
                        reason: result.details.message.clone(),
                        result,
                    }
                }
            }
        }
    }

    async fn get_range(&self, url: &Url) -> CheckResult {
        let started = Instant::now();
        let limit = usize::try_from(self.config.range_bytes).unwrap_or(usize::MAX);
        let sent = self
            .client
            .get(url.clone())
            .header(RANGE, format!("bytes=0-{}", self.config.range_bytes.saturating_sub(1)))
            .timeout(self.config.timeouts.get())
            .send()
            .await;

        let mut response = match sent {
            Ok(response) => response,
            Err(err) => return transport_failure(err, CheckMethod::GetRange, started),
        };

        let status = response.status();
        let mut body: Vec<u8> = Vec::with_capacity(limit.min(64 * 1024));
        // Servers may ignore Range; stop reading once we have enough
        while body.len() < limit {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let take = chunk.len().min(limit - body.len());
                    body.extend_from_slice(&chunk[..take]);
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(url = %url, error = %err, "body read interrupted");
                    break;
                }
            }
        }

        let mut result = status_result(status, &response, CheckMethod::GetRange, started);
        result.details.bytes_transferred = body.len() as u64 + REQUEST_OVERHEAD_BYTES;
        if !body.is_empty() {
            result.details.content_preview = Some(content_preview(&body));
        }

        if status.as_u16() < 400 && result.login_required == LoginRequired::No {
            let text = String::from_utf8_lossy(&body);
            if looks_like_login(&text) {
                result.login_required = LoginRequired::Yes;
                result.details.message = format!("{} (login page)", result.details.message);
            }
        }
        result
    }
}

impl Probe for HttpProbe {
    fn probe(&self, url: &Url) -> impl Future<Output = CheckResult> + Send {
        self.check(url)
    }
}

enum HeadOutcome {
    Done(CheckResult),
    /// HEAD was not conclusive; `result` is used when no fallback is allowed
    Fallback { reason: String, result: CheckResult },
}

async fn lookup(host: &str, port: u16, timeout: Option<Duration>) -> DnsOutcome {
    let resolve = async {
        tokio::net::lookup_host((host, port))
            .await
            .map(|addrs| addrs.map(|a| a.ip()).collect::<Vec<_>>())
            .map_err(|e| e.to_string())
    };
    let addrs = match timeout {
        Some(limit) => tokio::time::timeout(limit, resolve)
            .await
            .map_err(|_| "lookup timed out".to_string())??,
        None => resolve.await?,
    };
    if addrs.is_empty() {
        return Err("no addresses".to_string());
    }
    Ok(addrs)
}

async fn tcp_connect(addrs: &[SocketAddr], limit: Duration) -> std::result::Result<(), String> {
    match tokio::time::timeout(limit, TcpStream::connect(addrs)).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {}ms", limit.as_millis())),
    }
}

/// Map an HTTP status onto a verdict
fn status_result(status: StatusCode, response: &Response, method: CheckMethod, started: Instant) -> CheckResult {
    let code = status.as_u16();
    let message = match status.canonical_reason() {
        Some(reason) => format!("HTTP {} {}", code, reason),
        None => format!("HTTP {}", code),
    };

    let (category, reachable, login) = match code {
        401 | 403 => (ErrorCategory::AuthRequired, true, LoginRequired::Yes),
        429 | 999 => (ErrorCategory::Other, true, LoginRequired::BotProtected),
        404 | 410 => (ErrorCategory::NotFound, false, LoginRequired::No),
        500..=599 => (ErrorCategory::ServerError, false, LoginRequired::No),
        c if c < 400 => (ErrorCategory::Other, true, LoginRequired::No),
        c => (classify(&message, Some(c)), false, LoginRequired::No),
    };

    let mut details = ErrorDetails::new(category, message);
    details.status_code = Some(code);
    details.method = Some(method);
    details.response_time_ms = Some(elapsed_ms(started));
    details.final_url = Some(response.url().to_string());
    details.content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    if reachable {
        CheckResult::reachable(details, login)
    } else {
        CheckResult::broken(details)
    }
}

fn transport_failure(err: reqwest::Error, method: CheckMethod, started: Instant) -> CheckResult {
    let (timed_out, tls) = (err.is_timeout(), is_tls_failure(&err));
    let message = error_chain(&err.without_url());
    let category = if timed_out {
        ErrorCategory::Timeout
    } else if tls {
        ErrorCategory::SslError
    } else {
        classify(&message, None)
    };
    let mut details = ErrorDetails::new(category, format!("{} failed: {}", method, message));
    details.method = Some(method);
    details.response_time_ms = Some(elapsed_ms(started));
    CheckResult::broken(details)
}

/// Handshake or certificate failure somewhere in the source chain. rustls
/// errors reach us wrapped in an `io::Error` of kind `InvalidData`, and
/// their text rarely says "tls" or "certificate".
fn is_tls_failure(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(err);
    while let Some(cause) = source {
        if cause.downcast_ref::<rustls::Error>().is_some() {
            return true;
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.get_ref().is_some_and(|inner| inner.is::<rustls::Error>())
                || io.kind() == std::io::ErrorKind::InvalidData
            {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn content_preview(body: &[u8]) -> String {
    let head = &body[..body.len().min(PREVIEW_SOURCE_BYTES)];
    String::from_utf8_lossy(head).chars().take(PREVIEW_CHARS).collect()
}

/// Heuristic login-page detection on a body prefix
pub fn looks_like_login(html: &str) -> bool {
    if LOGIN_REGEX.is_match(html) {
        return true;
    }

    let doc = Html::parse_document(html);
    LOGIN_SELECTORS.iter().any(|sel_str| {
        Selector::parse(sel_str)
            .map(|sel| doc.select(&sel).next().is_some())
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_like_login() {
        assert!(looks_like_login(r#"<form action="/session"><input type="password" name="pw"></form>"#));
        assert!(looks_like_login("<html><head><title>Sign in - Example</title></head></html>"));
        assert!(looks_like_login("<TITLE>Login</TITLE>"));
        assert!(looks_like_login("<h1>Access Denied</h1>"));
        assert!(looks_like_login("<div>Please sign in to continue</div>"));
        assert!(looks_like_login("<div class='auth-wall-overlay'>content</div>"));
        assert!(!looks_like_login("<html><title>Release notes</title><p>Normal content here</p></html>"));
    }

    #[test]
    fn test_check_target_new() {
        let target = CheckTarget::new("1", None, "https://example.com/a#b").unwrap();
        assert_eq!(target.url.host_str(), Some("example.com"));
        assert_eq!(target.raw, "https://example.com/a#b");

        assert!(CheckTarget::new("2", None, "chrome://settings").is_none());
        assert!(CheckTarget::new("3", None, "javascript:void(0)").is_none());
        assert!(CheckTarget::new("4", None, "not a url").is_none());
    }

    #[test]
    fn test_content_preview_is_bounded() {
        let body = "x".repeat(4096);
        assert_eq!(content_preview(body.as_bytes()).len(), PREVIEW_CHARS);
        assert_eq!(content_preview(b"short"), "short");
    }

    #[test]
    fn test_check_result_status() {
        let ok = CheckResult::reachable(ErrorDetails::new(ErrorCategory::AuthRequired, "HTTP 401"), LoginRequired::Yes);
        assert_eq!(ok.broken_status(), BrokenStatus::Ok);
        assert_eq!(ok.category(), ErrorCategory::AuthRequired);

        let gone = CheckResult::broken(ErrorDetails::new(ErrorCategory::NotFound, "HTTP 404"));
        assert_eq!(gone.broken_status(), BrokenStatus::Broken);
        assert!(!gone.login_required.is_gated());
    }

    #[tokio::test]
    async fn test_dns_failure_short_circuits() {
        let mut config = Config::default();
        config.timeouts.dns_ms = Some(5_000);
        let probe = HttpProbe::new(Arc::new(config)).unwrap();
        let url = Url::parse("https://does-not-exist.invalid/").unwrap();
        let result = probe.probe(&url).await;

        assert!(!result.reachable);
        assert_eq!(result.category(), ErrorCategory::DnsFailure);
        assert_eq!(result.details.method, Some(CheckMethod::Dns));
        assert_eq!(result.details.dns_resolved, Some(false));
        assert_eq!(result.details.bytes_transferred, DNS_FAILURE_BYTES);
        assert_eq!(classify(&result.details.message, None), ErrorCategory::DnsFailure);
    }
}
