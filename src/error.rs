//! Crate error types and the crawl failure taxonomy.

use thiserror::Error;

/// Classified failure reported in the `error` column and in failure logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NetworkTimeout,
    NetworkDnsFailure,
    NetworkConnectionRefused,
    NetworkSslError,
    HttpClientError,
    HttpServerError,
    HttpRateLimited,
    RobotsDisallowed,
    ContentTooLarge,
    ContentTypeRejected,
    MaxRetriesExceeded,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NetworkTimeout => "network_timeout",
            FailureKind::NetworkDnsFailure => "network_dns_failure",
            FailureKind::NetworkConnectionRefused => "network_connection_refused",
            FailureKind::NetworkSslError => "network_ssl_error",
            FailureKind::HttpClientError => "http_client_error",
            FailureKind::HttpServerError => "http_server_error",
            FailureKind::HttpRateLimited => "http_rate_limited",
            FailureKind::RobotsDisallowed => "robots_disallowed",
            FailureKind::ContentTooLarge => "content_too_large",
            FailureKind::ContentTypeRejected => "content_type_rejected",
            FailureKind::MaxRetriesExceeded => "max_retries_exceeded",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a response by status code and, for transport failures (status 0),
/// by error message substring. Classification never fails: unrecognized
/// transport messages map to `NetworkTimeout`. Successful statuses return
/// `None`.
pub fn classify(status: i32, message: &str) -> Option<FailureKind> {
    if status == 429 {
        return Some(FailureKind::HttpRateLimited);
    }
    if (500..600).contains(&status) {
        return Some(FailureKind::HttpServerError);
    }
    if (400..500).contains(&status) {
        return Some(FailureKind::HttpClientError);
    }
    if status <= 0 {
        let lower = message.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            return Some(FailureKind::NetworkTimeout);
        }
        if lower.contains("dns") || lower.contains("resolve") {
            return Some(FailureKind::NetworkDnsFailure);
        }
        if lower.contains("ssl") || lower.contains("certificate") || lower.contains("tls") {
            return Some(FailureKind::NetworkSslError);
        }
        if lower.contains("refused") || lower.contains("connect") {
            return Some(FailureKind::NetworkConnectionRefused);
        }
        return Some(FailureKind::NetworkTimeout);
    }
    None
}

/// Errors that fail a statement. Per-URL failures never surface here; they
/// become rows with a populated `error` column instead.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("unsupported source query: {0}")]
    UnsupportedQuery(String),
    #[error("source query error: {0}")]
    SourceQuery(String),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CrawlError>;
