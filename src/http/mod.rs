//! HTTP fetch façade over a shared client pool.
//!
//! One operation: [`HttpPool::fetch`]. Redirects are followed manually so
//! the final URL and redirect count are exact; transport failures come
//! back as responses with status 0 and a populated error rather than as
//! `Err` values, because per-URL failures must become rows.

pub mod robots;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use crate::error::{classify, CrawlError, FailureKind, Result};
use crate::utils::gzip::{decompress_gzip, is_gzipped};
use crate::utils::is_acceptable;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_REDIRECTS: u32 = 10;
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Proxy endpoint with optional credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub endpoint: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// One URL to fetch, with everything the façade needs to build the request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub accept_gzip: bool,
    pub proxy: Option<ProxyConfig>,
    pub extra_headers: HashMap<String, String>,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
}

impl FetchRequest {
    /// Validates the URL is absolute http/https.
    pub fn new(url: impl Into<String>, user_agent: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let parsed = url::Url::parse(&url)
            .map_err(|e| CrawlError::InvalidOption(format!("bad URL {url:?}: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(CrawlError::InvalidOption(format!(
                "unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }
        Ok(Self {
            url,
            user_agent: user_agent.into(),
            timeout: DEFAULT_TIMEOUT,
            accept_gzip: true,
            proxy: None,
            extra_headers: HashMap::new(),
            if_none_match: None,
            if_modified_since: None,
        })
    }
}

/// Decoded response from one fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    /// HTTP status; 0 means transport failure.
    pub status: i32,
    pub final_url: String,
    pub redirect_count: u32,
    pub body: String,
    pub content_type: String,
    pub retry_after: Option<String>,
    pub server_date: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_length: i64,
    /// Non-empty means transport or protocol failure.
    pub error: String,
    pub response_time_ms: u64,
}

impl FetchResponse {
    pub fn success(&self) -> bool {
        (200..300).contains(&self.status) || self.status == 304
    }

    /// Failure classification for this response, if any.
    pub fn failure(&self) -> Option<FailureKind> {
        classify(self.status, &self.error)
    }

    fn transport_failure(url: &str, error: String, elapsed: Duration) -> Self {
        Self {
            status: 0,
            final_url: url.to_string(),
            error,
            response_time_ms: elapsed.as_millis() as u64,
            content_length: -1,
            ..Default::default()
        }
    }
}

/// Shared client pool. Clients are keyed by proxy configuration (reqwest
/// clients are per-proxy) and reused for connection pooling; the map is
/// guarded by a single mutex.
pub struct HttpPool {
    clients: Mutex<HashMap<String, reqwest::Client>>,
    /// Responses larger than this fail with `content_too_large`.
    pub max_body_bytes: usize,
    /// Optional comma-separated content-type accept list.
    pub accept_types: String,
    /// Optional comma-separated content-type reject list.
    pub reject_types: String,
}

impl Default for HttpPool {
    fn default() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            accept_types: String::new(),
            reject_types: String::new(),
        }
    }
}

/// Process-scope pool used when an operator is not handed its own.
pub fn default_pool() -> Arc<HttpPool> {
    static POOL: OnceLock<Arc<HttpPool>> = OnceLock::new();
    POOL.get_or_init(|| Arc::new(HttpPool::default())).clone()
}

impl HttpPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, proxy: Option<&ProxyConfig>) -> std::result::Result<reqwest::Client, String> {
        let key = match proxy {
            None => String::from("direct"),
            Some(p) => format!(
                "{}|{}",
                p.endpoint,
                p.username.as_deref().unwrap_or_default()
            ),
        };
        let mut clients = self.clients.lock().expect("http pool mutex");
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(CONNECT_TIMEOUT);
        if let Some(p) = proxy {
            let mut proxy = reqwest::Proxy::all(&p.endpoint).map_err(|e| e.to_string())?;
            if let Some(user) = &p.username {
                proxy = proxy.basic_auth(user, p.password.as_deref().unwrap_or_default());
            }
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|e| e.to_string())?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    /// Fetch one URL, following up to [`MAX_REDIRECTS`] redirects.
    pub async fn fetch(&self, request: &FetchRequest) -> FetchResponse {
        let start = Instant::now();
        let client = match self.client_for(request.proxy.as_ref()) {
            Ok(c) => c,
            Err(e) => return FetchResponse::transport_failure(&request.url, e, start.elapsed()),
        };

        let mut headers = HeaderMap::new();
        for (name, value) in &request.extra_headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
        if let Some(etag) = &request.if_none_match {
            if let Ok(value) = HeaderValue::from_str(etag) {
                headers.insert(reqwest::header::IF_NONE_MATCH, value);
            }
        }
        if let Some(since) = &request.if_modified_since {
            if let Ok(value) = HeaderValue::from_str(since) {
                headers.insert(reqwest::header::IF_MODIFIED_SINCE, value);
            }
        }
        if !request.accept_gzip {
            headers.insert(
                reqwest::header::ACCEPT_ENCODING,
                HeaderValue::from_static("identity"),
            );
        }

        let mut current_url = request.url.clone();
        let mut redirect_count = 0u32;

        loop {
            debug!(url = %current_url, redirect_count, "fetching");
            let result = client
                .get(&current_url)
                .timeout(request.timeout)
                .header(reqwest::header::USER_AGENT, &request.user_agent)
                .headers(headers.clone())
                .send()
                .await;

            let response = match result {
                Ok(r) => r,
                Err(e) => {
                    return FetchResponse::transport_failure(
                        &request.url,
                        e.to_string(),
                        start.elapsed(),
                    )
                }
            };

            let status = response.status().as_u16() as i32;
            if response.status().is_redirection() && redirect_count < MAX_REDIRECTS {
                if let Some(location) = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                {
                    let next = url::Url::parse(&current_url)
                        .ok()
                        .and_then(|base| base.join(location).ok());
                    if let Some(next) = next {
                        current_url = next.to_string();
                        redirect_count += 1;
                        continue;
                    }
                }
            }

            let header_str = |name: reqwest::header::HeaderName| {
                response
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
            };
            let content_type = header_str(reqwest::header::CONTENT_TYPE).unwrap_or_default();
            let retry_after = header_str(reqwest::header::RETRY_AFTER);
            // Server dates are only kept when they pass the clock-skew check.
            let server_date = header_str(reqwest::header::DATE)
                .map(|raw| crate::utils::parse_http_date(&raw))
                .filter(|date| !date.is_empty());
            let etag = header_str(reqwest::header::ETAG);
            let last_modified = header_str(reqwest::header::LAST_MODIFIED);
            let content_length = response.content_length().map(|l| l as i64).unwrap_or(-1);

            if content_length > self.max_body_bytes as i64 {
                return FetchResponse::transport_failure(
                    &request.url,
                    FailureKind::ContentTooLarge.as_str().to_string(),
                    start.elapsed(),
                );
            }
            if !content_type.is_empty()
                && !is_acceptable(&content_type, &self.accept_types, &self.reject_types)
            {
                return FetchResponse::transport_failure(
                    &request.url,
                    FailureKind::ContentTypeRejected.as_str().to_string(),
                    start.elapsed(),
                );
            }

            let bytes = match response.bytes().await {
                Ok(b) => b,
                Err(e) => {
                    return FetchResponse::transport_failure(
                        &request.url,
                        format!("body read error: {e}"),
                        start.elapsed(),
                    )
                }
            };
            if bytes.len() > self.max_body_bytes {
                return FetchResponse::transport_failure(
                    &request.url,
                    FailureKind::ContentTooLarge.as_str().to_string(),
                    start.elapsed(),
                );
            }

            // Servers occasionally gzip without being asked; decode by magic
            // bytes rather than trusting Content-Encoding.
            let body = if is_gzipped(&bytes) {
                decompress_gzip(&bytes)
            } else {
                String::from_utf8_lossy(&bytes).into_owned()
            };

            return FetchResponse {
                status,
                final_url: current_url,
                redirect_count,
                body,
                content_type,
                retry_after,
                server_date,
                etag,
                last_modified,
                content_length,
                error: String::new(),
                response_time_ms: start.elapsed().as_millis() as u64,
            };
        }
    }

    /// Fetch several URLs with bounded concurrency, preserving input order.
    pub async fn fetch_all(
        &self,
        requests: Vec<FetchRequest>,
        concurrency: usize,
    ) -> Vec<FetchResponse> {
        use futures::stream::StreamExt;
        let concurrency = concurrency.clamp(1, 32);
        futures::stream::iter(requests)
            .map(|request| async move { self.fetch(&request).await })
            .buffered(concurrency)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_validation() {
        assert!(FetchRequest::new("https://h/a", "ua").is_ok());
        assert!(FetchRequest::new("ftp://h/a", "ua").is_err());
        assert!(FetchRequest::new("not a url", "ua").is_err());
    }

    #[test]
    fn response_success_range() {
        let mut r = FetchResponse::default();
        r.status = 200;
        assert!(r.success());
        r.status = 304;
        assert!(r.success());
        r.status = 404;
        assert!(!r.success());
        r.status = 0;
        assert!(!r.success());
    }

    #[tokio::test]
    async fn transport_failure_shape() {
        let pool = HttpPool::new();
        // Reserved TEST-NET address; connection will fail fast.
        let request = FetchRequest::new("http://192.0.2.1:9/x", "ua")
            .map(|mut r| {
                r.timeout = Duration::from_millis(300);
                r
            })
            .unwrap();
        let response = pool.fetch(&request).await;
        assert_eq!(response.status, 0);
        assert!(!response.error.is_empty());
        assert!(response.failure().is_some());
    }
}
