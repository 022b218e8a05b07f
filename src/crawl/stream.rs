//! Streaming crawl operator.
//!
//! A table-valued operator that walks a URL queue breadth-first, emitting
//! exactly one row per poll so an outer LIMIT can terminate the crawl
//! between HTTP requests. Consults the response cache, feeds followed
//! links back into the queue, and records progress in an optional state
//! table for resumability.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use rusqlite::Connection;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{CrawlContext, CrawlOptions, CrawlRow, CrawlSource, QueueItem};
use crate::db::{cache, state};
use crate::error::{classify, CrawlError, FailureKind, Result};
use crate::extract::spec::{evaluate_specs, parse_extract_spec, ExtractSpec};
use crate::extract::{build_record, links};
use crate::http::robots::RobotsCache;
use crate::http::{FetchRequest, FetchResponse};
use crate::utils::{extract_domain, fib_backoff};

/// Cardinality published to the host planner. An estimate below this
/// sentinel means a LIMIT was pushed down.
pub const REPORTED_CARDINALITY: i64 = 1_000_000;

const BACKOFF_CAP_SECONDS: u64 = 60;

/// Fetch outcome: the cacheable entry plus link-resolution metadata that
/// does not persist in the cache.
struct FetchedEntry {
    entry: cache::CacheEntry,
    final_url: String,
    etag: Option<String>,
    last_modified: Option<String>,
}

impl FetchedEntry {
    fn failure(url: &str, error: String) -> Self {
        Self {
            entry: cache::CacheEntry {
                url: url.to_string(),
                status: 0,
                error,
                ..Default::default()
            },
            final_url: url.to_string(),
            etag: None,
            last_modified: None,
        }
    }
}

pub struct StreamCrawl {
    ctx: CrawlContext,
    options: CrawlOptions,
    specs: Vec<ExtractSpec>,
    source: Option<CrawlSource>,

    queue: Vec<QueueItem>,
    queue_idx: usize,
    processed: HashSet<String>,
    results_returned: i64,
    limit_hint: Option<i64>,
    initialized: bool,
    finished: bool,

    conn: Option<Connection>,
    robots: RobotsCache,
    last_fetch: HashMap<String, Instant>,
}

impl StreamCrawl {
    pub fn new(ctx: CrawlContext, source: CrawlSource, options: CrawlOptions) -> Self {
        let specs = options
            .extract
            .iter()
            .filter_map(|s| parse_extract_spec(s))
            .collect();
        Self {
            ctx,
            options,
            specs,
            source: Some(source),
            queue: Vec::new(),
            queue_idx: 0,
            processed: HashSet::new(),
            results_returned: 0,
            limit_hint: None,
            initialized: false,
            finished: false,
            conn: None,
            robots: RobotsCache::new(),
            last_fetch: HashMap::new(),
        }
    }

    /// Cardinality reported to the optimizer.
    pub fn reported_cardinality(&self) -> i64 {
        REPORTED_CARDINALITY
    }

    /// Record the planner's cardinality estimate. Estimates at or above the
    /// reported sentinel carry no information and are ignored.
    pub fn set_limit_hint(&mut self, estimated: i64) {
        if estimated > 0 && estimated < REPORTED_CARDINALITY {
            self.limit_hint = Some(estimated);
        }
    }

    /// Effective row cap: the smaller of the explicit option and the
    /// planner hint when both are present.
    fn effective_limit(&self) -> Option<i64> {
        match (self.options.max_results, self.limit_hint) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn init(&mut self) -> Result<()> {
        let conn = self.ctx.db.connect()?;

        let source = self.source.take().expect("init runs once");
        let mut seeds = Vec::new();
        match source {
            CrawlSource::Urls(urls) => seeds = urls,
            CrawlSource::Query(sql) => {
                let set = crate::host::query_rows(&conn, &sql)
                    .map_err(|e| CrawlError::SourceQuery(e.to_string()))?;
                for row in &set.rows {
                    if let Some(value) = row.first() {
                        if !matches!(value, rusqlite::types::Value::Null) {
                            seeds.push(crate::host::value_to_string(value));
                        }
                    }
                }
            }
        }

        if let Some(table) = self.options.state_table.clone() {
            state::ensure_state_table(&conn, &table)?;
            self.processed = state::load_processed(&conn, &table)?;
            debug!(
                table = %table,
                resumed = self.processed.len(),
                "loaded crawl state"
            );
        }

        for url in seeds {
            self.queue.push(QueueItem { url, depth: 1 });
        }
        self.conn = Some(conn);
        self.initialized = true;
        Ok(())
    }

    /// Next unprocessed queue item, advancing past duplicates.
    fn dequeue(&mut self) -> Option<QueueItem> {
        while self.queue_idx < self.queue.len() {
            let item = self.queue[self.queue_idx].clone();
            self.queue_idx += 1;
            if item.url.is_empty() || !self.processed.contains(&item.url) {
                return Some(item);
            }
        }
        None
    }

    async fn politeness_delay(&mut self, url: &str) {
        if self.options.delay_ms == 0 {
            return;
        }
        let domain = extract_domain(url);
        if domain.is_empty() {
            return;
        }
        let delay = Duration::from_millis(self.options.delay_ms);
        if let Some(last) = self.last_fetch.get(&domain) {
            let elapsed = last.elapsed();
            if elapsed < delay {
                tokio::time::sleep(delay - elapsed).await;
            }
        }
        self.last_fetch.insert(domain, Instant::now());
    }

    async fn fetch_with_retry(&self, request: &FetchRequest) -> FetchResponse {
        let mut response = self.ctx.pool.fetch(request).await;
        let mut attempt = 0u32;
        while response.status == 0 && attempt < self.options.retries {
            attempt += 1;
            let wait = fib_backoff(attempt, BACKOFF_CAP_SECONDS);
            debug!(url = %request.url, attempt, wait, "retrying transport failure");
            tokio::time::sleep(Duration::from_secs(wait)).await;
            response = self.ctx.pool.fetch(request).await;
        }
        if response.status == 0 && self.options.retries > 0 {
            response.error = FailureKind::MaxRetriesExceeded.as_str().to_string();
        }
        response
    }

    /// Fetch one URL and map it to a cache entry, the redirect-final URL
    /// used for link resolution, and any response validators.
    async fn fetch_entry(&mut self, url: &str) -> FetchedEntry {
        if self.options.respect_robots {
            let allowed = self
                .robots
                .is_allowed(&self.ctx.pool, url, &self.options.user_agent)
                .await;
            if !allowed {
                return FetchedEntry::failure(
                    url,
                    FailureKind::RobotsDisallowed.as_str().to_string(),
                );
            }
        }

        let mut request = match build_fetch_request(&self.ctx, url, &self.options) {
            Ok(r) => r,
            Err(e) => return FetchedEntry::failure(url, e.to_string()),
        };

        if let (Some(conn), Some(table)) = (&self.conn, &self.options.state_table) {
            if let Ok((etag, last_modified)) = state::conditional_hints(conn, table, url) {
                request.if_none_match = etag;
                request.if_modified_since = last_modified;
            }
        }

        self.politeness_delay(url).await;
        let response = self.fetch_with_retry(&request).await;

        let error = if response.status == 0 {
            if response.error == FailureKind::MaxRetriesExceeded.as_str() {
                response.error.clone()
            } else {
                classify(0, &response.error)
                    .map(|k| k.as_str().to_string())
                    .unwrap_or_default()
            }
        } else {
            String::new()
        };

        let final_url = if response.final_url.is_empty() {
            url.to_string()
        } else {
            response.final_url.clone()
        };

        FetchedEntry {
            entry: cache::CacheEntry {
                url: url.to_string(),
                status: response.status,
                content_type: response.content_type,
                body: response.body,
                error,
                response_time_ms: response.response_time_ms as i64,
            },
            final_url,
            etag: response.etag,
            last_modified: response.last_modified,
        }
    }

    fn build_row(&self, entry: &cache::CacheEntry, depth: i32) -> CrawlRow {
        let record = build_record(&entry.body, &entry.content_type, &entry.url);
        let extract = if self.specs.is_empty() {
            String::new()
        } else {
            evaluate_specs(&self.specs, &entry.body, &record).to_string()
        };
        CrawlRow {
            url: entry.url.clone(),
            status: entry.status,
            content_type: entry.content_type.clone(),
            html: record,
            error: entry.error.clone(),
            extract,
            response_time_ms: entry.response_time_ms,
            depth,
        }
    }

    fn follow_links(&mut self, entry: &cache::CacheEntry, final_url: &str, depth: i32) {
        let selector = match &self.options.follow {
            Some(s) if !s.is_empty() => s.clone(),
            _ => return,
        };
        if depth >= self.options.max_depth
            || !(200..300).contains(&entry.status)
            || entry.body.is_empty()
        {
            return;
        }
        let found = links::extract_links(&entry.body, &selector, final_url);
        debug!(url = %entry.url, found = found.len(), depth, "following links");
        for link in found {
            if !self.processed.contains(&link.url) {
                self.queue.push(QueueItem {
                    url: link.url,
                    depth: depth + 1,
                });
            }
        }
    }

    /// Produce the next row, or `None` when the crawl has terminated.
    pub async fn next_row(&mut self) -> Result<Option<CrawlRow>> {
        if self.finished {
            return Ok(None);
        }
        if !self.initialized {
            self.init()?;
        }

        loop {
            if self.ctx.cancel.is_cancelled() {
                debug!("crawl cancelled");
                self.finished = true;
                return Ok(None);
            }
            if let Some(limit) = self.effective_limit() {
                if self.results_returned >= limit {
                    self.finished = true;
                    return Ok(None);
                }
            }

            let item = match self.dequeue() {
                Some(item) => item,
                None => {
                    self.finished = true;
                    return Ok(None);
                }
            };

            if item.url.is_empty() {
                self.results_returned += 1;
                return Ok(Some(CrawlRow {
                    error: "NULL URL".to_string(),
                    depth: item.depth,
                    ..Default::default()
                }));
            }

            // Cache consultation, then the network.
            let mut from_cache = false;
            let fetched = if self.options.cache {
                let conn = self.conn.as_ref().expect("initialized");
                match cache::cached_entry(conn, &item.url, self.options.cache_ttl_hours)? {
                    Some(entry) => {
                        debug!(url = %item.url, "cache hit");
                        from_cache = true;
                        FetchedEntry {
                            final_url: entry.url.clone(),
                            entry,
                            etag: None,
                            last_modified: None,
                        }
                    }
                    None => self.fetch_entry(&item.url).await,
                }
            } else {
                self.fetch_entry(&item.url).await
            };
            let entry = fetched.entry;

            if !from_cache && self.options.cache {
                let conn = self.conn.as_ref().expect("initialized");
                if let Err(e) = cache::save_to_cache(conn, &entry) {
                    warn!(url = %entry.url, error = %e, "cache write failed");
                }
            }

            let row = self.build_row(&entry, item.depth);

            self.processed.insert(item.url.clone());
            self.follow_links(&entry, &fetched.final_url, item.depth);

            if let (Some(conn), Some(table)) = (&self.conn, &self.options.state_table) {
                if let Err(e) = state::save_state(
                    conn,
                    table,
                    &item.url,
                    entry.status,
                    &row.extract,
                    fetched.etag.as_deref(),
                    fetched.last_modified.as_deref(),
                ) {
                    warn!(table = %table, error = %e, "state write failed");
                }
            }

            self.results_returned += 1;
            return Ok(Some(row));
        }
    }

    /// Drain the operator into a vector. Convenience for callers without
    /// row-at-a-time needs.
    pub async fn collect_rows(&mut self) -> Result<Vec<CrawlRow>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await? {
            rows.push(row);
        }
        Ok(rows)
    }
}

/// Build a fetch request for one URL, folding in process settings and any
/// matching secret (bearer token, extra headers, proxy override).
pub(crate) fn build_fetch_request(
    ctx: &CrawlContext,
    url: &str,
    options: &CrawlOptions,
) -> Result<FetchRequest> {
    let mut request = FetchRequest::new(url, options.user_agent.clone())?;
    request.timeout = options.timeout;

    if let Some(endpoint) = &ctx.settings.http_proxy {
        request.proxy = Some(crate::http::ProxyConfig {
            endpoint: endpoint.clone(),
            username: ctx.settings.http_proxy_username.clone(),
            password: ctx.settings.http_proxy_password.clone(),
        });
    }

    if let Some(secret) = ctx.secrets.lookup(url) {
        if let Some(token) = secret.bearer_token {
            request
                .extra_headers
                .insert("Authorization".to_string(), format!("Bearer {token}"));
        }
        for (name, value) in secret.extra_http_headers {
            request.extra_headers.insert(name, value);
        }
        if let Some(endpoint) = secret.http_proxy {
            request.proxy = Some(crate::http::ProxyConfig {
                endpoint,
                username: secret.http_proxy_username,
                password: secret.http_proxy_password,
            });
        }
    }

    Ok(request)
}
