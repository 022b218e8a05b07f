//! Per-row crawl operator for correlated joins.
//!
//! Receives a chunk of URLs from the driving side and emits at most one
//! row per poll, so the host can stop mid-chunk once an outer LIMIT is
//! satisfied. Participates in the shared pipeline limit: each emission
//! decrements the countdown, and a latched stop flushes the rest of the
//! input without fetching.

use rusqlite::Connection;
use std::sync::Arc;

use tracing::debug;

use super::stream::build_fetch_request;
use super::{CrawlContext, CrawlOptions, CrawlRow};
use crate::db::cache;
use crate::error::{classify, Result};
use crate::extract::spec::{evaluate_specs, parse_extract_spec, ExtractSpec};
use crate::extract::build_record;
use crate::pipeline::PipelineLimit;

/// Outcome of one poll.
#[derive(Debug)]
pub enum LateralPoll {
    /// One row produced; more may follow for the current chunk.
    Row(CrawlRow),
    /// Current chunk is drained (or being skipped); feed the next one.
    NeedMoreInput,
    /// Local `max_results` reached; the operator is done.
    Finished,
}

pub struct LateralCrawl {
    ctx: CrawlContext,
    options: CrawlOptions,
    specs: Vec<ExtractSpec>,
    pipeline: Option<Arc<PipelineLimit>>,
    conn: Connection,

    chunk: Vec<Option<String>>,
    current_row: usize,
    results_returned: i64,
}

impl LateralCrawl {
    /// Bind the operator: locate the shared pipeline limit for this
    /// database, or publish one when only a local `max_results` is set.
    pub fn new(ctx: CrawlContext, options: CrawlOptions) -> Result<Self> {
        let conn = ctx.db.connect()?;
        let mut pipeline = ctx.registry.get(ctx.db.id());
        if pipeline.is_none() {
            if let Some(limit) = options.max_results {
                if limit > 0 {
                    ctx.registry.init(ctx.db.id(), limit);
                    pipeline = ctx.registry.get(ctx.db.id());
                }
            }
        }
        let specs = options
            .extract
            .iter()
            .filter_map(|s| parse_extract_spec(s))
            .collect();
        Ok(Self {
            ctx,
            options,
            specs,
            pipeline,
            conn,
            chunk: Vec::new(),
            current_row: 0,
            results_returned: 0,
        })
    }

    /// Supply the next input chunk of URLs (None = SQL NULL).
    pub fn begin_chunk(&mut self, urls: Vec<Option<String>>) {
        self.chunk = urls;
        self.current_row = 0;
    }

    fn null_url_row() -> CrawlRow {
        CrawlRow {
            error: "NULL URL".to_string(),
            ..Default::default()
        }
    }

    async fn crawl_one(&mut self, url: &str) -> Result<CrawlRow> {
        // Cache first.
        if self.options.cache {
            if let Some(entry) =
                cache::cached_entry(&self.conn, url, self.options.cache_ttl_hours)?
            {
                debug!(url, "cache hit");
                return Ok(self.entry_to_row(&entry));
            }
        }

        let entry = match build_fetch_request(&self.ctx, url, &self.options) {
            Ok(request) => {
                let response = self.ctx.pool.fetch(&request).await;
                let error = if response.status == 0 {
                    classify(0, &response.error)
                        .map(|k| k.as_str().to_string())
                        .unwrap_or_default()
                } else {
                    String::new()
                };
                cache::CacheEntry {
                    url: url.to_string(),
                    status: response.status,
                    content_type: response.content_type,
                    body: response.body,
                    error,
                    response_time_ms: response.response_time_ms as i64,
                }
            }
            Err(e) => cache::CacheEntry {
                url: url.to_string(),
                status: 0,
                error: e.to_string(),
                ..Default::default()
            },
        };

        if self.options.cache {
            cache::save_to_cache(&self.conn, &entry)?;
        }
        Ok(self.entry_to_row(&entry))
    }

    fn entry_to_row(&self, entry: &cache::CacheEntry) -> CrawlRow {
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
            depth: 1,
        }
    }

    fn after_emit(&mut self) {
        self.current_row += 1;
        self.results_returned += 1;
        if let Some(pipeline) = &self.pipeline {
            let remaining = pipeline.decrement();
            if remaining <= 0 {
                debug!("pipeline limit reached");
            }
        }
    }

    /// Advance by at most one row.
    pub async fn poll(&mut self) -> Result<LateralPoll> {
        while self.current_row < self.chunk.len() {
            // An explicit local max_results overrides the shared limit;
            // otherwise a latched shared limit flushes remaining input
            // unfetched.
            if let Some(limit) = self.options.max_results {
                if limit >= 0 && self.results_returned >= limit {
                    return Ok(LateralPoll::Finished);
                }
            } else if let Some(pipeline) = &self.pipeline {
                if pipeline.is_stopped() {
                    self.current_row = self.chunk.len();
                    return Ok(LateralPoll::NeedMoreInput);
                }
            }

            let url = self.chunk[self.current_row].clone();
            match url {
                None => {
                    let row = Self::null_url_row();
                    self.after_emit();
                    return Ok(LateralPoll::Row(row));
                }
                Some(url) if url.is_empty() => {
                    self.current_row += 1;
                    continue;
                }
                Some(url) => {
                    let row = self.crawl_one(&url).await?;
                    self.after_emit();
                    return Ok(LateralPoll::Row(row));
                }
            }
        }
        Ok(LateralPoll::NeedMoreInput)
    }
}
