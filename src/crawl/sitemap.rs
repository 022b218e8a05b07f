//! Sitemap table operator.
//!
//! Fetches an XML sitemap, recursing through `<sitemapindex>` files with a
//! work queue, optionally discovering sitemap locations from robots.txt,
//! and emits `(url, lastmod, changefreq, priority)` rows.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, warn};

use super::CrawlContext;
use crate::error::Result;
use crate::http::robots::RobotsCache;
use crate::http::FetchRequest;

/// Hard cap on sitemaps visited in one scan.
const MAX_SITEMAPS: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct SitemapEntry {
    pub url: String,
    pub lastmod: Option<String>,
    pub changefreq: Option<String>,
    pub priority: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SitemapOptions {
    pub recursive: bool,
    pub max_depth: usize,
    /// Check robots.txt for `Sitemap:` directives first.
    pub discover: bool,
    pub user_agent: String,
    pub timeout: Duration,
    /// Substring filter on result URLs.
    pub filter: Option<String>,
}

impl SitemapOptions {
    pub fn from_settings(settings: &crate::settings::Settings) -> Self {
        Self {
            recursive: true,
            max_depth: 5,
            discover: false,
            user_agent: settings.user_agent.clone(),
            timeout: Duration::from_millis(settings.timeout_ms),
            filter: None,
        }
    }
}

/// Unescape the five XML entities used by sitemap generators.
fn unescape_xml(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}

/// Text content of the first `<tag>…</tag>` in `block`.
fn tag_text(block: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = block.find(&open)? + open.len();
    let end = block[start..].find(&close)? + start;
    let text = unescape_xml(block[start..end].trim());
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// All `<loc>` values in a document, used for `<sitemapindex>` traversal.
pub(crate) fn extract_locs(xml: &str) -> Vec<String> {
    let mut locs = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<loc>") {
        let after = &rest[start + 5..];
        match after.find("</loc>") {
            Some(end) => {
                let loc = unescape_xml(after[..end].trim());
                if !loc.is_empty() {
                    locs.push(loc);
                }
                rest = &after[end + 6..];
            }
            None => break,
        }
    }
    locs
}

/// Parse `<url>` blocks from a urlset document.
pub(crate) fn parse_sitemap_entries(xml: &str) -> Vec<SitemapEntry> {
    let mut entries = Vec::new();
    let mut rest = xml;
    loop {
        let start = match rest.find("<url>").or_else(|| rest.find("<url ")) {
            Some(s) => s,
            None => break,
        };
        let after = &rest[start..];
        let end = match after.find("</url>") {
            Some(e) => e,
            None => break,
        };
        let block = &after[..end];

        if let Some(url) = tag_text(block, "loc") {
            entries.push(SitemapEntry {
                url,
                lastmod: tag_text(block, "lastmod"),
                changefreq: tag_text(block, "changefreq"),
                priority: tag_text(block, "priority").and_then(|p| p.parse().ok()),
            });
        }
        rest = &after[end + 6..];
    }
    entries
}

pub struct SitemapScan {
    ctx: CrawlContext,
    options: SitemapOptions,
}

impl SitemapScan {
    pub fn new(ctx: CrawlContext, options: SitemapOptions) -> Self {
        Self { ctx, options }
    }

    async fn fetch_text(&self, url: &str) -> Option<String> {
        let mut request = FetchRequest::new(url, self.options.user_agent.clone()).ok()?;
        request.timeout = self.options.timeout;
        let response = self.ctx.pool.fetch(&request).await;
        if response.success() && !response.body.is_empty() {
            Some(response.body)
        } else {
            debug!(url = %url, status = response.status, "sitemap fetch failed");
            None
        }
    }

    /// Walk the sitemap graph starting at `url` and collect entries.
    pub async fn run(&self, url: &str) -> Result<Vec<SitemapEntry>> {
        let mut start_urls = vec![url.to_string()];
        if self.options.discover {
            let robots = RobotsCache::new();
            let discovered = robots
                .sitemaps(&self.ctx.pool, url, &self.options.user_agent)
                .await;
            if !discovered.is_empty() {
                debug!(count = discovered.len(), "sitemaps discovered from robots.txt");
                start_urls = discovered;
            }
        }

        let mut entries = Vec::new();
        let mut seen_urls = HashSet::new();
        let mut processed = HashSet::new();
        let mut pending: Vec<(String, usize)> =
            start_urls.into_iter().map(|u| (u, 0)).collect();

        while let Some((sitemap_url, depth)) = pending.pop() {
            if processed.len() >= MAX_SITEMAPS || !processed.insert(sitemap_url.clone()) {
                continue;
            }
            if self.ctx.cancel.is_cancelled() {
                break;
            }

            let text = match self.fetch_text(&sitemap_url).await {
                Some(t) => t,
                None => continue,
            };

            if text.contains("<sitemapindex") {
                if !self.options.recursive || depth + 1 > self.options.max_depth {
                    warn!(sitemap_url = %sitemap_url, "sitemap index beyond recursion limit");
                    continue;
                }
                for loc in extract_locs(&text) {
                    if !processed.contains(&loc) {
                        pending.push((loc, depth + 1));
                    }
                }
            } else {
                for entry in parse_sitemap_entries(&text) {
                    let keep = self
                        .options
                        .filter
                        .as_ref()
                        .map(|f| entry.url.contains(f.as_str()))
                        .unwrap_or(true);
                    if keep && seen_urls.insert(entry.url.clone()) {
                        entries.push(entry);
                    }
                }
            }
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URLSET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url>
    <loc>https://h/page?a=1&amp;b=2</loc>
    <lastmod>2025-01-15</lastmod>
    <changefreq>daily</changefreq>
    <priority>0.8</priority>
  </url>
  <url>
    <loc>https://h/minimal</loc>
  </url>
</urlset>"#;

    #[test]
    fn parses_url_blocks() {
        let entries = parse_sitemap_entries(URLSET);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].url, "https://h/page?a=1&b=2");
        assert_eq!(entries[0].lastmod.as_deref(), Some("2025-01-15"));
        assert_eq!(entries[0].changefreq.as_deref(), Some("daily"));
        assert_eq!(entries[0].priority, Some(0.8));
        assert_eq!(entries[1].url, "https://h/minimal");
        assert!(entries[1].lastmod.is_none());
        assert!(entries[1].priority.is_none());
    }

    #[test]
    fn extracts_index_locs() {
        let xml = r#"<sitemapindex>
            <sitemap><loc>https://h/a.xml</loc></sitemap>
            <sitemap><loc>https://h/b.xml</loc></sitemap>
        </sitemapindex>"#;
        assert_eq!(
            extract_locs(xml),
            vec!["https://h/a.xml", "https://h/b.xml"]
        );
    }

    #[test]
    fn empty_and_malformed() {
        assert!(parse_sitemap_entries("").is_empty());
        assert!(parse_sitemap_entries("<urlset><url><loc>x").is_empty());
        assert!(extract_locs("<loc>unterminated").is_empty());
    }
}
