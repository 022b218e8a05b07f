//! crawlstream - SQL-embedded web crawling and structured-data extraction.
//!
//! Table-valued crawl operators stream fetched pages back into an embedded
//! SQL host: a depth-limited BFS crawler with response caching and
//! resumable state, a per-row operator for correlated joins with a shared
//! pipeline limit, structured-data extraction (JSON-LD, microdata,
//! OpenGraph, hydration state, top-level JS variables, readability), and a
//! `CRAWLING MERGE` upsert planner/executor with condition pushdown.

pub mod crawl;
pub mod db;
pub mod error;
pub mod extract;
pub mod host;
pub mod http;
pub mod merge;
pub mod pipeline;
pub mod secrets;
pub mod settings;
pub mod utils;

pub use crawl::lateral::{LateralCrawl, LateralPoll};
pub use crawl::sitemap::{SitemapEntry, SitemapOptions, SitemapScan};
pub use crawl::stream::StreamCrawl;
pub use crawl::{CancelFlag, CrawlContext, CrawlOptions, CrawlRow, CrawlSource};
pub use error::{CrawlError, FailureKind, Result};
pub use host::Database;
pub use merge::executor::{MergeCounters, MergeExecutor};
pub use merge::execute_crawling_merge;
pub use merge::parser::{is_crawling_merge, parse_crawling_merge};
pub use settings::Settings;
