//! Crawl operators: the streaming BFS operator, the per-row operator used
//! in correlated joins, and the sitemap scan.

pub mod lateral;
pub mod sitemap;
pub mod stream;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CrawlError, Result};
use crate::extract::HtmlRecord;
use crate::host::Database;
use crate::http::{default_pool, HttpPool};
use crate::pipeline::{default_registry, PipelineRegistry};
use crate::secrets::{NoSecrets, SecretProvider};
use crate::settings::Settings;

/// Host cancellation signal, checked at the top of every operator loop.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Shared dependencies handed to every operator. The pool and registry
/// default to process-scope instances but can be replaced per context.
#[derive(Clone)]
pub struct CrawlContext {
    pub db: Database,
    pub settings: Settings,
    pub pool: Arc<HttpPool>,
    pub registry: Arc<PipelineRegistry>,
    pub secrets: Arc<dyn SecretProvider>,
    pub cancel: CancelFlag,
}

impl CrawlContext {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            settings: Settings::default(),
            pool: default_pool(),
            registry: default_registry(),
            secrets: Arc::new(NoSecrets),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_pool(mut self, pool: Arc<HttpPool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_registry(mut self, registry: Arc<PipelineRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretProvider>) -> Self {
        self.secrets = secrets;
        self
    }
}

/// One emitted crawl row.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CrawlRow {
    pub url: String,
    pub status: i32,
    pub content_type: String,
    pub html: HtmlRecord,
    /// Non-empty iff `status == 0`.
    pub error: String,
    /// Result of declarative extraction specs; empty when none requested.
    pub extract: String,
    pub response_time_ms: i64,
    pub depth: i32,
}

/// URL plus its BFS depth; seeds sit at depth 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub url: String,
    pub depth: i32,
}

/// Seed input for the streaming operator.
#[derive(Debug, Clone)]
pub enum CrawlSource {
    /// Literal URL list.
    Urls(Vec<String>),
    /// Query executed in a child connection; column 0 supplies the URLs.
    Query(String),
}

/// Value of a named option as parsed from the SQL surface.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

impl OptionValue {
    fn as_int(&self, key: &str) -> Result<i64> {
        match self {
            OptionValue::Int(i) => Ok(*i),
            OptionValue::Float(f) => Ok(*f as i64),
            _ => Err(CrawlError::InvalidOption(format!("{key} expects an integer"))),
        }
    }

    fn as_bool(&self, key: &str) -> Result<bool> {
        match self {
            OptionValue::Bool(b) => Ok(*b),
            OptionValue::Int(i) => Ok(*i != 0),
            _ => Err(CrawlError::InvalidOption(format!("{key} expects a boolean"))),
        }
    }

    fn as_text(&self, key: &str) -> Result<String> {
        match self {
            OptionValue::Text(s) => Ok(s.clone()),
            _ => Err(CrawlError::InvalidOption(format!("{key} expects a string"))),
        }
    }

    fn as_list(&self, key: &str) -> Result<Vec<String>> {
        match self {
            OptionValue::List(items) => Ok(items.clone()),
            OptionValue::Text(s) => Ok(vec![s.clone()]),
            _ => Err(CrawlError::InvalidOption(format!("{key} expects a list"))),
        }
    }
}

/// Options accepted by the crawl operators.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub extract: Vec<String>,
    pub state_table: Option<String>,
    pub user_agent: String,
    pub timeout: Duration,
    pub workers: usize,
    pub batch_size: usize,
    /// Minimum delay between requests to the same domain.
    pub delay_ms: u64,
    pub respect_robots: bool,
    /// CSS selector for link following; empty disables it.
    pub follow: Option<String>,
    pub max_depth: i32,
    pub cache: bool,
    pub cache_ttl_hours: i64,
    pub max_results: Option<i64>,
    /// Transport-failure retries, spaced by Fibonacci backoff.
    pub retries: u32,
}

impl CrawlOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            extract: Vec::new(),
            state_table: None,
            user_agent: settings.user_agent.clone(),
            timeout: Duration::from_millis(settings.timeout_ms),
            workers: 4,
            batch_size: 10,
            delay_ms: (settings.default_delay * 1000.0) as u64,
            respect_robots: settings.respect_robots,
            follow: None,
            max_depth: 1,
            cache: true,
            cache_ttl_hours: 24,
            max_results: None,
            retries: 0,
        }
    }

    /// Apply one `key := value` named argument from the SQL surface.
    pub fn apply_named(&mut self, key: &str, value: &OptionValue) -> Result<()> {
        match key {
            "extract" => self.extract = value.as_list(key)?,
            "state_table" => self.state_table = Some(value.as_text(key)?),
            "user_agent" => self.user_agent = value.as_text(key)?,
            "timeout" => self.timeout = Duration::from_secs(value.as_int(key)?.max(1) as u64),
            "workers" => self.workers = value.as_int(key)?.max(1) as usize,
            "batch_size" => self.batch_size = value.as_int(key)?.max(1) as usize,
            "delay" => self.delay_ms = value.as_int(key)?.max(0) as u64,
            "respect_robots" => self.respect_robots = value.as_bool(key)?,
            "follow" => self.follow = Some(value.as_text(key)?),
            "max_depth" => self.max_depth = value.as_int(key)?.max(1) as i32,
            "cache" => self.cache = value.as_bool(key)?,
            "cache_ttl" => self.cache_ttl_hours = value.as_int(key)?.max(0),
            "max_results" => self.max_results = Some(value.as_int(key)?),
            "retries" => self.retries = value.as_int(key)?.max(0) as u32,
            other => {
                return Err(CrawlError::InvalidOption(format!(
                    "unknown crawl option: {other}"
                )))
            }
        }
        Ok(())
    }
}
