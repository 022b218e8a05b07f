//! Process-wide crawler settings.
//!
//! These are the host-level defaults that individual operator options
//! override: user agent, politeness delay, timeout, robots behavior, and
//! the outbound proxy.

const DEFAULT_USER_AGENT: &str = concat!("crawlstream/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct Settings {
    /// User agent for crawler HTTP requests.
    pub user_agent: String,
    /// Default crawl delay in seconds if not overridden per call.
    pub default_delay: f64,
    /// Total request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Check robots.txt before fetching.
    pub respect_robots: bool,
    /// Outbound HTTP proxy endpoint, e.g. `http://proxy:3128`.
    pub http_proxy: Option<String>,
    pub http_proxy_username: Option<String>,
    pub http_proxy_password: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_delay: 0.0,
            timeout_ms: 30_000,
            respect_robots: false,
            http_proxy: None,
            http_proxy_username: None,
            http_proxy_password: None,
        }
    }
}

impl Settings {
    /// Build settings from `CRAWLER_*` / `HTTP_PROXY*` environment
    /// variables, falling back to defaults for anything unset or
    /// unparsable.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(ua) = std::env::var("CRAWLER_USER_AGENT") {
            if !ua.is_empty() {
                settings.user_agent = ua;
            }
        }
        if let Some(delay) = env_parse::<f64>("CRAWLER_DEFAULT_DELAY") {
            settings.default_delay = delay;
        }
        if let Some(timeout) = env_parse::<u64>("CRAWLER_TIMEOUT_MS") {
            settings.timeout_ms = timeout;
        }
        if let Some(respect) = env_parse::<bool>("CRAWLER_RESPECT_ROBOTS") {
            settings.respect_robots = respect;
        }
        settings.http_proxy = std::env::var("HTTP_PROXY").ok().filter(|v| !v.is_empty());
        settings.http_proxy_username = std::env::var("HTTP_PROXY_USERNAME").ok();
        settings.http_proxy_password = std::env::var("HTTP_PROXY_PASSWORD").ok();
        settings
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}
