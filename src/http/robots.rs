//! robots.txt fetching, parsing, and per-origin caching.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use super::{FetchRequest, HttpPool};

/// Parsed rules for one origin.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    /// (allow, path-prefix) pairs applicable to our user agent.
    rules: Vec<(bool, String)>,
    /// Sitemap URLs declared anywhere in the file.
    pub sitemaps: Vec<String>,
}

impl RobotsRules {
    /// Longest matching prefix wins; ties go to allow. No match allows.
    pub fn is_allowed(&self, path: &str) -> bool {
        let mut best_len = 0usize;
        let mut allowed = true;
        for (allow, prefix) in &self.rules {
            if prefix.is_empty() {
                continue;
            }
            if path.starts_with(prefix.as_str()) {
                let len = prefix.len();
                if len > best_len || (len == best_len && *allow) {
                    best_len = len;
                    allowed = *allow;
                }
            }
        }
        allowed
    }
}

/// Parse robots.txt, keeping the groups that apply to `user_agent`. When a
/// group names our agent specifically, wildcard groups are ignored.
pub fn parse_robots(text: &str, user_agent: &str) -> RobotsRules {
    struct Group {
        agents: Vec<String>,
        rules: Vec<(bool, String)>,
    }

    let mut groups: Vec<Group> = Vec::new();
    let mut sitemaps = Vec::new();
    let mut in_agent_run = false;

    for raw_line in text.lines() {
        let line = raw_line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let (directive, value) = match line.split_once(':') {
            Some((d, v)) => (d.trim().to_lowercase(), v.trim().to_string()),
            None => continue,
        };
        match directive.as_str() {
            "user-agent" => {
                if !in_agent_run || groups.is_empty() {
                    groups.push(Group {
                        agents: Vec::new(),
                        rules: Vec::new(),
                    });
                }
                if let Some(group) = groups.last_mut() {
                    group.agents.push(value.to_lowercase());
                }
                in_agent_run = true;
            }
            "allow" | "disallow" => {
                in_agent_run = false;
                if let Some(group) = groups.last_mut() {
                    group.rules.push((directive == "allow", value));
                }
            }
            "sitemap" => {
                in_agent_run = false;
                if !value.is_empty() {
                    sitemaps.push(value);
                }
            }
            _ => {
                in_agent_run = false;
            }
        }
    }

    let agent_lower = user_agent.to_lowercase();
    let specific: Vec<&Group> = groups
        .iter()
        .filter(|g| {
            g.agents
                .iter()
                .any(|a| a != "*" && !a.is_empty() && agent_lower.contains(a.as_str()))
        })
        .collect();
    let chosen: Vec<&Group> = if !specific.is_empty() {
        specific
    } else {
        groups
            .iter()
            .filter(|g| g.agents.iter().any(|a| a == "*"))
            .collect()
    };

    let mut rules = Vec::new();
    for group in chosen {
        rules.extend(group.rules.iter().cloned());
    }
    RobotsRules { rules, sitemaps }
}

fn origin_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let mut origin = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        origin.push(':');
        origin.push_str(&port.to_string());
    }
    Some(origin)
}

/// Per-origin robots cache. Unreachable or non-200 robots.txt allows all.
#[derive(Default)]
pub struct RobotsCache {
    by_origin: Mutex<HashMap<String, RobotsRules>>,
}

impl RobotsCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn rules_for(&self, pool: &HttpPool, url: &str, user_agent: &str) -> RobotsRules {
        let origin = match origin_of(url) {
            Some(o) => o,
            None => return RobotsRules::default(),
        };
        {
            let cached = self.by_origin.lock().await;
            if let Some(rules) = cached.get(&origin) {
                return rules.clone();
            }
        }

        let robots_url = format!("{origin}/robots.txt");
        let rules = match FetchRequest::new(&robots_url, user_agent) {
            Ok(mut request) => {
                request.timeout = Duration::from_secs(10);
                let response = pool.fetch(&request).await;
                if response.status == 200 {
                    parse_robots(&response.body, user_agent)
                } else {
                    debug!(robots_url = %robots_url, status = response.status, "robots.txt unavailable");
                    RobotsRules::default()
                }
            }
            Err(_) => RobotsRules::default(),
        };

        let mut cached = self.by_origin.lock().await;
        cached.insert(origin, rules.clone());
        rules
    }

    /// True when robots.txt permits fetching `url` for `user_agent`.
    pub async fn is_allowed(&self, pool: &HttpPool, url: &str, user_agent: &str) -> bool {
        let rules = self.rules_for(pool, url, user_agent).await;
        let path = crate::utils::extract_path(url);
        rules.is_allowed(&path)
    }

    /// Sitemap URLs declared by the origin's robots.txt.
    pub async fn sitemaps(&self, pool: &HttpPool, url: &str, user_agent: &str) -> Vec<String> {
        self.rules_for(pool, url, user_agent).await.sitemaps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROBOTS: &str = "\
# comments are ignored
User-agent: *
Disallow: /private/
Allow: /private/public/
Sitemap: https://h/sitemap.xml

User-agent: specialbot
Disallow: /
";

    #[test]
    fn wildcard_group_rules() {
        let rules = parse_robots(ROBOTS, "crawlstream/0.4");
        assert!(rules.is_allowed("/open/page"));
        assert!(!rules.is_allowed("/private/page"));
        // Longest prefix wins.
        assert!(rules.is_allowed("/private/public/page"));
        assert_eq!(rules.sitemaps, vec!["https://h/sitemap.xml"]);
    }

    #[test]
    fn specific_group_overrides_wildcard() {
        let rules = parse_robots(ROBOTS, "SpecialBot/2.0");
        assert!(!rules.is_allowed("/open/page"));
    }

    #[test]
    fn empty_robots_allows_all() {
        let rules = parse_robots("", "ua");
        assert!(rules.is_allowed("/anything"));
    }
}
