//! URL, content, and timing utilities shared across the crawler.

pub mod gzip;
pub mod scan;
pub mod sql;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};

/// Extract the hostname from a URL, lowercased with any port stripped.
/// Returns an empty string for malformed URLs.
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_default()
}

/// Extract path + query from a URL, or `/` when absent or malformed.
pub fn extract_path(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(u) => {
            let mut path = u.path().to_string();
            if path.is_empty() {
                path.push('/');
            }
            if let Some(q) = u.query() {
                path.push('?');
                path.push_str(q);
            }
            path
        }
        Err(_) => "/".to_string(),
    }
}

/// Sort-friendly URI Reordering Transform key.
///
/// The hostname is lowercased, stripped of `www.` and any port, reversed by
/// label with comma separators, then joined to the path with `)`:
/// `https://www.a.example.com/x` -> `com,example,a)/x`.
/// Unparsable input is returned unchanged.
pub fn generate_surt(url: &str) -> String {
    let parsed = match url::Url::parse(url) {
        Ok(u) => u,
        Err(_) => return url.to_string(),
    };
    let host = match parsed.host_str() {
        Some(h) => h,
        None => return url.to_string(),
    };

    let mut surt = generate_domain_surt(host);
    let mut path = parsed.path().to_string();
    if path.is_empty() {
        path.push('/');
    }
    surt.push_str(&path);
    if let Some(q) = parsed.query() {
        surt.push('?');
        surt.push_str(q);
    }
    surt
}

/// SURT form of a bare hostname: `www.A.Example.com` -> `com,example,a)`.
pub fn generate_domain_surt(hostname: &str) -> String {
    if hostname.is_empty() {
        return String::new();
    }
    let mut domain = hostname.to_lowercase();
    if let Some(colon) = domain.find(':') {
        domain.truncate(colon);
    }
    if let Some(stripped) = domain.strip_prefix("www.") {
        domain = stripped.to_string();
    }

    let mut surt: String = domain.rsplit('.').collect::<Vec<_>>().join(",");
    surt.push(')');
    surt
}

/// 64-bit content hash rendered as 16 lowercase hex chars. Empty input
/// hashes to the empty string.
pub fn content_hash(content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Case-insensitive content-type match. The pattern may end in `/*` to
/// prefix-match a major type (`text/*`). Parameters after `;` are ignored.
pub fn content_type_matches(content_type: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    let ct = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    let pat = pattern.trim().to_lowercase();

    if let Some(major) = pat.strip_suffix("/*") {
        return ct.starts_with(&format!("{}/", major));
    }
    ct == pat
}

/// Apply comma-separated accept and reject lists: when the accept list is
/// non-empty the content type must match one entry, and it must match no
/// reject entry.
pub fn is_acceptable(content_type: &str, accept_types: &str, reject_types: &str) -> bool {
    if accept_types.is_empty() && reject_types.is_empty() {
        return true;
    }
    if !accept_types.is_empty() {
        let accepted = accept_types
            .split(',')
            .any(|pat| content_type_matches(content_type, pat.trim()));
        if !accepted {
            return false;
        }
    }
    if !reject_types.is_empty() {
        let rejected = reject_types
            .split(',')
            .any(|pat| content_type_matches(content_type, pat.trim()));
        if rejected {
            return false;
        }
    }
    true
}

/// Parse an HTTP `Date` header into an ISO timestamp, but only accept it
/// when within 15 minutes of the local clock. Skewed or unparsable dates
/// yield an empty string.
pub fn parse_http_date(server_date: &str) -> String {
    parse_http_date_at(server_date, Utc::now())
}

fn parse_http_date_at(server_date: &str, now: DateTime<Utc>) -> String {
    if server_date.is_empty() {
        return String::new();
    }
    let parsed = match DateTime::parse_from_rfc2822(server_date) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(_) => return String::new(),
    };
    let skew = (parsed - now).num_seconds().abs();
    if skew > 15 * 60 {
        return String::new();
    }
    parsed.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Fibonacci backoff in seconds, starting 3, 3, 6, 9, 15, …, clamped to
/// `max_seconds`.
pub fn fib_backoff(n: u32, max_seconds: u64) -> u64 {
    if n <= 1 {
        return 3.min(max_seconds);
    }
    let (mut a, mut b) = (3u64, 3u64);
    for _ in 2..=n {
        let next = a + b;
        a = b;
        b = next;
        if b > max_seconds {
            return max_seconds;
        }
    }
    b.min(max_seconds)
}
