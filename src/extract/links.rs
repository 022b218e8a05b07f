//! Link extraction for crawl feedback.
//!
//! Collects hrefs from elements matching a CSS selector, skips
//! non-navigational schemes and pure fragments, resolves everything
//! against the page URL, and deduplicates with fragments stripped.

use std::collections::HashSet;

use url::Url;

/// A link discovered on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLink {
    pub url: String,
    pub nofollow: bool,
}

fn skip_href(href: &str) -> bool {
    let lower = href.to_lowercase();
    href.starts_with('#')
        || lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("data:")
}

/// Resolve an href against a base URL, collapsing `.`/`..` segments and
/// handling protocol-relative and absolute-path forms. Returns `None` when
/// either side is unusable.
pub fn resolve_url(base_url: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let base = Url::parse(base_url).ok()?;
    let mut resolved = base.join(href).ok()?;
    resolved.set_fragment(None);
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }
    Some(resolved.to_string())
}

fn has_nofollow_token(rel: &str) -> bool {
    rel.split_whitespace()
        .any(|token| token.eq_ignore_ascii_case("nofollow"))
}

/// Extract deduplicated links from elements matching `selector` (commonly
/// just `a`), resolved against `base_url`.
pub fn extract_links(html: &str, selector: &str, base_url: &str) -> Vec<ExtractedLink> {
    let mut links = Vec::new();
    if html.is_empty() {
        return links;
    }
    let parsed_selector = match scraper::Selector::parse(selector) {
        Ok(s) => s,
        Err(_) => {
            tracing::warn!(selector, "invalid follow selector");
            return links;
        }
    };

    let document = scraper::Html::parse_document(html);
    let mut seen: HashSet<String> = HashSet::new();

    for element in document.select(&parsed_selector) {
        let href = match element.value().attr("href") {
            Some(h) => h.trim(),
            None => continue,
        };
        if href.is_empty() || skip_href(href) {
            continue;
        }
        let absolute = match resolve_url(base_url, href) {
            Some(u) => u,
            None => continue,
        };
        if !seen.insert(absolute.clone()) {
            continue;
        }
        let nofollow = element
            .value()
            .attr("rel")
            .map(has_nofollow_token)
            .unwrap_or(false);
        links.push(ExtractedLink {
            url: absolute,
            nofollow,
        });
    }

    links
}

/// Canonical link of the page, resolved against the page URL.
pub fn extract_canonical(html: &str, base_url: &str) -> Option<String> {
    let document = scraper::Html::parse_document(html);
    let href = super::opengraph::canonical_href(&document)?;
    resolve_url(base_url, &href)
}

/// Presence of `nofollow` / `noindex` tokens in a robots meta tag.
pub fn robots_meta(html: &str) -> (bool, bool) {
    let document = scraper::Html::parse_document(html);
    let selector = scraper::Selector::parse("meta").expect("static selector");
    for el in document.select(&selector) {
        let name = el.value().attr("name").unwrap_or("");
        if !name.trim().eq_ignore_ascii_case("robots") {
            continue;
        }
        let content = el.value().attr("content").unwrap_or("").to_lowercase();
        let noindex = content.contains("noindex");
        let nofollow = content.contains("nofollow");
        return (noindex, nofollow);
    }
    (false, false)
}
