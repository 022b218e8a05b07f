//! OpenGraph, Twitter card, and plain meta-tag extraction.

use serde_json::Value;

fn meta_pairs(document: &scraper::Html, attr: &str) -> Vec<(String, String)> {
    let selector = scraper::Selector::parse("meta").expect("static selector");
    document
        .select(&selector)
        .filter_map(|el| {
            let key = el.value().attr(attr)?.trim().to_string();
            let content = el.value().attr("content")?.trim().to_string();
            if key.is_empty() || content.is_empty() {
                None
            } else {
                Some((key, content))
            }
        })
        .collect()
}

/// Extract `og:*` properties (prefix stripped) with any `twitter:*` meta
/// nested under a `twitter` key. HTML entities in `content` are decoded by
/// the HTML parser. Returns an empty object when nothing was found.
pub fn extract_opengraph(html: &str) -> Value {
    let mut out = serde_json::Map::new();
    if html.is_empty() {
        return Value::Object(out);
    }
    let document = scraper::Html::parse_document(html);

    for (prop, content) in meta_pairs(&document, "property") {
        if let Some(key) = prop.strip_prefix("og:") {
            if !key.is_empty() && !out.contains_key(key) {
                out.insert(key.to_string(), Value::String(content));
            }
        }
    }

    let mut twitter = serde_json::Map::new();
    for (name, content) in meta_pairs(&document, "name") {
        if let Some(key) = name.strip_prefix("twitter:") {
            if !key.is_empty() && !twitter.contains_key(key) {
                twitter.insert(key.to_string(), Value::String(content));
            }
        }
    }
    if !twitter.is_empty() {
        out.insert("twitter".to_string(), Value::Object(twitter));
    }

    Value::Object(out)
}

/// Extract `description`, `keywords`, `author`, `robots` meta tags and the
/// canonical link.
pub fn extract_meta_tags(html: &str) -> Value {
    let mut out = serde_json::Map::new();
    if html.is_empty() {
        return Value::Object(out);
    }
    let document = scraper::Html::parse_document(html);

    for (name, content) in meta_pairs(&document, "name") {
        let key = name.to_lowercase();
        if matches!(key.as_str(), "description" | "keywords" | "author" | "robots")
            && !out.contains_key(&key)
        {
            out.insert(key, Value::String(content));
        }
    }

    if let Some(canonical) = canonical_href(&document) {
        out.insert("canonical".to_string(), Value::String(canonical));
    }

    Value::Object(out)
}

pub(crate) fn canonical_href(document: &scraper::Html) -> Option<String> {
    let selector = scraper::Selector::parse("link").expect("static selector");
    document.select(&selector).find_map(|el| {
        let rel = el.value().attr("rel")?;
        if !rel.trim().eq_ignore_ascii_case("canonical") {
            return None;
        }
        let href = el.value().attr("href")?.trim();
        if href.is_empty() {
            None
        } else {
            Some(href.to_string())
        }
    })
}
