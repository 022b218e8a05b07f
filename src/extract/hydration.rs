//! Framework hydration-state extraction.
//!
//! Recognizes the well-known client-state globals either as JSON script
//! tags (`<script id="__NEXT_DATA__" type="application/json">`) or as
//! JavaScript assignments (`window.__INITIAL_STATE__ = {...}`). The first
//! occurrence wins per pattern.

use serde_json::Value;

use super::jsvars::extract_balanced_json;

/// Hydration globals recognized in script tags and assignments.
pub const HYDRATION_PATTERNS: &[&str] = &[
    "__NEXT_DATA__",
    "__NUXT__",
    "__INITIAL_STATE__",
    "__PRELOADED_STATE__",
    "__DATA__",
    "__APOLLO_STATE__",
    "__RELAY_STORE__",
    "__REDUX_STATE__",
];

fn scan_assignments(content: &str, out: &mut serde_json::Map<String, Value>) {
    for pattern in HYDRATION_PATTERNS {
        if out.contains_key(*pattern) {
            continue;
        }
        let prefixes = [
            format!("window.{} = ", pattern),
            format!("window.{}=", pattern),
            format!("{} = ", pattern),
            format!("{}=", pattern),
        ];
        for prefix in &prefixes {
            if let Some(pos) = content.find(prefix.as_str()) {
                let value_start = pos + prefix.len();
                if let Some(json) = extract_balanced_json(content, value_start) {
                    if let Ok(value) = serde_json::from_str::<Value>(&json) {
                        out.insert((*pattern).to_string(), value);
                        break;
                    }
                }
            }
        }
    }
}

/// Extract hydration blobs from an HTML document as a JSON object keyed by
/// pattern name; empty when none were found.
pub fn extract_hydration(html: &str) -> Value {
    let mut out = serde_json::Map::new();
    if html.is_empty() {
        return Value::Object(out);
    }

    let document = scraper::Html::parse_document(html);
    let selector = scraper::Selector::parse("script").expect("static selector");

    for element in document.select(&selector) {
        let el = element.value();

        // Next.js style: the pattern is the script element id.
        if let Some(id) = el.attr("id") {
            if HYDRATION_PATTERNS.contains(&id) && !out.contains_key(id) {
                let content: String = element.text().collect();
                let trimmed = content.trim();
                if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                    out.insert(id.to_string(), value);
                    continue;
                }
            }
        }

        // Plain JavaScript assignments.
        let is_js = match el.attr("type") {
            None => true,
            Some(t) => {
                let t = t.trim();
                t.is_empty() || t.eq_ignore_ascii_case("text/javascript")
            }
        };
        if is_js {
            let content: String = element.text().collect();
            scan_assignments(&content, &mut out);
        }
    }

    Value::Object(out)
}
