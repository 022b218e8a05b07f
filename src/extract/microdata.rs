//! HTML microdata extraction.
//!
//! Elements carrying `itemtype` become objects keyed by the final path
//! segment of the type URL; descendant `itemprop` elements supply the
//! properties, valued from `content`, `datetime`, `href`, or `src`
//! attributes as appropriate, falling back to text content.

use serde_json::Value;

use super::jsonld::group_by_type;

fn itemprop_value(element: scraper::ElementRef<'_>) -> Option<String> {
    let el = element.value();
    for attr in ["content", "datetime", "href", "src"] {
        if let Some(v) = el.attr(attr) {
            let v = v.trim();
            if !v.is_empty() {
                return Some(v.to_string());
            }
        }
    }
    let text: String = element.text().collect::<String>().trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Short type tag from an `itemtype` URL: the final path segment,
/// e.g. `https://schema.org/Product` -> `Product`.
fn type_tag(itemtype: &str) -> Option<String> {
    let tag = itemtype
        .trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()?
        .trim();
    if tag.is_empty() {
        None
    } else {
        Some(tag.to_string())
    }
}

/// Extract microdata items grouped by type tag, in the same shape as the
/// JSON-LD extractor so the two merge cleanly.
pub fn extract_microdata(html: &str) -> Value {
    let mut grouped: Vec<(String, Value)> = Vec::new();
    if html.is_empty() {
        return Value::Object(serde_json::Map::new());
    }

    let document = scraper::Html::parse_document(html);
    let scope_selector = scraper::Selector::parse("[itemtype]").expect("static selector");
    let prop_selector = scraper::Selector::parse("[itemprop]").expect("static selector");

    for scope in document.select(&scope_selector) {
        let tag = match scope.value().attr("itemtype").and_then(type_tag) {
            Some(t) => t,
            None => continue,
        };

        let mut object = serde_json::Map::new();
        for prop in scope.select(&prop_selector) {
            let name = match prop.value().attr("itemprop") {
                Some(n) if !n.trim().is_empty() => n.trim().to_string(),
                _ => continue,
            };
            if object.contains_key(&name) {
                continue;
            }
            if let Some(value) = itemprop_value(prop) {
                object.insert(name, Value::String(value));
            }
        }

        if !object.is_empty() {
            grouped.push((tag, Value::Object(object)));
        }
    }

    group_by_type(grouped)
}
