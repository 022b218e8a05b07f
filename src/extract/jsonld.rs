//! JSON-LD extraction.
//!
//! Collects every `<script type="application/ld+json">` block, parses it
//! leniently (trailing commas and comments tolerated), unwraps arrays and
//! `@graph` containers, and groups objects by `@type`.

use serde_json::Value;

use super::jsvars::strip_comments;

/// Parse JSON leniently: comments are stripped and trailing commas before
/// closing brackets removed before handing off to the strict parser.
pub(crate) fn parse_lenient_json(content: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(content) {
        return Some(value);
    }
    let sanitized = remove_trailing_commas(&strip_comments(content));
    serde_json::from_str(&sanitized).ok()
}

fn remove_trailing_commas(content: &str) -> String {
    let bytes = content.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut in_string = false;
    let mut escape_next = false;
    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i];
        if escape_next {
            escape_next = false;
        } else if c == b'\\' && in_string {
            escape_next = true;
        } else if c == b'"' {
            in_string = !in_string;
        } else if !in_string && c == b',' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if j < bytes.len() && (bytes[j] == b'}' || bytes[j] == b']') {
                i += 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_default()
}

/// Read `@type` from an object: either a string or the first element of an
/// array of strings.
fn object_type(obj: &Value) -> Option<String> {
    match obj.get("@type")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(arr) => arr.first().and_then(|v| v.as_str()).map(String::from),
        _ => None,
    }
}

fn collect_object(obj: &Value, by_type: &mut Vec<(String, Value)>) {
    if !obj.is_object() {
        return;
    }
    if let Some(ty) = object_type(obj) {
        by_type.push((ty, obj.clone()));
    }
}

fn collect_document(root: &Value, by_type: &mut Vec<(String, Value)>) {
    match root {
        Value::Array(items) => {
            for item in items {
                if let Some(graph) = item.get("@graph").and_then(|g| g.as_array()) {
                    for node in graph {
                        collect_object(node, by_type);
                    }
                } else {
                    collect_object(item, by_type);
                }
            }
        }
        Value::Object(_) => {
            if let Some(graph) = root.get("@graph").and_then(|g| g.as_array()) {
                for node in graph {
                    collect_object(node, by_type);
                }
            } else {
                collect_object(root, by_type);
            }
        }
        _ => {}
    }
}

/// Extract all JSON-LD objects from a document, grouped by `@type`.
/// Types with a single object map to that object; types with several map
/// to an array. Invalid blocks are skipped.
pub fn extract_jsonld(html: &str) -> Value {
    let mut grouped: Vec<(String, Value)> = Vec::new();
    if html.is_empty() {
        return Value::Object(serde_json::Map::new());
    }

    let document = scraper::Html::parse_document(html);
    let selector = scraper::Selector::parse("script").expect("static selector");
    for element in document.select(&selector) {
        let is_jsonld = element
            .value()
            .attr("type")
            .map(|t| t.trim().eq_ignore_ascii_case("application/ld+json"))
            .unwrap_or(false);
        if !is_jsonld {
            continue;
        }
        let content: String = element.text().collect();
        let content = content.trim();
        if content.is_empty() {
            continue;
        }
        match parse_lenient_json(content) {
            Some(root) => collect_document(&root, &mut grouped),
            None => tracing::debug!("skipping invalid JSON-LD block"),
        }
    }

    group_by_type(grouped)
}

/// Fold `(type, object)` pairs into the output object, using a bare object
/// for singletons and an array otherwise.
pub(crate) fn group_by_type(entries: Vec<(String, Value)>) -> Value {
    let mut out = serde_json::Map::new();
    for (ty, obj) in entries {
        match out.entry(ty) {
            serde_json::map::Entry::Vacant(slot) => {
                slot.insert(obj);
            }
            serde_json::map::Entry::Occupied(mut slot) => match slot.get_mut() {
                Value::Array(arr) => arr.push(obj),
                existing => {
                    let prior = existing.take();
                    *existing = Value::Array(vec![prior, obj]);
                }
            },
        }
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn groups_by_type() {
        let html = r#"<html><head>
            <script type="application/ld+json">
                {"@type": "Product", "name": "Widget"}
            </script>
            <script type="APPLICATION/LD+JSON">
                {"@type": "Organization", "name": "Acme"}
            </script>
        </head></html>"#;
        let schema = extract_jsonld(html);
        assert_eq!(schema["Product"]["name"], "Widget");
        assert_eq!(schema["Organization"]["name"], "Acme");
    }

    #[test]
    fn graph_objects_are_flattened() {
        let html = r#"<script type="application/ld+json">{
            "@context": "https://schema.org",
            "@graph": [
                {"@type": "Article", "headline": "One"},
                {"@type": "Article", "headline": "Two"},
                {"@type": "Person", "name": "Ada"}
            ]
        }</script>"#;
        let schema = extract_jsonld(html);
        let articles = schema["Article"].as_array().unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0]["headline"], "One");
        assert_eq!(schema["Person"]["name"], "Ada");
    }

    #[test]
    fn graph_round_trip_preserves_types() {
        let html = r#"<script type="application/ld+json">{
            "@graph": [
                {"@type": "A", "n": 1},
                {"@type": "B", "n": 2},
                {"@type": "B", "n": 3}
            ]
        }</script>"#;
        let schema = extract_jsonld(html);
        let text = serde_json::to_string(&schema).unwrap();
        let reparsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(reparsed, schema);
        assert_eq!(reparsed["A"], json!({"@type": "A", "n": 1}));
        assert_eq!(reparsed["B"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn array_root_and_type_array() {
        let html = r#"<script type="application/ld+json">[
            {"@type": ["Product", "Thing"], "name": "Gadget"}
        ]</script>"#;
        let schema = extract_jsonld(html);
        assert_eq!(schema["Product"]["name"], "Gadget");
        assert!(schema.get("Thing").is_none());
    }

    #[test]
    fn lenient_parsing_tolerates_trailing_commas_and_comments() {
        let html = r#"<script type="application/ld+json">{
            // generated
            "@type": "Event",
            "name": "Launch",
        }</script>"#;
        let schema = extract_jsonld(html);
        assert_eq!(schema["Event"]["name"], "Launch");
    }

    #[test]
    fn invalid_blocks_are_skipped() {
        let html = r#"<html>
            <script type="application/ld+json">{not json at all</script>
            <script type="application/ld+json">{"@type": "T", "ok": true}</script>
        </html>"#;
        let schema = extract_jsonld(html);
        assert_eq!(schema["T"]["ok"], true);
        assert_eq!(schema.as_object().unwrap().len(), 1);
    }

    #[test]
    fn no_jsonld_yields_empty_object() {
        assert_eq!(extract_jsonld("<p>plain</p>"), json!({}));
        assert_eq!(extract_jsonld(""), json!({}));
    }
}
