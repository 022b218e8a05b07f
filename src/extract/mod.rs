//! Structured-data extraction: the pipeline that turns an HTML body into
//! the `html` record exposed to SQL.

pub mod hydration;
pub mod jsonld;
pub mod jsvars;
pub mod links;
pub mod microdata;
pub mod opengraph;
pub mod readability;
pub mod spec;

use serde_json::Value;

/// Structured record derived from one fetched page.
///
/// `document` always carries the body verbatim. The JSON fields are `None`
/// when the page is not HTML or the extractor found nothing.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct HtmlRecord {
    pub document: String,
    pub js: Option<Value>,
    pub opengraph: Option<Value>,
    pub schema: Option<Value>,
    pub readability: Option<Value>,
}

impl HtmlRecord {
    /// Serialize for the SQL surface: a JSON object with `document`, `js`,
    /// `opengraph`, `schema`, and `readability` fields, absent extractions
    /// as null.
    pub fn to_json(&self) -> Value {
        let mut out = serde_json::Map::new();
        out.insert("document".into(), Value::String(self.document.clone()));
        out.insert("js".into(), self.js.clone().unwrap_or(Value::Null));
        out.insert(
            "opengraph".into(),
            self.opengraph.clone().unwrap_or(Value::Null),
        );
        out.insert("schema".into(), self.schema.clone().unwrap_or(Value::Null));
        out.insert(
            "readability".into(),
            self.readability.clone().unwrap_or(Value::Null),
        );
        Value::Object(out)
    }
}

/// HTML-like content types get the full extraction pass.
pub fn is_html_content_type(content_type: &str) -> bool {
    let ct = content_type.to_lowercase();
    ct.contains("text/html") || ct.contains("application/xhtml")
}

fn non_empty(value: Value) -> Option<Value> {
    match &value {
        Value::Object(map) if map.is_empty() => None,
        _ => Some(value),
    }
}

/// Merge JSON-LD and microdata maps, both keyed by type. JSON-LD entries
/// win key collisions by absorbing the microdata items into an array.
pub fn combine_schema(jsonld: Value, microdata: Value) -> Value {
    let mut combined = match jsonld {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    if let Value::Object(md) = microdata {
        for (key, value) in md {
            match combined.entry(key) {
                serde_json::map::Entry::Vacant(slot) => {
                    slot.insert(value);
                }
                serde_json::map::Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    let mut items = match existing.take() {
                        Value::Array(arr) => arr,
                        single => vec![single],
                    };
                    match value {
                        Value::Array(arr) => items.extend(arr),
                        single => items.push(single),
                    }
                    *existing = Value::Array(items);
                }
            }
        }
    }
    Value::Object(combined)
}

/// Build the structured record for a response body. Non-HTML content keeps
/// the body as `document` with every other field absent.
pub fn build_record(body: &str, content_type: &str, url: &str) -> HtmlRecord {
    if body.is_empty() || !is_html_content_type(content_type) {
        return HtmlRecord {
            document: body.to_string(),
            ..Default::default()
        };
    }

    let jsonld = jsonld::extract_jsonld(body);
    let micro = microdata::extract_microdata(body);

    // Hydration blobs in JSON script tags are invisible to the assignment
    // scanner; fold them into the js object without clobbering scanned
    // variables.
    let mut js = jsvars::extract_js_variables(body);
    if let (Value::Object(vars), Value::Object(blobs)) = (&mut js, hydration::extract_hydration(body))
    {
        for (key, value) in blobs {
            vars.entry(key).or_insert(value);
        }
    }

    HtmlRecord {
        document: body.to_string(),
        js: non_empty(js),
        opengraph: non_empty(opengraph::extract_opengraph(body)),
        schema: non_empty(combine_schema(jsonld, micro)),
        readability: non_empty(readability::extract_readability(body, url)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_always_equals_body() {
        let record = build_record("plain text", "text/plain", "https://h/");
        assert_eq!(record.document, "plain text");
        assert!(record.js.is_none());
        assert!(record.opengraph.is_none());
        assert!(record.schema.is_none());
        assert!(record.readability.is_none());
    }

    #[test]
    fn plain_html_yields_empty_fields() {
        let record = build_record("<html><body><b>x</b></body></html>", "text/html", "");
        assert_eq!(record.document, "<html><body><b>x</b></body></html>");
        assert!(record.js.is_none());
        assert!(record.opengraph.is_none());
        assert!(record.schema.is_none());
    }

    #[test]
    fn combines_jsonld_and_microdata() {
        let jsonld = json!({"Product": {"name": "A"}});
        let micro = json!({"Product": {"name": "B"}, "Person": {"name": "Ada"}});
        let combined = combine_schema(jsonld, micro);
        let products = combined["Product"].as_array().unwrap();
        assert_eq!(products.len(), 2);
        assert_eq!(combined["Person"]["name"], "Ada");
    }

    #[test]
    fn hydration_script_tags_fold_into_js() {
        let html = r#"<html><body>
            <script id="__NEXT_DATA__" type="application/json">{"props": 1}</script>
            <script>var app = {"v": 2};</script>
        </body></html>"#;
        let record = build_record(html, "text/html", "");
        let js = record.js.unwrap();
        assert_eq!(js["__NEXT_DATA__"]["props"], 1);
        assert_eq!(js["app"]["v"], 2);
    }

    #[test]
    fn record_json_shape() {
        let html = r#"<html><head><meta property="og:title" content="T"></head></html>"#;
        let record = build_record(html, "text/html; charset=utf-8", "https://h/");
        let json = record.to_json();
        assert_eq!(json["document"], html);
        assert_eq!(json["opengraph"]["title"], "T");
        assert!(json["js"].is_null());
        assert!(json["schema"].is_null());
    }
}
