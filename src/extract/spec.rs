//! Declarative extraction specs and the dotted/arrow JSON path evaluator.
//!
//! A spec has the form `alias := expression` where the expression is either
//! a CSS selector (`$("h1.title")`, `css 'h1'`) or a path through one of
//! the structured sources: `jsonld.Product.name`,
//! `opengraph->'title'`, `js->'config'->>'apiUrl'`.

use serde_json::Value;

use super::HtmlRecord;

/// Source a spec path is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractSource {
    Css,
    JsonLd,
    Microdata,
    Schema,
    OpenGraph,
    Meta,
    Js,
}

impl ExtractSource {
    fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "css" => Some(Self::Css),
            "jsonld" | "json_ld" => Some(Self::JsonLd),
            "microdata" => Some(Self::Microdata),
            "schema" => Some(Self::Schema),
            "opengraph" | "og" => Some(Self::OpenGraph),
            "meta" => Some(Self::Meta),
            "js" => Some(Self::Js),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractSpec {
    pub alias: String,
    pub source: ExtractSource,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Key(String),
    Index(usize),
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if s.len() >= 2 {
        let bytes = s.as_bytes();
        if (bytes[0] == b'\'' && bytes[s.len() - 1] == b'\'')
            || (bytes[0] == b'"' && bytes[s.len() - 1] == b'"')
        {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Parse an arrow path like `->'Product'->[0]->>'name'` into segments.
/// The final operator decides text output.
fn parse_arrow_path(expr: &str) -> (Vec<PathSegment>, bool) {
    let mut segments = Vec::new();
    let mut text_output = false;
    let bytes = expr.as_bytes();
    let mut pos = 0usize;

    while pos < bytes.len() {
        if !expr[pos..].starts_with("->") {
            break;
        }
        let is_text = expr[pos..].starts_with("->>");
        pos += if is_text { 3 } else { 2 };
        text_output = is_text;

        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }

        if bytes[pos] == b'[' {
            let end = match expr[pos..].find(']') {
                Some(e) => pos + e,
                None => break,
            };
            let index = expr[pos + 1..end].trim().parse::<usize>().unwrap_or(0);
            segments.push(PathSegment::Index(index));
            pos = end + 1;
        } else if bytes[pos] == b'\'' || bytes[pos] == b'"' {
            let quote = bytes[pos];
            let end = match expr[pos + 1..].find(quote as char) {
                Some(e) => pos + 1 + e,
                None => break,
            };
            segments.push(PathSegment::Key(expr[pos + 1..end].to_string()));
            pos = end + 1;
        } else {
            let end = expr[pos..]
                .find("->")
                .map(|e| pos + e)
                .unwrap_or(bytes.len());
            let key = expr[pos..end].trim();
            if !key.is_empty() {
                if key.chars().all(|c| c.is_ascii_digit()) {
                    segments.push(PathSegment::Index(key.parse().unwrap_or(0)));
                } else {
                    segments.push(PathSegment::Key(key.to_string()));
                }
            }
            pos = end;
        }
    }

    (segments, text_output)
}

fn parse_dotted_path(path: &str) -> Vec<PathSegment> {
    path.split('.')
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(|part| {
            if part.chars().all(|c| c.is_ascii_digit()) {
                PathSegment::Index(part.parse().unwrap_or(0))
            } else {
                PathSegment::Key(part.to_string())
            }
        })
        .collect()
}

/// Parse one spec string. Returns `None` on an unrecognized source or an
/// empty expression.
pub fn parse_extract_spec(spec: &str) -> Option<ExtractSpec> {
    let (alias, expr) = match spec.split_once(":=") {
        Some((a, e)) => (a.trim().to_string(), e.trim()),
        None => (spec.trim().to_string(), spec.trim()),
    };
    if alias.is_empty() || expr.is_empty() {
        return None;
    }

    // CSS selector forms: $("sel") / $('sel') / css 'sel'
    if let Some(rest) = expr.strip_prefix("$(") {
        let inner = rest.strip_suffix(')')?;
        return Some(ExtractSpec {
            alias,
            source: ExtractSource::Css,
            path: strip_quotes(inner).to_string(),
        });
    }
    if let Some(rest) = expr.strip_prefix("css ").or_else(|| expr.strip_prefix("CSS ")) {
        return Some(ExtractSpec {
            alias,
            source: ExtractSource::Css,
            path: strip_quotes(rest).to_string(),
        });
    }

    // Arrow notation: source->'a'->>'b'
    if let Some(arrow) = expr.find("->") {
        let source = ExtractSource::parse(expr[..arrow].trim())?;
        return Some(ExtractSpec {
            alias,
            source,
            path: expr[arrow..].to_string(),
        });
    }

    // Dotted notation: source.a.b
    if let Some((head, rest)) = expr.split_once('.') {
        if let Some(source) = ExtractSource::parse(head.trim()) {
            return Some(ExtractSpec {
                alias,
                source,
                path: rest.trim().to_string(),
            });
        }
    }

    None
}

fn walk<'a>(mut current: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    for segment in segments {
        current = match segment {
            PathSegment::Key(key) => current.as_object()?.get(key)?,
            PathSegment::Index(i) => current.as_array()?.get(*i)?,
        };
    }
    Some(current)
}

/// Evaluate a dotted or arrow path against a JSON value. Text output
/// unquotes strings; JSON output serializes whatever the path reaches.
pub fn evaluate_json_path(value: &Value, path: &str) -> Option<Value> {
    let (segments, text_output) = if path.trim_start().starts_with("->") {
        parse_arrow_path(path.trim_start())
    } else {
        (parse_dotted_path(path), true)
    };
    if segments.is_empty() {
        return None;
    }
    let found = walk(value, &segments)?;
    if text_output {
        match found {
            Value::String(s) => Some(Value::String(s.clone())),
            Value::Null => None,
            other => Some(Value::String(other.to_string())),
        }
    } else {
        Some(found.clone())
    }
}

fn css_first_text(html: &str, selector: &str) -> Option<Value> {
    let parsed = scraper::Selector::parse(selector).ok()?;
    let document = scraper::Html::parse_document(html);
    let element = document.select(&parsed).next()?;
    let text = element.text().collect::<String>().trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(Value::String(text))
    }
}

/// Evaluate specs against a page, producing `{alias: value}`. Aliases with
/// no match are omitted; an empty result serializes to `{}`.
pub fn evaluate_specs(specs: &[ExtractSpec], html: &str, record: &HtmlRecord) -> Value {
    let empty = Value::Object(serde_json::Map::new());
    let mut out = serde_json::Map::new();
    let mut meta: Option<Value> = None;

    for spec in specs {
        let value = match spec.source {
            ExtractSource::Css => css_first_text(html, &spec.path),
            ExtractSource::JsonLd | ExtractSource::Microdata | ExtractSource::Schema => {
                evaluate_json_path(record.schema.as_ref().unwrap_or(&empty), &spec.path)
            }
            ExtractSource::OpenGraph => {
                evaluate_json_path(record.opengraph.as_ref().unwrap_or(&empty), &spec.path)
            }
            ExtractSource::Js => {
                evaluate_json_path(record.js.as_ref().unwrap_or(&empty), &spec.path)
            }
            ExtractSource::Meta => {
                let meta_tags =
                    meta.get_or_insert_with(|| super::opengraph::extract_meta_tags(html));
                evaluate_json_path(meta_tags, &spec.path)
            }
        };
        if let Some(v) = value {
            out.insert(spec.alias.clone(), v);
        }
    }

    Value::Object(out)
}
