//! Top-level JavaScript variable extraction.
//!
//! Finds statement-starting `var`/`let`/`const`/`window.` assignments whose
//! right-hand side is a bracketed JSON value, using a balanced-brace scan
//! that honors string and escape state. Comments are stripped first so
//! commented-out assignments never match.

use serde_json::Value;

/// Strip `//` and `/* */` comments while preserving string literals.
/// Newlines after line comments are kept for statement-boundary detection.
pub(crate) fn strip_comments(script: &str) -> String {
    let bytes = script.as_bytes();
    let mut out = String::with_capacity(script.len());
    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'"' || c == b'\'' || c == b'`' {
            let quote = c;
            let start = i;
            i += 1;
            let mut escaped = false;
            while i < bytes.len() {
                let b = bytes[i];
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == quote {
                    i += 1;
                    break;
                }
                i += 1;
            }
            out.push_str(&script[start..i]);
            continue;
        }
        if c == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'/' {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            if i < bytes.len() {
                out.push('\n');
                i += 1;
            }
            continue;
        }
        if c == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'*' {
            i += 2;
            while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                i += 1;
            }
            if i + 1 < bytes.len() {
                i += 2;
            } else {
                i = bytes.len();
            }
            out.push(' ');
            continue;
        }
        // Copy a run of ordinary bytes, keeping UTF-8 intact.
        let start = i;
        i += 1;
        while i < bytes.len() {
            let b = bytes[i];
            if b == b'"' || b == b'\'' || b == b'`' || b == b'/' {
                break;
            }
            i += 1;
        }
        out.push_str(&script[start..i]);
    }
    out
}

/// Scan a balanced `{…}` or `[…]` starting at or after `start` and return
/// it if it parses as JSON. String and escape state are honored so braces
/// inside strings do not affect depth.
pub(crate) fn extract_balanced_json(content: &str, start: usize) -> Option<String> {
    let bytes = content.as_bytes();
    let mut pos = start;
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    if pos >= bytes.len() {
        return None;
    }
    let open = bytes[pos];
    if open != b'{' && open != b'[' {
        return None;
    }
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 1i32;
    let mut in_string = false;
    let mut escape_next = false;
    let mut i = pos + 1;
    while i < bytes.len() {
        let c = bytes[i];
        if escape_next {
            escape_next = false;
        } else if c == b'\\' && in_string {
            escape_next = true;
        } else if c == b'"' {
            in_string = !in_string;
        } else if !in_string {
            if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
                if depth == 0 {
                    let candidate = &content[pos..=i];
                    if serde_json::from_str::<Value>(candidate).is_ok() {
                        return Some(candidate.to_string());
                    }
                    return None;
                }
            }
        }
        i += 1;
    }
    None
}

fn is_identifier_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'$'
}

/// Parse an assignment head at `pos` (`var x =`, `let x =`, `const x =`,
/// `window.x =`) and return the variable name and the position just past
/// the `=`.
fn parse_assignment(script: &str, pos: usize) -> Option<(String, usize)> {
    let bytes = script.as_bytes();
    let mut i = pos;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    let rest = &script[i..];
    if let Some(r) = rest
        .strip_prefix("var ")
        .or_else(|| rest.strip_prefix("let "))
    {
        i += rest.len() - r.len();
    } else if let Some(r) = rest.strip_prefix("const ") {
        i += rest.len() - r.len();
    } else if let Some(r) = rest.strip_prefix("window.") {
        i += rest.len() - r.len();
    } else {
        return None;
    }

    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    let name_start = i;
    while i < bytes.len() && is_identifier_char(bytes[i]) {
        i += 1;
    }
    if i == name_start {
        return None;
    }
    let name = script[name_start..i].to_string();

    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if i >= bytes.len() || bytes[i] != b'=' {
        return None;
    }
    i += 1;
    Some((name, i))
}

/// Collect assignments from one script body into `vars`; the first
/// occurrence of a name wins.
fn scan_script(raw_script: &str, vars: &mut serde_json::Map<String, Value>) {
    let script = strip_comments(raw_script);
    let bytes = script.as_bytes();
    let mut pos = 0usize;

    while pos < script.len() {
        let candidates = ["var ", "let ", "const ", "window."];
        let earliest = candidates
            .iter()
            .filter_map(|kw| script[pos..].find(kw).map(|p| p + pos))
            .min();
        let start = match earliest {
            Some(s) => s,
            None => break,
        };

        // Only statement-starting positions count.
        let valid_start = start == 0
            || matches!(
                bytes[start - 1],
                b';' | b'\n' | b'\r' | b'{' | b'}' | b'(' | b')'
            )
            || bytes[start - 1].is_ascii_whitespace()
                && (start < 2 || !is_identifier_char(bytes[start - 2]));
        if !valid_start {
            pos = start + 1;
            continue;
        }

        let (name, value_pos) = match parse_assignment(&script, start) {
            Some(parsed) => parsed,
            None => {
                pos = start + 1;
                continue;
            }
        };

        if let Some(json) = extract_balanced_json(&script, value_pos) {
            if !vars.contains_key(&name) {
                if let Ok(value) = serde_json::from_str::<Value>(&json) {
                    vars.insert(name, value);
                }
            }
        }
        pos = value_pos.max(start + 1);
    }
}

fn is_javascript_type(type_attr: Option<&str>) -> bool {
    match type_attr {
        None => true,
        Some(t) => {
            let t = t.trim();
            t.is_empty() || t.to_lowercase().contains("javascript") || t == "module"
        }
    }
}

/// Extract recognized top-level JS variable assignments from every script
/// block in an HTML document. Returns a JSON object, empty when nothing was
/// found.
pub fn extract_js_variables(html: &str) -> Value {
    let mut vars = serde_json::Map::new();
    if html.is_empty() {
        return Value::Object(vars);
    }

    let document = scraper::Html::parse_document(html);
    let selector = scraper::Selector::parse("script").expect("static selector");
    for element in document.select(&selector) {
        if !is_javascript_type(element.value().attr("type")) {
            continue;
        }
        let content: String = element.text().collect();
        if !content.is_empty() {
            scan_script(&content, &mut vars);
        }
    }
    Value::Object(vars)
}
