//! Article-style content extraction.
//!
//! A lightweight readability pass: locate the most article-like container,
//! pull its text, and pair it with title, byline, and excerpt metadata.

use serde_json::Value;

/// Containers tried in order before falling back to the body.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role='main']",
    "#content",
    ".post-content",
    ".article-body",
    ".content",
];

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = true;
    for c in text.chars() {
        if c.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(c);
            last_space = false;
        }
    }
    out.trim().to_string()
}

fn element_text(element: scraper::ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

fn first_match_text(document: &scraper::Html) -> Option<String> {
    for selector in CONTENT_SELECTORS {
        let parsed = match scraper::Selector::parse(selector) {
            Ok(s) => s,
            Err(_) => continue,
        };
        if let Some(element) = document.select(&parsed).next() {
            let text = element_text(element);
            if text.len() > 80 {
                return Some(text);
            }
        }
    }
    None
}

/// Fallback: concatenate paragraph text when no container qualifies.
fn paragraph_text(document: &scraper::Html) -> String {
    let selector = scraper::Selector::parse("p").expect("static selector");
    let joined = document
        .select(&selector)
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    collapse_whitespace(&joined)
}

fn title(document: &scraper::Html) -> Option<String> {
    let og = scraper::Selector::parse("meta[property='og:title']").expect("static selector");
    if let Some(el) = document.select(&og).next() {
        if let Some(content) = el.value().attr("content") {
            let content = content.trim();
            if !content.is_empty() {
                return Some(content.to_string());
            }
        }
    }
    let title_sel = scraper::Selector::parse("title").expect("static selector");
    document
        .select(&title_sel)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

fn meta_content(document: &scraper::Html, selector: &str) -> Option<String> {
    let parsed = scraper::Selector::parse(selector).ok()?;
    document
        .select(&parsed)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

/// Extract readability data as a JSON object with `title`, `byline`,
/// `excerpt`, `text`, `length`, and `url`; empty when the page has no
/// usable text.
pub fn extract_readability(html: &str, url: &str) -> Value {
    let mut out = serde_json::Map::new();
    if html.is_empty() {
        return Value::Object(out);
    }

    let document = scraper::Html::parse_document(html);
    let text = first_match_text(&document).unwrap_or_else(|| paragraph_text(&document));
    if text.is_empty() {
        return Value::Object(out);
    }

    if let Some(t) = title(&document) {
        out.insert("title".to_string(), Value::String(t));
    }
    if let Some(byline) = meta_content(&document, "meta[name='author']") {
        out.insert("byline".to_string(), Value::String(byline));
    }
    let excerpt = meta_content(&document, "meta[name='description']")
        .unwrap_or_else(|| text.chars().take(200).collect());
    out.insert("excerpt".to_string(), Value::String(excerpt));
    out.insert("length".to_string(), Value::from(text.chars().count()));
    out.insert("text".to_string(), Value::String(text));
    if !url.is_empty() {
        out.insert("url".to_string(), Value::String(url.to_string()));
    }

    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn article_container_preferred() {
        let body = "This is the body of the article, long enough to pass the \
                    minimum length gate used to reject boilerplate containers.";
        let html = format!(
            r#"<html><head><title>Story</title><meta name="author" content="Ada">
               <meta name="description" content="Short desc"></head>
               <body><nav>menu menu</nav><article><p>{}</p></article></body></html>"#,
            body
        );
        let r = extract_readability(&html, "https://h/story");
        assert_eq!(r["title"], "Story");
        assert_eq!(r["byline"], "Ada");
        assert_eq!(r["excerpt"], "Short desc");
        assert_eq!(r["url"], "https://h/story");
        assert!(r["text"].as_str().unwrap().contains("body of the article"));
        assert!(r["length"].as_u64().unwrap() > 80);
    }

    #[test]
    fn paragraph_fallback() {
        let html = "<body><p>First paragraph here.</p><p>Second paragraph here.</p></body>";
        let r = extract_readability(html, "");
        let text = r["text"].as_str().unwrap();
        assert!(text.contains("First paragraph"));
        assert!(text.contains("Second paragraph"));
    }

    #[test]
    fn empty_page() {
        assert_eq!(extract_readability("", "https://h/"), json!({}));
        assert_eq!(extract_readability("<body></body>", ""), json!({}));
    }
}
