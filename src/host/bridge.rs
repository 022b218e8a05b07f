//! Source-query bridge: the stand-in for the host's table-function ABI.
//!
//! The merge executor hands this module a source query. Queries without
//! crawl calls run directly on SQLite. Queries of the two crawl shapes are
//! decomposed textually — with the same string/parenthesis tracking the
//! limit injector and exclusion rewriter use — into a driving relation
//! executed on SQLite plus a crawl operator driven row by row:
//!
//! - `SELECT … FROM crawl(<urls or query>, opt := v, …) [alias] [LIMIT n]`
//! - `[WITH …] SELECT … FROM <driving> [WHERE …], [LATERAL]
//!   crawl_url(<expr>[, <limit>]) [AS] <alias> [LIMIT n]`
//!
//! Rows are pulled lazily, so an outer LIMIT stops the crawl between HTTP
//! requests, and the per-row operator sees one driving row per chunk.

use rusqlite::types::Value as SqlValue;
use tracing::debug;

use super::{query_rows, RowSet};
use crate::crawl::lateral::{LateralCrawl, LateralPoll};
use crate::crawl::stream::StreamCrawl;
use crate::crawl::{CrawlContext, CrawlOptions, CrawlRow, CrawlSource, OptionValue};
use crate::error::{CrawlError, Result};
use crate::utils::scan::{
    find_closing_paren, find_crawl_call, find_top_level, split_top_level_commas, strip_lateral,
    CrawlCall,
};

const CRAWL_COLUMNS: [&str; 8] = [
    "url",
    "status",
    "content_type",
    "html",
    "error",
    "extract",
    "response_time_ms",
    "depth",
];
const CRAWL_TYPES: [&str; 8] = [
    "TEXT", "INTEGER", "TEXT", "TEXT", "TEXT", "TEXT", "INTEGER", "INTEGER",
];

fn unsupported(msg: impl Into<String>) -> CrawlError {
    CrawlError::UnsupportedQuery(msg.into())
}

fn crawl_value(row: &CrawlRow, column: &str) -> SqlValue {
    match column {
        "url" => SqlValue::Text(row.url.clone()),
        "status" => SqlValue::Integer(row.status as i64),
        "content_type" => SqlValue::Text(row.content_type.clone()),
        "html" => SqlValue::Text(row.html.to_json().to_string()),
        "error" => {
            if row.error.is_empty() {
                SqlValue::Null
            } else {
                SqlValue::Text(row.error.clone())
            }
        }
        "extract" => {
            if row.extract.is_empty() {
                SqlValue::Null
            } else {
                SqlValue::Text(row.extract.clone())
            }
        }
        "response_time_ms" => SqlValue::Integer(row.response_time_ms),
        "depth" => SqlValue::Integer(row.depth as i64),
        _ => SqlValue::Null,
    }
}

/// One projected output column.
#[derive(Debug, Clone)]
enum ProjItem {
    /// Crawl operator column by name.
    Crawl(String),
    /// Extra driving-side value by index (after the URL expression).
    Driving(usize),
}

#[derive(Debug, Clone, Default)]
struct Projection {
    items: Vec<ProjItem>,
    columns: Vec<String>,
    types: Vec<String>,
    /// Driving-side expressions referenced by the projection.
    driving_exprs: Vec<String>,
}

impl Projection {
    fn all_crawl(with_depth: bool) -> Self {
        let count = if with_depth { 8 } else { 7 };
        Self {
            items: CRAWL_COLUMNS[..count]
                .iter()
                .map(|c| ProjItem::Crawl((*c).to_string()))
                .collect(),
            columns: CRAWL_COLUMNS[..count].iter().map(|c| c.to_string()).collect(),
            types: CRAWL_TYPES[..count].iter().map(|t| t.to_string()).collect(),
            driving_exprs: Vec::new(),
        }
    }
}

/// Parse the projection list between SELECT and FROM.
fn parse_projection(
    select_list: &str,
    lateral_alias: &str,
    with_depth: bool,
) -> Result<Projection> {
    let trimmed = select_list.trim();
    if trimmed == "*" || (!lateral_alias.is_empty() && trimmed == format!("{lateral_alias}.*")) {
        return Ok(Projection::all_crawl(with_depth));
    }

    let mut projection = Projection::default();
    for raw_item in split_top_level_commas(trimmed) {
        let item = raw_item.trim();
        if item.is_empty() {
            return Err(unsupported("empty projection item"));
        }
        if item == format!("{lateral_alias}.*") {
            let count = if with_depth { 8 } else { 7 };
            for column in &CRAWL_COLUMNS[..count] {
                projection.items.push(ProjItem::Crawl((*column).to_string()));
                projection.columns.push((*column).to_string());
                projection
                    .types
                    .push(CRAWL_TYPES[CRAWL_COLUMNS.iter().position(|c| c == column).unwrap()].to_string());
            }
            continue;
        }

        // Optional trailing alias.
        let (expr, out_name) = match item.to_lowercase().rfind(" as ") {
            Some(as_pos) => (
                item[..as_pos].trim().to_string(),
                item[as_pos + 4..].trim().trim_matches('"').to_string(),
            ),
            None => (item.to_string(), String::new()),
        };

        let (qualifier, column) = match expr.rsplit_once('.') {
            Some((q, c)) => (q.trim().to_string(), c.trim().to_string()),
            None => (String::new(), expr.clone()),
        };

        let is_lateral_ref = qualifier == lateral_alias
            || (qualifier.is_empty() && CRAWL_COLUMNS.contains(&column.as_str()));
        if is_lateral_ref {
            let idx = CRAWL_COLUMNS
                .iter()
                .position(|c| c.eq_ignore_ascii_case(&column))
                .ok_or_else(|| unsupported(format!("unknown crawl column: {column}")))?;
            if idx == 7 && !with_depth {
                return Err(unsupported("crawl_url emits no depth column"));
            }
            projection.items.push(ProjItem::Crawl(CRAWL_COLUMNS[idx].to_string()));
            projection.columns.push(if out_name.is_empty() {
                CRAWL_COLUMNS[idx].to_string()
            } else {
                out_name
            });
            projection.types.push(CRAWL_TYPES[idx].to_string());
        } else {
            // Driving-side expression, selected alongside the URL.
            let idx = projection.driving_exprs.len();
            projection.driving_exprs.push(expr.clone());
            projection.items.push(ProjItem::Driving(idx));
            projection.columns.push(if out_name.is_empty() {
                column
            } else {
                out_name
            });
            projection.types.push("TEXT".to_string());
        }
    }
    Ok(projection)
}

/// Trailing top-level `LIMIT n`; returns the query without it.
fn split_trailing_limit(sql: &str) -> (String, Option<i64>) {
    let mut pos = 0usize;
    let mut last = None;
    while let Some(p) = find_top_level(sql, "limit", pos, true) {
        last = Some(p);
        pos = p + 1;
    }
    let limit_pos = match last {
        Some(p) => p,
        None => return (sql.to_string(), None),
    };
    let tail = sql[limit_pos + 5..].trim().trim_end_matches(';').trim();
    if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) {
        let limit = tail.parse().ok();
        (sql[..limit_pos].trim_end().to_string(), limit)
    } else {
        (sql.to_string(), None)
    }
}

/// Parse one SQL literal used as an option value.
fn parse_literal(text: &str) -> Result<OptionValue> {
    let t = text.trim();
    if t.is_empty() {
        return Err(CrawlError::InvalidOption("empty argument".into()));
    }
    if t.starts_with('[') && t.ends_with(']') {
        let inner = &t[1..t.len() - 1];
        let mut items = Vec::new();
        for part in split_top_level_commas(inner) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match parse_literal(part)? {
                OptionValue::Text(s) => items.push(s),
                other => {
                    return Err(CrawlError::InvalidOption(format!(
                        "list element must be a string, got {other:?}"
                    )))
                }
            }
        }
        return Ok(OptionValue::List(items));
    }
    if t.starts_with('\'') && t.ends_with('\'') && t.len() >= 2 {
        return Ok(OptionValue::Text(t[1..t.len() - 1].replace("''", "'")));
    }
    let lower = t.to_lowercase();
    if lower == "true" {
        return Ok(OptionValue::Bool(true));
    }
    if lower == "false" {
        return Ok(OptionValue::Bool(false));
    }
    // Tolerate a cast suffix on numeric arguments.
    let number = t.split("::").next().unwrap_or(t).trim();
    if let Ok(i) = number.parse::<i64>() {
        return Ok(OptionValue::Int(i));
    }
    if let Ok(f) = number.parse::<f64>() {
        return Ok(OptionValue::Float(f));
    }
    Err(CrawlError::InvalidOption(format!("unparsable argument: {t}")))
}

/// Parse `crawl(...)` arguments into a seed source and options.
fn parse_crawl_args(
    content: &str,
    options: &mut CrawlOptions,
) -> Result<CrawlSource> {
    let parts = split_top_level_commas(content);
    let first = parts
        .first()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| CrawlError::InvalidOption("crawl() requires a URL argument".into()))?;

    let source = match parse_literal(first)? {
        OptionValue::List(urls) => CrawlSource::Urls(urls),
        OptionValue::Text(text) => {
            let lower = text.trim_start().to_lowercase();
            if lower.starts_with("select") || lower.starts_with("with") {
                CrawlSource::Query(text)
            } else {
                CrawlSource::Urls(vec![text])
            }
        }
        other => {
            return Err(CrawlError::InvalidOption(format!(
                "crawl() first argument must be a URL list or string, got {other:?}"
            )))
        }
    };

    for part in &parts[1..] {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (name, value) = part
            .split_once(":=")
            .ok_or_else(|| CrawlError::InvalidOption(format!("expected name := value: {part}")))?;
        options.apply_named(name.trim(), &parse_literal(value)?)?;
    }
    Ok(source)
}

/// Streaming result of a source query.
pub struct SourceStream {
    inner: StreamInner,
}

enum StreamInner {
    Table {
        set: RowSet,
        next: usize,
    },
    Crawl {
        op: Box<StreamCrawl>,
        projection: Projection,
        limit: Option<i64>,
        emitted: i64,
    },
    Lateral {
        op: Box<LateralCrawl>,
        driving: RowSet,
        next_driving: usize,
        projection: Projection,
        limit: Option<i64>,
        emitted: i64,
    },
}

impl SourceStream {
    pub fn columns(&self) -> Vec<String> {
        match &self.inner {
            StreamInner::Table { set, .. } => set.columns.clone(),
            StreamInner::Crawl { projection, .. } | StreamInner::Lateral { projection, .. } => {
                projection.columns.clone()
            }
        }
    }

    pub fn types(&self) -> Vec<String> {
        match &self.inner {
            StreamInner::Table { set, .. } => set.types.clone(),
            StreamInner::Crawl { projection, .. } | StreamInner::Lateral { projection, .. } => {
                projection.types.clone()
            }
        }
    }

    /// Pull the next output row.
    pub async fn next_row(&mut self) -> Result<Option<Vec<SqlValue>>> {
        match &mut self.inner {
            StreamInner::Table { set, next } => {
                if *next < set.rows.len() {
                    let row = set.rows[*next].clone();
                    *next += 1;
                    Ok(Some(row))
                } else {
                    Ok(None)
                }
            }
            StreamInner::Crawl {
                op,
                projection,
                limit,
                emitted,
            } => {
                if let Some(limit) = limit {
                    if *emitted >= *limit {
                        return Ok(None);
                    }
                }
                match op.next_row().await? {
                    Some(row) => {
                        *emitted += 1;
                        Ok(Some(project_row(projection, &row, &[])))
                    }
                    None => Ok(None),
                }
            }
            StreamInner::Lateral {
                op,
                driving,
                next_driving,
                projection,
                limit,
                emitted,
            } => loop {
                if let Some(limit) = limit {
                    if *emitted >= *limit {
                        return Ok(None);
                    }
                }
                match op.poll().await? {
                    LateralPoll::Row(row) => {
                        let extras = driving.rows[*next_driving - 1][1..].to_vec();
                        *emitted += 1;
                        return Ok(Some(project_row(projection, &row, &extras)));
                    }
                    LateralPoll::Finished => return Ok(None),
                    LateralPoll::NeedMoreInput => {
                        if *next_driving >= driving.rows.len() {
                            return Ok(None);
                        }
                        let url = match &driving.rows[*next_driving][0] {
                            SqlValue::Null => None,
                            value => Some(super::value_to_string(value)),
                        };
                        op.begin_chunk(vec![url]);
                        *next_driving += 1;
                    }
                }
            },
        }
    }

    /// Drain the stream.
    pub async fn collect(&mut self) -> Result<RowSet> {
        let mut set = RowSet {
            columns: self.columns(),
            types: self.types(),
            rows: Vec::new(),
        };
        while let Some(row) = self.next_row().await? {
            set.rows.push(row);
        }
        Ok(set)
    }
}

fn project_row(projection: &Projection, row: &CrawlRow, extras: &[SqlValue]) -> Vec<SqlValue> {
    projection
        .items
        .iter()
        .map(|item| match item {
            ProjItem::Crawl(column) => crawl_value(row, column),
            ProjItem::Driving(idx) => extras.get(*idx).cloned().unwrap_or(SqlValue::Null),
        })
        .collect()
}

/// Open a source query as a row stream.
pub async fn open_source(ctx: &CrawlContext, sql: &str) -> Result<SourceStream> {
    let sql = strip_lateral(sql.trim());

    let (func_pos, call) = match find_crawl_call(&sql, 0) {
        Some(found) => found,
        None => {
            // Plain SQL straight to the host engine.
            let conn = ctx.db.connect()?;
            let set =
                query_rows(&conn, &sql).map_err(|e| CrawlError::SourceQuery(e.to_string()))?;
            return Ok(SourceStream {
                inner: StreamInner::Table { set, next: 0 },
            });
        }
    };

    let (sql, limit) = split_trailing_limit(&sql);
    let select_pos = find_top_level(&sql, "select", 0, true)
        .ok_or_else(|| unsupported("source query has no top-level SELECT"))?;
    let from_pos = find_top_level(&sql, "from", select_pos, true)
        .ok_or_else(|| unsupported("source query has no top-level FROM"))?;
    if func_pos <= from_pos {
        return Err(unsupported("crawl call outside the FROM clause"));
    }
    let select_list = sql[select_pos + "select".len()..from_pos].trim().to_string();

    let paren_pos = func_pos + call.name().len();
    let close = find_closing_paren(&sql, paren_pos)
        .ok_or_else(|| unsupported("unbalanced crawl call"))?;
    let content = sql[paren_pos + 1..close].to_string();

    // Optional `[AS] alias` after the call.
    let mut tail = sql[close + 1..].trim();
    let mut alias = String::new();
    if !tail.is_empty() {
        let (mut first, mut rest) = split_first_word(tail);
        if first.eq_ignore_ascii_case("as") {
            let split = split_first_word(rest);
            first = split.0;
            rest = split.1;
        }
        alias = first.trim_matches('"').to_string();
        tail = rest.trim();
    }
    if !tail.is_empty() {
        return Err(unsupported(format!("trailing clause after crawl call: {tail}")));
    }

    match call {
        CrawlCall::Crawl => {
            let mut options = CrawlOptions::from_settings(&ctx.settings);
            let source = parse_crawl_args(&content, &mut options)?;
            let projection = parse_projection(&select_list, &alias, true)?;
            if !projection.driving_exprs.is_empty() {
                return Err(unsupported("projection references unknown columns"));
            }
            let mut op = StreamCrawl::new(ctx.clone(), source, options);
            if let Some(limit) = limit {
                // The host would push this LIMIT down as a cardinality hint.
                op.set_limit_hint(limit);
            }
            debug!("source query opened as streaming crawl");
            Ok(SourceStream {
                inner: StreamInner::Crawl {
                    op: Box::new(op),
                    projection,
                    limit,
                    emitted: 0,
                },
            })
        }
        CrawlCall::CrawlUrl => {
            // Driving relation: everything between FROM and the top-level
            // comma that precedes the call.
            let mut comma_pos = None;
            let mut scan_from = from_pos;
            while let Some(p) = find_top_level(&sql, ",", scan_from, false) {
                if p >= func_pos {
                    break;
                }
                comma_pos = Some(p);
                scan_from = p + 1;
            }
            let comma_pos =
                comma_pos.ok_or_else(|| unsupported("crawl_url requires a driving relation"))?;

            let args = split_top_level_commas(&content);
            let url_expr = args
                .first()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .ok_or_else(|| unsupported("crawl_url requires a URL argument"))?;

            let mut options = CrawlOptions::from_settings(&ctx.settings);
            if let Some(second) = args.get(1) {
                if let OptionValue::Int(limit) = parse_literal(second)? {
                    options.max_results = Some(limit);
                }
            }
            for part in args.iter().skip(2) {
                let part = part.trim();
                if let Some((name, value)) = part.split_once(":=") {
                    options.apply_named(name.trim(), &parse_literal(value)?)?;
                }
            }

            let projection = parse_projection(&select_list, &alias, false)?;

            let with_prefix =
                if find_top_level(&sql, "with", 0, true).map_or(false, |w| w < select_pos) {
                    sql[..select_pos].trim().to_string()
                } else {
                    String::new()
                };
            let driving_part = sql[from_pos + "from".len()..comma_pos].trim();
            let mut driving_select = String::from("SELECT ");
            driving_select.push_str(&url_expr);
            for expr in &projection.driving_exprs {
                driving_select.push_str(", ");
                driving_select.push_str(expr);
            }
            let driving_sql = format!("{with_prefix} {driving_select} FROM {driving_part}");

            let conn = ctx.db.connect()?;
            let driving = query_rows(&conn, driving_sql.trim())
                .map_err(|e| CrawlError::SourceQuery(e.to_string()))?;
            debug!(
                driving_rows = driving.rows.len(),
                "source query opened as per-row crawl"
            );

            let op = LateralCrawl::new(ctx.clone(), options)?;
            Ok(SourceStream {
                inner: StreamInner::Lateral {
                    op: Box::new(op),
                    driving,
                    next_driving: 0,
                    projection,
                    limit,
                    emitted: 0,
                },
            })
        }
    }
}

fn split_first_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(i) => (&text[..i], &text[i..]),
        None => (text, ""),
    }
}
