//! Textual source-query rewrites.
//!
//! Two rewrites, both string-literal- and parenthesis-aware:
//! limit injection adds a `max_results` argument to every `crawl(...)` /
//! `crawl_url(...)` call that lacks one, and the exclusion rewrite filters
//! the URL-producing side of a comma join so rows a MATCHED AND-condition
//! would reject are never fetched.

use tracing::debug;

use crate::utils::scan::{
    find_closing_paren, find_crawl_call, find_top_level, split_top_level_commas, CrawlCall,
};
use crate::utils::sql::quote_identifier;

/// Name of the exclusion CTE injected ahead of the source query.
pub const FRESH_CTE: &str = "__fresh";

/// Inject a row limit into crawl calls: `crawl(...)` gets a named
/// `max_results := n` parameter, `crawl_url(...)` a second positional
/// argument. Calls already carrying `max_results` are left alone.
pub fn inject_max_results(query: &str, limit: i64) -> String {
    if limit <= 0 {
        return query.to_string();
    }

    let mut result = query.to_string();
    let mut pos = 0usize;

    while let Some((func_pos, call)) = find_crawl_call(&result, pos) {
        let paren_pos = func_pos + call.name().len();
        let close = match find_closing_paren(&result, paren_pos) {
            Some(c) => c,
            None => {
                pos = func_pos + 1;
                continue;
            }
        };

        let content = result[paren_pos..=close].to_lowercase();
        if content.contains("max_results") {
            pos = close + 1;
            continue;
        }

        let param = match call {
            CrawlCall::CrawlUrl => format!(", {limit}"),
            CrawlCall::Crawl => format!(", max_results := {limit}"),
        };
        result.insert_str(close, &param);
        pos = close + param.len() + 1;
    }

    result
}

/// Rewrite the source query to exclude join keys whose MATCHED
/// AND-condition is already false in the target ("fresh" rows), so the
/// per-row crawl never fetches them:
///
/// `FROM urls u, crawl_url(u.url) c` becomes
/// `WITH __fresh AS (SELECT url FROM target WHERE NOT (cond))
///  ... FROM urls u WHERE u.url NOT IN (SELECT url FROM __fresh), crawl_url(u.url) c`
///
/// Returns `None` when the query shape is not recognized; the caller then
/// runs the original text.
pub fn rewrite_with_exclusion(
    source_query: &str,
    target_table: &str,
    join_columns: &[String],
    matched_condition: &str,
) -> Option<String> {
    if join_columns.is_empty() || matched_condition.is_empty() {
        return None;
    }

    // Locate the per-row crawl call the filter protects.
    let mut search = 0usize;
    let func_pos = loop {
        match find_crawl_call(source_query, search) {
            Some((pos, CrawlCall::CrawlUrl)) => break pos,
            Some((pos, CrawlCall::Crawl)) => search = pos + 1,
            None => return None,
        }
    };

    let paren_pos = func_pos + "crawl_url".len();
    let close = find_closing_paren(source_query, paren_pos)?;
    let content = &source_query[paren_pos + 1..close];
    let url_expr = split_top_level_commas(content)
        .into_iter()
        .next()?
        .trim()
        .to_string();
    if url_expr.is_empty() {
        return None;
    }

    // The comma that precedes the (implicitly lateral) call.
    let comma_pos = source_query[..func_pos].rfind(',')?;

    let exclusion_cols = join_columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    let fresh_cte = format!(
        "{FRESH_CTE} AS (SELECT {exclusion_cols} FROM {} WHERE NOT ({matched_condition}))",
        quote_identifier(target_table),
    );
    let filter = format!(
        "{url_expr} NOT IN (SELECT {} FROM {FRESH_CTE})",
        quote_identifier(&join_columns[0]),
    );

    let before_comma = &source_query[..comma_pos];
    let after_comma = &source_query[comma_pos..];

    let before_lower = before_comma.to_lowercase();
    let has_where = match (before_lower.rfind(" where "), before_lower.rfind(" from ")) {
        (Some(w), Some(f)) => w > f,
        (Some(_), None) => true,
        _ => false,
    };
    let joiner = if has_where { " AND " } else { " WHERE " };
    let mut rewritten = format!("{before_comma}{joiner}{filter}{after_comma}");

    // Prepend the WITH clause, or extend an existing top-level CTE list by
    // inserting ahead of the top-level SELECT.
    let with_pos = find_top_level(&rewritten, "with", 0, true);
    let select_pos = find_top_level(&rewritten, "select", 0, true);
    rewritten = match (with_pos, select_pos) {
        (Some(w), Some(s)) if w < s => {
            format!("{}, {fresh_cte} {}", rewritten[..s].trim_end(), &rewritten[s..])
        }
        _ => format!("WITH {fresh_cte} {rewritten}"),
    };

    debug!(target_table, "condition pushdown rewrite applied");
    Some(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_named_param_into_crawl() {
        let out = inject_max_results("SELECT * FROM crawl(['https://h/a'])", 5);
        assert_eq!(out, "SELECT * FROM crawl(['https://h/a'], max_results := 5)");
    }

    #[test]
    fn injects_positional_into_crawl_url() {
        let out = inject_max_results("SELECT c.* FROM s, crawl_url(s.url) c", 10);
        assert_eq!(out, "SELECT c.* FROM s, crawl_url(s.url, 10) c");
    }

    #[test]
    fn skips_calls_that_already_limit() {
        let q = "SELECT * FROM crawl(['x'], max_results := 2)";
        assert_eq!(inject_max_results(q, 5), q);
        let q = "SELECT * FROM crawl_url(u, 3)";
        // Positional limits carry no marker; the call still gains nothing
        // only when max_results appears.
        assert_eq!(inject_max_results(q, 5), "SELECT * FROM crawl_url(u, 3, 5)");
    }

    #[test]
    fn ignores_names_inside_strings_and_identifiers() {
        let q = "SELECT 'crawl(x)' FROM crawl_stream(1)";
        assert_eq!(inject_max_results(q, 5), q);
    }

    #[test]
    fn handles_both_calls_in_one_query() {
        let q = "SELECT * FROM crawl(['a']) UNION ALL SELECT c.* FROM s, crawl_url(s.u) c";
        let out = inject_max_results(q, 2);
        assert!(out.contains("crawl(['a'], max_results := 2)"));
        assert!(out.contains("crawl_url(s.u, 2)"));
    }

    #[test]
    fn exclusion_rewrite_basic() {
        let q = "SELECT c.* FROM urls_to_crawl utc, crawl_url(utc.url) c";
        let out = rewrite_with_exclusion(q, "jobs", &["url".to_string()], "jobs.fresh = 1")
            .unwrap();
        assert!(out.starts_with(
            "WITH __fresh AS (SELECT \"url\" FROM \"jobs\" WHERE NOT (jobs.fresh = 1))"
        ));
        assert!(out.contains(
            "FROM urls_to_crawl utc WHERE utc.url NOT IN (SELECT \"url\" FROM __fresh), crawl_url(utc.url) c"
        ));
    }

    #[test]
    fn exclusion_rewrite_with_existing_where() {
        let q = "SELECT c.* FROM urls u WHERE u.active = 1, crawl_url(u.url) c";
        let out =
            rewrite_with_exclusion(q, "t", &["url".to_string()], "t.stale").unwrap();
        assert!(out.contains("WHERE u.active = 1 AND u.url NOT IN"));
    }

    #[test]
    fn exclusion_rewrite_takes_first_arg_only() {
        let q = "SELECT c.* FROM u, crawl_url(u.url, 10) c";
        let out = rewrite_with_exclusion(q, "t", &["url".to_string()], "t.stale").unwrap();
        assert!(out.contains("u.url NOT IN"));
        assert!(!out.contains("u.url, 10 NOT IN"));
    }

    #[test]
    fn exclusion_rewrite_declines_without_crawl_url() {
        let q = "SELECT * FROM crawl(['x'])";
        assert!(rewrite_with_exclusion(q, "t", &["url".to_string()], "cond").is_none());
        assert!(rewrite_with_exclusion("SELECT 1", "t", &[], "cond").is_none());
    }

    #[test]
    fn exclusion_rewrite_extends_existing_cte_list() {
        let q = "WITH seeds AS (SELECT url FROM raw) SELECT c.* FROM seeds s, crawl_url(s.url) c";
        let out = rewrite_with_exclusion(q, "t", &["url".to_string()], "t.stale").unwrap();
        assert!(out.starts_with("WITH seeds AS (SELECT url FROM raw), __fresh AS"));
        // Only one WITH keyword remains.
        assert_eq!(out.to_lowercase().matches("with ").count(), 1);
    }
}
