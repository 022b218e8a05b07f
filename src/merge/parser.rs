//! `CRAWLING MERGE INTO` parser shim.
//!
//! The shim recognizes the statement, strips the leading `CRAWLING`
//! keyword and a trailing `LIMIT n` clause, and hands the remaining MERGE
//! statement to the host statement parser. DuckDB-style `UPDATE BY NAME` /
//! `INSERT BY NAME` forms are not standard SQL, so they are recorded and
//! rewritten to parseable equivalents first; the recorded flags, not the
//! parsed assignment lists, drive the executor.

use regex::RegexBuilder;
use sqlparser::ast::{Expr, MergeAction, MergeClause, MergeClauseKind, Statement, TableFactor};
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;

use crate::utils::scan::position_in_string;

use super::rewrite::inject_max_results;
use super::{
    MatchedAction, MergeActionKind, MergePlan, NotMatchedAction, NotMatchedBySourceAction,
};
use crate::error::{CrawlError, Result};

const DEFAULT_BATCH_SIZE: i64 = 100;

/// Does this statement belong to the CRAWLING MERGE shim?
pub fn is_crawling_merge(sql: &str) -> bool {
    sql.trim_start()
        .to_lowercase()
        .starts_with("crawling merge into")
}

/// Trailing `LIMIT n` (after the last WHEN...THEN) is our extension, not
/// part of standard MERGE. Returns the statement without it plus the
/// limit.
fn split_row_limit(sql: &str) -> (String, i64) {
    let lower = sql.to_lowercase();
    let limit_pos = match lower.rfind(" limit ") {
        Some(p) => p,
        None => return (sql.to_string(), 0),
    };
    let then_pos = match lower.find("then") {
        Some(p) => p,
        None => return (sql.to_string(), 0),
    };
    if limit_pos <= then_pos {
        return (sql.to_string(), 0);
    }

    let mut after = sql[limit_pos + 7..].trim().to_string();
    if after.ends_with(';') {
        after.pop();
        after = after.trim_end().to_string();
    }
    let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return (sql.to_string(), 0);
    }
    let limit = digits.parse().unwrap_or(0);
    (sql[..limit_pos].trim_end().to_string(), limit)
}

#[derive(Debug, Default, Clone, Copy)]
struct ByNameFlags {
    matched_update: bool,
    insert: bool,
    source_update: bool,
}

/// Replace `UPDATE BY NAME` / `INSERT BY NAME` with parseable sentinels and
/// record which WHEN clause each occurrence belonged to.
fn normalize_by_name(sql: &str) -> (String, ByNameFlags) {
    let by_name = RegexBuilder::new(r"\b(update|insert)\s+by\s+name\b")
        .case_insensitive(true)
        .build()
        .expect("static regex");
    let matched_clause = RegexBuilder::new(r"\bwhen\s+matched\b")
        .case_insensitive(true)
        .build()
        .expect("static regex");
    let source_clause = RegexBuilder::new(r"\bwhen\s+not\s+matched\s+by\s+source\b")
        .case_insensitive(true)
        .build()
        .expect("static regex");

    let matched_starts: Vec<usize> = matched_clause
        .find_iter(sql)
        .map(|m| m.start())
        .filter(|&p| !position_in_string(sql, p))
        .collect();
    let source_starts: Vec<usize> = source_clause
        .find_iter(sql)
        .map(|m| m.start())
        .filter(|&p| !position_in_string(sql, p))
        .collect();

    let mut flags = ByNameFlags::default();
    let mut replacements: Vec<(usize, usize, &'static str)> = Vec::new();

    for found in by_name.find_iter(sql) {
        if position_in_string(sql, found.start()) {
            continue;
        }
        let is_update = sql[found.start()..]
            .to_lowercase()
            .starts_with("update");
        let in_source_clause = source_starts.iter().any(|&s| {
            s < found.start()
                && matched_starts
                    .iter()
                    .all(|&m| m <= s || m > found.start())
        });
        if is_update {
            if in_source_clause {
                flags.source_update = true;
            } else {
                flags.matched_update = true;
            }
            replacements.push((
                found.start(),
                found.end(),
                "UPDATE SET \"__merge_all_columns\" = TRUE",
            ));
        } else {
            flags.insert = true;
            replacements.push((
                found.start(),
                found.end(),
                "INSERT (\"__merge_all_columns\") VALUES (TRUE)",
            ));
        }
    }

    let mut normalized = sql.to_string();
    for (start, end, replacement) in replacements.into_iter().rev() {
        normalized.replace_range(start..end, replacement);
    }
    (normalized, flags)
}

/// Collect column names reachable from equality comparisons in the join
/// condition, for UPDATE BY NAME exclusion and pushdown filters.
fn collect_join_columns(expr: &Expr, columns: &mut Vec<String>) {
    match expr {
        Expr::Nested(inner) => collect_join_columns(inner, columns),
        Expr::BinaryOp { left, op, right } => {
            use sqlparser::ast::BinaryOperator;
            match op {
                BinaryOperator::Eq => {
                    collect_column_refs(left, columns);
                    collect_column_refs(right, columns);
                }
                _ => {
                    collect_join_columns(left, columns);
                    collect_join_columns(right, columns);
                }
            }
        }
        Expr::IsNotDistinctFrom(left, right) => {
            collect_column_refs(left, columns);
            collect_column_refs(right, columns);
        }
        _ => {}
    }
}

fn collect_column_refs(expr: &Expr, columns: &mut Vec<String>) {
    match expr {
        Expr::Identifier(ident) => columns.push(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => {
            if let Some(last) = parts.last() {
                columns.push(last.value.clone());
            }
        }
        Expr::Nested(inner) => collect_column_refs(inner, columns),
        _ => {}
    }
}

fn table_factor_parts(factor: &TableFactor) -> (String, String, bool) {
    match factor {
        TableFactor::Table { name, alias, .. } => (
            name.to_string(),
            alias.as_ref().map(|a| a.name.value.clone()).unwrap_or_default(),
            false,
        ),
        TableFactor::Derived {
            subquery, alias, ..
        } => (
            subquery.to_string(),
            alias.as_ref().map(|a| a.name.value.clone()).unwrap_or_default(),
            true,
        ),
        other => (other.to_string(), String::new(), false),
    }
}

/// Column/expression pairs from an UPDATE action's SET list, rendered back
/// to SQL text. The sentinel column from BY NAME normalization is dropped.
fn assignment_pairs(assignments: &[sqlparser::ast::Assignment]) -> Vec<(String, String)> {
    assignments
        .iter()
        .filter_map(|assignment| {
            let text = assignment.to_string();
            let (target, value) = text.split_once('=')?;
            let column = target
                .trim()
                .rsplit('.')
                .next()
                .unwrap_or("")
                .trim_matches('"')
                .to_string();
            if column == "__merge_all_columns" {
                return None;
            }
            Some((column, value.trim().to_string()))
        })
        .collect()
}

fn syntax(msg: impl Into<String>) -> CrawlError {
    CrawlError::Syntax(format!("CRAWLING MERGE INTO: {}", msg.into()))
}

/// Parse a `CRAWLING MERGE INTO` statement into a [`MergePlan`].
pub fn parse_crawling_merge(sql: &str) -> Result<MergePlan> {
    let trimmed = sql.trim();
    if !is_crawling_merge(trimmed) {
        return Err(syntax("expected 'CRAWLING MERGE INTO'"));
    }

    let (without_limit, row_limit) = split_row_limit(trimmed);

    // Strip the leading CRAWLING keyword. Standalone LATERAL keywords go
    // too: comma-joined table functions are implicitly lateral in this
    // dialect, and the statement parser does not accept the keyword there.
    let mut merge_sql = without_limit["crawling".len()..].trim_start().to_string();
    if merge_sql.ends_with(';') {
        merge_sql.pop();
        merge_sql = merge_sql.trim_end().to_string();
    }
    let merge_sql = crate::utils::scan::strip_lateral(&merge_sql);

    let (normalized, by_name) = normalize_by_name(&merge_sql);

    let statements = Parser::parse_sql(&DuckDbDialect {}, &normalized)
        .map_err(|e| syntax(format!("syntax error: {e}")))?;
    if statements.len() != 1 {
        return Err(syntax("expected a single MERGE statement"));
    }

    let (table, source, on, clauses) = match statements.into_iter().next().unwrap() {
        Statement::Merge {
            table,
            source,
            on,
            clauses,
            ..
        } => (table, source, on, clauses),
        other => {
            return Err(syntax(format!(
                "expected MERGE INTO statement, got {other}"
            )))
        }
    };

    if clauses.is_empty() {
        return Err(syntax("at least one WHEN clause is required"));
    }

    let (target_table, _, _) = table_factor_parts(&table);
    let (source_text, source_alias, is_subquery) = table_factor_parts(&source);
    let mut source_query = if is_subquery {
        source_text
    } else {
        format!("SELECT * FROM {source_text}")
    };

    let join_condition = on.to_string();
    let mut join_columns = Vec::new();
    collect_join_columns(&on, &mut join_columns);
    join_columns.dedup();

    let mut plan = MergePlan {
        target_table,
        source_alias,
        join_condition,
        join_columns,
        row_limit,
        batch_size: DEFAULT_BATCH_SIZE,
        ..Default::default()
    };

    for clause in &clauses {
        apply_clause(&mut plan, clause, by_name)?;
    }
    if plan.matched.is_none() && plan.not_matched.is_none() && plan.not_matched_by_source.is_none()
    {
        return Err(syntax("at least one WHEN clause is required"));
    }

    if plan.row_limit > 0 {
        source_query = inject_max_results(&source_query, plan.row_limit);
    }
    plan.source_query = source_query;

    Ok(plan)
}

fn apply_clause(plan: &mut MergePlan, clause: &MergeClause, by_name: ByNameFlags) -> Result<()> {
    let predicate = clause.predicate.as_ref().map(|p| p.to_string());
    match clause.clause_kind {
        MergeClauseKind::Matched => {
            if plan.matched.is_some() {
                return Ok(()); // first action per class wins
            }
            let (action, by_name_flag) = match &clause.action {
                MergeAction::Delete => (MergeActionKind::Delete, false),
                MergeAction::Update { .. } => (MergeActionKind::Update, by_name.matched_update),
                MergeAction::Insert(_) => {
                    return Err(syntax("WHEN MATCHED cannot INSERT"));
                }
            };
            plan.matched = Some(MatchedAction {
                condition: predicate,
                action,
                by_name: by_name_flag,
            });
        }
        MergeClauseKind::NotMatched | MergeClauseKind::NotMatchedByTarget => {
            if plan.not_matched.is_some() {
                return Ok(());
            }
            match &clause.action {
                MergeAction::Insert(_) => {
                    plan.not_matched = Some(NotMatchedAction {
                        by_name: by_name.insert,
                    });
                }
                _ => return Err(syntax("WHEN NOT MATCHED must INSERT")),
            }
        }
        MergeClauseKind::NotMatchedBySource => {
            if plan.not_matched_by_source.is_some() {
                return Ok(());
            }
            let action = match &clause.action {
                MergeAction::Delete => NotMatchedBySourceAction {
                    condition: predicate,
                    action: MergeActionKind::Delete,
                    by_name: false,
                    set_clauses: Vec::new(),
                },
                MergeAction::Update { assignments } => NotMatchedBySourceAction {
                    condition: predicate,
                    action: MergeActionKind::Update,
                    by_name: by_name.source_update,
                    set_clauses: assignment_pairs(assignments),
                },
                MergeAction::Insert(_) => {
                    return Err(syntax("WHEN NOT MATCHED BY SOURCE cannot INSERT"));
                }
            };
            plan.not_matched_by_source = Some(action);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MERGE_SQL: &str = "CRAWLING MERGE INTO jobs \
        USING (SELECT c.* FROM seeds s, crawl_url(s.url) c) src \
        ON (src.url = jobs.url) \
        WHEN MATCHED AND jobs.stale = 1 THEN UPDATE BY NAME \
        WHEN NOT MATCHED THEN INSERT BY NAME \
        LIMIT 10";

    #[test]
    fn recognizes_statement() {
        assert!(is_crawling_merge("  crawling merge into t USING x ON y"));
        assert!(is_crawling_merge("CRAWLING MERGE INTO t ..."));
        assert!(!is_crawling_merge("MERGE INTO t ..."));
        assert!(!is_crawling_merge("SELECT 1"));
    }

    #[test]
    fn parses_full_statement() {
        let plan = parse_crawling_merge(MERGE_SQL).unwrap();
        assert_eq!(plan.target_table, "jobs");
        assert_eq!(plan.source_alias, "src");
        assert_eq!(plan.row_limit, 10);
        assert_eq!(plan.join_columns, vec!["url"]);
        assert!(plan.join_condition.contains("src.url"));

        let matched = plan.matched.as_ref().unwrap();
        assert!(matched.by_name);
        assert_eq!(matched.action, MergeActionKind::Update);
        assert_eq!(matched.condition.as_deref(), Some("jobs.stale = 1"));

        assert!(plan.not_matched.as_ref().unwrap().by_name);
        assert!(plan.not_matched_by_source.is_none());

        // The row limit reached the crawl_url call as a positional arg.
        assert!(plan.source_query.contains("crawl_url(s.url, 10)"));
    }

    #[test]
    fn table_reference_source_becomes_select_star() {
        let plan = parse_crawling_merge(
            "CRAWLING MERGE INTO t USING staged ON (staged.url = t.url) \
             WHEN NOT MATCHED THEN INSERT BY NAME",
        )
        .unwrap();
        assert_eq!(plan.source_query, "SELECT * FROM staged");
        assert_eq!(plan.row_limit, 0);
    }

    #[test]
    fn matched_delete_and_source_clauses() {
        let plan = parse_crawling_merge(
            "CRAWLING MERGE INTO t USING (SELECT 1 AS url) s ON (s.url = t.url) \
             WHEN MATCHED THEN DELETE \
             WHEN NOT MATCHED BY SOURCE AND t.keep = 0 THEN UPDATE SET active = false",
        )
        .unwrap();
        assert_eq!(plan.matched.as_ref().unwrap().action, MergeActionKind::Delete);
        let nmbs = plan.not_matched_by_source.as_ref().unwrap();
        assert_eq!(nmbs.action, MergeActionKind::Update);
        assert!(!nmbs.by_name);
        assert_eq!(nmbs.condition.as_deref(), Some("t.keep = 0"));
        assert_eq!(nmbs.set_clauses, vec![("active".to_string(), "false".to_string())]);
    }

    #[test]
    fn not_matched_by_source_delete() {
        let plan = parse_crawling_merge(
            "CRAWLING MERGE INTO t USING (SELECT 1 AS url) s ON (s.url = t.url) \
             WHEN NOT MATCHED THEN INSERT BY NAME \
             WHEN NOT MATCHED BY SOURCE THEN DELETE",
        )
        .unwrap();
        let nmbs = plan.not_matched_by_source.as_ref().unwrap();
        assert_eq!(nmbs.action, MergeActionKind::Delete);
        assert!(nmbs.condition.is_none());
    }

    #[test]
    fn limit_requires_digits_and_when_clause() {
        let err = parse_crawling_merge("CRAWLING MERGE INTO t USING s ON (s.a = t.a)");
        assert!(err.is_err());

        let plan = parse_crawling_merge(
            "CRAWLING MERGE INTO t USING s ON (s.url = t.url) \
             WHEN NOT MATCHED THEN INSERT BY NAME LIMIT 5;",
        )
        .unwrap();
        assert_eq!(plan.row_limit, 5);
    }

    #[test]
    fn by_name_normalization_is_string_safe() {
        let (normalized, flags) =
            normalize_by_name("WHEN MATCHED THEN UPDATE BY NAME -- 'insert by name'");
        assert!(flags.matched_update);
        assert!(!flags.insert);
        assert!(normalized.contains("UPDATE SET \"__merge_all_columns\" = TRUE"));
    }
}
