//! `CRAWLING MERGE` — statement recognition, planning, source-query
//! rewrites, and the upsert executor.

pub mod args;
pub mod executor;
pub mod parser;
pub mod rewrite;

use crate::crawl::CrawlContext;
use crate::error::Result;

/// Parse and execute a `CRAWLING MERGE INTO` statement, returning
/// `(rows_inserted, rows_updated, rows_deleted)`.
pub async fn execute_crawling_merge(
    ctx: CrawlContext,
    sql: &str,
) -> Result<executor::MergeCounters> {
    let plan = parser::parse_crawling_merge(sql)?;
    let args = args::MergeArgs::from_plan(&plan);
    executor::MergeExecutor::new(ctx, args).execute().await
}

/// Action performed by a WHEN clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeActionKind {
    #[default]
    Update,
    Delete,
}

/// WHEN MATCHED clause.
#[derive(Debug, Clone, Default)]
pub struct MatchedAction {
    /// Optional AND-condition re-checked against the target row.
    pub condition: Option<String>,
    pub action: MergeActionKind,
    /// UPDATE BY NAME: set every source column except the join columns.
    pub by_name: bool,
}

/// WHEN NOT MATCHED [BY TARGET] clause.
#[derive(Debug, Clone, Default)]
pub struct NotMatchedAction {
    pub by_name: bool,
}

/// WHEN NOT MATCHED BY SOURCE clause.
#[derive(Debug, Clone, Default)]
pub struct NotMatchedBySourceAction {
    pub condition: Option<String>,
    pub action: MergeActionKind,
    pub by_name: bool,
    /// Explicit SET clauses as (column, expression SQL) pairs.
    pub set_clauses: Vec<(String, String)>,
}

/// Parsed `CRAWLING MERGE INTO` statement.
#[derive(Debug, Clone, Default)]
pub struct MergePlan {
    pub target_table: String,
    pub source_query: String,
    pub source_alias: String,
    pub join_condition: String,
    /// Column names reachable from equalities in the join condition.
    pub join_columns: Vec<String>,
    pub matched: Option<MatchedAction>,
    pub not_matched: Option<NotMatchedAction>,
    pub not_matched_by_source: Option<NotMatchedBySourceAction>,
    /// Trailing LIMIT; 0 = unlimited.
    pub row_limit: i64,
    pub batch_size: i64,
}
