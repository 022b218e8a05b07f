//! Merge executor: runs the source query through the table-function
//! bridge and applies INSERT / UPDATE BY NAME / DELETE row by row against
//! the target table, with condition pushdown so rows the merge would
//! reject are never fetched.

use std::collections::HashSet;

use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use tracing::{debug, warn};

use super::args::MergeArgs;
use super::rewrite::rewrite_with_exclusion;
use super::{MergeActionKind, MergePlan};
use crate::crawl::CrawlContext;
use crate::error::{CrawlError, Result};
use crate::host::bridge::open_source;
use crate::host::{query_rows, sql_literal, table_exists, value_to_string};
use crate::utils::sql::{is_valid_identifier, quote_identifier};

/// Join-key part separator (unit separator).
const KEY_SEP: char = '\u{1f}';

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCounters {
    pub rows_inserted: i64,
    pub rows_updated: i64,
    pub rows_deleted: i64,
}

/// Case-insensitive replacement of `pattern` by `replacement` at
/// identifier boundaries.
fn replace_identifier_ci(text: &str, pattern: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = 0usize;
    let lower = text.to_lowercase();
    let pat = pattern.to_lowercase();
    let bytes = text.as_bytes();
    let mut from = 0usize;
    while let Some(pos) = lower[from..].find(&pat).map(|p| p + from) {
        let after = pos + pat.len();
        let boundary = (pos == 0 || !bytes[pos - 1].is_ascii_alphanumeric() && bytes[pos - 1] != b'_')
            && (after >= bytes.len()
                || !bytes[after].is_ascii_alphanumeric() && bytes[after] != b'_');
        if boundary {
            out.push_str(&text[rest..pos]);
            out.push_str(replacement);
            rest = after;
        }
        from = after;
    }
    out.push_str(&text[rest..]);
    out
}

pub struct MergeExecutor {
    ctx: CrawlContext,
    plan: MergePlan,
}

impl MergeExecutor {
    pub fn new(ctx: CrawlContext, args: MergeArgs) -> Self {
        Self {
            ctx,
            plan: args.to_plan(),
        }
    }

    pub fn from_plan(ctx: CrawlContext, plan: MergePlan) -> Self {
        Self { ctx, plan }
    }

    /// Run the merge and return the operation counters.
    pub async fn execute(&self) -> Result<MergeCounters> {
        if !is_valid_identifier(&self.plan.target_table) {
            return Err(CrawlError::InvalidIdentifier(self.plan.target_table.clone()));
        }

        // Publish the shared limit so per-row crawls inside the source
        // query stop once enough rows have been collected.
        if self.plan.row_limit > 0 {
            self.ctx
                .registry
                .init(self.ctx.db.id(), self.plan.row_limit);
        }
        let result = self.run().await;
        if self.plan.row_limit > 0 {
            self.ctx.registry.clear(self.ctx.db.id());
        }
        result
    }

    async fn run(&self) -> Result<MergeCounters> {
        let conn = self.ctx.db.connect()?;
        let target = quote_identifier(&self.plan.target_table);

        // Condition pushdown: skip fetching rows whose join key exists in
        // the target but whose MATCHED AND-condition is already false.
        let mut effective_query = self.plan.source_query.clone();
        if let Some(matched) = &self.plan.matched {
            if let Some(condition) = &matched.condition {
                if !self.plan.join_columns.is_empty()
                    && table_exists(&conn, &self.plan.target_table)?
                {
                    if let Some(rewritten) = rewrite_with_exclusion(
                        &self.plan.source_query,
                        &self.plan.target_table,
                        &self.plan.join_columns,
                        condition,
                    ) {
                        effective_query = rewritten;
                    }
                }
            }
        }

        let mut stream = match open_source(&self.ctx, &effective_query).await {
            Ok(stream) => stream,
            Err(e) if effective_query != self.plan.source_query => {
                warn!(error = %e, "pushdown rewrite failed, falling back to original source query");
                open_source(&self.ctx, &self.plan.source_query).await?
            }
            Err(e) => return Err(e),
        };

        let col_names = stream.columns();
        let col_types = stream.types();

        let first_row = stream.next_row().await?;
        if first_row.is_some() && !table_exists(&conn, &self.plan.target_table)? {
            let columns = col_names
                .iter()
                .zip(col_types.iter())
                .map(|(name, ty)| format!("{} {ty}", quote_identifier(name)))
                .collect::<Vec<_>>()
                .join(", ");
            conn.execute(&format!("CREATE TABLE {target} ({columns})"), [])?;
            debug!(table = %self.plan.target_table, "created merge target");
        }

        let mut counters = MergeCounters::default();
        let mut total_processed = 0i64;
        let mut source_keys: HashSet<String> = HashSet::new();

        let mut pending = first_row;
        while let Some(row) = pending.take() {
            if self.plan.row_limit > 0 && total_processed >= self.plan.row_limit {
                break;
            }
            self.process_row(&conn, &col_names, &row, &mut counters, &mut total_processed, &mut source_keys);
            pending = stream.next_row().await?;
        }

        self.not_matched_by_source_sweep(&conn, &source_keys, &mut counters)?;
        Ok(counters)
    }

    fn join_key(&self, col_names: &[String], row: &[SqlValue]) -> String {
        let mut key = String::new();
        for (i, join_col) in self.plan.join_columns.iter().enumerate() {
            if i > 0 {
                key.push(KEY_SEP);
            }
            let idx = col_names
                .iter()
                .position(|c| c.eq_ignore_ascii_case(join_col));
            if let Some(idx) = idx {
                key.push_str(&value_to_string(&row[idx]));
            }
        }
        key
    }

    /// The join condition with `alias.column` references replaced by the
    /// source row's literals.
    fn bound_join_condition(&self, col_names: &[String], row: &[SqlValue]) -> String {
        let mut clause = self.plan.join_condition.clone();
        if self.plan.source_alias.is_empty() {
            return clause;
        }
        for (i, name) in col_names.iter().enumerate() {
            let col_ref = format!("{}.{}", self.plan.source_alias, name);
            clause = replace_identifier_ci(&clause, &col_ref, &sql_literal(&row[i]));
        }
        clause
    }

    fn row_exists(&self, conn: &Connection, where_clause: &str) -> bool {
        let sql = format!(
            "SELECT 1 FROM {} WHERE {where_clause} LIMIT 1",
            quote_identifier(&self.plan.target_table)
        );
        match conn.prepare(&sql).and_then(|mut stmt| stmt.exists([])) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "existence check failed");
                false
            }
        }
    }

    fn matched_condition_holds(
        &self,
        conn: &Connection,
        where_clause: &str,
        condition: Option<&str>,
    ) -> bool {
        let condition = match condition {
            Some(c) => c,
            None => return true,
        };
        let sql = format!(
            "SELECT 1 FROM {} WHERE {where_clause} AND ({condition}) LIMIT 1",
            quote_identifier(&self.plan.target_table)
        );
        match conn.prepare(&sql).and_then(|mut stmt| stmt.exists([])) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "matched condition check failed");
                false
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_row(
        &self,
        conn: &Connection,
        col_names: &[String],
        row: &[SqlValue],
        counters: &mut MergeCounters,
        total_processed: &mut i64,
        source_keys: &mut HashSet<String>,
    ) {
        let target = quote_identifier(&self.plan.target_table);

        if self.plan.not_matched_by_source.is_some() && !self.plan.join_columns.is_empty() {
            source_keys.insert(self.join_key(col_names, row));
        }

        let where_clause = self.bound_join_condition(col_names, row);
        let exists = self.row_exists(conn, &where_clause);

        if exists {
            let matched = match &self.plan.matched {
                Some(m) => m,
                None => return,
            };
            if !self.matched_condition_holds(conn, &where_clause, matched.condition.as_deref()) {
                return;
            }
            match matched.action {
                MergeActionKind::Delete => {
                    let sql = format!("DELETE FROM {target} WHERE {where_clause}");
                    match conn.execute(&sql, []) {
                        Ok(_) => {
                            counters.rows_deleted += 1;
                            *total_processed += 1;
                        }
                        Err(e) => warn!(error = %e, "merge delete failed"),
                    }
                }
                MergeActionKind::Update => {
                    let sets = col_names
                        .iter()
                        .enumerate()
                        .filter(|(_, name)| {
                            !self
                                .plan
                                .join_columns
                                .iter()
                                .any(|jc| jc.eq_ignore_ascii_case(name))
                        })
                        .map(|(i, name)| {
                            format!("{} = {}", quote_identifier(name), sql_literal(&row[i]))
                        })
                        .collect::<Vec<_>>();
                    if sets.is_empty() {
                        return;
                    }
                    let sql = format!(
                        "UPDATE {target} SET {} WHERE {where_clause}",
                        sets.join(", ")
                    );
                    match conn.execute(&sql, []) {
                        Ok(_) => {
                            counters.rows_updated += 1;
                            *total_processed += 1;
                        }
                        Err(e) => warn!(error = %e, "merge update failed"),
                    }
                }
            }
        } else if self.plan.not_matched.is_some() {
            let columns = col_names
                .iter()
                .map(|name| quote_identifier(name))
                .collect::<Vec<_>>()
                .join(", ");
            let values = row
                .iter()
                .map(sql_literal)
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!("INSERT INTO {target} ({columns}) VALUES ({values})");
            match conn.execute(&sql, []) {
                Ok(_) => {
                    counters.rows_inserted += 1;
                    *total_processed += 1;
                }
                Err(e) => warn!(error = %e, "merge insert failed"),
            }
        }
    }

    /// Target rows whose join key never appeared in the source get their
    /// own action: DELETE or a SET-clause-driven UPDATE.
    fn not_matched_by_source_sweep(
        &self,
        conn: &Connection,
        source_keys: &HashSet<String>,
        counters: &mut MergeCounters,
    ) -> Result<()> {
        let nmbs = match &self.plan.not_matched_by_source {
            Some(action) => action,
            None => return Ok(()),
        };
        if self.plan.join_columns.is_empty() || !table_exists(conn, &self.plan.target_table)? {
            return Ok(());
        }
        let target = quote_identifier(&self.plan.target_table);

        let key_cols = self
            .plan
            .join_columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut keys_sql = format!("SELECT {key_cols} FROM {target}");
        if let Some(condition) = &nmbs.condition {
            keys_sql.push_str(&format!(" WHERE {condition}"));
        }
        let target_keys = match query_rows(conn, &keys_sql) {
            Ok(set) => set,
            Err(e) => {
                warn!(error = %e, "NOT MATCHED BY SOURCE key query failed");
                return Ok(());
            }
        };

        for row in &target_keys.rows {
            let key = row
                .iter()
                .map(value_to_string)
                .collect::<Vec<_>>()
                .join(&KEY_SEP.to_string());
            if source_keys.contains(&key) {
                continue;
            }

            let where_clause = self
                .plan
                .join_columns
                .iter()
                .zip(row.iter())
                .map(|(col, value)| match value {
                    SqlValue::Null => format!("{} IS NULL", quote_identifier(col)),
                    other => format!("{} = {}", quote_identifier(col), sql_literal(other)),
                })
                .collect::<Vec<_>>()
                .join(" AND ");

            match nmbs.action {
                MergeActionKind::Delete => {
                    let sql = format!("DELETE FROM {target} WHERE {where_clause}");
                    match conn.execute(&sql, []) {
                        Ok(_) => counters.rows_deleted += 1,
                        Err(e) => warn!(error = %e, "NOT MATCHED BY SOURCE delete failed"),
                    }
                }
                MergeActionKind::Update => {
                    if nmbs.set_clauses.is_empty() {
                        continue;
                    }
                    let sets = nmbs
                        .set_clauses
                        .iter()
                        .map(|(col, expr)| format!("{} = {expr}", quote_identifier(col)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let sql = format!("UPDATE {target} SET {sets} WHERE {where_clause}");
                    match conn.execute(&sql, []) {
                        Ok(_) => counters.rows_updated += 1,
                        Err(e) => warn!(error = %e, "NOT MATCHED BY SOURCE update failed"),
                    }
                }
            }
        }
        Ok(())
    }
}
