//! All-scalar argument form exchanged between the parser shim and the
//! merge executor, mirroring the host's table-function call boundary:
//! join columns travel as CSV, NOT MATCHED BY SOURCE SET clauses as
//! `col=expr;col=expr`.

use super::{
    MatchedAction, MergeActionKind, MergePlan, NotMatchedAction, NotMatchedBySourceAction,
};

const ACTION_UPDATE: i32 = 0;
const ACTION_DELETE: i32 = 1;

#[derive(Debug, Clone, Default)]
pub struct MergeArgs {
    pub source_query: String,
    pub source_alias: String,
    pub target_table: String,
    pub join_condition: String,
    pub join_columns: String,

    pub has_matched: bool,
    pub matched_condition: String,
    pub matched_action: i32,
    pub matched_update_by_name: bool,

    pub has_not_matched: bool,
    pub not_matched_insert_by_name: bool,

    pub has_not_matched_by_source: bool,
    pub not_matched_by_source_condition: String,
    pub not_matched_by_source_action: i32,
    pub not_matched_by_source_update_by_name: bool,
    pub not_matched_by_source_set_clauses: String,

    pub row_limit: i64,
    pub batch_size: i64,
}

fn action_code(kind: MergeActionKind) -> i32 {
    match kind {
        MergeActionKind::Update => ACTION_UPDATE,
        MergeActionKind::Delete => ACTION_DELETE,
    }
}

fn code_action(code: i32) -> MergeActionKind {
    if code == ACTION_DELETE {
        MergeActionKind::Delete
    } else {
        MergeActionKind::Update
    }
}

impl MergeArgs {
    pub fn from_plan(plan: &MergePlan) -> Self {
        let mut args = Self {
            source_query: plan.source_query.clone(),
            source_alias: plan.source_alias.clone(),
            target_table: plan.target_table.clone(),
            join_condition: plan.join_condition.clone(),
            join_columns: plan.join_columns.join(","),
            row_limit: plan.row_limit,
            batch_size: plan.batch_size,
            ..Default::default()
        };

        if let Some(matched) = &plan.matched {
            args.has_matched = true;
            args.matched_condition = matched.condition.clone().unwrap_or_default();
            args.matched_action = action_code(matched.action);
            args.matched_update_by_name = matched.by_name;
        }
        if let Some(not_matched) = &plan.not_matched {
            args.has_not_matched = true;
            args.not_matched_insert_by_name = not_matched.by_name;
        }
        if let Some(nmbs) = &plan.not_matched_by_source {
            args.has_not_matched_by_source = true;
            args.not_matched_by_source_condition = nmbs.condition.clone().unwrap_or_default();
            args.not_matched_by_source_action = action_code(nmbs.action);
            args.not_matched_by_source_update_by_name = nmbs.by_name;
            args.not_matched_by_source_set_clauses = nmbs
                .set_clauses
                .iter()
                .map(|(col, expr)| format!("{col}={expr}"))
                .collect::<Vec<_>>()
                .join(";");
        }
        args
    }

    /// Decode back into the plan the executor works from.
    pub fn to_plan(&self) -> MergePlan {
        let join_columns = if self.join_columns.is_empty() {
            Vec::new()
        } else {
            self.join_columns
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect()
        };

        let matched = self.has_matched.then(|| MatchedAction {
            condition: non_empty(&self.matched_condition),
            action: code_action(self.matched_action),
            by_name: self.matched_update_by_name,
        });
        let not_matched = self.has_not_matched.then(|| NotMatchedAction {
            by_name: self.not_matched_insert_by_name,
        });
        let not_matched_by_source = self.has_not_matched_by_source.then(|| {
            let set_clauses = self
                .not_matched_by_source_set_clauses
                .split(';')
                .filter_map(|clause| {
                    clause
                        .split_once('=')
                        .map(|(col, expr)| (col.trim().to_string(), expr.trim().to_string()))
                })
                .collect();
            NotMatchedBySourceAction {
                condition: non_empty(&self.not_matched_by_source_condition),
                action: code_action(self.not_matched_by_source_action),
                by_name: self.not_matched_by_source_update_by_name,
                set_clauses,
            }
        });

        MergePlan {
            target_table: self.target_table.clone(),
            source_query: self.source_query.clone(),
            source_alias: self.source_alias.clone(),
            join_condition: self.join_condition.clone(),
            join_columns,
            matched,
            not_matched,
            not_matched_by_source,
            row_limit: self.row_limit,
            batch_size: self.batch_size,
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let plan = MergePlan {
            target_table: "jobs".into(),
            source_query: "SELECT 1".into(),
            source_alias: "src".into(),
            join_condition: "src.url = jobs.url".into(),
            join_columns: vec!["url".into()],
            matched: Some(MatchedAction {
                condition: Some("jobs.stale".into()),
                action: MergeActionKind::Update,
                by_name: true,
            }),
            not_matched: Some(NotMatchedAction { by_name: true }),
            not_matched_by_source: Some(NotMatchedBySourceAction {
                condition: None,
                action: MergeActionKind::Update,
                by_name: false,
                set_clauses: vec![("active".into(), "false".into())],
            }),
            row_limit: 10,
            batch_size: 100,
        };

        let args = MergeArgs::from_plan(&plan);
        assert_eq!(args.join_columns, "url");
        assert_eq!(args.not_matched_by_source_set_clauses, "active=false");

        let decoded = args.to_plan();
        assert_eq!(decoded.target_table, "jobs");
        assert_eq!(decoded.join_columns, vec!["url"]);
        let matched = decoded.matched.unwrap();
        assert_eq!(matched.condition.as_deref(), Some("jobs.stale"));
        assert!(matched.by_name);
        let nmbs = decoded.not_matched_by_source.unwrap();
        assert_eq!(nmbs.set_clauses, vec![("active".to_string(), "false".to_string())]);
        assert_eq!(decoded.row_limit, 10);
    }
}
