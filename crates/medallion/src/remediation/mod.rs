//! Automatic, idempotent fixes for detected issues.
//!
//! [`RemediationEngine::remediate`] walks the issues in order and applies the
//! fix that matches each issue type. Every fix re-checks its precondition on
//! the current frame, so replaying the same issues against the output is a
//! no-op. Actions are appended to a caller-owned [`RemediationLog`].

use crate::error::Result;
use crate::types::{ActionKind, ActionStatus, Issue, IssueType, RemediationAction};
use crate::utils::{
    deduplicate_stable, f64_values, filter_rows, is_numeric_dtype, percentage, trim_text_series,
};
use polars::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Null percentage above which a HIGH_NULL_RATE column is dropped.
pub const DROP_COLUMN_NULL_PERCENTAGE: f64 = 80.0;

/// Number of actions kept in [`RemediationSummary::recent_actions`].
const RECENT_ACTIONS: usize = 10;

/// Append-only audit log of remediation actions across runs.
#[derive(Debug, Clone, Default)]
pub struct RemediationLog {
    actions: Vec<RemediationAction>,
}

impl RemediationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> &[RemediationAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn record(&mut self, action: RemediationAction) {
        self.actions.push(action);
    }

    /// Totals, counts per action kind and the most recent actions.
    pub fn summary(&self) -> RemediationSummary {
        let mut action_types = BTreeMap::new();
        for action in &self.actions {
            *action_types.entry(action.action.as_str().to_string()).or_insert(0) += 1;
        }

        let start = self.actions.len().saturating_sub(RECENT_ACTIONS);
        RemediationSummary {
            total_actions: self.actions.len(),
            action_types,
            recent_actions: self.actions[start..].to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemediationSummary {
    pub total_actions: usize,
    pub action_types: BTreeMap<String, usize>,
    pub recent_actions: Vec<RemediationAction>,
}

/// Applies bounded fixes for detected issues.
pub struct RemediationEngine;

impl RemediationEngine {
    /// Fix `issues` in order, returning the new frame and this pass's actions.
    ///
    /// Issue types without a fix are ignored and produce no action.
    pub fn remediate(
        df: DataFrame,
        issues: &[Issue],
        log: &mut RemediationLog,
    ) -> Result<(DataFrame, Vec<RemediationAction>)> {
        info!("Starting auto-remediation for {} issues", issues.len());

        let mut current = df;
        let mut actions = Vec::new();

        for issue in issues {
            let (next, action) = match issue.issue_type {
                IssueType::Whitespace => Self::trim_whitespace(&current, issue)?,
                IssueType::Duplicates => Self::remove_duplicates(&current, issue)?,
                IssueType::NegativeValues => Self::filter_negatives(&current, issue)?,
                IssueType::HighNullRate => Self::drop_null_column(&current, issue)?,
                _ => {
                    debug!("No remediation for {} on {}", issue.issue_type, issue.column);
                    continue;
                }
            };

            if let Some(next) = next {
                current = next;
            }
            log.record(action.clone());
            actions.push(action);
        }

        let applied = actions.iter().filter(|a| a.is_success()).count();
        info!(
            "Remediation complete: {} actions taken, {} skipped",
            applied,
            actions.len() - applied
        );

        Ok((current, actions))
    }

    fn skipped(issue: &Issue, kind: ActionKind, reason: impl Into<String>) -> Step {
        (
            None,
            RemediationAction::new(issue, kind, ActionStatus::Skipped).with_reason(reason),
        )
    }

    fn trim_whitespace(df: &DataFrame, issue: &Issue) -> Result<Step> {
        let kind = ActionKind::TrimmedWhitespace;
        let Some(name) = issue.column.column_name() else {
            return Ok(Self::skipped(issue, kind, "issue names no column"));
        };
        let Ok(column) = df.column(name) else {
            return Ok(Self::skipped(issue, kind, "column not present"));
        };
        if column.dtype() != &DataType::String {
            return Ok(Self::skipped(issue, kind, "column is not text"));
        }

        let (trimmed, changed) = trim_text_series(column.as_materialized_series())?;
        if changed == 0 {
            return Ok(Self::skipped(issue, kind, "no values to trim"));
        }

        let mut next = df.clone();
        next.replace(name, trimmed)?;
        let action = RemediationAction::new(issue, kind, ActionStatus::Success)
            .with_reason(format!("{} values trimmed", changed));
        Ok((Some(next), action))
    }

    fn remove_duplicates(df: &DataFrame, issue: &Issue) -> Result<Step> {
        let kind = ActionKind::RemovedDuplicates;
        let deduped = deduplicate_stable(df)?;
        let removed = df.height() - deduped.height();
        if removed == 0 {
            return Ok(Self::skipped(issue, kind, "no duplicate rows"));
        }

        let action =
            RemediationAction::new(issue, kind, ActionStatus::Success).with_rows_removed(removed);
        Ok((Some(deduped), action))
    }

    /// Nulls are kept; only values known to be negative are dropped.
    fn filter_negatives(df: &DataFrame, issue: &Issue) -> Result<Step> {
        let kind = ActionKind::FilteredNegativeValues;
        let Some(name) = issue.column.column_name() else {
            return Ok(Self::skipped(issue, kind, "issue names no column"));
        };
        let Ok(column) = df.column(name) else {
            return Ok(Self::skipped(issue, kind, "column not present"));
        };
        if !is_numeric_dtype(column.dtype()) {
            return Ok(Self::skipped(issue, kind, "column is not numeric"));
        }

        let keep: Vec<bool> = f64_values(column.as_materialized_series())?
            .into_iter()
            .map(|v| v.is_none_or(|v| v >= 0.0))
            .collect();
        let removed = keep.iter().filter(|k| !**k).count();
        if removed == 0 {
            return Ok(Self::skipped(issue, kind, "no negative values"));
        }

        let action =
            RemediationAction::new(issue, kind, ActionStatus::Success).with_rows_removed(removed);
        Ok((Some(filter_rows(df, &keep)?), action))
    }

    /// Null rate is recomputed on the current frame, not taken from the issue.
    fn drop_null_column(df: &DataFrame, issue: &Issue) -> Result<Step> {
        let kind = ActionKind::DroppedColumn;
        let Some(name) = issue.column.column_name() else {
            return Ok(Self::skipped(issue, kind, "issue names no column"));
        };
        let Ok(column) = df.column(name) else {
            return Ok(Self::skipped(issue, kind, "column not present"));
        };

        let null_pct = percentage(column.null_count(), df.height());
        if null_pct <= DROP_COLUMN_NULL_PERCENTAGE {
            return Ok(Self::skipped(
                issue,
                kind,
                format!("{:.1}% null values", null_pct),
            ));
        }

        let next = df.drop(name)?;
        let action = RemediationAction::new(issue, kind, ActionStatus::Success)
            .with_column_dropped(name)
            .with_reason(format!("{:.1}% null values", null_pct));
        Ok((Some(next), action))
    }
}

/// New frame (if changed) and the logged action.
type Step = (Option<DataFrame>, RemediationAction);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiler::DataProfiler;
    use crate::types::{IssueScope, Severity};
    use pretty_assertions::assert_eq;

    fn issue(issue_type: IssueType, column: IssueScope) -> Issue {
        Issue::new(Severity::Low, issue_type, column, 1, "test", "test")
    }

    // ===== Individual fixes =====

    #[test]
    fn test_trim_whitespace() {
        let df = df!["name" => ["  Bob ", "Alice"]].unwrap();
        let mut log = RemediationLog::new();
        let issues = [issue(IssueType::Whitespace, IssueScope::Column("name".into()))];

        let (fixed, actions) = RemediationEngine::remediate(df, &issues, &mut log).unwrap();
        assert_eq!(actions[0].status, ActionStatus::Success);
        assert_eq!(fixed.column("name").unwrap().str().unwrap().get(0), Some("Bob"));
    }

    #[test]
    fn test_trim_whitespace_skips_non_text() {
        let df = df!["name" => [1i64, 2]].unwrap();
        let mut log = RemediationLog::new();
        let issues = [issue(IssueType::Whitespace, IssueScope::Column("name".into()))];

        let (_, actions) = RemediationEngine::remediate(df, &issues, &mut log).unwrap();
        assert_eq!(actions[0].status, ActionStatus::Skipped);
    }

    #[test]
    fn test_filter_negatives_keeps_nulls() {
        let df = df!["age" => [Some(10i64), Some(-1), None]].unwrap();
        let mut log = RemediationLog::new();
        let issues = [issue(IssueType::NegativeValues, IssueScope::Column("age".into()))];

        let (fixed, actions) = RemediationEngine::remediate(df, &issues, &mut log).unwrap();
        assert_eq!(fixed.height(), 2);
        assert_eq!(actions[0].rows_removed, Some(1));
    }

    #[test]
    fn test_high_null_rate_drops_column_above_80() {
        let df = df![
            "id" => [1i64, 2, 3, 4, 5, 6],
            "notes" => [None, None, None, None, None, Some("x")],
        ]
        .unwrap();
        let profile = DataProfiler::profile_dataset(&df, "t").unwrap();
        let mut log = RemediationLog::new();

        let (fixed, actions) = RemediationEngine::remediate(df, &profile.issues, &mut log).unwrap();
        assert_eq!(fixed.width(), 1);
        let dropped: Vec<_> = actions.iter().filter(|a| a.action == ActionKind::DroppedColumn).collect();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].column_dropped.as_deref(), Some("notes"));
    }

    #[test]
    fn test_high_null_rate_below_80_is_skipped() {
        let df = df!["notes" => [None, None, None, Some("a"), Some("b")]].unwrap();
        let mut log = RemediationLog::new();
        let issues = [issue(IssueType::HighNullRate, IssueScope::Column("notes".into()))];

        let (fixed, actions) = RemediationEngine::remediate(df, &issues, &mut log).unwrap();
        assert_eq!(fixed.width(), 1);
        assert_eq!(actions[0].status, ActionStatus::Skipped);
    }

    #[test]
    fn test_unhandled_issue_types_are_ignored() {
        let df = df!["x" => [1i64]].unwrap();
        let mut log = RemediationLog::new();
        let issues = [issue(IssueType::LowCardinality, IssueScope::Column("x".into()))];

        let (_, actions) = RemediationEngine::remediate(df, &issues, &mut log).unwrap();
        assert!(actions.is_empty());
        assert!(log.is_empty());
    }

    // ===== End to end =====

    #[test]
    fn test_remediation_of_profiled_example() {
        let df = df![
            "id" => [1i64, 2, 2, 3, 4, 5],
            "age" => [25i64, 30, 30, -5, 40, 200],
        ]
        .unwrap();
        let profile = DataProfiler::profile_dataset(&df, "people").unwrap();
        let mut log = RemediationLog::new();

        let (fixed, _) = RemediationEngine::remediate(df, &profile.issues, &mut log).unwrap();
        assert_eq!(fixed.height(), 4);
    }

    #[test]
    fn test_second_pass_is_noop() {
        let df = df![
            "id" => [1i64, 2, 2, 3],
            "age" => [25i64, 30, 30, -5],
            "name" => [" a", "b", "b", "c"],
        ]
        .unwrap();
        let profile = DataProfiler::profile_dataset(&df, "people").unwrap();
        let mut log = RemediationLog::new();

        let (first, first_actions) =
            RemediationEngine::remediate(df, &profile.issues, &mut log).unwrap();
        assert!(first_actions.iter().any(|a| a.is_success()));

        let (second, second_actions) =
            RemediationEngine::remediate(first.clone(), &profile.issues, &mut log).unwrap();
        assert!(second_actions.iter().all(|a| !a.is_success()));
        assert!(second.equals_missing(&first));
    }

    #[test]
    fn test_summary_keeps_last_ten() {
        let mut log = RemediationLog::new();
        let issues: Vec<_> = (0..12)
            .map(|_| issue(IssueType::Duplicates, IssueScope::All))
            .collect();
        let df = df!["x" => [1i64, 1]].unwrap();

        RemediationEngine::remediate(df, &issues, &mut log).unwrap();
        let summary = log.summary();

        assert_eq!(summary.total_actions, 12);
        assert_eq!(summary.action_types.get("REMOVED_DUPLICATES"), Some(&12));
        assert_eq!(summary.recent_actions.len(), 10);
    }
}
