use chrono::{DateTime, Utc};
use polars::prelude::DataType;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Issues
// ============================================================================

/// Severity of a detected data-quality issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::Info => "INFO",
        }
    }

    /// Points subtracted from the quality score per issue of this severity.
    pub fn penalty(&self) -> f64 {
        match self {
            Self::High => 10.0,
            Self::Medium => 5.0,
            Self::Low => 2.0,
            Self::Info => 0.0,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a detected data-quality issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    HighNullRate,
    ModerateNullRate,
    LowCardinality,
    NegativeValues,
    Whitespace,
    Duplicates,
    EmptyColumn,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighNullRate => "HIGH_NULL_RATE",
            Self::ModerateNullRate => "MODERATE_NULL_RATE",
            Self::LowCardinality => "LOW_CARDINALITY",
            Self::NegativeValues => "NEGATIVE_VALUES",
            Self::Whitespace => "WHITESPACE",
            Self::Duplicates => "DUPLICATES",
            Self::EmptyColumn => "EMPTY_COLUMN",
        }
    }

    /// Null-rate issues drive the imputation recommendation.
    pub fn is_null_related(&self) -> bool {
        matches!(self, Self::HighNullRate | Self::ModerateNullRate)
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an issue applies to: one column or the whole dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueScope {
    All,
    Column(String),
}

impl IssueScope {
    pub fn column_name(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Column(name) => Some(name),
        }
    }
}

impl fmt::Display for IssueScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("ALL"),
            Self::Column(name) => f.write_str(name),
        }
    }
}

/// A detected, classified data-quality defect.
///
/// Issues are produced by the profiler and never modified afterwards; later
/// stages receive them by reference or by clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub issue_type: IssueType,
    pub column: IssueScope,
    /// Number of offending values or rows (0 when not countable).
    pub count: usize,
    pub message: String,
    pub recommendation: String,
}

impl Issue {
    pub fn new(
        severity: Severity,
        issue_type: IssueType,
        column: IssueScope,
        count: usize,
        message: impl Into<String>,
        recommendation: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            issue_type,
            column,
            count,
            message: message.into(),
            recommendation: recommendation.into(),
        }
    }
}

// ============================================================================
// Profiles
// ============================================================================

/// Declared semantic type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Integer,
    Float,
    Text,
    Date,
    Boolean,
    Other,
}

impl SemanticType {
    /// Map a polars dtype onto the semantic type system.
    pub fn from_dtype(dtype: &DataType) -> Self {
        match dtype {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => Self::Integer,
            DataType::Float32 | DataType::Float64 => Self::Float,
            DataType::String => Self::Text,
            DataType::Date | DataType::Datetime(_, _) => Self::Date,
            DataType::Boolean => Self::Boolean,
            _ => Self::Other,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Text => "text",
            Self::Date => "date",
            Self::Boolean => "boolean",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics of a numeric column (nulls excluded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation (n - 1).
    pub std: f64,
    pub zero_count: usize,
    pub negative_count: usize,
}

/// Statistics of a text column (nulls excluded, lengths in chars).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextStats {
    pub min_length: usize,
    pub max_length: usize,
    pub avg_length: f64,
    pub empty_count: usize,
    /// Values that differ from their whitespace-trimmed form.
    pub whitespace_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub dtype: String,
    pub semantic_type: SemanticType,
    pub null_count: usize,
    pub null_percentage: f64,
    pub unique_count: usize,
    pub unique_percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric: Option<NumericStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextStats>,
}

impl ColumnProfile {
    pub fn negative_count(&self) -> usize {
        self.numeric.as_ref().map_or(0, |n| n.negative_count)
    }

    pub fn whitespace_count(&self) -> usize {
        self.text.as_ref().map_or(0, |t| t.whitespace_count)
    }
}

/// Statistical and structural summary of one dataset snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetProfile {
    pub dataset_name: String,
    pub row_count: usize,
    pub column_count: usize,
    pub estimated_size_bytes: usize,
    pub duplicate_count: usize,
    pub columns: Vec<ColumnProfile>,
    pub issues: Vec<Issue>,
    pub recommendations: Vec<String>,
}

impl DatasetProfile {
    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn issues_with_severity(&self, severity: Severity) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }

    pub fn issues_of_type(&self, issue_type: IssueType) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.issue_type == issue_type)
    }
}

/// Quality assessment of one dataset snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub table_name: String,
    pub total_rows: usize,
    pub total_columns: usize,
    /// Score in [0, 100].
    pub quality_score: f64,
    pub issues: Vec<Issue>,
    pub recommendations: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl QualityReport {
    pub fn is_below(&self, threshold: f64) -> bool {
        self.quality_score < threshold
    }
}

// ============================================================================
// Remediation
// ============================================================================

/// The fix a remediation action applied (or would have applied).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    TrimmedWhitespace,
    RemovedDuplicates,
    FilteredNegativeValues,
    DroppedColumn,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrimmedWhitespace => "TRIMMED_WHITESPACE",
            Self::RemovedDuplicates => "REMOVED_DUPLICATES",
            Self::FilteredNegativeValues => "FILTERED_NEGATIVE_VALUES",
            Self::DroppedColumn => "DROPPED_COLUMN",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Success,
    /// The fix's precondition was not met; nothing changed.
    Skipped,
}

/// One logged remediation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationAction {
    pub issue: Issue,
    pub action: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_removed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_dropped: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub status: ActionStatus,
}

impl RemediationAction {
    pub(crate) fn new(issue: &Issue, action: ActionKind, status: ActionStatus) -> Self {
        Self {
            issue: issue.clone(),
            action,
            column: issue.column.column_name().map(str::to_string),
            rows_removed: None,
            column_dropped: None,
            reason: None,
            status,
        }
    }

    pub(crate) fn with_rows_removed(mut self, rows: usize) -> Self {
        self.rows_removed = Some(rows);
        self
    }

    pub(crate) fn with_column_dropped(mut self, column: impl Into<String>) -> Self {
        self.column_dropped = Some(column.into());
        self
    }

    pub(crate) fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }
}

// ============================================================================
// Storage tiers
// ============================================================================

/// Storage tier of the staged store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Raw,
    Cleaned,
    Aggregated,
    Quarantine,
}

impl Layer {
    pub const ALL: [Layer; 4] = [
        Layer::Raw,
        Layer::Cleaned,
        Layer::Aggregated,
        Layer::Quarantine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Cleaned => "cleaned",
            Self::Aggregated => "aggregated",
            Self::Quarantine => "quarantine",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_penalties() {
        assert_eq!(Severity::High.penalty(), 10.0);
        assert_eq!(Severity::Medium.penalty(), 5.0);
        assert_eq!(Severity::Low.penalty(), 2.0);
        assert_eq!(Severity::Info.penalty(), 0.0);
    }

    #[test]
    fn test_issue_serialization_uses_source_names() {
        let issue = Issue::new(
            Severity::High,
            IssueType::NegativeValues,
            IssueScope::Column("age".to_string()),
            1,
            "age has 1 negative values",
            "Investigate and correct negative values in age",
        );
        let json = serde_json::to_string(&issue).unwrap();
        assert!(json.contains("\"HIGH\""));
        assert!(json.contains("\"NEGATIVE_VALUES\""));
    }

    #[test]
    fn test_issue_scope_display() {
        assert_eq!(IssueScope::All.to_string(), "ALL");
        assert_eq!(IssueScope::Column("age".into()).to_string(), "age");
        assert_eq!(IssueScope::All.column_name(), None);
    }

    #[test]
    fn test_semantic_type_from_dtype() {
        assert_eq!(SemanticType::from_dtype(&DataType::Int32), SemanticType::Integer);
        assert_eq!(SemanticType::from_dtype(&DataType::Float64), SemanticType::Float);
        assert_eq!(SemanticType::from_dtype(&DataType::String), SemanticType::Text);
        assert_eq!(SemanticType::from_dtype(&DataType::Date), SemanticType::Date);
        assert_eq!(SemanticType::from_dtype(&DataType::Boolean), SemanticType::Boolean);
        assert!(SemanticType::Float.is_numeric());
        assert!(!SemanticType::Text.is_numeric());
    }

    #[test]
    fn test_remediation_action_builder() {
        let issue = Issue::new(
            Severity::Medium,
            IssueType::Duplicates,
            IssueScope::All,
            2,
            "Found 2 duplicate rows",
            "Apply deduplication strategy",
        );
        let action = RemediationAction::new(&issue, ActionKind::RemovedDuplicates, ActionStatus::Success)
            .with_rows_removed(2);

        assert!(action.is_success());
        assert_eq!(action.rows_removed, Some(2));
        assert_eq!(action.column, None);
    }

    #[test]
    fn test_layer_names() {
        let names: Vec<_> = Layer::ALL.iter().map(|l| l.as_str()).collect();
        assert_eq!(names, vec!["raw", "cleaned", "aggregated", "quarantine"]);
    }
}
