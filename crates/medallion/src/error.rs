//! Error types for the staged data pipeline.
//!
//! Per-row validation failures are never surfaced through this type: they are
//! returned as data (failure cases, rule failures) so the run can continue on
//! the rows that passed. The variants here describe structural failures.
//!
//! Errors are serializable so run summaries can carry them as `{code, message}`.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// The main error type for the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A row/column violated a schema check (fail-fast validation only).
    #[error("Schema violation in column '{column}' at row {row:?}: check '{check}' failed")]
    SchemaViolation {
        row: Option<usize>,
        column: String,
        check: String,
    },

    /// A business rule failed for one or more rows.
    #[error("Business rule '{rule}' failed on column '{column}' for {count} rows")]
    BusinessRuleViolation {
        rule: String,
        column: String,
        count: usize,
    },

    /// Source data is missing or malformed.
    #[error("Extraction failed for source '{source_name}': {reason}")]
    Extraction { source_name: String, reason: String },

    /// Configuration is missing or invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Writing a tier table failed.
    #[error("Failed to persist {layer}.{table}: {reason}")]
    Persistence {
        layer: String,
        table: String,
        reason: String,
    },

    /// An aggregate could not be computed.
    #[error("Failed to compute aggregate '{name}': {reason}")]
    Aggregation { name: String, reason: String },

    /// Requested table is not registered in the given tier.
    #[error("Table {layer}.{table} not found")]
    TableNotFound { layer: String, table: String },

    /// Column was not found in the dataset.
    #[error("Column '{0}' not found in dataset")]
    ColumnNotFound(String),

    /// The dataset itself is unusable (e.g. colliding column names).
    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    /// Task graph is malformed (unknown dependency, cycle, duplicate node).
    #[error("Invalid task graph: {0}")]
    InvalidGraph(String),

    /// A task was not run because one of its dependencies failed.
    #[error("Task '{task}' skipped: upstream task '{upstream}' failed")]
    UpstreamFailed { task: String, upstream: String },

    /// A task failed after exhausting its retries.
    #[error("Task '{task}' failed after {attempts} attempt(s): {source}")]
    TaskFailed {
        task: String,
        attempts: u32,
        #[source]
        source: Box<PipelineError>,
    },

    /// Internal error (e.g. join failure of a worker task).
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PipelineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Shorthand for a persistence failure on `layer.table`.
    pub fn persistence(
        layer: impl ToString,
        table: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        PipelineError::Persistence {
            layer: layer.to_string(),
            table: table.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable error code for run summaries and CLI output.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::SchemaViolation { .. } => "SCHEMA_VIOLATION",
            Self::BusinessRuleViolation { .. } => "BUSINESS_RULE_VIOLATION",
            Self::Extraction { .. } => "EXTRACTION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Persistence { .. } => "PERSISTENCE_ERROR",
            Self::Aggregation { .. } => "AGGREGATION_ERROR",
            Self::TableNotFound { .. } => "TABLE_NOT_FOUND",
            Self::ColumnNotFound(_) => "COLUMN_NOT_FOUND",
            Self::InvalidDataset(_) => "INVALID_DATASET",
            Self::InvalidGraph(_) => "INVALID_GRAPH",
            Self::UpstreamFailed { .. } => "UPSTREAM_FAILED",
            Self::TaskFailed { source, .. } => source.error_code(),
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Whether the error is worth retrying for an idempotent task.
    ///
    /// Only extraction and plain IO failures are treated as transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Extraction { .. } | Self::Io(_) => true,
            Self::WithContext { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Recoverable errors shrink the working set or fall back to defaults;
    /// they never abort a run.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::SchemaViolation { .. } | Self::BusinessRuleViolation { .. } | Self::Config(_) => {
                true
            }
            Self::WithContext { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }
}

impl Serialize for PipelineError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("PipelineError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PipelineError::Polars(e).with_context(context))
    }
}
