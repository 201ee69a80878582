//! Quality-gated staged data pipeline.
//!
//! Ingests tabular data, validates it, scores its quality, repairs common
//! defects and promotes progressively cleaner copies through storage tiers
//! (raw → cleaned → aggregated) while isolating rejected rows in a
//! quarantine tier.
//!
//! # Overview
//!
//! - **Validation**: declarative schema checks and business rules that split
//!   rows into valid and failed sets instead of aborting
//! - **Profiling**: per-column statistics and rule-based issue detection
//! - **Quality scoring**: a deterministic score in [0, 100] from a profile
//! - **Remediation**: bounded, idempotent fixes for detected issues, logged
//!   to a caller-owned [`RemediationLog`]
//! - **Tiered storage**: atomic table writes addressed by `(Layer, name)`,
//!   with a replay-safe raw → cleaned promotion
//! - **Aggregates**: business-ready views over the cleaned table
//! - **Orchestration**: a task DAG with retries, bounded concurrency and
//!   failure isolation
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use medallion::{Pipeline, PipelineConfig, RemediationLog, SourceConfig, SourceKind};
//!
//! let config = PipelineConfig::builder()
//!     .source(SourceConfig::new("orders", SourceKind::Csv, "data/orders.csv"))
//!     .store_root("warehouse")
//!     .quality_threshold(85.0)
//!     .build()?;
//!
//! let pipeline = Pipeline::builder()
//!     .config(config)
//!     .on_progress(|update| println!("[{:.0}%] {}", update.progress * 100.0, update.message))
//!     .build();
//!
//! let mut log = RemediationLog::new();
//! let summary = pipeline.run(&mut log).await?;
//! println!("{:?}, quality score {:?}", summary.status, summary.quality_score);
//! ```
//!
//! # Using the stages directly
//!
//! ```rust,ignore
//! use medallion::{DataProfiler, QualityScorer, RemediationEngine, RemediationLog};
//!
//! let profile = DataProfiler::profile_dataset(&df, "orders")?;
//! let report = QualityScorer::report(&profile);
//!
//! let mut log = RemediationLog::new();
//! let (fixed, actions) = RemediationEngine::remediate(df, &profile.issues, &mut log)?;
//! ```

pub mod aggregate;
pub mod config;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod profiler;
pub mod quality;
pub mod remediation;
pub mod store;
pub mod types;
pub mod utils;
pub mod validation;

// Re-exports for convenient access
pub use aggregate::{AggregateKind, AggregateSpec, Aggregator};
pub use config::{
    ConfigValidationError, EngineSettings, PipelineConfig, PipelineConfigBuilder, RetryPolicy,
    SourceConfig, SourceKind, StoreConfig, TableFormat, TierConfig,
};
pub use error::{PipelineError, Result as PipelineResult, ResultExt};
pub use extract::extract;
pub use orchestrator::{
    AlertSink, AnomalyDetector, ClosureProgressReporter, DriftReporter, GraphRun,
    LoggingAlertSink, Pipeline, PipelineBuilder, ProgressReporter, ProgressUpdate, QualityAlert,
    RunStatus, RunSummary, Task, TaskGraph, TaskOutcome, TaskStage, TaskStatus,
};
pub use profiler::DataProfiler;
pub use quality::{QualityAnalyzer, QualityScorer};
pub use remediation::{RemediationEngine, RemediationLog, RemediationSummary};
pub use store::{LayerStore, PromotionStats, TableInfo, TableStats, WriteMode};
pub use types::{
    ActionKind, ActionStatus, ColumnProfile, DatasetProfile, Issue, IssueScope, IssueType, Layer,
    QualityReport, RemediationAction, SemanticType, Severity,
};
pub use validation::{
    BusinessRule, BusinessRuleValidator, Check, ColumnSpec, Schema, SchemaValidator,
    ValidationMode,
};
