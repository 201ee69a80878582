//! Pipeline orchestration.
//!
//! [`dag`] is a generic executor for named tasks with dependencies, retries
//! and bounded concurrency. [`flow`] wires the pipeline stages into it.

pub mod dag;
pub mod flow;
pub mod progress;
pub mod sinks;

pub use dag::{GraphRun, RunStatus, Task, TaskGraph, TaskOutcome, TaskStatus};
pub use flow::{
    Pipeline, PipelineBuilder, RunSummary, TierResults, ValidationSummary, aggregate_task_name,
};
pub use progress::{ClosureProgressReporter, ProgressReporter, ProgressUpdate, TaskStage};
pub use sinks::{
    ANOMALY_COLUMN, AlertSink, AnomalyDetector, DriftReporter, LoggingAlertSink, QualityAlert,
    flag_anomalies,
};
