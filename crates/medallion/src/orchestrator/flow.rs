//! The staged pipeline as a task graph.
//!
//! ```text
//! load-config -> extract -> validate -> load-raw -> profile -> score -> alert
//!                                          |           |
//!                                          |           +-> remediate
//!                                          |                  |
//!                                          +------------> promote -> aggregate:* (x4)
//!                                                                 -> export-artifacts
//! ```
//!
//! Tasks share a context holding the run's configuration and collaborators
//! plus mutex-guarded run state each task reads its inputs from and
//! writes its outputs to. Aggregates and the artifact export are
//! non-critical; their failures make the run a partial success.

use super::dag::{GraphRun, RunStatus, Task, TaskGraph, TaskOutcome};
use super::progress::{ClosureProgressReporter, ProgressReporter, ProgressUpdate};
use super::sinks::{
    AlertSink, AnomalyDetector, DriftReporter, LoggingAlertSink, QualityAlert, flag_anomalies,
};
use crate::aggregate::{AggregateKind, AggregateSpec};
use crate::config::{PipelineConfig, SourceConfig, TableFormat};
use crate::error::{PipelineError, Result};
use crate::extract::extract;
use crate::profiler::DataProfiler;
use crate::quality::QualityScorer;
use crate::remediation::{RemediationEngine, RemediationLog};
use crate::store::io::{table_path, write_atomic};
use crate::store::{LayerStore, PromotionStats, TableInfo, WriteMode};
use crate::types::{DatasetProfile, Layer, QualityReport, RemediationAction};
use crate::validation::{
    BusinessRuleValidator, RuleFailure, Schema, SchemaValidator, ValidationMode,
};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use polars::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const LOAD_CONFIG: &str = "load-config";
pub const EXTRACT: &str = "extract";
pub const VALIDATE: &str = "validate";
pub const LOAD_RAW: &str = "load-raw";
pub const PROFILE: &str = "profile";
pub const SCORE: &str = "score";
pub const REMEDIATE: &str = "remediate";
pub const PROMOTE: &str = "promote";
pub const ALERT: &str = "alert";
pub const EXPORT_ARTIFACTS: &str = "export-artifacts";

/// Task name of the aggregate `kind`.
pub fn aggregate_task_name(kind: AggregateKind) -> String {
    format!("aggregate:{}", kind.table_name())
}

// ============================================================================
// Run summary
// ============================================================================

/// Tables written by a run, per tier.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TierResults {
    pub raw: Option<TableInfo>,
    pub cleaned: Option<TableInfo>,
    pub aggregated: Vec<TableInfo>,
    pub quarantine: Option<TableInfo>,
}

/// Row accounting of the validate task.
///
/// `valid_rows + schema_failed_rows + rule_failed_rows == input_rows`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationSummary {
    pub input_rows: usize,
    pub valid_rows: usize,
    pub schema_failed_rows: usize,
    pub rule_failed_rows: usize,
    pub failure_cases: usize,
    pub rule_failures: Vec<RuleFailure>,
}

/// Result of one pipeline run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub pipeline: String,
    pub status: RunStatus,
    pub tiers: TierResults,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promotion: Option<PromotionStats>,
    pub quality_score: Option<f64>,
    pub issues_found: usize,
    /// Successful remediation actions of this run.
    pub remediation_actions: usize,
    pub remediation: Vec<RemediationAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<QualityAlert>,
    pub artifacts: Vec<PathBuf>,
    pub tasks: Vec<TaskOutcome>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn task(&self, name: &str) -> Option<&TaskOutcome> {
        self.tasks.iter().find(|t| t.name == name)
    }

    fn new(pipeline: String, run: GraphRun, state: RunState, timestamp: DateTime<Utc>) -> Self {
        let mut aggregated = state.aggregated;
        aggregated.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            pipeline,
            status: run.status,
            tiers: TierResults {
                raw: state.raw,
                cleaned: state.cleaned,
                aggregated,
                quarantine: state.quarantine,
            },
            validation: state.validation,
            promotion: state.promotion,
            quality_score: state.report.as_ref().map(|r| r.quality_score),
            issues_found: state.profile.as_ref().map_or(0, |p| p.issues.len()),
            remediation_actions: state.remediation.iter().filter(|a| a.is_success()).count(),
            remediation: state.remediation,
            alert: state.alert,
            artifacts: state.artifacts,
            tasks: run.tasks,
            duration_ms: run.duration_ms,
            timestamp,
        }
    }
}

// ============================================================================
// Shared context
// ============================================================================

/// What tasks have produced so far.
#[derive(Default)]
struct RunState {
    store: Option<Arc<LayerStore>>,
    extracted: Option<DataFrame>,
    valid: Option<DataFrame>,
    validation: Option<ValidationSummary>,
    raw: Option<TableInfo>,
    quarantine: Option<TableInfo>,
    profile: Option<DatasetProfile>,
    report: Option<QualityReport>,
    remediation: Vec<RemediationAction>,
    cleaned: Option<TableInfo>,
    promotion: Option<PromotionStats>,
    aggregated: Vec<TableInfo>,
    alert: Option<QualityAlert>,
    artifacts: Vec<PathBuf>,
}

/// Context every task of a run receives.
struct FlowContext {
    config: PipelineConfig,
    schema: Schema,
    reference_date: Option<NaiveDate>,
    alert_sink: Arc<dyn AlertSink>,
    anomaly_detector: Option<Arc<dyn AnomalyDetector>>,
    drift_reporter: Option<Arc<dyn DriftReporter>>,
    log: Mutex<RemediationLog>,
    state: Mutex<RunState>,
}

static_assertions::assert_impl_all!(FlowContext: Send, Sync);

impl FlowContext {
    fn source(&self) -> Result<&SourceConfig> {
        self.config
            .primary_source()
            .ok_or_else(|| PipelineError::Config("no source configured".to_string()))
    }

    fn store(&self) -> Result<Arc<LayerStore>> {
        self.state
            .lock()
            .store
            .clone()
            .ok_or_else(|| unavailable("the layer store"))
    }

    fn business_rules(&self) -> BusinessRuleValidator {
        let validator = BusinessRuleValidator::default();
        match self.reference_date {
            Some(date) => validator.with_reference_date(date),
            None => validator,
        }
    }
}

fn unavailable(what: &str) -> PipelineError {
    PipelineError::Internal(format!("{} is not available to this task", what))
}

// ============================================================================
// Tasks
// ============================================================================

fn load_config(ctx: &FlowContext) -> Result<()> {
    let source = ctx.source()?;
    if ctx.config.sources.len() > 1 {
        warn!(
            "{} sources configured; only '{}' is processed",
            ctx.config.sources.len(),
            source.name
        );
    }

    let store = LayerStore::open(ctx.config.store.clone())?;
    info!(
        source = %source.name,
        threshold = ctx.config.quality_threshold,
        threads = ctx.config.store.engine.threads,
        "Configuration loaded"
    );
    ctx.state.lock().store = Some(Arc::new(store));
    Ok(())
}

fn extract_source(ctx: &FlowContext) -> Result<()> {
    let df = extract(ctx.source()?)?;
    ctx.state.lock().extracted = Some(df);
    Ok(())
}

fn validate(ctx: &FlowContext) -> Result<()> {
    let source = ctx.source()?;
    let store = ctx.store()?;
    let df = ctx
        .state
        .lock()
        .extracted
        .clone()
        .ok_or_else(|| unavailable("extracted data"))?;

    let schema = SchemaValidator::validate(&df, &ctx.schema, ValidationMode::Lazy)?;
    for case in schema.failure_cases.iter().filter(|c| c.row.is_none()) {
        warn!(column = %case.column, check = %case.check, "Column-level schema failure");
    }

    let business = ctx.business_rules().validate(&schema.valid)?;
    for failure in &business.failures {
        warn!(
            rule = %failure.rule_id,
            column = %failure.column,
            count = failure.count,
            "Business rule failed"
        );
    }

    let mut rejected = schema.failed.clone();
    rejected.vstack_mut(&business.failed)?;
    let quarantine = store.quarantine(&rejected, &source.name)?;

    let summary = ValidationSummary {
        input_rows: df.height(),
        valid_rows: business.valid.height(),
        schema_failed_rows: schema.failed.height(),
        rule_failed_rows: business.failed.height(),
        failure_cases: schema.failure_cases.len(),
        rule_failures: business.failures.clone(),
    };
    info!(
        "Validation kept {}/{} rows ({} quarantined)",
        summary.valid_rows,
        summary.input_rows,
        rejected.height()
    );

    let mut state = ctx.state.lock();
    state.valid = Some(business.valid);
    state.quarantine = Some(quarantine);
    state.validation = Some(summary);
    Ok(())
}

fn load_raw(ctx: &FlowContext) -> Result<()> {
    let source = ctx.source()?;
    let store = ctx.store()?;
    let valid = ctx
        .state
        .lock()
        .valid
        .clone()
        .ok_or_else(|| unavailable("validated data"))?;

    let info = store.load_raw(&valid, &source.name, WriteMode::Replace)?;
    ctx.state.lock().raw = Some(info);
    Ok(())
}

fn profile(ctx: &FlowContext) -> Result<()> {
    let source = ctx.source()?;
    let raw = ctx.store()?.read(Layer::Raw, &source.name)?;
    let profile = DataProfiler::profile_dataset(&raw, &source.name)?;
    ctx.state.lock().profile = Some(profile);
    Ok(())
}

fn score(ctx: &FlowContext) -> Result<()> {
    let profile = ctx
        .state
        .lock()
        .profile
        .clone()
        .ok_or_else(|| unavailable("the profile"))?;
    let report = QualityScorer::report(&profile);
    ctx.state.lock().report = Some(report);
    Ok(())
}

fn remediate(ctx: &FlowContext) -> Result<()> {
    if !ctx.config.enable_auto_remediation {
        info!("Auto-remediation disabled");
        return Ok(());
    }

    let source = ctx.source()?;
    let issues = ctx
        .state
        .lock()
        .profile
        .as_ref()
        .map(|p| p.issues.clone())
        .ok_or_else(|| unavailable("the profile"))?;
    let raw = ctx.store()?.read(Layer::Raw, &source.name)?;

    let (remediated, actions) = RemediationEngine::remediate(raw, &issues, &mut ctx.log.lock())?;
    info!(
        "Remediated copy of {} has {} rows, {} columns",
        source.name,
        remediated.height(),
        remediated.width()
    );
    ctx.state.lock().remediation = actions;
    Ok(())
}

fn promote(ctx: &FlowContext) -> Result<()> {
    let source = ctx.source()?;
    let (_, info, stats) = ctx.store()?.promote_to_cleaned(&source.name, &source.name)?;

    let mut state = ctx.state.lock();
    state.cleaned = Some(info);
    state.promotion = Some(stats);
    Ok(())
}

fn aggregate(ctx: &FlowContext, kind: AggregateKind) -> Result<()> {
    let source = ctx.source()?;
    let spec = AggregateSpec::new(&source.name, kind);
    let (_, info) = ctx.store()?.create_aggregate(&spec, kind.table_name())?;
    ctx.state.lock().aggregated.push(info);
    Ok(())
}

fn alert(ctx: &FlowContext) -> Result<()> {
    let report = ctx
        .state
        .lock()
        .report
        .clone()
        .ok_or_else(|| unavailable("the quality report"))?;
    let threshold = ctx.config.quality_threshold;

    if report.is_below(threshold) {
        let alert = QualityAlert::from_report(&report, threshold);
        ctx.alert_sink.send(&alert)?;
        ctx.state.lock().alert = Some(alert);
    } else {
        info!(
            "Quality score {:.2} meets threshold {:.2}",
            report.quality_score, threshold
        );
    }
    Ok(())
}

fn export_artifacts(ctx: &FlowContext) -> Result<()> {
    let Some(dir) = ctx.config.export_dir.as_deref() else {
        return Ok(());
    };
    let name = &ctx.source()?.name;
    let store = ctx.store()?;
    fs::create_dir_all(dir)?;

    let mut written = Vec::new();
    let mut cleaned = store.read(Layer::Cleaned, name)?;
    written.push(export_csv(dir, &format!("{}_cleaned", name), &mut cleaned)?);

    if store.contains(Layer::Quarantine, name) {
        let mut quarantined = store.read(Layer::Quarantine, name)?;
        written.push(export_csv(dir, &format!("{}_quarantine", name), &mut quarantined)?);
    }

    if let Some(detector) = &ctx.anomaly_detector {
        let mut flagged = flag_anomalies(&cleaned, detector.as_ref())?;
        written.push(export_csv(dir, &format!("{}_anomalies", name), &mut flagged)?);
    }

    if let Some(reporter) = &ctx.drift_reporter {
        let reference = store.read(Layer::Raw, name)?;
        let report = reporter.report(&reference, &cleaned)?;
        let path = dir.join(format!("{}_{}", name, reporter.file_name()));
        fs::write(&path, report)?;
        written.push(path);
    }

    info!("Exported {} artifacts to {}", written.len(), dir.display());
    ctx.state.lock().artifacts = written;
    Ok(())
}

fn export_csv(dir: &Path, stem: &str, df: &mut DataFrame) -> Result<PathBuf> {
    let path = table_path(dir, stem, TableFormat::Csv);
    write_atomic(&path, TableFormat::Csv, df)?;
    Ok(path)
}

// ============================================================================
// Pipeline
// ============================================================================

/// The staged pipeline.
///
/// Use [`Pipeline::builder()`] to plug in a schema, collaborators and a
/// progress reporter.
///
/// # Example
///
/// ```rust,ignore
/// use medallion::{Pipeline, PipelineConfig, RemediationLog};
///
/// let pipeline = Pipeline::builder()
///     .config(PipelineConfig::load("medallion.json"))
///     .on_progress(|update| println!("{} {}", update.task, update.stage.display_name()))
///     .build();
///
/// let mut log = RemediationLog::new();
/// let summary = pipeline.run(&mut log).await?;
/// println!("{:?}: score {:?}", summary.status, summary.quality_score);
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    schema: Schema,
    reference_date: Option<NaiveDate>,
    alert_sink: Arc<dyn AlertSink>,
    anomaly_detector: Option<Arc<dyn AnomalyDetector>>,
    drift_reporter: Option<Arc<dyn DriftReporter>>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
}

static_assertions::assert_impl_all!(Pipeline: Send, Sync);

impl Pipeline {
    /// Create a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Topological waves of the run's task graph.
    pub fn execution_order(&self) -> Result<Vec<Vec<String>>> {
        self.graph()?.execution_order()
    }

    /// Run the pipeline once.
    ///
    /// Remediation actions are appended to `log`. Task failures do not make
    /// this return an error; they are reported in the summary's status and
    /// task outcomes.
    pub async fn run(&self, log: &mut RemediationLog) -> Result<RunSummary> {
        let graph = self.graph()?;
        let pipeline = self
            .config
            .primary_source()
            .map(|s| s.name.clone())
            .unwrap_or_default();
        let timestamp = Utc::now();
        info!(pipeline = %pipeline, tasks = graph.len(), "Starting pipeline run");

        let ctx = Arc::new(FlowContext {
            config: self.config.clone(),
            schema: self.schema.clone(),
            reference_date: self.reference_date,
            alert_sink: Arc::clone(&self.alert_sink),
            anomaly_detector: self.anomaly_detector.clone(),
            drift_reporter: self.drift_reporter.clone(),
            log: Mutex::new(std::mem::take(log)),
            state: Mutex::new(RunState::default()),
        });

        let result = graph
            .run(
                Arc::clone(&ctx),
                self.config.store.engine.threads,
                self.progress_reporter.clone(),
            )
            .await;
        *log = std::mem::take(&mut *ctx.log.lock());

        let run = result?;
        let state = std::mem::take(&mut *ctx.state.lock());
        let summary = RunSummary::new(pipeline, run, state, timestamp);

        info!(
            status = ?summary.status,
            quality_score = summary.quality_score,
            issues = summary.issues_found,
            remediation_actions = summary.remediation_actions,
            "Pipeline run finished"
        );
        Ok(summary)
    }

    fn graph(&self) -> Result<TaskGraph<FlowContext>> {
        let config = &self.config;
        let mut graph = TaskGraph::new();

        graph.add(Task::new(LOAD_CONFIG, load_config).retry(config.config_retry))?;
        graph.add(
            Task::new(EXTRACT, extract_source)
                .after([LOAD_CONFIG])
                .retry(config.extract_retry),
        )?;
        graph.add(Task::new(VALIDATE, validate).after([EXTRACT]))?;
        graph.add(Task::new(LOAD_RAW, load_raw).after([VALIDATE]))?;
        graph.add(Task::new(PROFILE, profile).after([LOAD_RAW]))?;
        graph.add(Task::new(SCORE, score).after([PROFILE]))?;
        graph.add(Task::new(REMEDIATE, remediate).after([PROFILE]))?;
        graph.add(Task::new(PROMOTE, promote).after([REMEDIATE, LOAD_RAW]))?;

        let mut kinds: Vec<AggregateKind> = Vec::new();
        for &kind in &config.aggregations {
            if kinds.contains(&kind) {
                continue;
            }
            kinds.push(kind);
            graph.add(
                Task::new(aggregate_task_name(kind), move |ctx: &FlowContext| {
                    aggregate(ctx, kind)
                })
                .after([PROMOTE])
                .non_critical(),
            )?;
        }

        graph.add(Task::new(ALERT, alert).after([SCORE]))?;
        if config.export_dir.is_some() {
            graph.add(
                Task::new(EXPORT_ARTIFACTS, export_artifacts)
                    .after([PROMOTE])
                    .non_critical(),
            )?;
        }

        Ok(graph)
    }
}

/// Builder for [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<PipelineConfig>,
    schema: Option<Schema>,
    reference_date: Option<NaiveDate>,
    alert_sink: Option<Arc<dyn AlertSink>>,
    anomaly_detector: Option<Arc<dyn AnomalyDetector>>,
    drift_reporter: Option<Arc<dyn DriftReporter>>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
}

static_assertions::assert_impl_all!(PipelineBuilder: Send);

impl PipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Schema raw input is validated against. Default: [`Schema::ecommerce`].
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Pin "today" for the date business rule.
    pub fn reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    /// Where quality alerts go. Default: [`LoggingAlertSink`].
    pub fn alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    /// Flag anomalous rows in the exported artifacts.
    pub fn anomaly_detector(mut self, detector: Arc<dyn AnomalyDetector>) -> Self {
        self.anomaly_detector = Some(detector);
        self
    }

    /// Export a drift report comparing the raw and cleaned tables.
    pub fn drift_reporter(mut self, reporter: Arc<dyn DriftReporter>) -> Self {
        self.drift_reporter = Some(reporter);
        self
    }

    /// Set a progress reporter for receiving task updates.
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    /// Set a progress callback closure.
    pub fn on_progress<F>(self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_reporter(Arc::new(ClosureProgressReporter::new(callback)))
    }

    /// Build the pipeline.
    ///
    /// An invalid configuration is replaced by the defaults with a warning.
    pub fn build(self) -> Pipeline {
        let config = match self.config {
            Some(config) => match config.validate() {
                Ok(()) => config,
                Err(e) => {
                    warn!("Invalid configuration: {}; using defaults", e);
                    PipelineConfig::default()
                }
            },
            None => PipelineConfig::default(),
        };

        Pipeline {
            config,
            schema: self.schema.unwrap_or_else(Schema::ecommerce),
            reference_date: self.reference_date,
            alert_sink: self
                .alert_sink
                .unwrap_or_else(|| Arc::new(LoggingAlertSink)),
            anomaly_detector: self.anomaly_detector,
            drift_reporter: self.drift_reporter,
            progress_reporter: self.progress_reporter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SourceConfig, SourceKind};
    use pretty_assertions::assert_eq;

    fn names(wave: &[&str]) -> Vec<String> {
        wave.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_graph_shape() {
        let pipeline = Pipeline::builder().build();
        let waves = pipeline.execution_order().unwrap();

        assert_eq!(
            waves,
            vec![
                names(&[LOAD_CONFIG]),
                names(&[EXTRACT]),
                names(&[VALIDATE]),
                names(&[LOAD_RAW]),
                names(&[PROFILE]),
                names(&[SCORE, REMEDIATE]),
                names(&[PROMOTE, ALERT]),
                names(&[
                    "aggregate:daily_sales",
                    "aggregate:customer_ltv",
                    "aggregate:product_performance",
                    "aggregate:regional_analytics",
                ]),
            ]
        );
    }

    #[test]
    fn test_export_task_only_with_export_dir() {
        let config = PipelineConfig::builder()
            .export_dir("dashboard")
            .aggregations([AggregateKind::DailySummary, AggregateKind::DailySummary])
            .build()
            .unwrap();
        let pipeline = Pipeline::builder().config(config).build();
        let waves = pipeline.execution_order().unwrap();

        assert_eq!(
            waves.last().unwrap(),
            &names(&["aggregate:daily_sales", EXPORT_ARTIFACTS])
        );
    }

    #[test]
    fn test_invalid_config_falls_back_to_defaults() {
        let mut config = PipelineConfig::default();
        config.quality_threshold = 400.0;
        config.sources = vec![SourceConfig::new("orders", SourceKind::Csv, "orders.csv")];

        let pipeline = Pipeline::builder().config(config).build();
        assert_eq!(pipeline.config().quality_threshold, 80.0);
        assert_eq!(
            pipeline.config().primary_source().unwrap().name,
            "ecommerce_transactions"
        );
    }

    #[tokio::test]
    async fn test_missing_source_fails_run_and_skips_downstream() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::builder()
            .source(SourceConfig::new(
                "orders",
                SourceKind::Csv,
                dir.path().join("missing.csv"),
            ))
            .store_root(dir.path().join("store"))
            .extract_retry(crate::config::RetryPolicy::NONE)
            .build()
            .unwrap();

        let mut log = RemediationLog::new();
        let summary = Pipeline::builder().config(config).build().run(&mut log).await.unwrap();

        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(
            summary.task(EXTRACT).unwrap().error.as_ref().unwrap().error_code(),
            "EXTRACTION_ERROR"
        );
        assert!(summary.tasks.iter().filter(|t| t.name != LOAD_CONFIG && t.name != EXTRACT).all(
            |t| t.status == crate::orchestrator::TaskStatus::Skipped
        ));
        assert!(summary.tiers.raw.is_none());
        assert!(log.is_empty());
    }
}
