//! CLI entry point for the staged data pipeline.

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use dotenv::dotenv;
use medallion::{
    DataProfiler, DatasetProfile, Pipeline, PipelineConfig, QualityReport, QualityScorer,
    RemediationLog, RunStatus, RunSummary, SourceConfig, SourceKind,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Environment variable overriding the configuration file path.
const CONFIG_ENV: &str = "MEDALLION_CONFIG";

/// CLI-compatible source format enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliSourceKind {
    Csv,
    Parquet,
    Json,
}

impl From<CliSourceKind> for SourceKind {
    fn from(cli: CliSourceKind) -> Self {
        match cli {
            CliSourceKind::Csv => SourceKind::Csv,
            CliSourceKind::Parquet => SourceKind::Parquet,
            CliSourceKind::Json => SourceKind::Json,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Quality-gated staged data pipeline",
    long_about = "Validates, profiles, scores and remediates tabular data, promoting it through \
                  raw, cleaned and aggregated storage tiers.\n\n\
                  ENVIRONMENT VARIABLES:\n  \
                  MEDALLION_CONFIG    Path of the JSON configuration file\n  \
                  RUST_LOG            Log filter (overrides --log-level)\n\n\
                  EXAMPLES:\n  \
                  # Run with a configuration file\n  \
                  medallion run --config pipeline.json\n\n  \
                  # Run a single CSV through a local store\n  \
                  medallion run --source data/orders.csv --store warehouse\n\n  \
                  # Profile a file without touching the store\n  \
                  medallion profile data/orders.csv --json"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Suppress progress output (only show warnings, errors and the result)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output JSON to stdout instead of a human-readable summary
    ///
    /// Disables all logs; only the final JSON document is written.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline
    Run(RunArgs),
    /// Profile and score a file
    Profile(ProfileArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// JSON configuration file (falls back to $MEDALLION_CONFIG, then defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Source file, replacing the configured sources
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Source format (inferred from the file extension if omitted)
    #[arg(long, value_enum)]
    kind: Option<CliSourceKind>,

    /// Dataset name (defaults to the source file stem)
    #[arg(long)]
    name: Option<String>,

    /// Put every tier under this directory
    #[arg(long)]
    store: Option<PathBuf>,

    /// Export dashboard artifacts to this directory
    #[arg(long)]
    export: Option<PathBuf>,

    /// Alerting threshold (0 - 100)
    #[arg(long)]
    threshold: Option<f64>,

    /// Disable auto-remediation
    #[arg(long)]
    no_remediation: bool,

    /// Worker count of the task executor
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(clap::Args, Debug)]
struct ProfileArgs {
    /// File to profile
    input: PathBuf,

    /// File format (inferred from the file extension if omitted)
    #[arg(long, value_enum)]
    kind: Option<CliSourceKind>,
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is disabled so stdout only carries
/// the JSON document.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // .env may set MEDALLION_CONFIG and RUST_LOG
    dotenv().ok();
    init_logging(&cli.log_level, cli.quiet, cli.json);

    match &cli.command {
        Command::Run(args) => run(args, cli.json).await,
        Command::Profile(args) => profile(args, cli.json),
    }
}

async fn run(args: &RunArgs, json: bool) -> Result<()> {
    let config = build_config(args)?;
    let pipeline = Pipeline::builder().config(config).build();

    let mut log = RemediationLog::new();
    let summary = pipeline.run(&mut log).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_run_summary(&summary, &log);
    }

    match summary.status {
        RunStatus::Failed => {
            error!("Pipeline run failed");
            Err(anyhow!("Pipeline run failed"))
        }
        _ => Ok(()),
    }
}

/// Configuration file (flag, then environment, then defaults) with the
/// command-line overrides applied.
fn build_config(args: &RunArgs) -> Result<PipelineConfig> {
    let path = args
        .config
        .clone()
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

    let mut config = match path {
        Some(path) => PipelineConfig::load(path),
        None => {
            info!("No configuration file given; using defaults");
            PipelineConfig::default()
        }
    };

    if let Some(source) = &args.source {
        config.sources = vec![source_config(source, args.kind, args.name.clone())?];
    }
    if let Some(store) = &args.store {
        config.store = medallion::StoreConfig {
            engine: config.store.engine.clone(),
            ..medallion::StoreConfig::rooted_at(store)
        };
    }
    if let Some(dir) = &args.export {
        config.export_dir = Some(dir.clone());
    }
    if let Some(threshold) = args.threshold {
        config.quality_threshold = threshold;
    }
    if let Some(threads) = args.threads {
        config.store.engine.threads = threads;
    }
    if args.no_remediation {
        config.enable_auto_remediation = false;
    }

    config.validate()?;
    Ok(config)
}

fn source_config(
    path: &Path,
    kind: Option<CliSourceKind>,
    name: Option<String>,
) -> Result<SourceConfig> {
    let kind = match kind {
        Some(kind) => kind.into(),
        None => infer_kind(path)?,
    };
    let name = name.unwrap_or_else(|| file_stem(path));
    Ok(SourceConfig::new(name, kind, path))
}

fn infer_kind(path: &Path) -> Result<SourceKind> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("csv") => Ok(SourceKind::Csv),
        Some("parquet") => Ok(SourceKind::Parquet),
        Some("json") => Ok(SourceKind::Json),
        _ => Err(anyhow!(
            "Cannot infer the format of {}; pass --kind",
            path.display()
        )),
    }
}

/// File stem usable as a table name.
fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| {
            s.chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
                .collect()
        })
        .unwrap_or_else(|| "dataset".to_string())
}

#[derive(Serialize)]
struct ProfileOutput<'a> {
    report: &'a QualityReport,
    profile: &'a DatasetProfile,
}

fn profile(args: &ProfileArgs, json: bool) -> Result<()> {
    let source = source_config(&args.input, args.kind, None)?;
    let df = medallion::extract(&source)?;
    let profile = DataProfiler::profile_dataset(&df, &source.name)?;
    let report = QualityScorer::report(&profile);

    if json {
        let output = ProfileOutput {
            report: &report,
            profile: &profile,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_profile(&source, &profile, &report);
    Ok(())
}

/// Note: user-facing output goes through `println!` so it is visible
/// regardless of the log level.
fn print_profile(source: &SourceConfig, profile: &DatasetProfile, report: &QualityReport) {
    println!("\n{}", "=".repeat(80));
    println!("DATASET PROFILE");
    println!("{}\n", "=".repeat(80));

    println!("  File: {}", source.path.display());
    println!("  Rows: {}", profile.row_count);
    println!("  Columns: {}", profile.column_count);
    println!("  Duplicate rows: {}", profile.duplicate_count);
    println!();

    println!(
        "{:<24} {:<10} {:<10} {:<10}",
        "Column", "Type", "Missing %", "Unique"
    );
    println!("{}", "-".repeat(60));
    for col in &profile.columns {
        println!(
            "{:<24} {:<10} {:<10.1} {:<10}",
            truncate_str(&col.name, 23),
            col.semantic_type.to_string(),
            col.null_percentage,
            col.unique_count
        );
    }
    println!();

    println!("QUALITY SCORE: {:.2}/100", report.quality_score);
    println!("{}", "-".repeat(40));
    if report.issues.is_empty() {
        println!("  No data quality issues detected");
    } else {
        for issue in &report.issues {
            println!(
                "  - [{}] {} ({}): {}",
                issue.severity, issue.issue_type, issue.column, issue.message
            );
        }
    }
    println!();

    if !report.recommendations.is_empty() {
        println!("Recommendations:");
        for recommendation in &report.recommendations {
            println!("  - {}", recommendation);
        }
        println!();
    }
}

fn print_run_summary(summary: &RunSummary, log: &RemediationLog) {
    println!();
    println!("{}", "=".repeat(80));
    println!("PIPELINE RUN: {} ({:?})", summary.pipeline, summary.status);
    println!("{}", "=".repeat(80));
    println!();

    if let Some(validation) = &summary.validation {
        println!("Validation:");
        println!(
            "  {}/{} rows valid ({} schema failures, {} rule failures quarantined)",
            validation.valid_rows,
            validation.input_rows,
            validation.schema_failed_rows,
            validation.rule_failed_rows
        );
        println!();
    }

    println!("Tiers:");
    let tiers = &summary.tiers;
    for info in [&tiers.raw, &tiers.cleaned, &tiers.quarantine]
        .into_iter()
        .flatten()
        .chain(&tiers.aggregated)
    {
        println!(
            "  {}.{}: {} rows x {} columns",
            info.layer, info.name, info.row_count, info.column_count
        );
    }
    println!();

    if let Some(score) = summary.quality_score {
        println!("Quality score: {:.2}/100", score);
    }
    println!("Issues found: {}", summary.issues_found);
    println!(
        "Remediation actions: {} ({} logged in total)",
        summary.remediation_actions,
        log.len()
    );
    if let Some(alert) = &summary.alert {
        println!("  ! {}", alert.message());
    }
    println!();

    let unsuccessful: Vec<_> = summary.tasks.iter().filter(|t| !t.is_success()).collect();
    if !unsuccessful.is_empty() {
        println!("Tasks not completed:");
        for task in unsuccessful {
            let reason = task
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default();
            println!("  ! {} ({:?}): {}", task.name, task.status, reason);
        }
        println!();
    }

    if !summary.artifacts.is_empty() {
        println!("Artifacts:");
        for path in &summary.artifacts {
            println!("  - {}", path.display());
        }
        println!();
    }

    println!("Duration: {}ms", summary.duration_ms);
    println!("{}", "=".repeat(80));
    println!("Use --json for machine-readable output");
}

fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}
