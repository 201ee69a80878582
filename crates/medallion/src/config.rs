//! Configuration types for the staged pipeline.
//!
//! Configuration uses the builder pattern for programmatic setup and serde
//! for file-based setup. Loading never fails a run: a missing or malformed
//! file falls back to [`PipelineConfig::default`] with a warning.

use crate::aggregate::AggregateKind;
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// File format of a raw source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Csv,
    Parquet,
    Json,
}

/// Descriptor of a raw data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Logical dataset name; used as the table name in every tier.
    pub name: String,
    /// File format.
    #[serde(rename = "type")]
    pub kind: SourceKind,
    /// Location of the file.
    pub path: PathBuf,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, kind: SourceKind, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind,
            path: path.into(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::new(
            "ecommerce_transactions",
            SourceKind::Csv,
            "data/raw/ecommerce_transactions.csv",
        )
    }
}

/// Columnar file format used by a storage tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    #[default]
    Parquet,
    Csv,
}

impl TableFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Parquet => "parquet",
            Self::Csv => "csv",
        }
    }
}

/// Storage settings of a single tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub format: TableFormat,
}

impl TierConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            format: TableFormat::default(),
        }
    }
}

/// Engine settings shared by the store and the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Human readable memory budget, e.g. `"2GB"` or `"512MB"`.
    pub memory_limit: String,
    /// Worker count; also the executor's concurrency bound.
    pub threads: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            memory_limit: "2GB".to_string(),
            threads: 4,
        }
    }
}

impl EngineSettings {
    /// Parse [`memory_limit`](Self::memory_limit) into bytes.
    ///
    /// Accepts an optional `KB`/`MB`/`GB`/`TB` suffix (case-insensitive,
    /// powers of 1024). Returns `None` for anything else.
    pub fn memory_limit_bytes(&self) -> Option<u64> {
        const UNITS: [(&str, u64); 5] = [
            ("TB", 1 << 40),
            ("GB", 1 << 30),
            ("MB", 1 << 20),
            ("KB", 1 << 10),
            ("B", 1),
        ];

        let raw = self.memory_limit.trim().to_ascii_uppercase();
        let (digits, multiplier) = UNITS
            .iter()
            .find_map(|(suffix, mult)| raw.strip_suffix(suffix).map(|d| (d.trim(), *mult)))
            .unwrap_or((raw.as_str(), 1));

        digits
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| (v * multiplier as f64) as u64)
    }
}

/// Layout of the tiered store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub raw: TierConfig,
    pub cleaned: TierConfig,
    pub aggregated: TierConfig,
    pub quarantine: TierConfig,
    #[serde(default)]
    pub engine: EngineSettings,
}

impl StoreConfig {
    /// All four tiers under one root directory.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            raw: TierConfig::new(root.join("raw")),
            cleaned: TierConfig::new(root.join("cleaned")),
            aggregated: TierConfig::new(root.join("aggregated")),
            quarantine: TierConfig::new(root.join("quarantine")),
            engine: EngineSettings::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::rooted_at("data")
    }
}

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = run once).
    pub max_retries: u32,
    /// Fixed delay between attempts, in milliseconds.
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub const NONE: RetryPolicy = RetryPolicy {
        max_retries: 0,
        delay_ms: 0,
    };

    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay_ms: delay.as_millis() as u64,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Configuration for a pipeline run.
///
/// Use [`PipelineConfig::builder()`] for a fluent setup or
/// [`PipelineConfig::load`] to read a JSON file.
///
/// # Example
///
/// ```rust,ignore
/// use medallion::config::{PipelineConfig, SourceConfig, SourceKind};
///
/// let config = PipelineConfig::builder()
///     .source(SourceConfig::new("orders", SourceKind::Csv, "data/orders.csv"))
///     .store_root("warehouse")
///     .quality_threshold(90.0)
///     .build()?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Raw sources. Only the first one is driven through the DAG.
    pub sources: Vec<SourceConfig>,

    /// Tier layout and engine settings.
    pub store: StoreConfig,

    /// Scores below this value raise a quality alert.
    /// Default: 80.0
    pub quality_threshold: f64,

    /// Whether the remediation task applies fixes.
    /// Default: true
    pub enable_auto_remediation: bool,

    /// Aggregates built from the cleaned table.
    /// Default: all four.
    pub aggregations: Vec<AggregateKind>,

    /// Retry policy of the config-load task.
    /// Default: 2 retries, no delay.
    pub config_retry: RetryPolicy,

    /// Retry policy of the extraction task.
    /// Default: 3 retries, 30s apart.
    pub extract_retry: RetryPolicy,

    /// Directory for dashboard artifacts. `None` disables export.
    /// Default: None
    pub export_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sources: vec![SourceConfig::default()],
            store: StoreConfig::default(),
            quality_threshold: 80.0,
            enable_auto_remediation: true,
            aggregations: AggregateKind::ALL.to_vec(),
            config_retry: RetryPolicy::new(2, Duration::ZERO),
            extract_retry: RetryPolicy::new(3, Duration::from_secs(30)),
            export_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Read a JSON configuration file.
    ///
    /// Missing fields take their default values.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: PipelineConfig = serde_json::from_str(&raw).map_err(|e| {
            PipelineError::Config(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config
            .validate()
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Read a configuration file, falling back to defaults on any failure.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::from_file(path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                warn!("{}; using defaults", e);
                Self::default()
            }
        }
    }

    /// The source driven through the DAG.
    pub fn primary_source(&self) -> Option<&SourceConfig> {
        self.sources.first()
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> std::result::Result<(), ConfigValidationError> {
        if self.sources.is_empty() {
            return Err(ConfigValidationError::NoSources);
        }

        if let Some(source) = self.sources.iter().find(|s| s.name.trim().is_empty()) {
            return Err(ConfigValidationError::InvalidSourceName(
                source.path.display().to_string(),
            ));
        }

        if !(0.0..=100.0).contains(&self.quality_threshold) {
            return Err(ConfigValidationError::InvalidThreshold(
                self.quality_threshold,
            ));
        }

        if self.store.engine.threads == 0 {
            return Err(ConfigValidationError::InvalidThreads(
                self.store.engine.threads,
            ));
        }

        if self.store.engine.memory_limit_bytes().is_none() {
            return Err(ConfigValidationError::InvalidMemoryLimit(
                self.store.engine.memory_limit.clone(),
            ));
        }

        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("At least one source must be configured")]
    NoSources,

    #[error("Source at '{0}' has an empty name")]
    InvalidSourceName(String),

    #[error("Invalid quality threshold: {0} (must be between 0 and 100)")]
    InvalidThreshold(f64),

    #[error("Invalid thread count: {0} (must be at least 1)")]
    InvalidThreads(usize),

    #[error("Invalid memory limit: '{0}'")]
    InvalidMemoryLimit(String),
}

/// Builder for [`PipelineConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    sources: Vec<SourceConfig>,
    store: Option<StoreConfig>,
    quality_threshold: Option<f64>,
    enable_auto_remediation: Option<bool>,
    aggregations: Option<Vec<AggregateKind>>,
    config_retry: Option<RetryPolicy>,
    extract_retry: Option<RetryPolicy>,
    export_dir: Option<PathBuf>,
    threads: Option<usize>,
}

impl PipelineConfigBuilder {
    /// Add a raw source. The first source added is the one that runs.
    pub fn source(mut self, source: SourceConfig) -> Self {
        self.sources.push(source);
        self
    }

    /// Use an explicit store layout.
    pub fn store(mut self, store: StoreConfig) -> Self {
        self.store = Some(store);
        self
    }

    /// Place all tiers under `root`.
    pub fn store_root(mut self, root: impl AsRef<Path>) -> Self {
        self.store = Some(StoreConfig::rooted_at(root));
        self
    }

    /// Set the alerting threshold (0 - 100).
    pub fn quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = Some(threshold);
        self
    }

    /// Enable or disable auto-remediation.
    pub fn enable_auto_remediation(mut self, enabled: bool) -> Self {
        self.enable_auto_remediation = Some(enabled);
        self
    }

    /// Choose which aggregates to build.
    pub fn aggregations(mut self, kinds: impl IntoIterator<Item = AggregateKind>) -> Self {
        self.aggregations = Some(kinds.into_iter().collect());
        self
    }

    /// Retry policy of the config-load task.
    pub fn config_retry(mut self, policy: RetryPolicy) -> Self {
        self.config_retry = Some(policy);
        self
    }

    /// Retry policy of the extraction task.
    pub fn extract_retry(mut self, policy: RetryPolicy) -> Self {
        self.extract_retry = Some(policy);
        self
    }

    /// Export dashboard artifacts to this directory.
    pub fn export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = Some(dir.into());
        self
    }

    /// Override the engine thread count.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Build the configuration, validating it.
    pub fn build(self) -> std::result::Result<PipelineConfig, ConfigValidationError> {
        let defaults = PipelineConfig::default();
        let mut store = self.store.unwrap_or(defaults.store);
        if let Some(threads) = self.threads {
            store.engine.threads = threads;
        }

        let config = PipelineConfig {
            sources: if self.sources.is_empty() {
                defaults.sources
            } else {
                self.sources
            },
            store,
            quality_threshold: self.quality_threshold.unwrap_or(defaults.quality_threshold),
            enable_auto_remediation: self
                .enable_auto_remediation
                .unwrap_or(defaults.enable_auto_remediation),
            aggregations: self.aggregations.unwrap_or(defaults.aggregations),
            config_retry: self.config_retry.unwrap_or(defaults.config_retry),
            extract_retry: self.extract_retry.unwrap_or(defaults.extract_retry),
            export_dir: self.export_dir.or(defaults.export_dir),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.quality_threshold, 80.0);
        assert!(config.enable_auto_remediation);
        assert_eq!(config.aggregations.len(), 4);
        assert_eq!(config.extract_retry.max_retries, 3);
        assert_eq!(config.extract_retry.delay(), Duration::from_secs(30));
        assert_eq!(config.store.engine.threads, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let config = PipelineConfig::builder()
            .source(SourceConfig::new("orders", SourceKind::Parquet, "in/orders.parquet"))
            .store_root("warehouse")
            .quality_threshold(95.0)
            .threads(2)
            .build()
            .unwrap();

        assert_eq!(config.primary_source().unwrap().name, "orders");
        assert_eq!(config.store.raw.path, PathBuf::from("warehouse/raw"));
        assert_eq!(config.quality_threshold, 95.0);
        assert_eq!(config.store.engine.threads, 2);
    }

    #[test]
    fn test_builder_rejects_bad_threshold() {
        let result = PipelineConfig::builder().quality_threshold(150.0).build();
        assert!(matches!(
            result,
            Err(ConfigValidationError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn test_builder_rejects_zero_threads() {
        let result = PipelineConfig::builder().threads(0).build();
        assert!(matches!(result, Err(ConfigValidationError::InvalidThreads(0))));
    }

    #[test]
    fn test_memory_limit_parsing() {
        let mut engine = EngineSettings::default();
        assert_eq!(engine.memory_limit_bytes(), Some(2 * 1024 * 1024 * 1024));

        engine.memory_limit = "512mb".to_string();
        assert_eq!(engine.memory_limit_bytes(), Some(512 * 1024 * 1024));

        engine.memory_limit = "lots".to_string();
        assert_eq!(engine.memory_limit_bytes(), None);
    }

    #[test]
    fn test_load_missing_file_falls_back_to_defaults() {
        let config = PipelineConfig::load("definitely/not/here.json");
        assert_eq!(config.quality_threshold, 80.0);
        assert_eq!(
            config.primary_source().unwrap().name,
            "ecommerce_transactions"
        );
    }

    #[test]
    fn test_from_file_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"sources": [{{"name": "orders", "type": "json", "path": "orders.json"}}],
                "quality_threshold": 70.0}}"#
        )
        .unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.primary_source().unwrap().kind, SourceKind::Json);
        assert_eq!(config.quality_threshold, 70.0);
        assert!(config.enable_auto_remediation);
    }

    #[test]
    fn test_from_file_invalid_json_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = PipelineConfig::from_file(file.path()).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");

        let config = PipelineConfig::load(file.path());
        assert_eq!(config.quality_threshold, 80.0);
    }
}
