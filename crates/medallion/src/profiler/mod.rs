//! Dataset profiling.
//!
//! The profiler derives a [`DatasetProfile`] purely from a frame snapshot:
//! per-column statistics, structural counts, the detected issues and the
//! recommendations that follow from them.

mod statistics;

use crate::error::{Result, ResultExt};
use crate::quality::QualityAnalyzer;
use crate::types::{ColumnProfile, DatasetProfile, SemanticType};
use crate::utils::{duplicate_row_count, percentage};
use polars::prelude::*;
use tracing::{debug, info};

pub(crate) use statistics::{numeric_stats, text_stats};

/// Data profiler for analyzing dataset structure and quality.
pub struct DataProfiler;

impl DataProfiler {
    /// Profile an entire dataset and detect its quality issues.
    pub fn profile_dataset(df: &DataFrame, dataset_name: &str) -> Result<DatasetProfile> {
        info!("Profiling dataset: {}", dataset_name);

        let mut columns = Vec::with_capacity(df.width());
        for name in df.get_column_names() {
            let profile = Self::profile_column(df, name)
                .context(format!("profiling column '{}'", name))?;
            columns.push(profile);
        }

        let duplicate_count = duplicate_row_count(df)?;
        let issues = QualityAnalyzer::identify_issues(&columns, df.height(), duplicate_count);
        let recommendations = QualityAnalyzer::recommendations(&issues);

        info!("Profile complete: {} issues detected", issues.len());

        Ok(DatasetProfile {
            dataset_name: dataset_name.to_string(),
            row_count: df.height(),
            column_count: df.width(),
            estimated_size_bytes: df.estimated_size(),
            duplicate_count,
            columns,
            issues,
            recommendations,
        })
    }

    /// Profile a single column of `df`.
    pub fn profile_column(df: &DataFrame, col_name: &str) -> Result<ColumnProfile> {
        let series = crate::utils::series(df, col_name)?;
        let rows = df.height();
        let null_count = series.null_count();
        let unique_count = if rows == 0 { 0 } else { series.n_unique()? };
        let semantic_type = SemanticType::from_dtype(series.dtype());

        let numeric = if semantic_type.is_numeric() {
            numeric_stats(series)?
        } else {
            None
        };
        let text = if semantic_type == SemanticType::Text {
            text_stats(series)?
        } else {
            None
        };

        debug!(
            "Column '{}': {} nulls, {} unique, type {}",
            col_name, null_count, unique_count, semantic_type
        );

        Ok(ColumnProfile {
            name: col_name.to_string(),
            dtype: series.dtype().to_string(),
            semantic_type,
            null_count,
            null_percentage: percentage(null_count, rows),
            unique_count,
            unique_percentage: percentage(unique_count, rows),
            numeric,
            text,
        })
    }
}
