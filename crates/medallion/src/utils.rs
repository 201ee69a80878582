//! Shared utilities for the staged pipeline.
//!
//! This module contains common helper functions used across the validators,
//! the profiler, the remediation engine and the store.

use crate::error::{PipelineError, Result};
use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use std::collections::HashSet;

// =============================================================================
// Data Type Utilities
// =============================================================================

/// Check if a DataType is numeric (integer or float).
#[inline]
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Check if a DataType is a date or datetime type.
#[inline]
pub fn is_date_dtype(dtype: &DataType) -> bool {
    matches!(dtype, DataType::Datetime(_, _) | DataType::Date)
}

/// Check if a DataType holds text.
#[inline]
pub fn is_text_dtype(dtype: &DataType) -> bool {
    matches!(dtype, DataType::String)
}

// =============================================================================
// Column Access
// =============================================================================

/// Look up a column as a materialized Series.
pub fn series<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Series> {
    df.column(name)
        .map(|c| c.as_materialized_series())
        .map_err(|_| PipelineError::ColumnNotFound(name.to_string()))
}

/// Numeric values of a series as `f64`, nulls preserved.
pub fn f64_values(series: &Series) -> Result<Vec<Option<f64>>> {
    let casted = series.cast(&DataType::Float64)?;
    Ok(casted.f64()?.into_iter().collect())
}

/// Text values of a string series, nulls preserved.
pub fn str_values(series: &Series) -> Result<Vec<Option<String>>> {
    Ok(series
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

// =============================================================================
// Dates
// =============================================================================

/// Days between 0001-01-01 (CE day 1) and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Format accepted for date strings.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a `YYYY-MM-DD` string; surrounding whitespace is ignored.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

/// Days since the Unix epoch (the physical representation of polars `Date`).
pub fn date_to_epoch_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

pub fn epoch_days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
}

/// Whether a column name denotes a date column (`date` or `*_date`).
pub fn is_date_like_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "date" || lower.ends_with("_date")
}

/// Date values of a series as epoch days.
///
/// Text is parsed non-strictly: values that do not parse become null.
pub fn date_values(series: &Series) -> Result<Vec<Option<i32>>> {
    match series.dtype() {
        DataType::String => Ok(series
            .str()?
            .into_iter()
            .map(|v| v.and_then(parse_date).map(date_to_epoch_days))
            .collect()),
        DataType::Date => {
            let physical = series.cast(&DataType::Int32)?;
            Ok(physical.i32()?.into_iter().collect())
        }
        DataType::Datetime(_, _) => {
            let physical = series.cast(&DataType::Date)?.cast(&DataType::Int32)?;
            Ok(physical.i32()?.into_iter().collect())
        }
        other => Err(PipelineError::InvalidDataset(format!(
            "column '{}' of type {} cannot be read as dates",
            series.name(),
            other
        ))),
    }
}

/// Convert a text series into a polars `Date` series.
pub fn parse_date_series(series: &Series) -> Result<Series> {
    let days = date_values(series)?;
    Ok(Series::new(series.name().clone(), days).cast(&DataType::Date)?)
}

// =============================================================================
// Column Names
// =============================================================================

/// Lowercase a column name and replace spaces and hyphens with underscores.
pub fn normalize_column_name(name: &str) -> String {
    name.trim().to_lowercase().replace([' ', '-'], "_")
}

/// Normalized names for every column, rejecting collisions.
pub fn normalized_column_names(df: &DataFrame) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut names = Vec::with_capacity(df.width());

    for name in df.get_column_names() {
        let normalized = normalize_column_name(name);
        if !seen.insert(normalized.clone()) {
            return Err(PipelineError::InvalidDataset(format!(
                "column '{}' collides with another column after normalization ('{}')",
                name, normalized
            )));
        }
        names.push(normalized);
    }

    Ok(names)
}

// =============================================================================
// Row Selection
// =============================================================================

/// Build a boolean mask series from plain booleans.
pub fn mask_from_bools(name: &str, values: &[bool]) -> BooleanChunked {
    BooleanChunked::from_slice(name.into(), values)
}

/// Keep the rows whose flag is `true`.
pub fn filter_rows(df: &DataFrame, keep: &[bool]) -> Result<DataFrame> {
    Ok(df.filter(&mask_from_bools("keep", keep))?)
}

/// Split a frame into (kept, rejected) rows according to `keep`.
///
/// Every input row ends up in exactly one of the two outputs.
pub fn split_rows(df: &DataFrame, keep: &[bool]) -> Result<(DataFrame, DataFrame)> {
    let rejected: Vec<bool> = keep.iter().map(|k| !k).collect();
    Ok((filter_rows(df, keep)?, filter_rows(df, &rejected)?))
}

/// Remove duplicate rows, keeping the first occurrence in original order.
pub fn deduplicate_stable(df: &DataFrame) -> Result<DataFrame> {
    if df.width() == 0 {
        return Ok(df.clone());
    }
    Ok(df.unique_stable(None, UniqueKeepStrategy::First, None)?)
}

/// Number of whole-row duplicates (rows minus distinct rows).
pub fn duplicate_row_count(df: &DataFrame) -> Result<usize> {
    Ok(df.height() - deduplicate_stable(df)?.height())
}

/// Trim a text series; returns the trimmed series and the number of values changed.
pub fn trim_text_series(series: &Series) -> Result<(Series, usize)> {
    let mut changed = 0;
    let trimmed: Vec<Option<String>> = series
        .str()?
        .into_iter()
        .map(|v| {
            v.map(|s| {
                let t = s.trim();
                if t.len() != s.len() {
                    changed += 1;
                }
                t.to_string()
            })
        })
        .collect();

    Ok((Series::new(series.name().clone(), trimmed), changed))
}

/// Percentage helper that treats an empty denominator as 0%.
#[inline]
pub fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

// =============================================================================
// Tests
// =============================================================================
