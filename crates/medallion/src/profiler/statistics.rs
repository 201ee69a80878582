//! Statistical summaries for column profiling.

use crate::error::Result;
use crate::types::{NumericStats, TextStats};
use crate::utils::f64_values;
use polars::prelude::*;

/// Numeric statistics over the non-null values, `None` if there are none.
pub(crate) fn numeric_stats(series: &Series) -> Result<Option<NumericStats>> {
    let mut values: Vec<f64> = f64_values(series)?.into_iter().flatten().collect();
    if values.is_empty() {
        return Ok(None);
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = calculate_std(&values, mean);
    let zero_count = values.iter().filter(|v| **v == 0.0).count();
    let negative_count = values.iter().filter(|v| **v < 0.0).count();

    values.sort_by(f64::total_cmp);
    let min = values[0];
    let max = values[values.len() - 1];
    let median = calculate_median(&values);

    Ok(Some(NumericStats {
        min,
        max,
        mean,
        median,
        std,
        zero_count,
        negative_count,
    }))
}

/// Text statistics over the non-null values, `None` if there are none.
pub(crate) fn text_stats(series: &Series) -> Result<Option<TextStats>> {
    let values: Vec<&str> = series.str()?.into_iter().flatten().collect();
    if values.is_empty() {
        return Ok(None);
    }

    let lengths: Vec<usize> = values.iter().map(|v| v.chars().count()).collect();
    let min_length = lengths.iter().copied().min().unwrap_or(0);
    let max_length = lengths.iter().copied().max().unwrap_or(0);
    let avg_length = lengths.iter().sum::<usize>() as f64 / lengths.len() as f64;

    Ok(Some(TextStats {
        min_length,
        max_length,
        avg_length,
        empty_count: values.iter().filter(|v| v.is_empty()).count(),
        whitespace_count: values.iter().filter(|v| v.trim() != **v).count(),
    }))
}

/// Sample standard deviation (n - 1); 0 for fewer than two values.
pub(crate) fn calculate_std(values: &[f64], mean: f64) -> f64 {
    let n = values.len() as f64;
    if n <= 1.0 {
        return 0.0;
    }

    let variance: f64 = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}

/// Median of already sorted values.
pub(crate) fn calculate_median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}
