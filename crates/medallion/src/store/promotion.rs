//! The fixed raw → cleaned promotion pipeline.
//!
//! Steps run in this order:
//! 1. Remove whole-row duplicates (stable, first occurrence kept)
//! 2. Trim whitespace in every text column
//! 3. Normalize column names
//! 4. Parse date-like text columns (`%Y-%m-%d`, unparseable values become null)
//! 5. Drop rows with nulls in critical columns
//! 6. Apply range filters (nulls fail)
//!
//! Rules naming a column the table does not have are skipped. The output is
//! a pure function of the input frame.

use crate::error::Result;
use crate::utils::{
    deduplicate_stable, f64_values, filter_rows, is_date_like_name, normalized_column_names,
    parse_date_series, trim_text_series,
};
use crate::validation::{CRITICAL_COLUMNS, Check};
use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

/// Range filters applied after the critical-null filter.
fn range_filters() -> [(&'static str, Check); 4] {
    [
        ("quantity", Check::GreaterThan(0.0)),
        ("unit_price", Check::GreaterThan(0.0)),
        ("customer_age", Check::between(18.0, 100.0)),
        ("satisfaction_score", Check::between(1.0, 10.0)),
    ]
}

/// What a promotion changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PromotionStats {
    pub input_rows: usize,
    pub duplicates_removed: usize,
    pub values_trimmed: usize,
    pub columns_renamed: usize,
    pub date_columns_parsed: Vec<String>,
    pub critical_null_rows_removed: usize,
    pub out_of_range_rows_removed: usize,
    pub output_rows: usize,
}

/// Apply the promotion steps to a raw table.
pub fn promote(raw: DataFrame) -> Result<(DataFrame, PromotionStats)> {
    let mut stats = PromotionStats {
        input_rows: raw.height(),
        ..Default::default()
    };

    // 1. Duplicates
    let mut df = deduplicate_stable(&raw)?;
    stats.duplicates_removed = raw.height() - df.height();

    // 2. Whitespace
    stats.values_trimmed = trim_all_text(&mut df)?;

    // 3. Column names
    let names = normalized_column_names(&df)?;
    stats.columns_renamed = df
        .get_column_names()
        .iter()
        .zip(&names)
        .filter(|(old, new)| old.as_str() != new.as_str())
        .count();
    df.set_column_names(names.iter().map(String::as_str))?;

    // 4. Dates
    stats.date_columns_parsed = parse_date_columns(&mut df)?;

    // 5. Critical nulls
    let before = df.height();
    df = drop_critical_nulls(df)?;
    stats.critical_null_rows_removed = before - df.height();

    // 6. Ranges
    let before = df.height();
    df = apply_range_filters(df)?;
    stats.out_of_range_rows_removed = before - df.height();

    stats.output_rows = df.height();
    info!(
        "Promotion kept {}/{} rows ({} duplicates, {} critical nulls, {} out of range)",
        stats.output_rows,
        stats.input_rows,
        stats.duplicates_removed,
        stats.critical_null_rows_removed,
        stats.out_of_range_rows_removed
    );

    Ok((df, stats))
}

fn trim_all_text(df: &mut DataFrame) -> Result<usize> {
    let text_columns: Vec<String> = df
        .get_columns()
        .iter()
        .filter(|c| c.dtype() == &DataType::String)
        .map(|c| c.name().to_string())
        .collect();

    let mut trimmed_total = 0;
    for name in &text_columns {
        let (trimmed, changed) = trim_text_series(crate::utils::series(df, name)?)?;
        if changed > 0 {
            df.replace(name, trimmed)?;
            trimmed_total += changed;
        }
    }
    Ok(trimmed_total)
}

fn parse_date_columns(df: &mut DataFrame) -> Result<Vec<String>> {
    let candidates: Vec<String> = df
        .get_columns()
        .iter()
        .filter(|c| c.dtype() == &DataType::String && is_date_like_name(c.name()))
        .map(|c| c.name().to_string())
        .collect();

    for name in &candidates {
        let parsed = parse_date_series(crate::utils::series(df, name)?)?;
        debug!(
            "Parsed date column '{}' ({} nulls after parsing)",
            name,
            parsed.null_count()
        );
        df.replace(name, parsed)?;
    }
    Ok(candidates)
}

fn drop_critical_nulls(df: DataFrame) -> Result<DataFrame> {
    let mut keep = vec![true; df.height()];
    for name in CRITICAL_COLUMNS {
        let Ok(column) = df.column(name) else {
            continue;
        };
        for (k, valid) in keep.iter_mut().zip(column.is_not_null().into_iter()) {
            *k &= valid.unwrap_or(false);
        }
    }
    filter_rows(&df, &keep)
}

fn apply_range_filters(df: DataFrame) -> Result<DataFrame> {
    let mut keep = vec![true; df.height()];
    for (name, check) in range_filters() {
        let Ok(column) = df.column(name) else {
            continue;
        };
        let values = f64_values(column.as_materialized_series())?;
        for (k, value) in keep.iter_mut().zip(values) {
            *k &= value.is_some_and(|v| check.passes_numeric(v));
        }
    }
    filter_rows(&df, &keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw() -> DataFrame {
        df![
            "Customer ID" => [Some("C_1 "), Some("C_1 "), Some("C_2"), None, Some("C_4"), Some("C_5")],
            "Order-ID" => ["ORD_1", "ORD_1", "ORD_2", "ORD_3", "ORD_4", "ORD_5"],
            "order_date" => ["2024-01-01", "2024-01-01", "2024-01-02", "2024-01-03", "bad", "2024-01-05"],
            "quantity" => [Some(1i64), Some(1), Some(2), Some(1), Some(1), Some(0)],
            "customer_age" => [30i64, 30, 17, 40, 50, 60],
        ]
        .unwrap()
    }

    #[test]
    fn test_promote_steps_in_order() {
        let (cleaned, stats) = promote(raw()).unwrap();

        assert_eq!(stats.duplicates_removed, 1);
        assert_eq!(stats.values_trimmed, 1);
        assert_eq!(stats.columns_renamed, 2);
        assert_eq!(stats.date_columns_parsed, vec!["order_date".to_string()]);
        // row with null customer_id and row with unparseable date
        assert_eq!(stats.critical_null_rows_removed, 2);
        // age 17 and quantity 0
        assert_eq!(stats.out_of_range_rows_removed, 2);
        assert_eq!(cleaned.height(), 1);

        let names: Vec<&str> = cleaned.get_column_names().iter().map(|n| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["customer_id", "order_id", "order_date", "quantity", "customer_age"]
        );
        assert_eq!(cleaned.column("order_date").unwrap().dtype(), &DataType::Date);
        assert_eq!(
            cleaned.column("customer_id").unwrap().str().unwrap().get(0),
            Some("C_1")
        );
    }

    #[test]
    fn test_promote_is_deterministic() {
        let (first, _) = promote(raw()).unwrap();
        let (second, _) = promote(raw()).unwrap();
        assert!(first.equals_missing(&second));
    }

    #[test]
    fn test_absent_rule_columns_are_skipped() {
        let df = df!["value" => [1i64, -1]].unwrap();
        let (cleaned, stats) = promote(df).unwrap();
        assert_eq!(cleaned.height(), 2);
        assert_eq!(stats.out_of_range_rows_removed, 0);
    }

    #[test]
    fn test_null_fails_range_filter() {
        let df = df!["unit_price" => [Some(3.5), None]].unwrap();
        let (cleaned, _) = promote(df).unwrap();
        assert_eq!(cleaned.height(), 1);
    }

    #[test]
    fn test_colliding_names_error() {
        let df = df!["Order ID" => [1i64], "order_id" => [2i64]].unwrap();
        assert!(promote(df).is_err());
    }
}
