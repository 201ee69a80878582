//! Semantic business rules with per-rule failure accounting.

use crate::error::Result;
use crate::utils::{
    date_to_epoch_days, date_values, f64_values, is_date_dtype, is_numeric_dtype, is_text_dtype,
    split_rows,
};
use chrono::{NaiveDate, Utc};
use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

/// Columns that must never be null.
pub const CRITICAL_COLUMNS: [&str; 3] = ["customer_id", "order_id", "order_date"];

/// Columns whose values must be strictly positive.
pub const POSITIVE_COLUMNS: [&str; 3] = ["quantity", "unit_price", "total_amount"];

/// A single business rule, keyed by the column it inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusinessRule {
    NotNull(String),
    Positive(String),
    /// Dates must not be later than the reference date.
    NotInFuture(String),
}

impl BusinessRule {
    pub fn column(&self) -> &str {
        match self {
            Self::NotNull(c) | Self::Positive(c) | Self::NotInFuture(c) => c,
        }
    }

    pub fn rule_id(&self) -> String {
        match self {
            Self::NotNull(c) => format!("NOT_NULL_{}", c),
            Self::Positive(c) => format!("POSITIVE_{}", c),
            Self::NotInFuture(_) => "VALID_DATE_RANGE".to_string(),
        }
    }

    /// Per-row pass flags. Null never passes `Positive` or `NotInFuture`.
    fn mask(&self, series: &Series, today: NaiveDate) -> Result<Vec<bool>> {
        match self {
            Self::NotNull(_) => Ok(series
                .is_not_null()
                .into_iter()
                .map(|v| v.unwrap_or(false))
                .collect()),
            Self::Positive(_) => {
                if !is_numeric_dtype(series.dtype()) {
                    return Ok(vec![false; series.len()]);
                }
                Ok(f64_values(series)?
                    .into_iter()
                    .map(|v| v.is_some_and(|v| v > 0.0))
                    .collect())
            }
            Self::NotInFuture(_) => {
                if !(is_date_dtype(series.dtype()) || is_text_dtype(series.dtype())) {
                    return Ok(vec![false; series.len()]);
                }
                let limit = date_to_epoch_days(today);
                Ok(date_values(series)?
                    .into_iter()
                    .map(|d| d.is_some_and(|d| d <= limit))
                    .collect())
            }
        }
    }
}

/// Rows failing one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleFailure {
    pub rule_id: String,
    pub column: String,
    pub count: usize,
}

/// Outcome of business-rule validation.
#[derive(Debug, Clone)]
pub struct BusinessValidation {
    pub valid: DataFrame,
    pub failed: DataFrame,
    pub failures: Vec<RuleFailure>,
}

/// Applies an ordered list of [`BusinessRule`]s.
#[derive(Debug, Clone)]
pub struct BusinessRuleValidator {
    rules: Vec<BusinessRule>,
    reference_date: Option<NaiveDate>,
}

impl Default for BusinessRuleValidator {
    fn default() -> Self {
        let mut rules: Vec<BusinessRule> = CRITICAL_COLUMNS
            .iter()
            .map(|c| BusinessRule::NotNull(c.to_string()))
            .collect();
        rules.extend(
            POSITIVE_COLUMNS
                .iter()
                .map(|c| BusinessRule::Positive(c.to_string())),
        );
        rules.push(BusinessRule::NotInFuture("order_date".to_string()));

        Self::new(rules)
    }
}

impl BusinessRuleValidator {
    pub fn new(rules: Vec<BusinessRule>) -> Self {
        Self {
            rules,
            reference_date: None,
        }
    }

    /// Pin "today" instead of reading the UTC clock.
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    pub fn rules(&self) -> &[BusinessRule] {
        &self.rules
    }

    /// Evaluate every rule; rows passing all of them are `valid`.
    ///
    /// Rules whose column is absent from `df` are skipped.
    pub fn validate(&self, df: &DataFrame) -> Result<BusinessValidation> {
        info!("Validating business rules...");

        let today = self
            .reference_date
            .unwrap_or_else(|| Utc::now().date_naive());
        let mut keep = vec![true; df.height()];
        let mut failures = Vec::new();

        for rule in &self.rules {
            let Ok(column) = df.column(rule.column()) else {
                debug!("Skipping rule {}: column absent", rule.rule_id());
                continue;
            };

            let mask = rule.mask(column.as_materialized_series(), today)?;
            let failed = mask.iter().filter(|passed| !**passed).count();
            if failed > 0 {
                failures.push(RuleFailure {
                    rule_id: rule.rule_id(),
                    column: rule.column().to_string(),
                    count: failed,
                });
            }
            for (k, passed) in keep.iter_mut().zip(mask) {
                *k &= passed;
            }
        }

        let (valid, failed) = split_rows(df, &keep)?;
        info!(
            "Business rules: {}/{} records passed",
            valid.height(),
            df.height()
        );

        Ok(BusinessValidation {
            valid,
            failed,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn sample() -> DataFrame {
        df![
            "customer_id" => [Some("C1"), Some("C2"), None, Some("C4")],
            "order_id" => ["O1", "O2", "O3", "O4"],
            "order_date" => ["2024-01-01", "2024-01-02", "2024-01-03", "2025-12-31"],
            "quantity" => [1i64, -1, 2, 3],
            "unit_price" => [100.0, 50.0, 75.0, 200.0],
            "total_amount" => [100.0, 50.0, 150.0, 600.0],
        ]
        .unwrap()
    }

    #[test]
    fn test_default_rules_accounting() {
        let validator = BusinessRuleValidator::default().with_reference_date(reference());
        let result = validator.validate(&sample()).unwrap();

        assert_eq!(result.valid.height(), 1);
        assert_eq!(result.failed.height(), 3);
        assert_eq!(
            result.failures,
            vec![
                RuleFailure {
                    rule_id: "NOT_NULL_customer_id".to_string(),
                    column: "customer_id".to_string(),
                    count: 1,
                },
                RuleFailure {
                    rule_id: "POSITIVE_quantity".to_string(),
                    column: "quantity".to_string(),
                    count: 1,
                },
                RuleFailure {
                    rule_id: "VALID_DATE_RANGE".to_string(),
                    column: "order_date".to_string(),
                    count: 1,
                },
            ]
        );
    }

    #[test]
    fn test_row_conservation() {
        let df = sample();
        let result = BusinessRuleValidator::default()
            .with_reference_date(reference())
            .validate(&df)
            .unwrap();
        assert_eq!(result.valid.height() + result.failed.height(), df.height());
    }

    #[test]
    fn test_absent_columns_are_skipped() {
        let df = df!["quantity" => [1i64, 2]].unwrap();
        let result = BusinessRuleValidator::default().validate(&df).unwrap();
        assert_eq!(result.valid.height(), 2);
        assert!(result.failures.is_empty());
    }

    #[test]
    fn test_nulls_fail_positive_and_date_rules() {
        let df = df![
            "quantity" => [Some(1i64), None],
            "order_date" => [Some("2024-01-01"), Some("not a date")],
        ]
        .unwrap();
        let validator = BusinessRuleValidator::new(vec![
            BusinessRule::Positive("quantity".to_string()),
            BusinessRule::NotInFuture("order_date".to_string()),
        ])
        .with_reference_date(reference());

        let result = validator.validate(&df).unwrap();
        assert_eq!(result.valid.height(), 1);
        assert_eq!(result.failures.len(), 2);
        assert!(result.failures.iter().all(|f| f.count == 1));
    }

    #[test]
    fn test_overlapping_failures_count_independently() {
        let df = df![
            "quantity" => [-1i64, 2],
            "unit_price" => [-5.0, 3.0],
        ]
        .unwrap();
        let result = BusinessRuleValidator::default().validate(&df).unwrap();
        assert_eq!(result.failures.len(), 2);
        assert_eq!(result.failed.height(), 1);
    }
}
