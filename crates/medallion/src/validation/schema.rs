//! Declarative schema checks over raw input.
//!
//! A [`Schema`] is an ordered list of [`ColumnSpec`]s plus dataset-level
//! [`CrossColumnCheck`]s. Checks are plain tagged values keyed by column name
//! and are resolved against the polars dtypes of the frame at validation time.

use crate::error::{PipelineError, Result};
use crate::types::SemanticType;
use crate::utils::{f64_values, split_rows, str_values};
use once_cell::sync::Lazy;
use polars::prelude::*;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};

static CUSTOMER_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]+_\d+$").expect("Invalid regex: customer id"));
static ORDER_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ORD_\d+$").expect("Invalid regex: order id"));

/// Product categories accepted by the e-commerce schema.
pub const PRODUCT_CATEGORIES: [&str; 6] = [
    "Electronics",
    "Clothing",
    "Home & Garden",
    "Books",
    "Sports",
    "Beauty",
];

// ============================================================================
// Checks
// ============================================================================

/// A value-level check on a single column. Nulls are never checked.
#[derive(Debug, Clone)]
pub enum Check {
    GreaterThan(f64),
    GreaterOrEqual(f64),
    LessThan(f64),
    LessOrEqual(f64),
    /// Inclusive on both ends.
    Between { min: f64, max: f64 },
    OneOf(Vec<String>),
    Matches(Regex),
}

impl Check {
    pub fn between(min: f64, max: f64) -> Self {
        Self::Between { min, max }
    }

    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::OneOf(values.into_iter().map(Into::into).collect())
    }

    /// Compile a regex check. Unanchored patterns match anywhere in the value.
    pub fn matches(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self::Matches)
            .map_err(|e| PipelineError::Config(format!("invalid regex '{}': {}", pattern, e)))
    }

    /// Text checks apply to string columns, the rest to numeric columns.
    pub fn is_text_check(&self) -> bool {
        matches!(self, Self::OneOf(_) | Self::Matches(_))
    }

    pub(crate) fn passes_numeric(&self, value: f64) -> bool {
        match self {
            Self::GreaterThan(bound) => value > *bound,
            Self::GreaterOrEqual(bound) => value >= *bound,
            Self::LessThan(bound) => value < *bound,
            Self::LessOrEqual(bound) => value <= *bound,
            Self::Between { min, max } => value >= *min && value <= *max,
            Self::OneOf(_) | Self::Matches(_) => true,
        }
    }

    fn passes_text(&self, value: &str) -> bool {
        match self {
            Self::OneOf(allowed) => allowed.iter().any(|a| a == value),
            Self::Matches(regex) => regex.is_match(value),
            _ => true,
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GreaterThan(b) => write!(f, "greater_than({})", b),
            Self::GreaterOrEqual(b) => write!(f, "greater_than_or_equal_to({})", b),
            Self::LessThan(b) => write!(f, "less_than({})", b),
            Self::LessOrEqual(b) => write!(f, "less_than_or_equal_to({})", b),
            Self::Between { min, max } => write!(f, "in_range({}, {})", min, max),
            Self::OneOf(values) => write!(f, "isin({:?})", values),
            Self::Matches(regex) => write!(f, "str_matches('{}')", regex.as_str()),
        }
    }
}

/// Comparison operator of a cross-column check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl CompareOp {
    fn holds(&self, left: f64, right: f64) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Eq => left == right,
            Self::Ge => left >= right,
            Self::Gt => left > right,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ge => ">=",
            Self::Gt => ">",
        }
    }
}

/// Row-wise comparison between two numeric columns, e.g. `min <= max`.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossColumnCheck {
    pub left: String,
    pub op: CompareOp,
    pub right: String,
}

impl CrossColumnCheck {
    pub fn new(left: impl Into<String>, op: CompareOp, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            op,
            right: right.into(),
        }
    }
}

impl fmt::Display for CrossColumnCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op.symbol(), self.right)
    }
}

// ============================================================================
// Schema
// ============================================================================

/// Expected shape of one column.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub semantic_type: SemanticType,
    pub nullable: bool,
    pub checks: Vec<Check>,
}

impl ColumnSpec {
    /// A nullable column with no checks.
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic_type,
            nullable: true,
            checks: Vec::new(),
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    /// Integers are accepted where floats are declared.
    fn accepts(&self, actual: SemanticType) -> bool {
        actual == self.semantic_type
            || (self.semantic_type == SemanticType::Float && actual == SemanticType::Integer)
    }
}

/// An ordered, validated set of column specs and cross-column checks.
#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<ColumnSpec>,
    cross_checks: Vec<CrossColumnCheck>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn cross_checks(&self) -> &[CrossColumnCheck] {
        &self.cross_checks
    }

    /// Schema of the e-commerce transactions feed.
    pub fn ecommerce() -> Self {
        let columns = vec![
            ColumnSpec::new("customer_id", SemanticType::Text)
                .nullable(false)
                .check(Check::Matches(CUSTOMER_ID_PATTERN.clone())),
            ColumnSpec::new("order_id", SemanticType::Text)
                .nullable(false)
                .check(Check::Matches(ORDER_ID_PATTERN.clone())),
            ColumnSpec::new("order_date", SemanticType::Text).nullable(false),
            ColumnSpec::new("product_category", SemanticType::Text)
                .check(Check::one_of(PRODUCT_CATEGORIES)),
            ColumnSpec::new("quantity", SemanticType::Integer).check(Check::GreaterThan(0.0)),
            ColumnSpec::new("unit_price", SemanticType::Float).check(Check::GreaterThan(0.0)),
            ColumnSpec::new("total_amount", SemanticType::Float)
                .check(Check::GreaterOrEqual(0.0)),
            ColumnSpec::new("customer_age", SemanticType::Integer)
                .check(Check::GreaterOrEqual(18.0))
                .check(Check::LessOrEqual(100.0)),
            ColumnSpec::new("satisfaction_score", SemanticType::Integer)
                .check(Check::GreaterOrEqual(1.0))
                .check(Check::LessOrEqual(10.0)),
        ];

        Self {
            columns,
            cross_checks: Vec::new(),
        }
    }
}

/// Builder for [`Schema`]; `build` rejects checks on undeclared or
/// incompatible columns.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    columns: Vec<ColumnSpec>,
    cross_checks: Vec<CrossColumnCheck>,
}

impl SchemaBuilder {
    pub fn column(mut self, spec: ColumnSpec) -> Self {
        self.columns.push(spec);
        self
    }

    pub fn cross_check(mut self, check: CrossColumnCheck) -> Self {
        self.cross_checks.push(check);
        self
    }

    pub fn build(self) -> Result<Schema> {
        let mut declared = HashSet::new();
        for spec in &self.columns {
            if !declared.insert(spec.name.as_str()) {
                return Err(PipelineError::Config(format!(
                    "column '{}' declared twice in schema",
                    spec.name
                )));
            }

            for check in &spec.checks {
                let compatible = if check.is_text_check() {
                    spec.semantic_type == SemanticType::Text
                } else {
                    spec.semantic_type.is_numeric()
                };
                if !compatible {
                    return Err(PipelineError::Config(format!(
                        "check {} cannot apply to {} column '{}'",
                        check, spec.semantic_type, spec.name
                    )));
                }
            }
        }

        for cross in &self.cross_checks {
            for name in [&cross.left, &cross.right] {
                let spec = self.columns.iter().find(|c| &c.name == name).ok_or_else(|| {
                    PipelineError::Config(format!(
                        "cross-column check '{}' references undeclared column '{}'",
                        cross, name
                    ))
                })?;
                if !spec.semantic_type.is_numeric() {
                    return Err(PipelineError::Config(format!(
                        "cross-column check '{}' needs numeric column '{}'",
                        cross, name
                    )));
                }
            }
        }

        Ok(Schema {
            columns: self.columns,
            cross_checks: self.cross_checks,
        })
    }
}

// ============================================================================
// Validation
// ============================================================================

/// How validation reports violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// Stop at the first violation and return it as an error.
    FailFast,
    /// Check everything and split the rows into valid and failed sets.
    #[default]
    Lazy,
}

/// One violation found by lazy validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureCase {
    /// Offending row; `None` for column-level failures.
    pub row: Option<usize>,
    pub column: String,
    pub check: String,
    pub failure_value: String,
}

/// Outcome of lazy schema validation.
#[derive(Debug, Clone)]
pub struct SchemaValidation {
    pub valid: DataFrame,
    pub failed: DataFrame,
    pub failure_cases: Vec<FailureCase>,
}

impl SchemaValidation {
    pub fn is_clean(&self) -> bool {
        self.failure_cases.is_empty()
    }

    /// Row-level failure cases only.
    pub fn row_failures(&self) -> impl Iterator<Item = &FailureCase> {
        self.failure_cases.iter().filter(|c| c.row.is_some())
    }
}

/// Validates frames against a [`Schema`].
pub struct SchemaValidator;

impl SchemaValidator {
    /// Validate `df` against `schema`.
    ///
    /// In [`ValidationMode::FailFast`] the first violation is returned as
    /// [`PipelineError::SchemaViolation`]. In [`ValidationMode::Lazy`] every
    /// violation is collected and the rows with a row-level violation are
    /// moved to `failed`.
    pub fn validate(
        df: &DataFrame,
        schema: &Schema,
        mode: ValidationMode,
    ) -> Result<SchemaValidation> {
        info!(
            "Validating schema: {} rows, {} column specs",
            df.height(),
            schema.columns.len()
        );

        let stop_at_first = mode == ValidationMode::FailFast;
        let failure_cases = collect_failures(df, schema, stop_at_first)?;

        if stop_at_first {
            return match failure_cases.into_iter().next() {
                Some(first) => Err(PipelineError::SchemaViolation {
                    row: first.row,
                    column: first.column,
                    check: first.check,
                }),
                None => Ok(SchemaValidation {
                    valid: df.clone(),
                    failed: df.clear(),
                    failure_cases: Vec::new(),
                }),
            };
        }

        let mut keep = vec![true; df.height()];
        for row in failure_cases.iter().filter_map(|c| c.row) {
            keep[row] = false;
        }
        let (valid, failed) = split_rows(df, &keep)?;

        if failure_cases.is_empty() {
            info!("Schema validation passed");
        } else {
            warn!(
                "Schema validation found {} failure cases; {} of {} rows isolated",
                failure_cases.len(),
                failed.height(),
                df.height()
            );
        }

        Ok(SchemaValidation {
            valid,
            failed,
            failure_cases,
        })
    }
}

fn collect_failures(
    df: &DataFrame,
    schema: &Schema,
    stop_at_first: bool,
) -> Result<Vec<FailureCase>> {
    let mut cases = Vec::new();

    for spec in &schema.columns {
        let Ok(column) = df.column(&spec.name) else {
            cases.push(FailureCase {
                row: None,
                column: spec.name.clone(),
                check: "column_in_dataframe".to_string(),
                failure_value: spec.name.clone(),
            });
            if stop_at_first {
                return Ok(cases);
            }
            continue;
        };

        let series = column.as_materialized_series();
        let actual = SemanticType::from_dtype(series.dtype());
        if !spec.accepts(actual) {
            debug!(
                "Column '{}' has dtype {}, expected {}",
                spec.name,
                series.dtype(),
                spec.semantic_type
            );
            cases.push(FailureCase {
                row: None,
                column: spec.name.clone(),
                check: format!("dtype('{}')", spec.semantic_type),
                failure_value: series.dtype().to_string(),
            });
            if stop_at_first {
                return Ok(cases);
            }
            continue;
        }

        column_failures(series, spec, stop_at_first, &mut cases)?;
        if stop_at_first && !cases.is_empty() {
            return Ok(cases);
        }
    }

    for cross in &schema.cross_checks {
        cross_failures(df, cross, stop_at_first, &mut cases)?;
        if stop_at_first && !cases.is_empty() {
            return Ok(cases);
        }
    }

    Ok(cases)
}

/// Row-major scan of one column: per row, the null check first, then the
/// value checks in declaration order.
fn column_failures(
    series: &Series,
    spec: &ColumnSpec,
    stop_at_first: bool,
    cases: &mut Vec<FailureCase>,
) -> Result<()> {
    let failure = |row: usize, check: String, value: String| FailureCase {
        row: Some(row),
        column: spec.name.clone(),
        check,
        failure_value: value,
    };

    if spec.semantic_type == SemanticType::Text {
        for (row, value) in str_values(series)?.into_iter().enumerate() {
            match value {
                None if !spec.nullable => {
                    cases.push(failure(row, "not_nullable".to_string(), "null".to_string()))
                }
                None => {}
                Some(v) => {
                    for check in spec.checks.iter().filter(|c| !c.passes_text(&v)) {
                        cases.push(failure(row, check.to_string(), v.clone()));
                        if stop_at_first {
                            return Ok(());
                        }
                    }
                }
            }
            if stop_at_first && !cases.is_empty() {
                return Ok(());
            }
        }
    } else if spec.semantic_type.is_numeric() {
        for (row, value) in f64_values(series)?.into_iter().enumerate() {
            match value {
                None if !spec.nullable => {
                    cases.push(failure(row, "not_nullable".to_string(), "null".to_string()))
                }
                None => {}
                Some(v) => {
                    for check in spec.checks.iter().filter(|c| !c.passes_numeric(v)) {
                        cases.push(failure(row, check.to_string(), v.to_string()));
                        if stop_at_first {
                            return Ok(());
                        }
                    }
                }
            }
            if stop_at_first && !cases.is_empty() {
                return Ok(());
            }
        }
    } else if !spec.nullable {
        for row in 0..series.len() {
            if series.get(row)?.is_null() {
                cases.push(failure(row, "not_nullable".to_string(), "null".to_string()));
                if stop_at_first {
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

fn cross_failures(
    df: &DataFrame,
    cross: &CrossColumnCheck,
    stop_at_first: bool,
    cases: &mut Vec<FailureCase>,
) -> Result<()> {
    let name = cross.to_string();
    let mut sides = Vec::with_capacity(2);

    for column in [&cross.left, &cross.right] {
        match df.column(column) {
            Ok(c) if SemanticType::from_dtype(c.dtype()).is_numeric() => {
                sides.push(f64_values(c.as_materialized_series())?)
            }
            _ => {
                cases.push(FailureCase {
                    row: None,
                    column: column.clone(),
                    check: name.clone(),
                    failure_value: column.clone(),
                });
                return Ok(());
            }
        }
    }

    for (row, (left, right)) in sides[0].iter().zip(&sides[1]).enumerate() {
        if let (Some(l), Some(r)) = (left, right)
            && !cross.op.holds(*l, *r)
        {
            cases.push(FailureCase {
                row: Some(row),
                column: cross.left.clone(),
                check: name.clone(),
                failure_value: format!("{} vs {}", l, r),
            });
            if stop_at_first {
                return Ok(());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn quantity_schema() -> Schema {
        Schema::builder()
            .column(ColumnSpec::new("quantity", SemanticType::Integer).check(Check::GreaterThan(0.0)))
            .build()
            .unwrap()
    }

    fn valid_ecommerce_df() -> DataFrame {
        df![
            "customer_id" => ["CUST_001", "CUST_002"],
            "order_id" => ["ORD_001", "ORD_002"],
            "order_date" => ["2024-01-01", "2024-01-02"],
            "product_category" => ["Electronics", "Clothing"],
            "quantity" => [1i64, 2],
            "unit_price" => [100.0, 50.0],
            "total_amount" => [100.0, 100.0],
            "customer_age" => [30i64, 25],
            "satisfaction_score" => [8i64, 9],
        ]
        .unwrap()
    }

    // ===== Lazy mode =====

    #[test]
    fn test_lazy_isolates_failing_row() {
        let df = df!["quantity" => [1i64, -1, 2, 3]].unwrap();
        let result = SchemaValidator::validate(&df, &quantity_schema(), ValidationMode::Lazy).unwrap();

        assert_eq!(result.valid.height(), 3);
        assert_eq!(result.failed.height(), 1);
        assert_eq!(result.failure_cases.len(), 1);
        assert_eq!(result.failure_cases[0].row, Some(1));
        assert_eq!(result.failure_cases[0].check, "greater_than(0)");
        assert_eq!(result.failure_cases[0].failure_value, "-1");
    }

    #[test]
    fn test_lazy_row_conservation() {
        let df = df![
            "quantity" => [Some(1i64), Some(-1), None, Some(0), Some(5)],
        ]
        .unwrap();
        let schema = Schema::builder()
            .column(
                ColumnSpec::new("quantity", SemanticType::Integer)
                    .nullable(false)
                    .check(Check::GreaterThan(0.0)),
            )
            .build()
            .unwrap();

        let result = SchemaValidator::validate(&df, &schema, ValidationMode::Lazy).unwrap();
        assert_eq!(result.valid.height() + result.failed.height(), df.height());
        assert_eq!(result.valid.height(), 2);
        assert!(result.failure_cases.iter().any(|c| c.check == "not_nullable"));
    }

    #[test]
    fn test_value_checks_ignore_nulls() {
        let df = df!["quantity" => [Some(1i64), None]].unwrap();
        let result = SchemaValidator::validate(&df, &quantity_schema(), ValidationMode::Lazy).unwrap();
        assert!(result.is_clean());
        assert_eq!(result.valid.height(), 2);
    }

    #[test]
    fn test_missing_column_is_column_level() {
        let df = df!["other" => [1i64, 2]].unwrap();
        let result = SchemaValidator::validate(&df, &quantity_schema(), ValidationMode::Lazy).unwrap();

        assert_eq!(result.failure_cases.len(), 1);
        assert_eq!(result.failure_cases[0].row, None);
        assert_eq!(result.valid.height(), 2);
        assert_eq!(result.failed.height(), 0);
    }

    #[test]
    fn test_dtype_mismatch_skips_value_checks() {
        let df = df!["quantity" => ["a", "b"]].unwrap();
        let result = SchemaValidator::validate(&df, &quantity_schema(), ValidationMode::Lazy).unwrap();

        assert_eq!(result.failure_cases.len(), 1);
        assert_eq!(result.failure_cases[0].check, "dtype('integer')");
        assert_eq!(result.row_failures().count(), 0);
    }

    #[test]
    fn test_cross_column_check() {
        let schema = Schema::builder()
            .column(ColumnSpec::new("min_transaction_value", SemanticType::Float))
            .column(ColumnSpec::new("max_transaction_value", SemanticType::Float))
            .cross_check(CrossColumnCheck::new(
                "min_transaction_value",
                CompareOp::Le,
                "max_transaction_value",
            ))
            .build()
            .unwrap();
        let df = df![
            "min_transaction_value" => [1.0, 10.0, 3.0],
            "max_transaction_value" => [5.0, 2.0, 3.0],
        ]
        .unwrap();

        let result = SchemaValidator::validate(&df, &schema, ValidationMode::Lazy).unwrap();
        assert_eq!(result.valid.height(), 2);
        assert_eq!(result.failure_cases[0].row, Some(1));
        assert_eq!(
            result.failure_cases[0].check,
            "min_transaction_value <= max_transaction_value"
        );
    }

    // ===== Fail-fast mode =====

    #[test]
    fn test_fail_fast_returns_first_violation() {
        let df = df!["quantity" => [1i64, -1, -2]].unwrap();
        let err = SchemaValidator::validate(&df, &quantity_schema(), ValidationMode::FailFast)
            .unwrap_err();

        match err {
            PipelineError::SchemaViolation { row, column, .. } => {
                assert_eq!(row, Some(1));
                assert_eq!(column, "quantity");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_fail_fast_passes_clean_frame() {
        let df = valid_ecommerce_df();
        let result =
            SchemaValidator::validate(&df, &Schema::ecommerce(), ValidationMode::FailFast).unwrap();
        assert_eq!(result.valid.height(), 2);
        assert_eq!(result.failed.height(), 0);
    }

    // ===== Schema construction =====

    #[test]
    fn test_builder_rejects_undeclared_cross_column() {
        let result = Schema::builder()
            .column(ColumnSpec::new("min_value", SemanticType::Float))
            .cross_check(CrossColumnCheck::new("min_value", CompareOp::Le, "max_value"))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_regex_on_numeric() {
        let result = Schema::builder()
            .column(ColumnSpec::new("quantity", SemanticType::Integer).check(Check::matches(r"^\d+$").unwrap()))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_ecommerce_schema_catches_bad_ids_and_categories() {
        let mut df = valid_ecommerce_df();
        df.replace(
            "order_id",
            Series::new("order_id".into(), &["ORD_001", "order-2"]),
        )
        .unwrap();
        df.replace(
            "product_category",
            Series::new("product_category".into(), &["Toys", "Clothing"]),
        )
        .unwrap();

        let result = SchemaValidator::validate(&df, &Schema::ecommerce(), ValidationMode::Lazy).unwrap();
        assert_eq!(result.failure_cases.len(), 2);
        assert_eq!(result.valid.height(), 0);
        assert_eq!(result.failed.height(), 2);
    }

    #[test]
    fn test_float_column_accepts_integers() {
        let schema = Schema::builder()
            .column(ColumnSpec::new("unit_price", SemanticType::Float).check(Check::GreaterThan(0.0)))
            .build()
            .unwrap();
        let df = df!["unit_price" => [3i64, 4]].unwrap();
        let result = SchemaValidator::validate(&df, &schema, ValidationMode::Lazy).unwrap();
        assert!(result.is_clean());
    }
}
