//! Business-ready aggregates over a cleaned table.
//!
//! Every aggregate is a pure lazy group-by over the cleaned frame. Results
//! are sorted on their ranking column with the group keys as tie-breakers,
//! so the output order does not depend on hashing.

use crate::error::{PipelineError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// The aggregates the pipeline knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateKind {
    #[serde(rename = "daily_sales")]
    DailySummary,
    #[serde(rename = "customer_lifetime_value")]
    CustomerLifetimeValue,
    #[serde(rename = "product_performance")]
    ProductPerformance,
    #[serde(rename = "regional_analytics")]
    RegionalAnalytics,
}

impl AggregateKind {
    pub const ALL: [AggregateKind; 4] = [
        AggregateKind::DailySummary,
        AggregateKind::CustomerLifetimeValue,
        AggregateKind::ProductPerformance,
        AggregateKind::RegionalAnalytics,
    ];

    /// Name of the table in the aggregated tier.
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::DailySummary => "daily_sales",
            Self::CustomerLifetimeValue => "customer_ltv",
            Self::ProductPerformance => "product_performance",
            Self::RegionalAnalytics => "regional_analytics",
        }
    }

    /// Columns the aggregate cannot be computed without.
    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            Self::DailySummary => &[
                "order_date",
                "order_id",
                "total_amount",
                "customer_id",
                "quantity",
            ],
            Self::CustomerLifetimeValue => {
                &["customer_id", "order_id", "total_amount", "order_date"]
            }
            Self::ProductPerformance => &[
                "product_category",
                "product_name",
                "order_id",
                "quantity",
                "total_amount",
                "unit_price",
            ],
            Self::RegionalAnalytics => {
                &["shipping_country", "order_id", "total_amount", "customer_id"]
            }
        }
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// An aggregate to build from a cleaned table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSpec {
    /// Table name in the cleaned tier.
    pub source: String,
    pub kind: AggregateKind,
}

impl AggregateSpec {
    pub fn new(source: impl Into<String>, kind: AggregateKind) -> Self {
        Self {
            source: source.into(),
            kind,
        }
    }
}

pub struct Aggregator;

impl Aggregator {
    /// Compute one aggregate over a cleaned frame.
    pub fn compute(df: &DataFrame, kind: AggregateKind) -> Result<DataFrame> {
        info!("Creating {} from {} rows", kind, df.height());

        if let Some(missing) = kind
            .required_columns()
            .iter()
            .find(|c| df.column(c).is_err())
        {
            return Err(PipelineError::Aggregation {
                name: kind.table_name().to_string(),
                reason: format!("cleaned table has no '{}' column", missing),
            });
        }

        let has = |name: &str| df.column(name).is_ok();
        let lf = df.clone().lazy();

        let result = match kind {
            AggregateKind::DailySummary => lf
                .group_by_stable([col("order_date")])
                .agg([
                    col("order_id").count().alias("order_count"),
                    col("total_amount").sum().alias("total_revenue"),
                    col("total_amount").mean().alias("avg_order_value"),
                    col("customer_id").n_unique().alias("unique_customers"),
                    col("quantity").sum().alias("total_items_sold"),
                ])
                .sort(
                    ["order_date"],
                    SortMultipleOptions::default().with_order_descending(true),
                ),

            AggregateKind::CustomerLifetimeValue => {
                let mut aggs = vec![
                    col("order_id").count().alias("total_orders"),
                    col("total_amount").sum().alias("lifetime_value"),
                    col("total_amount").mean().alias("avg_order_value"),
                    col("order_date").min().alias("first_order_date"),
                    col("order_date").max().alias("last_order_date"),
                ];
                if has("customer_segment") {
                    aggs.push(col("customer_segment").first().alias("segment"));
                }
                if has("customer_age") {
                    aggs.push(col("customer_age").first().alias("age"));
                }
                lf.group_by_stable([col("customer_id")]).agg(aggs).sort(
                    ["lifetime_value", "customer_id"],
                    SortMultipleOptions::default().with_order_descending_multi([true, false]),
                )
            }

            AggregateKind::ProductPerformance => {
                let mut aggs = vec![
                    col("order_id").count().alias("units_sold"),
                    col("quantity").sum().alias("total_quantity"),
                    col("total_amount").sum().alias("revenue"),
                    col("unit_price").mean().alias("avg_price"),
                ];
                if has("discount_percent") {
                    aggs.push(col("discount_percent").mean().alias("avg_discount"));
                }
                lf.group_by_stable([col("product_category"), col("product_name")])
                    .agg(aggs)
                    .sort(
                        ["revenue", "product_category", "product_name"],
                        SortMultipleOptions::default()
                            .with_order_descending_multi([true, false, false]),
                    )
            }

            AggregateKind::RegionalAnalytics => {
                let mut aggs = vec![
                    col("order_id").count().alias("order_count"),
                    col("total_amount").sum().alias("total_revenue"),
                    col("total_amount").mean().alias("avg_order_value"),
                    col("customer_id").n_unique().alias("unique_customers"),
                ];
                if has("shipping_cost") {
                    aggs.push(col("shipping_cost").mean().alias("avg_shipping_cost"));
                }
                lf.group_by_stable([col("shipping_country")]).agg(aggs).sort(
                    ["total_revenue", "shipping_country"],
                    SortMultipleOptions::default().with_order_descending_multi([true, false]),
                )
            }
        };

        Ok(result.collect()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::parse_date_series;
    use pretty_assertions::assert_eq;

    fn cleaned() -> DataFrame {
        let mut df = df![
            "order_date" => ["2024-01-01", "2024-01-01", "2024-01-02"],
            "order_id" => ["O1", "O2", "O3"],
            "customer_id" => ["C1", "C2", "C1"],
            "total_amount" => [100.0, 200.0, 150.0],
            "quantity" => [1i64, 2, 1],
            "product_category" => ["Electronics", "Clothing", "Electronics"],
            "product_name" => ["Phone", "Shirt", "Laptop"],
            "unit_price" => [100.0, 100.0, 150.0],
            "discount_percent" => [0.0, 10.0, 0.0],
            "shipping_country" => ["USA", "UK", "USA"],
            "shipping_cost" => [10.0, 15.0, 10.0],
            "customer_segment" => ["Gold", "Silver", "Gold"],
        ]
        .unwrap();
        let dates = parse_date_series(df.column("order_date").unwrap().as_materialized_series()).unwrap();
        df.replace("order_date", dates).unwrap();
        df
    }

    fn f64_column(df: &DataFrame, name: &str) -> Vec<f64> {
        df.column(name)
            .unwrap()
            .f64()
            .unwrap()
            .into_iter()
            .map(|v| v.unwrap())
            .collect()
    }

    #[test]
    fn test_daily_summary() {
        let daily = Aggregator::compute(&cleaned(), AggregateKind::DailySummary).unwrap();
        assert_eq!(daily.height(), 2);
        // newest date first
        assert_eq!(f64_column(&daily, "total_revenue"), vec![150.0, 300.0]);
        assert_eq!(
            daily.column("unique_customers").unwrap().get(1).unwrap(),
            AnyValue::UInt32(2)
        );
    }

    #[test]
    fn test_customer_ltv() {
        let ltv = Aggregator::compute(&cleaned(), AggregateKind::CustomerLifetimeValue).unwrap();
        assert_eq!(ltv.height(), 2);
        assert_eq!(f64_column(&ltv, "lifetime_value"), vec![250.0, 200.0]);
        assert_eq!(
            ltv.column("segment").unwrap().str().unwrap().get(0),
            Some("Gold")
        );
        assert_eq!(ltv.column("first_order_date").unwrap().dtype(), &DataType::Date);
    }

    #[test]
    fn test_ltv_without_optional_columns() {
        let df = cleaned().drop("customer_segment").unwrap();
        let ltv = Aggregator::compute(&df, AggregateKind::CustomerLifetimeValue).unwrap();
        assert!(ltv.column("segment").is_err());
        assert_eq!(ltv.height(), 2);
    }

    #[test]
    fn test_product_performance() {
        let perf = Aggregator::compute(&cleaned(), AggregateKind::ProductPerformance).unwrap();
        assert_eq!(perf.height(), 3);
        assert_eq!(f64_column(&perf, "revenue"), vec![200.0, 150.0, 100.0]);
        assert!(perf.column("avg_discount").is_ok());
    }

    #[test]
    fn test_regional_analytics() {
        let regional = Aggregator::compute(&cleaned(), AggregateKind::RegionalAnalytics).unwrap();
        assert_eq!(regional.height(), 2);
        assert_eq!(
            regional.column("shipping_country").unwrap().str().unwrap().get(0),
            Some("USA")
        );
        assert_eq!(f64_column(&regional, "avg_shipping_cost"), vec![10.0, 15.0]);
    }

    #[test]
    fn test_missing_required_column() {
        let df = cleaned().drop("shipping_country").unwrap();
        let err = Aggregator::compute(&df, AggregateKind::RegionalAnalytics).unwrap_err();
        assert_eq!(err.error_code(), "AGGREGATION_ERROR");
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(AggregateKind::CustomerLifetimeValue.table_name(), "customer_ltv");
        assert_eq!(
            serde_json::to_string(&AggregateKind::CustomerLifetimeValue).unwrap(),
            "\"customer_lifetime_value\""
        );
    }
}
