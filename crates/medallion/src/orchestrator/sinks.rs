//! Outbound collaborators of a run: quality alerts, anomaly flags and drift
//! reports.
//!
//! The pipeline only defines the seams. Alerting defaults to a log line;
//! anomaly detection and drift reporting are off unless an implementation is
//! plugged in.

use crate::error::{PipelineError, Result};
use crate::types::QualityReport;
use polars::prelude::*;
use serde::Serialize;
use tracing::warn;

/// Column appended by [`flag_anomalies`].
pub const ANOMALY_COLUMN: &str = "is_anomaly";

/// Raised when a table scores below the configured threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityAlert {
    pub table_name: String,
    pub quality_score: f64,
    pub threshold: f64,
    pub issues_found: usize,
}

impl QualityAlert {
    pub fn from_report(report: &QualityReport, threshold: f64) -> Self {
        Self {
            table_name: report.table_name.clone(),
            quality_score: report.quality_score,
            threshold,
            issues_found: report.issues.len(),
        }
    }

    pub fn message(&self) -> String {
        format!(
            "ALERT: Quality score {:.2} is below threshold {:.2}",
            self.quality_score, self.threshold
        )
    }
}

/// Receives quality alerts.
pub trait AlertSink: Send + Sync {
    fn send(&self, alert: &QualityAlert) -> Result<()>;
}

/// Default sink: a warning in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingAlertSink;

impl AlertSink for LoggingAlertSink {
    fn send(&self, alert: &QualityAlert) -> Result<()> {
        warn!(
            table = %alert.table_name,
            score = alert.quality_score,
            threshold = alert.threshold,
            issues = alert.issues_found,
            "{}",
            alert.message()
        );
        Ok(())
    }
}

/// Flags anomalous rows of a cleaned table; one flag per row.
pub trait AnomalyDetector: Send + Sync {
    fn detect(&self, df: &DataFrame) -> Result<Vec<bool>>;
}

impl<F> AnomalyDetector for F
where
    F: Fn(&DataFrame) -> Result<Vec<bool>> + Send + Sync,
{
    fn detect(&self, df: &DataFrame) -> Result<Vec<bool>> {
        self(df)
    }
}

/// Compares a reference table with a current one and renders an opaque
/// report.
pub trait DriftReporter: Send + Sync {
    fn report(&self, reference: &DataFrame, current: &DataFrame) -> Result<Vec<u8>>;

    /// File name of the exported report.
    fn file_name(&self) -> &str {
        "drift_report.html"
    }
}

/// `df` with the detector's flags appended as [`ANOMALY_COLUMN`].
pub fn flag_anomalies(df: &DataFrame, detector: &dyn AnomalyDetector) -> Result<DataFrame> {
    let flags = detector.detect(df)?;
    if flags.len() != df.height() {
        return Err(PipelineError::InvalidDataset(format!(
            "anomaly detector returned {} flags for {} rows",
            flags.len(),
            df.height()
        )));
    }

    let mut flagged = df.clone();
    flagged.with_column(Series::new(ANOMALY_COLUMN.into(), flags))?;
    Ok(flagged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn report(score: f64) -> QualityReport {
        QualityReport {
            table_name: "orders".to_string(),
            total_rows: 10,
            total_columns: 2,
            quality_score: score,
            issues: Vec::new(),
            recommendations: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_alert_message() {
        let alert = QualityAlert::from_report(&report(72.5), 80.0);
        assert_eq!(alert.message(), "ALERT: Quality score 72.50 is below threshold 80.00");
        assert!(LoggingAlertSink.send(&alert).is_ok());
    }

    #[test]
    fn test_flag_anomalies_with_closure() {
        let df = df!["amount" => [1.0, 1000.0, 2.0]].unwrap();
        let detector = |df: &DataFrame| -> Result<Vec<bool>> {
            Ok(df
                .column("amount")?
                .f64()?
                .into_iter()
                .map(|v| v.is_some_and(|v| v > 100.0))
                .collect())
        };

        let flagged = flag_anomalies(&df, &detector).unwrap();
        let flags: Vec<Option<bool>> = flagged
            .column(ANOMALY_COLUMN)
            .unwrap()
            .bool()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(flags, vec![Some(false), Some(true), Some(false)]);
    }

    #[test]
    fn test_flag_anomalies_length_mismatch() {
        let df = df!["amount" => [1.0, 2.0]].unwrap();
        let detector = |_: &DataFrame| -> Result<Vec<bool>> { Ok(vec![true]) };
        let err = flag_anomalies(&df, &detector).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_DATASET");
    }
}
