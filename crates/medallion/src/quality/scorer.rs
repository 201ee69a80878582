use crate::types::{DatasetProfile, QualityReport};
use chrono::Utc;
use tracing::info;

/// Deterministic quality score of a profile.
pub struct QualityScorer;

impl QualityScorer {
    /// Score in [0, 100].
    ///
    /// Every issue costs its severity penalty. Null-heavy columns are
    /// penalised again: 5 points above 50% nulls, 2 points in (20%, 50%].
    pub fn score(profile: &DatasetProfile) -> f64 {
        let issue_penalty: f64 = profile.issues.iter().map(|i| i.severity.penalty()).sum();

        let null_penalty: f64 = profile
            .columns
            .iter()
            .map(|c| match c.null_percentage {
                p if p > 50.0 => 5.0,
                p if p > 20.0 => 2.0,
                _ => 0.0,
            })
            .sum();

        (100.0 - issue_penalty - null_penalty).clamp(0.0, 100.0)
    }

    /// Build a timestamped report from a profile.
    pub fn report(profile: &DatasetProfile) -> QualityReport {
        let quality_score = Self::score(profile);
        info!(
            "Quality score for {}: {:.1}/100",
            profile.dataset_name, quality_score
        );

        QualityReport {
            table_name: profile.dataset_name.clone(),
            total_rows: profile.row_count,
            total_columns: profile.column_count,
            quality_score,
            issues: profile.issues.clone(),
            recommendations: profile.recommendations.clone(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiler::DataProfiler;
    use polars::prelude::*;

    #[test]
    fn test_clean_dataset_scores_100() {
        let df = df!["id" => [1i64, 2, 3], "name" => ["a", "b", "c"]].unwrap();
        let profile = DataProfiler::profile_dataset(&df, "clean").unwrap();
        assert_eq!(QualityScorer::score(&profile), 100.0);
    }

    #[test]
    fn test_double_null_penalty() {
        let df = df![
            "id" => [1i64, 2, 3, 4, 5, 6],
            "notes" => [None, None, None, None, None, Some("x")],
        ]
        .unwrap();
        let profile = DataProfiler::profile_dataset(&df, "nulls").unwrap();

        // HIGH_NULL_RATE (-10) plus the null-heavy column penalty (-5)
        assert_eq!(QualityScorer::score(&profile), 85.0);
    }

    #[test]
    fn test_score_is_clamped() {
        let columns: Vec<Column> = (0..12)
            .map(|i| Column::new(format!("c{}", i).into(), [None::<i64>, None]))
            .collect();
        let df = DataFrame::new(columns).unwrap();
        let profile = DataProfiler::profile_dataset(&df, "empty_columns").unwrap();

        assert_eq!(QualityScorer::score(&profile), 0.0);
    }

    #[test]
    fn test_report_carries_profile_data() {
        let df = df!["id" => [1i64, 1]].unwrap();
        let profile = DataProfiler::profile_dataset(&df, "dups").unwrap();
        let report = QualityScorer::report(&profile);

        assert_eq!(report.table_name, "dups");
        assert_eq!(report.total_rows, 2);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.quality_score, 95.0);
        assert!(!report.is_below(80.0));
    }
}
