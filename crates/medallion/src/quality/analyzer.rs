use crate::types::{ColumnProfile, Issue, IssueScope, IssueType, Severity};

/// Column-name fragments of quantities that should never be negative.
const NON_NEGATIVE_KEYWORDS: [&str; 5] = ["price", "amount", "quantity", "age", "count"];

/// Rule-based issue detection over column profiles.
pub struct QualityAnalyzer;

impl QualityAnalyzer {
    /// Detect issues in column order, then dataset-level issues.
    ///
    /// Order: per column (null rate, cardinality, negatives, whitespace),
    /// then duplicates, then empty columns.
    pub fn identify_issues(
        columns: &[ColumnProfile],
        row_count: usize,
        duplicate_count: usize,
    ) -> Vec<Issue> {
        let mut issues: Vec<Issue> = columns.iter().flat_map(Self::column_issues).collect();

        if duplicate_count > 0 {
            issues.push(Issue::new(
                Severity::Medium,
                IssueType::Duplicates,
                IssueScope::All,
                duplicate_count,
                format!("Found {} duplicate rows", duplicate_count),
                "Apply deduplication strategy",
            ));
        }

        if row_count > 0 {
            issues.extend(
                columns
                    .iter()
                    .filter(|c| c.null_count == row_count)
                    .map(|c| {
                        Issue::new(
                            Severity::High,
                            IssueType::EmptyColumn,
                            IssueScope::Column(c.name.clone()),
                            row_count,
                            format!("Column {} is completely empty", c.name),
                            format!("Consider removing column {}", c.name),
                        )
                    }),
            );
        }

        issues
    }

    /// Column-level rules; each fires independently.
    pub fn column_issues(col: &ColumnProfile) -> Vec<Issue> {
        let mut issues = Vec::new();
        let name = &col.name;
        let scope = || IssueScope::Column(name.clone());

        if col.null_percentage > 50.0 {
            issues.push(Issue::new(
                Severity::High,
                IssueType::HighNullRate,
                scope(),
                col.null_count,
                format!("{} has {:.1}% null values", name, col.null_percentage),
                format!("Consider imputation or removing column {}", name),
            ));
        } else if col.null_percentage > 10.0 {
            issues.push(Issue::new(
                Severity::Medium,
                IssueType::ModerateNullRate,
                scope(),
                col.null_count,
                format!("{} has {:.1}% null values", name, col.null_percentage),
                format!("Review null handling strategy for {}", name),
            ));
        }

        if col.unique_percentage < 5.0 && col.unique_count > 1 {
            issues.push(Issue::new(
                Severity::Info,
                IssueType::LowCardinality,
                scope(),
                col.unique_count,
                format!("{} has only {} unique values", name, col.unique_count),
                format!("Consider treating {} as categorical", name),
            ));
        }

        let negatives = col.negative_count();
        if negatives > 0 && Self::expects_non_negative(name) {
            issues.push(Issue::new(
                Severity::High,
                IssueType::NegativeValues,
                scope(),
                negatives,
                format!("{} has {} negative values", name, negatives),
                format!("Investigate and correct negative values in {}", name),
            ));
        }

        let whitespace = col.whitespace_count();
        if whitespace > 0 {
            issues.push(Issue::new(
                Severity::Low,
                IssueType::Whitespace,
                scope(),
                whitespace,
                format!(
                    "{} has {} values with leading/trailing whitespace",
                    name, whitespace
                ),
                format!("Apply string trimming to {}", name),
            ));
        }

        issues
    }

    /// Actionable recommendations derived from issue groupings.
    pub fn recommendations(issues: &[Issue]) -> Vec<String> {
        let mut recommendations = Vec::new();

        let high = issues.iter().filter(|i| i.severity == Severity::High).count();
        if high > 0 {
            recommendations.push(format!(
                "CRITICAL: Address {} high-severity issues immediately",
                high
            ));
        }

        let medium = issues.iter().filter(|i| i.severity == Severity::Medium).count();
        if medium > 0 {
            recommendations.push(format!("WARNING: Review {} medium-severity issues", medium));
        }

        if issues.iter().any(|i| i.issue_type.is_null_related()) {
            recommendations
                .push("Consider implementing missing value imputation strategy".to_string());
        }

        if issues.iter().any(|i| i.issue_type == IssueType::Duplicates) {
            recommendations.push("Enable deduplication in cleaned layer promotion".to_string());
        }

        recommendations
    }

    fn expects_non_negative(column: &str) -> bool {
        let lower = column.to_lowercase();
        NON_NEGATIVE_KEYWORDS.iter().any(|k| lower.contains(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NumericStats, SemanticType, TextStats};

    fn column(name: &str, null_count: usize, unique_count: usize, rows: usize) -> ColumnProfile {
        ColumnProfile {
            name: name.to_string(),
            dtype: "i64".to_string(),
            semantic_type: SemanticType::Integer,
            null_count,
            null_percentage: null_count as f64 / rows as f64 * 100.0,
            unique_count,
            unique_percentage: unique_count as f64 / rows as f64 * 100.0,
            numeric: None,
            text: None,
        }
    }

    #[test]
    fn test_null_rate_thresholds() {
        let high = QualityAnalyzer::column_issues(&column("a", 60, 41, 100));
        assert_eq!(high[0].issue_type, IssueType::HighNullRate);
        assert_eq!(high[0].severity, Severity::High);

        let moderate = QualityAnalyzer::column_issues(&column("a", 50, 51, 100));
        assert_eq!(moderate[0].issue_type, IssueType::ModerateNullRate);

        let none = QualityAnalyzer::column_issues(&column("a", 10, 91, 100));
        assert!(none.is_empty());
    }

    #[test]
    fn test_low_cardinality() {
        let issues = QualityAnalyzer::column_issues(&column("status", 0, 3, 100));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, IssueType::LowCardinality);
        assert_eq!(issues[0].severity, Severity::Info);

        let single = QualityAnalyzer::column_issues(&column("status", 0, 1, 100));
        assert!(single.is_empty());
    }

    #[test]
    fn test_negative_values_require_keyword() {
        let mut col = column("unit_price", 0, 100, 100);
        col.numeric = Some(NumericStats {
            min: -1.0,
            max: 10.0,
            mean: 5.0,
            median: 5.0,
            std: 1.0,
            zero_count: 0,
            negative_count: 2,
        });
        assert_eq!(
            QualityAnalyzer::column_issues(&col)[0].issue_type,
            IssueType::NegativeValues
        );

        col.name = "temperature".to_string();
        assert!(QualityAnalyzer::column_issues(&col).is_empty());
    }

    #[test]
    fn test_whitespace_issue() {
        let mut col = column("name", 0, 100, 100);
        col.text = Some(TextStats {
            min_length: 1,
            max_length: 5,
            avg_length: 3.0,
            empty_count: 0,
            whitespace_count: 4,
        });
        let issues = QualityAnalyzer::column_issues(&col);
        assert_eq!(issues[0].issue_type, IssueType::Whitespace);
        assert_eq!(issues[0].count, 4);
    }

    #[test]
    fn test_issue_order_and_empty_column() {
        let columns = vec![column("a", 4, 1, 4), column("b", 0, 4, 4)];
        let issues = QualityAnalyzer::identify_issues(&columns, 4, 2);

        let types: Vec<_> = issues.iter().map(|i| i.issue_type).collect();
        assert_eq!(
            types,
            vec![
                IssueType::HighNullRate,
                IssueType::Duplicates,
                IssueType::EmptyColumn
            ]
        );
        assert_eq!(issues[1].column, IssueScope::All);
    }

    #[test]
    fn test_recommendations() {
        let columns = vec![column("a", 4, 1, 4)];
        let issues = QualityAnalyzer::identify_issues(&columns, 4, 1);
        let recs = QualityAnalyzer::recommendations(&issues);

        assert_eq!(recs.len(), 4);
        assert!(recs[0].contains("2 high-severity"));
        assert!(recs[1].contains("1 medium-severity"));
    }
}
