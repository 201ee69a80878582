//! Data quality analysis: issue detection and scoring.

mod analyzer;
mod scorer;

pub use analyzer::QualityAnalyzer;
pub use scorer::QualityScorer;
