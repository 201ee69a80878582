//! Source extraction.
//!
//! Reads a configured source into a frame without interpreting it: CSV text
//! columns stay text (dates included) so the raw tier holds what the source
//! said. Every failure is reported as [`PipelineError::Extraction`], which
//! the orchestrator treats as retryable.

use crate::config::{SourceConfig, SourceKind};
use crate::error::{PipelineError, Result};
use crate::store::io::read_csv;
use polars::prelude::*;
use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info};

/// Read `source` into a frame.
pub fn extract(source: &SourceConfig) -> Result<DataFrame> {
    let failed = |reason: String| PipelineError::Extraction {
        source_name: source.name.clone(),
        reason,
    };

    if !source.path.exists() {
        return Err(failed(format!("file not found: {}", source.path.display())));
    }

    info!(
        "Extracting {} from {} ({:?})",
        source.name,
        source.path.display(),
        source.kind
    );

    let df = match source.kind {
        SourceKind::Csv => read_csv_with_fallback(&source.path),
        SourceKind::Parquet => read_parquet(&source.path),
        SourceKind::Json => read_json(&source.path),
    }
    .map_err(|e| failed(e.to_string()))?;

    info!("Extracted {} rows, {} columns", df.height(), df.width());
    Ok(df)
}

/// Standard CSV read, then a retry on pre-cleaned content (collapsed
/// doubled quotes, blank lines dropped).
fn read_csv_with_fallback(path: &Path) -> Result<DataFrame> {
    match read_csv(path, false) {
        Ok(df) => return Ok(df),
        Err(e) => debug!("Standard CSV loading failed: {}", e),
    }

    let content = std::fs::read_to_string(path)?;
    let cleaned = clean_csv_content(&content);
    Ok(CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(1000))
        .into_reader_with_file_handle(Cursor::new(cleaned))
        .finish()?)
}

fn clean_csv_content(content: &str) -> String {
    content
        .replace("\"\"\"", "\"")
        .replace("\"\"", "\"")
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn read_parquet(path: &Path) -> Result<DataFrame> {
    let file = File::open(path)?;
    Ok(ParquetReader::new(file).finish()?)
}

/// A JSON array of records.
fn read_json(path: &Path) -> Result<DataFrame> {
    let file = File::open(path)?;
    Ok(JsonReader::new(file)
        .with_json_format(JsonFormat::Json)
        .finish()?)
}
