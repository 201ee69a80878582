//! Table files: columnar reads and staged, atomically renamed writes.

use crate::config::TableFormat;
use crate::error::Result;
use polars::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Path of table `name` inside a tier directory.
pub(crate) fn table_path(dir: &Path, name: &str, format: TableFormat) -> PathBuf {
    dir.join(format!("{}.{}", name, format.extension()))
}

/// Write `df` to `path` without ever exposing a partial file.
///
/// The frame is written to a hidden staging file next to `path` and renamed
/// into place; the staging file is removed if anything fails.
pub(crate) fn write_atomic(path: &Path, format: TableFormat, df: &mut DataFrame) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = dir.join(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        STAGING_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let written = write_file(&staging, format, df).and_then(|_| {
        fs::rename(&staging, path)?;
        Ok(())
    });
    if written.is_err() {
        let _ = fs::remove_file(&staging);
    }
    written?;

    debug!("Wrote {} rows to {}", df.height(), path.display());
    Ok(())
}

fn write_file(path: &Path, format: TableFormat, df: &mut DataFrame) -> Result<()> {
    let mut file = File::create(path)?;
    match format {
        TableFormat::Parquet => {
            ParquetWriter::new(&mut file).finish(df)?;
        }
        TableFormat::Csv => {
            CsvWriter::new(&mut file)
                .include_header(true)
                .with_separator(b',')
                .finish(df)?;
        }
    }
    file.sync_all()?;
    Ok(())
}

/// Read a table file in the given format.
pub(crate) fn read_table(path: &Path, format: TableFormat) -> Result<DataFrame> {
    match format {
        TableFormat::Parquet => {
            let file = File::open(path)?;
            Ok(ParquetReader::new(file).finish()?)
        }
        TableFormat::Csv => read_csv(path, true),
    }
}

/// Read a CSV file with a header row.
///
/// With `parse_dates`, `YYYY-MM-DD` columns come back as dates, which is how
/// tier tables written as CSV round-trip their date columns.
pub(crate) fn read_csv(path: &Path, parse_dates: bool) -> Result<DataFrame> {
    Ok(CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(1000))
        .with_parse_options(CsvParseOptions::default().with_try_parse_dates(parse_dates))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?)
}

/// Table files found in a tier directory, as `(name, path)` pairs.
pub(crate) fn scan_tables(dir: &Path, format: TableFormat) -> Result<Vec<(String, PathBuf)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut tables = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_table = path.is_file()
            && path.extension().is_some_and(|e| e == format.extension())
            && !path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with('.'));
        if let (true, Some(stem)) = (is_table, path.file_stem()) {
            tables.push((stem.to_string_lossy().into_owned(), path.clone()));
        }
    }
    tables.sort();
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parquet_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = table_path(dir.path(), "orders", TableFormat::Parquet);
        let mut df = df!["id" => [1i64, 2], "name" => ["a", "b"]].unwrap();

        write_atomic(&path, TableFormat::Parquet, &mut df).unwrap();
        let back = read_table(&path, TableFormat::Parquet).unwrap();
        assert!(back.equals_missing(&df));
    }

    #[test]
    fn test_csv_keeps_dates() {
        let dir = tempfile::tempdir().unwrap();
        let path = table_path(dir.path(), "daily", TableFormat::Csv);
        let dates = Series::new("order_date".into(), [19723i32, 19724])
            .cast(&DataType::Date)
            .unwrap();
        let mut df = DataFrame::new(vec![dates.into()]).unwrap();

        write_atomic(&path, TableFormat::Csv, &mut df).unwrap();
        let back = read_table(&path, TableFormat::Csv).unwrap();
        assert_eq!(back.column("order_date").unwrap().dtype(), &DataType::Date);
    }

    #[test]
    fn test_no_staging_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = table_path(dir.path(), "t", TableFormat::Parquet);
        let mut df = df!["x" => [1i64]].unwrap();
        write_atomic(&path, TableFormat::Parquet, &mut df).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["t.parquet".to_string()]);
    }

    #[test]
    fn test_scan_tables_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut df = df!["x" => [1i64]].unwrap();
        write_atomic(&table_path(dir.path(), "b", TableFormat::Parquet), TableFormat::Parquet, &mut df)
            .unwrap();
        write_atomic(&table_path(dir.path(), "a", TableFormat::Parquet), TableFormat::Parquet, &mut df)
            .unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let names: Vec<_> = scan_tables(dir.path(), TableFormat::Parquet)
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
