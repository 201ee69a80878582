//! Tiered table storage.
//!
//! [`LayerStore`] addresses tables by `(Layer, name)`. Every tier is a
//! directory holding one columnar file per table. Writes are staged and
//! renamed into place before they are registered in the in-memory catalog,
//! so readers (which resolve through the catalog) only ever see complete
//! tables. Writers to the same table are serialized by rejection: a second
//! writer fails instead of waiting.

pub(crate) mod io;
mod promotion;

pub use promotion::{PromotionStats, promote};

use crate::aggregate::{AggregateSpec, Aggregator};
use crate::config::{StoreConfig, TierConfig};
use crate::error::{PipelineError, Result, ResultExt};
use crate::types::Layer;
use parking_lot::{Mutex, RwLock};
use polars::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// How a write treats an existing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    Replace,
    /// Vertically concatenate with the existing table.
    Append,
}

/// Catalog entry of a persisted table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInfo {
    pub layer: Layer,
    pub name: String,
    pub path: PathBuf,
    pub row_count: usize,
    pub column_count: usize,
}

/// Shape of a persisted table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableStats {
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<String>,
}

type TableKey = (Layer, String);

/// Persists and addresses tables within the four tiers.
#[derive(Debug)]
pub struct LayerStore {
    config: StoreConfig,
    catalog: RwLock<BTreeMap<TableKey, TableInfo>>,
    writers: Mutex<HashSet<TableKey>>,
}

impl LayerStore {
    /// Open the store, creating tier directories and registering the tables
    /// already on disk.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let store = Self {
            config,
            catalog: RwLock::new(BTreeMap::new()),
            writers: Mutex::new(HashSet::new()),
        };

        for layer in Layer::ALL {
            let tier = store.tier(layer).clone();
            fs::create_dir_all(&tier.path).map_err(|e| PipelineError::persistence(layer, "*", e))?;

            for (name, path) in io::scan_tables(&tier.path, tier.format)? {
                match io::read_table(&path, tier.format) {
                    Ok(df) => {
                        store.register(layer, &name, path, &df);
                    }
                    Err(e) => warn!("Ignoring unreadable table {}: {}", path.display(), e),
                }
            }
        }

        info!(
            "Store opened: {} tables registered",
            store.catalog.read().len()
        );
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn tier(&self, layer: Layer) -> &TierConfig {
        match layer {
            Layer::Raw => &self.config.raw,
            Layer::Cleaned => &self.config.cleaned,
            Layer::Aggregated => &self.config.aggregated,
            Layer::Quarantine => &self.config.quarantine,
        }
    }

    // ==================== WRITES ====================

    /// Write `df` as `layer.name`.
    pub fn write(
        &self,
        layer: Layer,
        name: &str,
        df: &DataFrame,
        mode: WriteMode,
    ) -> Result<TableInfo> {
        validate_table_name(layer, name)?;
        let _guard = WriterGuard::acquire(self, layer, name)?;

        let mut df = match (mode, self.contains(layer, name)) {
            (WriteMode::Append, true) => {
                let mut existing = self.read(layer, name)?;
                existing
                    .vstack_mut(df)
                    .map_err(|e| PipelineError::persistence(layer, name, e))?;
                existing
            }
            _ => df.clone(),
        };

        let tier = self.tier(layer);
        let path = io::table_path(&tier.path, name, tier.format);
        io::write_atomic(&path, tier.format, &mut df)
            .map_err(|e| PipelineError::persistence(layer, name, e))?;

        let info = self.register(layer, name, path, &df);
        info!("Wrote {} rows to {}.{}", info.row_count, layer, name);
        Ok(info)
    }

    /// Persist raw data verbatim.
    pub fn load_raw(&self, df: &DataFrame, name: &str, mode: WriteMode) -> Result<TableInfo> {
        info!("Loading {} rows to raw layer: {}", df.height(), name);
        self.write(Layer::Raw, name, df, mode)
    }

    /// Isolate rejected rows for review, replacing the previous batch.
    pub fn quarantine(&self, df: &DataFrame, name: &str) -> Result<TableInfo> {
        info!("Quarantining {} rows as {}", df.height(), name);
        self.write(Layer::Quarantine, name, df, WriteMode::Replace)
    }

    /// Promote `raw.raw_name` to `cleaned.cleaned_name` through the fixed
    /// promotion steps.
    pub fn promote_to_cleaned(
        &self,
        raw_name: &str,
        cleaned_name: &str,
    ) -> Result<(DataFrame, TableInfo, PromotionStats)> {
        info!("Promoting raw.{} -> cleaned.{}", raw_name, cleaned_name);

        let raw = self.read(Layer::Raw, raw_name)?;
        let (cleaned, stats) =
            promote(raw).context(format!("promoting raw.{}", raw_name))?;
        let info = self.write(Layer::Cleaned, cleaned_name, &cleaned, WriteMode::Replace)?;

        Ok((cleaned, info, stats))
    }

    /// Compute an aggregate and persist it in the aggregated tier.
    pub fn create_aggregate(
        &self,
        spec: &AggregateSpec,
        name: &str,
    ) -> Result<(DataFrame, TableInfo)> {
        info!("Creating aggregate: {}", name);

        let source = self.read(Layer::Cleaned, &spec.source)?;
        let aggregate = Aggregator::compute(&source, spec.kind).map_err(|e| {
            PipelineError::Aggregation {
                name: name.to_string(),
                reason: e.to_string(),
            }
        })?;
        let info = self.write(Layer::Aggregated, name, &aggregate, WriteMode::Replace)?;

        Ok((aggregate, info))
    }

    // ==================== READS ====================

    pub fn contains(&self, layer: Layer, name: &str) -> bool {
        self.catalog.read().contains_key(&(layer, name.to_string()))
    }

    /// Read the last complete write of `layer.name`.
    pub fn read(&self, layer: Layer, name: &str) -> Result<DataFrame> {
        let path = self.table_info(layer, name)?.path;
        io::read_table(&path, self.tier(layer).format)
            .context(format!("reading {}.{}", layer, name))
    }

    pub fn table_info(&self, layer: Layer, name: &str) -> Result<TableInfo> {
        self.catalog
            .read()
            .get(&(layer, name.to_string()))
            .cloned()
            .ok_or_else(|| PipelineError::TableNotFound {
                layer: layer.to_string(),
                table: name.to_string(),
            })
    }

    /// Table names of one tier, sorted.
    pub fn list_tables(&self, layer: Layer) -> Vec<String> {
        self.catalog
            .read()
            .keys()
            .filter(|(l, _)| *l == layer)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn table_stats(&self, layer: Layer, name: &str) -> Result<TableStats> {
        let df = self.read(layer, name)?;
        Ok(TableStats {
            row_count: df.height(),
            column_count: df.width(),
            columns: df
                .get_column_names()
                .iter()
                .map(|c| c.to_string())
                .collect(),
        })
    }

    fn register(&self, layer: Layer, name: &str, path: PathBuf, df: &DataFrame) -> TableInfo {
        let info = TableInfo {
            layer,
            name: name.to_string(),
            path,
            row_count: df.height(),
            column_count: df.width(),
        };
        self.catalog
            .write()
            .insert((layer, name.to_string()), info.clone());
        info
    }
}

/// Table names become file names; keep them to a safe alphabet.
fn validate_table_name(layer: Layer, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(PipelineError::persistence(
            layer,
            name,
            "table names may only contain letters, digits, '_' and '-'",
        ))
    }
}

/// Marks `(layer, name)` as being written until dropped.
struct WriterGuard<'a> {
    store: &'a LayerStore,
    key: TableKey,
}

impl<'a> WriterGuard<'a> {
    fn acquire(store: &'a LayerStore, layer: Layer, name: &str) -> Result<Self> {
        let key = (layer, name.to_string());
        if !store.writers.lock().insert(key.clone()) {
            return Err(PipelineError::persistence(
                layer,
                name,
                "another write to this table is in progress",
            ));
        }
        debug!("Acquired writer for {}.{}", layer, name);
        Ok(Self { store, key })
    }
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        self.store.writers.lock().remove(&self.key);
    }
}

static_assertions::assert_impl_all!(LayerStore: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateKind;
    use crate::config::TableFormat;
    use pretty_assertions::assert_eq;

    fn open_store(root: &std::path::Path) -> LayerStore {
        LayerStore::open(StoreConfig::rooted_at(root)).unwrap()
    }

    fn orders() -> DataFrame {
        df![
            "customer_id" => ["C_1", "C_2", "C_1"],
            "order_id" => ["ORD_1", "ORD_2", "ORD_3"],
            "order_date" => ["2024-01-01", "2024-01-01", "2024-01-02"],
            "quantity" => [1i64, 2, 3],
            "unit_price" => [10.0, 20.0, 30.0],
            "total_amount" => [10.0, 40.0, 90.0],
        ]
        .unwrap()
    }

    #[test]
    fn test_load_raw_replace_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        store.load_raw(&orders(), "orders", WriteMode::Replace).unwrap();
        let info = store.load_raw(&orders(), "orders", WriteMode::Append).unwrap();
        assert_eq!(info.row_count, 6);

        let info = store.load_raw(&orders(), "orders", WriteMode::Replace).unwrap();
        assert_eq!(info.row_count, 3);
        assert!(store.read(Layer::Raw, "orders").unwrap().equals_missing(&orders()));
    }

    #[test]
    fn test_read_missing_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let err = store.read(Layer::Cleaned, "nope").unwrap_err();
        assert_eq!(err.error_code(), "TABLE_NOT_FOUND");
    }

    #[test]
    fn test_promote_to_cleaned_is_replay_safe() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store.load_raw(&orders(), "orders", WriteMode::Replace).unwrap();

        let (first, _, _) = store.promote_to_cleaned("orders", "orders").unwrap();
        let (second, info, _) = store.promote_to_cleaned("orders", "orders").unwrap();

        assert!(first.equals_missing(&second));
        assert_eq!(info.row_count, 3);
        assert!(
            store
                .read(Layer::Cleaned, "orders")
                .unwrap()
                .equals_missing(&second)
        );
    }

    #[test]
    fn test_create_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store.load_raw(&orders(), "orders", WriteMode::Replace).unwrap();
        store.promote_to_cleaned("orders", "orders").unwrap();

        let spec = AggregateSpec::new("orders", AggregateKind::DailySummary);
        let (daily, _) = store.create_aggregate(&spec, "daily_sales").unwrap();
        assert_eq!(daily.height(), 2);
        assert_eq!(store.list_tables(Layer::Aggregated), vec!["daily_sales"]);
    }

    #[test]
    fn test_catalog_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_store(dir.path());
            store.load_raw(&orders(), "orders", WriteMode::Replace).unwrap();
            store.quarantine(&orders(), "orders").unwrap();
        }

        let store = open_store(dir.path());
        assert!(store.contains(Layer::Raw, "orders"));
        assert_eq!(store.list_tables(Layer::Quarantine), vec!["orders"]);

        let stats = store.table_stats(Layer::Raw, "orders").unwrap();
        assert_eq!(stats.row_count, 3);
        assert_eq!(stats.column_count, 6);
        assert_eq!(stats.columns[0], "customer_id");
    }

    #[test]
    fn test_csv_tier() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::rooted_at(dir.path());
        config.cleaned.format = TableFormat::Csv;
        let store = LayerStore::open(config).unwrap();

        store.load_raw(&orders(), "orders", WriteMode::Replace).unwrap();
        let (cleaned, info, _) = store.promote_to_cleaned("orders", "orders").unwrap();
        assert!(info.path.extension().is_some_and(|e| e == "csv"));

        let back = store.read(Layer::Cleaned, "orders").unwrap();
        assert_eq!(back.height(), cleaned.height());
        assert_eq!(back.column("order_date").unwrap().dtype(), &DataType::Date);
    }

    #[test]
    fn test_concurrent_writer_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let _held = WriterGuard::acquire(&store, Layer::Raw, "orders").unwrap();
        let err = store
            .load_raw(&orders(), "orders", WriteMode::Replace)
            .unwrap_err();
        assert_eq!(err.error_code(), "PERSISTENCE_ERROR");

        // other tables are unaffected
        store.load_raw(&orders(), "other", WriteMode::Replace).unwrap();
    }

    #[test]
    fn test_invalid_table_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        assert!(store.load_raw(&orders(), "../escape", WriteMode::Replace).is_err());
    }
}
