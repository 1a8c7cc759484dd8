//! The dataset store.
//!
//! One [`DatasetStore`] is created at startup and handed to every component
//! that needs data. Cloning it produces another handle onto the same map, so
//! a load through one handle is visible through all of them.

use crate::data::loader::load_table;
use crate::data::table::Table;
use crate::error::DataError;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

/// Shared, keyed holder of loaded datasets.
#[derive(Debug, Clone, Default)]
pub struct DatasetStore {
    inner: Arc<RwLock<HashMap<String, Table>>>,
}

/// One-line summary of a loaded dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetInfo {
    pub key: String,
    pub rows: usize,
    pub columns: Vec<String>,
}

impl DatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Table>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Table>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Load a file under `key`, replacing any previous table for that key.
    /// On failure the store is left untouched.
    pub fn load(&self, key: &str, path: &Path) -> Result<(), DataError> {
        let table = load_table(path)?;
        info!(
            "Data for {} loaded. Columns: {}",
            key,
            table.column_names().join(", ")
        );
        self.insert(key, table);
        Ok(())
    }

    /// Store an already-built table under `key`.
    pub fn insert(&self, key: &str, table: Table) {
        self.write().insert(key.to_string(), table);
    }

    /// Snapshot of the table stored under `key`.
    pub fn get(&self, key: &str) -> Result<Table, DataError> {
        self.read().get(key).cloned().ok_or_else(|| not_loaded(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Merge column-wise updates into an existing dataset.
    pub fn update(&self, key: &str, partial: &Table) -> Result<usize, DataError> {
        let mut guard = self.write();
        let table = guard.get_mut(key).ok_or_else(|| not_loaded(key))?;
        let changed = table.update(partial);
        info!("Data for {} updated ({} cells).", key, changed);
        Ok(changed)
    }

    /// Coerce numeric-like text columns of one dataset.
    pub fn preprocess(&self, key: &str) -> Result<Vec<String>, DataError> {
        let mut guard = self.write();
        let table = guard.get_mut(key).ok_or_else(|| not_loaded(key))?;
        let coerced = table.coerce_numeric_like();
        if !coerced.is_empty() {
            info!("Coerced numeric columns in {}: {}", key, coerced.join(", "));
        }
        Ok(coerced)
    }

    /// Preprocess every loaded dataset.
    pub fn preprocess_all(&self) -> Result<(), DataError> {
        for key in self.keys() {
            self.preprocess(&key)?;
        }
        info!("Preprocessing complete.");
        Ok(())
    }

    pub fn columns(&self, key: &str) -> Result<Vec<String>, DataError> {
        self.read()
            .get(key)
            .map(Table::column_names)
            .ok_or_else(|| not_loaded(key))
    }

    /// Loaded keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn describe(&self) -> Vec<DatasetInfo> {
        let guard = self.read();
        let mut infos: Vec<DatasetInfo> = guard
            .iter()
            .map(|(key, table)| DatasetInfo {
                key: key.clone(),
                rows: table.n_rows(),
                columns: table.column_names(),
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }
}

fn not_loaded(key: &str) -> DataError {
    DataError::NotLoaded {
        key: key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::table::Value;
    use tempfile::TempDir;

    fn write_csv(dir: &TempDir, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_get_unloaded_key_fails() {
        let store = DatasetStore::new();
        assert!(matches!(
            store.get("df"),
            Err(DataError::NotLoaded { key }) if key == "df"
        ));
    }

    #[test]
    fn test_second_load_replaces_first() {
        let temp_dir = TempDir::new().unwrap();
        let first = write_csv(&temp_dir, "a.csv", b"Alpha,Beta\n1,2\n");
        let second = write_csv(&temp_dir, "b.csv", b"Gamma\n7\n8\n");

        let store = DatasetStore::new();
        store.load("df", &first).unwrap();
        store.load("df", &second).unwrap();

        let table = store.get("df").unwrap();
        assert_eq!(table.column_names(), vec!["gamma"]);
        assert_eq!(table.n_rows(), 2);
    }

    #[test]
    fn test_handles_share_data() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_csv(&temp_dir, "a.csv", b"x\n1\n");

        let store = DatasetStore::new();
        let other_handle = store.clone();
        store.load("df", &path).unwrap();

        assert!(other_handle.contains("df"));
        assert_eq!(other_handle.columns("df").unwrap(), vec!["x"]);
    }

    #[test]
    fn test_unsupported_load_leaves_no_entry() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_csv(&temp_dir, "data.txt", b"x\n1\n");

        let store = DatasetStore::new();
        let err = store.load("df", &path).unwrap_err();
        assert!(matches!(err, DataError::UnsupportedFormat { .. }));
        assert!(store.keys().is_empty());
        assert!(matches!(store.get("df"), Err(DataError::NotLoaded { .. })));
    }

    #[test]
    fn test_latin1_csv_is_retrievable() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_csv(&temp_dir, "reviews.csv", b"Store,Rating\nS\xE3o Paulo,4\n");

        let store = DatasetStore::new();
        store.load("reviews", &path).unwrap();

        let table = store.get("reviews").unwrap();
        assert_eq!(
            table.column("store").unwrap().values,
            vec![Value::Text("São Paulo".to_string())]
        );
    }

    #[test]
    fn test_update_and_preprocess() {
        let store = DatasetStore::new();
        assert!(matches!(
            store.update("df", &Table::default()),
            Err(DataError::NotLoaded { .. })
        ));

        let temp_dir = TempDir::new().unwrap();
        let path = write_csv(&temp_dir, "a.csv", b"Price,Qty\n\"$1,000\",1\n$20,2\n");
        store.load("df", &path).unwrap();

        assert_eq!(store.preprocess("df").unwrap(), vec!["price"]);
        let table = store.get("df").unwrap();
        assert_eq!(
            table.column("price").unwrap().values,
            vec![Value::Number(1000.0), Value::Number(20.0)]
        );
    }

    #[test]
    fn test_describe_sorted_by_key() {
        let store = DatasetStore::new();
        store.insert("b", Table::default());
        store.insert("a", Table::default());
        let keys: Vec<String> = store.describe().into_iter().map(|i| i.key).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
