//! Flat-file store: the whole data set in one JSON document.
//!
//! The file is rewritten in full on every mutation, through a temporary
//! sibling file and a rename.

use super::{
    BackendFamily, ConfigExt, ConnectionConfig, DriverError, DriverResult, EmbeddedDriver, Record,
    StorageBackend, StoredCatalog, ID_FIELD,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Driver over a JSON file.
pub type FlatFileDriver = EmbeddedDriver<FlatFileStore>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileContents {
    #[serde(default)]
    catalog: StoredCatalog,
    #[serde(default)]
    collections: BTreeMap<String, Vec<Record>>,
}

/// JSON file holding every collection in insertion order.
pub struct FlatFileStore {
    path: PathBuf,
    contents: RwLock<FileContents>,
}

impl FlatFileStore {
    /// Open or create the file at `path`.
    pub fn open_path(path: impl Into<PathBuf>) -> DriverResult<Self> {
        let path = path.into();
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        if !parent.is_dir() {
            return Err(DriverError::Connection(format!(
                "directory {} does not exist",
                parent.display()
            )));
        }

        let store = if path.exists() {
            let raw = fs::read(&path)?;
            let contents = if raw.iter().all(u8::is_ascii_whitespace) {
                FileContents::default()
            } else {
                serde_json::from_slice(&raw).map_err(|e| {
                    DriverError::Connection(format!("{} is not a data file: {}", path.display(), e))
                })?
            };
            Self {
                path,
                contents: RwLock::new(contents),
            }
        } else {
            let store = Self {
                path,
                contents: RwLock::new(FileContents::default()),
            };
            store.persist(&store.contents.read())?;
            store
        };
        Ok(store)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, contents: &FileContents) -> DriverResult<()> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(contents)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut FileContents) -> T) -> DriverResult<T> {
        let mut contents = self.contents.write();
        let result = f(&mut contents);
        self.persist(&contents)?;
        Ok(result)
    }
}

fn id_of(record: &Record) -> Option<String> {
    match record.get(ID_FIELD)? {
        Value::String(id) => Some(id.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl StorageBackend for FlatFileStore {
    const FAMILY: BackendFamily = BackendFamily::FlatFile;

    fn open(config: &ConnectionConfig) -> DriverResult<Self> {
        Self::open_path(config.required_path("path")?)
    }

    fn collections(&self) -> DriverResult<Vec<String>> {
        Ok(self.contents.read().collections.keys().cloned().collect())
    }

    fn load(&self, collection: &str) -> DriverResult<Vec<Record>> {
        Ok(self
            .contents
            .read()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }

    fn get(&self, collection: &str, id: &str) -> DriverResult<Option<Record>> {
        Ok(self.contents.read().collections.get(collection).and_then(|records| {
            records
                .iter()
                .find(|r| id_of(r).as_deref() == Some(id))
                .cloned()
        }))
    }

    fn put_many(&self, collection: &str, records: &[(String, Record)]) -> DriverResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.mutate(|contents| {
            let stored = contents
                .collections
                .entry(collection.to_string())
                .or_default();
            for (id, record) in records {
                match stored.iter_mut().find(|r| id_of(r).as_deref() == Some(id)) {
                    Some(existing) => *existing = record.clone(),
                    None => stored.push(record.clone()),
                }
            }
        })
    }

    fn remove(&self, collection: &str, id: &str) -> DriverResult<bool> {
        self.mutate(|contents| match contents.collections.get_mut(collection) {
            Some(records) => {
                let before = records.len();
                records.retain(|r| id_of(r).as_deref() != Some(id));
                records.len() != before
            }
            None => false,
        })
    }

    fn clear(&self, collection: &str) -> DriverResult<u64> {
        self.mutate(|contents| {
            let records = contents
                .collections
                .entry(collection.to_string())
                .or_default();
            let removed = records.len() as u64;
            records.clear();
            removed
        })
    }

    fn drop_collection(&self, collection: &str) -> DriverResult<()> {
        self.mutate(|contents| {
            contents.collections.remove(collection);
        })
    }

    fn load_catalog(&self) -> DriverResult<StoredCatalog> {
        Ok(self.contents.read().catalog.clone())
    }

    fn save_catalog(&self, catalog: &StoredCatalog) -> DriverResult<()> {
        self.mutate(|contents| contents.catalog = catalog.clone())
    }

    fn flush(&self) -> DriverResult<()> {
        self.persist(&self.contents.read())
    }

    fn size_bytes(&self) -> Option<u64> {
        fs::metadata(&self.path).ok().map(|m| m.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{BackendDriver, ConflictPolicy, Filters};
    use serde_json::json;

    fn config(path: &Path) -> ConnectionConfig {
        let mut config = ConnectionConfig::new();
        config.insert("path".into(), json!(path.to_string_lossy()));
        config
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_missing_directory_is_a_connection_failure() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FlatFileDriver::new(config(&dir.path().join("nope").join("data.json")));

        let err = driver.connect().await.unwrap_err();
        assert!(err.is_critical());
        assert!(!driver.is_connected());

        let probe = driver.test_connection().await;
        assert!(!probe.success);
    }

    #[tokio::test]
    async fn test_crud_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");

        let driver = FlatFileDriver::new(config(&path));
        driver.connect().await.unwrap();
        let created = driver
            .create("customers", record(json!({"name": "Ada"})))
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap().to_string();
        assert!(created.contains_key("createdAt"));

        driver
            .update("customers", &id, record(json!({"vip": true})))
            .await
            .unwrap();
        driver.disconnect().await.unwrap();

        let reopened = FlatFileDriver::new(config(&path));
        reopened.connect().await.unwrap();
        let value = reopened.read("customers", Some(&id)).await.unwrap();
        assert_eq!(value["name"], json!("Ada"));
        assert_eq!(value["vip"], json!(true));

        let all = reopened.read("customers", None).await.unwrap();
        assert_eq!(all["customers"].as_array().unwrap().len(), 1);

        assert!(reopened.delete("customers", &id).await.unwrap());
        assert!(!reopened.delete("customers", &id).await.unwrap());
        assert_eq!(
            reopened.read("customers", Some(&id)).await.unwrap(),
            Value::Null
        );
    }

    #[tokio::test]
    async fn test_batch_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FlatFileDriver::new(config(&dir.path().join("data.json")));
        driver.connect().await.unwrap();

        let batch = vec![
            record(json!({"id": "a"})),
            record(json!({"id": "b"})),
        ];
        let outcome = driver
            .insert_batch("orders", batch.clone(), ConflictPolicy::Fail)
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 2);

        let err = driver
            .insert_batch("orders", batch.clone(), ConflictPolicy::Fail)
            .await
            .unwrap_err();
        assert!(err.is_duplicate());

        let outcome = driver
            .insert_batch(
                "orders",
                vec![record(json!({"id": "a"})), record(json!({"id": "c"}))],
                ConflictPolicy::Skip,
            )
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(driver.count("orders", &Filters::new()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_truncate_unknown_table() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FlatFileDriver::new(config(&dir.path().join("data.json")));
        driver.connect().await.unwrap();

        let err = driver.truncate_table("ghosts").await.unwrap_err();
        assert!(err.is_missing_table());
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FlatFileDriver::new(config(&dir.path().join("data.json")));
        let err = driver.find_all("customers").await.unwrap_err();
        assert!(matches!(err, DriverError::NotConnected));
    }
}
