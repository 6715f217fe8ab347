//! Metadata persistence.
//!
//! The hub keeps its own state (registered connections, the backup index,
//! transfer jobs, migration history) in one sled database, one tree per
//! concern. Values are JSON so opaque driver configuration round-trips
//! unchanged.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::Path;

/// Tree holding registered connections.
pub const CONNECTIONS_TREE: &str = "registry:connections";
/// Tree holding backup artifact metadata.
pub const BACKUPS_TREE: &str = "backup:artifacts";
/// Tree holding transfer jobs.
pub const JOBS_TREE: &str = "transfer:jobs";
/// Tree holding migration history.
pub const MIGRATIONS_TREE: &str = "migration:history";

/// sled database holding hub metadata.
#[derive(Clone)]
pub struct StateStore {
    db: sled::Db,
}

impl StateStore {
    /// Open or create a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::Config::new().path(path.as_ref()).open()?;
        Ok(Self { db })
    }

    /// Open a store deleted when dropped.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Typed view over one tree.
    pub fn table<T>(&self, name: &str) -> Result<StateTable<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        Ok(StateTable {
            tree: self.db.open_tree(name)?,
            _marker: PhantomData,
        })
    }

    /// Flush all trees to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// Entities of one type keyed by id.
pub struct StateTable<T> {
    tree: sled::Tree,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for StateTable<T> {
    fn clone(&self) -> Self {
        Self {
            tree: self.tree.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> StateTable<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Save an entity under `id`.
    pub fn save(&self, id: &str, value: &T) -> Result<()> {
        self.tree.insert(id.as_bytes(), serde_json::to_vec(value)?)?;
        Ok(())
    }

    /// Load an entity.
    pub fn load(&self, id: &str) -> Result<Option<T>> {
        match self.tree.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete an entity. Returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.tree.remove(id.as_bytes())?.is_some())
    }

    /// Every entity, ordered by id.
    pub fn list(&self) -> Result<Vec<T>> {
        let mut values = Vec::new();
        for entry in self.tree.iter() {
            let (_, bytes) = entry?;
            values.push(serde_json::from_slice(&bytes)?);
        }
        Ok(values)
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Check whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        name: String,
        size: u64,
    }

    #[test]
    fn test_table_roundtrip() {
        let store = StateStore::temporary().unwrap();
        let table: StateTable<Entry> = store.table(BACKUPS_TREE).unwrap();
        assert!(table.is_empty());

        let entry = Entry {
            name: "nightly".into(),
            size: 42,
        };
        table.save("b1", &entry).unwrap();
        assert_eq!(table.load("b1").unwrap(), Some(entry));
        assert_eq!(table.len(), 1);

        assert!(table.delete("b1").unwrap());
        assert!(!table.delete("b1").unwrap());
        assert!(table.load("b1").unwrap().is_none());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = StateStore::open(dir.path()).unwrap();
            let table: StateTable<Entry> = store.table(JOBS_TREE).unwrap();
            table
                .save(
                    "j1",
                    &Entry {
                        name: "copy".into(),
                        size: 1,
                    },
                )
                .unwrap();
            store.flush().unwrap();
        }

        let store = StateStore::open(dir.path()).unwrap();
        let table: StateTable<Entry> = store.table(JOBS_TREE).unwrap();
        assert_eq!(table.list().unwrap().len(), 1);
    }
}
