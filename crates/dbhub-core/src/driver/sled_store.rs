//! NoSQL store on sled: one tree per collection, records keyed by id.

use super::{
    BackendFamily, ConfigExt, ConnectionConfig, DriverError, DriverResult, EmbeddedDriver, Record,
    StorageBackend, StoredCatalog,
};
use sled::{Db, Tree};

/// Driver over a sled database.
pub type SledDriver = EmbeddedDriver<SledStore>;

/// Tree name prefix for collections.
pub const COLLECTION_TREE_PREFIX: &str = "c:";

/// Tree holding the declared structure.
const CATALOG_TREE: &str = "__catalog";
const CATALOG_KEY: &[u8] = b"catalog";

/// sled database holding one tree per collection.
pub struct SledStore {
    db: Db,
}

impl SledStore {
    /// Wrap an already opened database.
    pub fn from_db(db: Db) -> Self {
        Self { db }
    }

    fn tree_name(collection: &str) -> String {
        format!("{}{}", COLLECTION_TREE_PREFIX, collection)
    }

    /// Tree of an existing collection. Reads never create trees.
    fn existing_tree(&self, collection: &str) -> DriverResult<Option<Tree>> {
        let name = Self::tree_name(collection);
        let exists = self
            .db
            .tree_names()
            .iter()
            .any(|t| t.as_ref() == name.as_bytes());
        if exists {
            Ok(Some(self.db.open_tree(name)?))
        } else {
            Ok(None)
        }
    }

    fn decode(bytes: &[u8]) -> DriverResult<Record> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl StorageBackend for SledStore {
    const FAMILY: BackendFamily = BackendFamily::Nosql;

    fn open(config: &ConnectionConfig) -> DriverResult<Self> {
        let mut sled_config = sled::Config::new().use_compression(config.flag("compression")?);
        if config.flag("temporary")? {
            sled_config = sled_config.temporary(true);
        } else {
            sled_config = sled_config.path(config.required_path("path")?);
        }
        if let Some(capacity) = config.optional_u64("cacheCapacity")? {
            sled_config = sled_config.cache_capacity(capacity);
        }

        let db = sled_config
            .open()
            .map_err(|e| DriverError::Connection(format!("cannot open sled database: {}", e)))?;
        Ok(Self { db })
    }

    fn collections(&self) -> DriverResult<Vec<String>> {
        Ok(self
            .db
            .tree_names()
            .iter()
            .filter_map(|name| {
                std::str::from_utf8(name)
                    .ok()?
                    .strip_prefix(COLLECTION_TREE_PREFIX)
                    .map(str::to_string)
            })
            .collect())
    }

    fn load(&self, collection: &str) -> DriverResult<Vec<Record>> {
        let Some(tree) = self.existing_tree(collection)? else {
            return Ok(Vec::new());
        };
        tree.iter()
            .map(|entry| {
                let (_, value) = entry?;
                Self::decode(&value)
            })
            .collect()
    }

    fn get(&self, collection: &str, id: &str) -> DriverResult<Option<Record>> {
        let Some(tree) = self.existing_tree(collection)? else {
            return Ok(None);
        };
        tree.get(id.as_bytes())?
            .map(|value| Self::decode(&value))
            .transpose()
    }

    fn put_many(&self, collection: &str, records: &[(String, Record)]) -> DriverResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let tree = self.db.open_tree(Self::tree_name(collection))?;
        let mut batch = sled::Batch::default();
        for (id, record) in records {
            batch.insert(id.as_bytes(), serde_json::to_vec(record)?);
        }
        tree.apply_batch(batch)?;
        Ok(())
    }

    fn remove(&self, collection: &str, id: &str) -> DriverResult<bool> {
        match self.existing_tree(collection)? {
            Some(tree) => Ok(tree.remove(id.as_bytes())?.is_some()),
            None => Ok(false),
        }
    }

    fn clear(&self, collection: &str) -> DriverResult<u64> {
        let tree = self.db.open_tree(Self::tree_name(collection))?;
        let removed = tree.len() as u64;
        tree.clear()?;
        Ok(removed)
    }

    fn drop_collection(&self, collection: &str) -> DriverResult<()> {
        self.db.drop_tree(Self::tree_name(collection))?;
        Ok(())
    }

    fn load_catalog(&self) -> DriverResult<StoredCatalog> {
        let tree = self.db.open_tree(CATALOG_TREE)?;
        match tree.get(CATALOG_KEY)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(StoredCatalog::default()),
        }
    }

    fn save_catalog(&self, catalog: &StoredCatalog) -> DriverResult<()> {
        let tree = self.db.open_tree(CATALOG_TREE)?;
        tree.insert(CATALOG_KEY, serde_json::to_vec(catalog)?)?;
        Ok(())
    }

    fn flush(&self) -> DriverResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn size_bytes(&self) -> Option<u64> {
        self.db.size_on_disk().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{AlterColumn, BackendDriver, Filters};
    use crate::schema::{types, ColumnDef, TableDef};
    use serde_json::{json, Value};

    fn temporary() -> SledDriver {
        let mut config = ConnectionConfig::new();
        config.insert("temporary".into(), json!(true));
        SledDriver::new(config)
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_statements_are_unsupported() {
        let driver = temporary();
        driver.connect().await.unwrap();

        let err = driver.execute_statement("DELETE FROM customers").await.unwrap_err();
        assert!(matches!(err, DriverError::Unsupported(ref m) if m.contains("nosql")));
    }

    #[tokio::test]
    async fn test_reads_do_not_create_collections() {
        let driver = temporary();
        driver.connect().await.unwrap();

        assert!(driver.find_all("customers").await.unwrap().is_empty());
        assert_eq!(driver.read("customers", Some("1")).await.unwrap(), Value::Null);
        assert!(driver.introspect().await.unwrap().tables.is_empty());
    }

    #[tokio::test]
    async fn test_query_with_filters() {
        let driver = temporary();
        driver.connect().await.unwrap();
        for (id, city) in [("1", "Berlin"), ("2", "Paris"), ("3", "Berlin")] {
            driver
                .create("customers", record(json!({"id": id, "city": city})))
                .await
                .unwrap();
        }

        let filters = Filters::new().eq("city", "Berlin");
        assert_eq!(driver.count("customers", &filters).await.unwrap(), 2);

        let page = driver.find_many("customers", 2, 2).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["id"], json!("3"));
    }

    #[tokio::test]
    async fn test_modify_column_is_all_or_nothing() {
        let driver = temporary();
        driver.connect().await.unwrap();
        driver
            .create_table(
                &TableDef::new("services")
                    .with_column(ColumnDef::new("id", types::STRING).primary_key())
                    .with_column(ColumnDef::new("price", types::STRING)),
            )
            .await
            .unwrap();
        driver
            .create("services", record(json!({"id": "a", "price": "10"})))
            .await
            .unwrap();
        driver
            .create("services", record(json!({"id": "b", "price": "call us"})))
            .await
            .unwrap();

        let change = AlterColumn::Modify(ColumnDef::new("price", types::NUMBER));
        let err = driver.alter_table("services", &change).await.unwrap_err();
        assert!(matches!(err, DriverError::Conversion { ref id, .. } if id == "b"));

        let a = driver.read("services", Some("a")).await.unwrap();
        assert_eq!(a["price"], json!("10"));
        let schema = driver.introspect().await.unwrap();
        assert_eq!(
            schema.table("services").unwrap().column("price").unwrap().data_type,
            types::STRING
        );
    }

    #[tokio::test]
    async fn test_add_column_backfills_default() {
        let driver = temporary();
        driver.connect().await.unwrap();
        driver
            .create("customers", record(json!({"id": "1", "name": "Ada"})))
            .await
            .unwrap();

        let change = AlterColumn::Add(ColumnDef::new("vip", types::BOOLEAN).with_default(json!(false)));
        driver.alter_table("customers", &change).await.unwrap();

        let ada = driver.read("customers", Some("1")).await.unwrap();
        assert_eq!(ada["vip"], json!(false));
    }
}
