//! Drivers for storage embedded in the process.
//!
//! The flat-file, sled, and SQLite document drivers share one implementation
//! of the [`BackendDriver`] contract on top of a handful of storage
//! primitives ([`StorageBackend`]). The declared structure (tables, indexes,
//! relations, schema version) lives in a [`StoredCatalog`] persisted by the
//! store itself; collections holding data without a declaration are
//! introspected by inferring column types from stored values.

use super::{
    ensure_id, stamp_created, stamp_updated, AlterColumn, BackendDriver, BackendFamily,
    BatchOutcome, ConflictPolicy, ConnectionConfig, DriverError, DriverResult, Filters, Record,
    ID_FIELD,
};
use crate::schema::{types, ColumnDef, IndexDef, RelationDef, SchemaDefinition, TableDef};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Declared structure persisted inside an embedded store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredCatalog {
    /// Recorded schema version.
    pub version: Option<Version>,
    /// Declared tables.
    pub tables: Vec<TableDef>,
    /// Declared indexes.
    pub indexes: Vec<IndexDef>,
    /// Declared relations.
    pub relations: Vec<RelationDef>,
}

impl StoredCatalog {
    fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    fn upsert_table(&mut self, table: TableDef) {
        match self.tables.iter_mut().find(|t| t.name == table.name) {
            Some(existing) => *existing = table,
            None => self.tables.push(table),
        }
    }
}

/// Storage primitives an embedded driver is built from.
///
/// Implementations are synchronous; records of one collection are returned
/// in a stable order.
pub trait StorageBackend: Send + Sync + Sized + 'static {
    /// Family reported by drivers over this store.
    const FAMILY: BackendFamily;

    /// Open the store described by the configuration.
    fn open(config: &ConnectionConfig) -> DriverResult<Self>;

    /// Collections that currently hold data.
    fn collections(&self) -> DriverResult<Vec<String>>;

    /// Every record of a collection.
    fn load(&self, collection: &str) -> DriverResult<Vec<Record>>;

    /// One record by id.
    fn get(&self, collection: &str, id: &str) -> DriverResult<Option<Record>>;

    /// Write records, replacing any with the same id.
    fn put_many(&self, collection: &str, records: &[(String, Record)]) -> DriverResult<()>;

    /// Write one record.
    fn put(&self, collection: &str, id: &str, record: &Record) -> DriverResult<()> {
        self.put_many(collection, &[(id.to_string(), record.clone())])
    }

    /// Remove one record. Returns whether it existed.
    fn remove(&self, collection: &str, id: &str) -> DriverResult<bool>;

    /// Remove every record of a collection. Returns the number removed.
    fn clear(&self, collection: &str) -> DriverResult<u64>;

    /// Remove a collection entirely.
    fn drop_collection(&self, collection: &str) -> DriverResult<()>;

    /// Load the declared structure.
    fn load_catalog(&self) -> DriverResult<StoredCatalog>;

    /// Persist the declared structure.
    fn save_catalog(&self, catalog: &StoredCatalog) -> DriverResult<()>;

    /// Flush pending writes.
    fn flush(&self) -> DriverResult<()>;

    /// Approximate size on disk.
    fn size_bytes(&self) -> Option<u64> {
        None
    }

    /// Run a native statement.
    fn execute(&self, _statement: &str) -> DriverResult<u64> {
        Err(DriverError::Unsupported(format!(
            "{} stores do not execute statements",
            Self::FAMILY
        )))
    }
}

/// [`BackendDriver`] over any [`StorageBackend`].
pub struct EmbeddedDriver<B: StorageBackend> {
    config: ConnectionConfig,
    handle: RwLock<Option<Arc<B>>>,
    write_lock: Mutex<()>,
}

impl<B: StorageBackend> EmbeddedDriver<B> {
    /// Create a disconnected driver.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            handle: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    /// The underlying store, failing when not connected.
    pub fn store(&self) -> DriverResult<Arc<B>> {
        self.handle.read().clone().ok_or(DriverError::NotConnected)
    }

    fn table_exists(&self, store: &B, catalog: &StoredCatalog, name: &str) -> DriverResult<bool> {
        Ok(catalog.table(name).is_some() || store.collections()?.iter().any(|c| c == name))
    }

    /// The declared table, or one inferred from stored records.
    fn resolve_table(&self, store: &B, catalog: &StoredCatalog, name: &str) -> DriverResult<TableDef> {
        if let Some(table) = catalog.table(name) {
            return Ok(table.clone());
        }
        if store.collections()?.iter().any(|c| c == name) {
            return Ok(infer_table(name, &store.load(name)?));
        }
        Err(DriverError::TableNotFound(name.to_string()))
    }

    fn prepare(catalog: &StoredCatalog, collection: &str, mut record: Record) -> (String, Record) {
        let id = ensure_id(&mut record);
        if let Some(table) = catalog.table(collection) {
            apply_defaults(table, &mut record);
        }
        stamp_created(&mut record);
        (id, record)
    }
}

/// Fill declared defaults for absent fields.
fn apply_defaults(table: &TableDef, record: &mut Record) {
    for column in &table.columns {
        if let Some(default) = &column.default {
            record
                .entry(column.name.clone())
                .or_insert_with(|| default.clone());
        }
    }
}

fn record_id(record: &Record) -> String {
    match record.get(ID_FIELD) {
        Some(Value::String(id)) => id.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Infer a table definition from stored records.
fn infer_table(name: &str, records: &[Record]) -> TableDef {
    let mut columns: BTreeMap<String, &'static str> = BTreeMap::new();
    for record in records {
        for (field, value) in record {
            if columns.get(field).is_none() {
                if let Some(data_type) = types::infer_type(value) {
                    columns.insert(field.clone(), data_type);
                }
            }
        }
    }

    let mut table = TableDef::new(name);
    let id_type = columns.remove(ID_FIELD).unwrap_or(types::STRING);
    table = table.with_column(ColumnDef::new(ID_FIELD, id_type).primary_key());
    for (field, data_type) in columns {
        table = table.with_column(ColumnDef::new(field, data_type));
    }
    table
}

#[async_trait]
impl<B: StorageBackend> BackendDriver for EmbeddedDriver<B> {
    fn family(&self) -> BackendFamily {
        B::FAMILY
    }

    async fn connect(&self) -> DriverResult<()> {
        let mut handle = self.handle.write();
        if handle.is_none() {
            let store = B::open(&self.config)?;
            tracing::debug!(family = %B::FAMILY, "Opened embedded store");
            *handle = Some(Arc::new(store));
        }
        Ok(())
    }

    async fn disconnect(&self) -> DriverResult<()> {
        let store = self.handle.write().take();
        if let Some(store) = store {
            store.flush()?;
            tracing::debug!(family = %B::FAMILY, "Closed embedded store");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.handle.read().is_some()
    }

    async fn size_bytes(&self) -> Option<u64> {
        self.store().ok().and_then(|s| s.size_bytes())
    }

    async fn create(&self, collection: &str, record: Record) -> DriverResult<Record> {
        let store = self.store()?;
        let _guard = self.write_lock.lock();
        let catalog = store.load_catalog()?;
        let (id, record) = Self::prepare(&catalog, collection, record);
        if store.get(collection, &id)?.is_some() {
            return Err(DriverError::Duplicate {
                collection: collection.to_string(),
                id,
            });
        }
        store.put(collection, &id, &record)?;
        Ok(record)
    }

    async fn read(&self, collection: &str, id: Option<&str>) -> DriverResult<Value> {
        let store = self.store()?;
        match id {
            Some(id) => Ok(store
                .get(collection, id)?
                .map(Value::Object)
                .unwrap_or(Value::Null)),
            None => {
                let records = store.load(collection)?;
                let mut wrapped = Record::new();
                wrapped.insert(
                    collection.to_string(),
                    Value::Array(records.into_iter().map(Value::Object).collect()),
                );
                Ok(Value::Object(wrapped))
            }
        }
    }

    async fn update(&self, collection: &str, id: &str, patch: Record) -> DriverResult<Record> {
        let store = self.store()?;
        let _guard = self.write_lock.lock();
        let mut record = store
            .get(collection, id)?
            .ok_or_else(|| DriverError::RecordNotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        for (field, value) in patch {
            if field != ID_FIELD {
                record.insert(field, value);
            }
        }
        stamp_updated(&mut record);
        store.put(collection, id, &record)?;
        Ok(record)
    }

    async fn delete(&self, collection: &str, id: &str) -> DriverResult<bool> {
        let store = self.store()?;
        let _guard = self.write_lock.lock();
        store.remove(collection, id)
    }

    async fn query(&self, collection: &str, filters: &Filters) -> DriverResult<Vec<Record>> {
        let store = self.store()?;
        Ok(filters.apply(store.load(collection)?))
    }

    async fn count(&self, collection: &str, filters: &Filters) -> DriverResult<u64> {
        let store = self.store()?;
        Ok(filters.count(&store.load(collection)?))
    }

    async fn insert_batch(
        &self,
        collection: &str,
        records: Vec<Record>,
        on_conflict: ConflictPolicy,
    ) -> DriverResult<BatchOutcome> {
        let store = self.store()?;
        let _guard = self.write_lock.lock();
        let catalog = store.load_catalog()?;

        let mut seen = HashSet::new();
        let mut batch = Vec::with_capacity(records.len());
        let mut outcome = BatchOutcome::default();

        for record in records {
            let (id, record) = Self::prepare(&catalog, collection, record);
            let exists = !seen.insert(id.clone()) || store.get(collection, &id)?.is_some();
            if exists {
                match on_conflict {
                    ConflictPolicy::Fail => {
                        return Err(DriverError::Duplicate {
                            collection: collection.to_string(),
                            id,
                        })
                    }
                    ConflictPolicy::Skip => {
                        outcome.duplicates += 1;
                        continue;
                    }
                }
            }
            batch.push((id, record));
        }

        store.put_many(collection, &batch)?;
        outcome.inserted = batch.len() as u64;
        Ok(outcome)
    }

    async fn truncate_table(&self, collection: &str) -> DriverResult<u64> {
        let store = self.store()?;
        let _guard = self.write_lock.lock();
        let catalog = store.load_catalog()?;
        if !self.table_exists(&store, &catalog, collection)? {
            return Err(DriverError::TableNotFound(collection.to_string()));
        }
        store.clear(collection)
    }

    async fn introspect(&self) -> DriverResult<SchemaDefinition> {
        let store = self.store()?;
        let catalog = store.load_catalog()?;

        let version = catalog.version.clone().unwrap_or_else(|| Version::new(0, 0, 0));
        let mut schema = SchemaDefinition::new(version);
        schema.tables = catalog.tables.clone();
        for name in store.collections()? {
            if catalog.table(&name).is_none() {
                schema.tables.push(infer_table(&name, &store.load(&name)?));
            }
        }
        schema.indexes = catalog.indexes;
        schema.relations = catalog.relations;
        Ok(schema)
    }

    async fn create_table(&self, table: &TableDef) -> DriverResult<()> {
        let store = self.store()?;
        let _guard = self.write_lock.lock();
        let mut catalog = store.load_catalog()?;
        catalog.upsert_table(table.clone());
        store.save_catalog(&catalog)?;
        tracing::debug!(table = %table.name, "Declared table");
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> DriverResult<()> {
        let store = self.store()?;
        let _guard = self.write_lock.lock();
        let mut catalog = store.load_catalog()?;
        if !self.table_exists(&store, &catalog, table)? {
            return Err(DriverError::TableNotFound(table.to_string()));
        }
        catalog.tables.retain(|t| t.name != table);
        catalog.indexes.retain(|i| i.table != table);
        catalog
            .relations
            .retain(|r| r.table != table && r.references_table != table);
        store.drop_collection(table)?;
        store.save_catalog(&catalog)
    }

    async fn alter_table(&self, table: &str, change: &AlterColumn) -> DriverResult<()> {
        let store = self.store()?;
        let _guard = self.write_lock.lock();
        let mut catalog = store.load_catalog()?;
        let mut def = self.resolve_table(&store, &catalog, table)?;
        let records = store.load(table)?;

        let rewritten: Vec<(String, Record)> = match change {
            AlterColumn::Add(column) => {
                match def.column_mut(&column.name) {
                    Some(existing) => *existing = column.clone(),
                    None => def.columns.push(column.clone()),
                }
                match &column.default {
                    Some(default) => records
                        .into_iter()
                        .filter(|r| !r.contains_key(&column.name))
                        .map(|mut r| {
                            r.insert(column.name.clone(), default.clone());
                            (ensure_id(&mut r), r)
                        })
                        .collect(),
                    None => Vec::new(),
                }
            }
            AlterColumn::Modify(column) => {
                let mut converted = Vec::new();
                for mut record in records {
                    let Some(value) = record.get(&column.name) else {
                        continue;
                    };
                    let coerced = types::coerce_value(value, &column.data_type).map_err(|reason| {
                        DriverError::Conversion {
                            table: table.to_string(),
                            column: column.name.clone(),
                            id: record_id(&record),
                            reason,
                        }
                    })?;
                    if &coerced != value {
                        record.insert(column.name.clone(), coerced);
                        converted.push((ensure_id(&mut record), record));
                    }
                }
                match def.column_mut(&column.name) {
                    Some(existing) => *existing = column.clone(),
                    None => def.columns.push(column.clone()),
                }
                converted
            }
            AlterColumn::Drop { name } => {
                def.columns.retain(|c| &c.name != name);
                records
                    .into_iter()
                    .filter_map(|mut r| {
                        r.remove(name)?;
                        Some((ensure_id(&mut r), r))
                    })
                    .collect()
            }
        };

        store.put_many(table, &rewritten)?;
        catalog.upsert_table(def);
        store.save_catalog(&catalog)?;
        tracing::debug!(table, rewritten = rewritten.len(), "Altered table");
        Ok(())
    }

    async fn create_index(&self, index: &IndexDef) -> DriverResult<()> {
        let store = self.store()?;
        let _guard = self.write_lock.lock();
        let mut catalog = store.load_catalog()?;
        if !self.table_exists(&store, &catalog, &index.table)? {
            return Err(DriverError::TableNotFound(index.table.clone()));
        }
        if !catalog.indexes.iter().any(|i| i.key() == index.key()) {
            catalog.indexes.push(index.clone());
            store.save_catalog(&catalog)?;
        }
        Ok(())
    }

    async fn create_relation(&self, relation: &RelationDef) -> DriverResult<()> {
        let store = self.store()?;
        let _guard = self.write_lock.lock();
        let mut catalog = store.load_catalog()?;
        for table in [&relation.table, &relation.references_table] {
            if !self.table_exists(&store, &catalog, table)? {
                return Err(DriverError::TableNotFound(table.clone()));
            }
        }
        if !catalog.relations.iter().any(|r| r.key() == relation.key()) {
            catalog.relations.push(relation.clone());
            store.save_catalog(&catalog)?;
        }
        Ok(())
    }

    async fn execute_statement(&self, statement: &str) -> DriverResult<u64> {
        let store = self.store()?;
        let _guard = self.write_lock.lock();
        store.execute(statement)
    }

    async fn recorded_version(&self) -> DriverResult<Option<Version>> {
        Ok(self.store()?.load_catalog()?.version)
    }

    async fn record_version(&self, version: &Version) -> DriverResult<()> {
        let store = self.store()?;
        let _guard = self.write_lock.lock();
        let mut catalog = store.load_catalog()?;
        catalog.version = Some(version.clone());
        store.save_catalog(&catalog)?;
        store.flush()
    }
}
