//! Backend drivers.
//!
//! Every storage technology sits behind [`BackendDriver`], a fixed capability
//! set covering connection management, CRUD, bulk operations, and schema
//! introspection. Concrete families:
//!
//! | Family | Driver | Feature |
//! |--------|--------|---------|
//! | document store | [`DocumentDriver`] (SQLite documents) | `document` |
//! | relational over HTTP | [`RestDriver`] (PostgREST style) | `rest` |
//! | NoSQL | [`SledDriver`] | always |
//! | flat file | [`FlatFileDriver`] (JSON file) | always |
//!
//! Drivers are instantiated through the [`DriverFactory`]; a family whose
//! feature is compiled out resolves to an [`UnavailableDriver`].

mod config;
mod embedded;
mod error;
mod factory;
pub mod filter;
mod flat_file;
mod sled_store;
mod unavailable;

#[cfg(feature = "document")]
mod sqlite;

#[cfg(feature = "rest")]
mod rest;

pub use config::{ConnectionConfig, ConfigExt};
pub use embedded::{EmbeddedDriver, StorageBackend, StoredCatalog};
pub use error::{DriverError, DriverResult, FailureClass};
pub use factory::{DriverConstructor, DriverFactory};
pub use filter::Filters;
pub use flat_file::{FlatFileDriver, FlatFileStore};
pub use sled_store::{SledDriver, SledStore};
pub use unavailable::UnavailableDriver;

#[cfg(feature = "document")]
pub use sqlite::{DocumentDriver, SqliteStore};

#[cfg(feature = "rest")]
pub use rest::RestDriver;

use crate::migration::SchemaComparator;
use crate::schema::{ColumnDef, IndexDef, RelationDef, SchemaDefinition, TableDef};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A record: a JSON object keyed by field name.
pub type Record = serde_json::Map<String, Value>;

/// Field holding the record identifier.
pub const ID_FIELD: &str = "id";
/// Field stamped when a record is created.
pub const CREATED_AT_FIELD: &str = "createdAt";
/// Field stamped whenever a record is written.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Class of storage technology behind a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendFamily {
    /// Document store.
    DocumentStore,
    /// Relational database reached over HTTP.
    RelationalHttp,
    /// NoSQL key-value store.
    Nosql,
    /// Single JSON file.
    FlatFile,
}

impl BackendFamily {
    /// All families.
    pub const ALL: [BackendFamily; 4] = [
        BackendFamily::DocumentStore,
        BackendFamily::RelationalHttp,
        BackendFamily::Nosql,
        BackendFamily::FlatFile,
    ];

    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendFamily::DocumentStore => "document-store",
            BackendFamily::RelationalHttp => "relational-http",
            BackendFamily::Nosql => "nosql",
            BackendFamily::FlatFile => "flat-file",
        }
    }
}

impl std::fmt::Display for BackendFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendFamily::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown backend family '{}'", s))
    }
}

/// Metadata reported by a successful liveness probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionMetadata {
    /// Tables or collections present.
    pub tables: Vec<String>,
    /// Approximate size of the data set in bytes.
    pub size_bytes: Option<u64>,
    /// Recorded schema version.
    pub version: Option<String>,
}

/// Outcome of a liveness probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionTest {
    /// Whether the backend answered.
    pub success: bool,
    /// Human readable detail.
    pub message: Option<String>,
    /// Introspected metadata on success.
    pub metadata: Option<ConnectionMetadata>,
}

impl ConnectionTest {
    /// A successful probe.
    pub fn ok(message: impl Into<String>, metadata: ConnectionMetadata) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            metadata: Some(metadata),
        }
    }

    /// A failed probe.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            metadata: None,
        }
    }
}

/// Structural state of a backend relative to the canonical schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatabaseStatus {
    /// No tables at all.
    Empty,
    /// Structure that cannot be upgraded in place.
    IncompatibleSchema,
    /// Structure from an earlier schema version.
    OldSchema,
    /// Structure matches the canonical schema.
    Ready,
}

/// What to do when an inserted record's id already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Reject the whole batch.
    #[default]
    Fail,
    /// Skip the conflicting records.
    Skip,
}

/// Outcome of a bulk insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Records written.
    pub inserted: u64,
    /// Records skipped because their id already existed.
    pub duplicates: u64,
}

/// A column-level change to an existing table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AlterColumn {
    /// Add a column.
    Add(ColumnDef),
    /// Change a column's declaration (type, flags, default).
    Modify(ColumnDef),
    /// Remove a column.
    Drop {
        /// Column name.
        name: String,
    },
}

/// Table selection for backup and restore.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSelection {
    /// Only these tables (all when `None`).
    pub include: Option<Vec<String>>,
    /// Never these tables.
    pub exclude: Vec<String>,
}

impl TableSelection {
    /// Select every table.
    pub fn all() -> Self {
        Self::default()
    }

    /// Check whether a table is selected.
    pub fn includes(&self, table: &str) -> bool {
        let included = self
            .include
            .as_ref()
            .map_or(true, |tables| tables.iter().any(|t| t == table));
        included && !self.exclude.iter().any(|t| t == table)
    }
}

/// A full copy of a backend's data set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Family the snapshot was taken from.
    pub family: BackendFamily,
    /// Recorded schema version at snapshot time.
    pub version: Option<Version>,
    /// Structure at snapshot time.
    pub schema: SchemaDefinition,
    /// Records per table.
    pub tables: BTreeMap<String, Vec<Record>>,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

impl Snapshot {
    /// Total number of records.
    pub fn record_count(&self) -> u64 {
        self.tables.values().map(|r| r.len() as u64).sum()
    }
}

/// Options for replaying a snapshot.
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Truncate each table before inserting.
    pub overwrite_existing: bool,
    /// Tables to restore.
    pub selection: TableSelection,
}

/// Outcome of a snapshot replay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestoreSummary {
    /// Tables written.
    pub tables: Vec<String>,
    /// Records inserted.
    pub inserted: u64,
    /// Records skipped as duplicates.
    pub skipped: u64,
}

/// Capability set every backend family implements.
///
/// `connect` and `disconnect` are idempotent. Mutating operations stamp
/// `createdAt`/`updatedAt`. Expected unavailability is reported through
/// [`DriverError`] rather than panics.
#[async_trait]
pub trait BackendDriver: Send + Sync {
    /// Family of this driver.
    fn family(&self) -> BackendFamily;

    /// Establish the underlying handle.
    async fn connect(&self) -> DriverResult<()>;

    /// Tear down the underlying handle.
    async fn disconnect(&self) -> DriverResult<()>;

    /// Whether a handle is currently established.
    fn is_connected(&self) -> bool;

    /// Lightweight liveness probe. Never mutates data.
    async fn test_connection(&self) -> ConnectionTest {
        if let Err(e) = self.connect().await {
            return ConnectionTest::failed(e.to_string());
        }
        let schema = match self.introspect().await {
            Ok(schema) => schema,
            Err(e) => return ConnectionTest::failed(e.to_string()),
        };
        let version = self.recorded_version().await.ok().flatten();
        let metadata = ConnectionMetadata {
            tables: schema.tables.iter().map(|t| t.name.clone()).collect(),
            size_bytes: self.size_bytes().await,
            version: version.map(|v| v.to_string()),
        };
        ConnectionTest::ok(format!("{} backend reachable", self.family()), metadata)
    }

    /// Approximate size of the data set, when the backend can tell.
    async fn size_bytes(&self) -> Option<u64> {
        None
    }

    /// Insert one record, generating an id when absent.
    async fn create(&self, collection: &str, record: Record) -> DriverResult<Record>;

    /// Read one record by id (`Null` when absent), or the whole collection
    /// wrapped under its name when `id` is `None`.
    async fn read(&self, collection: &str, id: Option<&str>) -> DriverResult<Value>;

    /// Merge fields into an existing record.
    async fn update(&self, collection: &str, id: &str, patch: Record) -> DriverResult<Record>;

    /// Delete a record. Returns whether it existed.
    async fn delete(&self, collection: &str, id: &str) -> DriverResult<bool>;

    /// Records matching the filters.
    async fn query(&self, collection: &str, filters: &Filters) -> DriverResult<Vec<Record>>;

    /// Number of records matching the filters (pagination ignored).
    async fn count(&self, collection: &str, filters: &Filters) -> DriverResult<u64>;

    /// Every record of a collection.
    async fn find_all(&self, collection: &str) -> DriverResult<Vec<Record>> {
        self.query(collection, &Filters::new()).await
    }

    /// One page of records in stable order.
    async fn find_many(
        &self,
        collection: &str,
        limit: usize,
        offset: usize,
    ) -> DriverResult<Vec<Record>> {
        self.query(collection, &Filters::page(limit, offset)).await
    }

    /// Insert many records.
    async fn insert_batch(
        &self,
        collection: &str,
        records: Vec<Record>,
        on_conflict: ConflictPolicy,
    ) -> DriverResult<BatchOutcome>;

    /// Remove every record of a table. Returns the number removed.
    async fn truncate_table(&self, collection: &str) -> DriverResult<u64>;

    /// Introspect the live structure.
    async fn introspect(&self) -> DriverResult<SchemaDefinition>;

    /// Create a table.
    async fn create_table(&self, table: &TableDef) -> DriverResult<()>;

    /// Drop a table and its records.
    async fn drop_table(&self, table: &str) -> DriverResult<()>;

    /// Change a column of an existing table.
    async fn alter_table(&self, table: &str, change: &AlterColumn) -> DriverResult<()>;

    /// Create an index.
    async fn create_index(&self, index: &IndexDef) -> DriverResult<()>;

    /// Create a relation.
    async fn create_relation(&self, relation: &RelationDef) -> DriverResult<()>;

    /// Run a backend-native statement.
    async fn execute_statement(&self, _statement: &str) -> DriverResult<u64> {
        Err(DriverError::Unsupported(format!(
            "{} backends do not execute statements",
            self.family()
        )))
    }

    /// Schema version recorded in the backend.
    async fn recorded_version(&self) -> DriverResult<Option<Version>>;

    /// Record a schema version in the backend.
    async fn record_version(&self, version: &Version) -> DriverResult<()>;

    /// Classify the backend's structure against a canonical schema.
    async fn database_status(&self, canonical: &SchemaDefinition) -> DriverResult<DatabaseStatus> {
        let live = self.introspect().await?;
        if live.tables.is_empty() {
            return Ok(DatabaseStatus::Empty);
        }

        let comparison = SchemaComparator::compare(&live, canonical);
        let shared = live
            .tables
            .iter()
            .filter(|t| canonical.table(&t.name).is_some())
            .count();
        if shared == 0 || comparison.has_type_mismatches() {
            return Ok(DatabaseStatus::IncompatibleSchema);
        }

        let recorded = self.recorded_version().await?;
        let outdated = recorded.map_or(true, |v| v < canonical.version);
        if outdated || comparison.has_missing_structure() {
            return Ok(DatabaseStatus::OldSchema);
        }
        Ok(DatabaseStatus::Ready)
    }

    /// Snapshot the selected tables.
    async fn backup(&self, selection: &TableSelection) -> DriverResult<Snapshot> {
        let mut schema = self.introspect().await?;
        schema.tables.retain(|t| selection.includes(&t.name));
        schema.indexes.retain(|i| selection.includes(&i.table));
        schema.relations.retain(|r| selection.includes(&r.table));

        let mut tables = BTreeMap::new();
        for table in &schema.tables {
            let records = self.find_all(&table.name).await?;
            tables.insert(table.name.clone(), records);
        }

        Ok(Snapshot {
            family: self.family(),
            version: self.recorded_version().await?,
            schema,
            tables,
            taken_at: Utc::now(),
        })
    }

    /// Replay a snapshot into this backend.
    async fn restore(
        &self,
        snapshot: &Snapshot,
        options: &RestoreOptions,
    ) -> DriverResult<RestoreSummary> {
        let live = self.introspect().await?;
        let mut summary = RestoreSummary::default();

        for (name, records) in &snapshot.tables {
            if !options.selection.includes(name) {
                continue;
            }

            if live.table(name).is_none() {
                if let Some(def) = snapshot.schema.table(name) {
                    self.create_table(def).await?;
                }
            } else if options.overwrite_existing {
                match self.truncate_table(name).await {
                    Ok(_) => {}
                    Err(e) if e.is_missing_table() => {}
                    Err(e) => return Err(e),
                }
            }

            let policy = if options.overwrite_existing {
                ConflictPolicy::Fail
            } else {
                ConflictPolicy::Skip
            };
            let outcome = self.insert_batch(name, records.clone(), policy).await?;
            summary.inserted += outcome.inserted;
            summary.skipped += outcome.duplicates;
            summary.tables.push(name.clone());
        }

        Ok(summary)
    }
}

/// Current time in the stamp format used by every driver.
pub fn timestamp_now() -> Value {
    Value::String(Utc::now().to_rfc3339())
}

/// Ensure a record has an id, generating one when absent. Returns the id.
pub fn ensure_id(record: &mut Record) -> String {
    match record.get(ID_FIELD) {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            let id = uuid::Uuid::new_v4().to_string();
            record.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            id
        }
    }
}

/// Stamp creation and update times, keeping an existing creation time.
pub fn stamp_created(record: &mut Record) {
    let now = timestamp_now();
    record
        .entry(CREATED_AT_FIELD.to_string())
        .or_insert_with(|| now.clone());
    record.insert(UPDATED_AT_FIELD.to_string(), now);
}

/// Stamp the update time.
pub fn stamp_updated(record: &mut Record) {
    record.insert(UPDATED_AT_FIELD.to_string(), timestamp_now());
}
