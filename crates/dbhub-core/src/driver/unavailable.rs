//! Stand-in for a family whose client library is not part of this build.

use super::{
    AlterColumn, BackendDriver, BackendFamily, BatchOutcome, ConflictPolicy, DriverError,
    DriverResult, Filters, Record,
};
use crate::schema::{IndexDef, RelationDef, SchemaDefinition, TableDef};
use async_trait::async_trait;
use semver::Version;
use serde_json::Value;

/// Driver that fails every operation with [`DriverError::Unavailable`].
#[derive(Debug, Clone)]
pub struct UnavailableDriver {
    family: BackendFamily,
    reason: String,
}

impl UnavailableDriver {
    /// Create a stand-in for `family`.
    pub fn new(family: BackendFamily, reason: impl Into<String>) -> Self {
        Self {
            family,
            reason: reason.into(),
        }
    }

    fn fail<T>(&self) -> DriverResult<T> {
        Err(DriverError::Unavailable {
            family: self.family,
            reason: self.reason.clone(),
        })
    }
}

#[async_trait]
impl BackendDriver for UnavailableDriver {
    fn family(&self) -> BackendFamily {
        self.family
    }

    async fn connect(&self) -> DriverResult<()> {
        self.fail()
    }

    async fn disconnect(&self) -> DriverResult<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        false
    }

    async fn create(&self, _collection: &str, _record: Record) -> DriverResult<Record> {
        self.fail()
    }

    async fn read(&self, _collection: &str, _id: Option<&str>) -> DriverResult<Value> {
        self.fail()
    }

    async fn update(&self, _collection: &str, _id: &str, _patch: Record) -> DriverResult<Record> {
        self.fail()
    }

    async fn delete(&self, _collection: &str, _id: &str) -> DriverResult<bool> {
        self.fail()
    }

    async fn query(&self, _collection: &str, _filters: &Filters) -> DriverResult<Vec<Record>> {
        self.fail()
    }

    async fn count(&self, _collection: &str, _filters: &Filters) -> DriverResult<u64> {
        self.fail()
    }

    async fn insert_batch(
        &self,
        _collection: &str,
        _records: Vec<Record>,
        _on_conflict: ConflictPolicy,
    ) -> DriverResult<BatchOutcome> {
        self.fail()
    }

    async fn truncate_table(&self, _collection: &str) -> DriverResult<u64> {
        self.fail()
    }

    async fn introspect(&self) -> DriverResult<SchemaDefinition> {
        self.fail()
    }

    async fn create_table(&self, _table: &TableDef) -> DriverResult<()> {
        self.fail()
    }

    async fn drop_table(&self, _table: &str) -> DriverResult<()> {
        self.fail()
    }

    async fn alter_table(&self, _table: &str, _change: &AlterColumn) -> DriverResult<()> {
        self.fail()
    }

    async fn create_index(&self, _index: &IndexDef) -> DriverResult<()> {
        self.fail()
    }

    async fn create_relation(&self, _relation: &RelationDef) -> DriverResult<()> {
        self.fail()
    }

    async fn recorded_version(&self) -> DriverResult<Option<Version>> {
        self.fail()
    }

    async fn record_version(&self, _version: &Version) -> DriverResult<()> {
        self.fail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_reports_unavailable() {
        let driver = UnavailableDriver::new(BackendFamily::DocumentStore, "built without `document`");
        let err = driver.connect().await.unwrap_err();
        assert!(matches!(err, DriverError::Unavailable { .. }));
        assert!(err.is_critical());

        let probe = driver.test_connection().await;
        assert!(!probe.success);
        assert!(probe.message.unwrap().contains("unavailable"));
    }
}
