//! CRUD contract for the rest of the application.
//!
//! Every call resolves the active connection, so callers never know which
//! backend family serves them.

use crate::driver::{BackendDriver, Filters, Record};
use crate::error::Result;
use crate::registry::ConnectionRegistry;
use serde_json::Value;
use std::sync::Arc;

/// Reads and writes against the active connection.
#[derive(Clone)]
pub struct DataFacade {
    registry: Arc<ConnectionRegistry>,
}

impl DataFacade {
    /// Create a facade over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    async fn driver(&self) -> Result<Arc<dyn BackendDriver>> {
        self.registry.active_driver().await
    }

    /// One record (`Null` when absent), or the whole collection wrapped
    /// under its name.
    pub async fn read(&self, collection: &str, id: Option<&str>) -> Result<Value> {
        Ok(self.driver().await?.read(collection, id).await?)
    }

    /// Insert a record.
    pub async fn create(&self, collection: &str, record: Record) -> Result<Record> {
        Ok(self.driver().await?.create(collection, record).await?)
    }

    /// Merge fields into a record.
    pub async fn update(&self, collection: &str, id: &str, patch: Record) -> Result<Record> {
        Ok(self.driver().await?.update(collection, id, patch).await?)
    }

    /// Delete a record. Returns whether it existed.
    pub async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        Ok(self.driver().await?.delete(collection, id).await?)
    }

    /// Records matching a filter map (`_orderBy`, `_limit`, `_offset` reserved).
    pub async fn query(&self, collection: &str, filters: &Record) -> Result<Vec<Record>> {
        let filters = Filters::from_map(filters)?;
        Ok(self.driver().await?.query(collection, &filters).await?)
    }

    /// Number of records matching a filter map.
    pub async fn count(&self, collection: &str, filters: &Record) -> Result<u64> {
        let filters = Filters::from_map(filters)?;
        Ok(self.driver().await?.count(collection, &filters).await?)
    }
}
