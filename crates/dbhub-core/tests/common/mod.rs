//! Shared fixtures for integration tests.

#![allow(dead_code)]

use dbhub_core::driver::{BackendDriver, ConflictPolicy, ConnectionConfig};
use dbhub_core::{BackendFamily, DbHub, DriverFactory, HubConfig, Record, SetupProfile};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct TestContext {
    pub hub: DbHub,
    pub dir: tempfile::TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Temporary metadata, backups on disk under the test directory.
    pub fn with_config(adjust: impl FnOnce(HubConfig) -> HubConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = adjust(HubConfig::temporary().with_backup_path(dir.path().join("backups")));
        let hub = DbHub::open(config).unwrap();
        Self { hub, dir }
    }

    /// Like [`new`](Self::new), with drivers built by `factory`.
    pub fn with_factory(factory: DriverFactory) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = HubConfig::temporary().with_backup_path(dir.path().join("backups"));
        let hub = DbHub::with_parts(config, factory, SetupProfile::canonical()).unwrap();
        Self { hub, dir }
    }

    pub fn backup_root(&self) -> PathBuf {
        self.dir.path().join("backups")
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Register and test a temporary sled connection.
    pub async fn sled(&self, name: &str) -> String {
        self.connect(name, BackendFamily::Nosql, config(json!({"temporary": true})))
            .await
    }

    /// Register and test a flat-file connection backed by `file` in the test directory.
    pub async fn flat_file(&self, name: &str, file: &str) -> String {
        let path = self.path(file);
        self.connect(name, BackendFamily::FlatFile, path_config(&path))
            .await
    }

    pub async fn connect(&self, name: &str, family: BackendFamily, cfg: ConnectionConfig) -> String {
        let connection = self.hub.registry().register(name, family, cfg).unwrap();
        let test = self.hub.registry().test_connection(&connection.id).await.unwrap();
        assert!(test.success, "connection test failed: {:?}", test.message);
        connection.id
    }

    pub async fn driver(&self, id: &str) -> Arc<dyn BackendDriver> {
        self.hub.registry().connected_driver(id).await.unwrap()
    }

    /// Insert records straight through a connection's driver.
    pub async fn seed(&self, id: &str, table: &str, records: Vec<Record>) {
        self.driver(id)
            .await
            .insert_batch(table, records, ConflictPolicy::Fail)
            .await
            .unwrap();
    }

    pub async fn count(&self, id: &str, table: &str) -> u64 {
        self.driver(id)
            .await
            .count(table, &Default::default())
            .await
            .unwrap()
    }
}

pub fn config(value: Value) -> ConnectionConfig {
    serde_json::from_value(value).unwrap()
}

pub fn path_config(path: &Path) -> ConnectionConfig {
    config(json!({"path": path.to_string_lossy()}))
}

pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {}", other),
    }
}

/// `count` customers with ids `c0000..` and an email each.
pub fn customers(count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            record(json!({
                "id": format!("c{:04}", i),
                "name": format!("Customer {}", i),
                "email": format!("customer{}@example.com", i),
                "vip": i % 10 == 0,
            }))
        })
        .collect()
}
