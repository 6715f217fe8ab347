//! Auto-setup run when a connection is activated.
//!
//! The backend's [`DatabaseStatus`] is evaluated once:
//!
//! - `Empty`: create the canonical structure, copy data in from the
//!   previously active flat-file backend, seed defaults, record the version.
//! - `IncompatibleSchema` / `OldSchema`: report that a backup and a
//!   migration are needed. Nothing is changed.
//! - `Ready`: nothing to do.

use crate::driver::{BackendDriver, ConflictPolicy, DatabaseStatus, DriverResult, Record};
use crate::schema::SchemaDefinition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What auto-setup found and did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupReport {
    /// Status before setup.
    pub status: DatabaseStatus,
    /// Tables created.
    pub created_tables: Vec<String>,
    /// Default records written.
    pub seeded_records: u64,
    /// Records copied from the previously active backend.
    pub migrated_records: u64,
    /// Whether a backup should be taken before migrating.
    pub backup_recommended: bool,
    /// Whether a migration is needed before the backend is usable.
    pub migration_required: bool,
}

impl SetupReport {
    fn new(status: DatabaseStatus) -> Self {
        let needs_migration = matches!(
            status,
            DatabaseStatus::IncompatibleSchema | DatabaseStatus::OldSchema
        );
        Self {
            status,
            created_tables: Vec::new(),
            seeded_records: 0,
            migrated_records: 0,
            backup_recommended: needs_migration,
            migration_required: needs_migration,
        }
    }
}

/// Canonical structure and default data a new backend is provisioned with.
#[derive(Debug, Clone)]
pub struct SetupProfile {
    /// Canonical structure.
    pub schema: SchemaDefinition,
    /// Default records per table.
    pub seed: BTreeMap<String, Vec<Record>>,
}

impl SetupProfile {
    /// The business site's canonical structure and defaults.
    pub fn canonical() -> Self {
        Self {
            schema: crate::schema::canonical::business_schema(),
            seed: crate::schema::canonical::seed_data(),
        }
    }
}

/// Evaluate and, for an empty backend, provision `driver`.
///
/// `previous` is the driver of the previously active flat-file backend.
pub async fn auto_setup(
    driver: &dyn BackendDriver,
    profile: &SetupProfile,
    previous: Option<&dyn BackendDriver>,
) -> DriverResult<SetupReport> {
    let status = driver.database_status(&profile.schema).await?;
    let mut report = SetupReport::new(status);

    match status {
        DatabaseStatus::Empty => {}
        DatabaseStatus::Ready => return Ok(report),
        DatabaseStatus::IncompatibleSchema | DatabaseStatus::OldSchema => {
            tracing::warn!(
                family = %driver.family(),
                status = ?status,
                "Backend needs a migration before use"
            );
            return Ok(report);
        }
    }

    for table in &profile.schema.tables {
        driver.create_table(table).await?;
        report.created_tables.push(table.name.clone());
    }
    for index in &profile.schema.indexes {
        driver.create_index(index).await?;
    }
    for relation in &profile.schema.relations {
        driver.create_relation(relation).await?;
    }

    if let Some(previous) = previous {
        report.migrated_records = copy_from(previous, driver, &profile.schema).await?;
    }

    for (table, records) in &profile.seed {
        let outcome = driver
            .insert_batch(table, records.clone(), ConflictPolicy::Skip)
            .await?;
        report.seeded_records += outcome.inserted;
    }

    driver.record_version(&profile.schema.version).await?;

    tracing::info!(
        family = %driver.family(),
        tables = report.created_tables.len(),
        seeded = report.seeded_records,
        migrated = report.migrated_records,
        "Provisioned empty backend"
    );
    Ok(report)
}

/// Copy every canonical table present in `source` into `target`.
async fn copy_from(
    source: &dyn BackendDriver,
    target: &dyn BackendDriver,
    schema: &SchemaDefinition,
) -> DriverResult<u64> {
    let live = source.introspect().await?;
    let mut copied = 0;

    for table in &schema.tables {
        if live.table(&table.name).is_none() {
            continue;
        }
        let records = source.find_all(&table.name).await?;
        if records.is_empty() {
            continue;
        }
        let outcome = target
            .insert_batch(&table.name, records, ConflictPolicy::Skip)
            .await?;
        copied += outcome.inserted;
    }

    Ok(copied)
}
