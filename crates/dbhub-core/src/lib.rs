//! DBHub Core - multi-backend database management.
//!
//! One driver interface over document stores, relational-over-HTTP
//! services, NoSQL stores and flat files, with schema comparison,
//! risk-scored migrations, checksummed backups, and batched data transfer
//! built on top of it.

pub mod backup;
pub mod config;
pub mod driver;
pub mod error;
pub mod facade;
pub mod hub;
pub mod migration;
pub mod registry;
pub mod schema;
pub mod store;
pub mod transfer;

pub use backup::{BackupArtifact, BackupManager, BackupOptions};
pub use config::HubConfig;
pub use driver::{
    BackendDriver, BackendFamily, ConnectionConfig, DatabaseStatus, DriverError, DriverFactory,
    Filters, Record, RestoreOptions, TableSelection,
};
pub use error::{Error, Result};
pub use facade::DataFacade;
pub use hub::DbHub;
pub use migration::{
    ExecuteOptions, MigrationExecutor, MigrationPlan, MigrationPlanner, MigrationResult, RiskLevel,
    SchemaComparator, SchemaComparison,
};
pub use registry::{BackendConnection, ConnectionRegistry, SetupProfile, SetupReport};
pub use schema::{ColumnDef, IndexDef, RelationDef, SchemaDefinition, TableDef};
pub use transfer::{
    JobStatus, NoProgress, ProgressSink, TableMapping, TransferEngine, TransferJob,
    TransferOptions,
};
