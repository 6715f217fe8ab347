//! Wiring of every component from one [`HubConfig`].

use crate::backup::BackupManager;
use crate::config::HubConfig;
use crate::driver::DriverFactory;
use crate::error::Result;
use crate::facade::DataFacade;
use crate::migration::{MigrationExecutor, MigrationPlan, MigrationPlanner, SchemaComparator, SchemaComparison};
use crate::registry::{ConnectionRegistry, SetupProfile};
use crate::store::StateStore;
use crate::transfer::TransferEngine;
use std::sync::Arc;

/// The database management hub.
pub struct DbHub {
    config: HubConfig,
    store: StateStore,
    registry: Arc<ConnectionRegistry>,
    backups: Arc<BackupManager>,
    migrations: MigrationExecutor,
    transfers: TransferEngine,
    facade: DataFacade,
}

impl DbHub {
    /// Open a hub with the built-in drivers and the canonical schema.
    pub fn open(config: HubConfig) -> Result<Self> {
        let factory = DriverFactory::new(config.request_timeout);
        Self::with_parts(config, factory, SetupProfile::canonical())
    }

    /// Open a hub keeping all state in temporary storage.
    pub fn temporary() -> Result<Self> {
        Self::open(HubConfig::temporary())
    }

    /// Open a hub with a custom driver factory and setup profile.
    pub fn with_parts(config: HubConfig, factory: DriverFactory, profile: SetupProfile) -> Result<Self> {
        let store = match &config.data_path {
            Some(path) => StateStore::open(path)?,
            None => StateStore::temporary()?,
        };

        let registry = Arc::new(ConnectionRegistry::open(&store, Arc::new(factory), profile)?);
        let objects = BackupManager::object_store_for(config.backup_path.as_deref())?;
        let backups = Arc::new(BackupManager::new(Arc::clone(&registry), &store, objects)?);
        let migrations = MigrationExecutor::new(Arc::clone(&registry), Arc::clone(&backups), &store)?;
        let transfers = TransferEngine::open(Arc::clone(&registry), Arc::clone(&backups), &store, &config)?;
        let facade = DataFacade::new(Arc::clone(&registry));

        tracing::info!(
            persistent = config.is_persistent(),
            backups = ?config.backup_path,
            "Opened hub"
        );

        Ok(Self {
            config,
            store,
            registry,
            backups,
            migrations,
            transfers,
            facade,
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Backup manager.
    pub fn backups(&self) -> &Arc<BackupManager> {
        &self.backups
    }

    /// Migration executor.
    pub fn migrations(&self) -> &MigrationExecutor {
        &self.migrations
    }

    /// Transfer engine.
    pub fn transfers(&self) -> &TransferEngine {
        &self.transfers
    }

    /// CRUD facade over the active connection.
    pub fn data(&self) -> &DataFacade {
        &self.facade
    }

    /// Compare a connection's live structure to the canonical schema.
    pub async fn compare(&self, connection_id: &str) -> Result<SchemaComparison> {
        let driver = self.registry.connected_driver(connection_id).await?;
        let live = driver.introspect().await?;
        Ok(SchemaComparator::compare(&live, &self.registry.profile().schema))
    }

    /// Plan the migration bringing a connection to the canonical schema.
    ///
    /// A backend without a recorded version is assumed to be at the
    /// canonical version.
    pub async fn plan_migration(&self, connection_id: &str) -> Result<MigrationPlan> {
        let canonical = &self.registry.profile().schema;
        let driver = self.registry.connected_driver(connection_id).await?;
        let live = driver.introspect().await?;
        let comparison = SchemaComparator::compare(&live, canonical);

        let target = canonical.version.clone();
        let current = driver.recorded_version().await?.unwrap_or_else(|| target.clone());
        let planner = MigrationPlanner::new(canonical.clone());
        Ok(planner.create_plan(&comparison, &current, &target))
    }

    /// Flush metadata to disk.
    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }
}
