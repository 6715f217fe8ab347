//! Connection registry.
//!
//! Owns the configured backend instances, their liveness state, and the
//! single active connection every other component reads. Connections are
//! persisted in the metadata store; drivers are resolved through the
//! [`DriverFactory`] once per connection and cached.

mod connection;
mod setup;

pub use connection::BackendConnection;
pub use setup::{auto_setup, SetupProfile, SetupReport};

use crate::driver::{BackendDriver, BackendFamily, ConnectionConfig, ConnectionTest, DriverFactory};
use crate::error::{Error, Result};
use crate::store::{StateStore, StateTable, CONNECTIONS_TREE};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Registered backend instances and the active pointer.
pub struct ConnectionRegistry {
    connections: StateTable<BackendConnection>,
    factory: Arc<DriverFactory>,
    drivers: DashMap<String, Arc<dyn BackendDriver>>,
    /// Serializes activation and deletion.
    activation: Mutex<()>,
    profile: SetupProfile,
}

impl ConnectionRegistry {
    /// Open the registry persisted in `store`.
    pub fn open(store: &StateStore, factory: Arc<DriverFactory>, profile: SetupProfile) -> Result<Self> {
        Ok(Self {
            connections: store.table(CONNECTIONS_TREE)?,
            factory,
            drivers: DashMap::new(),
            activation: Mutex::new(()),
            profile,
        })
    }

    /// Canonical structure used by auto-setup.
    pub fn profile(&self) -> &SetupProfile {
        &self.profile
    }

    /// Register a new connection. Returns it with its generated id.
    pub fn register(
        &self,
        name: impl Into<String>,
        family: BackendFamily,
        config: ConnectionConfig,
    ) -> Result<BackendConnection> {
        self.insert(BackendConnection::new(name, family, config))
    }

    /// Store a connection under its own id, replacing any previous one.
    ///
    /// Activation state is always cleared; use [`activate`](Self::activate).
    pub fn insert(&self, mut connection: BackendConnection) -> Result<BackendConnection> {
        connection.is_active = false;
        connection.is_connected = false;
        self.drivers.remove(&connection.id);
        self.connections.save(&connection.id, &connection)?;
        tracing::info!(
            connection_id = %connection.id,
            name = %connection.name,
            family = %connection.family,
            "Registered connection"
        );
        Ok(connection)
    }

    /// Look up a connection.
    pub fn get(&self, id: &str) -> Result<BackendConnection> {
        self.connections
            .load(id)?
            .ok_or_else(|| Error::ConnectionNotFound(id.to_string()))
    }

    /// Every connection, ordered by id.
    pub fn list(&self) -> Result<Vec<BackendConnection>> {
        self.connections.list()
    }

    /// The active connection, if any.
    pub fn active(&self) -> Result<Option<BackendConnection>> {
        Ok(self.list()?.into_iter().find(|c| c.is_active))
    }

    /// The driver of a connection, resolved once and cached. Not necessarily connected.
    pub fn driver(&self, id: &str) -> Result<Arc<dyn BackendDriver>> {
        if let Some(driver) = self.drivers.get(id) {
            return Ok(Arc::clone(driver.value()));
        }
        let connection = self.get(id)?;
        let driver = self
            .drivers
            .entry(id.to_string())
            .or_insert_with(|| self.factory.create(connection.family, connection.config.clone()));
        Ok(Arc::clone(driver.value()))
    }

    /// The driver of a connection that passed its last liveness test,
    /// with its handle established.
    pub async fn connected_driver(&self, id: &str) -> Result<Arc<dyn BackendDriver>> {
        let connection = self.get(id)?;
        if !connection.is_connected {
            return Err(Error::NotConnected(id.to_string()));
        }
        let driver = self.driver(id)?;
        if !driver.is_connected() {
            driver.connect().await.map_err(|e| Error::Unreachable {
                id: id.to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(driver)
    }

    /// The driver of the active connection.
    pub async fn active_driver(&self) -> Result<Arc<dyn BackendDriver>> {
        let active = self.active()?.ok_or(Error::NoActiveConnection)?;
        self.connected_driver(&active.id).await
    }

    /// Probe a connection and record the outcome.
    #[tracing::instrument(skip(self))]
    pub async fn test_connection(&self, id: &str) -> Result<ConnectionTest> {
        let driver = self.driver(id)?;
        let test = driver.test_connection().await;

        let mut connection = self.get(id)?;
        connection.is_connected = test.success;
        if test.success {
            connection.last_connected_at = Some(Utc::now());
            connection.metadata = test.metadata.clone();
            tracing::info!(connection_id = %id, "Connection test succeeded");
        } else {
            tracing::warn!(
                connection_id = %id,
                message = test.message.as_deref().unwrap_or_default(),
                "Connection test failed"
            );
        }
        self.connections.save(id, &connection)?;
        Ok(test)
    }

    /// Make a connection the active one and run auto-setup on it.
    ///
    /// The connection is tested first unless it is already connected. An
    /// unreachable backend, or a failing setup, leaves every connection's
    /// activation unchanged.
    #[tracing::instrument(skip(self))]
    pub async fn activate(&self, id: &str) -> Result<SetupReport> {
        let _guard = self.activation.lock().await;

        let connection = self.get(id)?;
        let driver = self.driver(id)?;
        if !connection.is_connected || !driver.is_connected() {
            let test = self.test_connection(id).await?;
            if !test.success {
                return Err(Error::Unreachable {
                    id: id.to_string(),
                    message: test.message.unwrap_or_else(|| "connection test failed".to_string()),
                });
            }
        }

        let previous = self.active()?.filter(|c| c.id != id);
        let previous_driver = match &previous {
            Some(p) if p.family == BackendFamily::FlatFile => match self.connected_driver(&p.id).await {
                Ok(driver) => Some(driver),
                Err(e) => {
                    tracing::warn!(
                        connection_id = %p.id,
                        error = %e,
                        "Previous flat-file backend unavailable, skipping data migration"
                    );
                    None
                }
            },
            _ => None,
        };

        let report = auto_setup(driver.as_ref(), &self.profile, previous_driver.as_deref()).await?;

        if let Some(mut previous) = previous {
            previous.is_active = false;
            self.connections.save(&previous.id, &previous)?;
        }
        let mut connection = self.get(id)?;
        connection.is_active = true;
        self.connections.save(id, &connection)?;

        tracing::info!(connection_id = %id, status = ?report.status, "Activated connection");
        Ok(report)
    }

    /// Remove a connection, clearing the active pointer if it was active.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.activation.lock().await;

        let connection = self.get(id)?;
        if let Some((_, driver)) = self.drivers.remove(id) {
            if let Err(e) = driver.disconnect().await {
                tracing::warn!(connection_id = %id, error = %e, "Disconnect failed");
            }
        }
        self.connections.delete(id)?;
        tracing::info!(connection_id = %id, was_active = connection.is_active, "Deleted connection");
        Ok(())
    }
}
