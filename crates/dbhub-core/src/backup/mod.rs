//! Backup and restore.
//!
//! A backup is a driver [`Snapshot`] serialized to JSON, optionally gzipped,
//! and written to an object store. Its metadata, including a SHA-256 digest
//! of the stored payload, lives in the metadata store. Every read of a
//! payload recomputes the digest and refuses a payload that does not match.

mod artifact;

pub use artifact::{checksum, compress, decompress, BackupArtifact, BackupFormat};

use crate::driver::{RestoreOptions, RestoreSummary, Snapshot, TableSelection};
use crate::error::{Error, Result};
use crate::registry::ConnectionRegistry;
use crate::store::{StateStore, StateTable, BACKUPS_TREE};
use chrono::Utc;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::path::Path;
use std::sync::Arc;

/// Options for [`BackupManager::create_backup`].
#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    /// Name of the backup. Generated when absent.
    pub name: Option<String>,
    /// Tables to include.
    pub selection: TableSelection,
    /// Gzip the payload.
    pub compressed: bool,
}

impl BackupOptions {
    /// Set the name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Gzip the payload.
    pub fn compressed(mut self) -> Self {
        self.compressed = true;
        self
    }

    /// Set the table selection.
    pub fn with_selection(mut self, selection: TableSelection) -> Self {
        self.selection = selection;
        self
    }
}

/// Creates, verifies, and restores backups.
pub struct BackupManager {
    registry: Arc<ConnectionRegistry>,
    index: StateTable<BackupArtifact>,
    objects: Arc<dyn ObjectStore>,
}

impl BackupManager {
    /// Create a manager storing payloads in `objects`.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: &StateStore,
        objects: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        Ok(Self {
            registry,
            index: store.table(BACKUPS_TREE)?,
            objects,
        })
    }

    /// Object store rooted at `root`, or in memory when `None`.
    pub fn object_store_for(root: Option<&Path>) -> Result<Arc<dyn ObjectStore>> {
        match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                Ok(Arc::new(LocalFileSystem::new_with_prefix(root)?))
            }
            None => Ok(Arc::new(InMemory::new())),
        }
    }

    /// Snapshot a connection and store the payload.
    #[tracing::instrument(skip(self, options))]
    pub async fn create_backup(
        &self,
        connection_id: &str,
        options: BackupOptions,
    ) -> Result<BackupArtifact> {
        let connection = self.registry.get(connection_id)?;
        let driver = self.registry.connected_driver(connection_id).await?;
        let snapshot = driver.backup(&options.selection).await?;

        let json = serde_json::to_vec(&snapshot)?;
        let payload = if options.compressed {
            compress(&json)?
        } else {
            json
        };

        let id = uuid::Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let format = BackupFormat::Json;
        let location = format!("backups/{}.{}", id, format.extension(options.compressed));

        let artifact = BackupArtifact {
            name: options.name.unwrap_or_else(|| {
                format!("{}-{}", connection.name, created_at.format("%Y%m%d%H%M%S"))
            }),
            id,
            connection_id: connection_id.to_string(),
            family: snapshot.family,
            created_at,
            size_bytes: payload.len() as u64,
            format,
            compressed: options.compressed,
            tables: snapshot.tables.keys().cloned().collect(),
            record_count: snapshot.record_count(),
            checksum: checksum(&payload),
            location,
        };

        self.objects
            .put(&ObjectPath::from(artifact.location.as_str()), PutPayload::from(payload))
            .await?;
        self.index.save(&artifact.id, &artifact)?;

        tracing::info!(
            backup_id = %artifact.id,
            tables = artifact.tables.len(),
            records = artifact.record_count,
            size = artifact.size_bytes,
            "Created backup"
        );
        Ok(artifact)
    }

    /// Replay a backup into a connection.
    ///
    /// Fails with [`Error::ChecksumMismatch`] before writing anything when
    /// the stored payload no longer matches its checksum.
    #[tracing::instrument(skip(self, options))]
    pub async fn restore_backup(
        &self,
        backup_id: &str,
        target_connection_id: &str,
        options: &RestoreOptions,
    ) -> Result<RestoreSummary> {
        let artifact = self.get_backup(backup_id)?;
        let snapshot = self.load_snapshot(&artifact).await?;
        let driver = self.registry.connected_driver(target_connection_id).await?;

        let summary = driver.restore(&snapshot, options).await?;
        tracing::info!(
            backup_id = %backup_id,
            target = %target_connection_id,
            inserted = summary.inserted,
            skipped = summary.skipped,
            "Restored backup"
        );
        Ok(summary)
    }

    /// Check a backup's payload against its checksum.
    pub async fn verify_backup(&self, backup_id: &str) -> Result<BackupArtifact> {
        let artifact = self.get_backup(backup_id)?;
        self.load_verified(&artifact).await?;
        Ok(artifact)
    }

    /// Decode a backup's payload after verifying it.
    pub async fn load_snapshot(&self, artifact: &BackupArtifact) -> Result<Snapshot> {
        let payload = self.load_verified(artifact).await?;
        let json = if artifact.compressed {
            decompress(&payload)?
        } else {
            payload
        };
        Ok(serde_json::from_slice(&json)?)
    }

    async fn load_verified(&self, artifact: &BackupArtifact) -> Result<Vec<u8>> {
        let payload = self
            .objects
            .get(&ObjectPath::from(artifact.location.as_str()))
            .await?
            .bytes()
            .await?;

        let actual = checksum(&payload);
        if actual != artifact.checksum {
            tracing::error!(backup_id = %artifact.id, "Backup checksum mismatch");
            return Err(Error::ChecksumMismatch {
                backup_id: artifact.id.clone(),
                expected: artifact.checksum.clone(),
                actual,
            });
        }
        Ok(payload.to_vec())
    }

    /// Backup metadata.
    pub fn get_backup(&self, backup_id: &str) -> Result<BackupArtifact> {
        self.index
            .load(backup_id)?
            .ok_or_else(|| Error::BackupNotFound(backup_id.to_string()))
    }

    /// Every backup, newest first.
    pub fn list_backups(&self) -> Result<Vec<BackupArtifact>> {
        let mut backups = self.index.list()?;
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    /// Delete a backup's payload and metadata.
    pub async fn delete_backup(&self, backup_id: &str) -> Result<()> {
        let artifact = self.get_backup(backup_id)?;
        match self
            .objects
            .delete(&ObjectPath::from(artifact.location.as_str()))
            .await
        {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        self.index.delete(backup_id)?;
        tracing::info!(backup_id = %backup_id, "Deleted backup");
        Ok(())
    }
}
