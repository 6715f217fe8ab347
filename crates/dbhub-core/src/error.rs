//! Core error types.

use crate::driver::DriverError;
use thiserror::Error;

/// Errors surfaced by the hub's components.
#[derive(Debug, Error)]
pub enum Error {
    /// Metadata store error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backup payload storage error.
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Error raised by a backend driver.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// No connection is registered under this id.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// No connection is currently active.
    #[error("no active connection")]
    NoActiveConnection,

    /// The backend could not be reached.
    #[error("connection {id} is unreachable: {message}")]
    Unreachable {
        /// Connection id.
        id: String,
        /// Reason reported by the driver.
        message: String,
    },

    /// The connection has not passed a liveness test.
    #[error("connection {0} is not connected")]
    NotConnected(String),

    /// No backup is registered under this id.
    #[error("backup not found: {0}")]
    BackupNotFound(String),

    /// The stored payload does not match the recorded checksum.
    #[error("checksum mismatch for backup {backup_id}: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        /// Backup id.
        backup_id: String,
        /// Checksum recorded when the backup was created.
        expected: String,
        /// Checksum computed from the stored payload.
        actual: String,
    },

    /// Data integrity violation found during an operation.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// No transfer job is registered under this id.
    #[error("transfer job not found: {0}")]
    JobNotFound(String),

    /// The job is already being executed.
    #[error("transfer job {0} is already running")]
    JobAlreadyRunning(String),

    /// The requested operation is not allowed in the job's current status.
    #[error("cannot {operation} transfer job {job_id} in status {status}")]
    InvalidJobState {
        /// Job id.
        job_id: String,
        /// Current status.
        status: String,
        /// Rejected operation.
        operation: &'static str,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid schema version string.
    #[error("invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),
}

/// Result alias for hub operations.
pub type Result<T> = std::result::Result<T, Error>;
