//! Driver-level error types.

use super::BackendFamily;
use thiserror::Error;

/// How a failure affects the operation that hit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The backend is gone; continuing is pointless.
    Critical,
    /// The failure is local to the table or record being processed.
    Ordinary,
}

/// Errors raised by backend drivers.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The client library for this family is not available in this build.
    #[error("{family} driver unavailable: {reason}")]
    Unavailable {
        /// Backend family.
        family: BackendFamily,
        /// Why the driver cannot be used.
        reason: String,
    },

    /// A required configuration key is absent.
    #[error("missing configuration field '{field}'")]
    MissingConfig {
        /// Configuration key.
        field: String,
    },

    /// A configuration key has an unusable value.
    #[error("invalid configuration field '{field}': {reason}")]
    InvalidConfig {
        /// Configuration key.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The backend could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    /// An operation was attempted before `connect`.
    #[error("driver is not connected")]
    NotConnected,

    /// The named table or collection does not exist.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// A record with the same id already exists.
    #[error("duplicate key '{id}' in {collection}")]
    Duplicate {
        /// Collection name.
        collection: String,
        /// Conflicting id.
        id: String,
    },

    /// A record with this id does not exist.
    #[error("record '{id}' not found in {collection}")]
    RecordNotFound {
        /// Collection name.
        collection: String,
        /// Missing id.
        id: String,
    },

    /// A stored value cannot be converted to a column's new type.
    #[error("cannot convert {table}.{column} of record '{id}': {reason}")]
    Conversion {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Offending record id.
        id: String,
        /// Why the conversion failed.
        reason: String,
    },

    /// A query filter could not be interpreted.
    #[error("invalid filter '{key}': {reason}")]
    InvalidFilter {
        /// Filter key.
        key: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The backend does not support this operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The backend rejected the operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// Embedded key-value store error.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// JSON encoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// File system error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite error.
    #[cfg(feature = "document")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// HTTP transport error.
    #[cfg(feature = "rest")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl DriverError {
    /// Classify the failure for abort decisions.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            DriverError::Unavailable { .. }
            | DriverError::Connection(_)
            | DriverError::NotConnected => FailureClass::Critical,
            #[cfg(feature = "rest")]
            DriverError::Http(e) if e.is_connect() || e.is_timeout() => FailureClass::Critical,
            _ => FailureClass::Ordinary,
        }
    }

    /// Whether the failure aborts multi-table operations.
    pub fn is_critical(&self) -> bool {
        self.failure_class() == FailureClass::Critical
    }

    /// Whether the failure is a missing table.
    pub fn is_missing_table(&self) -> bool {
        matches!(self, DriverError::TableNotFound(_))
    }

    /// Whether the failure is a duplicate key.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DriverError::Duplicate { .. })
    }

    pub(crate) fn missing(field: &str) -> Self {
        DriverError::MissingConfig {
            field: field.to_string(),
        }
    }

    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        DriverError::InvalidConfig {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias for driver operations.
pub type DriverResult<T> = std::result::Result<T, DriverError>;
