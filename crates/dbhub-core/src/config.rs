//! Hub configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default number of records per transfer batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default number of source records sampled for filtered-table validation.
pub const DEFAULT_VALIDATION_SAMPLE_SIZE: usize = 100;

/// Default number of source records sampled for critical-field checks.
pub const DEFAULT_CRITICAL_FIELD_SAMPLE_SIZE: usize = 50;

/// Default relative tolerance for estimated target counts.
pub const DEFAULT_COUNT_TOLERANCE: f64 = 0.05;

/// Default cap on issues recorded per transfer job.
pub const DEFAULT_MAX_RECORDED_ISSUES: usize = 1000;

/// Default timeout for HTTP backends.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a [`DbHub`](crate::DbHub).
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Directory of the metadata store. `None` keeps metadata in a temporary store.
    pub data_path: Option<PathBuf>,

    /// Root directory for backup payloads. `None` keeps payloads in memory.
    pub backup_path: Option<PathBuf>,

    /// Records per transfer batch when a job does not set one.
    pub default_batch_size: usize,

    /// Source records sampled when validating filtered tables.
    pub validation_sample_size: usize,

    /// Source records sampled when checking critical fields.
    pub critical_field_sample_size: usize,

    /// Relative tolerance for estimated target counts.
    pub count_tolerance: f64,

    /// Issues kept per transfer job.
    pub max_recorded_issues: usize,

    /// Timeout for HTTP backends.
    pub request_timeout: Duration,
}

impl HubConfig {
    /// Configuration persisting metadata under `data_path`, with backups in
    /// its `backups` subdirectory.
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        let data_path = data_path.into();
        Self {
            backup_path: Some(data_path.join("backups")),
            data_path: Some(data_path),
            ..Self::temporary()
        }
    }

    /// Configuration keeping everything in temporary storage.
    pub fn temporary() -> Self {
        Self {
            data_path: None,
            backup_path: None,
            default_batch_size: DEFAULT_BATCH_SIZE,
            validation_sample_size: DEFAULT_VALIDATION_SAMPLE_SIZE,
            critical_field_sample_size: DEFAULT_CRITICAL_FIELD_SAMPLE_SIZE,
            count_tolerance: DEFAULT_COUNT_TOLERANCE,
            max_recorded_issues: DEFAULT_MAX_RECORDED_ISSUES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the backup directory.
    pub fn with_backup_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.backup_path = Some(path.into());
        self
    }

    /// Keep backup payloads in memory.
    pub fn with_in_memory_backups(mut self) -> Self {
        self.backup_path = None;
        self
    }

    /// Set the default batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.default_batch_size = size.max(1);
        self
    }

    /// Set the validation sample sizes.
    pub fn with_sample_sizes(mut self, validation: usize, critical_fields: usize) -> Self {
        self.validation_sample_size = validation;
        self.critical_field_sample_size = critical_fields;
        self
    }

    /// Set the count tolerance.
    pub fn with_count_tolerance(mut self, tolerance: f64) -> Self {
        self.count_tolerance = tolerance.clamp(0.0, 1.0);
        self
    }

    /// Set the cap on recorded issues.
    pub fn with_max_recorded_issues(mut self, max: usize) -> Self {
        self.max_recorded_issues = max;
        self
    }

    /// Set the HTTP timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Check whether metadata survives the process.
    pub fn is_persistent(&self) -> bool {
        self.data_path.is_some()
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::new("./dbhub-data")
    }
}
