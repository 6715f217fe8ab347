//! Transfer jobs, mappings, and progress.

use crate::driver::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Keeps a source record when it returns `true`.
pub type FilterFn = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Rewrites a mapped record. An `Err` marks the record as failed.
pub type TransformFn = Arc<dyn Fn(Record) -> Result<Record, String> + Send + Sync>;

/// Returns a rejection reason for an invalid record.
pub type ValidateFn = Arc<dyn Fn(&Record) -> Option<String> + Send + Sync>;

/// How one source table is copied.
///
/// The hooks are process-local closures and are not persisted with the job.
#[derive(Clone, Serialize, Deserialize)]
pub struct TableMapping {
    /// Table read from the source.
    pub source_table: String,
    /// Table written on the target.
    pub target_table: String,
    /// Source field name to target field name. Empty copies every field as is.
    #[serde(default)]
    pub field_map: BTreeMap<String, String>,
    /// Whether hooks were attached when the job was created.
    #[serde(default)]
    pub declares_hooks: bool,
    /// Whether a filter was attached.
    #[serde(default)]
    pub filtered: bool,
    #[serde(skip)]
    pub(crate) filter: Option<FilterFn>,
    #[serde(skip)]
    pub(crate) transform: Option<TransformFn>,
    #[serde(skip)]
    pub(crate) validate: Option<ValidateFn>,
}

impl TableMapping {
    /// Copy `source_table` into `target_table` field for field.
    pub fn new(source_table: impl Into<String>, target_table: impl Into<String>) -> Self {
        Self {
            source_table: source_table.into(),
            target_table: target_table.into(),
            field_map: BTreeMap::new(),
            declares_hooks: false,
            filtered: false,
            filter: None,
            transform: None,
            validate: None,
        }
    }

    /// Copy a table into a table of the same name.
    pub fn identity(table: impl Into<String>) -> Self {
        let table = table.into();
        Self::new(table.clone(), table)
    }

    /// Rename a field. Once any field is mapped, unmapped fields are dropped.
    pub fn map_field(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.field_map.insert(from.into(), to.into());
        self
    }

    /// Only copy records accepted by `filter`.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self.filtered = true;
        self.declares_hooks = true;
        self
    }

    /// Rewrite each mapped record.
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Record) -> Result<Record, String> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self.declares_hooks = true;
        self
    }

    /// Reject records for which `validate` returns a reason.
    pub fn with_validation<F>(mut self, validate: F) -> Self
    where
        F: Fn(&Record) -> Option<String> + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(validate));
        self.declares_hooks = true;
        self
    }

    /// Whether the hooks this mapping declares are attached in this process.
    pub fn hooks_attached(&self) -> bool {
        !self.declares_hooks
            || self.filter.is_some()
            || self.transform.is_some()
            || self.validate.is_some()
    }

    /// Whether a transform is attached.
    pub fn has_transform(&self) -> bool {
        self.transform.is_some()
    }

    /// Target name of a source field, `None` when the field is dropped.
    pub fn target_field<'a>(&'a self, source_field: &'a str) -> Option<&'a str> {
        if self.field_map.is_empty() {
            Some(source_field)
        } else {
            self.field_map.get(source_field).map(String::as_str)
        }
    }
}

impl fmt::Debug for TableMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableMapping")
            .field("source_table", &self.source_table)
            .field("target_table", &self.target_table)
            .field("field_map", &self.field_map)
            .field("filter", &self.filter.is_some())
            .field("transform", &self.transform.is_some())
            .field("validate", &self.validate.is_some())
            .finish()
    }
}

/// Execution options of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferOptions {
    /// Records per batch. The hub default applies when `None`.
    pub batch_size: Option<usize>,
    /// Skip records whose id already exists on the target.
    pub skip_if_exists: bool,
    /// Empty target tables before copying.
    pub truncate_target: bool,
    /// Back up the target before truncating it.
    pub backup_target: bool,
    /// Check counts and critical fields after copying.
    pub validate_data: bool,
}

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, never run.
    Pending,
    /// Being executed.
    Running,
    /// Stopped at a checkpoint; can be resumed.
    Paused,
    /// Finished.
    Completed,
    /// Aborted by a critical or integrity error.
    Failed,
    /// Stopped for good.
    Cancelled,
}

impl JobStatus {
    /// Whether the job may be executed from this status.
    pub fn is_runnable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Paused)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Paused => write!(f, "paused"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Phase reported to progress listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    /// Resolving drivers and counting source records.
    #[default]
    Preparing,
    /// Emptying target tables.
    Truncating,
    /// Copying batches.
    Transferring,
    /// Checking the copy.
    Validating,
    /// Done.
    Completed,
}

/// Severity of a recorded issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Record excluded or table skipped; the job continues.
    Warning,
    /// Record failed during processing; the job continues.
    Error,
    /// The job was aborted.
    Critical,
}

/// A problem met while executing a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferIssue {
    /// Severity.
    pub severity: Severity,
    /// Source table involved.
    pub table: Option<String>,
    /// Source record involved.
    pub record_id: Option<String>,
    /// Description.
    pub message: String,
    /// When it happened.
    pub at: DateTime<Utc>,
}

impl TransferIssue {
    /// Create an issue about a table.
    pub fn new(severity: Severity, table: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            severity,
            table: table.map(str::to_string),
            record_id: None,
            message: message.into(),
            at: Utc::now(),
        }
    }

    /// Attach the record id.
    pub fn for_record(mut self, id: Option<String>) -> Self {
        self.record_id = id;
        self
    }
}

/// Per-table counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableStats {
    /// Source table.
    pub source_table: String,
    /// Target table.
    pub target_table: String,
    /// Records in the source table when the job started.
    pub source_count: u64,
    /// Records already in the target table before copying.
    pub preexisting_target: u64,
    /// Records read from the source.
    pub read: u64,
    /// Records inserted.
    pub transferred: u64,
    /// Records dropped by the filter.
    pub filtered: u64,
    /// Records rejected by validation or failed in processing.
    pub failed: u64,
    /// Records skipped because their id existed.
    pub duplicates: u64,
    /// Whether every batch was copied.
    pub completed: bool,
}

/// Running counters of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferProgress {
    /// Current phase.
    pub phase: TransferPhase,
    /// Table being copied.
    pub current_table: Option<String>,
    /// Tables copied completely.
    pub completed_tables: usize,
    /// Tables in the job.
    pub total_tables: usize,
    /// Records inserted into the target. Never decreases.
    pub transferred_records: u64,
    /// Records rejected or failed.
    pub failed_records: u64,
    /// Records in the source tables.
    pub total_records: u64,
    /// Kept issues, oldest first.
    pub issues: Vec<TransferIssue>,
    /// Every issue seen, including those beyond the kept ones.
    pub issue_count: u64,
    /// Per-table counters, in mapping order.
    pub tables: Vec<TableStats>,
    /// When execution first started.
    pub started_at: Option<DateTime<Utc>>,
    /// When execution finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Records per second over the whole run.
    pub throughput: Option<f64>,
}

impl TransferProgress {
    /// Record an issue, keeping at most `cap`.
    pub fn record(&mut self, issue: TransferIssue, cap: usize) {
        match issue.severity {
            Severity::Warning => tracing::warn!(table = ?issue.table, "{}", issue.message),
            Severity::Error => tracing::warn!(table = ?issue.table, record = ?issue.record_id, "{}", issue.message),
            Severity::Critical => tracing::error!(table = ?issue.table, "{}", issue.message),
        }
        self.issue_count += 1;
        if self.issues.len() < cap {
            self.issues.push(issue);
        }
    }

    /// Number of kept issues of a severity.
    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

/// Where a paused job resumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Index of the mapping in progress.
    pub table_index: usize,
    /// Source records of that table already read.
    pub offset: usize,
}

/// A data transfer between two connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferJob {
    /// Identifier.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Connection read from.
    pub source_id: String,
    /// Connection written to.
    pub target_id: String,
    /// Tables in copy order.
    pub mappings: Vec<TableMapping>,
    /// Execution options.
    pub options: TransferOptions,
    /// Effective batch size.
    pub batch_size: usize,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Counters.
    pub progress: TransferProgress,
    /// Resume position.
    pub checkpoint: Checkpoint,
    /// Backup of the target taken before truncation.
    pub backup_id: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last saved.
    pub updated_at: DateTime<Utc>,
}

impl TransferJob {
    /// Whether execution has not read anything yet.
    pub fn is_fresh(&self) -> bool {
        self.progress.started_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_mapping_keeps_every_field() {
        let mapping = TableMapping::identity("customers");
        assert_eq!(mapping.target_field("email"), Some("email"));
        assert!(mapping.hooks_attached());
    }

    #[test]
    fn test_explicit_mapping_drops_unmapped_fields() {
        let mapping = TableMapping::new("customers", "clients").map_field("email", "mail");
        assert_eq!(mapping.target_field("email"), Some("mail"));
        assert_eq!(mapping.target_field("phone"), None);
    }

    #[test]
    fn test_hooks_are_not_persisted() {
        let mapping = TableMapping::identity("customers")
            .with_filter(|r| r.get("vip") == Some(&json!(true)));
        let restored: TableMapping =
            serde_json::from_value(serde_json::to_value(&mapping).unwrap()).unwrap();

        assert!(restored.filtered);
        assert!(restored.declares_hooks);
        assert!(!restored.hooks_attached());
    }

    #[test]
    fn test_issue_cap_keeps_counting() {
        let mut progress = TransferProgress::default();
        for i in 0..5 {
            progress.record(TransferIssue::new(Severity::Warning, None, format!("w{}", i)), 3);
        }
        assert_eq!(progress.issues.len(), 3);
        assert_eq!(progress.issue_count, 5);
    }

    #[test]
    fn test_runnable_statuses() {
        assert!(JobStatus::Pending.is_runnable());
        assert!(JobStatus::Paused.is_runnable());
        assert!(!JobStatus::Cancelled.is_runnable());
        assert!(!JobStatus::Completed.is_runnable());
    }
}
