//! Persisted record of migration executions.

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

/// Final state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Every step succeeded.
    Complete,
    /// At least one step failed.
    Failed,
    /// The inverse steps were run.
    RolledBack,
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStatus::Complete => write!(f, "complete"),
            MigrationStatus::Failed => write!(f, "failed"),
            MigrationStatus::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// One execution of a migration plan against a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Plan identifier.
    pub plan_id: String,
    /// Target connection.
    pub connection_id: String,
    /// Version before execution.
    pub from_version: Version,
    /// Version the plan targets.
    pub to_version: Version,
    /// Final state.
    pub status: MigrationStatus,
    /// Names of steps that ran.
    pub executed_steps: Vec<String>,
    /// Names of steps that failed.
    pub failed_steps: Vec<String>,
    /// Backup taken before execution.
    pub backup_id: Option<String>,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution finished.
    pub finished_at: DateTime<Utc>,
}
