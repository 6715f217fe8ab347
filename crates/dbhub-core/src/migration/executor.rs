//! Migration executor.
//!
//! Runs a [`MigrationPlan`] against a registered connection: optional backup
//! first, then every migration's steps in declared order, then the recorded
//! schema version is advanced when nothing failed.

use super::history::{MigrationRecord, MigrationStatus};
use super::plan::{MigrationPlan, MigrationStep, StepPayload};
use crate::backup::{BackupManager, BackupOptions};
use crate::driver::{BackendDriver, ConflictPolicy, DriverResult, Record, ID_FIELD};
use crate::error::Result;
use crate::registry::ConnectionRegistry;
use crate::store::{StateStore, StateTable, MIGRATIONS_TREE};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Options for [`MigrationExecutor::execute`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    /// Take a backup even when the plan does not require one.
    pub create_backup: bool,
    /// Record intended actions without touching the backend.
    pub dry_run: bool,
    /// Move on to the next migration after a failed step.
    pub continue_on_error: bool,
}

/// Outcome of an execution or rollback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Plan identifier.
    pub plan_id: String,
    /// Whether no step failed.
    pub success: bool,
    /// Names of steps that ran.
    pub executed_steps: Vec<String>,
    /// Names of steps that failed.
    pub failed_steps: Vec<String>,
    /// Backup taken before execution.
    pub backup_id: Option<String>,
    /// Whether a pre-migration backup exists to roll back to.
    pub rollback_available: bool,
    /// Error messages.
    pub errors: Vec<String>,
    /// Intended actions in dry-run mode.
    pub planned_actions: Vec<String>,
}

/// Executes migration plans.
pub struct MigrationExecutor {
    registry: Arc<ConnectionRegistry>,
    backups: Arc<BackupManager>,
    history: StateTable<MigrationRecord>,
}

impl MigrationExecutor {
    /// Create an executor recording history in `store`.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        backups: Arc<BackupManager>,
        store: &StateStore,
    ) -> Result<Self> {
        Ok(Self {
            registry,
            backups,
            history: store.table(MIGRATIONS_TREE)?,
        })
    }

    /// Execute `plan` against a connection.
    ///
    /// Returns `Err` only when the connection cannot be used; step failures
    /// are reported in the result. Applied migrations are marked on `plan`.
    #[tracing::instrument(skip(self, plan, options), fields(plan_id = %plan.id))]
    pub async fn execute(
        &self,
        plan: &mut MigrationPlan,
        connection_id: &str,
        options: ExecuteOptions,
    ) -> Result<MigrationResult> {
        let driver = self.registry.connected_driver(connection_id).await?;
        let started_at = Utc::now();
        let mut result = MigrationResult {
            plan_id: plan.id.clone(),
            ..Default::default()
        };

        if options.dry_run {
            result.planned_actions = plan.steps().map(|s| s.name.clone()).collect();
            result.success = true;
            tracing::info!(steps = result.planned_actions.len(), "Dry run complete");
            return Ok(result);
        }

        if options.create_backup || plan.backup_required {
            let backup = self
                .backups
                .create_backup(
                    connection_id,
                    BackupOptions::default().named(format!("pre-migration-{}", plan.id)),
                )
                .await;
            match backup {
                Ok(artifact) => result.backup_id = Some(artifact.id),
                Err(e) => {
                    tracing::error!(error = %e, "Pre-migration backup failed");
                    result.errors.push(format!("backup failed: {}", e));
                    if !options.continue_on_error {
                        self.finish(plan, connection_id, &result, started_at, MigrationStatus::Failed)?;
                        return Ok(result);
                    }
                }
            }
        }
        result.rollback_available = result.backup_id.is_some();

        'migrations: for migration in &mut plan.migrations {
            let mut failed = false;
            for step in &migration.steps {
                match apply_step(driver.as_ref(), step).await {
                    Ok(()) => {
                        tracing::debug!(step = %step.id, "Step applied");
                        result.executed_steps.push(step.name.clone());
                    }
                    Err(e) => {
                        tracing::warn!(step = %step.id, error = %e, "Step failed");
                        result.failed_steps.push(step.name.clone());
                        result.errors.push(format!("{}: {}", step.name, e));
                        failed = true;
                        break;
                    }
                }
            }

            if failed {
                if !options.continue_on_error {
                    break 'migrations;
                }
            } else {
                migration.applied = true;
            }
        }

        result.success = result.failed_steps.is_empty();
        if result.success {
            if let Err(e) = driver.record_version(&plan.to_version).await {
                result.success = false;
                result.errors.push(format!("recording version {}: {}", plan.to_version, e));
            }
        }

        let status = if result.success {
            MigrationStatus::Complete
        } else {
            MigrationStatus::Failed
        };
        self.finish(plan, connection_id, &result, started_at, status)?;

        tracing::info!(
            success = result.success,
            executed = result.executed_steps.len(),
            failed = result.failed_steps.len(),
            "Migration plan executed"
        );
        Ok(result)
    }

    /// Run the inverse steps of every applied migration, newest first, and
    /// restore the plan's starting version when all of them succeed.
    #[tracing::instrument(skip(self, plan), fields(plan_id = %plan.id))]
    pub async fn rollback(
        &self,
        plan: &mut MigrationPlan,
        connection_id: &str,
    ) -> Result<MigrationResult> {
        let driver = self.registry.connected_driver(connection_id).await?;
        let started_at = Utc::now();
        let mut result = MigrationResult {
            plan_id: plan.id.clone(),
            ..Default::default()
        };

        for migration in plan.migrations.iter_mut().rev().filter(|m| m.applied) {
            let mut failed = false;
            for step in &migration.rollback {
                match apply_step(driver.as_ref(), step).await {
                    Ok(()) => result.executed_steps.push(step.name.clone()),
                    Err(e) => {
                        result.failed_steps.push(step.name.clone());
                        result.errors.push(format!("{}: {}", step.name, e));
                        failed = true;
                        break;
                    }
                }
            }
            if failed {
                break;
            }
            migration.applied = false;
        }

        result.success = result.failed_steps.is_empty();
        if result.success {
            if let Err(e) = driver.record_version(&plan.from_version).await {
                result.success = false;
                result.errors.push(format!("recording version {}: {}", plan.from_version, e));
            }
        }

        let status = if result.success {
            MigrationStatus::RolledBack
        } else {
            MigrationStatus::Failed
        };
        self.finish(plan, connection_id, &result, started_at, status)?;
        tracing::info!(success = result.success, "Migration plan rolled back");
        Ok(result)
    }

    /// Executions, oldest first.
    pub fn history(&self) -> Result<Vec<MigrationRecord>> {
        let mut records = self.history.list()?;
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(records)
    }

    fn finish(
        &self,
        plan: &MigrationPlan,
        connection_id: &str,
        result: &MigrationResult,
        started_at: chrono::DateTime<Utc>,
        status: MigrationStatus,
    ) -> Result<()> {
        let record = MigrationRecord {
            plan_id: plan.id.clone(),
            connection_id: connection_id.to_string(),
            from_version: plan.from_version.clone(),
            to_version: plan.to_version.clone(),
            status,
            executed_steps: result.executed_steps.clone(),
            failed_steps: result.failed_steps.clone(),
            backup_id: result.backup_id.clone(),
            started_at,
            finished_at: Utc::now(),
        };
        let key = format!("{}:{}", started_at.timestamp_micros(), plan.id);
        self.history.save(&key, &record)
    }
}

/// Apply one step through the driver.
async fn apply_step(driver: &dyn BackendDriver, step: &MigrationStep) -> DriverResult<()> {
    match &step.payload {
        StepPayload::CreateTable { table } => driver.create_table(table).await,
        StepPayload::DropTable { table } => driver.drop_table(table).await,
        StepPayload::AlterColumn { change } => driver.alter_table(&step.table, change).await,
        StepPayload::CreateIndex { index } => driver.create_index(index).await,
        StepPayload::CreateRelation { relation } => driver.create_relation(relation).await,
        StepPayload::InsertRecords { records } => driver
            .insert_batch(&step.table, records.clone(), ConflictPolicy::Skip)
            .await
            .map(|_| ()),
        StepPayload::Backfill { column, value } => {
            backfill(driver, &step.table, column, value).await
        }
        StepPayload::Statement { sql } => driver.execute_statement(sql).await.map(|_| ()),
    }
}

async fn backfill(
    driver: &dyn BackendDriver,
    table: &str,
    column: &str,
    value: &Value,
) -> DriverResult<()> {
    let records = match driver.find_all(table).await {
        Ok(records) => records,
        Err(e) if e.is_missing_table() => return Ok(()),
        Err(e) => return Err(e),
    };

    for record in records {
        if !record.get(column).map_or(true, Value::is_null) {
            continue;
        }
        let id = match record.get(ID_FIELD) {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => continue,
        };
        let mut patch = Record::new();
        patch.insert(column.to_string(), value.clone());
        driver.update(table, &id, patch).await?;
    }
    Ok(())
}
