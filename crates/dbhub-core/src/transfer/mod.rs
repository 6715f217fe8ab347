//! Data transfer between connections.
//!
//! A [`TransferJob`] copies tables from a source connection to a target
//! connection in fixed-size batches. Execution runs through these phases,
//! each reported to a [`ProgressSink`]:
//!
//! 1. **preparing**: resolve drivers, count source records (best effort)
//! 2. **truncating**: optional, after an optional backup of the target
//! 3. **transferring**: table by table in mapping order, batch by batch
//! 4. **validating**: optional count and critical-field checks
//! 5. **completed**
//!
//! A critical driver failure aborts the job; any other table failure is
//! recorded as a warning and the next table is attempted. The position is
//! checkpointed after every batch so a paused job resumes where it stopped.

mod job;
mod process;
mod validate;

pub use job::{
    Checkpoint, FilterFn, JobStatus, Severity, TableMapping, TableStats, TransferIssue,
    TransferJob, TransferOptions, TransferPhase, TransferProgress, TransformFn, ValidateFn,
};
pub use process::{map_fields, process_batch, ProcessedBatch};
pub use validate::{is_critical_field, validate_table, ValidationSettings};

use crate::backup::{BackupManager, BackupOptions};
use crate::config::HubConfig;
use crate::driver::{
    BackendDriver, BatchOutcome, ConflictPolicy, DriverError, Filters, TableSelection,
};
use crate::error::{Error, Result};
use crate::registry::ConnectionRegistry;
use crate::store::{StateStore, StateTable, JOBS_TREE};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Receives progress after every phase change and batch.
pub trait ProgressSink: Send + Sync {
    /// Called with the job's current state.
    fn on_progress(&self, job: &TransferJob);
}

impl<F> ProgressSink for F
where
    F: Fn(&TransferJob) + Send + Sync,
{
    fn on_progress(&self, job: &TransferJob) {
        self(job)
    }
}

/// Sink that ignores progress.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _job: &TransferJob) {}
}

const SIGNAL_PAUSE: u8 = 1;
const SIGNAL_CANCEL: u8 = 2;

/// Stop request for a running job. Zero means none.
#[derive(Default)]
struct JobControl {
    signal: AtomicU8,
}

/// Limits applied to every job.
#[derive(Debug, Clone, Copy)]
struct EngineSettings {
    default_batch_size: usize,
    max_recorded_issues: usize,
    validation: ValidationSettings,
}

/// Why execution stopped before completion.
enum Halt {
    Paused,
    Cancelled,
    Failed,
}

/// Creates, executes, and controls transfer jobs.
pub struct TransferEngine {
    registry: Arc<ConnectionRegistry>,
    backups: Arc<BackupManager>,
    jobs: StateTable<TransferJob>,
    /// Mappings with their hooks, for jobs created in this process.
    hooks: DashMap<String, Vec<TableMapping>>,
    running: DashMap<String, Arc<JobControl>>,
    settings: EngineSettings,
}

impl TransferEngine {
    /// Open the engine. Jobs persisted as running are recovered as paused.
    pub fn open(
        registry: Arc<ConnectionRegistry>,
        backups: Arc<BackupManager>,
        store: &StateStore,
        config: &HubConfig,
    ) -> Result<Self> {
        let jobs: StateTable<TransferJob> = store.table(JOBS_TREE)?;
        for mut job in jobs.list()? {
            if job.status == JobStatus::Running {
                tracing::warn!(job_id = %job.id, "Recovering interrupted transfer job as paused");
                job.status = JobStatus::Paused;
                job.updated_at = Utc::now();
                jobs.save(&job.id, &job)?;
            }
        }

        Ok(Self {
            registry,
            backups,
            jobs,
            hooks: DashMap::new(),
            running: DashMap::new(),
            settings: EngineSettings {
                default_batch_size: config.default_batch_size,
                max_recorded_issues: config.max_recorded_issues,
                validation: ValidationSettings {
                    sample_size: config.validation_sample_size,
                    critical_sample_size: config.critical_field_sample_size,
                    tolerance: config.count_tolerance,
                },
            },
        })
    }

    /// Create a job. Both connections must have passed a liveness test.
    pub fn create_job(
        &self,
        name: impl Into<String>,
        source_id: &str,
        target_id: &str,
        mappings: Vec<TableMapping>,
        options: TransferOptions,
    ) -> Result<TransferJob> {
        for id in [source_id, target_id] {
            if !self.registry.get(id)?.is_connected {
                return Err(Error::NotConnected(id.to_string()));
            }
        }
        if mappings.is_empty() {
            return Err(Error::InvalidConfig("a transfer job needs at least one table mapping".into()));
        }

        let now = Utc::now();
        let batch_size = options
            .batch_size
            .unwrap_or(self.settings.default_batch_size)
            .max(1);
        let job = TransferJob {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            progress: TransferProgress {
                total_tables: mappings.len(),
                tables: mappings
                    .iter()
                    .map(|m| TableStats {
                        source_table: m.source_table.clone(),
                        target_table: m.target_table.clone(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            },
            mappings: mappings.clone(),
            options,
            batch_size,
            status: JobStatus::Pending,
            checkpoint: Checkpoint::default(),
            backup_id: None,
            created_at: now,
            updated_at: now,
        };

        self.jobs.save(&job.id, &job)?;
        self.hooks.insert(job.id.clone(), mappings);
        tracing::info!(job_id = %job.id, tables = job.mappings.len(), batch_size, "Created transfer job");
        Ok(job)
    }

    /// Re-attach mapping hooks to a job loaded from a previous process.
    pub fn attach_hooks(&self, job_id: &str, mappings: Vec<TableMapping>) -> Result<()> {
        let job = self.get_job(job_id)?;
        let same_tables = job.mappings.len() == mappings.len()
            && job
                .mappings
                .iter()
                .zip(&mappings)
                .all(|(a, b)| a.source_table == b.source_table && a.target_table == b.target_table);
        if !same_tables {
            return Err(Error::InvalidConfig(format!(
                "mappings do not match the tables of job {}",
                job_id
            )));
        }
        self.hooks.insert(job_id.to_string(), mappings);
        Ok(())
    }

    /// Look up a job.
    pub fn get_job(&self, job_id: &str) -> Result<TransferJob> {
        self.jobs
            .load(job_id)?
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))
    }

    /// Every job, newest first.
    pub fn list_jobs(&self) -> Result<Vec<TransferJob>> {
        let mut jobs = self.jobs.list()?;
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    /// Delete a job that is not running.
    pub fn delete_job(&self, job_id: &str) -> Result<()> {
        let job = self.get_job(job_id)?;
        if self.running.contains_key(job_id) {
            return Err(Error::InvalidJobState {
                job_id: job_id.to_string(),
                status: job.status.to_string(),
                operation: "delete",
            });
        }
        self.jobs.delete(job_id)?;
        self.hooks.remove(job_id);
        Ok(())
    }

    /// Ask a running job to stop at its next checkpoint.
    pub fn pause(&self, job_id: &str) -> Result<()> {
        let job = self.get_job(job_id)?;
        match self.running.get(job_id) {
            Some(control) if job.status == JobStatus::Running => {
                control.signal.store(SIGNAL_PAUSE, Ordering::SeqCst);
                tracing::info!(job_id = %job_id, "Pause requested");
                Ok(())
            }
            _ => Err(Error::InvalidJobState {
                job_id: job_id.to_string(),
                status: job.status.to_string(),
                operation: "pause",
            }),
        }
    }

    /// Stop a job for good. Accepted in every state.
    pub fn cancel(&self, job_id: &str) -> Result<TransferJob> {
        let mut job = self.get_job(job_id)?;
        if let Some(control) = self.running.get(job_id) {
            control.signal.store(SIGNAL_CANCEL, Ordering::SeqCst);
        }
        job.status = JobStatus::Cancelled;
        job.updated_at = Utc::now();
        self.jobs.save(job_id, &job)?;
        tracing::info!(job_id = %job_id, "Cancelled transfer job");
        Ok(job)
    }

    /// Resume a paused job.
    pub async fn resume(&self, job_id: &str, sink: &dyn ProgressSink) -> Result<TransferJob> {
        let job = self.get_job(job_id)?;
        if job.status != JobStatus::Paused {
            return Err(Error::InvalidJobState {
                job_id: job_id.to_string(),
                status: job.status.to_string(),
                operation: "resume",
            });
        }
        self.execute(job_id, sink).await
    }

    /// Execute a pending or paused job.
    ///
    /// Returns the job in its final state. `Err` is returned for unknown
    /// jobs, invalid states, a concurrent execution of the same job, and
    /// integrity violations found during validation.
    #[tracing::instrument(skip(self, sink))]
    pub async fn execute(&self, job_id: &str, sink: &dyn ProgressSink) -> Result<TransferJob> {
        let control = match self.running.entry(job_id.to_string()) {
            Entry::Occupied(_) => return Err(Error::JobAlreadyRunning(job_id.to_string())),
            Entry::Vacant(slot) => Arc::clone(slot.insert(Arc::new(JobControl::default())).value()),
        };

        let result = self.run(job_id, &control, sink).await;
        self.running.remove(job_id);
        result
    }

    async fn run(&self, job_id: &str, control: &JobControl, sink: &dyn ProgressSink) -> Result<TransferJob> {
        let mut job = self.get_job(job_id)?;
        if !job.status.is_runnable() {
            return Err(Error::InvalidJobState {
                job_id: job_id.to_string(),
                status: job.status.to_string(),
                operation: "execute",
            });
        }

        let mappings = self
            .hooks
            .get(job_id)
            .map(|m| m.value().clone())
            .unwrap_or_else(|| job.mappings.clone());
        if let Some(m) = mappings.iter().find(|m| !m.hooks_attached()) {
            return Err(Error::InvalidConfig(format!(
                "hooks of mapping {} -> {} are not attached; call attach_hooks first",
                m.source_table, m.target_table
            )));
        }

        let fresh = job.is_fresh();
        job.status = JobStatus::Running;
        job.progress.phase = TransferPhase::Preparing;
        job.progress.started_at.get_or_insert_with(Utc::now);
        self.save(&mut job, sink)?;

        let source = match self.registry.connected_driver(&job.source_id).await {
            Ok(driver) => driver,
            Err(e) => return self.abort(job, format!("source unavailable: {}", e), sink),
        };
        let target = match self.registry.connected_driver(&job.target_id).await {
            Ok(driver) => driver,
            Err(e) => return self.abort(job, format!("target unavailable: {}", e), sink),
        };

        if fresh {
            self.count_sources(&mut job, &mappings, source.as_ref()).await;
            self.save(&mut job, sink)?;

            if job.options.truncate_target {
                job.progress.phase = TransferPhase::Truncating;
                self.save(&mut job, sink)?;
                if let Err(halt) = self.truncate_targets(&mut job, &mappings, target.as_ref()).await {
                    return self.halt(job, halt, sink);
                }
            }

            self.count_preexisting(&mut job, &mappings, target.as_ref()).await;
        }

        job.progress.phase = TransferPhase::Transferring;
        self.save(&mut job, sink)?;

        let start = job.checkpoint.table_index;
        for (index, mapping) in mappings.iter().enumerate().skip(start) {
            if let Err(halt) = self
                .transfer_table(&mut job, index, mapping, source.as_ref(), target.as_ref(), control, sink)
                .await
            {
                return self.halt(job, halt, sink);
            }
        }
        job.progress.current_table = None;

        if let Some(halt) = requested_halt(control) {
            return self.halt(job, halt, sink);
        }

        if job.options.validate_data {
            job.progress.phase = TransferPhase::Validating;
            self.save(&mut job, sink)?;

            for (index, mapping) in mappings.iter().enumerate() {
                let stats = job.progress.tables[index].clone();
                if !stats.completed {
                    continue;
                }
                match validate_table(
                    source.as_ref(),
                    target.as_ref(),
                    mapping,
                    &stats,
                    &self.settings.validation,
                )
                .await
                {
                    Ok(issues) => {
                        for issue in issues {
                            job.progress.record(issue, self.settings.max_recorded_issues);
                        }
                    }
                    Err(issue) => {
                        let message = issue.message.clone();
                        job.progress.record(issue, self.settings.max_recorded_issues);
                        job.status = JobStatus::Failed;
                        job.progress.finished_at = Some(Utc::now());
                        self.save(&mut job, sink)?;
                        return Err(Error::Integrity(message));
                    }
                }
            }
        }

        if let Some(halt) = requested_halt(control) {
            return self.halt(job, halt, sink);
        }

        let finished = Utc::now();
        let elapsed = job
            .progress
            .started_at
            .map(|s| (finished - s).num_milliseconds().max(1) as f64 / 1000.0)
            .unwrap_or(1.0);
        job.progress.phase = TransferPhase::Completed;
        job.progress.finished_at = Some(finished);
        job.progress.throughput = Some(job.progress.transferred_records as f64 / elapsed);
        job.status = JobStatus::Completed;
        self.save(&mut job, sink)?;

        tracing::info!(
            job_id = %job.id,
            transferred = job.progress.transferred_records,
            failed = job.progress.failed_records,
            tables = job.progress.completed_tables,
            "Transfer job completed"
        );
        Ok(job)
    }

    async fn count_sources(&self, job: &mut TransferJob, mappings: &[TableMapping], source: &dyn BackendDriver) {
        let mut total = 0;
        for (stats, mapping) in job.progress.tables.iter_mut().zip(mappings) {
            stats.source_count = match source.count(&mapping.source_table, &Filters::new()).await {
                Ok(count) => count,
                Err(e) => {
                    tracing::debug!(table = %mapping.source_table, error = %e, "Counting source failed");
                    0
                }
            };
            total += stats.source_count;
        }
        job.progress.total_records = total;
    }

    async fn count_preexisting(&self, job: &mut TransferJob, mappings: &[TableMapping], target: &dyn BackendDriver) {
        for (stats, mapping) in job.progress.tables.iter_mut().zip(mappings) {
            stats.preexisting_target = target
                .count(&mapping.target_table, &Filters::new())
                .await
                .unwrap_or(0);
        }
    }

    async fn truncate_targets(
        &self,
        job: &mut TransferJob,
        mappings: &[TableMapping],
        target: &dyn BackendDriver,
    ) -> std::result::Result<(), Halt> {
        let cap = self.settings.max_recorded_issues;

        if job.options.backup_target {
            let selection = TableSelection {
                include: Some(mappings.iter().map(|m| m.target_table.clone()).collect()),
                exclude: Vec::new(),
            };
            let options = BackupOptions::default()
                .named(format!("pre-transfer-{}", job.id))
                .with_selection(selection);
            match self.backups.create_backup(&job.target_id, options).await {
                Ok(artifact) => job.backup_id = Some(artifact.id),
                Err(e) => {
                    job.progress.record(
                        TransferIssue::new(Severity::Critical, None, format!("CRITICAL: target backup failed: {}", e)),
                        cap,
                    );
                    return Err(Halt::Failed);
                }
            }
        }

        for mapping in mappings {
            let table = Some(mapping.target_table.as_str());
            match target.truncate_table(&mapping.target_table).await {
                Ok(removed) => {
                    tracing::debug!(table = %mapping.target_table, removed, "Truncated target table");
                }
                Err(e) if e.is_missing_table() => {
                    job.progress.record(
                        TransferIssue::new(Severity::Warning, table, format!("truncate skipped: {}", e)),
                        cap,
                    );
                }
                Err(e) => {
                    let critical = e.is_critical();
                    job.progress.record(table_failure(table, "truncate failed", &e), cap);
                    if critical {
                        return Err(Halt::Failed);
                    }
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn transfer_table(
        &self,
        job: &mut TransferJob,
        index: usize,
        mapping: &TableMapping,
        source: &dyn BackendDriver,
        target: &dyn BackendDriver,
        control: &JobControl,
        sink: &dyn ProgressSink,
    ) -> std::result::Result<(), Halt> {
        let cap = self.settings.max_recorded_issues;
        let batch_size = job.batch_size;
        let policy = if job.options.skip_if_exists {
            ConflictPolicy::Skip
        } else {
            ConflictPolicy::Fail
        };
        let table = Some(mapping.source_table.as_str());

        job.progress.current_table = Some(mapping.source_table.clone());
        if job.checkpoint.table_index != index {
            job.checkpoint = Checkpoint {
                table_index: index,
                offset: 0,
            };
        }

        loop {
            if let Some(halt) = requested_halt(control) {
                return Err(halt);
            }

            let offset = job.checkpoint.offset;
            let page = match source.find_many(&mapping.source_table, batch_size, offset).await {
                Ok(page) => page,
                Err(e) => return self.table_failed(job, table, "read failed", e),
            };
            let read = page.len();

            let processed = process_batch(mapping, page);
            let failed = processed.failed + processed.rejected;
            for issue in processed.issues {
                job.progress.record(issue, cap);
            }

            let mut outcome = BatchOutcome::default();
            if !processed.records.is_empty() {
                outcome = match target
                    .insert_batch(&mapping.target_table, processed.records, policy)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => return self.table_failed(job, table, "insert failed", e),
                };
            }
            let BatchOutcome { inserted, duplicates } = outcome;
            if duplicates > 0 {
                job.progress.record(
                    TransferIssue::new(
                        Severity::Warning,
                        table,
                        format!("{} duplicate records skipped", duplicates),
                    ),
                    cap,
                );
            }

            let stats = &mut job.progress.tables[index];
            stats.read += read as u64;
            stats.filtered += processed.filtered;
            stats.failed += failed;
            stats.transferred += inserted;
            stats.duplicates += duplicates;
            job.progress.transferred_records += inserted;
            job.progress.failed_records += failed;
            job.checkpoint.offset = offset + read;

            tracing::debug!(
                table = %mapping.source_table,
                offset,
                read,
                inserted,
                "Transferred batch"
            );
            self.save(job, sink).map_err(|e| {
                tracing::error!(error = %e, "Saving job progress failed");
                Halt::Failed
            })?;

            if read < batch_size {
                break;
            }
        }

        job.progress.tables[index].completed = true;
        job.progress.completed_tables += 1;
        job.checkpoint = Checkpoint {
            table_index: index + 1,
            offset: 0,
        };
        Ok(())
    }

    /// Record a table-level failure. Critical failures halt the job.
    fn table_failed(
        &self,
        job: &mut TransferJob,
        table: Option<&str>,
        context: &str,
        error: DriverError,
    ) -> std::result::Result<(), Halt> {
        job.progress
            .record(table_failure(table, context, &error), self.settings.max_recorded_issues);
        if error.is_critical() {
            Err(Halt::Failed)
        } else {
            job.checkpoint = Checkpoint {
                table_index: job.checkpoint.table_index + 1,
                offset: 0,
            };
            Ok(())
        }
    }

    fn abort(&self, mut job: TransferJob, message: String, sink: &dyn ProgressSink) -> Result<TransferJob> {
        job.progress.record(
            TransferIssue::new(Severity::Critical, None, format!("CRITICAL: {}", message)),
            self.settings.max_recorded_issues,
        );
        self.halt(job, Halt::Failed, sink)
    }

    fn halt(&self, mut job: TransferJob, halt: Halt, sink: &dyn ProgressSink) -> Result<TransferJob> {
        job.status = match halt {
            Halt::Paused => JobStatus::Paused,
            Halt::Cancelled => JobStatus::Cancelled,
            Halt::Failed => JobStatus::Failed,
        };
        if matches!(halt, Halt::Failed) {
            job.progress.finished_at = Some(Utc::now());
        }
        self.save(&mut job, sink)?;
        tracing::info!(job_id = %job.id, status = %job.status, "Transfer job stopped");
        Ok(job)
    }

    /// Persist and report `job`. A cancellation stored meanwhile is never overwritten.
    fn save(&self, job: &mut TransferJob, sink: &dyn ProgressSink) -> Result<()> {
        if job.status != JobStatus::Cancelled {
            if let Some(stored) = self.jobs.load(&job.id)? {
                if stored.status == JobStatus::Cancelled {
                    job.status = JobStatus::Cancelled;
                }
            }
        }
        job.updated_at = Utc::now();
        self.jobs.save(&job.id, job)?;
        sink.on_progress(job);
        Ok(())
    }
}

fn requested_halt(control: &JobControl) -> Option<Halt> {
    match control.signal.load(Ordering::SeqCst) {
        SIGNAL_PAUSE => Some(Halt::Paused),
        SIGNAL_CANCEL => Some(Halt::Cancelled),
        _ => None,
    }
}

/// Issue for a table-level failure. Critical failures carry the `CRITICAL:` prefix.
fn table_failure(table: Option<&str>, context: &str, error: &DriverError) -> TransferIssue {
    if error.is_critical() {
        TransferIssue::new(Severity::Critical, table, format!("CRITICAL: {}: {}", context, error))
    } else {
        TransferIssue::new(Severity::Warning, table, format!("{}: {}", context, error))
    }
}
