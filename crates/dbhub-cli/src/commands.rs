//! Subcommand definitions and dispatch.

use crate::formatter::Formatter;
use clap::{Args, Subcommand};
use dbhub_core::driver::TableSelection;
use dbhub_core::transfer::TransferPhase;
use dbhub_core::{
    BackendFamily, BackupOptions, ConnectionConfig, DbHub, ExecuteOptions, Record,
    RestoreOptions, TableMapping, TransferJob, TransferOptions,
};
use serde_json::Value;

type CommandResult = Result<String, Box<dyn std::error::Error>>;

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage backend connections
    #[command(subcommand)]
    Connections(ConnectionCommand),

    /// Inspect backend structure
    #[command(subcommand)]
    Schema(SchemaCommand),

    /// Plan and run migrations
    #[command(subcommand)]
    Migrate(MigrateCommand),

    /// Create, verify, and restore backups
    #[command(subcommand)]
    Backup(BackupCommand),

    /// Copy data between connections
    #[command(subcommand)]
    Transfer(TransferCommand),

    /// Read and write records on the active connection
    #[command(subcommand)]
    Data(DataCommand),
}

#[derive(Subcommand, Debug)]
pub enum ConnectionCommand {
    /// List registered connections
    List,
    /// Register a connection
    Add {
        /// Display name
        name: String,
        /// Backend family (document-store, relational-http, nosql, flat-file)
        #[arg(value_parser = parse_family)]
        family: BackendFamily,
        /// Driver settings as key=value (values parsed as JSON when possible)
        #[arg(short, long = "set")]
        settings: Vec<String>,
    },
    /// Probe a connection
    Test { connection: String },
    /// Make a connection active, provisioning it when empty
    Activate { connection: String },
    /// Remove a connection
    Remove { connection: String },
}

#[derive(Subcommand, Debug)]
pub enum SchemaCommand {
    /// Compare a backend's structure to the canonical schema
    Compare {
        /// Connection id or name
        connection: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum MigrateCommand {
    /// Show the plan for a connection
    Plan { connection: String },
    /// Execute the plan for a connection
    Run {
        connection: String,
        /// List the steps without applying them
        #[arg(long)]
        dry_run: bool,
        /// Back up even when the plan does not require it
        #[arg(long)]
        backup: bool,
        /// Keep going after a failed migration
        #[arg(long)]
        continue_on_error: bool,
    },
    /// Show past executions
    History,
}

#[derive(Subcommand, Debug)]
pub enum BackupCommand {
    /// Back up a connection
    Create {
        connection: String,
        /// Backup name
        #[arg(short, long)]
        name: Option<String>,
        /// Gzip the payload
        #[arg(short, long)]
        compress: bool,
        /// Only these tables
        #[arg(short, long = "table")]
        tables: Vec<String>,
    },
    /// Restore a backup into a connection
    Restore {
        backup: String,
        target: String,
        /// Truncate existing tables first
        #[arg(long)]
        overwrite: bool,
    },
    /// List backups
    List,
    /// Check a backup's checksum
    Verify { backup: String },
    /// Delete a backup
    Delete { backup: String },
}

#[derive(Subcommand, Debug)]
pub enum TransferCommand {
    /// Create and run a transfer job
    Run(TransferRunArgs),
    /// List transfer jobs
    List,
    /// Resume a paused job
    Resume { job: String },
    /// Cancel a job
    Cancel { job: String },
}

#[derive(Args, Debug)]
pub struct TransferRunArgs {
    /// Source connection id or name
    source: String,
    /// Target connection id or name
    target: String,
    /// Tables to copy, as `table` or `source:target`
    #[arg(short, long = "table", required = true)]
    tables: Vec<String>,
    /// Records per batch
    #[arg(long)]
    batch_size: Option<usize>,
    /// Skip records whose id already exists in the target
    #[arg(long)]
    skip_existing: bool,
    /// Empty target tables first
    #[arg(long)]
    truncate: bool,
    /// Back up the target before truncating
    #[arg(long)]
    backup_target: bool,
    /// Validate counts and critical fields afterwards
    #[arg(long)]
    validate: bool,
}

#[derive(Subcommand, Debug)]
pub enum DataCommand {
    /// Read one record, or a whole collection
    Read { collection: String, id: Option<String> },
    /// Query with key=value filters (_orderBy, _limit, _offset reserved)
    Query {
        collection: String,
        filters: Vec<String>,
    },
    /// Count records matching key=value filters
    Count {
        collection: String,
        filters: Vec<String>,
    },
    /// Insert a record given as a JSON object
    Create { collection: String, record: String },
    /// Delete a record
    Delete { collection: String, id: String },
}

fn parse_family(s: &str) -> Result<BackendFamily, String> {
    s.parse()
}

/// Parse `key=value` pairs. Values are JSON when they parse as JSON.
fn parse_pairs(pairs: &[String]) -> Result<Record, String> {
    let mut map = Record::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got '{}'", pair))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.trim().to_string(), value);
    }
    Ok(map)
}

/// Resolve a connection by id or name.
fn resolve(hub: &DbHub, key: &str) -> Result<String, Box<dyn std::error::Error>> {
    let connections = hub.registry().list()?;
    connections
        .iter()
        .find(|c| c.id == key)
        .or_else(|| connections.iter().find(|c| c.name == key))
        .map(|c| c.id.clone())
        .ok_or_else(|| format!("no connection with id or name '{}'", key).into())
}

/// Execute a command against the hub.
pub async fn execute(hub: &DbHub, command: Command, formatter: &dyn Formatter) -> CommandResult {
    match command {
        Command::Connections(cmd) => connections(hub, cmd, formatter).await,
        Command::Schema(SchemaCommand::Compare { connection }) => {
            let id = resolve(hub, &connection)?;
            Ok(formatter.format_comparison(&hub.compare(&id).await?))
        }
        Command::Migrate(cmd) => migrate(hub, cmd, formatter).await,
        Command::Backup(cmd) => backup(hub, cmd, formatter).await,
        Command::Transfer(cmd) => transfer(hub, cmd, formatter).await,
        Command::Data(cmd) => data(hub, cmd, formatter).await,
    }
}

async fn connections(hub: &DbHub, cmd: ConnectionCommand, formatter: &dyn Formatter) -> CommandResult {
    let registry = hub.registry();
    match cmd {
        ConnectionCommand::List => Ok(formatter.format_connections(&registry.list()?)),
        ConnectionCommand::Add {
            name,
            family,
            settings,
        } => {
            let config: ConnectionConfig = parse_pairs(&settings)?.into_iter().collect();
            let connection = registry.register(name, family, config)?;
            Ok(formatter.format_message(&format!("Registered connection {}", connection.id)))
        }
        ConnectionCommand::Test { connection } => {
            let id = resolve(hub, &connection)?;
            let test = registry.test_connection(&id).await?;
            let detail = test.message.unwrap_or_default();
            if test.success {
                Ok(formatter.format_message(&format!("OK: {}", detail)))
            } else {
                Err(format!("connection test failed: {}", detail).into())
            }
        }
        ConnectionCommand::Activate { connection } => {
            let id = resolve(hub, &connection)?;
            let report = registry.activate(&id).await?;
            let mut message = format!("Activated {} ({:?})", id, report.status);
            if !report.created_tables.is_empty() {
                message.push_str(&format!(
                    ", created {} table(s), seeded {}, migrated {}",
                    report.created_tables.len(),
                    report.seeded_records,
                    report.migrated_records
                ));
            }
            if report.migration_required {
                message.push_str(", migration required");
            }
            Ok(formatter.format_message(&message))
        }
        ConnectionCommand::Remove { connection } => {
            let id = resolve(hub, &connection)?;
            registry.delete(&id).await?;
            Ok(formatter.format_message(&format!("Removed connection {}", id)))
        }
    }
}

async fn migrate(hub: &DbHub, cmd: MigrateCommand, formatter: &dyn Formatter) -> CommandResult {
    match cmd {
        MigrateCommand::Plan { connection } => {
            let id = resolve(hub, &connection)?;
            Ok(formatter.format_plan(&hub.plan_migration(&id).await?))
        }
        MigrateCommand::Run {
            connection,
            dry_run,
            backup,
            continue_on_error,
        } => {
            let id = resolve(hub, &connection)?;
            let mut plan = hub.plan_migration(&id).await?;
            if plan.is_empty() {
                return Ok(formatter.format_message("Nothing to migrate"));
            }
            let options = ExecuteOptions {
                create_backup: backup,
                dry_run,
                continue_on_error,
            };
            let result = hub.migrations().execute(&mut plan, &id, options).await?;
            Ok(formatter.format_migration_result(&result))
        }
        MigrateCommand::History => {
            let lines: Vec<String> = hub
                .migrations()
                .history()?
                .iter()
                .map(|r| {
                    format!(
                        "{} {} {} -> {} {} ({} executed, {} failed)",
                        r.started_at.format("%Y-%m-%d %H:%M:%S"),
                        r.connection_id,
                        r.from_version,
                        r.to_version,
                        r.status,
                        r.executed_steps.len(),
                        r.failed_steps.len()
                    )
                })
                .collect();
            Ok(formatter.format_message(&lines.join("\n")))
        }
    }
}

async fn backup(hub: &DbHub, cmd: BackupCommand, formatter: &dyn Formatter) -> CommandResult {
    let backups = hub.backups();
    match cmd {
        BackupCommand::Create {
            connection,
            name,
            compress,
            tables,
        } => {
            let id = resolve(hub, &connection)?;
            let mut options = BackupOptions::default();
            if let Some(name) = name {
                options = options.named(name);
            }
            if compress {
                options = options.compressed();
            }
            if !tables.is_empty() {
                options = options.with_selection(TableSelection {
                    include: Some(tables),
                    exclude: Vec::new(),
                });
            }
            let artifact = backups.create_backup(&id, options).await?;
            Ok(formatter.format_backups(&[artifact]))
        }
        BackupCommand::Restore {
            backup,
            target,
            overwrite,
        } => {
            let target = resolve(hub, &target)?;
            let options = RestoreOptions {
                overwrite_existing: overwrite,
                ..Default::default()
            };
            let summary = backups.restore_backup(&backup, &target, &options).await?;
            Ok(formatter.format_message(&format!(
                "Restored {} table(s): {} inserted, {} skipped",
                summary.tables.len(),
                summary.inserted,
                summary.skipped
            )))
        }
        BackupCommand::List => Ok(formatter.format_backups(&backups.list_backups()?)),
        BackupCommand::Verify { backup } => {
            let artifact = backups.verify_backup(&backup).await?;
            Ok(formatter.format_message(&format!("Backup {} is intact ({})", artifact.id, artifact.checksum)))
        }
        BackupCommand::Delete { backup } => {
            backups.delete_backup(&backup).await?;
            Ok(formatter.format_message(&format!("Deleted backup {}", backup)))
        }
    }
}

fn report_progress(job: &TransferJob) {
    if job.progress.phase == TransferPhase::Transferring {
        if let Some(table) = &job.progress.current_table {
            tracing::info!(
                table = %table,
                transferred = job.progress.transferred_records,
                total = job.progress.total_records,
                "Transfer progress"
            );
        }
    }
}

async fn transfer(hub: &DbHub, cmd: TransferCommand, formatter: &dyn Formatter) -> CommandResult {
    let engine = hub.transfers();
    match cmd {
        TransferCommand::Run(args) => {
            let source = resolve(hub, &args.source)?;
            let target = resolve(hub, &args.target)?;
            let mappings = args
                .tables
                .iter()
                .map(|t| match t.split_once(':') {
                    Some((from, to)) => TableMapping::new(from, to),
                    None => TableMapping::identity(t.as_str()),
                })
                .collect();
            let options = TransferOptions {
                batch_size: args.batch_size,
                skip_if_exists: args.skip_existing,
                truncate_target: args.truncate,
                backup_target: args.backup_target,
                validate_data: args.validate,
            };
            let name = format!("{} -> {}", args.source, args.target);
            let job = engine.create_job(name, &source, &target, mappings, options)?;
            let job = engine.execute(&job.id, &report_progress).await?;
            Ok(formatter.format_job(&job))
        }
        TransferCommand::List => {
            let lines: Vec<String> = engine
                .list_jobs()?
                .iter()
                .map(|j| {
                    format!(
                        "{} {} [{}] {}/{} records",
                        j.id, j.name, j.status, j.progress.transferred_records, j.progress.total_records
                    )
                })
                .collect();
            Ok(formatter.format_message(&lines.join("\n")))
        }
        TransferCommand::Resume { job } => {
            let job = engine.resume(&job, &report_progress).await?;
            Ok(formatter.format_job(&job))
        }
        TransferCommand::Cancel { job } => {
            let job = engine.cancel(&job)?;
            Ok(formatter.format_job(&job))
        }
    }
}

async fn data(hub: &DbHub, cmd: DataCommand, formatter: &dyn Formatter) -> CommandResult {
    let facade = hub.data();
    match cmd {
        DataCommand::Read { collection, id } => {
            let value = facade.read(&collection, id.as_deref()).await?;
            let records: Vec<Record> = match value {
                Value::Object(mut wrapped) if id.is_none() => match wrapped.remove(&collection) {
                    Some(Value::Array(rows)) => rows
                        .into_iter()
                        .filter_map(|r| match r {
                            Value::Object(map) => Some(map),
                            _ => None,
                        })
                        .collect(),
                    _ => Vec::new(),
                },
                Value::Object(record) => vec![record],
                _ => Vec::new(),
            };
            Ok(formatter.format_records(&records))
        }
        DataCommand::Query { collection, filters } => {
            let records = facade.query(&collection, &parse_pairs(&filters)?).await?;
            Ok(formatter.format_records(&records))
        }
        DataCommand::Count { collection, filters } => {
            let count = facade.count(&collection, &parse_pairs(&filters)?).await?;
            Ok(formatter.format_message(&count.to_string()))
        }
        DataCommand::Create { collection, record } => {
            let record: Record = serde_json::from_str(&record)?;
            let created = facade.create(&collection, record).await?;
            Ok(formatter.format_records(&[created]))
        }
        DataCommand::Delete { collection, id } => {
            let existed = facade.delete(&collection, &id).await?;
            let message = if existed { "Deleted" } else { "Not found" };
            Ok(formatter.format_message(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_pairs() {
        let pairs = vec![
            "path=/tmp/data.json".to_string(),
            "temporary=true".to_string(),
            "_limit=10".to_string(),
        ];
        let map = parse_pairs(&pairs).unwrap();
        assert_eq!(map["path"], json!("/tmp/data.json"));
        assert_eq!(map["temporary"], json!(true));
        assert_eq!(map["_limit"], json!(10));

        assert!(parse_pairs(&["novalue".to_string()]).is_err());
    }

    #[test]
    fn test_parse_family() {
        assert_eq!(parse_family("flat-file").unwrap(), BackendFamily::FlatFile);
        assert!(parse_family("mainframe").is_err());
    }
}
