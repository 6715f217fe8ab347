//! Output formatters for command results.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use dbhub_core::migration::MigrationResult;
use dbhub_core::{
    BackendConnection, BackupArtifact, MigrationPlan, Record, SchemaComparison, TransferJob,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format records of one collection.
    fn format_records(&self, records: &[Record]) -> String;

    /// Format registered connections.
    fn format_connections(&self, connections: &[BackendConnection]) -> String;

    /// Format backup metadata.
    fn format_backups(&self, backups: &[BackupArtifact]) -> String;

    /// Format a schema comparison.
    fn format_comparison(&self, comparison: &SchemaComparison) -> String;

    /// Format a migration plan.
    fn format_plan(&self, plan: &MigrationPlan) -> String;

    /// Format the outcome of a migration run.
    fn format_migration_result(&self, result: &MigrationResult) -> String;

    /// Format a transfer job.
    fn format_job(&self, job: &TransferJob) -> String;

    /// Format a simple message.
    fn format_message(&self, message: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_records(&self, records: &[Record]) -> String {
        if records.is_empty() {
            return "No results".to_string();
        }

        // Union of fields, id first
        let mut columns: Vec<String> = vec!["id".to_string()];
        let rest: BTreeSet<&String> = records
            .iter()
            .flat_map(|r| r.keys())
            .filter(|k| k.as_str() != "id")
            .collect();
        columns.extend(rest.into_iter().cloned());

        let mut table = Table::new();
        table.set_header(columns.iter().map(Cell::new));
        for record in records {
            table.add_row(
                columns
                    .iter()
                    .map(|c| Cell::new(format_value(record.get(c).unwrap_or(&Value::Null)))),
            );
        }
        format!("{}\n{} row(s)", table, records.len())
    }

    fn format_connections(&self, connections: &[BackendConnection]) -> String {
        let mut table = Table::new();
        table.set_header(vec!["ID", "Name", "Family", "Active", "Connected", "Last connected"]);
        for c in connections {
            table.add_row(vec![
                c.id.clone(),
                c.name.clone(),
                c.family.to_string(),
                yes_no(c.is_active),
                yes_no(c.is_connected),
                c.last_connected_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ]);
        }
        table.to_string()
    }

    fn format_backups(&self, backups: &[BackupArtifact]) -> String {
        let mut table = Table::new();
        table.set_header(vec!["ID", "Name", "Family", "Created", "Tables", "Records", "Size"]);
        for b in backups {
            table.add_row(vec![
                b.id.clone(),
                b.name.clone(),
                b.family.to_string(),
                b.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                b.tables.len().to_string(),
                b.record_count.to_string(),
                format_bytes(b.size_bytes),
            ]);
        }
        table.to_string()
    }

    fn format_comparison(&self, comparison: &SchemaComparison) -> String {
        if comparison.is_in_sync() {
            return "Schema is in sync".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec!["Kind", "Table", "Detail"]);
        for t in &comparison.missing_tables {
            table.add_row(vec!["missing table", t.name.as_str(), ""]);
        }
        for t in &comparison.extra_tables {
            table.add_row(vec!["extra table", t.as_str(), ""]);
        }
        for diff in &comparison.column_differences {
            for c in &diff.missing_columns {
                table.add_row(vec![
                    "missing column".to_string(),
                    diff.table.clone(),
                    format!("{} {}", c.name, c.data_type),
                ]);
            }
            for c in &diff.extra_columns {
                table.add_row(vec!["extra column".to_string(), diff.table.clone(), c.clone()]);
            }
            for m in &diff.type_mismatches {
                table.add_row(vec![
                    "type mismatch".to_string(),
                    diff.table.clone(),
                    format!("{}: {} -> {}", m.column, m.actual, m.expected),
                ]);
            }
        }
        for i in &comparison.missing_indexes {
            table.add_row(vec!["missing index".to_string(), i.table.clone(), i.name()]);
        }
        for r in &comparison.missing_relations {
            table.add_row(vec!["missing relation".to_string(), r.table.clone(), r.name()]);
        }
        table.to_string()
    }

    fn format_plan(&self, plan: &MigrationPlan) -> String {
        if plan.is_empty() {
            return "Nothing to migrate".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec!["Migration", "Step", "Reversible"]);
        for migration in &plan.migrations {
            for step in &migration.steps {
                table.add_row(vec![migration.name.clone(), step.name.clone(), yes_no(step.reversible)]);
            }
        }

        let mut output = format!(
            "{}\n{} -> {}, risk {}, ~{}s{}\n{}",
            plan.description,
            plan.from_version,
            plan.to_version,
            plan.risk_level,
            plan.estimated_duration_secs,
            if plan.backup_required { ", backup required" } else { "" },
            table
        );
        for warning in &plan.warnings {
            output.push_str(&format!("\nWarning: {}", warning));
        }
        output
    }

    fn format_migration_result(&self, result: &MigrationResult) -> String {
        let mut output = String::new();
        if !result.planned_actions.is_empty() {
            output.push_str("Dry run, would execute:\n");
            for action in &result.planned_actions {
                output.push_str(&format!("  {}\n", action));
            }
            return output;
        }

        output.push_str(&format!(
            "{}: {} step(s) executed, {} failed",
            if result.success { "Success" } else { "Failed" },
            result.executed_steps.len(),
            result.failed_steps.len()
        ));
        if let Some(backup) = &result.backup_id {
            output.push_str(&format!("\nBackup: {}", backup));
        }
        for error in &result.errors {
            output.push_str(&format!("\nError: {}", error));
        }
        output
    }

    fn format_job(&self, job: &TransferJob) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Source", "Target", "Read", "Transferred", "Filtered", "Failed", "Done"]);
        for t in &job.progress.tables {
            table.add_row(vec![
                t.source_table.clone(),
                t.target_table.clone(),
                t.read.to_string(),
                t.transferred.to_string(),
                t.filtered.to_string(),
                t.failed.to_string(),
                yes_no(t.completed),
            ]);
        }

        let mut output = format!("Job {} ({}): {}\n{}", job.name, job.id, job.status, table);
        if let Some(rate) = job.progress.throughput {
            output.push_str(&format!("\n{:.1} records/s", rate));
        }
        for issue in &job.progress.issues {
            output.push_str(&format!("\n[{:?}] {}", issue.severity, issue.message));
        }
        if job.progress.issue_count > job.progress.issues.len() as u64 {
            output.push_str(&format!(
                "\n... {} more issue(s)",
                job.progress.issue_count - job.progress.issues.len() as u64
            ));
        }
        output
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl JsonFormatter {
    fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }
}

impl Formatter for JsonFormatter {
    fn format_records(&self, records: &[Record]) -> String {
        Self::pretty(records)
    }

    fn format_connections(&self, connections: &[BackendConnection]) -> String {
        Self::pretty(connections)
    }

    fn format_backups(&self, backups: &[BackupArtifact]) -> String {
        Self::pretty(backups)
    }

    fn format_comparison(&self, comparison: &SchemaComparison) -> String {
        Self::pretty(comparison)
    }

    fn format_plan(&self, plan: &MigrationPlan) -> String {
        Self::pretty(plan)
    }

    fn format_migration_result(&self, result: &MigrationResult) -> String {
        Self::pretty(result)
    }

    fn format_job(&self, job: &TransferJob) -> String {
        Self::pretty(job)
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({ "message": message }).to_string()
    }
}

/// Format a JSON value as a table cell.
fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn yes_no(flag: bool) -> String {
    let text = if flag { "yes" } else { "no" };
    text.to_string()
}

/// Human readable byte count.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_table_records_put_id_first() {
        let records = vec![
            record(json!({"name": "Ada", "id": "c1"})),
            record(json!({"id": "c2", "email": "alan@example.com"})),
        ];
        let output = TableFormatter.format_records(&records);
        let header = output.lines().nth(1).unwrap();
        let id = header.find("id").unwrap();
        assert!(id < header.find("email").unwrap());
        assert!(header.find("email").unwrap() < header.find("name").unwrap());
        assert!(output.ends_with("2 row(s)"));
        assert!(output.contains("NULL"));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_json_message() {
        let output = JsonFormatter.format_message("done");
        assert_eq!(output, r#"{"message":"done"}"#);
    }
}
