//! Post-transfer validation.
//!
//! Unfiltered tables must account for every source record exactly.
//! Filtered tables are checked against an estimate drawn from a random
//! sample of the source. A second sample verifies that identifying fields
//! (names containing `id`, `email`, or `phone`) arrived under their mapped
//! names; a missing one is an integrity failure.

use super::job::{Severity, TableMapping, TableStats, TransferIssue};
use super::process::{map_fields, record_id};
use crate::driver::{BackendDriver, Filters, Record};
use rand::seq::SliceRandom;
use serde_json::Value;

/// Field name fragments marking a critical field.
const CRITICAL_FIELD_MARKERS: [&str; 3] = ["id", "email", "phone"];

/// Sampling parameters.
#[derive(Debug, Clone, Copy)]
pub struct ValidationSettings {
    /// Records sampled to estimate filtered counts.
    pub sample_size: usize,
    /// Records sampled for critical-field checks.
    pub critical_sample_size: usize,
    /// Relative tolerance for estimated counts.
    pub tolerance: f64,
}

/// Whether a field identifies a record or a person.
pub fn is_critical_field(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    CRITICAL_FIELD_MARKERS.iter().any(|m| name.contains(m))
}

/// Validate one copied table. Returns the issues found, or the integrity
/// violation that fails the job.
pub async fn validate_table(
    source: &dyn BackendDriver,
    target: &dyn BackendDriver,
    mapping: &TableMapping,
    stats: &TableStats,
    settings: &ValidationSettings,
) -> Result<Vec<TransferIssue>, TransferIssue> {
    let table = Some(mapping.source_table.as_str());
    let mut issues = Vec::new();

    let source_records = match source.find_all(&mapping.source_table).await {
        Ok(records) => records,
        Err(e) => {
            issues.push(TransferIssue::new(
                Severity::Warning,
                table,
                format!("validation skipped, cannot read source: {}", e),
            ));
            return Ok(issues);
        }
    };
    let target_count = match target.count(&mapping.target_table, &Filters::new()).await {
        Ok(count) => count,
        Err(e) => {
            issues.push(TransferIssue::new(
                Severity::Warning,
                table,
                format!("validation skipped, cannot count target: {}", e),
            ));
            return Ok(issues);
        }
    };

    let source_count = source_records.len() as u64;
    let arrived = target_count.saturating_sub(stats.preexisting_target);
    let excluded = stats.failed + stats.duplicates;

    match &mapping.filter {
        None => {
            let expected = source_count.saturating_sub(excluded);
            if arrived != expected {
                issues.push(TransferIssue::new(
                    Severity::Error,
                    table,
                    format!(
                        "record count mismatch: {} source records, {} excluded, {} arrived in {}",
                        source_count, excluded, arrived, mapping.target_table
                    ),
                ));
            }
        }
        Some(filter) => {
            let sample = draw_sample(&source_records, settings.sample_size);
            if !sample.is_empty() {
                let passing = sample.iter().filter(|r| filter(**r)).count();
                let ratio = passing as f64 / sample.len() as f64;
                let estimated = (ratio * source_count as f64 - excluded as f64).max(0.0);
                let band = settings.tolerance * source_count as f64;
                if (arrived as f64 - estimated).abs() > band {
                    issues.push(TransferIssue::new(
                        Severity::Warning,
                        table,
                        format!(
                            "filtered count outside tolerance: estimated {:.0}, arrived {}",
                            estimated, arrived
                        ),
                    ));
                }
            }
        }
    }

    if !mapping.has_transform() {
        let sample = draw_sample(&source_records, settings.critical_sample_size);
        check_critical_fields(target, mapping, &sample).await?;
    }

    Ok(issues)
}

async fn check_critical_fields(
    target: &dyn BackendDriver,
    mapping: &TableMapping,
    sample: &[&Record],
) -> Result<(), TransferIssue> {
    let table = Some(mapping.source_table.as_str());

    for source in sample {
        if let Some(filter) = &mapping.filter {
            if !filter(*source) {
                continue;
            }
        }
        let mapped = map_fields(mapping, (*source).clone());
        if let Some(validate) = &mapping.validate {
            if validate(&mapped).is_some() {
                continue;
            }
        }
        let Some(id) = record_id(&mapped) else {
            continue;
        };

        let stored = match target.read(&mapping.target_table, Some(&id)).await {
            Ok(value) => value,
            Err(e) => {
                return Err(integrity(table, &id, format!("cannot read target record: {}", e)));
            }
        };
        let Value::Object(stored) = stored else {
            return Err(integrity(
                table,
                &id,
                format!("record missing from {}", mapping.target_table),
            ));
        };

        for (field, value) in source.iter() {
            if value.is_null() || !is_critical_field(field) {
                continue;
            }
            let Some(target_field) = mapping.target_field(field) else {
                continue;
            };
            if stored.get(target_field).map_or(true, Value::is_null) {
                return Err(integrity(
                    table,
                    &id,
                    format!(
                        "critical field {} missing from {}.{}",
                        field, mapping.target_table, target_field
                    ),
                ));
            }
        }
    }

    Ok(())
}

fn integrity(table: Option<&str>, id: &str, message: String) -> TransferIssue {
    TransferIssue::new(Severity::Critical, table, format!("integrity check failed: {}", message))
        .for_record(Some(id.to_string()))
}

fn draw_sample(records: &[Record], size: usize) -> Vec<&Record> {
    records
        .choose_multiple(&mut rand::thread_rng(), size)
        .collect()
}
