//! Per-record processing of a batch.
//!
//! For each source record, in order:
//!
//! 1. filter: rejected records are dropped silently
//! 2. field mapping: fields are renamed, unmapped fields dropped
//! 3. transform: an error marks the record as failed (severity `error`)
//! 4. validation: a reason excludes the record (severity `warning`)

use super::job::{Severity, TableMapping, TransferIssue};
use crate::driver::{Record, ID_FIELD};
use serde_json::Value;

/// Result of processing one batch.
#[derive(Debug, Default)]
pub struct ProcessedBatch {
    /// Records ready for insertion.
    pub records: Vec<Record>,
    /// Records dropped by the filter.
    pub filtered: u64,
    /// Records rejected by validation.
    pub rejected: u64,
    /// Records whose transform failed.
    pub failed: u64,
    /// Issues raised.
    pub issues: Vec<TransferIssue>,
}

/// Apply `mapping` to a batch of source records.
pub fn process_batch(mapping: &TableMapping, batch: Vec<Record>) -> ProcessedBatch {
    let mut out = ProcessedBatch::default();
    let table = Some(mapping.source_table.as_str());

    for source in batch {
        if let Some(filter) = &mapping.filter {
            if !filter(&source) {
                out.filtered += 1;
                continue;
            }
        }

        let id = record_id(&source);
        let mut record = map_fields(mapping, source);

        if let Some(transform) = &mapping.transform {
            record = match transform(record) {
                Ok(record) => record,
                Err(reason) => {
                    out.failed += 1;
                    out.issues.push(
                        TransferIssue::new(Severity::Error, table, format!("transform failed: {}", reason))
                            .for_record(id),
                    );
                    continue;
                }
            };
        }

        if let Some(validate) = &mapping.validate {
            if let Some(reason) = validate(&record) {
                out.rejected += 1;
                out.issues.push(
                    TransferIssue::new(Severity::Warning, table, format!("validation failed: {}", reason))
                        .for_record(id),
                );
                continue;
            }
        }

        out.records.push(record);
    }

    out
}

/// Rename fields per the mapping. An empty mapping keeps the record as is.
pub fn map_fields(mapping: &TableMapping, source: Record) -> Record {
    if mapping.field_map.is_empty() {
        return source;
    }
    source
        .into_iter()
        .filter_map(|(field, value)| {
            mapping
                .field_map
                .get(&field)
                .map(|target| (target.clone(), value))
        })
        .collect()
}

/// Id of a record as a string.
pub fn record_id(record: &Record) -> Option<String> {
    match record.get(ID_FIELD)? {
        Value::String(id) => Some(id.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn batch() -> Vec<Record> {
        vec![
            rec(json!({"id": "1", "email": "a@example.com", "vip": true, "notes": "x"})),
            rec(json!({"id": "2", "email": "", "vip": true})),
            rec(json!({"id": "3", "email": "c@example.com", "vip": false})),
        ]
    }

    #[test]
    fn test_identity_passes_everything() {
        let out = process_batch(&TableMapping::identity("customers"), batch());
        assert_eq!(out.records.len(), 3);
        assert_eq!(out.records[0]["notes"], json!("x"));
        assert!(out.issues.is_empty());
    }

    #[test]
    fn test_filter_drops_silently() {
        let mapping = TableMapping::identity("customers")
            .with_filter(|r| r.get("vip") == Some(&json!(true)));
        let out = process_batch(&mapping, batch());
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.filtered, 1);
        assert!(out.issues.is_empty());
    }

    #[test]
    fn test_mapping_renames_and_drops() {
        let mapping = TableMapping::new("customers", "clients")
            .map_field("id", "id")
            .map_field("email", "mail");
        let out = process_batch(&mapping, batch());
        assert_eq!(out.records[0], rec(json!({"id": "1", "mail": "a@example.com"})));
    }

    #[test]
    fn test_validation_rejects_with_warning() {
        let mapping = TableMapping::identity("customers").with_validation(|r| {
            match r.get("email").and_then(Value::as_str) {
                Some(e) if !e.is_empty() => None,
                _ => Some("email is required".to_string()),
            }
        });
        let out = process_batch(&mapping, batch());
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.rejected, 1);
        assert_eq!(out.issues[0].severity, Severity::Warning);
        assert_eq!(out.issues[0].record_id.as_deref(), Some("2"));
    }

    #[test]
    fn test_transform_failure_is_an_error() {
        let mapping = TableMapping::identity("customers").with_transform(|mut r| {
            if r.get("vip") == Some(&json!(false)) {
                return Err("non-vip".into());
            }
            r.insert("tier".into(), json!("gold"));
            Ok(r)
        });
        let out = process_batch(&mapping, batch());
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0]["tier"], json!("gold"));
        assert_eq!(out.failed, 1);
        assert_eq!(out.issues[0].severity, Severity::Error);
    }
}
