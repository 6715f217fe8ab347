//! Structural comparison of a live backend against the canonical schema.
//!
//! Tables, columns, indexes, and relations are compared as name sets;
//! indexes and relations use a composite `table(sorted columns)` key.
//! Declared type strings are compared verbatim. Tables whose name starts
//! with `_` belong to the backend's own bookkeeping and are ignored.

use crate::schema::{ColumnDef, IndexDef, RelationDef, SchemaDefinition, TableDef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A column whose declared type differs from the canonical one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMismatch {
    /// Column name.
    pub column: String,
    /// Canonical type.
    pub expected: String,
    /// Live type.
    pub actual: String,
    /// Whether the column identifies records.
    pub primary_key: bool,
}

/// Column-level differences of a table present on both sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDifference {
    /// Table name.
    pub table: String,
    /// Canonical columns absent from the live table.
    pub missing_columns: Vec<ColumnDef>,
    /// Live columns absent from the canonical table.
    pub extra_columns: Vec<String>,
    /// Columns present on both sides with different types.
    pub type_mismatches: Vec<TypeMismatch>,
    /// Live declarations of the mismatched columns, by name.
    #[serde(default)]
    pub live_columns: BTreeMap<String, ColumnDef>,
}

impl ColumnDifference {
    fn is_empty(&self) -> bool {
        self.missing_columns.is_empty()
            && self.extra_columns.is_empty()
            && self.type_mismatches.is_empty()
    }
}

/// Result of comparing a live structure to the canonical one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaComparison {
    /// Canonical tables absent from the backend.
    pub missing_tables: Vec<TableDef>,
    /// Live tables absent from the canonical schema.
    pub extra_tables: Vec<String>,
    /// Per-table column differences.
    pub column_differences: Vec<ColumnDifference>,
    /// Canonical indexes absent from the backend.
    pub missing_indexes: Vec<IndexDef>,
    /// Live indexes absent from the canonical schema.
    pub extra_indexes: Vec<IndexDef>,
    /// Canonical relations absent from the backend.
    pub missing_relations: Vec<RelationDef>,
    /// Live relations absent from the canonical schema.
    pub extra_relations: Vec<RelationDef>,
}

impl SchemaComparison {
    /// Check whether both structures agree.
    pub fn is_in_sync(&self) -> bool {
        self.missing_tables.is_empty()
            && self.extra_tables.is_empty()
            && self.column_differences.is_empty()
            && self.missing_indexes.is_empty()
            && self.extra_indexes.is_empty()
            && self.missing_relations.is_empty()
            && self.extra_relations.is_empty()
    }

    /// Check whether anything canonical is absent from the backend.
    pub fn has_missing_structure(&self) -> bool {
        !self.missing_tables.is_empty()
            || self.missing_column_count() > 0
            || !self.missing_indexes.is_empty()
            || !self.missing_relations.is_empty()
    }

    /// Check whether any column type differs.
    pub fn has_type_mismatches(&self) -> bool {
        self.column_differences
            .iter()
            .any(|d| !d.type_mismatches.is_empty())
    }

    /// Check whether any live table carries columns the canonical one lacks.
    pub fn has_extra_columns(&self) -> bool {
        self.column_differences
            .iter()
            .any(|d| !d.extra_columns.is_empty())
    }

    /// Number of canonical columns missing from existing tables.
    pub fn missing_column_count(&self) -> usize {
        self.column_differences
            .iter()
            .map(|d| d.missing_columns.len())
            .sum()
    }

    /// Number of type mismatches.
    pub fn type_mismatch_count(&self) -> usize {
        self.column_differences
            .iter()
            .map(|d| d.type_mismatches.len())
            .sum()
    }
}

/// Computes [`SchemaComparison`]s.
pub struct SchemaComparator;

impl SchemaComparator {
    /// Compare a live structure to the canonical one.
    pub fn compare(live: &SchemaDefinition, canonical: &SchemaDefinition) -> SchemaComparison {
        let live_tables = tables_by_name(live);
        let canonical_tables = tables_by_name(canonical);

        let live_names: BTreeSet<&str> = live_tables.keys().copied().collect();
        let canonical_names: BTreeSet<&str> = canonical_tables.keys().copied().collect();

        let missing_tables = canonical_names
            .difference(&live_names)
            .map(|name| canonical_tables[name].clone())
            .collect();

        let extra_tables = live_names
            .difference(&canonical_names)
            .map(|name| name.to_string())
            .collect();

        let column_differences = live_names
            .intersection(&canonical_names)
            .map(|name| Self::compare_columns(live_tables[name], canonical_tables[name]))
            .filter(|d| !d.is_empty())
            .collect();

        let (missing_indexes, extra_indexes) = keyed_difference(
            live.indexes.iter().filter(|i| !is_reserved(&i.table)),
            canonical.indexes.iter().filter(|i| !is_reserved(&i.table)),
            IndexDef::key,
        );
        let (missing_relations, extra_relations) = keyed_difference(
            live.relations.iter().filter(|r| !is_reserved(&r.table)),
            canonical.relations.iter().filter(|r| !is_reserved(&r.table)),
            RelationDef::key,
        );

        SchemaComparison {
            missing_tables,
            extra_tables,
            column_differences,
            missing_indexes,
            extra_indexes,
            missing_relations,
            extra_relations,
        }
    }

    fn compare_columns(live: &TableDef, canonical: &TableDef) -> ColumnDifference {
        let live_columns: BTreeMap<&str, &ColumnDef> =
            live.columns.iter().map(|c| (c.name.as_str(), c)).collect();
        let canonical_columns: BTreeMap<&str, &ColumnDef> =
            canonical.columns.iter().map(|c| (c.name.as_str(), c)).collect();

        let missing_columns = canonical
            .columns
            .iter()
            .filter(|c| !live_columns.contains_key(c.name.as_str()))
            .cloned()
            .collect();

        let extra_columns = live_columns
            .keys()
            .filter(|name| !canonical_columns.contains_key(*name))
            .map(|name| name.to_string())
            .collect();

        let mut type_mismatches = Vec::new();
        let mut mismatched_live = BTreeMap::new();
        for (name, expected) in &canonical_columns {
            let Some(actual) = live_columns.get(name) else {
                continue;
            };
            if actual.data_type != expected.data_type {
                type_mismatches.push(TypeMismatch {
                    column: name.to_string(),
                    expected: expected.data_type.clone(),
                    actual: actual.data_type.clone(),
                    primary_key: expected.primary_key || actual.primary_key,
                });
                mismatched_live.insert(name.to_string(), (*actual).clone());
            }
        }

        ColumnDifference {
            table: canonical.name.clone(),
            missing_columns,
            extra_columns,
            type_mismatches,
            live_columns: mismatched_live,
        }
    }
}

fn is_reserved(table: &str) -> bool {
    table.starts_with('_')
}

fn tables_by_name(schema: &SchemaDefinition) -> BTreeMap<&str, &TableDef> {
    schema
        .tables
        .iter()
        .filter(|t| !is_reserved(&t.name))
        .map(|t| (t.name.as_str(), t))
        .collect()
}

/// Set difference by key in both directions: (only in canonical, only in live).
fn keyed_difference<'a, T: Clone + 'a>(
    live: impl Iterator<Item = &'a T>,
    canonical: impl Iterator<Item = &'a T>,
    key: impl Fn(&T) -> String,
) -> (Vec<T>, Vec<T>) {
    let live: BTreeMap<String, &T> = live.map(|item| (key(item), item)).collect();
    let canonical: BTreeMap<String, &T> = canonical.map(|item| (key(item), item)).collect();

    let missing = canonical
        .iter()
        .filter(|(k, _)| !live.contains_key(*k))
        .map(|(_, item)| (*item).clone())
        .collect();
    let extra = live
        .iter()
        .filter(|(k, _)| !canonical.contains_key(*k))
        .map(|(_, item)| (*item).clone())
        .collect();
    (missing, extra)
}
