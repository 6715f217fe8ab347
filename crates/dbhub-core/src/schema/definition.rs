//! Schema definition - versioned description of a backend's structure.

use super::{IndexDef, RelationDef, TableDef};
use semver::Version;
use serde::{Deserialize, Serialize};

/// A versioned description of tables, indexes, and relations.
///
/// Used both for the canonical expected structure and for the live structure
/// introspected from a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// Schema version.
    pub version: Version,
    /// Table definitions.
    pub tables: Vec<TableDef>,
    /// Index definitions.
    pub indexes: Vec<IndexDef>,
    /// Relation definitions.
    pub relations: Vec<RelationDef>,
}

impl SchemaDefinition {
    /// Create an empty schema definition.
    pub fn new(version: Version) -> Self {
        Self {
            version,
            tables: Vec::new(),
            indexes: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Add a table.
    pub fn with_table(mut self, table: TableDef) -> Self {
        self.tables.push(table);
        self
    }

    /// Add an index.
    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// Add a relation.
    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Names of all tables.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Indexes declared on a table.
    pub fn indexes_for(&self, table: &str) -> Vec<&IndexDef> {
        self.indexes.iter().filter(|i| i.table == table).collect()
    }

    /// Relations originating from a table.
    pub fn relations_from(&self, table: &str) -> Vec<&RelationDef> {
        self.relations.iter().filter(|r| r.table == table).collect()
    }

    /// Whether the definition contains no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl Default for SchemaDefinition {
    fn default() -> Self {
        Self::new(Version::new(0, 0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{types, ColumnDef};

    fn sample_schema() -> SchemaDefinition {
        SchemaDefinition::new(Version::new(1, 0, 0))
            .with_table(
                TableDef::new("customers")
                    .with_column(ColumnDef::new("id", types::STRING).primary_key()),
            )
            .with_table(
                TableDef::new("bookings")
                    .with_column(ColumnDef::new("id", types::STRING).primary_key())
                    .with_column(ColumnDef::new("customerId", types::STRING)),
            )
            .with_index(IndexDef::new("bookings", ["customerId"]))
            .with_relation(RelationDef::new("bookings", "customerId", "customers", "id"))
    }

    #[test]
    fn test_lookup() {
        let schema = sample_schema();
        assert!(schema.table("customers").is_some());
        assert!(schema.table("orders").is_none());
        assert_eq!(schema.table_names(), vec!["customers", "bookings"]);
        assert_eq!(schema.indexes_for("bookings").len(), 1);
        assert_eq!(schema.relations_from("bookings").len(), 1);
        assert!(schema.relations_from("customers").is_empty());
    }

    #[test]
    fn test_json_roundtrip_keeps_version() {
        let schema = sample_schema();
        let json = serde_json::to_string(&schema).unwrap();
        let decoded: SchemaDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, schema);
        assert!(json.contains("\"version\":\"1.0.0\""));
    }
}
