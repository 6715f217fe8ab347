//! The canonical structure of the business site's data set.
//!
//! Every schema comparison uses this definition as its right-hand side.

use super::{types, ColumnDef, DeletePolicy, IndexDef, RelationDef, SchemaDefinition, TableDef};
use crate::driver::Record;
use semver::Version;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Current canonical schema version.
pub const CANONICAL_VERSION: Version = Version::new(1, 0, 0);

fn audit_columns(table: TableDef) -> TableDef {
    table
        .with_column(ColumnDef::new("createdAt", types::TIMESTAMP))
        .with_column(ColumnDef::new("updatedAt", types::TIMESTAMP))
}

/// Build the canonical schema definition.
pub fn business_schema() -> SchemaDefinition {
    let users = audit_columns(
        TableDef::new("users")
            .with_column(ColumnDef::new("id", types::STRING).primary_key())
            .with_column(ColumnDef::new("email", types::STRING).required().unique())
            .with_column(ColumnDef::new("name", types::STRING))
            .with_column(ColumnDef::new("phone", types::STRING))
            .with_column(
                ColumnDef::new("role", types::STRING)
                    .required()
                    .with_default(json!("editor")),
            ),
    );

    let customers = audit_columns(
        TableDef::new("customers")
            .with_column(ColumnDef::new("id", types::STRING).primary_key())
            .with_column(ColumnDef::new("name", types::STRING).required())
            .with_column(ColumnDef::new("email", types::STRING).required())
            .with_column(ColumnDef::new("phone", types::STRING))
            .with_column(ColumnDef::new("company", types::STRING))
            .with_column(ColumnDef::new("vip", types::BOOLEAN).with_default(json!(false))),
    );

    let services = audit_columns(
        TableDef::new("services")
            .with_column(ColumnDef::new("id", types::STRING).primary_key())
            .with_column(ColumnDef::new("name", types::STRING).required())
            .with_column(ColumnDef::new("description", types::STRING))
            .with_column(ColumnDef::new("price", types::NUMBER))
            .with_column(ColumnDef::new("active", types::BOOLEAN).with_default(json!(true))),
    );

    let bookings = audit_columns(
        TableDef::new("bookings")
            .with_column(ColumnDef::new("id", types::STRING).primary_key())
            .with_column(ColumnDef::new("customerId", types::STRING).required())
            .with_column(ColumnDef::new("serviceId", types::STRING).required())
            .with_column(ColumnDef::new("scheduledFor", types::TIMESTAMP).required())
            .with_column(
                ColumnDef::new("status", types::STRING)
                    .required()
                    .with_default(json!("pending")),
            )
            .with_column(ColumnDef::new("notes", types::STRING)),
    );

    let contact_messages = audit_columns(
        TableDef::new("contact_messages")
            .with_column(ColumnDef::new("id", types::STRING).primary_key())
            .with_column(ColumnDef::new("name", types::STRING).required())
            .with_column(ColumnDef::new("email", types::STRING).required())
            .with_column(ColumnDef::new("phone", types::STRING))
            .with_column(ColumnDef::new("message", types::STRING).required())
            .with_column(
                ColumnDef::new("status", types::STRING)
                    .required()
                    .with_default(json!("new")),
            ),
    );

    let settings = audit_columns(
        TableDef::new("settings")
            .with_column(ColumnDef::new("id", types::STRING).primary_key())
            .with_column(ColumnDef::new("value", types::JSON)),
    );

    SchemaDefinition::new(CANONICAL_VERSION)
        .with_table(users)
        .with_table(customers)
        .with_table(services)
        .with_table(bookings)
        .with_table(contact_messages)
        .with_table(settings)
        .with_index(IndexDef::new("users", ["email"]).unique())
        .with_index(IndexDef::new("customers", ["email"]))
        .with_index(IndexDef::new("bookings", ["customerId"]))
        .with_index(IndexDef::new("bookings", ["serviceId", "scheduledFor"]))
        .with_index(IndexDef::new("contact_messages", ["status"]))
        .with_relation(
            RelationDef::new("bookings", "customerId", "customers", "id")
                .with_on_delete(DeletePolicy::Cascade),
        )
        .with_relation(RelationDef::new("bookings", "serviceId", "services", "id"))
}

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

/// Default records written into a freshly provisioned backend.
pub fn seed_data() -> BTreeMap<String, Vec<Record>> {
    let mut seed = BTreeMap::new();
    seed.insert(
        "settings".to_string(),
        vec![
            record(json!({"id": "site_name", "value": "My Business"})),
            record(json!({"id": "contact_email", "value": "hello@example.com"})),
            record(json!({"id": "currency", "value": "EUR"})),
            record(json!({"id": "maintenance_mode", "value": false})),
        ],
    );
    seed.insert(
        "services".to_string(),
        vec![record(json!({
            "id": "consultation",
            "name": "Initial consultation",
            "description": "A first meeting to discuss your project",
            "price": 0,
            "active": true
        }))],
    );
    seed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_schema_is_consistent() {
        let schema = business_schema();
        assert_eq!(schema.version, CANONICAL_VERSION);

        for table in &schema.tables {
            assert!(table.primary_key().is_some(), "{} lacks a key", table.name);
            for column in &table.columns {
                assert!(types::is_known_type(&column.data_type));
            }
        }

        for index in &schema.indexes {
            let table = schema.table(&index.table).expect("indexed table exists");
            for column in &index.columns {
                assert!(table.column(column).is_some());
            }
        }

        for relation in &schema.relations {
            assert!(schema.table(&relation.table).is_some());
            assert!(schema.table(&relation.references_table).is_some());
        }
    }

    #[test]
    fn test_seed_targets_canonical_tables() {
        let schema = business_schema();
        for (table, records) in seed_data() {
            assert!(schema.table(&table).is_some());
            assert!(records.iter().all(|r| r.contains_key("id")));
        }
    }
}
