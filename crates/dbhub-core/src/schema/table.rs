//! Table and column definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A column definition within a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Declared type (see [`crate::schema::types`]).
    pub data_type: String,
    /// Whether a value must be present.
    #[serde(default)]
    pub required: bool,
    /// Whether values must be unique across the table.
    #[serde(default)]
    pub unique: bool,
    /// Default value applied when a record lacks the column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Whether this column identifies records.
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnDef {
    /// Create an optional column.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            required: false,
            unique: false,
            default: None,
            primary_key: false,
        }
    }

    /// Mark the column as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark the column as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Mark the column as the primary key (implies required and unique).
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.required = true;
        self.unique = true;
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// A table (or collection) definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Ordered column definitions.
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    /// Create an empty table definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Add a column.
    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up a column by name (mutable).
    pub fn column_mut(&mut self, name: &str) -> Option<&mut ColumnDef> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// The primary key column, if declared.
    pub fn primary_key(&self) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.primary_key)
    }

    /// Names of all columns in declaration order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}
