//! Index and relation definitions.

use serde::{Deserialize, Serialize};

/// Behavior when a referenced record is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Delete referencing records.
    Cascade,
    /// Prevent deletion while referencing records exist.
    #[default]
    Restrict,
    /// Set the referencing column to null.
    SetNull,
}

impl DeletePolicy {
    /// SQL spelling of the policy.
    pub fn as_sql(&self) -> &'static str {
        match self {
            DeletePolicy::Cascade => "CASCADE",
            DeletePolicy::Restrict => "RESTRICT",
            DeletePolicy::SetNull => "SET NULL",
        }
    }
}

/// An index over one or more columns of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Indexed table.
    pub table: String,
    /// Indexed columns.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
}

impl IndexDef {
    /// Create a non-unique index.
    pub fn new<I, S>(table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    /// Mark the index as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Comparison key: table plus the sorted column list.
    pub fn key(&self) -> String {
        composite_key(&self.table, self.columns.iter().map(String::as_str))
    }

    /// Conventional index name.
    pub fn name(&self) -> String {
        format!("idx_{}_{}", self.table, self.columns.join("_"))
    }
}

/// A reference from a column to a column of another table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDef {
    /// Referencing table.
    pub table: String,
    /// Referencing column.
    pub column: String,
    /// Referenced table.
    pub references_table: String,
    /// Referenced column.
    pub references_column: String,
    /// Delete policy.
    #[serde(default)]
    pub on_delete: DeletePolicy,
}

impl RelationDef {
    /// Create a relation with the default `Restrict` policy.
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        references_table: impl Into<String>,
        references_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            references_table: references_table.into(),
            references_column: references_column.into(),
            on_delete: DeletePolicy::Restrict,
        }
    }

    /// Set the delete policy.
    pub fn with_on_delete(mut self, on_delete: DeletePolicy) -> Self {
        self.on_delete = on_delete;
        self
    }

    /// Comparison key: table plus the sorted column list.
    pub fn key(&self) -> String {
        composite_key(&self.table, std::iter::once(self.column.as_str()))
    }

    /// Conventional constraint name.
    pub fn name(&self) -> String {
        format!("fk_{}_{}", self.table, self.column)
    }
}

fn composite_key<'a>(table: &str, columns: impl Iterator<Item = &'a str>) -> String {
    let mut columns: Vec<&str> = columns.collect();
    columns.sort_unstable();
    format!("{}({})", table, columns.join(","))
}
