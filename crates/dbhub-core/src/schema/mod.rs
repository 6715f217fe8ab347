//! Structural descriptions of backend data sets.
//!
//! A [`SchemaDefinition`] describes tables, indexes, and relations. The
//! canonical definition lives in [`canonical`]; live definitions are produced
//! by driver introspection.

pub mod canonical;
mod definition;
mod relation;
mod table;
pub mod types;

pub use definition::SchemaDefinition;
pub use relation::{DeletePolicy, IndexDef, RelationDef};
pub use table::{ColumnDef, TableDef};
