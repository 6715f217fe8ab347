//! Schema comparison and migrations.
//!
//! - [`SchemaComparator`] diffs a live structure against the canonical one.
//! - [`MigrationPlanner`] turns the diff into ordered, risk-scored migrations.
//! - [`MigrationExecutor`] runs a plan with optional backup-first safety.
//!
//! # Risk levels
//!
//! | Level | Cause | Backup | Reversible |
//! |-------|-------|--------|------------|
//! | **low** | Additive changes only | no | yes |
//! | **medium** | Extra columns left in place | yes | yes |
//! | **high** | Type changes, major version data migration | yes | yes |
//! | **critical** | Primary key type changes | yes | no |
//!
//! Extra tables and columns are reported, never dropped.

pub mod compare;
pub mod executor;
pub mod history;
pub mod plan;
pub mod risk;

pub use compare::{ColumnDifference, SchemaComparator, SchemaComparison, TypeMismatch};
pub use executor::{ExecuteOptions, MigrationExecutor, MigrationResult};
pub use history::{MigrationRecord, MigrationStatus};
pub use plan::{
    Migration, MigrationPlan, MigrationPlanner, MigrationStep, StepKind, StepPayload,
};
pub use risk::{RiskAssessment, RiskLevel};
