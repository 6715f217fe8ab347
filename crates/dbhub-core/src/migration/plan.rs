//! Migration plan generation.
//!
//! Turns a [`SchemaComparison`] into ordered [`Migration`]s:
//!
//! 1. create missing tables
//! 2. add missing columns and convert mismatched column types
//! 3. create missing indexes
//! 4. create missing relations
//! 5. migrate data when the major version changes
//!
//! Extra tables and columns are reported as warnings and never dropped.

use super::compare::SchemaComparison;
use super::risk::{RiskAssessment, RiskLevel};
use crate::driver::{AlterColumn, Record};
use crate::schema::{ColumnDef, IndexDef, RelationDef, SchemaDefinition, TableDef};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Estimated seconds per table creation.
const CREATE_TABLE_SECS: u64 = 5;
/// Estimated seconds per column, index, or relation change.
const ALTER_SECS: u64 = 2;
/// Estimated seconds per data migration step.
const DATA_MIGRATION_SECS: u64 = 30;

/// Category of a migration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    /// Creates or drops a table.
    CreateTable,
    /// Changes columns, indexes, or relations of a table.
    AlterTable,
    /// Inserts records.
    InsertData,
    /// Rewrites existing records.
    UpdateData,
    /// Runs a backend-native statement.
    Custom,
}

/// What a step does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepPayload {
    /// Create a table.
    CreateTable {
        /// Table definition.
        table: TableDef,
    },
    /// Drop a table.
    DropTable {
        /// Table name.
        table: String,
    },
    /// Change a column.
    AlterColumn {
        /// The change.
        change: AlterColumn,
    },
    /// Create an index.
    CreateIndex {
        /// Index definition.
        index: IndexDef,
    },
    /// Create a relation.
    CreateRelation {
        /// Relation definition.
        relation: RelationDef,
    },
    /// Insert records, skipping existing ids.
    InsertRecords {
        /// Records to insert.
        records: Vec<Record>,
    },
    /// Set a column on every record lacking a value.
    Backfill {
        /// Column name.
        column: String,
        /// Value written.
        value: Value,
    },
    /// Run a native statement.
    Statement {
        /// Statement text.
        sql: String,
    },
}

/// Atomic unit of change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationStep {
    /// Stable identifier.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Category.
    pub kind: StepKind,
    /// Target table.
    pub table: String,
    /// What the step does.
    pub payload: StepPayload,
    /// Whether an inverse step exists.
    pub reversible: bool,
    /// Steps that must run first.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl MigrationStep {
    fn new(id: String, name: String, kind: StepKind, table: &str, payload: StepPayload) -> Self {
        Self {
            id,
            name,
            kind,
            table: table.to_string(),
            payload,
            reversible: false,
            depends_on: Vec::new(),
        }
    }

    fn reversible(mut self) -> Self {
        self.reversible = true;
        self
    }

    fn depends_on(mut self, ids: Vec<String>) -> Self {
        self.depends_on = ids;
        self
    }

    /// Step creating a table.
    pub fn create_table(table: &TableDef) -> Self {
        Self::new(
            format!("create_table:{}", table.name),
            format!("create table {}", table.name),
            StepKind::CreateTable,
            &table.name,
            StepPayload::CreateTable {
                table: table.clone(),
            },
        )
        .reversible()
    }

    /// Step dropping a table.
    pub fn drop_table(table: &str) -> Self {
        Self::new(
            format!("drop_table:{}", table),
            format!("drop table {}", table),
            StepKind::CreateTable,
            table,
            StepPayload::DropTable {
                table: table.to_string(),
            },
        )
    }

    /// Step adding a column.
    pub fn add_column(table: &str, column: &ColumnDef) -> Self {
        Self::new(
            format!("add_column:{}.{}", table, column.name),
            format!("add column {}.{}", table, column.name),
            StepKind::AlterTable,
            table,
            StepPayload::AlterColumn {
                change: AlterColumn::Add(column.clone()),
            },
        )
        .reversible()
    }

    /// Step dropping a column.
    pub fn drop_column(table: &str, column: &str) -> Self {
        Self::new(
            format!("drop_column:{}.{}", table, column),
            format!("drop column {}.{}", table, column),
            StepKind::AlterTable,
            table,
            StepPayload::AlterColumn {
                change: AlterColumn::Drop {
                    name: column.to_string(),
                },
            },
        )
    }

    /// Step changing a column's declaration.
    pub fn modify_column(table: &str, column: &ColumnDef, from_type: &str) -> Self {
        Self::new(
            format!("modify_column:{}.{}:{}", table, column.name, column.data_type),
            format!(
                "modify column {}.{} ({} -> {})",
                table, column.name, from_type, column.data_type
            ),
            StepKind::AlterTable,
            table,
            StepPayload::AlterColumn {
                change: AlterColumn::Modify(column.clone()),
            },
        )
        .reversible()
    }

    /// Step creating an index.
    pub fn create_index(index: &IndexDef) -> Self {
        Self::new(
            format!("create_index:{}", index.key()),
            format!("create index {}", index.name()),
            StepKind::AlterTable,
            &index.table,
            StepPayload::CreateIndex {
                index: index.clone(),
            },
        )
    }

    /// Step creating a relation.
    pub fn create_relation(relation: &RelationDef) -> Self {
        Self::new(
            format!("create_relation:{}", relation.key()),
            format!(
                "create relation {}.{} -> {}.{}",
                relation.table, relation.column, relation.references_table, relation.references_column
            ),
            StepKind::AlterTable,
            &relation.table,
            StepPayload::CreateRelation {
                relation: relation.clone(),
            },
        )
    }

    /// Step inserting records.
    pub fn insert_records(table: &str, records: Vec<Record>) -> Self {
        Self::new(
            format!("insert:{}", table),
            format!("insert {} records into {}", records.len(), table),
            StepKind::InsertData,
            table,
            StepPayload::InsertRecords { records },
        )
    }

    /// Step filling a column's default into records that lack it.
    pub fn backfill(table: &str, column: &str, value: Value) -> Self {
        Self::new(
            format!("backfill:{}.{}", table, column),
            format!("backfill {}.{} with {}", table, column, value),
            StepKind::UpdateData,
            table,
            StepPayload::Backfill {
                column: column.to_string(),
                value,
            },
        )
    }

    /// Step running a native statement.
    pub fn statement(name: impl Into<String>, table: &str, sql: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            format!("custom:{}", name),
            name,
            StepKind::Custom,
            table,
            StepPayload::Statement { sql: sql.into() },
        )
    }
}

/// Named, versioned, ordered list of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    /// Identifier.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Version this migration belongs to.
    pub version: Version,
    /// Steps in execution order.
    pub steps: Vec<MigrationStep>,
    /// Whether every step ran successfully.
    #[serde(default)]
    pub applied: bool,
    /// Inverse steps in execution order.
    #[serde(default)]
    pub rollback: Vec<MigrationStep>,
}

impl Migration {
    fn new(name: &str, version: &Version, steps: Vec<MigrationStep>, rollback: Vec<MigrationStep>) -> Self {
        Self {
            id: format!("{}@{}", name, version),
            name: name.to_string(),
            version: version.clone(),
            steps,
            applied: false,
            rollback,
        }
    }
}

/// Ordered, risk-scored set of migrations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationPlan {
    /// Identifier.
    pub id: String,
    /// Human readable summary.
    pub description: String,
    /// Version the backend is at.
    pub from_version: Version,
    /// Version the plan brings it to.
    pub to_version: Version,
    /// Migrations in execution order.
    pub migrations: Vec<Migration>,
    /// Rough duration estimate.
    pub estimated_duration_secs: u64,
    /// Overall risk.
    pub risk_level: RiskLevel,
    /// Whether a backup must precede execution.
    pub backup_required: bool,
    /// Whether every change has an inverse.
    pub reversible: bool,
    /// Human readable warnings.
    pub warnings: Vec<String>,
}

impl MigrationPlan {
    /// Total number of steps.
    pub fn step_count(&self) -> usize {
        self.migrations.iter().map(|m| m.steps.len()).sum()
    }

    /// Check whether the plan changes nothing.
    pub fn is_empty(&self) -> bool {
        self.step_count() == 0
    }

    /// Every step in execution order.
    pub fn steps(&self) -> impl Iterator<Item = &MigrationStep> {
        self.migrations.iter().flat_map(|m| m.steps.iter())
    }
}

/// Builds [`MigrationPlan`]s against a canonical schema.
pub struct MigrationPlanner {
    canonical: SchemaDefinition,
}

impl MigrationPlanner {
    /// Create a planner for `canonical`.
    pub fn new(canonical: SchemaDefinition) -> Self {
        Self { canonical }
    }

    /// Plan the changes that bring a backend from `current` to `target`.
    pub fn create_plan(
        &self,
        comparison: &SchemaComparison,
        current: &Version,
        target: &Version,
    ) -> MigrationPlan {
        let mut migrations = Vec::new();
        let mut estimate = 0;

        if !comparison.missing_tables.is_empty() {
            let steps: Vec<_> = comparison
                .missing_tables
                .iter()
                .map(MigrationStep::create_table)
                .collect();
            let rollback = comparison
                .missing_tables
                .iter()
                .rev()
                .map(|t| MigrationStep::drop_table(&t.name))
                .collect();
            estimate += CREATE_TABLE_SECS * steps.len() as u64;
            migrations.push(Migration::new("create_missing_tables", target, steps, rollback));
        }

        let (column_steps, column_rollback) = self.column_steps(comparison);
        if !column_steps.is_empty() {
            estimate += ALTER_SECS * column_steps.len() as u64;
            migrations.push(Migration::new("update_columns", target, column_steps, column_rollback));
        }

        if !comparison.missing_indexes.is_empty() {
            let steps: Vec<_> = comparison
                .missing_indexes
                .iter()
                .map(|i| {
                    MigrationStep::create_index(i).depends_on(Self::table_dependency(comparison, &[&i.table]))
                })
                .collect();
            estimate += ALTER_SECS * steps.len() as u64;
            migrations.push(Migration::new("create_indexes", target, steps, Vec::new()));
        }

        if !comparison.missing_relations.is_empty() {
            let steps: Vec<_> = comparison
                .missing_relations
                .iter()
                .map(|r| {
                    MigrationStep::create_relation(r).depends_on(Self::table_dependency(
                        comparison,
                        &[&r.table, &r.references_table],
                    ))
                })
                .collect();
            estimate += ALTER_SECS * steps.len() as u64;
            migrations.push(Migration::new("create_relations", target, steps, Vec::new()));
        }

        let data_migration = current.major != target.major;
        if data_migration {
            let steps = self.data_migration_steps();
            estimate += DATA_MIGRATION_SECS * steps.len().max(1) as u64;
            migrations.push(Migration::new(
                &format!("migrate_data_v{}", target.major),
                target,
                steps,
                Vec::new(),
            ));
        }

        let RiskAssessment { level, warnings } = RiskAssessment::assess(comparison, data_migration);
        let plan = MigrationPlan {
            id: uuid::Uuid::new_v4().to_string(),
            description: Self::describe(comparison, current, target),
            from_version: current.clone(),
            to_version: target.clone(),
            migrations,
            estimated_duration_secs: estimate,
            risk_level: level,
            backup_required: level > RiskLevel::Low,
            reversible: level < RiskLevel::Critical,
            warnings,
        };

        tracing::info!(
            plan_id = %plan.id,
            from = %plan.from_version,
            to = %plan.to_version,
            steps = plan.step_count(),
            risk = %plan.risk_level,
            "Created migration plan"
        );
        plan
    }

    fn column_steps(&self, comparison: &SchemaComparison) -> (Vec<MigrationStep>, Vec<MigrationStep>) {
        let mut steps = Vec::new();
        let mut rollback = Vec::new();

        for diff in &comparison.column_differences {
            for column in &diff.missing_columns {
                steps.push(MigrationStep::add_column(&diff.table, column));
                rollback.push(MigrationStep::drop_column(&diff.table, &column.name));
            }
            for mismatch in &diff.type_mismatches {
                let canonical = self
                    .canonical
                    .table(&diff.table)
                    .and_then(|t| t.column(&mismatch.column))
                    .cloned()
                    .unwrap_or_else(|| ColumnDef::new(&mismatch.column, &mismatch.expected));
                let target = ColumnDef {
                    data_type: mismatch.expected.clone(),
                    primary_key: mismatch.primary_key,
                    ..canonical
                };
                steps.push(MigrationStep::modify_column(&diff.table, &target, &mismatch.actual));

                let previous = diff
                    .live_columns
                    .get(&mismatch.column)
                    .cloned()
                    .unwrap_or_else(|| ColumnDef::new(&mismatch.column, &mismatch.actual));
                rollback.push(MigrationStep::modify_column(&diff.table, &previous, &mismatch.expected));
            }
        }

        rollback.reverse();
        (steps, rollback)
    }

    /// Ids of table-creation steps the given tables depend on.
    fn table_dependency(comparison: &SchemaComparison, tables: &[&str]) -> Vec<String> {
        comparison
            .missing_tables
            .iter()
            .filter(|t| tables.contains(&t.name.as_str()))
            .map(|t| format!("create_table:{}", t.name))
            .collect()
    }

    fn data_migration_steps(&self) -> Vec<MigrationStep> {
        self.canonical
            .tables
            .iter()
            .flat_map(|table| {
                table.columns.iter().filter_map(move |column| {
                    let value = column.default.clone()?;
                    Some(MigrationStep::backfill(&table.name, &column.name, value))
                })
            })
            .collect()
    }

    fn describe(comparison: &SchemaComparison, current: &Version, target: &Version) -> String {
        format!(
            "Migrate from {} to {}: {} missing tables, {} missing columns, {} type changes, {} missing indexes, {} missing relations",
            current,
            target,
            comparison.missing_tables.len(),
            comparison.missing_column_count(),
            comparison.type_mismatch_count(),
            comparison.missing_indexes.len(),
            comparison.missing_relations.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::compare::SchemaComparator;
    use crate::schema::canonical::business_schema;
    use crate::schema::types;

    fn planner() -> MigrationPlanner {
        MigrationPlanner::new(business_schema())
    }

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_empty_backend_plan_order() {
        let live = SchemaDefinition::default();
        let comparison = SchemaComparator::compare(&live, &business_schema());
        let plan = planner().create_plan(&comparison, &v("1.0.0"), &v("1.0.0"));

        let names: Vec<&str> = plan.migrations.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["create_missing_tables", "create_indexes", "create_relations"]);
        assert_eq!(plan.risk_level, RiskLevel::Low);
        assert!(!plan.backup_required);
        assert!(plan.reversible);

        let first = &plan.migrations[0];
        assert_eq!(first.steps.len(), 6);
        assert!(first.steps.iter().all(|s| s.reversible));
        assert_eq!(first.rollback.len(), 6);

        let relation = &plan.migrations[2].steps[0];
        assert!(relation.depends_on.contains(&"create_table:bookings".to_string()));
    }

    #[test]
    fn test_type_mismatch_plans_modify_and_raises_risk() {
        let mut live = business_schema();
        let services = live.tables.iter_mut().find(|t| t.name == "services").unwrap();
        services.column_mut("price").unwrap().data_type = types::STRING.into();
        services.columns.push(ColumnDef::new("legacy", types::STRING));

        let comparison = SchemaComparator::compare(&live, &business_schema());
        let plan = planner().create_plan(&comparison, &v("1.0.0"), &v("1.0.0"));

        assert_eq!(plan.migrations.len(), 1);
        let steps = &plan.migrations[0].steps;
        assert_eq!(steps.len(), 1);
        assert_eq!(
            steps[0].payload,
            StepPayload::AlterColumn {
                change: AlterColumn::Modify(ColumnDef::new("price", types::NUMBER)),
            }
        );
        assert_eq!(plan.risk_level, RiskLevel::High);
        assert!(plan.backup_required);
        assert!(plan.warnings.iter().any(|w| w.contains("legacy")));
        assert!(!plan.steps().any(|s| matches!(
            s.payload,
            StepPayload::AlterColumn { change: AlterColumn::Drop { .. } }
        )));
    }

    #[test]
    fn test_primary_key_change_is_critical_and_irreversible() {
        let mut live = business_schema();
        let users = live.tables.iter_mut().find(|t| t.name == "users").unwrap();
        users.column_mut("id").unwrap().data_type = types::INTEGER.into();

        let comparison = SchemaComparator::compare(&live, &business_schema());
        let plan = planner().create_plan(&comparison, &v("1.0.0"), &v("1.0.0"));
        assert_eq!(plan.risk_level, RiskLevel::Critical);
        assert!(!plan.reversible);
    }

    #[test]
    fn test_major_version_appends_data_migration() {
        let canonical = business_schema();
        let comparison = SchemaComparator::compare(&canonical, &canonical);
        let plan = planner().create_plan(&comparison, &v("0.9.0"), &v("1.0.0"));

        let last = plan.migrations.last().unwrap();
        assert_eq!(last.name, "migrate_data_v1");
        assert!(last.steps.iter().all(|s| s.kind == StepKind::UpdateData));
        assert!(last.steps.iter().any(|s| s.id == "backfill:users.role"));
        assert_eq!(plan.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_in_sync_plan_is_empty() {
        let canonical = business_schema();
        let comparison = SchemaComparator::compare(&canonical, &canonical);
        let plan = planner().create_plan(&comparison, &v("1.0.0"), &v("1.0.0"));
        assert!(plan.is_empty());
        assert_eq!(plan.risk_level, RiskLevel::Low);
    }
}
