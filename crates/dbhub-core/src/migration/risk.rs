//! Risk assessment for migration plans.

use super::compare::SchemaComparison;
use serde::{Deserialize, Serialize};

/// How destructive or uncertain a migration plan is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Purely additive.
    #[default]
    Low,
    /// Leaves unexpected structure in place.
    Medium,
    /// Rewrites existing values.
    High,
    /// Rewrites record identifiers.
    Critical,
}

impl RiskLevel {
    /// Raise the level to at least `other`.
    pub fn escalate(&mut self, other: RiskLevel) {
        *self = (*self).max(other);
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Risk level and the warnings that justify it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RiskAssessment {
    /// Overall level.
    pub level: RiskLevel,
    /// Human readable warnings.
    pub warnings: Vec<String>,
}

impl RiskAssessment {
    /// Assess a comparison. `data_migration` marks a change of major version.
    pub fn assess(comparison: &SchemaComparison, data_migration: bool) -> Self {
        let mut assessment = Self::default();

        for table in &comparison.extra_tables {
            assessment
                .warnings
                .push(format!("Table '{}' is not part of the schema and is left untouched", table));
        }

        for diff in &comparison.column_differences {
            if !diff.extra_columns.is_empty() {
                assessment.level.escalate(RiskLevel::Medium);
                assessment.warnings.push(format!(
                    "Table '{}' has extra columns ({}) that will be kept",
                    diff.table,
                    diff.extra_columns.join(", ")
                ));
            }
            for mismatch in &diff.type_mismatches {
                let level = if mismatch.primary_key {
                    RiskLevel::Critical
                } else {
                    RiskLevel::High
                };
                assessment.level.escalate(level);
                assessment.warnings.push(format!(
                    "Column '{}.{}' changes type from {} to {}; existing values will be converted",
                    diff.table, mismatch.column, mismatch.actual, mismatch.expected
                ));
            }
        }

        if data_migration {
            assessment.level.escalate(RiskLevel::High);
            assessment
                .warnings
                .push("Major version change: existing data will be migrated".to_string());
        }

        assessment
    }
}
