//! Integration tests for schema comparison and migration execution.

mod common;

use common::{record, TestContext};
use dbhub_core::migration::MigrationStatus;
use dbhub_core::schema::types;
use dbhub_core::{ColumnDef, ExecuteOptions, RiskLevel, TableDef};
use semver::Version;
use serde_json::json;

/// A services table whose price column is declared as text.
fn legacy_services() -> TableDef {
    TableDef::new("services")
        .with_column(ColumnDef::new("id", types::STRING).primary_key())
        .with_column(ColumnDef::new("name", types::STRING).required())
        .with_column(ColumnDef::new("price", types::STRING))
}

async fn legacy_backend(ctx: &TestContext) -> String {
    let id = ctx.sled("legacy").await;
    let driver = ctx.driver(&id).await;
    driver.create_table(&legacy_services()).await.unwrap();
    ctx.seed(
        &id,
        "services",
        vec![record(json!({"id": "s1", "name": "Haircut", "price": "not-a-number"}))],
    )
    .await;
    id
}

#[tokio::test]
async fn test_failed_conversion_keeps_version() {
    let ctx = TestContext::new();
    let id = legacy_backend(&ctx).await;

    let comparison = ctx.hub.compare(&id).await.unwrap();
    assert!(comparison.has_type_mismatches());

    let mut plan = ctx.hub.plan_migration(&id).await.unwrap();
    assert_eq!(plan.risk_level, RiskLevel::High);
    assert!(plan.backup_required);

    let result = ctx
        .hub
        .migrations()
        .execute(&mut plan, &id, ExecuteOptions::default())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(
        result.failed_steps,
        vec!["modify column services.price (string -> number)".to_string()]
    );
    assert!(result.errors[0].contains("not-a-number") || result.errors[0].contains("price"));
    assert!(result.backup_id.is_some());
    assert!(result.rollback_available);

    let driver = ctx.driver(&id).await;
    assert_eq!(driver.recorded_version().await.unwrap(), None);
    let stored = driver.read("services", Some("s1")).await.unwrap();
    assert_eq!(stored["price"], json!("not-a-number"));

    let applied: Vec<_> = plan
        .migrations
        .iter()
        .filter(|m| m.applied)
        .map(|m| m.name.as_str())
        .collect();
    assert_eq!(applied, vec!["create_missing_tables"]);

    let history = ctx.hub.migrations().history().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, MigrationStatus::Failed);
    assert_eq!(history[0].backup_id, result.backup_id);
}

#[tokio::test]
async fn test_continue_on_error_runs_later_migrations() {
    let ctx = TestContext::new();
    let id = legacy_backend(&ctx).await;

    let mut plan = ctx.hub.plan_migration(&id).await.unwrap();
    let options = ExecuteOptions {
        continue_on_error: true,
        ..Default::default()
    };
    let result = ctx.hub.migrations().execute(&mut plan, &id, options).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.failed_steps.len(), 1);
    let applied: Vec<_> = plan
        .migrations
        .iter()
        .filter(|m| m.applied)
        .map(|m| m.name.as_str())
        .collect();
    assert_eq!(
        applied,
        vec!["create_missing_tables", "create_indexes", "create_relations"]
    );

    let comparison = ctx.hub.compare(&id).await.unwrap();
    assert!(comparison.missing_tables.is_empty());
    assert!(comparison.missing_indexes.is_empty());
    assert!(comparison.has_type_mismatches());
}

#[tokio::test]
async fn test_failed_backup_does_not_fail_applied_steps() {
    let ctx = TestContext::new();
    let id = ctx.sled("fresh").await;
    std::fs::remove_dir_all(ctx.backup_root()).unwrap();
    std::fs::write(ctx.backup_root(), b"not a directory").unwrap();

    let mut plan = ctx.hub.plan_migration(&id).await.unwrap();
    let strict = ExecuteOptions {
        create_backup: true,
        ..Default::default()
    };
    let result = ctx.hub.migrations().execute(&mut plan, &id, strict).await.unwrap();
    assert!(!result.success);
    assert!(result.executed_steps.is_empty());
    assert!(result.errors[0].starts_with("backup failed"));

    let mut plan = ctx.hub.plan_migration(&id).await.unwrap();
    let lenient = ExecuteOptions {
        create_backup: true,
        continue_on_error: true,
        ..Default::default()
    };
    let result = ctx.hub.migrations().execute(&mut plan, &id, lenient).await.unwrap();

    assert!(result.success, "failed steps: {:?}", result.failed_steps);
    assert!(result.failed_steps.is_empty());
    assert_eq!(result.executed_steps.len(), plan.step_count());
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("backup failed"));
    assert!(result.backup_id.is_none());
    assert!(!result.rollback_available);

    let driver = ctx.driver(&id).await;
    assert_eq!(driver.recorded_version().await.unwrap(), Some(plan.to_version.clone()));
    let history = ctx.hub.migrations().history().unwrap();
    assert_eq!(history.last().unwrap().status, MigrationStatus::Complete);
}

#[tokio::test]
async fn test_execute_then_replan_is_empty() {
    let ctx = TestContext::new();
    let id = ctx.sled("fresh").await;

    let mut plan = ctx.hub.plan_migration(&id).await.unwrap();
    assert_eq!(plan.risk_level, RiskLevel::Low);
    assert!(!plan.backup_required);
    assert!(!plan.is_empty());

    let result = ctx
        .hub
        .migrations()
        .execute(&mut plan, &id, ExecuteOptions::default())
        .await
        .unwrap();
    assert!(result.success, "errors: {:?}", result.errors);
    assert!(result.backup_id.is_none());
    assert_eq!(result.executed_steps.len(), plan.step_count());

    let comparison = ctx.hub.compare(&id).await.unwrap();
    assert!(!comparison.has_missing_structure());
    assert!(!comparison.has_type_mismatches());

    let replan = ctx.hub.plan_migration(&id).await.unwrap();
    assert!(replan.is_empty());
    assert_eq!(replan.risk_level, RiskLevel::Low);

    let driver = ctx.driver(&id).await;
    assert_eq!(
        driver.recorded_version().await.unwrap(),
        Some(Version::new(1, 0, 0))
    );
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let ctx = TestContext::new();
    let id = legacy_backend(&ctx).await;

    let mut plan = ctx.hub.plan_migration(&id).await.unwrap();
    let options = ExecuteOptions {
        dry_run: true,
        ..Default::default()
    };
    let result = ctx.hub.migrations().execute(&mut plan, &id, options).await.unwrap();

    assert!(result.success);
    assert_eq!(result.planned_actions.len(), plan.step_count());
    assert!(result
        .planned_actions
        .contains(&"modify column services.price (string -> number)".to_string()));
    assert!(result.executed_steps.is_empty());
    assert!(result.backup_id.is_none());
    assert!(ctx.hub.backups().list_backups().unwrap().is_empty());
    assert!(ctx.hub.migrations().history().unwrap().is_empty());

    let comparison = ctx.hub.compare(&id).await.unwrap();
    assert_eq!(comparison.missing_tables.len(), 5);
}

#[tokio::test]
async fn test_rollback_restores_previous_version() {
    let ctx = TestContext::new();
    let id = ctx.sled("old").await;
    let driver = ctx.driver(&id).await;
    driver.record_version(&Version::new(0, 9, 0)).await.unwrap();

    let mut plan = ctx.hub.plan_migration(&id).await.unwrap();
    assert_eq!(plan.from_version, Version::new(0, 9, 0));
    assert!(plan.migrations.iter().any(|m| m.name == "migrate_data_v1"));

    let result = ctx
        .hub
        .migrations()
        .execute(&mut plan, &id, ExecuteOptions::default())
        .await
        .unwrap();
    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(
        driver.recorded_version().await.unwrap(),
        Some(Version::new(1, 0, 0))
    );

    let rollback = ctx.hub.migrations().rollback(&mut plan, &id).await.unwrap();
    assert!(rollback.success, "errors: {:?}", rollback.errors);
    assert!(rollback
        .executed_steps
        .contains(&"drop table users".to_string()));
    assert!(plan.migrations.iter().all(|m| !m.applied));
    assert!(driver.introspect().await.unwrap().tables.is_empty());
    assert_eq!(
        driver.recorded_version().await.unwrap(),
        Some(Version::new(0, 9, 0))
    );

    let history = ctx.hub.migrations().history().unwrap();
    let statuses: Vec<_> = history.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![MigrationStatus::Complete, MigrationStatus::RolledBack]);
}

#[tokio::test]
async fn test_major_version_backfills_defaults() {
    let ctx = TestContext::new();
    let id = ctx.sled("users").await;
    let driver = ctx.driver(&id).await;
    driver.record_version(&Version::new(0, 9, 0)).await.unwrap();
    ctx.seed(
        &id,
        "users",
        vec![record(json!({"id": "u1", "email": "ada@example.com"}))],
    )
    .await;

    let mut plan = ctx.hub.plan_migration(&id).await.unwrap();
    let result = ctx
        .hub
        .migrations()
        .execute(&mut plan, &id, ExecuteOptions::default())
        .await
        .unwrap();
    assert!(result.success, "errors: {:?}", result.errors);

    let user = driver.read("users", Some("u1")).await.unwrap();
    assert_eq!(user["role"], json!("editor"));
}
