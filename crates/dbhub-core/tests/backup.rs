//! Integration tests for backup creation, verification, and restore.

mod common;

use common::{customers, record, TestContext};
use dbhub_core::{BackupOptions, Error, RestoreOptions, TableSelection};
use serde_json::json;

async fn populated_source(ctx: &TestContext) -> String {
    let id = ctx.sled("source").await;
    ctx.seed(&id, "customers", customers(10)).await;
    ctx.seed(
        &id,
        "settings",
        vec![
            record(json!({"id": "currency", "value": "EUR"})),
            record(json!({"id": "site_name", "value": "Shop"})),
        ],
    )
    .await;
    id
}

#[tokio::test]
async fn test_corrupted_backup_is_never_restored() {
    let ctx = TestContext::new();
    let source = populated_source(&ctx).await;
    let target = ctx.sled("target").await;

    let artifact = ctx
        .hub
        .backups()
        .create_backup(&source, BackupOptions::default())
        .await
        .unwrap();
    assert_eq!(artifact.record_count, 12);

    let path = ctx.backup_root().join(&artifact.location);
    let mut bytes = std::fs::read(&path).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xff;
    std::fs::write(&path, bytes).unwrap();

    let err = ctx
        .hub
        .backups()
        .restore_backup(&artifact.id, &target, &RestoreOptions::default())
        .await
        .unwrap_err();
    match err {
        Error::ChecksumMismatch {
            backup_id,
            expected,
            actual,
        } => {
            assert_eq!(backup_id, artifact.id);
            assert_eq!(expected, artifact.checksum);
            assert_ne!(actual, expected);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(ctx.count(&target, "customers").await, 0);
    assert_eq!(ctx.count(&target, "settings").await, 0);

    let err = ctx.hub.backups().verify_backup(&artifact.id).await.unwrap_err();
    assert!(matches!(err, Error::ChecksumMismatch { .. }));
}

#[tokio::test]
async fn test_compressed_backup_restores_into_other_family() {
    let ctx = TestContext::new();
    let source = populated_source(&ctx).await;
    let target = ctx.flat_file("target", "restored.json").await;

    let artifact = ctx
        .hub
        .backups()
        .create_backup(&source, BackupOptions::default().named("nightly").compressed())
        .await
        .unwrap();
    assert_eq!(artifact.name, "nightly");
    assert!(artifact.compressed);
    assert!(artifact.location.ends_with(".json.gz"));
    assert_eq!(artifact.tables, vec!["customers".to_string(), "settings".to_string()]);

    let verified = ctx.hub.backups().verify_backup(&artifact.id).await.unwrap();
    assert_eq!(verified.checksum, artifact.checksum);

    let summary = ctx
        .hub
        .backups()
        .restore_backup(&artifact.id, &target, &RestoreOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.inserted, 12);
    assert_eq!(summary.skipped, 0);
    assert_eq!(ctx.count(&target, "customers").await, 10);

    let driver = ctx.driver(&target).await;
    let currency = driver.read("settings", Some("currency")).await.unwrap();
    assert_eq!(currency["value"], json!("EUR"));
}

#[tokio::test]
async fn test_restore_overwrite_and_skip() {
    let ctx = TestContext::new();
    let source = populated_source(&ctx).await;
    let backups = ctx.hub.backups();

    let artifact = backups
        .create_backup(&source, BackupOptions::default())
        .await
        .unwrap();
    assert!(artifact.name.starts_with("source-"));

    let driver = ctx.driver(&source).await;
    driver
        .update("customers", "c0000", record(json!({"name": "Renamed"})))
        .await
        .unwrap();
    driver
        .create("customers", record(json!({"id": "extra", "name": "Extra", "email": "x@example.com"})))
        .await
        .unwrap();

    let summary = backups
        .restore_backup(&artifact.id, &source, &RestoreOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.skipped, 12);
    let kept = driver.read("customers", Some("c0000")).await.unwrap();
    assert_eq!(kept["name"], json!("Renamed"));

    let overwrite = RestoreOptions {
        overwrite_existing: true,
        ..Default::default()
    };
    let summary = backups
        .restore_backup(&artifact.id, &source, &overwrite)
        .await
        .unwrap();
    assert_eq!(summary.inserted, 12);
    let restored = driver.read("customers", Some("c0000")).await.unwrap();
    assert_eq!(restored["name"], json!("Customer 0"));
    assert_eq!(ctx.count(&source, "customers").await, 10);
}

#[tokio::test]
async fn test_table_selection() {
    let ctx = TestContext::new();
    let source = populated_source(&ctx).await;
    let target = ctx.sled("target").await;
    let backups = ctx.hub.backups();

    let only_customers = TableSelection {
        include: Some(vec!["customers".to_string()]),
        exclude: Vec::new(),
    };
    let artifact = backups
        .create_backup(&source, BackupOptions::default().with_selection(only_customers))
        .await
        .unwrap();
    assert_eq!(artifact.tables, vec!["customers".to_string()]);
    assert_eq!(artifact.record_count, 10);

    let full = backups
        .create_backup(&source, BackupOptions::default())
        .await
        .unwrap();
    let without_customers = RestoreOptions {
        overwrite_existing: false,
        selection: TableSelection {
            include: None,
            exclude: vec!["customers".to_string()],
        },
    };
    let summary = backups
        .restore_backup(&full.id, &target, &without_customers)
        .await
        .unwrap();
    assert_eq!(summary.tables, vec!["settings".to_string()]);
    assert_eq!(ctx.count(&target, "customers").await, 0);
    assert_eq!(ctx.count(&target, "settings").await, 2);
}

#[tokio::test]
async fn test_list_and_delete() {
    let ctx = TestContext::new();
    let source = populated_source(&ctx).await;
    let backups = ctx.hub.backups();

    let first = backups
        .create_backup(&source, BackupOptions::default().named("first"))
        .await
        .unwrap();
    let second = backups
        .create_backup(&source, BackupOptions::default().named("second"))
        .await
        .unwrap();

    let listed: Vec<_> = backups
        .list_backups()
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(listed, vec!["second".to_string(), "first".to_string()]);

    backups.delete_backup(&first.id).await.unwrap();
    assert!(!ctx.backup_root().join(&first.location).exists());
    assert!(matches!(
        backups.get_backup(&first.id),
        Err(Error::BackupNotFound(_))
    ));
    assert_eq!(backups.list_backups().unwrap().len(), 1);
    assert!(backups.verify_backup(&second.id).await.is_ok());

    let err = backups.delete_backup(&first.id).await.unwrap_err();
    assert!(matches!(err, Error::BackupNotFound(_)));
}

#[tokio::test]
async fn test_backup_requires_connected_source() {
    let ctx = TestContext::new();
    let untested = ctx
        .hub
        .registry()
        .register(
            "untested",
            dbhub_core::BackendFamily::Nosql,
            common::config(json!({"temporary": true})),
        )
        .unwrap();

    let err = ctx
        .hub
        .backups()
        .create_backup(&untested.id, BackupOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotConnected(_)));
}
