//! Persistence across reopen on the local directory backend.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::{TestResult, daily, mixed};
use serde_json::json;
use tempfile::TempDir;
use version_store_core::{
    ErrorKind, StoreConfig, VersionStore,
    registry::SnapshotOptions,
    store::ReadOptions,
    version_chain::VersionSelector,
};

fn config() -> StoreConfig {
    StoreConfig {
        rows_per_segment: 8,
        ..StoreConfig::default()
    }
}

#[tokio::test]
async fn reopened_store_sees_versions_and_snapshots() -> TestResult {
    let tmp = TempDir::new()?;
    {
        let store = VersionStore::local(tmp.path(), config())?;
        store.write("px", daily(0, 20), Some(json!({"v": 0})), true).await?;
        store.snapshot("eod", SnapshotOptions::new()).await?;
        store.write("px", daily(20, 20), None, true).await?;
        store.write("ref", mixed(), None, true).await?;
    }

    let store = VersionStore::local(tmp.path(), config())?;
    assert_eq!(store.list_symbols().await?, vec!["px", "ref"]);

    let latest = store.read("px", &ReadOptions::new()).await?;
    assert_eq!(latest.version, 1);
    assert_eq!(latest.data, Some(daily(20, 20)));

    let eod = VersionSelector::Snapshot("eod".into());
    let pinned = store.read("px", &ReadOptions::new().selector(eod)).await?;
    assert_eq!(pinned.version, 0);
    assert_eq!(pinned.metadata, Some(json!({"v": 0})));
    assert_eq!(pinned.data, Some(daily(0, 20)));

    // Retention comes from the persisted snapshot, so the pin survives a sweep.
    let report = store.sweep("px").await?;
    assert!(report.removed_versions.is_empty());

    let reference = store.read("ref", &ReadOptions::new()).await?;
    assert_eq!(reference.data, Some(mixed()));
    Ok(())
}

#[tokio::test]
async fn sweep_removes_segment_files() -> TestResult {
    let tmp = TempDir::new()?;
    let store = VersionStore::local(tmp.path(), config())?;
    store.write("px", daily(0, 16), None, true).await?;
    store.write("px", daily(100, 4), None, true).await?;

    let data_dir = tmp.path().join("data").join("px");
    let count = || std::fs::read_dir(&data_dir).map(|d| d.count()).unwrap_or(0);
    assert_eq!(count(), 3);

    let report = store.sweep("px").await?;
    assert_eq!(report.removed_versions, vec![0]);
    assert_eq!(report.removed_segments.len(), 2);
    assert_eq!(count(), 1);

    let err = store
        .read("px", &ReadOptions::new().selector(0u64))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VersionNotFound);
    Ok(())
}

#[tokio::test]
async fn garbage_records_surface_as_corruption() -> TestResult {
    let tmp = TempDir::new()?;
    let store = VersionStore::local(tmp.path(), config())?;
    store.write("px", daily(0, 4), None, true).await?;

    let record = tmp
        .path()
        .join("versions")
        .join("px")
        .join(format!("{:020}.json", 0));
    std::fs::write(&record, b"{ not json")?;

    // A fresh handle has no cached copy of the record.
    let fresh = VersionStore::local(tmp.path(), config())?;
    let err = fresh.read("px", &ReadOptions::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageCorruption);
    assert!(!err.is_retryable());
    Ok(())
}
