//! Backend stalls, and interleavings forced at the storage boundary.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use common::{TestResult, daily};
use tokio::sync::oneshot;
use version_store_core::{
    ErrorKind, StoreConfig, VersionStore,
    registry::SnapshotOptions,
    storage::{MemoryStore, SegmentStore, StorageResult},
    store::ReadOptions,
    version_chain::VersionSelector,
};

/// A single pause point: the first `op` on a key under `prefix` signals
/// `reached` and then waits for `release`.
#[derive(Debug)]
struct Gate {
    op: &'static str,
    prefix: &'static str,
    reached: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// In-memory backend that can hold one call open mid-flight.
///
/// `put` pauses after the blob is stored; every other call pauses before it
/// reaches the inner store.
#[derive(Debug, Default)]
struct GatedStore {
    inner: MemoryStore,
    gate: Mutex<Option<Gate>>,
}

impl GatedStore {
    /// Arm the gate. Returns the receiver that fires when a call is held
    /// and the sender that lets it continue.
    fn arm(
        &self,
        op: &'static str,
        prefix: &'static str,
    ) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (reached_tx, reached_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(Gate {
            op,
            prefix,
            reached: reached_tx,
            release: release_rx,
        });
        (reached_rx, release_tx)
    }

    async fn pass(&self, op: &str, key: &str) {
        let gate = {
            let mut slot = self.gate.lock().unwrap();
            match slot.as_ref() {
                Some(g) if g.op == op && key.starts_with(g.prefix) => slot.take(),
                _ => None,
            }
        };
        if let Some(gate) = gate {
            let _ = gate.reached.send(());
            let _ = gate.release.await;
        }
    }
}

#[async_trait]
impl SegmentStore for GatedStore {
    async fn put(&self, key: &str, value: Bytes) -> StorageResult<()> {
        self.inner.put(key, value).await?;
        self.pass("put", key).await;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: Bytes) -> StorageResult<()> {
        self.pass("put_if_absent", key).await;
        self.inner.put_if_absent(key, value).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.pass("get", key).await;
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.pass("delete", key).await;
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.pass("list", prefix).await;
        self.inner.list(prefix).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Bytes,
    ) -> StorageResult<bool> {
        self.pass("compare_and_swap", key).await;
        self.inner.compare_and_swap(key, expected, new).await
    }
}

/// Backend whose reads never complete.
#[derive(Debug, Default)]
struct StalledReads {
    inner: MemoryStore,
}

#[async_trait]
impl SegmentStore for StalledReads {
    async fn put(&self, key: &str, value: Bytes) -> StorageResult<()> {
        self.inner.put(key, value).await
    }

    async fn put_if_absent(&self, key: &str, value: Bytes) -> StorageResult<()> {
        self.inner.put_if_absent(key, value).await
    }

    async fn get(&self, _key: &str) -> StorageResult<Bytes> {
        std::future::pending().await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Bytes,
    ) -> StorageResult<bool> {
        self.inner.compare_and_swap(key, expected, new).await
    }
}

const BLOCKED: Duration = Duration::from_millis(50);

#[tokio::test]
async fn sweep_waits_for_a_write_whose_segments_are_uncommitted() -> TestResult {
    let backend = Arc::new(GatedStore::default());
    let store = VersionStore::open(backend.clone(), StoreConfig::default())?;

    store.write("s", daily(0, 4), None, true).await?; // v0
    store.write("s", daily(10, 4), None, true).await?; // v1, tombstones v0

    // Rewriting v0's table reuses its content-addressed segment key.
    let (reached, release) = backend.arm("put", "data/");
    let mut write = tokio::spawn({
        let store = store.clone();
        async move { store.write("s", daily(0, 4), None, true).await }
    });
    reached.await?;

    let mut sweep = tokio::spawn({
        let store = store.clone();
        async move { store.sweep("s").await }
    });
    assert!(tokio::time::timeout(BLOCKED, &mut sweep).await.is_err());

    release.send(()).unwrap();
    assert_eq!((&mut write).await??.version, 2);
    let report = sweep.await??;
    assert_eq!(report.removed_versions, vec![0, 1]);
    assert_eq!(report.removed_segments.len(), 1);

    let latest = store.read("s", &ReadOptions::new()).await?;
    assert_eq!(latest.version, 2);
    assert_eq!(latest.data, Some(daily(0, 4)));
    Ok(())
}

#[tokio::test]
async fn snapshot_pins_survive_a_concurrent_write_and_sweep() -> TestResult {
    let backend = Arc::new(GatedStore::default());
    let store = VersionStore::open(backend.clone(), StoreConfig::default())?;
    store.write("s", daily(0, 4), None, true).await?; // v0

    let (reached, release) = backend.arm("put_if_absent", "snapshots/");
    let mut snapshot = tokio::spawn({
        let store = store.clone();
        async move { store.snapshot("snap", SnapshotOptions::new()).await }
    });
    reached.await?;

    // The snapshot has chosen v0 but not persisted it yet.
    let mut write = tokio::spawn({
        let store = store.clone();
        async move { store.write("s", daily(10, 4), None, true).await }
    });
    assert!(tokio::time::timeout(BLOCKED, &mut write).await.is_err());

    release.send(()).unwrap();
    assert_eq!((&mut snapshot).await??.version_of("s"), Some(0));
    assert_eq!((&mut write).await??.version, 1);

    let report = store.sweep("s").await?;
    assert!(report.removed_versions.is_empty());

    let snap = VersionSelector::Snapshot("snap".into());
    let pinned = store.read("s", &ReadOptions::new().selector(snap)).await?;
    assert_eq!(pinned.version, 0);
    assert_eq!(pinned.data, Some(daily(0, 4)));
    let versions = store.list_versions(Some("s")).await?;
    assert!(versions.iter().all(|v| !v.deleted));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stalled_backend_surfaces_a_retryable_timeout() -> TestResult {
    let store = VersionStore::open(
        Arc::new(StalledReads::default()),
        StoreConfig {
            io_timeout_ms: 100,
            io_max_retries: 2,
            io_retry_backoff_ms: 10,
            ..StoreConfig::default()
        },
    )?;

    let err = store.read("s", &ReadOptions::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageTimeout);
    assert!(err.is_retryable());

    let outcomes = store.read_batch(["s", "t"], &ReadOptions::new()).await;
    for outcome in &outcomes {
        let kind = outcome.error().map(|e| e.kind());
        assert_eq!(kind, Some(ErrorKind::StorageTimeout));
    }
    Ok(())
}
