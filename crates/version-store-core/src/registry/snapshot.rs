//! Persisted snapshot records.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::prelude::*;

use crate::{
    error::{
        SerializeSnafu, SnapshotAlreadyExistsSnafu, SnapshotNotFoundSnafu, StorageCorruptionSnafu,
        StoreResult,
    },
    layout,
    storage::SegmentStore,
};

/// A named, immutable pin of one version per symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Snapshot name.
    pub name: String,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// User metadata attached to the snapshot itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Pinned version per symbol.
    pub versions: BTreeMap<String, u64>,
}

impl SnapshotRecord {
    /// Version of `symbol` pinned by this snapshot.
    pub fn version_of(&self, symbol: &str) -> Option<u64> {
        self.versions.get(symbol).copied()
    }
}

/// What a new snapshot should pin.
///
/// By default every symbol with a live version is pinned at its latest
/// version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotOptions {
    /// Restrict the snapshot to these symbols.
    pub symbols: Option<Vec<String>>,
    /// Symbols to leave out.
    pub skip_symbols: Vec<String>,
    /// Pin these symbols at an explicit version instead of their latest.
    pub versions: BTreeMap<String, u64>,
    /// Metadata stored with the snapshot.
    pub metadata: Option<Value>,
}

impl SnapshotOptions {
    /// Pin every symbol at its latest version.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only pin `symbols`.
    pub fn symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbols = Some(symbols.into_iter().map(Into::into).collect());
        self
    }

    /// Leave `symbol` out of the snapshot.
    pub fn skip(mut self, symbol: impl Into<String>) -> Self {
        self.skip_symbols.push(symbol.into());
        self
    }

    /// Pin `symbol` at `version`.
    pub fn version(mut self, symbol: impl Into<String>, version: u64) -> Self {
        self.versions.insert(symbol.into(), version);
        self
    }

    /// Attach `metadata` to the snapshot.
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Reads and writes snapshot records under `snapshots/`.
#[derive(Debug)]
pub(crate) struct SnapshotRegistry {
    store: Arc<dyn SegmentStore>,
}

impl SnapshotRegistry {
    pub(crate) fn new(store: Arc<dyn SegmentStore>) -> Self {
        Self { store }
    }

    /// Persist `record`; never overwrites an existing snapshot.
    pub(crate) async fn create(&self, record: &SnapshotRecord) -> StoreResult<()> {
        let bytes = serde_json::to_vec(record).context(SerializeSnafu {
            what: "snapshot record",
        })?;
        match self
            .store
            .put_if_absent(&layout::snapshot_key(&record.name), Bytes::from(bytes))
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                return SnapshotAlreadyExistsSnafu {
                    name: record.name.as_str(),
                }
                .fail();
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            "created snapshot {} pinning {} symbol(s)",
            record.name,
            record.versions.len()
        );
        Ok(())
    }

    pub(crate) async fn read(&self, name: &str) -> StoreResult<SnapshotRecord> {
        let key = layout::snapshot_key(name);
        let bytes = match self.store.get(&key).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return SnapshotNotFoundSnafu { name }.fail(),
            Err(e) => return Err(e.into()),
        };
        let record: SnapshotRecord = serde_json::from_slice(&bytes).map_err(|e| {
            StorageCorruptionSnafu {
                key: key.as_str(),
                detail: format!("undecodable snapshot record: {e}"),
            }
            .build()
        })?;
        ensure!(
            record.name == name,
            StorageCorruptionSnafu {
                key,
                detail: format!("record claims to be snapshot {}", record.name),
            }
        );
        Ok(record)
    }

    pub(crate) async fn names(&self) -> StoreResult<BTreeSet<String>> {
        let keys = self.store.list(layout::SNAPSHOTS_PREFIX).await?;
        Ok(keys
            .iter()
            .filter_map(|k| layout::parse_snapshot_key(k))
            .map(str::to_string)
            .collect())
    }

    /// Every snapshot record, skipping ones deleted while listing.
    pub(crate) async fn records(&self) -> StoreResult<Vec<SnapshotRecord>> {
        let mut out = Vec::new();
        for name in self.names().await? {
            match self.read(&name).await {
                Ok(record) => out.push(record),
                Err(crate::error::StoreError::SnapshotNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    pub(crate) async fn delete(&self, name: &str) -> StoreResult<()> {
        let key = layout::snapshot_key(name);
        match self.store.get(&key).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return SnapshotNotFoundSnafu { name }.fail(),
            Err(e) => return Err(e.into()),
        }
        self.store.delete(&key).await?;
        info!("deleted snapshot {name}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::StoreError, storage::MemoryStore};
    use serde_json::json;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn record(name: &str) -> SnapshotRecord {
        SnapshotRecord {
            name: name.to_string(),
            created_at: Utc::now(),
            metadata: Some(json!({"owner": "ops"})),
            versions: BTreeMap::from([("a".to_string(), 2), ("b".to_string(), 0)]),
        }
    }

    #[tokio::test]
    async fn snapshots_are_create_only() -> TestResult {
        let registry = SnapshotRegistry::new(Arc::new(MemoryStore::new()));
        registry.create(&record("s1")).await?;

        let err = registry.create(&record("s1")).await.unwrap_err();
        assert!(matches!(err, StoreError::SnapshotAlreadyExists { .. }));

        let back = registry.read("s1").await?;
        assert_eq!(back.version_of("a"), Some(2));
        assert_eq!(back.version_of("zzz"), None);
        Ok(())
    }

    #[tokio::test]
    async fn list_and_delete() -> TestResult {
        let registry = SnapshotRegistry::new(Arc::new(MemoryStore::new()));
        registry.create(&record("b")).await?;
        registry.create(&record("a")).await?;
        assert_eq!(
            registry.names().await?.into_iter().collect::<Vec<_>>(),
            vec!["a", "b"]
        );

        registry.delete("a").await?;
        assert!(matches!(
            registry.delete("a").await,
            Err(StoreError::SnapshotNotFound { .. })
        ));
        assert!(matches!(
            registry.read("a").await,
            Err(StoreError::SnapshotNotFound { .. })
        ));
        assert_eq!(registry.records().await?.len(), 1);
        Ok(())
    }

    #[test]
    fn options_builder_collects_overrides() {
        let opts = SnapshotOptions::new()
            .symbols(["a", "b", "c"])
            .skip("c")
            .version("a", 1)
            .metadata(json!(1));
        assert_eq!(opts.symbols.as_deref().map(<[String]>::len), Some(3));
        assert_eq!(opts.skip_symbols, vec!["c".to_string()]);
        assert_eq!(opts.versions.get("a"), Some(&1));
    }
}
