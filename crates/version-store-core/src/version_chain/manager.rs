//! Allocation, resolution and removal of versions.
//!
//! The chain of a symbol lives under `versions/<symbol>/`. `HEAD` names the
//! highest committed version; each version is an immutable JSON record
//! written with create-only semantics, so two writers can never both claim
//! the same number. Tombstones are separate marker keys, which keeps records
//! immutable while still letting pruning hide versions from `latest`.
//!
//! Commit protocol for version `n + 1` when `HEAD` reads `n`:
//!
//! 1. `put_if_absent(versions/<symbol>/<n+1>.json)`. If the key exists,
//!    another process (or a crashed writer) got there first: roll `HEAD`
//!    forward to it and start over.
//! 2. Advance `HEAD` from `n` to `n + 1` with compare-and-swap.
//!
//! Within a process, commits to one symbol are additionally serialized by a
//! per-symbol mutex, so retries only happen when several processes share a
//! store. [`VersionChain::commit`] takes the held lock as a witness, which
//! lets callers keep the lock across segment uploads and pruning.

use std::{collections::BTreeSet, sync::Arc};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::Value;
use snafu::prelude::*;

use super::{
    locks::{SymbolGuard, SymbolLocks},
    record::{DataRef, RecordArena, VersionRecord},
};
use crate::{
    error::{
        ConflictSnafu, SerializeSnafu, StorageCorruptionSnafu, StoreResult, SymbolNotFoundSnafu,
        VersionNotFoundSnafu,
    },
    layout,
    storage::SegmentStore,
};

/// Chain-level view of one version, as reported by listings.
#[derive(Debug, Clone)]
pub(crate) struct ChainEntry {
    pub record: Arc<VersionRecord>,
    pub tombstoned: bool,
}

/// Reads and mutates the version chains of every symbol in a store.
#[derive(Debug)]
pub(crate) struct VersionChain {
    store: Arc<dyn SegmentStore>,
    arena: RecordArena,
    locks: SymbolLocks,
    max_commit_attempts: u32,
}

impl VersionChain {
    pub(crate) fn new(store: Arc<dyn SegmentStore>, max_commit_attempts: u32) -> Self {
        Self {
            store,
            arena: RecordArena::default(),
            locks: SymbolLocks::default(),
            max_commit_attempts: max_commit_attempts.max(1),
        }
    }

    /// Take the write lock of `symbol`.
    pub(crate) async fn lock(&self, symbol: &str) -> SymbolGuard {
        self.locks.lock(symbol).await
    }

    /// Highest committed version of `symbol`, `None` if it has none.
    pub(crate) async fn head(&self, symbol: &str) -> StoreResult<Option<u64>> {
        let key = layout::head_key(symbol);
        match self.store.get(&key).await {
            Ok(bytes) => match layout::decode_head(&bytes) {
                Some(v) => Ok(Some(v)),
                None => StorageCorruptionSnafu {
                    key,
                    detail: "chain head is not a version number",
                }
                .fail(),
            },
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The record of `symbol` at `version`, `None` if it does not exist.
    pub(crate) async fn record(
        &self,
        symbol: &str,
        version: u64,
    ) -> StoreResult<Option<Arc<VersionRecord>>> {
        if let Some(hit) = self.arena.get(symbol, version) {
            return Ok(Some(hit));
        }

        let key = layout::version_key(symbol, version);
        let bytes = match self.store.get(&key).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: VersionRecord = serde_json::from_slice(&bytes).map_err(|e| {
            StorageCorruptionSnafu {
                key: key.as_str(),
                detail: format!("undecodable version record: {e}"),
            }
            .build()
        })?;
        ensure!(
            record.symbol == symbol && record.version == version,
            StorageCorruptionSnafu {
                key,
                detail: format!("record claims to be {}@{}", record.symbol, record.version),
            }
        );

        let record = Arc::new(record);
        self.arena.insert(Arc::clone(&record));
        Ok(Some(record))
    }

    /// Versions of `symbol` whose record physically exists, ascending.
    pub(crate) async fn present_versions(&self, symbol: &str) -> StoreResult<Vec<u64>> {
        let keys = self.store.list(&layout::chain_prefix(symbol)).await?;
        Ok(keys
            .iter()
            .filter_map(|k| layout::parse_version_key(symbol, k))
            .collect())
    }

    /// Tombstoned versions of `symbol`.
    pub(crate) async fn tombstones(&self, symbol: &str) -> StoreResult<BTreeSet<u64>> {
        let keys = self.store.list(&layout::tombstone_prefix(symbol)).await?;
        Ok(keys
            .iter()
            .filter_map(|k| layout::parse_tombstone_key(symbol, k))
            .collect())
    }

    /// Every symbol with a chain head.
    pub(crate) async fn symbols(&self) -> StoreResult<Vec<String>> {
        let keys = self.store.list(layout::VERSIONS_PREFIX).await?;
        Ok(keys
            .iter()
            .filter_map(|k| layout::parse_head_key(k))
            .map(str::to_string)
            .collect())
    }

    /// Highest version of `symbol` that is neither tombstoned nor deleted.
    pub(crate) async fn latest(&self, symbol: &str) -> StoreResult<Arc<VersionRecord>> {
        match self.latest_live(symbol).await? {
            Some(record) => Ok(record),
            None => SymbolNotFoundSnafu { symbol }.fail(),
        }
    }

    async fn latest_live(&self, symbol: &str) -> StoreResult<Option<Arc<VersionRecord>>> {
        let Some(head) = self.head(symbol).await? else {
            return Ok(None);
        };
        let tombstones = self.tombstones(symbol).await?;
        for version in (0..=head).rev() {
            if tombstones.contains(&version) {
                continue;
            }
            if let Some(record) = self.record(symbol, version).await? {
                debug!("resolved {symbol} latest -> {version}");
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Exactly `version` of `symbol`.
    pub(crate) async fn exact(
        &self,
        symbol: &str,
        version: u64,
    ) -> StoreResult<Arc<VersionRecord>> {
        let Some(head) = self.head(symbol).await? else {
            return SymbolNotFoundSnafu { symbol }.fail();
        };
        ensure!(
            version <= head,
            VersionNotFoundSnafu {
                symbol,
                detail: format!("version {version} is beyond the chain head {head}"),
            }
        );
        self.record(symbol, version).await?.context(VersionNotFoundSnafu {
            symbol,
            detail: format!("version {version} has been deleted"),
        })
    }

    /// The newest version of `symbol` created at or before `at`.
    ///
    /// `created_at` is non-decreasing along the chain, so this is a binary
    /// search over the present versions; ties resolve to the higher version.
    pub(crate) async fn as_of(
        &self,
        symbol: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Arc<VersionRecord>> {
        let Some(head) = self.head(symbol).await? else {
            return SymbolNotFoundSnafu { symbol }.fail();
        };
        let present: Vec<u64> = self
            .present_versions(symbol)
            .await?
            .into_iter()
            .filter(|v| *v <= head)
            .collect();

        let not_found = || {
            VersionNotFoundSnafu {
                symbol,
                detail: format!("no version as of {at}"),
            }
            .build()
        };

        let (mut lo, mut hi) = (0, present.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let record = self
                .record(symbol, present[mid])
                .await?
                .ok_or_else(not_found)?;
            if record.created_at <= at {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        let Some(idx) = lo.checked_sub(1) else {
            return Err(not_found());
        };
        let record = self.record(symbol, present[idx]).await?.ok_or_else(not_found)?;
        debug!("resolved {symbol} as of {at} -> {}", record.version);
        Ok(record)
    }

    /// Every present version of `symbol`, newest first.
    pub(crate) async fn entries(&self, symbol: &str) -> StoreResult<Vec<ChainEntry>> {
        let Some(head) = self.head(symbol).await? else {
            return Ok(Vec::new());
        };
        let tombstones = self.tombstones(symbol).await?;
        let mut out = Vec::new();
        for version in self.present_versions(symbol).await?.into_iter().rev() {
            if version > head {
                continue;
            }
            if let Some(record) = self.record(symbol, version).await? {
                out.push(ChainEntry {
                    record,
                    tombstoned: tombstones.contains(&version),
                });
            }
        }
        Ok(out)
    }

    /// The record whose data a read of `record` returns.
    pub(crate) async fn data_source(
        &self,
        record: &Arc<VersionRecord>,
    ) -> StoreResult<Option<Arc<VersionRecord>>> {
        match record.data_version() {
            None => Ok(None),
            Some(v) if v == record.version => Ok(Some(Arc::clone(record))),
            Some(v) => {
                let ancestor = self.record(&record.symbol, v).await?;
                ensure!(
                    ancestor.as_ref().is_some_and(|a| a.data.is_some()),
                    StorageCorruptionSnafu {
                        key: layout::version_key(&record.symbol, v),
                        detail: format!("data ancestor of version {} is missing", record.version),
                    }
                );
                Ok(ancestor)
            }
        }
    }

    /// Commit a new version of the symbol `held` locks.
    ///
    /// Without `data`, the new version exposes the data of the current latest
    /// version (if any) and only carries `metadata`.
    pub(crate) async fn commit(
        &self,
        held: &SymbolGuard,
        data: Option<DataRef>,
        metadata: Option<Value>,
    ) -> StoreResult<Arc<VersionRecord>> {
        let symbol = held.symbol();
        let head_key = layout::head_key(symbol);

        for attempt in 1..=self.max_commit_attempts {
            let head = self.head(symbol).await?;
            let next = match head {
                None => 0,
                Some(h) => h.checked_add(1).context(StorageCorruptionSnafu {
                    key: head_key.as_str(),
                    detail: "version counter overflow",
                })?,
            };

            let previous = match head {
                Some(h) => self.record(symbol, h).await?,
                None => None,
            };
            let inherits_data_from = if data.is_none() {
                self.latest_live(symbol).await?.and_then(|r| r.data_version())
            } else {
                None
            };

            // Keep chain order and time order in agreement.
            let now = Utc::now();
            let created_at = previous.as_ref().map_or(now, |p| now.max(p.created_at));

            let record = VersionRecord {
                symbol: symbol.to_string(),
                version: next,
                created_at,
                data: data.clone(),
                inherits_data_from,
                metadata: metadata.clone(),
            };
            let bytes = serde_json::to_vec(&record).context(SerializeSnafu {
                what: "version record",
            })?;

            match self
                .store
                .put_if_absent(&layout::version_key(symbol, next), Bytes::from(bytes))
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_already_exists() => {
                    warn!(
                        "version {next} of {symbol} already exists (attempt {attempt}); \
                         rolling head forward"
                    );
                    self.advance_head(symbol, next).await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            self.advance_head(symbol, next).await?;

            let record = Arc::new(record);
            self.arena.insert(Arc::clone(&record));
            info!(
                "committed {symbol}@{next} ({})",
                if record.data.is_some() { "data" } else { "metadata only" }
            );
            return Ok(record);
        }

        ConflictSnafu {
            symbol,
            attempts: self.max_commit_attempts,
        }
        .fail()
    }

    /// Move `HEAD` of `symbol` up to `target` unless it is already there.
    async fn advance_head(&self, symbol: &str, target: u64) -> StoreResult<()> {
        let key = layout::head_key(symbol);
        for _ in 0..self.max_commit_attempts {
            let current = self.head(symbol).await?;
            if current.is_some_and(|h| h >= target) {
                return Ok(());
            }
            let expected = current.map(layout::encode_head);
            let next = Bytes::from(layout::encode_head(target));
            let swapped = self
                .store
                .compare_and_swap(&key, expected.as_deref(), next)
                .await?;
            if swapped {
                return Ok(());
            }
        }
        ConflictSnafu {
            symbol,
            attempts: self.max_commit_attempts,
        }
        .fail()
    }

    /// Mark `versions` of `symbol` as tombstoned.
    pub(crate) async fn tombstone(&self, symbol: &str, versions: &[u64]) -> StoreResult<()> {
        for &version in versions {
            self.store
                .put(&layout::tombstone_key(symbol, version), Bytes::new())
                .await?;
        }
        if !versions.is_empty() {
            info!("tombstoned {} version(s) of {symbol}", versions.len());
        }
        Ok(())
    }

    /// Physically delete `version` of `symbol` and its tombstone marker.
    pub(crate) async fn remove(&self, symbol: &str, version: u64) -> StoreResult<()> {
        self.store
            .delete(&layout::version_key(symbol, version))
            .await?;
        self.store
            .delete(&layout::tombstone_key(symbol, version))
            .await?;
        self.arena.evict(symbol, version);
        Ok(())
    }

    /// Delete a data segment blob.
    pub(crate) async fn remove_segment(&self, key: &str) -> StoreResult<()> {
        self.store.delete(key).await?;
        Ok(())
    }
}
