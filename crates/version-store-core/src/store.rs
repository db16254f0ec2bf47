//! The version store handle.
//!
//! [`VersionStore`] ties the layers together: segments are encoded and
//! persisted, a version is committed to the symbol's chain, older versions
//! are pruned, and reads resolve a selector, fetch only the segments the
//! request can touch and run the query pipeline over them.
//!
//! The handle is cheap to clone and safe to share between tasks. There is
//! no process-wide default store; callers thread the handle through.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    path::PathBuf,
    sync::Arc,
};

use arrow::{compute::concat_batches, record_batch::RecordBatch};
use bytes::Bytes;
use chrono::Utc;
use futures::future::try_join_all;
use log::{debug, info};
use serde_json::Value;
use snafu::prelude::*;

pub mod batch;
/// Values returned by store operations.
pub mod item;
pub mod options;

pub use batch::{BatchOutcome, CancelHandle};
pub use item::{SweepReport, VersionInfo, VersionedItem};
pub use options::ReadOptions;

use crate::{
    config::StoreConfig,
    error::{
        ConfigSnafu, MetadataTooLargeSnafu, SerializeSnafu, StoreError, StoreResult,
        SymbolNotFoundSnafu, VersionNotFoundSnafu,
    },
    layout,
    query::{self, QueryError, error::ArrowSnafu},
    registry::{
        RetentionCounts, SnapshotOptions, SnapshotRecord, snapshot::SnapshotRegistry,
    },
    segments::{self, SegmentRef},
    storage::{DeadlinePolicy, DeadlineStore, LocalStore, MemoryStore, SegmentStore},
    table::{ColumnTable, ColumnType, schema_from_descriptors},
    version_chain::{DataRef, VersionRecord, VersionSelector, manager::VersionChain},
};

/// Handle to a versioned symbol store.
#[derive(Debug, Clone)]
pub struct VersionStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    backend: Arc<dyn SegmentStore>,
    chain: VersionChain,
    snapshots: SnapshotRegistry,
    config: StoreConfig,
}

impl VersionStore {
    /// Open a store over `backend`.
    ///
    /// Every backend call is put under the configured deadline and retry
    /// policy.
    pub fn open(backend: Arc<dyn SegmentStore>, config: StoreConfig) -> StoreResult<Self> {
        config.validate().context(ConfigSnafu)?;
        let backend: Arc<dyn SegmentStore> = Arc::new(DeadlineStore::new(
            backend,
            DeadlinePolicy::from_config(&config),
        ));
        Ok(Self {
            inner: Arc::new(Inner {
                chain: VersionChain::new(Arc::clone(&backend), config.max_commit_attempts),
                snapshots: SnapshotRegistry::new(Arc::clone(&backend)),
                backend,
                config,
            }),
        })
    }

    /// Open a store persisted under the directory `root`.
    pub fn local(root: impl Into<PathBuf>, config: StoreConfig) -> StoreResult<Self> {
        Self::open(Arc::new(LocalStore::new(root)), config)
    }

    /// Open an empty store that lives only in this process.
    pub fn in_memory(config: StoreConfig) -> StoreResult<Self> {
        Self::open(Arc::new(MemoryStore::new()), config)
    }

    /// The configuration this store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    // ---- writes ----

    /// Write `table` as a new version of `symbol`.
    ///
    /// With `prune_previous`, every older version that no snapshot pins is
    /// tombstoned: it drops out of `latest` but stays readable by number or
    /// timestamp until swept.
    pub async fn write(
        &self,
        symbol: &str,
        table: ColumnTable,
        metadata: Option<Value>,
        prune_previous: bool,
    ) -> StoreResult<VersionedItem> {
        layout::check_name("symbol", symbol)?;
        self.check_metadata(metadata.as_ref())?;

        let rows_per_segment = self.inner.config.rows_per_segment;
        let encoded = segments::encode_segments(symbol, &table, rows_per_segment)?;

        // New segments are unreferenced until the commit, so no sweep of this
        // symbol may run between the first put and the append.
        let chain = &self.inner.chain;
        let held = chain.lock(symbol).await;
        let mut segments = Vec::with_capacity(encoded.len());
        for (seg, bytes) in encoded {
            self.inner.backend.put(&seg.key, bytes).await?;
            segments.push(seg);
        }
        debug!("wrote {} segment(s) for {symbol}", segments.len());

        let data = DataRef {
            columns: table.descriptors(),
            index: table.index().map(str::to_string),
            row_count: table.num_rows() as u64,
            segments,
        };
        let record = chain.commit(&held, Some(data), metadata).await?;
        if prune_previous {
            self.prune(&record).await?;
        }
        Ok(item(&record, Some(table)))
    }

    /// Attach `metadata` to `symbol` as a new version without new data.
    ///
    /// Reads of the new version return the data of the version that was
    /// latest when it was written; on a symbol without data they return none.
    pub async fn write_metadata(
        &self,
        symbol: &str,
        metadata: Value,
        prune_previous: bool,
    ) -> StoreResult<VersionedItem> {
        layout::check_name("symbol", symbol)?;
        self.check_metadata(Some(&metadata))?;
        let chain = &self.inner.chain;
        let held = chain.lock(symbol).await;
        let record = chain.commit(&held, None, Some(metadata)).await?;
        if prune_previous {
            self.prune(&record).await?;
        }
        Ok(item(&record, None))
    }

    fn check_metadata(&self, metadata: Option<&Value>) -> StoreResult<()> {
        let Some(metadata) = metadata else {
            return Ok(());
        };
        let size = serde_json::to_vec(metadata)
            .context(SerializeSnafu { what: "metadata" })?
            .len();
        let limit = self.inner.config.max_metadata_bytes;
        ensure!(size <= limit, MetadataTooLargeSnafu { size, limit });
        Ok(())
    }

    /// Tombstone live versions older than `newest` that no snapshot pins.
    ///
    /// Runs under the symbol's write lock, so a snapshot of the symbol is
    /// either fully persisted or has not yet read its version.
    async fn prune(&self, newest: &VersionRecord) -> StoreResult<()> {
        let symbol = newest.symbol.as_str();
        let retention = self.retention().await?;
        let doomed: Vec<u64> = self
            .inner
            .chain
            .entries(symbol)
            .await?
            .into_iter()
            .filter(|e| {
                let v = e.record.version;
                v < newest.version && !e.tombstoned && !retention.is_pinned(symbol, v)
            })
            .map(|e| e.record.version)
            .collect();
        if !doomed.is_empty() {
            info!("pruning {} version(s) of {symbol}", doomed.len());
        }
        self.inner.chain.tombstone(symbol, &doomed).await
    }

    async fn retention(&self) -> StoreResult<RetentionCounts> {
        let records = self.inner.snapshots.records().await?;
        Ok(RetentionCounts::from_records(&records))
    }

    // ---- reads ----

    async fn resolve(
        &self,
        symbol: &str,
        selector: &VersionSelector,
    ) -> StoreResult<Arc<VersionRecord>> {
        layout::check_name("symbol", symbol)?;
        let chain = &self.inner.chain;
        match selector {
            VersionSelector::Latest => chain.latest(symbol).await,
            VersionSelector::Version(v) => chain.exact(symbol, *v).await,
            VersionSelector::AsOf(at) => chain.as_of(symbol, *at).await,
            VersionSelector::Snapshot(name) => {
                let snapshot = self.inner.snapshots.read(name).await?;
                let version = snapshot.version_of(symbol).context(VersionNotFoundSnafu {
                    symbol,
                    detail: format!("snapshot {name} does not contain the symbol"),
                })?;
                chain.exact(symbol, version).await
            }
        }
    }

    /// Read `symbol` as described by `options`.
    pub async fn read(&self, symbol: &str, options: &ReadOptions) -> StoreResult<VersionedItem> {
        options.validate()?;
        let record = self.resolve(symbol, &options.selector).await?;
        let data = match self.inner.chain.data_source(&record).await? {
            Some(source) => {
                let data = source.data.as_ref().context(VersionNotFoundSnafu {
                    symbol,
                    detail: format!("version {} carries no data", source.version),
                })?;
                let table = self.load(symbol, data, options).await?;
                Some(query::execute(table, &options.plan())?)
            }
            None => None,
        };
        Ok(item(&record, data))
    }

    /// Read the metadata of the version `selector` resolves to.
    ///
    /// The metadata is the one written with exactly that version; a
    /// metadata-only version never reports its data ancestor's metadata.
    pub async fn read_metadata(
        &self,
        symbol: &str,
        selector: impl Into<VersionSelector>,
    ) -> StoreResult<VersionedItem> {
        let record = self.resolve(symbol, &selector.into()).await?;
        Ok(item(&record, None))
    }

    /// Fetch and decode the segments `options` can touch.
    async fn load(
        &self,
        symbol: &str,
        data: &DataRef,
        options: &ReadOptions,
    ) -> StoreResult<ColumnTable> {
        let schema = schema_from_descriptors(&data.columns);

        let mut rows = None;
        let wanted: Vec<SegmentRef> = if let Some(range) = &options.row_range {
            let resolved = range.resolve(data.row_count);
            let wanted = segments::segments_for_rows(&data.segments, &resolved);
            rows = Some(resolved);
            wanted
        } else if let Some(range) = &options.date_range {
            let unit = data
                .index
                .as_deref()
                .and_then(|index| data.columns.iter().find(|c| c.name == index))
                .and_then(|c| match &c.column_type {
                    ColumnType::Timestamp { unit, .. } => Some(*unit),
                    _ => None,
                });
            let Some(unit) = unit else {
                return Err(QueryError::InvalidQuery {
                    reason: "date_range requires an indexed table".to_string(),
                }
                .into());
            };
            let (start, end) = query::pipeline::range_ticks(range, unit)?;
            segments::segments_for_ticks(&data.segments, start, end)
        } else {
            data.segments.clone()
        };
        debug!(
            "reading {} of {} segment(s) of {symbol}",
            wanted.len(),
            data.segments.len()
        );

        let backend = &self.inner.backend;
        let batches = try_join_all(wanted.iter().map(|seg| {
            let schema = &schema;
            async move {
                let bytes: Bytes = backend.get(&seg.key).await?;
                let batch = segments::decode_segment(&seg.key, bytes, schema, seg.row_count)?;
                Ok::<RecordBatch, StoreError>(batch)
            }
        }))
        .await?;

        let mut batch = if batches.is_empty() {
            RecordBatch::new_empty(schema.clone())
        } else {
            concat_batches(&schema, &batches).context(ArrowSnafu {
                context: "joining segments",
            })?
        };

        if let (Some(rows), Some(first)) = (rows, wanted.first()) {
            let skip = (rows.start - first.row_offset.min(rows.start)) as usize;
            let len = (rows.end - rows.start) as usize;
            batch = batch.slice(skip, len.min(batch.num_rows().saturating_sub(skip)));
        }

        Ok(ColumnTable::from_parts(batch, data.index.clone()))
    }

    // ---- listings ----

    /// Versions of one symbol, or of every symbol with a live version.
    ///
    /// A single symbol is listed newest first, tombstoned versions included.
    /// Without a symbol the listings are merged newest first by creation
    /// time; ties order by symbol, then by descending version.
    pub async fn list_versions(&self, symbol: Option<&str>) -> StoreResult<Vec<VersionInfo>> {
        let retention = self.retention().await?;
        let Some(symbol) = symbol else {
            let mut all = Vec::new();
            for symbol in self.list_symbols().await? {
                all.extend(self.versions_of(&symbol, &retention).await?);
            }
            all.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| a.symbol.cmp(&b.symbol))
                    .then_with(|| b.version.cmp(&a.version))
            });
            return Ok(all);
        };
        layout::check_name("symbol", symbol)?;
        self.versions_of(symbol, &retention).await
    }

    async fn versions_of(
        &self,
        symbol: &str,
        retention: &RetentionCounts,
    ) -> StoreResult<Vec<VersionInfo>> {
        let entries = self.inner.chain.entries(symbol).await?;
        Ok(entries
            .into_iter()
            .map(|e| VersionInfo {
                symbol: symbol.to_string(),
                version: e.record.version,
                created_at: e.record.created_at,
                has_data: e.record.data.is_some(),
                deleted: e.tombstoned,
                snapshots: retention.snapshots(symbol, e.record.version).to_vec(),
            })
            .collect())
    }

    /// Symbols with a live version, sorted.
    pub async fn list_symbols(&self) -> StoreResult<Vec<String>> {
        let mut out = Vec::new();
        for symbol in self.inner.chain.symbols().await? {
            if self.has_symbol(&symbol).await? {
                out.push(symbol);
            }
        }
        Ok(out)
    }

    /// True when `symbol` has a live version.
    pub async fn has_symbol(&self, symbol: &str) -> StoreResult<bool> {
        layout::check_name("symbol", symbol)?;
        match self.inner.chain.latest(symbol).await {
            Ok(_) => Ok(true),
            Err(StoreError::SymbolNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ---- snapshots ----

    /// Pin the current state of a set of symbols under `name`.
    ///
    /// Every pinned symbol's write lock is held from the moment its version is
    /// read until the snapshot record is persisted, so no write, prune or
    /// sweep can remove a version in between.
    pub async fn snapshot(
        &self,
        name: &str,
        options: SnapshotOptions,
    ) -> StoreResult<SnapshotRecord> {
        layout::check_name("snapshot", name)?;
        self.check_metadata(options.metadata.as_ref())?;
        if self.inner.snapshots.names().await?.contains(name) {
            return Err(StoreError::SnapshotAlreadyExists {
                name: name.to_string(),
            });
        }

        let explicit = options.symbols.is_some();
        let mut candidates: BTreeSet<String> = match options.symbols {
            Some(symbols) => symbols.into_iter().collect(),
            None => self.inner.chain.symbols().await?.into_iter().collect(),
        };
        candidates.extend(options.versions.keys().cloned());
        for skipped in &options.skip_symbols {
            candidates.remove(skipped);
        }
        for symbol in &candidates {
            layout::check_name("symbol", symbol)?;
        }

        // Sorted acquisition; no other operation holds more than one lock.
        let chain = &self.inner.chain;
        let mut held = Vec::with_capacity(candidates.len());
        let mut versions = BTreeMap::new();
        for symbol in candidates {
            held.push(chain.lock(&symbol).await);
            let version = if let Some(v) = options.versions.get(&symbol) {
                chain.exact(&symbol, *v).await?.version
            } else {
                match chain.latest(&symbol).await {
                    Ok(record) => record.version,
                    Err(StoreError::SymbolNotFound { .. }) if !explicit => continue,
                    Err(e) => return Err(e),
                }
            };
            versions.insert(symbol, version);
        }

        let record = SnapshotRecord {
            name: name.to_string(),
            created_at: Utc::now(),
            metadata: options.metadata,
            versions,
        };
        self.inner.snapshots.create(&record).await?;
        drop(held);
        Ok(record)
    }

    /// Names of all snapshots.
    pub async fn list_snapshots(&self) -> StoreResult<BTreeSet<String>> {
        self.inner.snapshots.names().await
    }

    /// The record of snapshot `name`.
    pub async fn read_snapshot(&self, name: &str) -> StoreResult<SnapshotRecord> {
        layout::check_name("snapshot", name)?;
        self.inner.snapshots.read(name).await
    }

    /// Delete snapshot `name`; the versions it pinned become sweepable.
    pub async fn delete_snapshot(&self, name: &str) -> StoreResult<()> {
        layout::check_name("snapshot", name)?;
        self.inner.snapshots.delete(name).await
    }

    // ---- deletion ----

    /// Tombstone every version of `symbol`. Snapshots keep their pins.
    pub async fn delete(&self, symbol: &str) -> StoreResult<()> {
        layout::check_name("symbol", symbol)?;
        let chain = &self.inner.chain;
        let _guard = chain.lock(symbol).await;
        if chain.head(symbol).await?.is_none() {
            return SymbolNotFoundSnafu { symbol }.fail();
        }
        let live: Vec<u64> = chain
            .entries(symbol)
            .await?
            .into_iter()
            .filter(|e| !e.tombstoned)
            .map(|e| e.record.version)
            .collect();
        chain.tombstone(symbol, &live).await
    }

    /// Tombstone a single version of `symbol`.
    pub async fn delete_version(&self, symbol: &str, version: u64) -> StoreResult<()> {
        layout::check_name("symbol", symbol)?;
        let chain = &self.inner.chain;
        let _guard = chain.lock(symbol).await;
        chain.exact(symbol, version).await?;
        chain.tombstone(symbol, &[version]).await
    }

    /// Physically delete the tombstoned versions of `symbol` that nothing
    /// references any more, together with their data segments.
    ///
    /// A tombstoned version survives while a snapshot pins it or while a
    /// surviving metadata-only version reads its data.
    pub async fn sweep(&self, symbol: &str) -> StoreResult<SweepReport> {
        layout::check_name("symbol", symbol)?;
        let chain = &self.inner.chain;
        let _guard = chain.lock(symbol).await;
        let retention = self.retention().await?;
        let entries = chain.entries(symbol).await?;

        let mut kept: Vec<&Arc<VersionRecord>> = entries
            .iter()
            .filter(|e| {
                !e.tombstoned || retention.is_pinned(symbol, e.record.version)
            })
            .map(|e| &e.record)
            .collect();
        let ancestors: HashSet<u64> = kept.iter().filter_map(|r| r.data_version()).collect();
        kept.extend(
            entries
                .iter()
                .filter(|e| ancestors.contains(&e.record.version))
                .map(|e| &e.record),
        );
        let kept_versions: HashSet<u64> = kept.iter().map(|r| r.version).collect();
        let live_segments: HashSet<&str> = kept.iter().flat_map(|r| r.segment_keys()).collect();

        let mut report = SweepReport {
            symbol: symbol.to_string(),
            ..SweepReport::default()
        };
        let mut doomed_segments = BTreeSet::new();
        for entry in entries.iter().rev() {
            let version = entry.record.version;
            if kept_versions.contains(&version) {
                continue;
            }
            chain.remove(symbol, version).await?;
            report.removed_versions.push(version);
            doomed_segments.extend(
                entry
                    .record
                    .segment_keys()
                    .filter(|k| !live_segments.contains(k))
                    .map(str::to_string),
            );
        }
        // Records go first so an interrupted sweep leaves only orphan blobs.
        for key in doomed_segments {
            chain.remove_segment(&key).await?;
            report.removed_segments.push(key);
        }

        info!(
            "swept {symbol}: {} version(s), {} segment(s)",
            report.removed_versions.len(),
            report.removed_segments.len()
        );
        Ok(report)
    }
}

fn item(record: &VersionRecord, data: Option<ColumnTable>) -> VersionedItem {
    VersionedItem {
        symbol: record.symbol.clone(),
        version: record.version,
        created_at: record.created_at,
        metadata: record.metadata.clone(),
        data,
    }
}
