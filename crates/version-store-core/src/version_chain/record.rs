//! Persisted version records and their in-memory arena.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{segments::SegmentRef, table::ColumnDescriptor};

/// Handle to the column data of a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRef {
    /// Columns in table order.
    pub columns: Vec<ColumnDescriptor>,
    /// Name of the index column, if the table has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    /// Total number of rows across all segments.
    pub row_count: u64,
    /// Segments in row order.
    pub segments: Vec<SegmentRef>,
}

/// One immutable entry of a version chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Symbol this version belongs to.
    pub symbol: String,
    /// Position in the chain, starting at 0.
    pub version: u64,
    /// Commit time; non-decreasing along the chain.
    pub created_at: DateTime<Utc>,
    /// Column data written with this version; `None` for metadata-only
    /// versions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataRef>,
    /// For metadata-only versions: the version whose data reads expose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherits_data_from: Option<u64>,
    /// User metadata attached to exactly this version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl VersionRecord {
    /// The version whose data a read of this version returns, if any.
    pub fn data_version(&self) -> Option<u64> {
        if self.data.is_some() {
            Some(self.version)
        } else {
            self.inherits_data_from
        }
    }

    /// Segment keys owned by this version.
    pub(crate) fn segment_keys(&self) -> impl Iterator<Item = &str> {
        self.data
            .iter()
            .flat_map(|d| d.segments.iter().map(|s| s.key.as_str()))
    }
}

/// Arena of decoded records keyed by `(symbol, version)`.
///
/// Records are immutable once committed, so entries never go stale; they are
/// only evicted when a sweep physically deletes the version.
#[derive(Debug, Default)]
pub(crate) struct RecordArena {
    records: Mutex<HashMap<(String, u64), Arc<VersionRecord>>>,
}

impl RecordArena {
    fn guard(&self) -> MutexGuard<'_, HashMap<(String, u64), Arc<VersionRecord>>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn get(&self, symbol: &str, version: u64) -> Option<Arc<VersionRecord>> {
        self.guard().get(&(symbol.to_string(), version)).cloned()
    }

    pub(crate) fn insert(&self, record: Arc<VersionRecord>) {
        self.guard()
            .insert((record.symbol.clone(), record.version), record);
    }

    pub(crate) fn evict(&self, symbol: &str, version: u64) {
        self.guard().remove(&(symbol.to_string(), version));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(version: u64, data: Option<DataRef>, inherits: Option<u64>) -> VersionRecord {
        VersionRecord {
            symbol: "s".to_string(),
            version,
            created_at: Utc.timestamp_opt(1_700_000_000, 0).single().expect("ts"),
            data,
            inherits_data_from: inherits,
            metadata: None,
        }
    }

    #[test]
    fn data_version_follows_inheritance() {
        let data = DataRef {
            columns: vec![],
            index: None,
            row_count: 0,
            segments: vec![],
        };
        assert_eq!(record(3, Some(data), None).data_version(), Some(3));
        assert_eq!(record(4, None, Some(3)).data_version(), Some(3));
        assert_eq!(record(0, None, None).data_version(), None);
    }

    #[test]
    fn metadata_only_records_omit_empty_fields() {
        let json = serde_json::to_value(record(1, None, Some(0))).expect("serialize");
        assert_eq!(json.get("data"), None);
        assert_eq!(json.get("metadata"), None);
        assert_eq!(json["inherits_data_from"], 0);
    }

    #[test]
    fn arena_evicts_by_key() {
        let arena = RecordArena::default();
        arena.insert(Arc::new(record(2, None, None)));
        assert!(arena.get("s", 2).is_some());
        assert!(arena.get("s", 1).is_none());
        arena.evict("s", 2);
        assert!(arena.get("s", 2).is_none());
    }
}
