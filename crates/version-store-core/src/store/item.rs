use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::table::ColumnTable;

/// Result of a read or write: one resolved version of a symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedItem {
    /// Symbol the version belongs to.
    pub symbol: String,
    /// Resolved version number.
    pub version: u64,
    /// Commit time of the version.
    pub created_at: DateTime<Utc>,
    /// Metadata attached to exactly this version.
    pub metadata: Option<Value>,
    /// Column data after the query pipeline ran; `None` for metadata reads
    /// and for versions that never had data.
    pub data: Option<ColumnTable>,
}

/// One entry of [`VersionStore::list_versions`](super::VersionStore::list_versions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    /// Symbol the version belongs to.
    pub symbol: String,
    /// Version number.
    pub version: u64,
    /// Commit time.
    pub created_at: DateTime<Utc>,
    /// True when the version was written with its own data.
    pub has_data: bool,
    /// True when the version is tombstoned.
    pub deleted: bool,
    /// Snapshots pinning this version, sorted by name.
    pub snapshots: Vec<String>,
}

/// What a sweep physically removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Swept symbol.
    pub symbol: String,
    /// Version records deleted, ascending.
    pub removed_versions: Vec<u64>,
    /// Data segment keys deleted.
    pub removed_segments: Vec<String>,
}
