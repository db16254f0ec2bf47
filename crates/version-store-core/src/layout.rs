//! Key layout of a version store inside a [`SegmentStore`](crate::storage::SegmentStore).
//!
//! ```text
//! versions/<symbol>/HEAD                     chain head pointer ("<n>\n")
//! versions/<symbol>/<n:020>.json             immutable version record
//! tombstones/<symbol>/<n:020>                tombstone marker for version n
//! snapshots/<name>.json                      immutable snapshot record
//! data/<symbol>/seg-<blake3>.parquet         data segment
//! ```
//!
//! Version numbers are zero-padded to 20 digits so that lexicographic key
//! order equals numeric order.

use crate::error::{InvalidNameSnafu, StoreResult};

/// Prefix under which every version chain lives.
pub const VERSIONS_PREFIX: &str = "versions/";
/// Prefix under which every snapshot record lives.
pub const SNAPSHOTS_PREFIX: &str = "snapshots/";

const HEAD: &str = "HEAD";
const RECORD_SUFFIX: &str = ".json";
const MAX_NAME_BYTES: usize = 255;

/// Validate a symbol or snapshot name so it can be embedded in a key.
pub(crate) fn check_name(kind: &'static str, name: &str) -> StoreResult<()> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.len() > MAX_NAME_BYTES {
        Some("must be at most 255 bytes")
    } else if name == "." || name == ".." {
        Some("must not be '.' or '..'")
    } else if name
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_control())
    {
        Some("must not contain '/', '\\' or control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => InvalidNameSnafu { kind, name, reason }.fail(),
        None => Ok(()),
    }
}

/// `versions/<symbol>/`
pub(crate) fn chain_prefix(symbol: &str) -> String {
    format!("{VERSIONS_PREFIX}{symbol}/")
}

/// `versions/<symbol>/HEAD`
pub(crate) fn head_key(symbol: &str) -> String {
    format!("{VERSIONS_PREFIX}{symbol}/{HEAD}")
}

/// `versions/<symbol>/<n:020>.json`
pub(crate) fn version_key(symbol: &str, version: u64) -> String {
    format!("{VERSIONS_PREFIX}{symbol}/{version:020}{RECORD_SUFFIX}")
}

/// `tombstones/<symbol>/`
pub(crate) fn tombstone_prefix(symbol: &str) -> String {
    format!("tombstones/{symbol}/")
}

/// `tombstones/<symbol>/<n:020>`
pub(crate) fn tombstone_key(symbol: &str, version: u64) -> String {
    format!("tombstones/{symbol}/{version:020}")
}

/// `snapshots/<name>.json`
pub(crate) fn snapshot_key(name: &str) -> String {
    format!("{SNAPSHOTS_PREFIX}{name}{RECORD_SUFFIX}")
}

/// `data/<symbol>/<segment_id>.parquet`
pub(crate) fn segment_key(symbol: &str, segment_id: &str) -> String {
    format!("data/{symbol}/{segment_id}.parquet")
}

/// Encode a chain head pointer.
pub(crate) fn encode_head(version: u64) -> Vec<u8> {
    format!("{version}\n").into_bytes()
}

/// Decode a chain head pointer; `None` if it is not a number.
pub(crate) fn decode_head(bytes: &[u8]) -> Option<u64> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}

/// Parse the version number out of a record key of `symbol`.
pub(crate) fn parse_version_key(symbol: &str, key: &str) -> Option<u64> {
    key.strip_prefix(&chain_prefix(symbol))?
        .strip_suffix(RECORD_SUFFIX)?
        .parse()
        .ok()
}

/// Parse the version number out of a tombstone key of `symbol`.
pub(crate) fn parse_tombstone_key(symbol: &str, key: &str) -> Option<u64> {
    key.strip_prefix(&tombstone_prefix(symbol))?.parse().ok()
}

/// Extract the symbol from a `versions/<symbol>/HEAD` key.
pub(crate) fn parse_head_key(key: &str) -> Option<&str> {
    key.strip_prefix(VERSIONS_PREFIX)?
        .strip_suffix(HEAD)?
        .strip_suffix('/')
        .filter(|s| !s.is_empty() && !s.contains('/'))
}

/// Extract the snapshot name from a `snapshots/<name>.json` key.
pub(crate) fn parse_snapshot_key(key: &str) -> Option<&str> {
    key.strip_prefix(SNAPSHOTS_PREFIX)?
        .strip_suffix(RECORD_SUFFIX)
        .filter(|s| !s.is_empty() && !s.contains('/'))
}
