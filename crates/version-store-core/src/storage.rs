//! Keyed blob persistence.
//!
//! Everything the version store persists goes through the [`SegmentStore`]
//! trait: version records, chain-head pointers, tombstone markers, snapshot
//! records and Parquet data segments. The trait is deliberately narrow
//! (put/get/list/delete plus a create-only put and a compare-and-swap) so
//! that new backends can be added without touching versioning logic.
//!
//! Backends shipped with this crate:
//!
//! - [`LocalStore`]: one file per key under a root directory, written with
//!   write-then-rename semantics.
//! - [`MemoryStore`]: an in-process ordered map.
//! - [`DeadlineStore`]: a wrapper that puts every call under a deadline and
//!   retries idempotent calls with exponential backoff.
//!
//! Keys are `/`-separated relative paths such as
//! `versions/AAPL/00000000000000000003.json`; see [`crate::layout`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

pub mod deadline;
/// Storage-layer errors.
pub mod error;
pub mod local;
pub mod memory;

pub use deadline::{DeadlinePolicy, DeadlineStore};
pub use error::{BackendError, StorageError};
pub use local::LocalStore;
pub use memory::MemoryStore;

use error::InvalidKeySnafu;

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Abstract keyed blob store.
///
/// Implementations must be safe to share between tasks. All operations are
/// asynchronous because backend I/O is the only suspension point of the
/// version store.
#[async_trait]
pub trait SegmentStore: Send + Sync + std::fmt::Debug {
    /// Store `value` under `key`, replacing any previous blob atomically.
    async fn put(&self, key: &str, value: Bytes) -> StorageResult<()>;

    /// Store `value` under `key` only if no blob exists there yet.
    ///
    /// Fails with [`StorageError::AlreadyExists`] otherwise. This is the
    /// primitive that gives version records per-number uniqueness.
    async fn put_if_absent(&self, key: &str, value: Bytes) -> StorageResult<()>;

    /// Fetch the blob stored under `key`.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Remove the blob under `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Return every key starting with `prefix`, sorted ascending.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Replace the blob under `key` with `new` if its current content equals
    /// `expected` (`None` meaning "key absent").
    ///
    /// Returns `Ok(false)` when the current content did not match.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Bytes,
    ) -> StorageResult<bool>;
}

#[async_trait]
impl<T> SegmentStore for Arc<T>
where
    T: SegmentStore + ?Sized,
{
    async fn put(&self, key: &str, value: Bytes) -> StorageResult<()> {
        (**self).put(key, value).await
    }

    async fn put_if_absent(&self, key: &str, value: Bytes) -> StorageResult<()> {
        (**self).put_if_absent(key, value).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        (**self).delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        (**self).list(prefix).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Bytes,
    ) -> StorageResult<bool> {
        (**self).compare_and_swap(key, expected, new).await
    }
}

/// Check that `key` is a well-formed relative key.
///
/// Every `/`-separated component must be non-empty and must not be `.` or
/// `..`; backslashes and NUL bytes are rejected outright.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    let reason = if key.is_empty() {
        Some("key is empty")
    } else if key.contains('\\') || key.contains('\0') {
        Some("key contains a backslash or NUL byte")
    } else if key
        .split('/')
        .any(|part| part.is_empty() || part == "." || part == "..")
    {
        Some("key has an empty, '.' or '..' component")
    } else {
        None
    };

    match reason {
        Some(reason) => InvalidKeySnafu {
            key: key.to_string(),
            reason: reason.to_string(),
        }
        .fail(),
        None => Ok(()),
    }
}
