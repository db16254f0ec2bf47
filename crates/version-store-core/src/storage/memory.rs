//! In-process backend backed by an ordered map.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use bytes::Bytes;

use super::{
    SegmentStore, StorageResult, validate_key,
    error::{AlreadyExistsSnafu, NotFoundSnafu},
};

/// A [`SegmentStore`] that keeps every blob in memory.
///
/// Contents are lost when the store is dropped. Useful for tests and for
/// scratch stores that never need to outlive the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<BTreeMap<String, Bytes>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs().len()
    }

    /// True when the store holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.blobs().is_empty()
    }

    fn blobs(&self) -> MutexGuard<'_, BTreeMap<String, Bytes>> {
        // Every critical section leaves the map consistent, so a poisoned
        // lock is still safe to use.
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SegmentStore for MemoryStore {
    async fn put(&self, key: &str, value: Bytes) -> StorageResult<()> {
        validate_key(key)?;
        self.blobs().insert(key.to_string(), value);
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: Bytes) -> StorageResult<()> {
        validate_key(key)?;
        let mut blobs = self.blobs();
        if blobs.contains_key(key) {
            return AlreadyExistsSnafu { key }.fail();
        }
        blobs.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        validate_key(key)?;
        match self.blobs().get(key) {
            Some(value) => Ok(value.clone()),
            None => NotFoundSnafu { key }.fail(),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.blobs().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .blobs()
            .range(prefix.to_string()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Bytes,
    ) -> StorageResult<bool> {
        validate_key(key)?;
        let mut blobs = self.blobs();
        if blobs.get(key).map(|b| b.as_ref()) != expected {
            return Ok(false);
        }
        blobs.insert(key.to_string(), new);
        Ok(true)
    }
}
