//! Deadline and bounded-retry wrapper for any [`SegmentStore`].

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use log::warn;
use tokio::time::{sleep, timeout};

use super::{SegmentStore, StorageResult, error::TimeoutSnafu};
use crate::config::StoreConfig;

/// Deadline and retry settings applied by [`DeadlineStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlinePolicy {
    /// Deadline for a single backend call.
    pub timeout: Duration,
    /// How many times an idempotent call is reissued after a timeout.
    pub max_retries: u32,
    /// Sleep before the first retry; doubled for each following retry.
    pub initial_backoff: Duration,
}

impl DeadlinePolicy {
    /// Build the policy from the `io_*` settings of a [`StoreConfig`].
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.io_timeout_ms),
            max_retries: config.io_max_retries,
            initial_backoff: Duration::from_millis(config.io_retry_backoff_ms),
        }
    }
}

impl Default for DeadlinePolicy {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

/// Wraps a store so that no call can hang past its deadline.
///
/// `put`, `get`, `delete` and `list` are idempotent and are retried with
/// exponential backoff; `put_if_absent` and `compare_and_swap` may have taken
/// effect before the deadline fired, so they fail on the first timeout and
/// leave recovery to the caller. Exhausted retries surface as
/// [`StorageError::Timeout`](super::StorageError::Timeout).
#[derive(Debug)]
pub struct DeadlineStore<S> {
    inner: S,
    policy: DeadlinePolicy,
}

impl<S: SegmentStore> DeadlineStore<S> {
    /// Wrap `inner` with `policy`.
    pub fn new(inner: S, policy: DeadlinePolicy) -> Self {
        Self { inner, policy }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn retrying<T, F, Fut>(
        &self,
        op: &'static str,
        key: &str,
        mut call: F,
    ) -> StorageResult<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = StorageResult<T>> + Send,
        T: Send,
    {
        let mut attempts = 0u32;
        let mut backoff = self.policy.initial_backoff;
        loop {
            attempts += 1;
            match timeout(self.policy.timeout, call()).await {
                Ok(Err(e)) if e.is_retryable() => {}
                Ok(result) => return result,
                Err(_elapsed) => {}
            }

            if attempts > self.policy.max_retries {
                return TimeoutSnafu { op, key, attempts }.fail();
            }
            warn!(
                "storage {op} on {key} timed out (attempt {attempts}); retrying in {backoff:?}"
            );
            sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
        }
    }

    async fn once<T, Fut>(&self, op: &'static str, key: &str, call: Fut) -> StorageResult<T>
    where
        Fut: Future<Output = StorageResult<T>> + Send,
    {
        match timeout(self.policy.timeout, call).await {
            Ok(result) => result,
            Err(_) => TimeoutSnafu {
                op,
                key,
                attempts: 1u32,
            }
            .fail(),
        }
    }
}

#[async_trait]
impl<S: SegmentStore> SegmentStore for DeadlineStore<S> {
    async fn put(&self, key: &str, value: Bytes) -> StorageResult<()> {
        self.retrying("put", key, || self.inner.put(key, value.clone()))
            .await
    }

    async fn put_if_absent(&self, key: &str, value: Bytes) -> StorageResult<()> {
        self.once("put_if_absent", key, self.inner.put_if_absent(key, value))
            .await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.retrying("get", key, || self.inner.get(key)).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.retrying("delete", key, || self.inner.delete(key)).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.retrying("list", prefix, || self.inner.list(prefix))
            .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Bytes,
    ) -> StorageResult<bool> {
        self.once(
            "compare_and_swap",
            key,
            self.inner.compare_and_swap(key, expected, new),
        )
        .await
    }
}
