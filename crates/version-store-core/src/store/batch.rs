//! Concurrent multi-symbol reads.
//!
//! Each symbol runs its own resolve + pipeline task on the runtime, at most
//! `batch_concurrency` at a time. Failures stay with their symbol: the batch
//! itself never fails.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use log::{debug, info};
use tokio::{sync::Semaphore, task::JoinSet};

use super::{ReadOptions, VersionStore, VersionedItem};
use crate::error::{CancelledSnafu, StoreError, StoreResult, WorkerSnafu};

/// Cooperative cancellation flag for batch reads.
///
/// Clones share the flag. Cancelling stops new per-symbol reads from
/// starting; reads already running complete normally.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// A handle that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// True once [`cancel`](Self::cancel) was called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Outcome of one symbol of a batch read.
#[derive(Debug)]
pub struct BatchOutcome {
    /// The symbol as passed to the batch.
    pub symbol: String,
    /// The read result for that symbol.
    pub result: StoreResult<VersionedItem>,
}

impl BatchOutcome {
    /// True when the symbol was read successfully.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// The item, if the read succeeded.
    pub fn item(&self) -> Option<&VersionedItem> {
        self.result.as_ref().ok()
    }

    /// The error, if the read failed.
    pub fn error(&self) -> Option<&StoreError> {
        self.result.as_ref().err()
    }
}

impl VersionStore {
    /// Read every symbol in `symbols` with the same `options`.
    ///
    /// Outcomes come back in input order, one per symbol.
    pub async fn read_batch<I, S>(&self, symbols: I, options: &ReadOptions) -> Vec<BatchOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.read_batch_with_cancel(symbols, options, &CancelHandle::new())
            .await
    }

    /// Like [`read_batch`](Self::read_batch), but stops starting new reads
    /// once `cancel` fires. Symbols that never started report
    /// [`StoreError::Cancelled`].
    pub async fn read_batch_with_cancel<I, S>(
        &self,
        symbols: I,
        options: &ReadOptions,
        cancel: &CancelHandle,
    ) -> Vec<BatchOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let symbols: Vec<String> = symbols.into_iter().map(Into::into).collect();
        let options = Arc::new(options.clone());
        let permits = Arc::new(Semaphore::new(self.config().batch_concurrency.max(1)));
        let mut results: Vec<Option<StoreResult<VersionedItem>>> =
            symbols.iter().map(|_| None).collect();
        let mut tasks = JoinSet::new();

        for (idx, symbol) in symbols.iter().enumerate() {
            if cancel.is_cancelled() {
                results[idx] = Some(CancelledSnafu { symbol }.fail());
                continue;
            }
            let permit = match Arc::clone(&permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    results[idx] = Some(
                        WorkerSnafu {
                            symbol,
                            message: e.to_string(),
                        }
                        .fail(),
                    );
                    continue;
                }
            };
            // Cancellation may have fired while waiting for a slot.
            if cancel.is_cancelled() {
                results[idx] = Some(CancelledSnafu { symbol }.fail());
                continue;
            }

            let store = self.clone();
            let options = Arc::clone(&options);
            let symbol = symbol.clone();
            tasks.spawn(async move {
                let _permit = permit;
                debug!("batch read of {symbol} started");
                (idx, store.read(&symbol, &options).await)
            });
        }

        let mut failed_tasks = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => results[idx] = Some(result),
                Err(_) => failed_tasks += 1,
            }
        }

        let outcomes: Vec<BatchOutcome> = symbols
            .into_iter()
            .zip(results)
            .map(|(symbol, result)| {
                let result = result.unwrap_or_else(|| {
                    WorkerSnafu {
                        symbol: symbol.as_str(),
                        message: "read task panicked or was aborted",
                    }
                    .fail()
                });
                BatchOutcome { symbol, result }
            })
            .collect();

        info!(
            "batch read of {} symbol(s): {} ok, {} failed task(s)",
            outcomes.len(),
            outcomes.iter().filter(|o| o.is_ok()).count(),
            failed_tasks
        );
        outcomes
    }
}
