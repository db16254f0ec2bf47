//! Per-symbol write locks.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

/// Registry of one async mutex per symbol.
///
/// Writers to the same symbol queue on its mutex; writers to different
/// symbols never contend. The registry map itself is only held for the
/// lookup, never across an await point. An entry lives only while some task
/// holds or waits for it.
#[derive(Debug, Default)]
pub(crate) struct SymbolLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl SymbolLocks {
    pub(crate) async fn lock(&self, symbol: &str) -> SymbolGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(symbol.to_string()).or_default())
        };
        SymbolGuard {
            symbol: symbol.to_string(),
            guard: Some(lock.lock_owned().await),
            locks: Arc::clone(&self.locks),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Exclusive hold on one symbol's write lock.
///
/// Dropping the guard releases the lock and forgets the symbol's mutex when
/// no other task is queued on it.
#[derive(Debug)]
pub(crate) struct SymbolGuard {
    symbol: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<LockMap>>,
}

impl SymbolGuard {
    /// The symbol this guard locks.
    pub(crate) fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl Drop for SymbolGuard {
    fn drop(&mut self) {
        // Waiters clone the Arc under the map lock, so holding it here means
        // the count below cannot grow between the check and the removal.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(self.guard.take());
        if locks
            .get(&self.symbol)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.symbol);
        }
    }
}
