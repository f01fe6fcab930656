//! Per-(preparation, department) write serialization

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use prep_shared::Department;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// The unit of serialization for ledger writes
pub type StockKey = (Uuid, Department);

/// Hands out one async mutex per stock key.
///
/// Guards for several keys are always taken in key order, so two writers
/// touching overlapping sets of preparations cannot deadlock.
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<StockKey, Arc<AsyncMutex<()>>>>,
}

/// Held guards; dropping releases every key
pub struct KeyGuards {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, key: StockKey) -> Arc<AsyncMutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub async fn acquire(&self, key: StockKey) -> KeyGuards {
        self.acquire_many([key]).await
    }

    /// Lock every distinct key, in sorted order
    pub async fn acquire_many<I>(&self, keys: I) -> KeyGuards
    where
        I: IntoIterator<Item = StockKey>,
    {
        let ordered: BTreeSet<StockKey> = keys.into_iter().collect();
        let mut guards = Vec::with_capacity(ordered.len());
        for key in ordered {
            guards.push(self.handle(key).lock_owned().await);
        }
        KeyGuards { _guards: guards }
    }
}
