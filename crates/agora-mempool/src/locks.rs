//! Per-transaction admission locks.
//!
//! Admission is serialized per transaction id: two submissions of the same
//! tx contend on one mutex while unrelated ids admit in parallel. Lock
//! acquisition is bounded by a timeout so a stalled admission cannot
//! retain a mutex forever. The map is size-bounded by the maintenance
//! sweep, which drops locks whose transaction is no longer in the pool.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use agora_core::error::MempoolError;
use agora_core::types::Hash256;

/// Bounded map of per-txid admission mutexes.
#[derive(Default)]
pub struct TxLockMap {
    locks: DashMap<Hash256, Arc<Mutex<()>>>,
}

impl TxLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the admission lock for `txid`, waiting at most `timeout`.
    pub async fn acquire(
        &self,
        txid: &Hash256,
        timeout: Duration,
    ) -> Result<OwnedMutexGuard<()>, MempoolError> {
        let lock = self
            .locks
            .entry(*txid)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| MempoolError::LockTimeout(txid.to_string()))
    }

    /// Drop the lock entries for ids no longer present in the pool.
    ///
    /// A guard still held elsewhere keeps its mutex alive through the
    /// `Arc`; removal from the map only stops new waiters from piling on.
    pub fn evict_except(&self, keep: impl Fn(&Hash256) -> bool) {
        self.locks.retain(|txid, _| keep(txid));
    }

    /// Number of tracked locks.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
