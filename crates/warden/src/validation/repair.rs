//! Replacement lookup and repair serialization
//!
//! Repairs go through an external updater that searches for a replacement by
//! content hash. Attempts are serialized by the repair lock: one process-wide
//! lock by default so the upstream service sees at most one request at a
//! time, or per-hash locks when only deduplication is wanted. The lock is
//! held around the updater call and nothing else.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};

use crate::config::RepairSerialization;
use crate::model::{Archive, Hash};

/// Outcome of a replacement search
#[derive(Debug, Clone)]
pub enum Replacement {
    /// A replacement exists and was adopted immediately
    Found(Archive),
    /// The request was accepted; the replacement has not materialized yet
    Accepted,
    NotFound,
}

/// External collaborator that finds replacement archives by content hash
#[async_trait]
pub trait ArchiveUpdater: Send + Sync {
    async fn find_replacement(&self, hash: Hash) -> anyhow::Result<Replacement>;
}

/// Serializes repair attempts; created once at service start
pub(crate) struct RepairLock {
    inner: LockInner,
}

enum LockInner {
    Global(Mutex<()>),
    PerHash(std::sync::Mutex<HashMap<Hash, Arc<Mutex<()>>>>),
}

/// Held for the duration of one updater call; released on every exit path
pub(crate) struct RepairGuard<'a> {
    _held: HeldLock<'a>,
}

enum HeldLock<'a> {
    Global(MutexGuard<'a, ()>),
    PerHash(OwnedMutexGuard<()>),
}

impl RepairLock {
    pub fn new(mode: RepairSerialization) -> Self {
        let inner = match mode {
            RepairSerialization::Global => LockInner::Global(Mutex::new(())),
            RepairSerialization::PerHash => LockInner::PerHash(std::sync::Mutex::new(
                HashMap::new(),
            )),
        };
        Self { inner }
    }

    pub async fn acquire(&self, hash: Hash) -> RepairGuard<'_> {
        let held = match &self.inner {
            LockInner::Global(lock) => HeldLock::Global(lock.lock().await),
            LockInner::PerHash(slots) => {
                let slot = {
                    let mut slots = slots.lock().unwrap();
                    Arc::clone(slots.entry(hash).or_default())
                };
                HeldLock::PerHash(slot.lock_owned().await)
            }
        };
        RepairGuard { _held: held }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn overlap_under(lock: Arc<RepairLock>, hashes: Vec<Hash>) -> usize {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for hash in hashes {
            let lock = Arc::clone(&lock);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let _guard = lock.acquire(hash).await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        peak.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn global_mode_serializes_distinct_hashes() {
        let lock = Arc::new(RepairLock::new(RepairSerialization::Global));
        let hashes = (0..4u64).map(Hash::from_u64).collect();
        assert_eq!(overlap_under(lock, hashes).await, 1);
    }

    #[tokio::test]
    async fn per_hash_mode_serializes_only_same_hash() {
        let lock = Arc::new(RepairLock::new(RepairSerialization::PerHash));
        let same = vec![Hash::from_u64(7); 4];
        assert_eq!(overlap_under(Arc::clone(&lock), same).await, 1);

        let distinct = (0..4u64).map(Hash::from_u64).collect();
        assert!(overlap_under(lock, distinct).await > 1);
    }
}
