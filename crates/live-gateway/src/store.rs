//! In-memory frame store and per-key locks
//!
//! Stateful outputters do read-modify-write cycles against the store. Those
//! cycles are serialized per key through [`KeyedLocks`]; distinct keys never
//! contend on a shared lock while awaiting.

use async_trait::async_trait;
use live_pipeline_core::prelude::*;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tokio::sync::OwnedMutexGuard;

const SHARDS: usize = 16;
const PRUNE_THRESHOLD: usize = 1024;

/// Sharded in-memory [`FrameStore`]
///
/// Entries are never evicted.
pub struct MemoryFrameStore {
    shards: Vec<RwLock<HashMap<String, Frame>>>,
}

impl MemoryFrameStore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &str) -> &RwLock<HashMap<String, Frame>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARDS]
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryFrameStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameStore for MemoryFrameStore {
    async fn get(&self, key: &str) -> Result<Option<Frame>> {
        let shard = self.shard(key).read().unwrap_or_else(PoisonError::into_inner);
        Ok(shard.get(key).cloned())
    }

    async fn set(&self, key: &str, frame: Frame) -> Result<()> {
        let mut shard = self.shard(key).write().unwrap_or_else(PoisonError::into_inner);
        shard.insert(key.to_string(), frame);
        Ok(())
    }
}

/// Async mutex per key, created on demand
///
/// Entries hold weak references; locks nobody holds or waits for are pruned
/// once the table grows past a threshold.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            match locks.get(key).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    if locks.len() >= PRUNE_THRESHOLD {
                        locks.retain(|_, weak| weak.strong_count() > 0);
                    }
                    let lock = Arc::new(tokio::sync::Mutex::new(()));
                    locks.insert(key.to_string(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    /// Number of tracked keys, including not yet pruned ones
    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame(v: f64) -> Frame {
        Frame::new("f", vec![Field::new("v", FieldValues::Number(vec![Some(v)]))]).unwrap()
    }

    #[tokio::test]
    async fn test_get_set() {
        let store = MemoryFrameStore::new();
        assert!(store.get("a").await.unwrap().is_none());

        store.set("a", frame(1.0)).await.unwrap();
        store.set("a", frame(2.0)).await.unwrap();
        store.set("b", frame(3.0)).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(frame(2.0)));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let guard = locks.lock("k").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("k").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_contend() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_released_locks_are_pruned() {
        let locks = KeyedLocks::new();
        for i in 0..PRUNE_THRESHOLD + 10 {
            drop(locks.lock(&format!("key-{i}")).await);
        }
        assert!(locks.tracked() < PRUNE_THRESHOLD);
    }
}
