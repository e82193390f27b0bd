// ============================================================================
// Record Locks
// ============================================================================
//
// Pessimistic per-record locks held in the cache backend. Each transaction
// owns one LockSet; locks are taken in ascending key order and released on
// commit, rollback or drop.
//
// ============================================================================

use crate::core::{Key, Record, Result};
use crate::storage::CacheStore;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::time::Duration;

/// Lock resource name for a record.
pub fn resource(table: &str, key: &str) -> String {
    format!("{}:{}", table, key)
}

/// A lock held by a transaction, with the record read under it.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveLock {
    pub resource: String,
    /// Owner name the cache holds the lock under.
    pub owner: String,
    pub table: String,
    pub key: Key,
    pub data: Option<Record>,
}

#[derive(Debug, Clone)]
pub struct LockSet {
    owner: String,
    locks: BTreeMap<String, ActiveLock>,
}

impl LockSet {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            locks: BTreeMap::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn holds(&self, table: &str, key: &str) -> bool {
        self.locks.contains_key(&resource(table, key))
    }

    /// Record captured when the lock was taken (or last refreshed).
    pub fn snapshot(&self, table: &str, key: &str) -> Option<&Record> {
        self.locks
            .get(&resource(table, key))
            .and_then(|lock| lock.data.as_ref())
    }

    pub fn set_snapshot(&mut self, table: &str, key: &str, data: Option<Record>) {
        if let Some(lock) = self.locks.get_mut(&resource(table, key)) {
            lock.data = data;
        }
    }

    /// Locks every key of `table` not already held, in ascending order.
    /// Returns the keys this call acquired.
    pub async fn acquire(
        &mut self,
        cache: &dyn CacheStore,
        table: &str,
        keys: &[Key],
        ttl: Duration,
        wait: Duration,
    ) -> Result<Vec<Key>> {
        let mut pending: Vec<&Key> = keys.iter().filter(|k| !self.holds(table, k)).collect();
        pending.sort();
        pending.dedup();

        let mut acquired = Vec::with_capacity(pending.len());
        for key in pending {
            let name = resource(table, key);
            if let Err(e) = cache.lock(&name, &self.owner, ttl, wait).await {
                // Give back what this call took before failing.
                self.release_keys(cache, table, &acquired).await;
                return Err(e);
            }
            self.locks.insert(
                name.clone(),
                ActiveLock {
                    resource: name,
                    owner: self.owner.clone(),
                    table: table.to_string(),
                    key: key.clone(),
                    data: None,
                },
            );
            acquired.push(key.clone());
        }
        if !acquired.is_empty() {
            tracing::debug!(owner = %self.owner, table, keys = ?acquired, "locks acquired");
        }
        Ok(acquired)
    }

    /// Releases the given keys of `table`. Failures are logged.
    pub async fn release_keys(&mut self, cache: &dyn CacheStore, table: &str, keys: &[Key]) {
        for key in keys {
            if let Some(lock) = self.locks.remove(&resource(table, key)) {
                release(cache, &lock.resource, &lock.owner).await;
            }
        }
    }

    /// Releases every held lock. Failures are logged.
    pub async fn release_all(&mut self, cache: &dyn CacheStore) {
        let locks = std::mem::take(&mut self.locks);
        join_all(
            locks
                .values()
                .map(|lock| release(cache, &lock.resource, &lock.owner)),
        )
        .await;
        if !locks.is_empty() {
            tracing::debug!(owner = %self.owner, released = locks.len(), "locks released");
        }
    }

    /// Takes over every lock of `other`. The cache keeps them under their
    /// original owner name until release.
    pub fn absorb(&mut self, mut other: LockSet) {
        for (name, lock) in std::mem::take(&mut other.locks) {
            self.locks.entry(name).or_insert(lock);
        }
    }

    /// `(resource, owner)` pairs, emptying the set.
    pub fn take(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.locks)
            .into_values()
            .map(|lock| (lock.resource, lock.owner))
            .collect()
    }
}

pub(crate) async fn release(cache: &dyn CacheStore, name: &str, owner: &str) {
    match cache.unlock(name, owner).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!(resource = name, owner, "lock was no longer held"),
        Err(e) => tracing::warn!(resource = name, owner, error = %e, "failed to release lock"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryCache;

    const TTL: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_acquire_reports_only_new_keys() {
        let cache = MemoryCache::new();
        let mut locks = LockSet::new("tx1");
        let got = locks
            .acquire(&cache, "users", &["b".into(), "a".into()], TTL, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(got, vec!["a".to_string(), "b".to_string()]);

        let got = locks
            .acquire(&cache, "users", &["a".into(), "c".into()], TTL, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(got, vec!["c".to_string()]);
        assert_eq!(locks.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_acquire_gives_back_partial_locks() {
        let cache = MemoryCache::new();
        let mut other = LockSet::new("tx2");
        other
            .acquire(&cache, "users", &["b".into()], TTL, Duration::ZERO)
            .await
            .unwrap();

        let mut locks = LockSet::new("tx1");
        let err = locks
            .acquire(&cache, "users", &["a".into(), "b".into()], TTL, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "BACKEND_ERROR");
        assert!(locks.is_empty());
        assert_eq!(cache.locked().await.unwrap(), vec!["users:b".to_string()]);
    }

    #[tokio::test]
    async fn test_release_and_absorb() {
        let cache = MemoryCache::new();
        let mut donor = LockSet::new("tx2");
        donor
            .acquire(&cache, "users", &["a".into()], TTL, Duration::ZERO)
            .await
            .unwrap();
        let mut locks = LockSet::new("tx1");
        locks.absorb(donor);
        assert!(locks.holds("users", "a"));

        locks.release_all(&cache).await;
        assert!(cache.locked().await.unwrap().is_empty());
    }
}
