use crate::core::{BackendKind, DbError, Key, Record, Result};
use crate::storage::CacheStore;
use async_trait::async_trait;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

const DEFAULT_CAPACITY: usize = 10_000;

struct CacheEntry {
    record: Record,
    expires: Option<Instant>,
}

struct LockEntry {
    owner: String,
    expires: Instant,
}

/// LRU record cache with per-entry TTL and a lock table.
///
/// Lock waiters are woken through a [`Notify`] on every release; a lock whose
/// TTL elapsed counts as free.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Option<Duration>,
    locks: Mutex<HashMap<String, LockEntry>>,
    released: Arc<Notify>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, None)
    }

    /// `capacity` of zero falls back to the default.
    pub fn with_capacity(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .or_else(|| NonZeroUsize::new(DEFAULT_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            locks: Mutex::new(HashMap::new()),
            released: Arc::new(Notify::new()),
        }
    }

    fn entry_key(table: &str, key: &str) -> String {
        format!("{}:{}", table, key)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// Takes the lock if it is free, expired or already owned by `owner`.
    async fn try_lock(&self, resource: &str, owner: &str, ttl: Duration) -> Option<Instant> {
        let mut locks = self.locks.lock().await;
        let now = Instant::now();
        match locks.get(resource) {
            Some(held) if held.owner != owner && held.expires > now => Some(held.expires),
            _ => {
                locks.insert(
                    resource.to_string(),
                    LockEntry {
                        owner: owner.to_string(),
                        expires: now + ttl,
                    },
                );
                None
            }
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get_many(&self, table: &str, keys: &[Key]) -> Result<HashMap<Key, Record>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let mut found = HashMap::new();
        for key in keys {
            let id = Self::entry_key(table, key);
            let expired = match entries.get(&id) {
                Some(entry) if entry.expires.is_none_or(|at| at > now) => {
                    found.insert(key.clone(), entry.record.clone());
                    false
                }
                Some(_) => true,
                None => false,
            };
            if expired {
                entries.pop(&id);
            }
        }
        tracing::debug!(table, requested = keys.len(), hits = found.len(), "cache lookup");
        Ok(found)
    }

    async fn set_many(&self, table: &str, records: Vec<(Key, Record)>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let expires = self.ttl.map(|ttl| Instant::now() + ttl);
        for (key, record) in records {
            entries.put(Self::entry_key(table, &key), CacheEntry { record, expires });
        }
        Ok(())
    }

    async fn remove_many(&self, table: &str, keys: &[Key]) -> Result<()> {
        let mut entries = self.entries.lock().await;
        for key in keys {
            entries.pop(&Self::entry_key(table, key));
        }
        Ok(())
    }

    async fn lock(&self, resource: &str, owner: &str, ttl: Duration, wait: Duration) -> Result<()> {
        let deadline = Instant::now() + wait;
        loop {
            let released = self.released.clone();
            let notified = released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let Some(held_until) = self.try_lock(resource, owner, ttl).await else {
                tracing::debug!(resource, owner, "lock acquired");
                return Ok(());
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(DbError::backend(
                    BackendKind::Cache,
                    format!("timed out after {:?} waiting for lock '{}'", wait, resource),
                ));
            }
            let wake = held_until.min(deadline);
            let _ = tokio::time::timeout_at(wake, notified).await;
        }
    }

    async fn unlock(&self, resource: &str, owner: &str) -> Result<bool> {
        let mut locks = self.locks.lock().await;
        let owned = locks.get(resource).is_some_and(|held| held.owner == owner);
        if owned {
            locks.remove(resource);
            drop(locks);
            self.released.notify_waiters();
            tracing::debug!(resource, owner, "lock released");
        }
        Ok(owned)
    }

    async fn locked(&self) -> Result<Vec<String>> {
        let locks = self.locks.lock().await;
        let now = Instant::now();
        let mut held: Vec<String> = locks
            .iter()
            .filter(|(_, entry)| entry.expires > now)
            .map(|(resource, _)| resource.clone())
            .collect();
        held.sort();
        Ok(held)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_records_round_trip() {
        let cache = MemoryCache::new();
        cache
            .set_many("users", vec![("u1".into(), record(json!({"id": "u1"})))])
            .await
            .unwrap();
        let hits = cache.get_many("users", &["u1".into(), "u2".into()]).await.unwrap();
        assert_eq!(hits.len(), 1);

        cache.remove_many("users", &["u1".into()]).await.unwrap();
        assert!(cache.get_many("users", &["u1".into()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = MemoryCache::with_capacity(10, Some(Duration::from_millis(20)));
        cache
            .set_many("users", vec![("u1".into(), record(json!({"id": "u1"})))])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get_many("users", &["u1".into()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recent() {
        let cache = MemoryCache::with_capacity(2, None);
        for key in ["a", "b", "c"] {
            cache
                .set_many("t", vec![(key.into(), record(json!({"id": key})))])
                .await
                .unwrap();
        }
        assert_eq!(cache.len().await, 2);
        assert!(cache.get_many("t", &["a".into()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_is_reentrant_for_owner() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(5);
        cache.lock("users:u1", "tx1", ttl, Duration::ZERO).await.unwrap();
        cache.lock("users:u1", "tx1", ttl, Duration::ZERO).await.unwrap();
        let err = cache
            .lock("users:u1", "tx2", ttl, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "BACKEND_ERROR");

        assert!(!cache.unlock("users:u1", "tx2").await.unwrap());
        assert!(cache.unlock("users:u1", "tx1").await.unwrap());
        assert!(cache.locked().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let cache = Arc::new(MemoryCache::new());
        let ttl = Duration::from_secs(5);
        cache.lock("r", "tx1", ttl, Duration::ZERO).await.unwrap();

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.lock("r", "tx2", ttl, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.unlock("r", "tx1").await.unwrap();

        waiter.await.unwrap().unwrap();
        assert_eq!(cache.locked().await.unwrap(), vec!["r".to_string()]);
    }

    #[tokio::test]
    async fn test_expired_lock_is_free() {
        let cache = MemoryCache::new();
        cache
            .lock("r", "tx1", Duration::from_millis(10), Duration::ZERO)
            .await
            .unwrap();
        cache
            .lock("r", "tx2", Duration::from_secs(5), Duration::from_secs(1))
            .await
            .unwrap();
    }
}
