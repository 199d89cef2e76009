//! In-memory key-value store
//!
//! Suitable for development and tests. Entries are sharded by `DashMap`, so
//! operations on different keys never contend, and each operation holds the
//! shard lock for its key while it runs, which makes `take` and
//! `compare_and_set` atomic per key.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;

use super::{KeyValueStore, StorageError, StorageResult};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Thread-safe in-memory store with lazy TTL expiry
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        // Shard read guard is released above; evict lazily.
        if expired {
            self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StorageResult<()> {
        self.entries.insert(key.to_string(), Entry::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| entry.is_live(now)))
    }

    async fn take(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .and_then(|(_, entry)| entry.is_live(now).then_some(entry.value)))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> StorageResult<()> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                let current = occupied.get();
                let matches = match expected {
                    None => !current.is_live(now),
                    Some(expected) => current.is_live(now) && current.value == expected,
                };
                if !matches {
                    return Err(StorageError::Conflict(key.to_string()));
                }
                occupied.insert(Entry::new(value, ttl));
                Ok(())
            }
            MapEntry::Vacant(vacant) => {
                if expected.is_some() {
                    return Err(StorageError::Conflict(key.to_string()));
                }
                vacant.insert(Entry::new(value, ttl));
                Ok(())
            }
        }
    }

    async fn purge_expired(&self) -> StorageResult<usize> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let store = MemoryStore::new();
        store.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(store.take("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.take("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entries_behave_as_absent() {
        let store = MemoryStore::new();
        store
            .set("k", b"v".to_vec(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.get("k").await.unwrap(), None);

        store
            .set("t", b"v".to_vec(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.take("t").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_compare_and_set_insert_if_absent() {
        let store = MemoryStore::new();
        store
            .compare_and_set("k", None, b"a".to_vec(), None)
            .await
            .unwrap();
        let err = store
            .compare_and_set("k", None, b"b".to_vec(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
        assert_eq!(store.get("k").await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn test_compare_and_set_insert_over_expired() {
        let store = MemoryStore::new();
        store
            .set("k", b"old".to_vec(), Some(Duration::from_millis(5)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        store
            .compare_and_set("k", None, b"new".to_vec(), None)
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_compare_and_set_update_if_unchanged() {
        let store = MemoryStore::new();
        store.set("k", b"a".to_vec(), None).await.unwrap();

        let err = store
            .compare_and_set("k", Some(b"x"), b"b".to_vec(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        store
            .compare_and_set("k", Some(b"a"), b"b".to_vec(), None)
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"b".to_vec()));

        let err = store
            .compare_and_set("missing", Some(b"a"), b"b".to_vec(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryStore::new();
        store
            .set("short", b"v".to_vec(), Some(Duration::from_millis(5)))
            .await
            .unwrap();
        store.set("long", b"v".to_vec(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }
}
