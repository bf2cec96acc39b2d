//! In-process store for tests and single-node runs

use crate::error::{StoreError, StoreResult};
use crate::store::KeyValueStore;

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
struct MemoryInner {
    strings: HashMap<String, String>,
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
}

/// [`KeyValueStore`] held in memory
///
/// Every operation takes the single mutex for its whole duration, which
/// gives the same per-operation atomicity as Redis. `set_available(false)`
/// makes every call fail with [`StoreError::Unavailable`].
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store marked unavailable".into()))
        }
    }

    fn wrong_type(key: &str) -> StoreError {
        StoreError::OperationFailed(format!(
            "WRONGTYPE key '{}' holds a different kind of value",
            key
        ))
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check()?;
        Ok(self.inner.lock().strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check()?;
        self.inner
            .lock()
            .strings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check()?;
        let inner = self.inner.lock();
        Ok(inner.strings.contains_key(key)
            || inner.lists.get(key).is_some_and(|l| !l.is_empty())
            || inner.hashes.get(key).is_some_and(|h| !h.is_empty()))
    }

    async fn incr(&self, key: &str, delta: i64) -> StoreResult<i64> {
        self.check()?;
        let mut inner = self.inner.lock();
        let current = match inner.strings.get(key) {
            Some(value) => value.parse::<i64>().map_err(|_| {
                StoreError::OperationFailed(format!(
                    "value at '{}' is not an integer",
                    key
                ))
            })?,
            None => 0,
        };
        let next = current + delta;
        inner.strings.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn push_back(&self, key: &str, value: &str) -> StoreResult<u64> {
        self.check()?;
        let mut inner = self.inner.lock();
        if inner.strings.contains_key(key) {
            return Err(Self::wrong_type(key));
        }
        let list = inner.lists.entry(key.to_string()).or_default();
        list.push_back(value.to_string());
        Ok(list.len() as u64)
    }

    async fn push_front(&self, key: &str, value: &str) -> StoreResult<u64> {
        self.check()?;
        let mut inner = self.inner.lock();
        if inner.strings.contains_key(key) {
            return Err(Self::wrong_type(key));
        }
        let list = inner.lists.entry(key.to_string()).or_default();
        list.push_front(value.to_string());
        Ok(list.len() as u64)
    }

    async fn pop_front(&self, key: &str) -> StoreResult<Option<String>> {
        self.check()?;
        Ok(self
            .inner
            .lock()
            .lists
            .get_mut(key)
            .and_then(|list| list.pop_front()))
    }

    async fn list_len(&self, key: &str) -> StoreResult<u64> {
        self.check()?;
        Ok(self
            .inner
            .lock()
            .lists
            .get(key)
            .map(|l| l.len() as u64)
            .unwrap_or(0))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.check()?;
        let mut inner = self.inner.lock();
        if inner.strings.contains_key(key) {
            return Err(Self::wrong_type(key));
        }
        inner
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.check()?;
        Ok(self
            .inner
            .lock()
            .hashes
            .get(key)
            .and_then(|h| h.get(field).cloned()))
    }

    async fn hash_del(&self, key: &str, field: &str) -> StoreResult<bool> {
        self.check()?;
        Ok(self
            .inner
            .lock()
            .hashes
            .get_mut(key)
            .is_some_and(|h| h.remove(field).is_some()))
    }

    async fn hash_len(&self, key: &str) -> StoreResult<u64> {
        self.check()?;
        Ok(self
            .inner
            .lock()
            .hashes
            .get(key)
            .map(|h| h.len() as u64)
            .unwrap_or(0))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_incr_starts_at_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("counter", 1).await.unwrap(), 1);
        assert_eq!(store.incr("counter", 1).await.unwrap(), 2);
        assert_eq!(store.incr("counter", -3).await.unwrap(), -1);
        assert_eq!(store.get("counter").await.unwrap().as_deref(), Some("-1"));
    }

    #[tokio::test]
    async fn test_incr_rejects_non_integer() {
        let store = MemoryStore::new();
        store.set("name", "abc").await.unwrap();
        assert!(matches!(
            store.incr("name", 1).await,
            Err(StoreError::OperationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_list_is_fifo() {
        let store = MemoryStore::new();
        store.push_back("q", "a").await.unwrap();
        store.push_back("q", "b").await.unwrap();
        assert_eq!(store.list_len("q").await.unwrap(), 2);
        assert_eq!(store.pop_front("q").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.pop_front("q").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.pop_front("q").await.unwrap(), None);

        store.push_back("q", "b").await.unwrap();
        assert_eq!(store.push_front("q", "a").await.unwrap(), 2);
        assert_eq!(store.pop_front("q").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_hash_operations() {
        let store = MemoryStore::new();
        store.hash_set("h", "1", "url").await.unwrap();
        assert_eq!(store.hash_get("h", "1").await.unwrap().as_deref(), Some("url"));
        assert_eq!(store.hash_len("h").await.unwrap(), 1);
        assert!(store.hash_del("h", "1").await.unwrap());
        assert!(!store.hash_del("h", "1").await.unwrap());
        assert_eq!(store.hash_get("h", "1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
        assert!(matches!(
            store.pop_front("q").await,
            Err(StoreError::Unavailable(_))
        ));

        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }
}
