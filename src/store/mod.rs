//! Shared store module for cross-process coordination
//!
//! Every piece of mutable protocol state (counters, the waiting list, the
//! in-progress and ownership maps, checkpoints) lives behind the
//! [`KeyValueStore`] trait. Each individual operation is atomic in the
//! backing store; composite sequences are not.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::{RedisStore, RedisStoreConfig};

use crate::error::StoreResult;

/// Atomic key-value operations used by the queue and the work server
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a string value
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a string value
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Check whether a key exists
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Atomically add `delta` to an integer value (missing keys start at 0)
    async fn incr(&self, key: &str, delta: i64) -> StoreResult<i64>;

    /// Append to the tail of a list, returning the new length
    async fn push_back(&self, key: &str, value: &str) -> StoreResult<u64>;

    /// Prepend to the head of a list, returning the new length
    async fn push_front(&self, key: &str, value: &str) -> StoreResult<u64>;

    /// Remove and return the head of a list
    async fn pop_front(&self, key: &str) -> StoreResult<Option<String>>;

    /// Length of a list
    async fn list_len(&self, key: &str) -> StoreResult<u64>;

    /// Set a field in a hash
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    /// Read a field from a hash
    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// Delete a field from a hash, returning whether it existed
    async fn hash_del(&self, key: &str, field: &str) -> StoreResult<bool>;

    /// Number of fields in a hash
    async fn hash_len(&self, key: &str) -> StoreResult<u64>;

    /// Check the store is reachable
    async fn ping(&self) -> StoreResult<()>;
}

// Re-export async_trait for implementors
pub use async_trait::async_trait;
