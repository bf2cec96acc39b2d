//! Redis-backed shared store
//!
//! Uses a multiplexed tokio connection; each trait method maps to exactly
//! one Redis command, so every method is atomic server-side.

use crate::error::{StoreError, StoreResult};
use crate::store::KeyValueStore;

use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::time::Duration;

/// Configuration for the Redis store
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL
    pub url: String,
    /// Time allowed for the initial connection
    pub connect_timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl RedisStoreConfig {
    /// Create config with custom Redis URL
    pub fn with_url(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }
}

/// Redis implementation of [`KeyValueStore`]
pub struct RedisStore {
    connection: MultiplexedConnection,
    config: RedisStoreConfig,
}

impl RedisStore {
    /// Connect to Redis
    pub async fn connect(config: RedisStoreConfig) -> StoreResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| {
            StoreError::ConnectionFailed {
                url: config.url.clone(),
                reason: e.to_string(),
            }
        })?;

        let connection = tokio::time::timeout(
            config.connect_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| StoreError::ConnectionFailed {
            url: config.url.clone(),
            reason: "connection timed out".to_string(),
        })?
        .map_err(|e| StoreError::ConnectionFailed {
            url: config.url.clone(),
            reason: e.to_string(),
        })?;

        tracing::debug!("Connected to Redis at {}", config.url);

        Ok(Self { connection, config })
    }

    /// URL this store is connected to
    pub fn url(&self) -> &str {
        &self.config.url
    }

    // MultiplexedConnection is a cheap handle onto one pipelined socket
    fn conn(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.conn().get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.conn().set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.conn().exists(key).await?)
    }

    async fn incr(&self, key: &str, delta: i64) -> StoreResult<i64> {
        Ok(self.conn().incr(key, delta).await?)
    }

    async fn push_back(&self, key: &str, value: &str) -> StoreResult<u64> {
        Ok(self.conn().rpush(key, value).await?)
    }

    async fn push_front(&self, key: &str, value: &str) -> StoreResult<u64> {
        Ok(self.conn().lpush(key, value).await?)
    }

    async fn pop_front(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.conn().lpop(key, None).await?)
    }

    async fn list_len(&self, key: &str) -> StoreResult<u64> {
        Ok(self.conn().llen(key).await?)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.conn().hset::<_, _, _, ()>(key, field, value).await?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        Ok(self.conn().hget(key, field).await?)
    }

    async fn hash_del(&self, key: &str, field: &str) -> StoreResult<bool> {
        let removed: i64 = self.conn().hdel(key, field).await?;
        Ok(removed > 0)
    }

    async fn hash_len(&self, key: &str) -> StoreResult<u64> {
        Ok(self.conn().hlen(key).await?)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
