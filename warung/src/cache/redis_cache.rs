//! Redis-backed [`KvCache`].
//!
//! `set_nx` maps to `SET NX EX` and `get_del` to `GETDEL`, so the atomicity
//! the buffer and dedup rely on is the server's, not ours. Key enumeration
//! uses `SCAN` with a match pattern to avoid blocking the instance.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, ExistenceCheck, SetExpiry, SetOptions};

use crate::error::CacheError;

use super::KvCache;

pub struct RedisKvCache {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisKvCache {
    /// Connects with a multiplexed connection; the connection transparently
    /// pipelines concurrent commands from all tasks in the process.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(CacheError::from)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(CacheError::from)?;
        Ok(Self { client, conn })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

#[async_trait]
impl KvCache for RedisKvCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn();
        Ok(conn.get(key).await.map_err(CacheError::from)?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.conn();
        match ttl {
            Some(ttl) => conn
                .set_ex(key, value, ttl.as_secs().max(1))
                .await
                .map_err(CacheError::from),
            None => conn.set(key, value).await.map_err(CacheError::from),
        }
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        let opts = SetOptions::default()
            .conditional_set(ExistenceCheck::NX)
            .with_expiration(SetExpiry::EX(ttl.as_secs().max(1) as usize));
        // SET NX replies OK when set, Nil when the key already exists.
        let reply: Option<String> = conn
            .set_options(key, value, opts)
            .await
            .map_err(CacheError::from)?;
        Ok(reply.is_some())
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn();
        Ok(conn.get_del(key).await.map_err(CacheError::from)?)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        let removed: u64 = conn.del(key).await.map_err(CacheError::from)?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        Ok(conn.exists(key).await.map_err(CacheError::from)?)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        // SCAN needs a dedicated connection: the iterator holds it across polls.
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(CacheError::from)?;
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();
        let mut iter = conn
            .scan_match::<_, String>(&pattern)
            .await
            .map_err(CacheError::from)?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }
}
