//! Key-value cache abstraction over Redis.
//!
//! The buffer, dedup, conversation and job stores all talk to this trait.
//! Only atomic primitives are exposed for the paths that need them:
//! `set_nx` (dedup's set-if-absent) and `get_del` (the buffer's
//! read-and-clear), so correctness never depends on a distributed lock.
//!
//! `InMemoryKvCache` implements the same contract for tests.

mod memory;
mod redis_cache;

pub use memory::InMemoryKvCache;
pub use redis_cache::RedisKvCache;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheError;

/// String key-value store with optional per-key TTL.
///
/// Values are JSON strings; serialization stays with the callers so the
/// `crm:*` key layout is visible at the call sites.
#[async_trait]
pub trait KvCache: Send + Sync {
    /// Get a value, or `None` if missing or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Set a value with optional TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Atomic set-if-absent with TTL. Returns `true` iff the key was set
    /// (i.e. it did not exist before). Race-free between concurrent callers.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Atomic get-and-delete. At most one concurrent caller observes the
    /// value; the rest get `None`.
    async fn get_del(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Delete a key. Returns `true` if it existed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Existence check without mutation.
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// All keys starting with `prefix` (SCAN-based on Redis, never KEYS).
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trait_object_roundtrip() {
        let cache: Box<dyn KvCache> = Box::new(InMemoryKvCache::new());
        cache.set("k", "v", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
