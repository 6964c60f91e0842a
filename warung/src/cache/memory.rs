//! In-memory cache for tests and single-process runs.
//!
//! Same atomicity contract as the Redis implementation: `set_nx` and
//! `get_del` go through the map's entry locks, so concurrent callers see
//! at-most-one winner.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::CacheError;

use super::KvCache;

#[derive(Clone, Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|t| Instant::now() >= t)
    }
}

/// DashMap-backed [`KvCache`] with lazy TTL eviction on read.
#[derive(Default)]
pub struct InMemoryKvCache {
    entries: DashMap<String, Entry>,
}

impl InMemoryKvCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self, key: &str) -> Option<String> {
        {
            let entry = self.entries.get(key)?;
            if !entry.expired() {
                return Some(entry.value.clone());
            }
        }
        // Lazy eviction; the read guard above must be released first or the
        // removal would deadlock on the same shard.
        self.entries.remove(key);
        None
    }
}

#[async_trait]
impl KvCache for InMemoryKvCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.live(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        // Entry API holds the shard lock across check + insert.
        let fresh = Entry {
            value: value.to_string(),
            expires_at: Some(Instant::now() + ttl),
        };
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if occupied.get().expired() {
                    occupied.insert(fresh);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self.entries.remove(key) {
            Some((_, e)) if !e.expired() => Ok(Some(e.value)),
            _ => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.live(key).is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && !e.value().expired())
            .map(|e| e.key().clone())
            .collect())
    }
}
