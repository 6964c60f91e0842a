//! Message deduplication keyed on `(tenant, chat, message_id)`.
//!
//! WhatsApp bridges redeliver webhooks; `check_and_mark` turns the second
//! delivery into a no-op with a single atomic set-if-absent. A cache error
//! propagates to the caller, which treats the unknown outcome as
//! not-a-duplicate: a duplicate reply beats a silently dropped message.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::cache::KvCache;
use crate::error::CacheError;

const KEY_PREFIX: &str = "crm:dedup:";
const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Replace whitespace and `:` so components can't break the key layout.
fn sanitize(component: &str) -> String {
    if component.is_empty() {
        return "unknown".to_string();
    }
    component
        .chars()
        .map(|c| match c {
            c if c.is_whitespace() => '_',
            ':' => '-',
            c => c,
        })
        .collect()
}

pub struct MessageDedup {
    cache: Arc<dyn KvCache>,
    ttl: Duration,
    enabled: bool,
}

impl MessageDedup {
    pub fn new(cache: Arc<dyn KvCache>, ttl: Option<Duration>, enabled: bool) -> Self {
        Self {
            cache,
            ttl: ttl.unwrap_or(DEFAULT_TTL),
            enabled,
        }
    }

    fn key(tenant_id: &str, chat_id: &str, message_id: &str) -> String {
        format!(
            "{KEY_PREFIX}{}:{}:{}",
            sanitize(tenant_id),
            sanitize(chat_id),
            sanitize(message_id)
        )
    }

    /// Check whether `(tenant, chat, message)` was already seen, and mark it
    /// as seen if not. Returns `true` iff the message is a duplicate.
    ///
    /// For any set of concurrent callers with the same key, exactly one
    /// returns `false`; the cache's SET NX guarantees it.
    pub async fn check_and_mark(
        &self,
        tenant_id: &str,
        chat_id: &str,
        message_id: &str,
    ) -> Result<bool, CacheError> {
        if !self.enabled || message_id.is_empty() {
            return Ok(false);
        }

        let key = Self::key(tenant_id, chat_id, message_id);
        let was_set = self.cache.set_nx(&key, "1", self.ttl).await?;

        if !was_set {
            info!(message_id, chat_id, "duplicate message detected");
        }
        Ok(!was_set)
    }

    /// Read-only check; never marks.
    pub async fn is_duplicate(
        &self,
        tenant_id: &str,
        chat_id: &str,
        message_id: &str,
    ) -> Result<bool, CacheError> {
        if !self.enabled || message_id.is_empty() {
            return Ok(false);
        }
        self.cache
            .exists(&Self::key(tenant_id, chat_id, message_id))
            .await
    }
}
