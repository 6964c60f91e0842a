//! Per-chat message buffering with a dynamic sliding deadline.
//!
//! WhatsApp customers send bursts of short "bubbles":
//!
//! ```text
//!   "Halo"           ─┐
//!   "Saya mau order"  ├─► buffer (2s sliding, 10s cap) ─► one combined prompt
//!   "Produk A 2 pcs" ─┘
//! ```
//!
//! The buffer lives in the shared cache so any worker replica can append, and
//! the entry self-evicts (TTL = time-to-flush + grace) if every worker dies.
//! Reading the combined text deletes the entry atomically (`GETDEL`), which is
//! what serialises dispatches per chat: concurrent readers see at most one
//! winner.

mod flush;

pub use flush::{FlushHandler, FlushWorker};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::KvCache;
use crate::error::CacheError;

pub const BUFFER_KEY_PREFIX: &str = "crm:msg_buffer:";

/// Grace added to the entry TTL so a live worker always wins over eviction.
const TTL_GRACE_SECS: u64 = 5;

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(d.as_millis() as i64)
}

/// One buffered bubble.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BufferedMessage {
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

/// Cache representation of a chat's buffer.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct BufferEntry {
    chat_id: String,
    messages: Vec<BufferedMessage>,
    first_arrival: DateTime<Utc>,
    flush_at: DateTime<Utc>,
    message_count: usize,
}

/// Outcome of [`MessageBuffer::add_message`].
#[derive(Clone, Debug, PartialEq)]
pub struct BufferResult {
    pub message_count: usize,
    pub seconds_until_flush: f64,
}

/// Buffers messages per chat with a sliding flush deadline.
///
/// Deadline rules:
/// - first message: `flush_at = ts + initial_delay`
/// - each message: `flush_at = min(ts + extend_delay, first_arrival + max_delay)`
///
/// so the quiet-period before dispatch is at most `extend_delay` and the total
/// buffered time is capped at `max_delay` from the first arrival.
pub struct MessageBuffer {
    cache: Arc<dyn KvCache>,
    initial_delay: Duration,
    extend_delay: Duration,
    max_delay: Duration,
}

impl MessageBuffer {
    pub fn new(
        cache: Arc<dyn KvCache>,
        initial_delay: Duration,
        extend_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        Self {
            cache,
            initial_delay,
            extend_delay,
            max_delay,
        }
    }

    /// Defaults from the production tuning: 2s initial, 2s extend, 10s cap.
    pub fn with_defaults(cache: Arc<dyn KvCache>) -> Self {
        Self::new(
            cache,
            Duration::from_secs(2),
            Duration::from_secs(2),
            Duration::from_secs(10),
        )
    }

    fn key(chat_id: &str) -> String {
        format!("{BUFFER_KEY_PREFIX}{chat_id}")
    }

    /// Append a message to the chat's buffer, creating it on first use, and
    /// slide the flush deadline.
    pub async fn add_message(
        &self,
        chat_id: &str,
        message: &str,
        timestamp: Option<DateTime<Utc>>,
        metadata: Value,
    ) -> Result<BufferResult, CacheError> {
        let key = Self::key(chat_id);
        let now = timestamp.unwrap_or_else(Utc::now);

        let mut entry = match self.cache.get(&key).await? {
            Some(raw) => serde_json::from_str::<BufferEntry>(&raw)?,
            None => BufferEntry {
                chat_id: chat_id.to_string(),
                messages: Vec::new(),
                first_arrival: now,
                flush_at: now + to_chrono(self.initial_delay),
                message_count: 0,
            },
        };

        entry.messages.push(BufferedMessage {
            content: message.to_string(),
            timestamp: now,
            metadata,
        });
        entry.message_count = entry.messages.len();

        // Slide the deadline, capped at max_delay from the first arrival.
        let candidate = now + to_chrono(self.extend_delay);
        let cap = entry.first_arrival + to_chrono(self.max_delay);
        entry.flush_at = candidate.min(cap);

        let seconds_until_flush = (entry.flush_at - now)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0;

        let ttl = Duration::from_secs(seconds_until_flush.ceil() as u64 + TTL_GRACE_SECS);
        self.cache
            .set(&key, &serde_json::to_string(&entry)?, Some(ttl))
            .await?;

        debug!(
            chat_id,
            count = entry.message_count,
            flush_in = seconds_until_flush,
            "buffered message"
        );

        Ok(BufferResult {
            message_count: entry.message_count,
            seconds_until_flush,
        })
    }

    /// `true` iff a buffer exists for the chat and its deadline has passed.
    pub async fn should_flush(&self, chat_id: &str) -> Result<bool, CacheError> {
        match self.cache.get(&Self::key(chat_id)).await? {
            Some(raw) => {
                let entry: BufferEntry = serde_json::from_str(&raw)?;
                Ok(Utc::now() >= entry.flush_at)
            }
            None => Ok(false),
        }
    }

    /// Atomically take the buffer and return its messages joined with `\n`,
    /// plus the metadata of the first message (it carries the webhook ids).
    ///
    /// Concurrent callers see at most one `Some`; the entry is removed in the
    /// same operation that reads it.
    pub async fn get_combined_message(
        &self,
        chat_id: &str,
    ) -> Result<Option<(String, Value)>, CacheError> {
        let raw = match self.cache.get_del(&Self::key(chat_id)).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let entry: BufferEntry = serde_json::from_str(&raw)?;
        if entry.messages.is_empty() {
            return Ok(None);
        }

        let combined = entry
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let metadata = entry.messages[0].metadata.clone();

        info!(
            chat_id,
            count = entry.messages.len(),
            chars = combined.len(),
            "flushed buffer"
        );

        Ok(Some((combined, metadata)))
    }

    /// All chat ids with a live buffer (prefix scan).
    pub async fn active_chat_ids(&self) -> Result<Vec<String>, CacheError> {
        let keys = self.cache.scan_prefix(BUFFER_KEY_PREFIX).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(BUFFER_KEY_PREFIX).map(str::to_string))
            .collect())
    }

    /// Take the buffer regardless of its deadline (shutdown drain).
    pub async fn force_flush(&self, chat_id: &str) -> Result<Option<(String, Value)>, CacheError> {
        info!(chat_id, "force flushing buffer");
        self.get_combined_message(chat_id).await
    }

    /// Drop a buffer without processing it.
    pub async fn clear(&self, chat_id: &str) -> Result<bool, CacheError> {
        self.cache.delete(&Self::key(chat_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryKvCache;
    use serde_json::json;

    fn buffer() -> MessageBuffer {
        MessageBuffer::with_defaults(Arc::new(InMemoryKvCache::new()))
    }

    fn past(secs: f64) -> DateTime<Utc> {
        Utc::now() - chrono::Duration::milliseconds((secs * 1000.0) as i64)
    }

    /// **Scenario**: three rapid bubbles; the combined prompt joins them with
    /// newlines in arrival order and the buffer is gone afterwards.
    #[tokio::test]
    async fn three_bubbles_combine_in_order() {
        let b = buffer();
        b.add_message("c", "Halo", Some(past(3.0)), json!({"message_id": "m1"}))
            .await
            .unwrap();
        b.add_message("c", "Saya mau order", Some(past(2.5)), json!({}))
            .await
            .unwrap();
        b.add_message("c", "Produk A 2 pcs", Some(past(2.0)), json!({}))
            .await
            .unwrap();

        assert!(b.should_flush("c").await.unwrap());
        let (combined, metadata) = b.get_combined_message("c").await.unwrap().unwrap();
        assert_eq!(combined, "Halo\nSaya mau order\nProduk A 2 pcs");
        assert_eq!(metadata["message_id"], "m1");
        assert_eq!(b.get_combined_message("c").await.unwrap(), None);
    }

    /// **Scenario**: each message slides the deadline by extend_delay.
    #[tokio::test]
    async fn deadline_slides_per_message() {
        let b = buffer();
        let r1 = b.add_message("c", "1", None, json!({})).await.unwrap();
        assert_eq!(r1.message_count, 1);
        assert!(r1.seconds_until_flush <= 2.0 && r1.seconds_until_flush > 1.5);

        let r2 = b.add_message("c", "2", None, json!({})).await.unwrap();
        assert_eq!(r2.message_count, 2);
        assert!(r2.seconds_until_flush <= 2.0 && r2.seconds_until_flush > 1.5);
        assert!(!b.should_flush("c").await.unwrap());
    }

    /// **Scenario**: a long burst cannot push the deadline past
    /// first_arrival + max_delay.
    #[tokio::test]
    async fn deadline_capped_at_max_delay() {
        let b = buffer();
        // First arrival 9.5s ago; a fresh message would extend +2s but the
        // cap allows only 0.5s more.
        b.add_message("c", "first", Some(past(9.5)), json!({}))
            .await
            .unwrap();
        let r = b.add_message("c", "late", None, json!({})).await.unwrap();
        assert!(
            r.seconds_until_flush <= 0.6,
            "got {}",
            r.seconds_until_flush
        );
    }

    /// **Scenario**: ten messages one second apart all land in one dispatch.
    #[tokio::test]
    async fn burst_beyond_cap_joins_all() {
        let b = buffer();
        for i in 0..10 {
            let ts = past(11.0 - i as f64);
            b.add_message("c", &format!("msg{i}"), Some(ts), json!({}))
                .await
                .unwrap();
        }
        assert!(b.should_flush("c").await.unwrap());
        let (combined, _) = b.get_combined_message("c").await.unwrap().unwrap();
        assert_eq!(combined.lines().count(), 10);
        assert!(combined.starts_with("msg0"));
        assert!(combined.ends_with("msg9"));
    }

    #[tokio::test]
    async fn should_flush_false_without_buffer() {
        let b = buffer();
        assert!(!b.should_flush("nobody").await.unwrap());
        assert_eq!(b.get_combined_message("nobody").await.unwrap(), None);
    }

    /// **Scenario**: two workers race to flush the same chat; only one gets
    /// the combined text.
    #[tokio::test]
    async fn concurrent_flush_single_winner() {
        let cache: Arc<dyn KvCache> = Arc::new(InMemoryKvCache::new());
        let b = Arc::new(MessageBuffer::with_defaults(cache));
        b.add_message("c", "hello there", Some(past(3.0)), json!({}))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let b = b.clone();
            handles.push(tokio::spawn(
                async move { b.get_combined_message("c").await },
            ));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap().unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn active_chat_ids_lists_buffers() {
        let b = buffer();
        b.add_message("a@c.us", "x", None, json!({})).await.unwrap();
        b.add_message("b@c.us", "y", None, json!({})).await.unwrap();
        let mut ids = b.active_chat_ids().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a@c.us", "b@c.us"]);
    }

    #[tokio::test]
    async fn clear_drops_without_processing() {
        let b = buffer();
        b.add_message("c", "x", None, json!({})).await.unwrap();
        assert!(b.clear("c").await.unwrap());
        assert_eq!(b.get_combined_message("c").await.unwrap(), None);
    }
}
