//! Chat task handler: dedup → location enrichment → buffer.
//!
//! Consumes `crm_tasks` messages the gateway queued from WhatsApp webhooks.
//! Nothing here talks to the LLM; the flush worker picks the buffer up when
//! the chat goes quiet.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use warung::buffer::MessageBuffer;
use warung::bus::MessageHandler;
use warung::dedup::MessageDedup;
use warung::geocode::GeocodingClient;

pub struct ChatTaskHandler {
    dedup: MessageDedup,
    buffer: Arc<MessageBuffer>,
    geocoder: Arc<GeocodingClient>,
}

impl ChatTaskHandler {
    pub fn new(
        dedup: MessageDedup,
        buffer: Arc<MessageBuffer>,
        geocoder: Arc<GeocodingClient>,
    ) -> Self {
        Self {
            dedup,
            buffer,
            geocoder,
        }
    }
}

#[async_trait]
impl MessageHandler for ChatTaskHandler {
    async fn handle(
        &self,
        payload: Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if payload["type"].as_str() != Some("wa_message") {
            warn!(task_type = ?payload["type"], "unexpected task on chat queue");
            return Ok(());
        }

        let tenant_id = payload["tenant_id"].as_str().unwrap_or_default();
        let chat_id = payload["chat_id"].as_str().unwrap_or_default();
        let message_type = payload["message_type"].as_str().unwrap_or("text");
        let content = payload["content"].as_str().unwrap_or_default();
        let mut metadata = payload["metadata"].clone();
        if !metadata.is_object() {
            metadata = json!({});
        }
        let message_id = metadata["message_id"].as_str().unwrap_or_default().to_string();

        if chat_id.is_empty() {
            warn!("chat task without chat id");
            return Ok(());
        }

        // A cache error leaves the outcome unknown; proceeding risks a
        // duplicate reply, which beats silently dropping the message.
        match self.dedup.check_and_mark(tenant_id, chat_id, &message_id).await {
            Ok(true) => {
                info!(chat_id, %message_id, "duplicate message skipped");
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => warn!(chat_id, error = %e, "dedup check failed, proceeding"),
        }

        // Location enrichment: native location shares and Maps links both
        // end up as an address in the metadata.
        let text = if message_type == "location" {
            let location = metadata["location"].clone();
            let coords = (
                location["latitude"].as_f64(),
                location["longitude"].as_f64(),
            );
            if let (Some(lat), Some(lng)) = coords {
                if let Some(enriched) = self.geocoder.enrich("", Some((lat, lng))).await {
                    let described = enriched["address"]
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("{lat}, {lng}"));
                    if let Some(map) = metadata.as_object_mut() {
                        map.insert("location".into(), enriched);
                    }
                    format!("[Customer shared a location: {described}]")
                } else {
                    format!("[Customer shared a location: {lat}, {lng}]")
                }
            } else {
                warn!(chat_id, "location message without coordinates");
                return Ok(());
            }
        } else {
            if let Some(enriched) = self.geocoder.enrich(content, None).await {
                if let Some(map) = metadata.as_object_mut() {
                    map.insert("location".into(), enriched);
                }
            }
            content.to_string()
        };

        if text.is_empty() {
            return Ok(());
        }

        let result = self.buffer.add_message(chat_id, &text, None, metadata).await?;
        info!(
            chat_id,
            count = result.message_count,
            flush_in = result.seconds_until_flush,
            "message buffered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warung::cache::{InMemoryKvCache, KvCache};

    fn handler() -> (ChatTaskHandler, Arc<MessageBuffer>) {
        let cache: Arc<dyn KvCache> = Arc::new(InMemoryKvCache::new());
        let buffer = Arc::new(MessageBuffer::with_defaults(cache.clone()));
        let handler = ChatTaskHandler::new(
            MessageDedup::new(cache, None, true),
            buffer.clone(),
            Arc::new(GeocodingClient::new(
                None,
                "https://maps.googleapis.com/maps/api/geocode/json",
            )),
        );
        (handler, buffer)
    }

    fn task(message_id: &str, text: &str) -> Value {
        json!({
            "type": "wa_message",
            "webhook_type": "whatsapp",
            "session": "session-1",
            "chat_id": "628@c.us",
            "message_type": "text",
            "content": text,
            "metadata": {
                "message_id": message_id,
                "wa_session": "session-1",
            },
            "tenant_id": "t1",
        })
    }

    /// **Scenario**: the same webhook delivered twice buffers one message.
    #[tokio::test]
    async fn duplicate_delivery_buffers_once() {
        let (handler, buffer) = handler();
        handler.handle(task("m1", "Halo")).await.unwrap();
        handler.handle(task("m1", "Halo")).await.unwrap();

        let (combined, _) = buffer.force_flush("628@c.us").await.unwrap().unwrap();
        assert_eq!(combined, "Halo");
    }

    #[tokio::test]
    async fn distinct_messages_coalesce() {
        let (handler, buffer) = handler();
        handler.handle(task("m1", "Halo")).await.unwrap();
        handler.handle(task("m2", "Saya mau order")).await.unwrap();
        let (combined, metadata) = buffer.force_flush("628@c.us").await.unwrap().unwrap();
        assert_eq!(combined, "Halo\nSaya mau order");
        assert_eq!(metadata["message_id"], "m1");
    }

    #[tokio::test]
    async fn non_chat_tasks_are_acked_and_skipped() {
        let (handler, buffer) = handler();
        handler
            .handle(json!({"type": "something_else"}))
            .await
            .unwrap();
        assert!(buffer.active_chat_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn location_without_geocoder_still_buffers() {
        let (handler, buffer) = handler();
        let mut payload = task("m1", "");
        payload["message_type"] = json!("location");
        payload["metadata"]["location"] = json!({"latitude": -6.2, "longitude": 106.8});
        handler.handle(payload).await.unwrap();

        let (combined, _) = buffer.force_flush("628@c.us").await.unwrap().unwrap();
        assert!(combined.contains("shared a location"));
        assert!(combined.contains("-6.2"));
    }
}
