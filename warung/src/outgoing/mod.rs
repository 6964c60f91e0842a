//! Outgoing message splitting and pacing.
//!
//! Long responses read badly as one WhatsApp wall of text; they are split
//! at sentence boundaries and published as separate bubbles with a short
//! delay between each. One producer task publishes a response's chunks in
//! order, so chunks of the same response never interleave.

mod splitter;

pub use splitter::MessageSplitter;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::bus::TaskPublisher;
use crate::error::BusError;

pub const DEFAULT_DELAY_BETWEEN: Duration = Duration::from_millis(1500);

/// Seam the orchestrator publishes responses through; implemented by
/// [`ResponsePublisher`] and by recording fakes in tests.
#[async_trait]
pub trait OutgoingPublisher: Send + Sync {
    async fn publish_split(
        &self,
        wa_session: &str,
        chat_id: &str,
        text: &str,
        metadata: Value,
    ) -> Result<Vec<String>, BusError>;
}

/// Publishes responses to the outgoing WhatsApp queue, splitting and pacing.
pub struct ResponsePublisher {
    publisher: Arc<TaskPublisher>,
    splitter: MessageSplitter,
    delay_between: Duration,
}

impl ResponsePublisher {
    pub fn new(publisher: Arc<TaskPublisher>) -> Self {
        Self {
            publisher,
            splitter: MessageSplitter::default(),
            delay_between: DEFAULT_DELAY_BETWEEN,
        }
    }

    pub fn with_delay_between(mut self, delay: Duration) -> Self {
        self.delay_between = delay;
        self
    }

    /// Publish a single outgoing message.
    pub async fn publish_message(
        &self,
        wa_session: &str,
        chat_id: &str,
        text: &str,
        metadata: Value,
    ) -> Result<String, BusError> {
        let message_id = Uuid::new_v4().to_string();
        self.publisher
            .publish(&json!({
                "message_id": message_id,
                "wa_session": wa_session,
                "chat_id": chat_id,
                "text": text,
                "metadata": metadata,
            }))
            .await?;
        debug!(message_id, chat_id, "published outgoing message");
        Ok(message_id)
    }

    /// Split `text` into chunks and publish each with `{chunk, total_chunks}`
    /// metadata, sleeping `delay_between` between publishes.
    pub async fn publish_split_message(
        &self,
        wa_session: &str,
        chat_id: &str,
        text: &str,
        metadata: Value,
    ) -> Result<Vec<String>, BusError> {
        let chunks = self.splitter.split_into_chunks(text);
        let total_chunks = chunks.len();
        let mut message_ids = Vec::with_capacity(total_chunks);

        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.delay_between).await;
            }

            let mut chunk_metadata = metadata.clone();
            if let Some(map) = chunk_metadata.as_object_mut() {
                map.insert("chunk".into(), json!(i + 1));
                map.insert("total_chunks".into(), json!(total_chunks));
            }

            let id = self
                .publish_message(wa_session, chat_id, chunk, chunk_metadata)
                .await?;
            message_ids.push(id);
        }

        debug!(chat_id, total_chunks, "published split response");
        Ok(message_ids)
    }
}

#[async_trait]
impl OutgoingPublisher for ResponsePublisher {
    async fn publish_split(
        &self,
        wa_session: &str,
        chat_id: &str,
        text: &str,
        metadata: Value,
    ) -> Result<Vec<String>, BusError> {
        self.publish_split_message(wa_session, chat_id, text, metadata)
            .await
    }
}
