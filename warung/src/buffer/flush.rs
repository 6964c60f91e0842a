//! Background worker that flushes ready buffers.
//!
//! Ticks every `check_interval`, scans the active chat ids and dispatches
//! each ready buffer to the downstream handler. One chat's failure never
//! stops the loop, and shutdown drains every remaining buffer with a force
//! flush so no customer message is stranded in the cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::MessageBuffer;

/// Downstream processor for a flushed buffer. Implemented by the
/// orchestrator; the worker only knows this seam.
#[async_trait]
pub trait FlushHandler: Send + Sync {
    async fn handle(
        &self,
        chat_id: &str,
        combined: &str,
        metadata: Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

pub struct FlushWorker {
    buffer: Arc<MessageBuffer>,
    handler: Arc<dyn FlushHandler>,
    check_interval: Duration,
}

impl FlushWorker {
    pub fn new(
        buffer: Arc<MessageBuffer>,
        handler: Arc<dyn FlushHandler>,
        check_interval: Duration,
    ) -> Self {
        Self {
            buffer,
            handler,
            check_interval,
        }
    }

    /// Run until cancelled, then drain all remaining buffers.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(interval = ?self.check_interval, "flush worker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.check_interval) => {
                    self.tick().await;
                }
            }
        }

        if let Err(e) = self.drain().await {
            error!(error = %e, "error draining buffers on shutdown");
        }
        info!("flush worker stopped");
    }

    /// One pass over the active buffers.
    pub async fn tick(&self) {
        let chat_ids = match self.buffer.active_chat_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "error scanning buffers");
                return;
            }
        };
        if chat_ids.is_empty() {
            return;
        }
        debug!(count = chat_ids.len(), "checking active buffers");

        for chat_id in chat_ids {
            match self.buffer.should_flush(&chat_id).await {
                Ok(true) => self.flush_and_process(&chat_id).await,
                Ok(false) => {}
                Err(e) => error!(%chat_id, error = %e, "error checking buffer"),
            }
        }
    }

    async fn flush_and_process(&self, chat_id: &str) {
        let (combined, mut metadata) = match self.buffer.get_combined_message(chat_id).await {
            Ok(Some(flushed)) => flushed,
            Ok(None) => return, // another worker won the flush
            Err(e) => {
                error!(chat_id, error = %e, "error flushing buffer");
                return;
            }
        };

        if let Some(map) = metadata.as_object_mut() {
            map.insert("buffered".into(), json!(true));
            map.insert("original_length".into(), json!(combined.len()));
        }

        if let Err(e) = self.handler.handle(chat_id, &combined, metadata).await {
            error!(chat_id, error = %e, "flush handler failed");
        }
    }

    /// Force-flush everything that is still buffered.
    pub async fn drain(&self) -> Result<(), crate::error::CacheError> {
        let chat_ids = self.buffer.active_chat_ids().await?;
        if chat_ids.is_empty() {
            return Ok(());
        }
        info!(count = chat_ids.len(), "flushing remaining buffers");

        for chat_id in chat_ids {
            match self.buffer.force_flush(&chat_id).await {
                Ok(Some((combined, mut metadata))) => {
                    if let Some(map) = metadata.as_object_mut() {
                        map.insert("buffered".into(), json!(true));
                        map.insert("drained".into(), json!(true));
                    }
                    if let Err(e) = self.handler.handle(&chat_id, &combined, metadata).await {
                        error!(%chat_id, error = %e, "flush handler failed during drain");
                    }
                }
                Ok(None) => {}
                Err(e) => error!(%chat_id, error = %e, "error force-flushing"),
            }
        }
        Ok(())
    }
}
