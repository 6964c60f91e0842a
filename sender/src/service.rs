//! Outgoing message delivery and job status bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{error, info};

use warung::bus::MessageHandler;
use warung::cache::KvCache;
use warung::waha::WahaClient;

const JOB_KEY_PREFIX: &str = "crm:job:";
const JOB_STATUS_TTL: Duration = Duration::from_secs(3600);

pub struct SenderHandler {
    waha: Arc<WahaClient>,
    cache: Arc<dyn KvCache>,
}

impl SenderHandler {
    pub fn new(waha: Arc<WahaClient>, cache: Arc<dyn KvCache>) -> Self {
        Self { waha, cache }
    }

    /// Annotate the cached job record with the bridge outcome. Best effort;
    /// a cache hiccup must not fail a message that was already delivered.
    async fn update_job_status(
        &self,
        job_id: &str,
        status: &str,
        wa_message_id: Option<&str>,
        error_text: Option<&str>,
    ) {
        let key = format!("{JOB_KEY_PREFIX}{job_id}");
        let raw = match self.cache.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                error!(job_id, error = %e, "job status read failed");
                return;
            }
        };

        let mut record: Value = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(_) => return,
        };
        if let Some(map) = record.as_object_mut() {
            map.insert("wa_status".into(), json!(status));
            if let Some(id) = wa_message_id {
                map.insert("wa_message_id".into(), json!(id));
            }
            if let Some(err) = error_text {
                map.insert("wa_error".into(), json!(err));
            }
        }

        if let Err(e) = self
            .cache
            .set(&key, &record.to_string(), Some(JOB_STATUS_TTL))
            .await
        {
            error!(job_id, error = %e, "job status write failed");
        }
    }
}

#[async_trait]
impl MessageHandler for SenderHandler {
    async fn handle(
        &self,
        payload: Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let chat_id = payload["chat_id"].as_str().unwrap_or_default();
        let text = payload["text"].as_str().unwrap_or_default();
        let session = payload["wa_session"].as_str();
        let reply_to = payload["reply_to"].as_str();
        let job_id = payload["metadata"]["job_id"].as_str().map(str::to_string);

        if chat_id.is_empty() || text.is_empty() {
            // Malformed outgoing message; nothing sensible to deliver.
            return Err("outgoing message missing chat_id or text".into());
        }

        match self.waha.send_text(chat_id, text, session, reply_to).await {
            Ok(wa_message_id) => {
                info!(
                    chat_id,
                    wa_message_id = %wa_message_id,
                    chunk = ?payload["metadata"]["chunk"],
                    "message delivered"
                );
                if let Some(job_id) = job_id {
                    self.update_job_status(&job_id, "WA_SENT", Some(&wa_message_id), None)
                        .await;
                }
                Ok(())
            }
            Err(e) => {
                error!(chat_id, error = %e, "bridge delivery failed");
                if let Some(job_id) = job_id {
                    self.update_job_status(&job_id, "WA_FAILED", None, Some(&e.to_string()))
                        .await;
                }
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warung::cache::InMemoryKvCache;

    fn handler() -> (SenderHandler, Arc<InMemoryKvCache>) {
        let cache = Arc::new(InMemoryKvCache::new());
        let handler = SenderHandler::new(
            // Unreachable bridge: every send fails, which is what the
            // delivery-failure tests need.
            Arc::new(WahaClient::new("http://127.0.0.1:1", None, "default")),
            cache.clone(),
        );
        (handler, cache)
    }

    #[tokio::test]
    async fn malformed_message_is_rejected() {
        let (handler, _) = handler();
        let err = handler.handle(json!({"text": "hi"})).await.unwrap_err();
        assert!(err.to_string().contains("missing chat_id"));
    }

    /// **Scenario**: a failed delivery nacks (Err) and records WA_FAILED on
    /// the tracked job.
    #[tokio::test]
    async fn failed_delivery_marks_job() {
        let (handler, cache) = handler();
        cache
            .set("crm:job:j1", r#"{"id": "j1", "status": "COMPLETED"}"#, None)
            .await
            .unwrap();

        let result = handler
            .handle(json!({
                "message_id": "m1",
                "wa_session": "session-1",
                "chat_id": "628@c.us",
                "text": "Halo!",
                "metadata": {"job_id": "j1", "chunk": 1, "total_chunks": 1},
            }))
            .await;
        assert!(result.is_err());

        let record: Value =
            serde_json::from_str(&cache.get("crm:job:j1").await.unwrap().unwrap()).unwrap();
        assert_eq!(record["wa_status"], "WA_FAILED");
        assert!(record["wa_error"].as_str().unwrap().len() > 1);
    }
}
