//! WAHA (WhatsApp HTTP API) bridge client.

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info};

use crate::error::BusError;

/// Error type note: the sender treats bridge failures like transport
/// failures, so they reuse the bus error for the nack path.
pub struct WahaClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    default_session: String,
}

#[derive(Debug, Deserialize)]
pub struct SendTextResult {
    #[serde(alias = "messageId")]
    pub id: Option<String>,
}

impl WahaClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        default_session: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            default_session: default_session.into(),
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("X-Api-Key", key),
            None => builder,
        }
    }

    /// Send a text message; returns the bridge-side message id.
    pub async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        session: Option<&str>,
        reply_to: Option<&str>,
    ) -> Result<String, BusError> {
        let session = session.unwrap_or(&self.default_session);
        let url = format!("{}/api/sendText", self.base_url);

        let mut payload = json!({
            "chatId": chat_id,
            "text": text,
            "session": session,
        });
        if let Some(reply_to) = reply_to {
            payload["reply_to"] = json!(reply_to);
        }

        debug!(chat_id, session, chars = text.len(), "sending text via bridge");

        let response = self
            .request(self.http.post(&url).json(&payload))
            .send()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(chat_id, %status, %body, "bridge send failed");
            return Err(BusError::Connection(format!(
                "bridge returned {status}: {body}"
            )));
        }

        let result: SendTextResult = response
            .json()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        let id = result.id.unwrap_or_else(|| "unknown".to_string());

        info!(chat_id, message_id = %id, "message sent");
        Ok(id)
    }

    /// `true` when the bridge answers its sessions endpoint.
    pub async fn check_health(&self) -> bool {
        let url = format!("{}/api/sessions", self.base_url);
        match self.request(self.http.get(&url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                error!(error = %e, "bridge health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_bridge_is_connection_error() {
        let client = WahaClient::new("http://127.0.0.1:1", None, "default");
        let err = client
            .send_text("628@c.us", "halo", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Connection(_)));
        assert!(!client.check_health().await);
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let client = WahaClient::new("http://waha:3000/", None, "default");
        assert_eq!(client.base_url, "http://waha:3000");
    }
}
