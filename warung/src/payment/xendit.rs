//! Xendit gateway client (invoice API).

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;
use tracing::{debug, error};

use crate::domain::{Order, PaymentStatus};
use crate::error::ToolError;

use super::{PaymentClient, PaymentInstruction};

const BASE_URL: &str = "https://api.xendit.co";

/// Invoice validity before Xendit expires it.
const INVOICE_DURATION_SECS: u32 = 86_400;

pub struct XenditClient {
    http: reqwest::Client,
    secret_key: String,
    /// Verification token Xendit echoes back on webhooks.
    callback_token: String,
    base_url: String,
}

impl XenditClient {
    pub fn new(secret_key: impl Into<String>, callback_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key: secret_key.into(),
            callback_token: callback_token.into(),
            base_url: BASE_URL.to_string(),
        }
    }

    fn auth_header(&self) -> String {
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:", self.secret_key));
        format!("Basic {token}")
    }

    fn map_status(raw: &str) -> PaymentStatus {
        match raw {
            "PAID" | "SETTLED" => PaymentStatus::Paid,
            "PENDING" => PaymentStatus::PendingPayment,
            "EXPIRED" => PaymentStatus::Expired,
            _ => PaymentStatus::PendingPayment,
        }
    }
}

#[async_trait]
impl PaymentClient for XenditClient {
    fn provider(&self) -> &'static str {
        "xendit"
    }

    async fn create_transaction(
        &self,
        order: &Order,
        _method: &str,
    ) -> Result<PaymentInstruction, ToolError> {
        let url = format!("{}/v2/invoices", self.base_url);
        debug!(order_id = %order.id, "xendit invoice");

        let payload = json!({
            "external_id": order.id,
            "amount": order.total.0,
            "invoice_duration": INVOICE_DURATION_SECS,
            "description": format!("Order {}", order.id),
        });

        let response = self
            .http
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&payload)
            .send()
            .await
            .map_err(|e| ToolError::Payment(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(order_id = %order.id, %body, "xendit invoice failed");
            return Err(ToolError::Payment(format!("create invoice failed: {body}")));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| ToolError::Payment(e.to_string()))?;

        Ok(PaymentInstruction {
            external_id: result["id"].as_str().unwrap_or(&order.id).to_string(),
            payment_url: result["invoice_url"].as_str().map(str::to_string),
            raw: result,
        })
    }

    async fn check_status(&self, external_id: &str) -> Result<PaymentStatus, ToolError> {
        let url = format!("{}/v2/invoices/{external_id}", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| ToolError::Payment(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Payment(format!("status check failed: {body}")));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| ToolError::Payment(e.to_string()))?;
        Ok(Self::map_status(result["status"].as_str().unwrap_or("PENDING")))
    }

    async fn cancel(&self, external_id: &str) -> Result<(), ToolError> {
        let url = format!("{}/invoices/{external_id}/expire!", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| ToolError::Payment(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Payment(format!("expire failed: {body}")));
        }
        Ok(())
    }

    /// Xendit sends an `x-callback-token` header; the gateway folds it into
    /// the queued payload so the worker can compare it here. The comparison
    /// is constant-time to keep the token unprobeable through timing.
    fn verify_webhook_signature(&self, payload: &Value) -> bool {
        if self.callback_token.is_empty() {
            return false;
        }
        payload["callback_token"]
            .as_str()
            .map(|t| bool::from(t.as_bytes().ct_eq(self.callback_token.as_bytes())))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(XenditClient::map_status("PAID"), PaymentStatus::Paid);
        assert_eq!(XenditClient::map_status("SETTLED"), PaymentStatus::Paid);
        assert_eq!(
            XenditClient::map_status("PENDING"),
            PaymentStatus::PendingPayment
        );
        assert_eq!(XenditClient::map_status("EXPIRED"), PaymentStatus::Expired);
    }

    #[test]
    fn webhook_token_check() {
        let client = XenditClient::new("sk", "token-123");
        assert!(client.verify_webhook_signature(&json!({"callback_token": "token-123"})));
        assert!(!client.verify_webhook_signature(&json!({"callback_token": "wrong"})));
        assert!(!client.verify_webhook_signature(&json!({})));

        let no_token = XenditClient::new("sk", "");
        assert!(!no_token.verify_webhook_signature(&json!({"callback_token": ""})));
    }
}
