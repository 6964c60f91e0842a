//! Midtrans gateway client (charge API).

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use tracing::{debug, error};

use crate::domain::{Order, PaymentStatus};
use crate::error::ToolError;

use super::{PaymentClient, PaymentInstruction};

const SANDBOX_BASE_URL: &str = "https://api.sandbox.midtrans.com";
const PRODUCTION_BASE_URL: &str = "https://api.midtrans.com";

pub struct MidtransClient {
    http: reqwest::Client,
    server_key: String,
    base_url: String,
}

impl MidtransClient {
    pub fn new(server_key: impl Into<String>, is_production: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            server_key: server_key.into(),
            base_url: if is_production {
                PRODUCTION_BASE_URL.to_string()
            } else {
                SANDBOX_BASE_URL.to_string()
            },
        }
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn auth_header(&self) -> String {
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:", self.server_key));
        format!("Basic {token}")
    }

    /// Midtrans `transaction_status` values mapped onto the payment machine.
    fn map_status(raw: &str) -> PaymentStatus {
        match raw {
            "settlement" | "capture" => PaymentStatus::Paid,
            "pending" => PaymentStatus::PendingPayment,
            "deny" | "failure" => PaymentStatus::Failed,
            "expire" => PaymentStatus::Expired,
            "cancel" => PaymentStatus::Cancelled,
            "refund" | "partial_refund" => PaymentStatus::Refunded,
            _ => PaymentStatus::PendingPayment,
        }
    }

    fn charge_payload(order: &Order, method: &str) -> Value {
        let mut payload = json!({
            "transaction_details": {
                "order_id": order.id,
                "gross_amount": order.total.0,
            },
        });
        match method {
            "ewallet" => {
                payload["payment_type"] = json!("gopay");
                payload["gopay"] = json!({"enable_callback": true});
            }
            "qris" => {
                payload["payment_type"] = json!("qris");
                payload["qris"] = json!({"acquirer": "gopay"});
            }
            _ => {
                payload["payment_type"] = json!("bank_transfer");
                payload["bank_transfer"] = json!({"bank": "bca"});
            }
        }
        payload
    }
}

#[async_trait]
impl PaymentClient for MidtransClient {
    fn provider(&self) -> &'static str {
        "midtrans"
    }

    async fn create_transaction(
        &self,
        order: &Order,
        method: &str,
    ) -> Result<PaymentInstruction, ToolError> {
        let url = format!("{}/v2/charge", self.base_url);
        debug!(order_id = %order.id, method, "midtrans charge");

        let response = self
            .http
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&Self::charge_payload(order, method))
            .send()
            .await
            .map_err(|e| ToolError::Payment(e.to_string()))?;

        if response.status() != reqwest::StatusCode::CREATED
            && response.status() != reqwest::StatusCode::OK
        {
            let body = response.text().await.unwrap_or_default();
            error!(order_id = %order.id, %body, "midtrans charge failed");
            return Err(ToolError::Payment(format!("charge failed: {body}")));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| ToolError::Payment(e.to_string()))?;

        let external_id = result["transaction_id"]
            .as_str()
            .unwrap_or(&order.id)
            .to_string();

        // Deeplink for e-wallets, VA number text for bank transfer, QR for QRIS.
        let payment_url = result["actions"]
            .as_array()
            .and_then(|actions| {
                actions.iter().find_map(|a| {
                    let name = a["name"].as_str()?;
                    if name == "deeplink-redirect" || name == "generate-qr-code" {
                        a["url"].as_str().map(str::to_string)
                    } else {
                        None
                    }
                })
            })
            .or_else(|| {
                result["va_numbers"][0]["va_number"]
                    .as_str()
                    .map(|va| format!("va:{va}"))
            });

        Ok(PaymentInstruction {
            external_id,
            payment_url,
            raw: result,
        })
    }

    async fn check_status(&self, external_id: &str) -> Result<PaymentStatus, ToolError> {
        let url = format!("{}/v2/{external_id}/status", self.base_url);
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
        Ok(Self::map_status(
            result["transaction_status"].as_str().unwrap_or("pending"),
        ))
    }

    async fn cancel(&self, external_id: &str) -> Result<(), ToolError> {
        let url = format!("{}/v2/{external_id}/cancel", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| ToolError::Payment(e.to_string()))?;

        // 412 means the transaction is already in a final state.
        let status = response.status().as_u16();
        if ![200, 201, 412].contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Payment(format!("cancel failed: {body}")));
        }
        Ok(())
    }

    /// `sha512(order_id + status_code + gross_amount + server_key)` must
    /// equal the webhook's `signature_key`. Compared in constant time so
    /// the server key cannot be probed through response timing.
    fn verify_webhook_signature(&self, payload: &Value) -> bool {
        let (Some(order_id), Some(status_code), Some(gross_amount), Some(signature)) = (
            payload["order_id"].as_str(),
            payload["status_code"].as_str(),
            payload["gross_amount"].as_str(),
            payload["signature_key"].as_str(),
        ) else {
            return false;
        };
        let provided = match hex::decode(signature) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };

        let mut hasher = Sha512::new();
        hasher.update(order_id.as_bytes());
        hasher.update(status_code.as_bytes());
        hasher.update(gross_amount.as_bytes());
        hasher.update(self.server_key.as_bytes());
        let expected = hasher.finalize();
        bool::from(expected.as_slice().ct_eq(&provided))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(MidtransClient::map_status("settlement"), PaymentStatus::Paid);
        assert_eq!(MidtransClient::map_status("capture"), PaymentStatus::Paid);
        assert_eq!(
            MidtransClient::map_status("pending"),
            PaymentStatus::PendingPayment
        );
        assert_eq!(MidtransClient::map_status("expire"), PaymentStatus::Expired);
        assert_eq!(MidtransClient::map_status("deny"), PaymentStatus::Failed);
    }

    #[test]
    fn webhook_signature_roundtrip() {
        let client = MidtransClient::new("secret-key", false);
        let mut hasher = Sha512::new();
        hasher.update(b"order-1");
        hasher.update(b"200");
        hasher.update(b"50000.00");
        hasher.update(b"secret-key");
        let signature = hex::encode(hasher.finalize());

        let payload = json!({
            "order_id": "order-1",
            "status_code": "200",
            "gross_amount": "50000.00",
            "signature_key": signature,
        });
        assert!(client.verify_webhook_signature(&payload));

        let tampered = json!({
            "order_id": "order-2",
            "status_code": "200",
            "gross_amount": "50000.00",
            "signature_key": signature,
        });
        assert!(!client.verify_webhook_signature(&tampered));
    }

    #[test]
    fn malformed_signature_rejected() {
        let client = MidtransClient::new("secret-key", false);
        for signature in ["not-hex-at-all", "abcd", ""] {
            let payload = json!({
                "order_id": "order-1",
                "status_code": "200",
                "gross_amount": "50000.00",
                "signature_key": signature,
            });
            assert!(
                !client.verify_webhook_signature(&payload),
                "signature: {signature}"
            );
        }
    }

    #[test]
    fn charge_payload_per_method() {
        let mut order = Order::create("t1", "c1");
        order
            .add_item(
                crate::domain::OrderItem::new("P1", "P1", 2, crate::domain::Money(10_000), None)
                    .unwrap(),
            )
            .unwrap();

        let bank = MidtransClient::charge_payload(&order, "bank_transfer");
        assert_eq!(bank["payment_type"], "bank_transfer");
        assert_eq!(bank["transaction_details"]["gross_amount"], 20_000);

        let qris = MidtransClient::charge_payload(&order, "qris");
        assert_eq!(qris["payment_type"], "qris");

        let unknown = MidtransClient::charge_payload(&order, "pigeon");
        assert_eq!(unknown["payment_type"], "bank_transfer");
    }

    #[tokio::test]
    async fn unreachable_gateway_is_payment_error() {
        let client = MidtransClient::new("k", false).with_base_url("http://127.0.0.1:1");
        let order = Order::create("t1", "c1");
        let err = client
            .create_transaction(&order, "bank_transfer")
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Payment(_)));
    }
}
