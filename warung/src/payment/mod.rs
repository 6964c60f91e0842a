//! Payment gateway clients behind one seam.
//!
//! The agent drives payments through [`PaymentClient`]; webhooks reconcile
//! them later. Wire formats are provider-specific; only the contract here is
//! normative: create a transaction, check its status, cancel it, and verify
//! a webhook payload's authenticity.

mod midtrans;
mod xendit;

pub use midtrans::MidtransClient;
pub use xendit::XenditClient;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{Order, PaymentStatus};
use crate::error::ToolError;

/// Instruction handed back to the customer after creating a transaction.
#[derive(Clone, Debug)]
pub struct PaymentInstruction {
    /// Gateway-side transaction id.
    pub external_id: String,
    /// URL (or deeplink) the customer pays at, when the method has one.
    pub payment_url: Option<String>,
    /// Raw gateway response for diagnostics.
    pub raw: Value,
}

#[async_trait]
pub trait PaymentClient: Send + Sync {
    fn provider(&self) -> &'static str;

    async fn create_transaction(
        &self,
        order: &Order,
        method: &str,
    ) -> Result<PaymentInstruction, ToolError>;

    async fn check_status(&self, external_id: &str) -> Result<PaymentStatus, ToolError>;

    async fn cancel(&self, external_id: &str) -> Result<(), ToolError>;

    /// Verify a webhook payload's signature. Called on the worker side
    /// before a payment status from a webhook is trusted.
    fn verify_webhook_signature(&self, payload: &Value) -> bool;
}
