//! Payment tools: initiate a gateway transaction and poll its status.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::domain::{DomainEvent, EventSink, PaymentRecord, PaymentStatus};
use crate::error::{RepoError, ToolError};
use crate::payment::PaymentClient;
use crate::repo::{OrderRepo, PaymentRepo};

use super::{required_str, Tool, ToolCallContext, ToolSpec};

pub struct InitiatePaymentTool {
    payments: Arc<dyn PaymentRepo>,
    orders: Arc<dyn OrderRepo>,
    gateway: Arc<dyn PaymentClient>,
    events: Arc<dyn EventSink>,
}

impl InitiatePaymentTool {
    pub fn new(
        payments: Arc<dyn PaymentRepo>,
        orders: Arc<dyn OrderRepo>,
        gateway: Arc<dyn PaymentClient>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            payments,
            orders,
            gateway,
            events,
        }
    }
}

#[async_trait]
impl Tool for InitiatePaymentTool {
    fn name(&self) -> &str {
        "initiate_payment"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "initiate_payment".into(),
            description: "Start a payment for a confirmed order. \
                          Returns payment instructions for the customer."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "order_id": {"type": "string"},
                    "payment_method": {
                        "type": "string",
                        "enum": ["bank_transfer", "ewallet", "qris"]
                    }
                },
                "required": ["order_id", "payment_method"]
            }),
        }
    }

    async fn call(&self, args: Value, _ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let order_id = required_str(&args, "order_id")?;
        let method = required_str(&args, "payment_method")?;

        let mut order = self
            .orders
            .get_by_id(order_id)
            .await?
            .ok_or(RepoError::NotFound {
                entity: "order",
                id: order_id.to_string(),
            })?;

        let mut payment = PaymentRecord::new(&order, self.gateway.provider(), Some(method.into()));
        let instruction = self.gateway.create_transaction(&order, method).await?;

        payment.external_id = Some(instruction.external_id.clone());
        payment.payment_url = instruction.payment_url.clone();
        payment.set_status(PaymentStatus::PendingPayment)?;
        self.payments.save(&payment).await?;

        order.payment_id = Some(payment.id.clone());
        if order.payment_status.can_transition_to(PaymentStatus::PendingPayment) {
            order.set_payment_status(PaymentStatus::PendingPayment)?;
        }
        self.orders.save(&order).await?;

        self.events
            .publish(DomainEvent::PaymentInitiated {
                payment_id: payment.id.clone(),
                order_id: order.id.clone(),
                provider: self.gateway.provider().to_string(),
            })
            .await;

        Ok(json!({
            "payment_id": payment.id,
            "order_id": order.id,
            "provider": payment.provider,
            "method": method,
            "amount": payment.amount.as_f64(),
            "status": payment.status.as_str(),
            "payment_url": payment.payment_url,
        }))
    }
}

pub struct CheckPaymentStatusTool {
    payments: Arc<dyn PaymentRepo>,
    gateway: Arc<dyn PaymentClient>,
    events: Arc<dyn EventSink>,
}

impl CheckPaymentStatusTool {
    pub fn new(
        payments: Arc<dyn PaymentRepo>,
        gateway: Arc<dyn PaymentClient>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            payments,
            gateway,
            events,
        }
    }
}

#[async_trait]
impl Tool for CheckPaymentStatusTool {
    fn name(&self) -> &str {
        "check_payment_status"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "check_payment_status".into(),
            description: "Check whether a payment has been completed.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "payment_id": {"type": "string"}
                },
                "required": ["payment_id"]
            }),
        }
    }

    async fn call(&self, args: Value, _ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let payment_id = required_str(&args, "payment_id")?;
        let mut payment = self
            .payments
            .get_by_id(payment_id)
            .await?
            .ok_or(RepoError::NotFound {
                entity: "payment",
                id: payment_id.to_string(),
            })?;

        if let Some(external_id) = payment.external_id.clone() {
            let gateway_status = self.gateway.check_status(&external_id).await?;
            // Only legal moves are applied; a late "pending" from the
            // gateway cannot demote a payment that already settled.
            if gateway_status != payment.status
                && payment.status.can_transition_to(gateway_status)
            {
                let from = payment.set_status(gateway_status)?;
                self.payments.save(&payment).await?;
                self.events
                    .publish(DomainEvent::PaymentStatusChanged {
                        payment_id: payment.id.clone(),
                        from: from.as_str().to_string(),
                        to: payment.status.as_str().to_string(),
                    })
                    .await;
            }
        }

        Ok(json!({
            "payment_id": payment.id,
            "order_id": payment.order_id,
            "status": payment.status.as_str(),
            "amount": payment.amount.as_f64(),
            "payment_url": payment.payment_url,
        }))
    }
}
