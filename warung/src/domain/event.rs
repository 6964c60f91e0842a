//! Domain events published on the topic exchange.
//!
//! The routing key is the dotted event name; consumers bind with patterns
//! like `order.*` or `payment.status_changed`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    OrderCreated {
        order_id: String,
        tenant_id: String,
        customer_id: String,
    },
    OrderStatusChanged {
        order_id: String,
        from: String,
        to: String,
    },
    OrderItemAdded {
        order_id: String,
        product_id: String,
        quantity: u32,
    },
    PaymentInitiated {
        payment_id: String,
        order_id: String,
        provider: String,
    },
    PaymentStatusChanged {
        payment_id: String,
        from: String,
        to: String,
    },
    ConversationCreated {
        conversation_id: String,
        tenant_id: String,
        customer_id: String,
    },
    ConversationMessageAdded {
        conversation_id: String,
        role: String,
    },
    ConversationStateChanged {
        conversation_id: String,
        from: String,
        to: String,
    },
    CustomerCreated {
        customer_id: String,
        tenant_id: String,
    },
    CustomerUpdated {
        customer_id: String,
    },
    LabelApplied {
        conversation_id: String,
        label_id: String,
    },
    ProcessingStarted {
        chat_id: String,
    },
    ProcessingCompleted {
        chat_id: String,
        tokens_used: u32,
    },
    ProcessingFailed {
        chat_id: String,
        error: String,
    },
}

impl DomainEvent {
    /// Dotted routing key on the event exchange.
    pub fn routing_key(&self) -> &'static str {
        match self {
            DomainEvent::OrderCreated { .. } => "order.created",
            DomainEvent::OrderStatusChanged { .. } => "order.status_changed",
            DomainEvent::OrderItemAdded { .. } => "order.item_added",
            DomainEvent::PaymentInitiated { .. } => "payment.initiated",
            DomainEvent::PaymentStatusChanged { .. } => "payment.status_changed",
            DomainEvent::ConversationCreated { .. } => "conversation.created",
            DomainEvent::ConversationMessageAdded { .. } => "conversation.message_added",
            DomainEvent::ConversationStateChanged { .. } => "conversation.state_changed",
            DomainEvent::CustomerCreated { .. } => "customer.created",
            DomainEvent::CustomerUpdated { .. } => "customer.updated",
            DomainEvent::LabelApplied { .. } => "label.applied",
            DomainEvent::ProcessingStarted { .. } => "processing.started",
            DomainEvent::ProcessingCompleted { .. } => "processing.completed",
            DomainEvent::ProcessingFailed { .. } => "processing.failed",
        }
    }

    pub fn payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Fire-and-forget sink for domain events. The bus implementation publishes
/// on the topic exchange; failures are logged there, never propagated, so a
/// broker hiccup cannot fail a customer-facing operation.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: DomainEvent);
}

/// Sink that drops everything; wiring default for tests and tools that run
/// without a broker.
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn publish(&self, _event: DomainEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_keys_are_dotted_names() {
        let e = DomainEvent::OrderCreated {
            order_id: "o1".into(),
            tenant_id: "t1".into(),
            customer_id: "c1".into(),
        };
        assert_eq!(e.routing_key(), "order.created");

        let e = DomainEvent::PaymentStatusChanged {
            payment_id: "p1".into(),
            from: "PENDING_PAYMENT".into(),
            to: "PAID".into(),
        };
        assert_eq!(e.routing_key(), "payment.status_changed");
    }

    #[test]
    fn payload_carries_type_tag() {
        let e = DomainEvent::ProcessingCompleted {
            chat_id: "628@c.us".into(),
            tokens_used: 321,
        };
        let v = e.payload();
        assert_eq!(v["type"], "processing_completed");
        assert_eq!(v["tokens_used"], 321);
    }
}
