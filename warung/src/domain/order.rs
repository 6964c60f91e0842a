//! Order aggregate with its status machine, and the payment status machine.
//!
//! ```text
//! PENDING -> CONFIRMED -> PROCESSING -> SHIPPED -> DELIVERED
//!     |           |            |
//!     v           v            v
//! CANCELLED   CANCELLED    CANCELLED
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Monetary amount in the smallest currency unit (Rupiah has no cents, so
/// this is simply whole Rupiah).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(pub i64);

impl Money {
    pub fn zero() -> Self {
        Money(0)
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64
    }
}

impl std::ops::Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl std::ops::Mul<u32> for Money {
    type Output = Money;
    fn mul(self, rhs: u32) -> Money {
        Money(self.0 * rhs as i64)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "CONFIRMED" => Some(Self::Confirmed),
            "PROCESSING" => Some(Self::Processing),
            "SHIPPED" => Some(Self::Shipped),
            "DELIVERED" => Some(Self::Delivered),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        use OrderStatus::*;
        let allowed: &[OrderStatus] = match self {
            Pending => &[Confirmed, Cancelled],
            Confirmed => &[Processing, Cancelled],
            Processing => &[Shipped, Cancelled],
            Shipped => &[Delivered],
            Delivered => &[],
            Cancelled => &[],
        };
        allowed.contains(&target)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    PendingPayment,
    Paid,
    Failed,
    Refunded,
    Cancelled,
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::PendingPayment => "PENDING_PAYMENT",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::Cancelled => "CANCELLED",
            PaymentStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "PENDING_PAYMENT" => Some(Self::PendingPayment),
            "PAID" => Some(Self::Paid),
            "FAILED" => Some(Self::Failed),
            "REFUNDED" => Some(Self::Refunded),
            "CANCELLED" => Some(Self::Cancelled),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, target: PaymentStatus) -> bool {
        use PaymentStatus::*;
        let allowed: &[PaymentStatus] = match self {
            Pending => &[PendingPayment, Cancelled],
            PendingPayment => &[Paid, Failed, Expired, Cancelled],
            Paid => &[Refunded],
            Failed | Refunded | Cancelled | Expired => &[],
        };
        allowed.contains(&target)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub product_name: String,
    pub variant_sku: Option<String>,
    pub quantity: u32,
    pub unit_price: Money,
    pub subtotal: Money,
}

impl OrderItem {
    pub fn new(
        product_id: &str,
        product_name: &str,
        quantity: u32,
        unit_price: Money,
        variant_sku: Option<String>,
    ) -> Result<Self, DomainError> {
        if quantity == 0 {
            return Err(DomainError::Invariant("quantity must be positive".into()));
        }
        Ok(Self {
            product_id: product_id.to_string(),
            product_name: product_name.to_string(),
            variant_sku,
            quantity,
            unit_price,
            subtotal: unit_price * quantity,
        })
    }

    fn set_quantity(&mut self, quantity: u32) {
        self.quantity = quantity;
        self.subtotal = self.unit_price * quantity;
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub tenant_id: String,
    pub customer_id: String,
    pub items: Vec<OrderItem>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub subtotal: Money,
    pub shipping_cost: Money,
    pub total: Money,
    pub shipping_address: Option<serde_json::Value>,
    pub payment_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn create(tenant_id: &str, customer_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            customer_id: customer_id.to_string(),
            items: Vec::new(),
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            subtotal: Money::zero(),
            shipping_cost: Money::zero(),
            total: Money::zero(),
            shipping_address: None,
            payment_id: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    /// Add an item; duplicate `(product_id, variant_sku)` lines are coalesced
    /// by summing quantities. Only `PENDING` orders can be modified.
    pub fn add_item(&mut self, item: OrderItem) -> Result<(), DomainError> {
        if self.status != OrderStatus::Pending {
            return Err(DomainError::Invariant(format!(
                "cannot add items to order in {} status",
                self.status.as_str()
            )));
        }

        if let Some(existing) = self.items.iter_mut().find(|existing| {
            existing.product_id == item.product_id && existing.variant_sku == item.variant_sku
        }) {
            let merged = existing.quantity + item.quantity;
            existing.set_quantity(merged);
        } else {
            self.items.push(item);
        }
        self.recalculate();
        Ok(())
    }

    pub fn remove_item(
        &mut self,
        product_id: &str,
        variant_sku: Option<&str>,
    ) -> Result<(), DomainError> {
        if self.status != OrderStatus::Pending {
            return Err(DomainError::Invariant(format!(
                "cannot remove items from order in {} status",
                self.status.as_str()
            )));
        }
        self.items
            .retain(|i| !(i.product_id == product_id && i.variant_sku.as_deref() == variant_sku));
        self.recalculate();
        Ok(())
    }

    /// Move to a new status if the transition is legal; returns the previous
    /// status for event publishing. No mutation on rejection.
    pub fn set_status(&mut self, target: OrderStatus) -> Result<OrderStatus, DomainError> {
        if !self.status.can_transition_to(target) {
            return Err(DomainError::InvalidTransition {
                entity: "order",
                from: self.status.as_str().to_string(),
                to: target.as_str().to_string(),
            });
        }
        let from = self.status;
        self.status = target;
        self.updated_at = Utc::now();
        Ok(from)
    }

    pub fn set_payment_status(
        &mut self,
        target: PaymentStatus,
    ) -> Result<PaymentStatus, DomainError> {
        if !self.payment_status.can_transition_to(target) {
            return Err(DomainError::InvalidTransition {
                entity: "payment",
                from: self.payment_status.as_str().to_string(),
                to: target.as_str().to_string(),
            });
        }
        let from = self.payment_status;
        self.payment_status = target;
        self.updated_at = Utc::now();
        Ok(from)
    }

    /// Confirm for checkout, optionally updating the shipping address.
    pub fn confirm(
        &mut self,
        shipping_address: Option<serde_json::Value>,
    ) -> Result<OrderStatus, DomainError> {
        if self.items.is_empty() {
            return Err(DomainError::Invariant("cannot confirm an empty order".into()));
        }
        if let Some(address) = shipping_address {
            self.shipping_address = Some(address);
        }
        self.set_status(OrderStatus::Confirmed)
    }

    pub fn cancel(&mut self, reason: Option<String>) -> Result<OrderStatus, DomainError> {
        if let Some(reason) = reason {
            self.notes = Some(match self.notes.take() {
                Some(notes) => format!("{notes}\ncancelled: {reason}"),
                None => format!("cancelled: {reason}"),
            });
        }
        self.set_status(OrderStatus::Cancelled)
    }

    fn recalculate(&mut self) {
        self.subtotal = self
            .items
            .iter()
            .fold(Money::zero(), |acc, i| acc + i.subtotal);
        self.total = self.subtotal + self.shipping_cost;
        self.updated_at = Utc::now();
    }

    /// Compact JSON summary used by tool results.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "order_id": self.id,
            "status": self.status.as_str(),
            "payment_status": self.payment_status.as_str(),
            "item_count": self.item_count(),
            "subtotal": self.subtotal.as_f64(),
            "total": self.total.as_f64(),
            "items": self.items.iter().map(|i| serde_json::json!({
                "product_id": i.product_id,
                "product_name": i.product_name,
                "variant_sku": i.variant_sku,
                "quantity": i.quantity,
                "unit_price": i.unit_price.as_f64(),
                "subtotal": i.subtotal.as_f64(),
            })).collect::<Vec<_>>(),
        })
    }
}

/// Payment record for an order, tracked alongside the gateway.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: String,
    pub order_id: String,
    pub tenant_id: String,
    pub provider: String,
    pub method: Option<String>,
    pub amount: Money,
    pub status: PaymentStatus,
    pub external_id: Option<String>,
    pub payment_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn new(order: &Order, provider: &str, method: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            order_id: order.id.clone(),
            tenant_id: order.tenant_id.clone(),
            provider: provider.to_string(),
            method,
            amount: order.total,
            status: PaymentStatus::Pending,
            external_id: None,
            payment_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, target: PaymentStatus) -> Result<PaymentStatus, DomainError> {
        if !self.status.can_transition_to(target) {
            return Err(DomainError::InvalidTransition {
                entity: "payment",
                from: self.status.as_str().to_string(),
                to: target.as_str().to_string(),
            });
        }
        let from = self.status;
        self.status = target;
        self.updated_at = Utc::now();
        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(product: &str, qty: u32, price: i64) -> OrderItem {
        OrderItem::new(product, product, qty, Money(price), None).unwrap()
    }

    #[test]
    fn order_status_machine() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Delivered));
        assert!(!Pending.can_transition_to(Shipped));
        assert!(!Shipped.can_transition_to(Cancelled));
        assert!(!Delivered.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Pending));
    }

    #[test]
    fn payment_status_machine() {
        use PaymentStatus::*;
        assert!(Pending.can_transition_to(PendingPayment));
        assert!(PendingPayment.can_transition_to(Paid));
        assert!(PendingPayment.can_transition_to(Expired));
        assert!(Paid.can_transition_to(Refunded));
        assert!(!Paid.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Paid));
        assert!(!Refunded.can_transition_to(Paid));
    }

    /// **Scenario**: an illegal jump fails without mutating the order.
    #[test]
    fn illegal_transition_rejected_without_mutation() {
        let mut order = Order::create("t1", "c1");
        let before = order.updated_at;
        let err = order.set_status(OrderStatus::Shipped).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.updated_at, before);
    }

    /// **Scenario**: adding the same `(product, variant)` twice merges the
    /// line and recomputes totals.
    #[test]
    fn add_item_coalesces_duplicates() {
        let mut order = Order::create("t1", "c1");
        order.add_item(item("P1", 2, 15_000)).unwrap();
        order.add_item(item("P1", 3, 15_000)).unwrap();
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].quantity, 5);
        assert_eq!(order.subtotal, Money(75_000));
        assert_eq!(order.total, Money(75_000));
    }

    #[test]
    fn different_variants_stay_separate() {
        let mut order = Order::create("t1", "c1");
        order
            .add_item(OrderItem::new("P1", "P1", 1, Money(10_000), Some("S".into())).unwrap())
            .unwrap();
        order
            .add_item(OrderItem::new("P1", "P1", 1, Money(12_000), Some("L".into())).unwrap())
            .unwrap();
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.subtotal, Money(22_000));
    }

    #[test]
    fn add_item_refuses_non_pending() {
        let mut order = Order::create("t1", "c1");
        order.add_item(item("P1", 1, 5_000)).unwrap();
        order.confirm(None).unwrap();
        let err = order.add_item(item("P2", 1, 5_000)).unwrap_err();
        assert!(matches!(err, DomainError::Invariant(_)));
        assert_eq!(order.items.len(), 1);
    }

    #[test]
    fn confirm_requires_items() {
        let mut order = Order::create("t1", "c1");
        assert!(order.confirm(None).is_err());
        order.add_item(item("P1", 2, 10_000)).unwrap();
        let from = order.confirm(Some(serde_json::json!({"city": "Bandung"}))).unwrap();
        assert_eq!(from, OrderStatus::Pending);
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert!(order.shipping_address.is_some());
    }

    #[test]
    fn cancel_records_reason() {
        let mut order = Order::create("t1", "c1");
        order.add_item(item("P1", 1, 10_000)).unwrap();
        order.cancel(Some("changed my mind".into())).unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert!(order.notes.as_deref().unwrap().contains("changed my mind"));
    }

    #[test]
    fn zero_quantity_item_rejected() {
        assert!(OrderItem::new("P1", "P1", 0, Money(10), None).is_err());
    }

    #[test]
    fn payment_record_follows_machine() {
        let mut order = Order::create("t1", "c1");
        order.add_item(item("P1", 2, 10_000)).unwrap();
        let mut payment = PaymentRecord::new(&order, "midtrans", Some("qris".into()));
        assert_eq!(payment.amount, Money(20_000));
        payment.set_status(PaymentStatus::PendingPayment).unwrap();
        payment.set_status(PaymentStatus::Paid).unwrap();
        assert!(payment.set_status(PaymentStatus::Pending).is_err());
    }
}
