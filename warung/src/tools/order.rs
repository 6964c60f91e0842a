//! Order tools: the agent's hands on the order book.
//!
//! All mutations go through the domain state machine; an illegal request
//! from the model surfaces as a tool error result, not a database write.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::domain::{DomainEvent, EventSink, Order, OrderItem, OrderStatus};
use crate::error::{RepoError, ToolError};
use crate::repo::{OrderRepo, ProductRepo};

use super::{optional_str, required_str, Tool, ToolCallContext, ToolSpec};

pub struct CreateOrderTool {
    orders: Arc<dyn OrderRepo>,
    events: Arc<dyn EventSink>,
}

impl CreateOrderTool {
    pub fn new(orders: Arc<dyn OrderRepo>, events: Arc<dyn EventSink>) -> Self {
        Self { orders, events }
    }
}

#[async_trait]
impl Tool for CreateOrderTool {
    fn name(&self) -> &str {
        "create_order"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "create_order".into(),
            description: "Create a new empty order for the customer. \
                          Use when the customer wants to start placing an order."
                .into(),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn call(&self, _args: Value, ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let order = Order::create(&ctx.tenant_id, &ctx.customer_id);
        self.orders.save(&order).await?;
        self.events
            .publish(DomainEvent::OrderCreated {
                order_id: order.id.clone(),
                tenant_id: order.tenant_id.clone(),
                customer_id: order.customer_id.clone(),
            })
            .await;
        Ok(order.summary())
    }
}

pub struct AddToOrderTool {
    orders: Arc<dyn OrderRepo>,
    products: Arc<dyn ProductRepo>,
    events: Arc<dyn EventSink>,
}

impl AddToOrderTool {
    pub fn new(
        orders: Arc<dyn OrderRepo>,
        products: Arc<dyn ProductRepo>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            orders,
            products,
            events,
        }
    }
}

#[async_trait]
impl Tool for AddToOrderTool {
    fn name(&self) -> &str {
        "add_to_order"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "add_to_order".into(),
            description: "Add a product to the customer's current order. \
                          Creates an order first if none is active."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "product_id": {"type": "string"},
                    "quantity": {"type": "integer", "minimum": 1},
                    "variant_sku": {"type": "string"}
                },
                "required": ["product_id", "quantity"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let product_id = required_str(&args, "product_id")?;
        let quantity = args
            .get("quantity")
            .and_then(Value::as_u64)
            .filter(|q| *q > 0)
            .ok_or_else(|| ToolError::InvalidArgs("quantity must be a positive integer".into()))?
            as u32;
        let variant_sku = optional_str(&args, "variant_sku").map(str::to_string);

        // Later tools in the same turn must observe this order, so it is
        // created and saved before the item lookup can fail.
        let mut order = match self.orders.active_for_customer(&ctx.customer_id).await? {
            Some(order) => order,
            None => {
                let order = Order::create(&ctx.tenant_id, &ctx.customer_id);
                self.orders.save(&order).await?;
                self.events
                    .publish(DomainEvent::OrderCreated {
                        order_id: order.id.clone(),
                        tenant_id: order.tenant_id.clone(),
                        customer_id: order.customer_id.clone(),
                    })
                    .await;
                order
            }
        };

        let product = self
            .products
            .get_by_id(product_id)
            .await?
            .ok_or(RepoError::NotFound {
                entity: "product",
                id: product_id.to_string(),
            })?;

        let (unit_price, variant_name) = product.price_for(variant_sku.as_deref());
        let display_name = match variant_name {
            Some(variant) => format!("{} ({variant})", product.name),
            None => product.name.clone(),
        };

        let item = OrderItem::new(
            &product.id,
            &display_name,
            quantity,
            unit_price,
            variant_sku,
        )?;
        order.add_item(item)?;
        self.orders.save(&order).await?;

        self.events
            .publish(DomainEvent::OrderItemAdded {
                order_id: order.id.clone(),
                product_id: product.id.clone(),
                quantity,
            })
            .await;

        Ok(order.summary())
    }
}

pub struct GetOrderStatusTool {
    orders: Arc<dyn OrderRepo>,
}

impl GetOrderStatusTool {
    pub fn new(orders: Arc<dyn OrderRepo>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl Tool for GetOrderStatusTool {
    fn name(&self) -> &str {
        "get_order_status"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_order_status".into(),
            description: "Get the status and contents of a specific order.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "order_id": {"type": "string"}
                },
                "required": ["order_id"]
            }),
        }
    }

    async fn call(&self, args: Value, _ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let order_id = required_str(&args, "order_id")?;
        let order = self
            .orders
            .get_by_id(order_id)
            .await?
            .ok_or(RepoError::NotFound {
                entity: "order",
                id: order_id.to_string(),
            })?;
        Ok(order.summary())
    }
}

pub struct GetCustomerOrdersTool {
    orders: Arc<dyn OrderRepo>,
}

impl GetCustomerOrdersTool {
    pub fn new(orders: Arc<dyn OrderRepo>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl Tool for GetCustomerOrdersTool {
    fn name(&self) -> &str {
        "get_customer_orders"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_customer_orders".into(),
            description: "List the customer's order history, optionally filtered by status.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": ["PENDING", "CONFIRMED", "PROCESSING", "SHIPPED", "DELIVERED", "CANCELLED"]
                    }
                }
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let status = match optional_str(&args, "status") {
            Some(raw) => Some(OrderStatus::parse(raw).ok_or_else(|| {
                ToolError::InvalidArgs(format!("unknown order status: {raw}"))
            })?),
            None => None,
        };
        let orders = self
            .orders
            .list_for_customer(&ctx.customer_id, status)
            .await?;
        Ok(json!({
            "count": orders.len(),
            "orders": orders.iter().map(Order::summary).collect::<Vec<_>>(),
        }))
    }
}

pub struct ConfirmOrderTool {
    orders: Arc<dyn OrderRepo>,
    events: Arc<dyn EventSink>,
}

impl ConfirmOrderTool {
    pub fn new(orders: Arc<dyn OrderRepo>, events: Arc<dyn EventSink>) -> Self {
        Self { orders, events }
    }
}

#[async_trait]
impl Tool for ConfirmOrderTool {
    fn name(&self) -> &str {
        "confirm_order"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "confirm_order".into(),
            description: "Confirm an order to proceed to payment; optionally set the shipping address."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "order_id": {"type": "string"},
                    "shipping_address": {
                        "type": "object",
                        "properties": {
                            "street": {"type": "string"},
                            "city": {"type": "string"},
                            "province": {"type": "string"},
                            "postal_code": {"type": "string"},
                            "country": {"type": "string"}
                        }
                    }
                },
                "required": ["order_id"]
            }),
        }
    }

    async fn call(&self, args: Value, _ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let order_id = required_str(&args, "order_id")?;
        let mut order = self
            .orders
            .get_by_id(order_id)
            .await?
            .ok_or(RepoError::NotFound {
                entity: "order",
                id: order_id.to_string(),
            })?;

        let from = order.confirm(args.get("shipping_address").cloned())?;
        self.orders.save(&order).await?;
        self.events
            .publish(DomainEvent::OrderStatusChanged {
                order_id: order.id.clone(),
                from: from.as_str().to_string(),
                to: order.status.as_str().to_string(),
            })
            .await;
        Ok(order.summary())
    }
}

pub struct CancelOrderTool {
    orders: Arc<dyn OrderRepo>,
    events: Arc<dyn EventSink>,
}

impl CancelOrderTool {
    pub fn new(orders: Arc<dyn OrderRepo>, events: Arc<dyn EventSink>) -> Self {
        Self { orders, events }
    }
}

#[async_trait]
impl Tool for CancelOrderTool {
    fn name(&self) -> &str {
        "cancel_order"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "cancel_order".into(),
            description: "Cancel an order. Only orders that have not shipped can be cancelled."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "order_id": {"type": "string"},
                    "reason": {"type": "string"}
                },
                "required": ["order_id"]
            }),
        }
    }

    async fn call(&self, args: Value, _ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let order_id = required_str(&args, "order_id")?;
        let mut order = self
            .orders
            .get_by_id(order_id)
            .await?
            .ok_or(RepoError::NotFound {
                entity: "order",
                id: order_id.to_string(),
            })?;

        let from = order.cancel(optional_str(&args, "reason").map(str::to_string))?;
        self.orders.save(&order).await?;
        self.events
            .publish(DomainEvent::OrderStatusChanged {
                order_id: order.id.clone(),
                from: from.as_str().to_string(),
                to: order.status.as_str().to_string(),
            })
            .await;
        Ok(order.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Money, NullEventSink, Product};
    use crate::repo::memory::{MemOrderRepo, MemProductRepo};

    fn deps() -> (Arc<MemOrderRepo>, Arc<MemProductRepo>, Arc<NullEventSink>) {
        let products = MemProductRepo::default();
        products.products.lock().unwrap().push(Product {
            id: "P1".into(),
            tenant_id: "t1".into(),
            name: "Keripik Pedas".into(),
            description: None,
            category: None,
            base_price: Money(25_000),
            stock: 100,
            is_active: true,
            variants: Vec::new(),
        });
        (
            Arc::new(MemOrderRepo::default()),
            Arc::new(products),
            Arc::new(NullEventSink),
        )
    }

    fn ctx() -> ToolCallContext {
        ToolCallContext {
            tenant_id: "t1".into(),
            customer_id: "c1".into(),
            conversation_id: "conv".into(),
        }
    }

    /// **Scenario**: create_order then add_to_order(P1, 2) leaves one
    /// PENDING order with quantity 2 and subtotal 2 × base price.
    #[tokio::test]
    async fn create_then_add_builds_pending_order() {
        let (orders, products, events) = deps();
        let create = CreateOrderTool::new(orders.clone(), events.clone());
        let add = AddToOrderTool::new(orders.clone(), products, events);

        let created = create.call(json!({}), &ctx()).await.unwrap();
        assert_eq!(created["status"], "PENDING");

        let result = add
            .call(json!({"product_id": "P1", "quantity": 2}), &ctx())
            .await
            .unwrap();
        assert_eq!(result["status"], "PENDING");
        assert_eq!(result["item_count"], 2);
        assert_eq!(result["subtotal"], 50_000.0);
        assert_eq!(result["items"][0]["quantity"], 2);

        // The second tool observed the first tool's order, not a new one.
        assert_eq!(orders.orders.lock().unwrap().len(), 1);
    }

    /// **Scenario**: add_to_order with no active order creates one.
    #[tokio::test]
    async fn add_without_order_creates_one() {
        let (orders, products, events) = deps();
        let add = AddToOrderTool::new(orders.clone(), products, events);
        let result = add
            .call(json!({"product_id": "P1", "quantity": 1}), &ctx())
            .await
            .unwrap();
        assert_eq!(result["item_count"], 1);
        assert_eq!(orders.orders.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn add_duplicate_line_coalesces() {
        let (orders, products, events) = deps();
        let add = AddToOrderTool::new(orders.clone(), products, events);
        add.call(json!({"product_id": "P1", "quantity": 2}), &ctx())
            .await
            .unwrap();
        let result = add
            .call(json!({"product_id": "P1", "quantity": 3}), &ctx())
            .await
            .unwrap();
        assert_eq!(result["items"].as_array().unwrap().len(), 1);
        assert_eq!(result["items"][0]["quantity"], 5);
    }

    #[tokio::test]
    async fn confirm_then_cancel_flows_through_machine() {
        let (orders, products, events) = deps();
        let add = AddToOrderTool::new(orders.clone(), products, events.clone());
        let confirm = ConfirmOrderTool::new(orders.clone(), events.clone());
        let cancel = CancelOrderTool::new(orders.clone(), events);

        let added = add
            .call(json!({"product_id": "P1", "quantity": 1}), &ctx())
            .await
            .unwrap();
        let order_id = added["order_id"].as_str().unwrap().to_string();

        let confirmed = confirm
            .call(
                json!({"order_id": order_id, "shipping_address": {"city": "Jakarta"}}),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(confirmed["status"], "CONFIRMED");

        let cancelled = cancel
            .call(json!({"order_id": order_id, "reason": "batal"}), &ctx())
            .await
            .unwrap();
        assert_eq!(cancelled["status"], "CANCELLED");

        // Cancelled is terminal; a second cancel is an illegal transition.
        let err = cancel
            .call(json!({"order_id": order_id}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Domain(_)));
    }

    #[tokio::test]
    async fn add_rejects_zero_quantity() {
        let (orders, products, events) = deps();
        let add = AddToOrderTool::new(orders, products, events);
        let err = add
            .call(json!({"product_id": "P1", "quantity": 0}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
    }
}
