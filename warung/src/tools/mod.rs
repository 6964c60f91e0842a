//! Tools the LLM can call, and the registry that dispatches them.
//!
//! Each tool has a unique name, a spec (description + JSON schema of its
//! arguments) and the call logic. The registry injects the tenant, customer
//! and conversation ids into the arguments before every invocation, so a
//! tool never trusts the model to scope its own data access.
//!
//! Which tools the model sees is decided solely by the conversation state —
//! a customer in `greeting` cannot reach `initiate_payment` no matter what
//! the model asks for.

mod customer;
mod label;
mod order;
mod payment;
mod product;

pub use customer::GetCustomerProfileTool;
pub use label::{GetAvailableLabelsTool, LabelConversationTool};
pub use order::{
    AddToOrderTool, CancelOrderTool, ConfirmOrderTool, CreateOrderTool, GetCustomerOrdersTool,
    GetOrderStatusTool,
};
pub use payment::{CheckPaymentStatusTool, InitiatePaymentTool};
pub use product::{CheckStockTool, GetProductDetailsTool, SearchProductsTool};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::domain::ConversationState;
use crate::error::ToolError;

/// Tool specification sent to the LLM as a function definition.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Per-invocation context; the registry copies these into the arguments so
/// every tool call is scoped to the right tenant and customer.
#[derive(Clone, Debug, Default)]
pub struct ToolCallContext {
    pub tenant_id: String,
    pub customer_id: String,
    pub conversation_id: String,
}

/// A single side-effectful function callable by the LLM.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn spec(&self) -> ToolSpec;

    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, ToolError>;
}

/// Registry of tool executors, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Specs for the named tools, skipping any that are not registered.
    pub fn specs_for(&self, names: &[&str]) -> Vec<ToolSpec> {
        names
            .iter()
            .filter_map(|n| self.tools.get(*n))
            .map(|t| t.spec())
            .collect()
    }

    /// Dispatch a call: parse the raw JSON arguments, overwrite the scope
    /// fields from `ctx`, and execute.
    pub async fn call(
        &self,
        name: &str,
        raw_arguments: &str,
        ctx: &ToolCallContext,
    ) -> Result<Value, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;

        let mut args: Map<String, Value> = if raw_arguments.trim().is_empty() {
            Map::new()
        } else {
            serde_json::from_str(raw_arguments)
                .map_err(|e| ToolError::InvalidArgs(format!("arguments are not json: {e}")))?
        };

        // The context wins over whatever the model put in the arguments.
        args.insert("tenant_id".into(), json!(ctx.tenant_id));
        args.insert("customer_id".into(), json!(ctx.customer_id));
        args.insert("conversation_id".into(), json!(ctx.conversation_id));

        tool.call(Value::Object(args), ctx).await
    }
}

/// The tool set exposed to the model for a conversation state.
pub fn tools_for_state(state: ConversationState) -> &'static [&'static str] {
    use ConversationState::*;
    match state {
        Greeting => &["get_customer_profile"],
        Browsing => &[
            "search_products",
            "get_product_details",
            "check_stock",
            "create_order",
        ],
        Ordering => &[
            "add_to_order",
            "get_order_status",
            "get_customer_orders",
            "create_order",
            "cancel_order",
        ],
        Checkout => &["confirm_order", "get_order_status", "cancel_order"],
        Payment => &["initiate_payment", "check_payment_status"],
        Support => &[
            "get_customer_profile",
            "get_order_status",
            "get_customer_orders",
            "label_conversation",
            "get_available_labels",
        ],
        Completed => &[],
    }
}

/// Args helpers shared by the tool implementations.
pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidArgs(format!("missing required argument: {key}")))
}

pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}
