//! Customer profile tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{RepoError, ToolError};
use crate::repo::CustomerRepo;

use super::{Tool, ToolCallContext, ToolSpec};

pub struct GetCustomerProfileTool {
    customers: Arc<dyn CustomerRepo>,
}

impl GetCustomerProfileTool {
    pub fn new(customers: Arc<dyn CustomerRepo>) -> Self {
        Self { customers }
    }
}

#[async_trait]
impl Tool for GetCustomerProfileTool {
    fn name(&self) -> &str {
        "get_customer_profile"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_customer_profile".into(),
            description: "Get the current customer's profile and purchase history summary.".into(),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn call(&self, _args: Value, ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let customer = self
            .customers
            .get_by_id(&ctx.customer_id)
            .await?
            .ok_or(RepoError::NotFound {
                entity: "customer",
                id: ctx.customer_id.clone(),
            })?;

        Ok(json!({
            "customer_id": customer.id,
            "name": customer.name,
            "phone_number": customer.phone_number,
            "email": customer.email,
            "address": customer.address,
            "total_orders": customer.total_orders,
            "total_spent": customer.total_spent,
            "is_vip": customer.is_vip,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Customer;
    use crate::repo::memory::MemCustomerRepo;

    #[tokio::test]
    async fn profile_reads_injected_customer_id() {
        let repo = MemCustomerRepo::default();
        repo.customers.lock().unwrap().push(Customer {
            id: "c1".into(),
            tenant_id: "t1".into(),
            wa_chat_id: "628@c.us".into(),
            phone_number: Some("628123".into()),
            name: Some("Budi".into()),
            email: None,
            address: None,
            total_orders: 4,
            total_spent: 250_000,
            is_vip: true,
            created_at: chrono::Utc::now(),
        });

        let tool = GetCustomerProfileTool::new(Arc::new(repo));
        let ctx = ToolCallContext {
            tenant_id: "t1".into(),
            customer_id: "c1".into(),
            conversation_id: "conv".into(),
        };
        let result = tool.call(json!({}), &ctx).await.unwrap();
        assert_eq!(result["name"], "Budi");
        assert_eq!(result["is_vip"], true);
        assert_eq!(result["total_orders"], 4);
    }
}
