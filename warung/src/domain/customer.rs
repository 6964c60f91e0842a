//! Customer profile as the agent sees it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Customer {
    pub id: String,
    pub tenant_id: String,
    pub wa_chat_id: String,
    pub phone_number: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub total_orders: i32,
    pub total_spent: i64,
    pub is_vip: bool,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    /// Context summary injected into the agent's system prompt.
    pub fn context_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "total_orders": self.total_orders,
            "total_spent": self.total_spent,
            "is_vip": self.is_vip,
        })
    }
}
