//! Repositories: the database-facing seams.
//!
//! Traits here, Postgres implementations in [`pg`]. Each call owns its
//! transaction scope; nothing holds a connection across awaits into other
//! subsystems. Tests use the in-memory doubles in [`memory`].

pub mod pg;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;

use crate::domain::{
    Customer, Label, Order, OrderStatus, PaymentRecord, Product, ProductVariant, Tenant,
};
use crate::error::RepoError;
use crate::llm::LlmConfig;

#[async_trait]
pub trait TenantRepo: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<Tenant>, RepoError>;
    async fn get_by_wa_session(&self, wa_session: &str) -> Result<Option<Tenant>, RepoError>;
}

#[async_trait]
pub trait CustomerRepo: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<Customer>, RepoError>;
    async fn find_by_chat(
        &self,
        tenant_id: &str,
        wa_chat_id: &str,
    ) -> Result<Option<Customer>, RepoError>;
    async fn create(&self, customer: &Customer) -> Result<(), RepoError>;
    async fn update_name(&self, id: &str, name: &str) -> Result<(), RepoError>;
}

#[async_trait]
pub trait ProductRepo: Send + Sync {
    async fn search(
        &self,
        tenant_id: &str,
        query: &str,
        category: Option<&str>,
        min_price: Option<i64>,
        max_price: Option<i64>,
    ) -> Result<Vec<Product>, RepoError>;
    async fn get_by_id(&self, id: &str) -> Result<Option<Product>, RepoError>;
    async fn find_by_sku(
        &self,
        tenant_id: &str,
        sku: &str,
    ) -> Result<Option<(Product, Option<ProductVariant>)>, RepoError>;
}

#[async_trait]
pub trait OrderRepo: Send + Sync {
    /// Insert or update the order together with its items.
    async fn save(&self, order: &Order) -> Result<(), RepoError>;
    async fn get_by_id(&self, id: &str) -> Result<Option<Order>, RepoError>;
    /// The customer's most recent `PENDING` order, if any.
    async fn active_for_customer(&self, customer_id: &str) -> Result<Option<Order>, RepoError>;
    async fn list_for_customer(
        &self,
        customer_id: &str,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, RepoError>;
}

#[async_trait]
pub trait PaymentRepo: Send + Sync {
    async fn save(&self, payment: &PaymentRecord) -> Result<(), RepoError>;
    async fn get_by_id(&self, id: &str) -> Result<Option<PaymentRecord>, RepoError>;
    async fn get_by_order(&self, order_id: &str) -> Result<Option<PaymentRecord>, RepoError>;
}

#[async_trait]
pub trait LabelRepo: Send + Sync {
    async fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<Label>, RepoError>;
    async fn attach(&self, conversation_id: &str, label_id: &str) -> Result<(), RepoError>;
}

#[async_trait]
pub trait LlmConfigRepo: Send + Sync {
    async fn get_by_name(&self, name: &str) -> Result<Option<LlmConfig>, RepoError>;
}
