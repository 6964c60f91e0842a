//! In-memory repositories for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{
    Customer, Label, Order, OrderStatus, PaymentRecord, Product, ProductVariant, Tenant,
};
use crate::error::RepoError;
use crate::llm::LlmConfig;

use super::{
    CustomerRepo, LabelRepo, LlmConfigRepo, OrderRepo, PaymentRepo, ProductRepo, TenantRepo,
};

#[derive(Default)]
pub struct MemTenantRepo {
    pub tenants: Mutex<Vec<Tenant>>,
}

#[async_trait]
impl TenantRepo for MemTenantRepo {
    async fn get_by_id(&self, id: &str) -> Result<Option<Tenant>, RepoError> {
        Ok(self
            .tenants
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn get_by_wa_session(&self, wa_session: &str) -> Result<Option<Tenant>, RepoError> {
        Ok(self
            .tenants
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.wa_session == wa_session)
            .cloned())
    }
}

#[derive(Default)]
pub struct MemCustomerRepo {
    pub customers: Mutex<Vec<Customer>>,
}

#[async_trait]
impl CustomerRepo for MemCustomerRepo {
    async fn get_by_id(&self, id: &str) -> Result<Option<Customer>, RepoError> {
        Ok(self
            .customers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn find_by_chat(
        &self,
        tenant_id: &str,
        wa_chat_id: &str,
    ) -> Result<Option<Customer>, RepoError> {
        Ok(self
            .customers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.tenant_id == tenant_id && c.wa_chat_id == wa_chat_id)
            .cloned())
    }

    async fn create(&self, customer: &Customer) -> Result<(), RepoError> {
        self.customers.lock().unwrap().push(customer.clone());
        Ok(())
    }

    async fn update_name(&self, id: &str, name: &str) -> Result<(), RepoError> {
        if let Some(c) = self.customers.lock().unwrap().iter_mut().find(|c| c.id == id) {
            c.name = Some(name.to_string());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemProductRepo {
    pub products: Mutex<Vec<Product>>,
}

#[async_trait]
impl ProductRepo for MemProductRepo {
    async fn search(
        &self,
        tenant_id: &str,
        query: &str,
        category: Option<&str>,
        min_price: Option<i64>,
        max_price: Option<i64>,
    ) -> Result<Vec<Product>, RepoError> {
        let query = query.to_lowercase();
        Ok(self
            .products
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.tenant_id == tenant_id && p.is_active)
            .filter(|p| p.name.to_lowercase().contains(&query))
            .filter(|p| category.is_none_or(|c| p.category.as_deref() == Some(c)))
            .filter(|p| min_price.is_none_or(|m| p.base_price.0 >= m))
            .filter(|p| max_price.is_none_or(|m| p.base_price.0 <= m))
            .cloned()
            .collect())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Product>, RepoError> {
        Ok(self
            .products
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn find_by_sku(
        &self,
        tenant_id: &str,
        sku: &str,
    ) -> Result<Option<(Product, Option<ProductVariant>)>, RepoError> {
        Ok(self
            .products
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.tenant_id == tenant_id)
            .find_map(|p| {
                p.variants
                    .iter()
                    .find(|v| v.sku == sku)
                    .map(|v| (p.clone(), Some(v.clone())))
            }))
    }
}

#[derive(Default)]
pub struct MemOrderRepo {
    pub orders: Mutex<HashMap<String, Order>>,
}

#[async_trait]
impl OrderRepo for MemOrderRepo {
    async fn save(&self, order: &Order) -> Result<(), RepoError> {
        self.orders
            .lock()
            .unwrap()
            .insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Order>, RepoError> {
        Ok(self.orders.lock().unwrap().get(id).cloned())
    }

    async fn active_for_customer(&self, customer_id: &str) -> Result<Option<Order>, RepoError> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.customer_id == customer_id && o.status == OrderStatus::Pending)
            .max_by_key(|o| o.created_at)
            .cloned())
    }

    async fn list_for_customer(
        &self,
        customer_id: &str,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, RepoError> {
        let mut orders: Vec<Order> = self
            .orders
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.customer_id == customer_id)
            .filter(|o| status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        orders.sort_by_key(|o| std::cmp::Reverse(o.created_at));
        Ok(orders)
    }
}

#[derive(Default)]
pub struct MemPaymentRepo {
    pub payments: Mutex<HashMap<String, PaymentRecord>>,
}

#[async_trait]
impl PaymentRepo for MemPaymentRepo {
    async fn save(&self, payment: &PaymentRecord) -> Result<(), RepoError> {
        self.payments
            .lock()
            .unwrap()
            .insert(payment.id.clone(), payment.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<PaymentRecord>, RepoError> {
        Ok(self.payments.lock().unwrap().get(id).cloned())
    }

    async fn get_by_order(&self, order_id: &str) -> Result<Option<PaymentRecord>, RepoError> {
        Ok(self
            .payments
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.order_id == order_id)
            .max_by_key(|p| p.created_at)
            .cloned())
    }
}

#[derive(Default)]
pub struct MemLabelRepo {
    pub labels: Mutex<Vec<Label>>,
    pub attached: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl LabelRepo for MemLabelRepo {
    async fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<Label>, RepoError> {
        Ok(self
            .labels
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn attach(&self, conversation_id: &str, label_id: &str) -> Result<(), RepoError> {
        self.attached
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), label_id.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemLlmConfigRepo {
    pub configs: Mutex<Vec<LlmConfig>>,
}

#[async_trait]
impl LlmConfigRepo for MemLlmConfigRepo {
    async fn get_by_name(&self, name: &str) -> Result<Option<LlmConfig>, RepoError> {
        Ok(self
            .configs
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.name == name)
            .cloned())
    }
}
