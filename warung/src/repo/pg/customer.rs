use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::Customer;
use crate::error::RepoError;
use crate::repo::CustomerRepo;

const COLUMNS: &str = "id, tenant_id, wa_chat_id, phone_number, name, email, address, \
                       total_orders, total_spent, is_vip, created_at";

pub struct PgCustomerRepo {
    pool: PgPool,
}

impl PgCustomerRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustomerRepo for PgCustomerRepo {
    async fn get_by_id(&self, id: &str) -> Result<Option<Customer>, RepoError> {
        let customer = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {COLUMNS} FROM customers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(customer)
    }

    async fn find_by_chat(
        &self,
        tenant_id: &str,
        wa_chat_id: &str,
    ) -> Result<Option<Customer>, RepoError> {
        let customer = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {COLUMNS} FROM customers WHERE tenant_id = $1 AND wa_chat_id = $2"
        ))
        .bind(tenant_id)
        .bind(wa_chat_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(customer)
    }

    async fn create(&self, customer: &Customer) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO customers \
             (id, tenant_id, wa_chat_id, phone_number, name, email, address, \
              total_orders, total_spent, is_vip, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(&customer.id)
        .bind(&customer.tenant_id)
        .bind(&customer.wa_chat_id)
        .bind(&customer.phone_number)
        .bind(&customer.name)
        .bind(&customer.email)
        .bind(&customer.address)
        .bind(customer.total_orders)
        .bind(customer.total_spent)
        .bind(customer.is_vip)
        .bind(customer.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_name(&self, id: &str, name: &str) -> Result<(), RepoError> {
        sqlx::query("UPDATE customers SET name = $2 WHERE id = $1")
            .bind(id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
