use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::{Money, Order, OrderItem, OrderStatus, PaymentStatus};
use crate::error::RepoError;
use crate::repo::OrderRepo;

use super::parse_status;

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: String,
    tenant_id: String,
    customer_id: String,
    status: String,
    payment_status: String,
    subtotal: i64,
    shipping_cost: i64,
    total: i64,
    shipping_address: Option<serde_json::Value>,
    payment_id: Option<String>,
    notes: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    order_id: String,
    product_id: String,
    product_name: String,
    variant_sku: Option<String>,
    quantity: i32,
    unit_price: i64,
    subtotal: i64,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order, RepoError> {
        Ok(Order {
            status: parse_status(&self.status, OrderStatus::parse, "order")?,
            payment_status: parse_status(&self.payment_status, PaymentStatus::parse, "payment")?,
            id: self.id,
            tenant_id: self.tenant_id,
            customer_id: self.customer_id,
            items,
            subtotal: Money(self.subtotal),
            shipping_cost: Money(self.shipping_cost),
            total: Money(self.total),
            shipping_address: self.shipping_address,
            payment_id: self.payment_id,
            notes: self.notes,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl From<&ItemRow> for OrderItem {
    fn from(row: &ItemRow) -> Self {
        OrderItem {
            product_id: row.product_id.clone(),
            product_name: row.product_name.clone(),
            variant_sku: row.variant_sku.clone(),
            quantity: row.quantity.max(0) as u32,
            unit_price: Money(row.unit_price),
            subtotal: Money(row.subtotal),
        }
    }
}

const ORDER_COLUMNS: &str = "id, tenant_id, customer_id, status, payment_status, subtotal, \
                             shipping_cost, total, shipping_address, payment_id, notes, \
                             created_at, updated_at";

pub struct PgOrderRepo {
    pool: PgPool,
}

impl PgOrderRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn items_for(&self, order_ids: &[String]) -> Result<Vec<ItemRow>, RepoError> {
        if order_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, ItemRow>(
            "SELECT order_id, product_id, product_name, variant_sku, quantity, unit_price, subtotal \
             FROM order_items WHERE order_id = ANY($1)",
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    fn assemble(rows: Vec<OrderRow>, items: Vec<ItemRow>) -> Result<Vec<Order>, RepoError> {
        rows.into_iter()
            .map(|row| {
                let own = items
                    .iter()
                    .filter(|i| i.order_id == row.id)
                    .map(OrderItem::from)
                    .collect();
                row.into_order(own)
            })
            .collect()
    }
}

#[async_trait]
impl OrderRepo for PgOrderRepo {
    async fn save(&self, order: &Order) -> Result<(), RepoError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO orders \
             (id, tenant_id, customer_id, status, payment_status, subtotal, shipping_cost, \
              total, shipping_address, payment_id, notes, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (id) DO UPDATE SET \
               status = EXCLUDED.status, \
               payment_status = EXCLUDED.payment_status, \
               subtotal = EXCLUDED.subtotal, \
               shipping_cost = EXCLUDED.shipping_cost, \
               total = EXCLUDED.total, \
               shipping_address = EXCLUDED.shipping_address, \
               payment_id = EXCLUDED.payment_id, \
               notes = EXCLUDED.notes, \
               updated_at = EXCLUDED.updated_at",
        )
        .bind(&order.id)
        .bind(&order.tenant_id)
        .bind(&order.customer_id)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.subtotal.0)
        .bind(order.shipping_cost.0)
        .bind(order.total.0)
        .bind(&order.shipping_address)
        .bind(&order.payment_id)
        .bind(&order.notes)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(&order.id)
            .execute(&mut *tx)
            .await?;

        for item in &order.items {
            sqlx::query(
                "INSERT INTO order_items \
                 (order_id, product_id, product_name, variant_sku, quantity, unit_price, subtotal) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(&order.id)
            .bind(&item.product_id)
            .bind(&item.product_name)
            .bind(&item.variant_sku)
            .bind(item.quantity as i32)
            .bind(item.unit_price.0)
            .bind(item.subtotal.0)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Order>, RepoError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let items = self.items_for(std::slice::from_ref(&row.id)).await?;
                Ok(Self::assemble(vec![row], items)?.pop())
            }
            None => Ok(None),
        }
    }

    async fn active_for_customer(&self, customer_id: &str) -> Result<Option<Order>, RepoError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE customer_id = $1 AND status = 'PENDING' \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let items = self.items_for(std::slice::from_ref(&row.id)).await?;
                Ok(Self::assemble(vec![row], items)?.pop())
            }
            None => Ok(None),
        }
    }

    async fn list_for_customer(
        &self,
        customer_id: &str,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, RepoError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE customer_id = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY created_at DESC LIMIT 50"
        ))
        .bind(customer_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let items = self.items_for(&ids).await?;
        Self::assemble(rows, items)
    }
}
