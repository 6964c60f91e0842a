use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::{Money, PaymentRecord, PaymentStatus};
use crate::error::RepoError;
use crate::repo::PaymentRepo;

use super::parse_status;

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: String,
    order_id: String,
    tenant_id: String,
    provider: String,
    method: Option<String>,
    amount: i64,
    status: String,
    external_id: Option<String>,
    payment_url: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl PaymentRow {
    fn into_payment(self) -> Result<PaymentRecord, RepoError> {
        Ok(PaymentRecord {
            status: parse_status(&self.status, PaymentStatus::parse, "payment")?,
            id: self.id,
            order_id: self.order_id,
            tenant_id: self.tenant_id,
            provider: self.provider,
            method: self.method,
            amount: Money(self.amount),
            external_id: self.external_id,
            payment_url: self.payment_url,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const COLUMNS: &str = "id, order_id, tenant_id, provider, method, amount, status, \
                       external_id, payment_url, created_at, updated_at";

pub struct PgPaymentRepo {
    pool: PgPool,
}

impl PgPaymentRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentRepo for PgPaymentRepo {
    async fn save(&self, payment: &PaymentRecord) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO payments \
             (id, order_id, tenant_id, provider, method, amount, status, external_id, \
              payment_url, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (id) DO UPDATE SET \
               status = EXCLUDED.status, \
               external_id = EXCLUDED.external_id, \
               payment_url = EXCLUDED.payment_url, \
               updated_at = EXCLUDED.updated_at",
        )
        .bind(&payment.id)
        .bind(&payment.order_id)
        .bind(&payment.tenant_id)
        .bind(&payment.provider)
        .bind(&payment.method)
        .bind(payment.amount.0)
        .bind(payment.status.as_str())
        .bind(&payment.external_id)
        .bind(&payment.payment_url)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<PaymentRecord>, RepoError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PaymentRow::into_payment).transpose()
    }

    async fn get_by_order(&self, order_id: &str) -> Result<Option<PaymentRecord>, RepoError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {COLUMNS} FROM payments WHERE order_id = $1 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PaymentRow::into_payment).transpose()
    }
}
