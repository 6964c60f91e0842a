use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::Label;
use crate::error::RepoError;
use crate::repo::LabelRepo;

pub struct PgLabelRepo {
    pool: PgPool,
}

impl PgLabelRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LabelRepo for PgLabelRepo {
    async fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<Label>, RepoError> {
        let labels = sqlx::query_as::<_, Label>(
            "SELECT id, tenant_id, name, color FROM labels WHERE tenant_id = $1 ORDER BY name",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(labels)
    }

    async fn attach(&self, conversation_id: &str, label_id: &str) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO conversation_labels (conversation_id, label_id) \
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(conversation_id)
        .bind(label_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
