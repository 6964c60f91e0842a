use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::Tenant;
use crate::error::RepoError;
use crate::repo::TenantRepo;

pub struct PgTenantRepo {
    pool: PgPool,
}

impl PgTenantRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantRepo for PgTenantRepo {
    async fn get_by_id(&self, id: &str) -> Result<Option<Tenant>, RepoError> {
        let tenant = sqlx::query_as::<_, Tenant>(
            "SELECT id, name, wa_session, llm_config_name, agent_prompt, is_active, created_at \
             FROM tenants WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tenant)
    }

    async fn get_by_wa_session(&self, wa_session: &str) -> Result<Option<Tenant>, RepoError> {
        let tenant = sqlx::query_as::<_, Tenant>(
            "SELECT id, name, wa_session, llm_config_name, agent_prompt, is_active, created_at \
             FROM tenants WHERE wa_session = $1",
        )
        .bind(wa_session)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tenant)
    }
}
