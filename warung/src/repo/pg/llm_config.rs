use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::RepoError;
use crate::llm::LlmConfig;
use crate::repo::LlmConfigRepo;

#[derive(sqlx::FromRow)]
struct LlmConfigRow {
    name: String,
    provider: String,
    model_name: String,
    temperature: f32,
    max_tokens: i32,
    api_key_env: String,
    timeout_seconds: i64,
}

impl From<LlmConfigRow> for LlmConfig {
    fn from(row: LlmConfigRow) -> Self {
        LlmConfig {
            name: row.name,
            provider: row.provider,
            model_name: row.model_name,
            temperature: row.temperature,
            max_tokens: row.max_tokens.max(0) as u32,
            api_key_env: row.api_key_env,
            timeout_seconds: row.timeout_seconds.max(0) as u64,
        }
    }
}

pub struct PgLlmConfigRepo {
    pool: PgPool,
}

impl PgLlmConfigRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LlmConfigRepo for PgLlmConfigRepo {
    async fn get_by_name(&self, name: &str) -> Result<Option<LlmConfig>, RepoError> {
        let row = sqlx::query_as::<_, LlmConfigRow>(
            "SELECT name, provider, model_name, temperature, max_tokens, api_key_env, \
                    timeout_seconds \
             FROM llm_configs WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(LlmConfig::from))
    }
}
