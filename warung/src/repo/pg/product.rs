use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::{Money, Product, ProductVariant};
use crate::error::RepoError;
use crate::repo::ProductRepo;

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: String,
    tenant_id: String,
    name: String,
    description: Option<String>,
    category: Option<String>,
    base_price: i64,
    stock: i32,
    is_active: bool,
}

#[derive(sqlx::FromRow)]
struct VariantRow {
    product_id: String,
    sku: String,
    name: String,
    price: i64,
    stock: i32,
}

impl ProductRow {
    fn into_product(self, variants: Vec<ProductVariant>) -> Product {
        Product {
            id: self.id,
            tenant_id: self.tenant_id,
            name: self.name,
            description: self.description,
            category: self.category,
            base_price: Money(self.base_price),
            stock: self.stock,
            is_active: self.is_active,
            variants,
        }
    }
}

const PRODUCT_COLUMNS: &str =
    "id, tenant_id, name, description, category, base_price, stock, is_active";

pub struct PgProductRepo {
    pool: PgPool,
}

impl PgProductRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn variants_for(&self, product_ids: &[String]) -> Result<Vec<VariantRow>, RepoError> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, VariantRow>(
            "SELECT product_id, sku, name, price, stock \
             FROM product_variants WHERE product_id = ANY($1)",
        )
        .bind(product_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    fn assemble(rows: Vec<ProductRow>, variants: Vec<VariantRow>) -> Vec<Product> {
        rows.into_iter()
            .map(|row| {
                let own: Vec<ProductVariant> = variants
                    .iter()
                    .filter(|v| v.product_id == row.id)
                    .map(|v| ProductVariant {
                        sku: v.sku.clone(),
                        name: v.name.clone(),
                        price: Money(v.price),
                        stock: v.stock,
                    })
                    .collect();
                row.into_product(own)
            })
            .collect()
    }
}

#[async_trait]
impl ProductRepo for PgProductRepo {
    async fn search(
        &self,
        tenant_id: &str,
        query: &str,
        category: Option<&str>,
        min_price: Option<i64>,
        max_price: Option<i64>,
    ) -> Result<Vec<Product>, RepoError> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE tenant_id = $1 AND is_active \
               AND (name ILIKE $2 OR description ILIKE $2) \
               AND ($3::text IS NULL OR category = $3) \
               AND ($4::bigint IS NULL OR base_price >= $4) \
               AND ($5::bigint IS NULL OR base_price <= $5) \
             ORDER BY name LIMIT 20"
        ))
        .bind(tenant_id)
        .bind(format!("%{query}%"))
        .bind(category)
        .bind(min_price)
        .bind(max_price)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let variants = self.variants_for(&ids).await?;
        Ok(Self::assemble(rows, variants))
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Product>, RepoError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let variants = self.variants_for(std::slice::from_ref(&row.id)).await?;
                Ok(Self::assemble(vec![row], variants).pop())
            }
            None => Ok(None),
        }
    }

    async fn find_by_sku(
        &self,
        tenant_id: &str,
        sku: &str,
    ) -> Result<Option<(Product, Option<ProductVariant>)>, RepoError> {
        // A SKU names either a variant or a base product.
        let by_variant = sqlx::query_as::<_, ProductRow>(
            "SELECT p.id, p.tenant_id, p.name, p.description, p.category, \
                    p.base_price, p.stock, p.is_active \
             FROM products p JOIN product_variants v ON v.product_id = p.id \
             WHERE p.tenant_id = $1 AND v.sku = $2",
        )
        .bind(tenant_id)
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?;

        let row = match by_variant {
            Some(row) => row,
            None => {
                let by_sku = sqlx::query_as::<_, ProductRow>(&format!(
                    "SELECT {PRODUCT_COLUMNS} FROM products WHERE tenant_id = $1 AND sku = $2"
                ))
                .bind(tenant_id)
                .bind(sku)
                .fetch_optional(&self.pool)
                .await?;
                match by_sku {
                    Some(row) => row,
                    None => return Ok(None),
                }
            }
        };

        let variants = self.variants_for(std::slice::from_ref(&row.id)).await?;
        let product = Self::assemble(vec![row], variants)
            .pop()
            .ok_or(RepoError::NotFound {
                entity: "product",
                id: sku.to_string(),
            })?;
        let variant = product.variants.iter().find(|v| v.sku == sku).cloned();
        Ok(Some((product, variant)))
    }
}
