//! Product catalog tools: search, details, stock.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{RepoError, ToolError};
use crate::repo::ProductRepo;

use super::{optional_str, required_str, Tool, ToolCallContext, ToolSpec};

fn product_json(product: &crate::domain::Product) -> Value {
    json!({
        "product_id": product.id,
        "name": product.name,
        "description": product.description,
        "category": product.category,
        "price": product.base_price.as_f64(),
        "stock": product.stock,
        "variants": product.variants.iter().map(|v| json!({
            "sku": v.sku,
            "name": v.name,
            "price": v.price.as_f64(),
            "stock": v.stock,
        })).collect::<Vec<_>>(),
    })
}

pub struct SearchProductsTool {
    products: Arc<dyn ProductRepo>,
}

impl SearchProductsTool {
    pub fn new(products: Arc<dyn ProductRepo>) -> Self {
        Self { products }
    }
}

#[async_trait]
impl Tool for SearchProductsTool {
    fn name(&self) -> &str {
        "search_products"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "search_products".into(),
            description: "Search the product catalog by name or description. \
                          Use when the customer asks what is available or looks for something specific."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search text"},
                    "category": {"type": "string", "description": "Optional category filter"},
                    "min_price": {"type": "number"},
                    "max_price": {"type": "number"}
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let query = required_str(&args, "query")?;
        let category = optional_str(&args, "category");
        let min_price = args.get("min_price").and_then(Value::as_i64);
        let max_price = args.get("max_price").and_then(Value::as_i64);

        let products = self
            .products
            .search(&ctx.tenant_id, query, category, min_price, max_price)
            .await?;

        Ok(json!({
            "count": products.len(),
            "products": products.iter().map(product_json).collect::<Vec<_>>(),
        }))
    }
}

pub struct GetProductDetailsTool {
    products: Arc<dyn ProductRepo>,
}

impl GetProductDetailsTool {
    pub fn new(products: Arc<dyn ProductRepo>) -> Self {
        Self { products }
    }
}

#[async_trait]
impl Tool for GetProductDetailsTool {
    fn name(&self) -> &str {
        "get_product_details"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_product_details".into(),
            description: "Get full details for one product, including variants and prices.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "product_id": {"type": "string"}
                },
                "required": ["product_id"]
            }),
        }
    }

    async fn call(&self, args: Value, _ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let product_id = required_str(&args, "product_id")?;
        let product = self
            .products
            .get_by_id(product_id)
            .await?
            .ok_or(RepoError::NotFound {
                entity: "product",
                id: product_id.to_string(),
            })?;
        Ok(product_json(&product))
    }
}

pub struct CheckStockTool {
    products: Arc<dyn ProductRepo>,
}

impl CheckStockTool {
    pub fn new(products: Arc<dyn ProductRepo>) -> Self {
        Self { products }
    }
}

#[async_trait]
impl Tool for CheckStockTool {
    fn name(&self) -> &str {
        "check_stock"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "check_stock".into(),
            description: "Check stock for a SKU before promising availability.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sku": {"type": "string"}
                },
                "required": ["sku"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let sku = required_str(&args, "sku")?;
        let found = self
            .products
            .find_by_sku(&ctx.tenant_id, sku)
            .await?
            .ok_or(RepoError::NotFound {
                entity: "product",
                id: sku.to_string(),
            })?;
        let (product, variant) = found;
        let stock = variant.as_ref().map(|v| v.stock).unwrap_or(product.stock);
        Ok(json!({
            "sku": sku,
            "product_id": product.id,
            "product_name": product.name,
            "variant": variant.map(|v| v.name),
            "stock": stock,
            "available": stock > 0,
        }))
    }
}
