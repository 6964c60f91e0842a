//! Product catalog entries.

use serde::{Deserialize, Serialize};

use super::Money;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProductVariant {
    pub sku: String,
    pub name: String,
    pub price: Money,
    pub stock: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub base_price: Money,
    pub stock: i32,
    pub is_active: bool,
    #[serde(default)]
    pub variants: Vec<ProductVariant>,
}

impl Product {
    /// Price and display name for an optional variant SKU. Unknown SKUs fall
    /// back to the base price, matching how the catalog treats retired
    /// variants that are still referenced by old chats.
    pub fn price_for(&self, variant_sku: Option<&str>) -> (Money, Option<String>) {
        match variant_sku {
            Some(sku) => self
                .variants
                .iter()
                .find(|v| v.sku == sku)
                .map(|v| (v.price, Some(v.name.clone())))
                .unwrap_or((self.base_price, None)),
            None => (self.base_price, None),
        }
    }

    pub fn stock_for(&self, variant_sku: Option<&str>) -> i32 {
        match variant_sku {
            Some(sku) => self
                .variants
                .iter()
                .find(|v| v.sku == sku)
                .map(|v| v.stock)
                .unwrap_or(0),
            None => self.stock,
        }
    }
}
