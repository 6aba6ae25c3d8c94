//! Catalog rows: the records the inventory ledger locks and mutates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Money, ProductId, VariantId};

/// Reference to the unit of inventory tracking: a product or one of its variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum ItemRef {
    Product(ProductId),
    Variant(VariantId),
}

impl ItemRef {
    /// Builds the reference a cart or order line points at.
    pub fn for_line(product_id: ProductId, variant_id: Option<VariantId>) -> Self {
        match variant_id {
            Some(variant_id) => ItemRef::Variant(variant_id),
            None => ItemRef::Product(product_id),
        }
    }
}

impl std::fmt::Display for ItemRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemRef::Product(id) => write!(f, "product {id}"),
            ItemRef::Variant(id) => write!(f, "variant {id}"),
        }
    }
}

/// A catalog product.
///
/// When the product has variants, `stock_quantity` and `available` hold the
/// aggregate over its variants and are only ever written by the ledger's
/// reconciliation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub stock_quantity: u32,
    pub available: bool,
    pub has_variants: bool,
    pub created_at: DateTime<Utc>,
}

impl Product {
    /// Creates a product without variants, with availability derived from stock.
    pub fn new(name: impl Into<String>, price: Money, stock_quantity: u32) -> Self {
        Self {
            id: ProductId::new(),
            name: name.into(),
            price,
            stock_quantity,
            available: stock_quantity > 0,
            has_variants: false,
            created_at: Utc::now(),
        }
    }
}

/// A refinement of a product with its own stock and optional price override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub product_id: ProductId,
    pub name: String,
    pub price: Option<Money>,
    pub stock_quantity: u32,
    pub available: bool,
    pub created_at: DateTime<Utc>,
}

impl Variant {
    /// Creates a variant of `product_id`, with availability derived from stock.
    pub fn new(
        product_id: ProductId,
        name: impl Into<String>,
        price: Option<Money>,
        stock_quantity: u32,
    ) -> Self {
        Self {
            id: VariantId::new(),
            product_id,
            name: name.into(),
            price,
            stock_quantity,
            available: stock_quantity > 0,
            created_at: Utc::now(),
        }
    }

    /// Returns the override price, or the owning product's price.
    pub fn effective_price(&self, product: &Product) -> Money {
        self.price.unwrap_or(product.price)
    }
}
