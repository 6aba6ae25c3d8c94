//! Inventory ledger: stock counts and availability for products and variants.

mod ledger;
mod service;

pub use ledger::{LockedInventory, MAX_STOCK};
pub use service::InventoryService;

use common::{ItemRef, Money, ProductId, VariantId};
use store::StoreError;
use thiserror::Error;

/// Errors raised by the ledger and by catalog administration.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Variant not found: {0}")]
    VariantNotFound(VariantId),

    /// A product-level reservation against a product whose stock is held by its variants.
    #[error("Product is not available: {item}")]
    ProductUnavailable { item: ItemRef },

    #[error("Insufficient stock for {item}: requested {requested}, available {available}")]
    InsufficientStock {
        item: ItemRef,
        requested: u32,
        available: u32,
    },

    /// The item was not part of the locked set.
    #[error("{0} is not locked by this transaction")]
    NotLocked(ItemRef),

    #[error("Stock of product {0} is the sum of its variants and cannot be set directly")]
    AggregateStock(ProductId),

    #[error("Invalid price: {0} (must not be negative)")]
    NegativePrice(Money),

    /// A stock count, or a product aggregate, would exceed [`MAX_STOCK`].
    #[error("Stock of {item} would be {quantity}, above the limit of {MAX_STOCK}")]
    StockLimit { item: ItemRef, quantity: u64 },

    /// The variant is still referenced by a cart line or an order line.
    #[error("Variant {0} is still referenced by a cart or an order")]
    VariantInUse(VariantId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
