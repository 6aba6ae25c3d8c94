//! Per-identity shopping carts.
//!
//! Availability checks here read the ledger without locking and only give the
//! caller early feedback. Checkout repeats them under lock.

mod service;

pub use service::{CartItemView, CartService, CartView};

use common::{AmountOverflow, CartLineId, ProductId, VariantId};
use store::StoreError;
use thiserror::Error;

/// Errors raised by cart mutations.
#[derive(Debug, Error)]
pub enum CartError {
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Variant not found: {0}")]
    VariantNotFound(VariantId),

    /// The product has variants and the line did not name one.
    #[error("Variant is required for product {product_id}")]
    VariantRequired { product_id: ProductId },

    #[error("Variant {variant_id} does not belong to product {product_id}")]
    VariantMismatch {
        product_id: ProductId,
        variant_id: VariantId,
    },

    #[error("Product is not available: {0}")]
    ProductUnavailable(ProductId),

    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u32, available: u32 },

    #[error("Invalid quantity: {quantity} (must be at least 1)")]
    InvalidQuantity { quantity: u32 },

    #[error("Cart line not found: {0}")]
    LineNotFound(CartLineId),

    /// The priced cart does not fit in a money amount.
    #[error("Cart total out of range")]
    TotalOutOfRange(#[from] AmountOverflow),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
