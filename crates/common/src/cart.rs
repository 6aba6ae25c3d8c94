//! Cart lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CartLineId, IdentityId, ItemRef, ProductId, VariantId};

/// One (product, variant) entry in an identity's cart.
///
/// The cart itself is keyed by its owner; there is at most one line per
/// `(owner, product_id, variant_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: CartLineId,
    pub owner: IdentityId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
    pub added_at: DateTime<Utc>,
}

impl CartLine {
    pub fn new(
        owner: IdentityId,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        quantity: u32,
    ) -> Self {
        Self {
            id: CartLineId::new(),
            owner,
            product_id,
            variant_id,
            quantity,
            added_at: Utc::now(),
        }
    }

    /// Returns the inventory row this line draws from.
    pub fn item(&self) -> ItemRef {
        ItemRef::for_line(self.product_id, self.variant_id)
    }

    /// Returns true if this line is for the given product/variant combination.
    pub fn matches(&self, product_id: ProductId, variant_id: Option<VariantId>) -> bool {
        self.product_id == product_id && self.variant_id == variant_id
    }
}
