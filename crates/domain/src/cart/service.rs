use common::{
    AmountOverflow, CartLine, CartLineId, IdentityId, Money, Product, ProductId, Variant,
    VariantId,
};
use serde::Serialize;
use store::{Store, Transaction};

use super::CartError;

/// A cart line with its current catalog price.
#[derive(Debug, Clone, Serialize)]
pub struct CartItemView {
    #[serde(flatten)]
    pub line: CartLine,
    pub product_name: String,
    pub variant_name: Option<String>,
    pub unit_price: Money,
    pub line_total: Money,
}

/// A priced snapshot of a cart.
///
/// Prices here are informational; checkout captures its own under lock.
#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub lines: Vec<CartItemView>,
    pub total: Money,
}

/// Service for cart mutations and reads.
#[derive(Clone)]
pub struct CartService<S: Store> {
    store: S,
}

impl<S: Store> CartService<S> {
    /// Creates a new cart service with the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Adds `quantity` units to the cart, merging with an existing line for
    /// the same product and variant.
    #[tracing::instrument(skip(self))]
    pub async fn add_line(
        &self,
        owner: IdentityId,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        quantity: u32,
    ) -> Result<CartLine, CartError> {
        if quantity < 1 {
            return Err(CartError::InvalidQuantity { quantity });
        }

        let mut tx = self.store.begin().await?;
        let (product, variant) = resolve_item(&mut tx, product_id, variant_id).await?;

        if variant.is_none() && !product.available {
            return Err(CartError::ProductUnavailable(product_id));
        }

        let mut line = tx
            .cart_lines(owner)
            .await?
            .into_iter()
            .find(|line| line.matches(product_id, variant_id))
            .unwrap_or_else(|| CartLine::new(owner, product_id, variant_id, 0));

        let new_quantity = line
            .quantity
            .checked_add(quantity)
            .ok_or(CartError::InvalidQuantity { quantity })?;
        advisory_stock_check(&product, variant.as_ref(), new_quantity)?;

        line.quantity = new_quantity;
        tx.upsert_cart_line(&line).await?;
        tx.commit().await?;

        tracing::debug!(line_id = %line.id, quantity = line.quantity, "cart line saved");
        Ok(line)
    }

    /// Sets the quantity of a line. Stock is only re-checked when it grows.
    #[tracing::instrument(skip(self))]
    pub async fn set_quantity(
        &self,
        owner: IdentityId,
        line_id: CartLineId,
        quantity: u32,
    ) -> Result<CartLine, CartError> {
        if quantity < 1 {
            return Err(CartError::InvalidQuantity { quantity });
        }

        let mut tx = self.store.begin().await?;
        let mut line = find_line(&mut tx, owner, line_id).await?;

        if quantity > line.quantity {
            let (product, variant) = resolve_item(&mut tx, line.product_id, line.variant_id).await?;
            if variant.is_none() && !product.available {
                return Err(CartError::ProductUnavailable(product.id));
            }
            advisory_stock_check(&product, variant.as_ref(), quantity)?;
        }

        line.quantity = quantity;
        tx.upsert_cart_line(&line).await?;
        tx.commit().await?;
        Ok(line)
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_line(&self, owner: IdentityId, line_id: CartLineId) -> Result<(), CartError> {
        let mut tx = self.store.begin().await?;
        if !tx.delete_cart_line(owner, line_id).await? {
            return Err(CartError::LineNotFound(line_id));
        }
        tx.commit().await?;
        Ok(())
    }

    /// Returns the cart lines in the order they were added.
    #[tracing::instrument(skip(self))]
    pub async fn snapshot(&self, owner: IdentityId) -> Result<Vec<CartLine>, CartError> {
        let mut tx = self.store.begin().await?;
        let lines = tx.cart_lines(owner).await?;
        tx.commit().await?;
        Ok(lines)
    }

    /// Returns the cart lines priced against the current catalog.
    #[tracing::instrument(skip(self))]
    pub async fn lines(&self, owner: IdentityId) -> Result<CartView, CartError> {
        let mut tx = self.store.begin().await?;
        let lines = tx.cart_lines(owner).await?;

        let product_ids: Vec<ProductId> = lines.iter().map(|l| l.product_id).collect();
        let variant_ids: Vec<VariantId> = lines.iter().filter_map(|l| l.variant_id).collect();
        let products = tx.find_products(&product_ids).await?;
        let variants = tx.find_variants(&variant_ids).await?;
        tx.commit().await?;

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let product = products
                .get(&line.product_id)
                .ok_or(CartError::ProductNotFound(line.product_id))?;
            let variant = match line.variant_id {
                Some(id) => Some(variants.get(&id).ok_or(CartError::VariantNotFound(id))?),
                None => None,
            };
            let unit_price = variant.map_or(product.price, |v| v.effective_price(product));
            items.push(CartItemView {
                product_name: product.name.clone(),
                variant_name: variant.map(|v| v.name.clone()),
                unit_price,
                line_total: unit_price.checked_mul(line.quantity).ok_or(AmountOverflow)?,
                line,
            });
        }

        let total = Money::total_of(items.iter().map(|item| (item.unit_price, item.line.quantity)))?;
        Ok(CartView {
            lines: items,
            total,
        })
    }

    /// Empties the cart, returning how many lines were removed.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self, owner: IdentityId) -> Result<u64, CartError> {
        let mut tx = self.store.begin().await?;
        let removed = tx.clear_cart(owner).await?;
        tx.commit().await?;
        Ok(removed)
    }
}

async fn find_line<T: Transaction>(
    tx: &mut T,
    owner: IdentityId,
    line_id: CartLineId,
) -> Result<CartLine, CartError> {
    tx.cart_lines(owner)
        .await?
        .into_iter()
        .find(|line| line.id == line_id)
        .ok_or(CartError::LineNotFound(line_id))
}

/// Loads the product and optional variant a line refers to, checking that
/// they fit together.
async fn resolve_item<T: Transaction>(
    tx: &mut T,
    product_id: ProductId,
    variant_id: Option<VariantId>,
) -> Result<(Product, Option<Variant>), CartError> {
    let product = tx
        .find_products(&[product_id])
        .await?
        .remove(&product_id)
        .ok_or(CartError::ProductNotFound(product_id))?;

    let Some(variant_id) = variant_id else {
        if product.has_variants {
            return Err(CartError::VariantRequired { product_id });
        }
        return Ok((product, None));
    };

    let variant = tx
        .find_variants(&[variant_id])
        .await?
        .remove(&variant_id)
        .ok_or(CartError::VariantNotFound(variant_id))?;
    if variant.product_id != product_id {
        return Err(CartError::VariantMismatch {
            product_id,
            variant_id,
        });
    }
    Ok((product, Some(variant)))
}

fn advisory_stock_check(
    product: &Product,
    variant: Option<&Variant>,
    quantity: u32,
) -> Result<(), CartError> {
    let (available, stock) = match variant {
        Some(variant) => (variant.available, variant.stock_quantity),
        None => (true, product.stock_quantity),
    };
    if !available || stock < quantity {
        return Err(CartError::InsufficientStock {
            requested: quantity,
            available: stock,
        });
    }
    Ok(())
}
