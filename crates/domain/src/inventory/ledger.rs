use std::collections::{BTreeMap, BTreeSet, HashMap};

use common::{ItemRef, Money, Product, ProductId, Variant, VariantId};
use store::{StoreError, Transaction};

use super::LedgerError;

/// Largest stock count of any row, product aggregates included.
///
/// Both backends must be able to hold it; PostgreSQL stores `INTEGER`.
pub const MAX_STOCK: u32 = i32::MAX as u32;

fn within_limit(item: ItemRef, quantity: u64) -> Result<u32, LedgerError> {
    u32::try_from(quantity)
        .ok()
        .filter(|quantity| *quantity <= MAX_STOCK)
        .ok_or(LedgerError::StockLimit { item, quantity })
}

/// Decrements stock, clamping at zero.
///
/// Callers check sufficiency under lock first, so the clamp only engages if
/// that check was bypassed.
pub(crate) fn decrement_clamped(item: ItemRef, stock: u32, quantity: u32) -> u32 {
    if quantity > stock {
        tracing::warn!(%item, stock, quantity, "stock decrement clamped at zero");
    }
    stock.saturating_sub(quantity)
}

#[derive(Debug, Clone, Copy, Default)]
struct Siblings {
    count: usize,
    stock: u64,
}

/// A set of inventory rows locked for the lifetime of one transaction.
///
/// Mutations are applied to the locked snapshot and restore the availability
/// invariant immediately; [`LockedInventory::flush`] writes the changed rows
/// back through the same transaction.
#[derive(Debug)]
pub struct LockedInventory {
    products: BTreeMap<ProductId, Product>,
    variants: BTreeMap<VariantId, Variant>,
    /// Variants of a locked product that are not themselves locked.
    unlocked_variants: HashMap<ProductId, Siblings>,
    dirty_products: BTreeSet<ProductId>,
    dirty_variants: BTreeSet<VariantId>,
}

impl LockedInventory {
    /// Locks every row needed to mutate `items`.
    ///
    /// Variant owners are resolved first so the owning products can be locked
    /// before any variant row, following the store's lock order.
    pub async fn acquire<T, I>(tx: &mut T, items: I) -> Result<Self, LedgerError>
    where
        T: Transaction,
        I: IntoIterator<Item = ItemRef>,
    {
        let mut product_ids = BTreeSet::new();
        let mut variant_ids = BTreeSet::new();
        for item in items {
            match item {
                ItemRef::Product(id) => {
                    product_ids.insert(id);
                }
                ItemRef::Variant(id) => {
                    variant_ids.insert(id);
                }
            }
        }

        let variant_ids: Vec<VariantId> = variant_ids.into_iter().collect();
        let owners = tx.find_variants(&variant_ids).await?;
        for id in &variant_ids {
            let variant = owners.get(id).ok_or(LedgerError::VariantNotFound(*id))?;
            product_ids.insert(variant.product_id);
        }

        let product_ids: Vec<ProductId> = product_ids.into_iter().collect();
        let mut locked_products = tx.lock_products(&product_ids).await?;
        let mut products = BTreeMap::new();
        for id in &product_ids {
            let product = locked_products
                .remove(id)
                .ok_or(LedgerError::ProductNotFound(*id))?;
            products.insert(*id, product);
        }

        let mut locked_variants = tx.lock_variants(&variant_ids).await?;
        let mut variants = BTreeMap::new();
        for id in &variant_ids {
            let variant = locked_variants
                .remove(id)
                .ok_or(LedgerError::VariantNotFound(*id))?;
            variants.insert(*id, variant);
        }

        // Siblings cannot change while the owning product is locked.
        let mut unlocked_variants = HashMap::new();
        for id in &product_ids {
            let siblings = tx.variants_of(*id).await?;
            let unlocked = siblings
                .iter()
                .filter(|v| !variants.contains_key(&v.id))
                .fold(Siblings::default(), |acc, v| Siblings {
                    count: acc.count + 1,
                    stock: acc.stock + u64::from(v.stock_quantity),
                });
            unlocked_variants.insert(*id, unlocked);
        }

        Ok(Self {
            products,
            variants,
            unlocked_variants,
            dirty_products: BTreeSet::new(),
            dirty_variants: BTreeSet::new(),
        })
    }

    pub fn product(&self, id: ProductId) -> Option<&Product> {
        self.products.get(&id)
    }

    pub fn variant(&self, id: VariantId) -> Option<&Variant> {
        self.variants.get(&id)
    }

    /// Returns the current unit price of an item.
    pub fn unit_price(&self, item: ItemRef) -> Result<Money, LedgerError> {
        match item {
            ItemRef::Product(id) => Ok(self.locked_product(id)?.price),
            ItemRef::Variant(id) => {
                let variant = self.locked_variant(id)?;
                let product = self.locked_product(variant.product_id)?;
                Ok(variant.effective_price(product))
            }
        }
    }

    /// Checks that `quantity` units of `item` can be reserved.
    ///
    /// A product whose stock is held by its variants cannot be reserved
    /// directly and is reported unavailable.
    pub fn check(&self, item: ItemRef, quantity: u32) -> Result<(), LedgerError> {
        let (available, stock) = match item {
            ItemRef::Product(id) => {
                let product = self.locked_product(id)?;
                if product.has_variants {
                    return Err(LedgerError::ProductUnavailable { item });
                }
                (product.available, product.stock_quantity)
            }
            ItemRef::Variant(id) => {
                let variant = self.locked_variant(id)?;
                (variant.available, variant.stock_quantity)
            }
        };

        if !available || stock < quantity {
            return Err(LedgerError::InsufficientStock {
                item,
                requested: quantity,
                available: stock,
            });
        }
        Ok(())
    }

    /// Takes `quantity` units of `item` out of stock.
    pub fn reserve(&mut self, item: ItemRef, quantity: u32) -> Result<(), LedgerError> {
        self.check(item, quantity)?;
        let stock = self.stock_of(item)?;
        self.write_stock(item, decrement_clamped(item, stock, quantity))
    }

    /// Returns `quantity` units of `item` to stock.
    pub fn release(&mut self, item: ItemRef, quantity: u32) -> Result<(), LedgerError> {
        if let ItemRef::Product(id) = item {
            if self.locked_product(id)?.has_variants {
                // Variants were added after the reservation; the units no
                // longer map onto any row that holds stock.
                tracing::warn!(%item, quantity, "release skipped, product stock is held by variants");
                return Ok(());
            }
        }
        let stock = u64::from(self.stock_of(item)?) + u64::from(quantity);
        self.write_stock(item, within_limit(item, stock)?)
    }

    /// Overwrites the stock of `item` (administrative restock).
    pub fn set_stock(&mut self, item: ItemRef, quantity: u32) -> Result<(), LedgerError> {
        if let ItemRef::Product(id) = item {
            if self.locked_product(id)?.has_variants {
                return Err(LedgerError::AggregateStock(id));
            }
        }
        self.write_stock(item, quantity)
    }

    fn stock_of(&self, item: ItemRef) -> Result<u32, LedgerError> {
        Ok(match item {
            ItemRef::Product(id) => self.locked_product(id)?.stock_quantity,
            ItemRef::Variant(id) => self.locked_variant(id)?.stock_quantity,
        })
    }

    /// Stores a new stock count and restores availability.
    ///
    /// Limits are checked before anything changes, including the aggregate
    /// a variant change implies for its product.
    fn write_stock(&mut self, item: ItemRef, quantity: u32) -> Result<(), LedgerError> {
        within_limit(item, u64::from(quantity))?;
        match item {
            ItemRef::Product(id) => {
                let product = self.locked_product_mut(id)?;
                product.stock_quantity = quantity;
                product.available = quantity > 0;
                self.dirty_products.insert(id);
            }
            ItemRef::Variant(id) => {
                let owner = self.locked_variant(id)?.product_id;
                self.aggregate(owner, Some((id, quantity)))?;

                let variant = self.locked_variant_mut(id)?;
                variant.stock_quantity = quantity;
                variant.available = quantity > 0;
                self.dirty_variants.insert(id);
                self.reconcile_product(owner)?;
            }
        }
        Ok(())
    }

    /// Sets the product price or the variant's override price.
    pub fn set_price(&mut self, item: ItemRef, price: Money) -> Result<(), LedgerError> {
        if price.is_negative() {
            return Err(LedgerError::NegativePrice(price));
        }
        match item {
            ItemRef::Product(id) => {
                self.locked_product_mut(id)?.price = price;
                self.dirty_products.insert(id);
            }
            ItemRef::Variant(id) => {
                self.locked_variant_mut(id)?.price = Some(price);
                self.dirty_variants.insert(id);
            }
        }
        Ok(())
    }

    /// Inserts a new variant of a locked product and folds it into the aggregate.
    pub async fn insert_variant<T: Transaction>(
        &mut self,
        tx: &mut T,
        variant: Variant,
    ) -> Result<(), LedgerError> {
        let owner = variant.product_id;
        self.locked_product(owner)?;
        let item = ItemRef::Variant(variant.id);
        within_limit(item, u64::from(variant.stock_quantity))?;
        let (_, current) = self.aggregate(owner, None)?;
        within_limit(
            ItemRef::Product(owner),
            u64::from(current) + u64::from(variant.stock_quantity),
        )?;

        tx.insert_variant(&variant).await?;
        tx.lock_variants(&[variant.id]).await?;

        self.variants.insert(variant.id, variant);
        self.reconcile_product(owner)
    }

    /// Deletes a locked variant and takes its stock out of the product aggregate.
    ///
    /// When the last variant goes the product holds its own stock again,
    /// starting from zero.
    pub async fn remove_variant<T: Transaction>(
        &mut self,
        tx: &mut T,
        id: VariantId,
    ) -> Result<Variant, LedgerError> {
        let owner = self.locked_variant(id)?.product_id;
        self.locked_product(owner)?;

        tx.delete_variant(id).await.map_err(|err| match err {
            StoreError::Conflict(_) => LedgerError::VariantInUse(id),
            other => LedgerError::Store(other),
        })?;

        let variant = self
            .variants
            .remove(&id)
            .ok_or(LedgerError::NotLocked(ItemRef::Variant(id)))?;
        self.dirty_variants.remove(&id);
        self.reconcile_product(owner)?;
        Ok(variant)
    }

    /// Counts a product's variants and sums their stock, with `change`
    /// standing in for one variant's current count.
    fn aggregate(
        &self,
        id: ProductId,
        change: Option<(VariantId, u32)>,
    ) -> Result<(usize, u32), LedgerError> {
        let unlocked = self.unlocked_variants.get(&id).copied().unwrap_or_default();
        let (count, stock) = self
            .variants
            .values()
            .filter(|v| v.product_id == id)
            .map(|v| match change {
                Some((changed, quantity)) if changed == v.id => quantity,
                _ => v.stock_quantity,
            })
            .fold((unlocked.count, unlocked.stock), |(count, stock), quantity| {
                (count + 1, stock + u64::from(quantity))
            });
        Ok((count, within_limit(ItemRef::Product(id), stock)?))
    }

    /// Recomputes a product's aggregate stock from its variants.
    pub fn reconcile_product(&mut self, id: ProductId) -> Result<(), LedgerError> {
        let (count, stock) = self.aggregate(id, None)?;

        let product = self.locked_product_mut(id)?;
        product.stock_quantity = stock;
        product.available = stock > 0;
        product.has_variants = count > 0;
        self.dirty_products.insert(id);
        Ok(())
    }

    /// Writes every changed row back through `tx`.
    pub async fn flush<T: Transaction>(&mut self, tx: &mut T) -> Result<(), LedgerError> {
        for id in std::mem::take(&mut self.dirty_products) {
            if let Some(product) = self.products.get(&id) {
                tx.update_product(product).await?;
            }
        }
        for id in std::mem::take(&mut self.dirty_variants) {
            if let Some(variant) = self.variants.get(&id) {
                tx.update_variant(variant).await?;
            }
        }
        Ok(())
    }

    fn locked_product(&self, id: ProductId) -> Result<&Product, LedgerError> {
        self.products
            .get(&id)
            .ok_or(LedgerError::NotLocked(ItemRef::Product(id)))
    }

    fn locked_product_mut(&mut self, id: ProductId) -> Result<&mut Product, LedgerError> {
        self.products
            .get_mut(&id)
            .ok_or(LedgerError::NotLocked(ItemRef::Product(id)))
    }

    fn locked_variant(&self, id: VariantId) -> Result<&Variant, LedgerError> {
        self.variants
            .get(&id)
            .ok_or(LedgerError::NotLocked(ItemRef::Variant(id)))
    }

    fn locked_variant_mut(&mut self, id: VariantId) -> Result<&mut Variant, LedgerError> {
        self.variants
            .get_mut(&id)
            .ok_or(LedgerError::NotLocked(ItemRef::Variant(id)))
    }
}
