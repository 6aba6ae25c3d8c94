//! Catalog administration on top of the ledger.

use common::{ItemRef, Money, Product, ProductId, Variant, VariantId};
use store::{Store, Transaction};

use super::{LedgerError, LockedInventory, MAX_STOCK};

/// Service for catalog rows and their stock.
///
/// Every stock mutation goes through [`LockedInventory`] so the availability
/// invariant and the product aggregate are restored in the same transaction.
#[derive(Clone)]
pub struct InventoryService<S: Store> {
    store: S,
}

impl<S: Store> InventoryService<S> {
    /// Creates a new inventory service with the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Adds a product without variants.
    #[tracing::instrument(skip(self))]
    pub async fn create_product(
        &self,
        name: String,
        price: Money,
        stock_quantity: u32,
    ) -> Result<Product, LedgerError> {
        if price.is_negative() {
            return Err(LedgerError::NegativePrice(price));
        }
        let product = Product::new(name, price, stock_quantity);
        if stock_quantity > MAX_STOCK {
            return Err(LedgerError::StockLimit {
                item: ItemRef::Product(product.id),
                quantity: u64::from(stock_quantity),
            });
        }

        let mut tx = self.store.begin().await?;
        tx.insert_product(&product).await?;
        tx.commit().await?;

        tracing::info!(product_id = %product.id, "product created");
        Ok(product)
    }

    /// Adds a variant and folds its stock into the product aggregate.
    #[tracing::instrument(skip(self))]
    pub async fn add_variant(
        &self,
        product_id: ProductId,
        name: String,
        price: Option<Money>,
        stock_quantity: u32,
    ) -> Result<Variant, LedgerError> {
        if let Some(price) = price.filter(Money::is_negative) {
            return Err(LedgerError::NegativePrice(price));
        }
        let variant = Variant::new(product_id, name, price, stock_quantity);

        let mut tx = self.store.begin().await?;
        let mut inventory =
            LockedInventory::acquire(&mut tx, [ItemRef::Product(product_id)]).await?;
        inventory.insert_variant(&mut tx, variant.clone()).await?;
        inventory.flush(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(%product_id, variant_id = %variant.id, "variant added");
        Ok(variant)
    }

    /// Deletes a variant and returns its product with the aggregate recomputed.
    ///
    /// Refused while a cart line or an order line refers to the variant.
    #[tracing::instrument(skip(self))]
    pub async fn remove_variant(&self, variant_id: VariantId) -> Result<Product, LedgerError> {
        let mut tx = self.store.begin().await?;
        let mut inventory =
            LockedInventory::acquire(&mut tx, [ItemRef::Variant(variant_id)]).await?;
        let variant = inventory.remove_variant(&mut tx, variant_id).await?;
        inventory.flush(&mut tx).await?;
        let product = inventory
            .product(variant.product_id)
            .cloned()
            .ok_or(LedgerError::ProductNotFound(variant.product_id))?;
        tx.commit().await?;

        tracing::info!(product_id = %product.id, %variant_id, "variant removed");
        Ok(product)
    }

    /// Overwrites the stock of a product or variant.
    #[tracing::instrument(skip(self))]
    pub async fn set_stock(&self, item: ItemRef, quantity: u32) -> Result<(), LedgerError> {
        let mut tx = self.store.begin().await?;
        let mut inventory = LockedInventory::acquire(&mut tx, [item]).await?;
        inventory.set_stock(item, quantity)?;
        inventory.flush(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(%item, quantity, "stock set");
        Ok(())
    }

    /// Sets a product price or a variant override price.
    ///
    /// Prices already captured on orders are unaffected.
    #[tracing::instrument(skip(self))]
    pub async fn set_price(&self, item: ItemRef, price: Money) -> Result<(), LedgerError> {
        let mut tx = self.store.begin().await?;
        let mut inventory = LockedInventory::acquire(&mut tx, [item]).await?;
        inventory.set_price(item, price)?;
        inventory.flush(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn product(&self, id: ProductId) -> Result<Product, LedgerError> {
        let mut tx = self.store.begin().await?;
        let mut found = tx.find_products(&[id]).await?;
        tx.commit().await?;
        found.remove(&id).ok_or(LedgerError::ProductNotFound(id))
    }

    #[tracing::instrument(skip(self))]
    pub async fn variant(&self, id: VariantId) -> Result<Variant, LedgerError> {
        let mut tx = self.store.begin().await?;
        let mut found = tx.find_variants(&[id]).await?;
        tx.commit().await?;
        found.remove(&id).ok_or(LedgerError::VariantNotFound(id))
    }

    /// Returns the variants of a product, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn variants_of(&self, product_id: ProductId) -> Result<Vec<Variant>, LedgerError> {
        let mut tx = self.store.begin().await?;
        if tx.find_products(&[product_id]).await?.is_empty() {
            return Err(LedgerError::ProductNotFound(product_id));
        }
        let variants = tx.variants_of(product_id).await?;
        tx.commit().await?;
        Ok(variants)
    }
}
