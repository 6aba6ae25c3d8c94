use std::collections::HashMap;

use async_trait::async_trait;
use common::{
    CartLine, CartLineId, IdentityId, Order, OrderId, OrderStatus, PaymentRecord, Product,
    ProductId, Variant, VariantId,
};

use crate::{Result, StoreError};

/// A lockable row.
///
/// The derived ordering is the global lock order: order rows first, then
/// product rows, then variant rows, each by ascending id. A transaction that
/// takes locks in several steps must move forward through this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowKey {
    Order(OrderId),
    Product(ProductId),
    Variant(VariantId),
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowKey::Order(id) => write!(f, "order {id}"),
            RowKey::Product(id) => write!(f, "product {id}"),
            RowKey::Variant(id) => write!(f, "variant {id}"),
        }
    }
}

/// Plans a lock acquisition against the locks a transaction already holds.
///
/// Returns the keys still to lock, sorted and deduplicated. Fails if any of
/// them sorts below the highest key already held.
pub(crate) fn plan_locks(
    is_held: impl Fn(&RowKey) -> bool,
    highest_held: Option<RowKey>,
    mut keys: Vec<RowKey>,
) -> Result<Vec<RowKey>> {
    keys.sort();
    keys.dedup();
    keys.retain(|key| !is_held(key));

    if let (Some(first), Some(held)) = (keys.first(), highest_held)
        && *first < held
    {
        return Err(StoreError::LockOrder {
            requested: *first,
            held,
        });
    }
    Ok(keys)
}

/// Entry point for units of work.
#[async_trait]
pub trait Store: Send + Sync {
    /// The transaction type handed out by this store.
    type Tx: Transaction;

    /// Opens a new transaction.
    async fn begin(&self) -> Result<Self::Tx>;
}

/// One atomic unit of work.
///
/// Reads through `find_*` are plain reads. `lock_*` acquires exclusive row
/// locks (sorted by id) and returns the rows as they are once the lock is
/// held. Writes to stock rows, order status and payments require the
/// matching lock and fail with [`crate::StoreError::NotLocked`] otherwise.
#[async_trait]
pub trait Transaction: Send {
    // Catalog

    /// Inserts a new product row.
    async fn insert_product(&mut self, product: &Product) -> Result<()>;

    /// Inserts a new variant row. The owning product must exist.
    async fn insert_variant(&mut self, variant: &Variant) -> Result<()>;

    /// Reads products by id without locking. Unknown ids are absent from the map.
    async fn find_products(&mut self, ids: &[ProductId]) -> Result<HashMap<ProductId, Product>>;

    /// Reads variants by id without locking. Unknown ids are absent from the map.
    async fn find_variants(&mut self, ids: &[VariantId]) -> Result<HashMap<VariantId, Variant>>;

    /// Returns all variants of a product, oldest first.
    async fn variants_of(&mut self, product_id: ProductId) -> Result<Vec<Variant>>;

    /// Locks product rows in ascending id order and returns them.
    async fn lock_products(&mut self, ids: &[ProductId]) -> Result<HashMap<ProductId, Product>>;

    /// Locks variant rows in ascending id order and returns them.
    async fn lock_variants(&mut self, ids: &[VariantId]) -> Result<HashMap<VariantId, Variant>>;

    /// Writes back a locked product row.
    async fn update_product(&mut self, product: &Product) -> Result<()>;

    /// Writes back a locked variant row.
    async fn update_variant(&mut self, variant: &Variant) -> Result<()>;

    /// Deletes a locked variant row.
    ///
    /// Fails with [`crate::StoreError::Conflict`] while a cart line or an
    /// order line still refers to the variant.
    async fn delete_variant(&mut self, id: VariantId) -> Result<()>;

    // Cart

    /// Returns the owner's cart lines in the order they were added.
    async fn cart_lines(&mut self, owner: IdentityId) -> Result<Vec<CartLine>>;

    /// Inserts a cart line or updates the quantity of an existing one.
    async fn upsert_cart_line(&mut self, line: &CartLine) -> Result<()>;

    /// Deletes one of the owner's cart lines. Returns false if it did not exist.
    async fn delete_cart_line(&mut self, owner: IdentityId, line_id: CartLineId) -> Result<bool>;

    /// Deletes all of the owner's cart lines, returning how many were removed.
    async fn clear_cart(&mut self, owner: IdentityId) -> Result<u64>;

    // Orders

    /// Inserts an order together with its lines.
    async fn insert_order(&mut self, order: &Order) -> Result<()>;

    /// Reads an order without locking.
    async fn find_order(&mut self, id: OrderId) -> Result<Option<Order>>;

    /// Locks an order row and returns it.
    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>>;

    /// Returns the owner's orders, newest first.
    async fn orders_for(&mut self, owner: IdentityId) -> Result<Vec<Order>>;

    /// Returns every order, newest first.
    async fn all_orders(&mut self) -> Result<Vec<Order>>;

    /// Updates the status of a locked order.
    async fn update_order_status(&mut self, id: OrderId, status: OrderStatus) -> Result<()>;

    /// Deletes a locked order with its lines and payment record.
    async fn delete_order(&mut self, id: OrderId) -> Result<bool>;

    // Payments

    /// Inserts the payment record of an order.
    async fn insert_payment(&mut self, payment: &PaymentRecord) -> Result<()>;

    /// Reads the payment record of an order.
    async fn find_payment(&mut self, order_id: OrderId) -> Result<Option<PaymentRecord>>;

    /// Writes back the payment record of a locked order.
    async fn update_payment(&mut self, payment: &PaymentRecord) -> Result<()>;

    // Completion

    /// Makes all writes visible and releases every lock.
    async fn commit(self) -> Result<()>;

    /// Discards all writes and releases every lock.
    async fn rollback(self) -> Result<()>;
}
