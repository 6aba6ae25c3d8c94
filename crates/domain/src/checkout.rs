//! Checkout: turns an identity's cart into an order in one transaction.

use std::collections::BTreeMap;
use std::time::Instant;

use common::{AddressId, AmountOverflow, IdentityId, ItemRef, Order, OrderLine, PaymentRecord};
use store::{Store, StoreError, Transaction};
use thiserror::Error;
use tracing::Instrument;

use crate::inventory::{LedgerError, LockedInventory};
use crate::ports::{AddressBook, OrderNotifier};

/// Errors that abort a checkout. Nothing is written when one is returned.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Product is not available: {item}")]
    ProductUnavailable { item: ItemRef },

    #[error("Insufficient stock for {item}: requested {requested}, available {available}")]
    InsufficientStock {
        item: ItemRef,
        requested: u32,
        available: u32,
    },

    /// The order total does not fit in a money amount.
    #[error("Order total out of range")]
    TotalOutOfRange(#[from] AmountOverflow),

    #[error("Ledger error: {0}")]
    Ledger(LedgerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl CheckoutError {
    /// Returns the metrics label for this failure.
    pub fn reason(&self) -> &'static str {
        match self {
            CheckoutError::EmptyCart => "empty_cart",
            CheckoutError::ProductUnavailable { .. } => "product_unavailable",
            CheckoutError::InsufficientStock { .. } => "insufficient_stock",
            CheckoutError::TotalOutOfRange(_) => "total_out_of_range",
            CheckoutError::Ledger(_) => "ledger",
            CheckoutError::Store(_) => "storage",
        }
    }
}

impl From<LedgerError> for CheckoutError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::ProductUnavailable { item } => CheckoutError::ProductUnavailable { item },
            LedgerError::InsufficientStock {
                item,
                requested,
                available,
            } => CheckoutError::InsufficientStock {
                item,
                requested,
                available,
            },
            // A row referenced by the cart has gone from the catalog.
            LedgerError::ProductNotFound(id) => CheckoutError::ProductUnavailable {
                item: ItemRef::Product(id),
            },
            LedgerError::VariantNotFound(id) => CheckoutError::ProductUnavailable {
                item: ItemRef::Variant(id),
            },
            LedgerError::Store(e) => CheckoutError::Store(e),
            other => CheckoutError::Ledger(other),
        }
    }
}

/// Checkout orchestrator.
///
/// Inventory rows are locked only inside [`CheckoutService::place_order`]'s
/// transaction; the address book is consulted before any lock is taken and
/// the notifier only after commit, on a task of its own.
#[derive(Clone)]
pub struct CheckoutService<S, A, N> {
    store: S,
    addresses: A,
    notifier: N,
}

impl<S, A, N> CheckoutService<S, A, N>
where
    S: Store,
    A: AddressBook,
    N: OrderNotifier + Clone + 'static,
{
    pub fn new(store: S, addresses: A, notifier: N) -> Self {
        Self {
            store,
            addresses,
            notifier,
        }
    }

    /// Places an order from the identity's cart.
    #[tracing::instrument(skip(self))]
    pub async fn place_order(
        &self,
        owner: IdentityId,
        address: Option<AddressId>,
    ) -> Result<Order, CheckoutError> {
        let started = Instant::now();
        let result = self.run(owner, address).await;
        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());

        let order = match result {
            Ok(order) => order,
            Err(err) => {
                metrics::counter!("checkout_failures_total", "reason" => err.reason()).increment(1);
                tracing::info!(error = %err, "checkout rejected");
                return Err(err);
            }
        };

        metrics::counter!("checkout_orders_placed_total").increment(1);
        metrics::counter!("inventory_units_reserved_total")
            .increment(order.total_quantity());
        tracing::info!(order_id = %order.id, total = %order.total, "order placed");

        self.notify(order.clone());
        Ok(order)
    }

    /// Sends the order-created notification without holding up the caller.
    /// Failures are logged and counted, never reported back.
    fn notify(&self, order: Order) {
        let notifier = self.notifier.clone();
        tokio::spawn(
            async move {
                if let Err(err) = notifier.order_created(&order).await {
                    metrics::counter!("notifications_failed_total").increment(1);
                    tracing::warn!(order_id = %order.id, error = %err, "order notification failed");
                }
            }
            .in_current_span(),
        );
    }

    async fn run(
        &self,
        owner: IdentityId,
        address: Option<AddressId>,
    ) -> Result<Order, CheckoutError> {
        let mut tx = self.store.begin().await?;

        let lines = tx.cart_lines(owner).await?;
        if lines.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let address = self.resolve_address(owner, address).await;

        let mut requested: BTreeMap<ItemRef, u32> = BTreeMap::new();
        for line in &lines {
            let total = requested.entry(line.item()).or_insert(0);
            *total = total.saturating_add(line.quantity);
        }
        let mut inventory = LockedInventory::acquire(&mut tx, requested.keys().copied()).await?;

        // Every line is validated before anything is written.
        for (item, quantity) in &requested {
            inventory.check(*item, *quantity)?;
        }

        let mut order_lines = Vec::with_capacity(lines.len());
        for line in &lines {
            order_lines.push(OrderLine {
                product_id: line.product_id,
                variant_id: line.variant_id,
                quantity: line.quantity,
                unit_price: inventory.unit_price(line.item())?,
            });
        }
        let order = Order::new(owner, address, order_lines)?;

        for (item, quantity) in order.reserved_items() {
            inventory.reserve(item, quantity)?;
        }
        inventory.flush(&mut tx).await?;

        tx.insert_order(&order).await?;
        tx.insert_payment(&PaymentRecord::pending(order.id, order.total))
            .await?;
        tx.clear_cart(owner).await?;
        tx.commit().await?;

        Ok(order)
    }

    /// Uses the requested address if it is the identity's own, otherwise the
    /// identity's default.
    async fn resolve_address(
        &self,
        owner: IdentityId,
        requested: Option<AddressId>,
    ) -> Option<AddressId> {
        if let Some(address) = requested {
            if self.addresses.address_belongs_to(address, owner).await {
                return Some(address);
            }
            tracing::debug!(%address, "requested address not owned, using default");
        }
        self.addresses.default_address_for(owner).await
    }
}
