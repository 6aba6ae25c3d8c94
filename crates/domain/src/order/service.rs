//! Order service: queries, cancellation, administrative transitions and deletion.

use common::{IdentityId, Order, OrderId, OrderStatus};
use store::{Store, Transaction};

use super::{CancelOrigin, CancelRefusal, OrderAction, OrderError};
use crate::inventory::{LedgerError, LockedInventory};

/// Restores the stock an order reserved at checkout.
///
/// The order row must already be locked by `tx`; product and variant rows
/// are locked after it, following the store's lock order.
pub(crate) async fn release_reserved<T: Transaction>(
    tx: &mut T,
    order: &Order,
) -> Result<u64, LedgerError> {
    let items = order.reserved_items().map(|(item, _)| item);
    let mut inventory = LockedInventory::acquire(tx, items).await?;
    for (item, quantity) in order.reserved_items() {
        inventory.release(item, quantity)?;
    }
    inventory.flush(tx).await?;
    Ok(order.total_quantity())
}

/// Service for managing placed orders.
#[derive(Clone)]
pub struct OrderService<S: Store> {
    store: S,
}

impl<S: Store> OrderService<S> {
    /// Creates a new order service with the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns one of the identity's orders.
    #[tracing::instrument(skip(self))]
    pub async fn order(&self, owner: IdentityId, id: OrderId) -> Result<Order, OrderError> {
        let mut tx = self.store.begin().await?;
        let order = tx.find_order(id).await?;
        tx.commit().await?;
        order
            .filter(|order| order.owner == owner)
            .ok_or(OrderError::OrderNotFound(id))
    }

    /// Returns the identity's orders, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn orders(&self, owner: IdentityId) -> Result<Vec<Order>, OrderError> {
        let mut tx = self.store.begin().await?;
        let orders = tx.orders_for(owner).await?;
        tx.commit().await?;
        Ok(orders)
    }

    /// Returns every order regardless of owner, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn all_orders(&self) -> Result<Vec<Order>, OrderError> {
        let mut tx = self.store.begin().await?;
        let orders = tx.all_orders().await?;
        tx.commit().await?;
        Ok(orders)
    }

    /// Returns any order regardless of owner.
    #[tracing::instrument(skip(self))]
    pub async fn admin_order(&self, id: OrderId) -> Result<Order, OrderError> {
        let mut tx = self.store.begin().await?;
        let order = tx.find_order(id).await?;
        tx.commit().await?;
        order.ok_or(OrderError::OrderNotFound(id))
    }

    /// Cancels a pending, unpaid order on behalf of its owner.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, owner: IdentityId, id: OrderId) -> Result<Order, OrderError> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .lock_order(id)
            .await?
            .filter(|order| order.owner == owner)
            .ok_or(OrderError::OrderNotFound(id))?;

        let action = OrderAction::Cancel(CancelOrigin::SelfService);
        let status = action.apply(order.status)?;
        if tx
            .find_payment(id)
            .await?
            .is_some_and(|payment| payment.is_paid())
        {
            return Err(OrderError::NotCancelable(CancelRefusal::AlreadyPaid));
        }

        let order = self.transition(&mut tx, order, action, status).await?;
        tx.commit().await?;
        Ok(order)
    }

    /// Moves an order to `target` on behalf of an administrator.
    #[tracing::instrument(skip(self))]
    pub async fn set_status(&self, id: OrderId, target: OrderStatus) -> Result<Order, OrderError> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .lock_order(id)
            .await?
            .ok_or(OrderError::OrderNotFound(id))?;

        let action = OrderAction::for_target(target).ok_or(OrderError::InvalidStatusTransition {
            from: order.status,
            to: target,
        })?;
        let status = action.apply(order.status)?;

        let order = self.transition(&mut tx, order, action, status).await?;
        tx.commit().await?;
        Ok(order)
    }

    /// Deletes a canceled order together with its payment record.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, owner: IdentityId, id: OrderId) -> Result<(), OrderError> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .lock_order(id)
            .await?
            .filter(|order| order.owner == owner)
            .ok_or(OrderError::OrderNotFound(id))?;

        if order.status != OrderStatus::Canceled {
            return Err(OrderError::OnlyCanceledOrdersDeletable {
                status: order.status,
            });
        }

        tx.delete_order(id).await?;
        tx.commit().await?;

        tracing::info!(order_id = %id, "order deleted");
        Ok(())
    }

    /// Writes a status change and, for cancellations, restores stock in the
    /// same transaction.
    async fn transition(
        &self,
        tx: &mut S::Tx,
        mut order: Order,
        action: OrderAction,
        status: OrderStatus,
    ) -> Result<Order, OrderError> {
        if action.compensates() {
            let released = release_reserved(tx, &order).await?;
            metrics::counter!("inventory_units_released_total").increment(released);
        }
        tx.update_order_status(order.id, status).await?;

        if let OrderAction::Cancel(origin) = action {
            metrics::counter!("orders_canceled_total", "origin" => origin.as_str()).increment(1);
        }
        tracing::info!(order_id = %order.id, from = %order.status, to = %status, "order status changed");

        order.status = status;
        Ok(order)
    }
}
