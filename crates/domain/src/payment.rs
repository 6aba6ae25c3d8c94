//! Payment settlement driven by an administrative action.

use common::{OrderId, OrderStatus, PaymentRecord};
use store::{Store, Transaction};

use crate::order::{OrderAction, OrderError};

/// Service recording settlement of an order's payment.
#[derive(Clone)]
pub struct PaymentService<S: Store> {
    store: S,
}

impl<S: Store> PaymentService<S> {
    /// Creates a new payment service with the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Marks the order's payment as paid and moves a pending order to `Paid`.
    ///
    /// The payment record is created if the order has none. Orders already
    /// past `Pending` keep their status; canceled orders cannot be paid.
    #[tracing::instrument(skip(self))]
    pub async fn mark_paid(
        &self,
        order_id: OrderId,
        reference: Option<String>,
    ) -> Result<PaymentRecord, OrderError> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .lock_order(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))?;

        if order.status == OrderStatus::Canceled {
            return Err(OrderError::InvalidStatusTransition {
                from: order.status,
                to: OrderStatus::Paid,
            });
        }

        let payment = match tx.find_payment(order_id).await? {
            Some(mut payment) => {
                payment.mark_paid(reference);
                tx.update_payment(&payment).await?;
                payment
            }
            None => {
                let mut payment = PaymentRecord::pending(order_id, order.total);
                payment.mark_paid(reference);
                tx.insert_payment(&payment).await?;
                payment
            }
        };

        if order.status == OrderStatus::Pending {
            let status = OrderAction::MarkPaid.apply(order.status)?;
            tx.update_order_status(order_id, status).await?;
        }
        tx.commit().await?;

        tracing::info!(%order_id, reference = ?payment.reference, "payment marked paid");
        Ok(payment)
    }
}
