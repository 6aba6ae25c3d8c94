//! Order lifecycle and related types.

mod service;
mod state;

pub use service::OrderService;
pub use state::{CancelOrigin, OrderAction};

use common::{OrderId, OrderStatus};
use store::StoreError;
use thiserror::Error;

use crate::inventory::LedgerError;

/// Why a self-service cancellation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CancelRefusal {
    #[error("order is {0}")]
    Status(OrderStatus),

    #[error("paid order cannot be canceled")]
    AlreadyPaid,
}

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The order does not exist or belongs to another identity.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The transition is not in the lifecycle table.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order cannot be canceled: {0}")]
    NotCancelable(CancelRefusal),

    #[error("Only canceled orders can be deleted (order is {status})")]
    OnlyCanceledOrdersDeletable { status: OrderStatus },

    /// Stock compensation failed.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
