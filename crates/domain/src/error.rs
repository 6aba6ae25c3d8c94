//! Domain error types.

use store::StoreError;
use thiserror::Error;

use crate::cart::CartError;
use crate::checkout::CheckoutError;
use crate::inventory::LedgerError;
use crate::order::OrderError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the inventory ledger or catalog administration.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A cart mutation was rejected.
    #[error(transparent)]
    Cart(#[from] CartError),

    /// An order lifecycle operation was rejected.
    #[error(transparent)]
    Order(#[from] OrderError),

    /// Checkout failed and was rolled back.
    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    /// An error occurred in the store outside any component.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl DomainError {
    /// Returns the storage failure behind this error, if that is what it is.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            DomainError::Ledger(LedgerError::Store(e))
            | DomainError::Cart(CartError::Store(e))
            | DomainError::Order(OrderError::Store(e))
            | DomainError::Checkout(CheckoutError::Store(e))
            | DomainError::Store(e) => Some(e),
            DomainError::Order(OrderError::Ledger(LedgerError::Store(e)))
            | DomainError::Checkout(CheckoutError::Ledger(LedgerError::Store(e))) => Some(e),
            _ => None,
        }
    }
}
