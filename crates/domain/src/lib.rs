//! Domain layer for the checkout system.
//!
//! This crate provides:
//! - the inventory ledger (reserve/release under row locks, variant aggregation)
//! - the cart with advisory availability checks
//! - the order lifecycle state machine and cancellation compensation
//! - the checkout orchestrator turning a cart into an order in one transaction
//! - payment settlement and the external collaborator ports

pub mod cart;
pub mod checkout;
pub mod error;
pub mod inventory;
pub mod order;
pub mod payment;
pub mod ports;

pub use cart::{CartError, CartItemView, CartService, CartView};
pub use checkout::{CheckoutError, CheckoutService};
pub use error::DomainError;
pub use inventory::{InventoryService, LedgerError, LockedInventory};
pub use order::{CancelOrigin, CancelRefusal, OrderAction, OrderError, OrderService};
pub use payment::PaymentService;
pub use ports::{
    AddressBook, InMemoryAddressBook, LogNotifier, NotifyError, OrderNotifier, RecordingNotifier,
};
