//! Shared vocabulary for the checkout system.
//!
//! Identifiers, money and the plain records that every layer passes around:
//! catalog rows, cart lines, orders and payment records. Behaviour that needs
//! a transaction (stock mutation, status transitions) lives in `domain`.

pub mod cart;
pub mod catalog;
pub mod money;
pub mod order;
pub mod payment;
pub mod types;

pub use cart::CartLine;
pub use catalog::{ItemRef, Product, Variant};
pub use money::{AmountOverflow, Money};
pub use order::{Order, OrderLine, OrderStatus};
pub use payment::{PaymentRecord, PaymentStatus};
pub use types::{AddressId, CartLineId, IdentityId, OrderId, ParseStatusError, ProductId, VariantId};
