//! Storage boundary for the checkout system.
//!
//! Every use case runs inside one [`Transaction`]: rows that carry shared
//! stock are locked exclusively for the lifetime of the transaction, writes
//! become visible atomically on [`Transaction::commit`], and dropping an
//! uncommitted transaction rolls it back.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, InMemoryTransaction};
pub use postgres::{PgTransaction, PostgresStore};
pub use store::{RowKey, Store, Transaction};
