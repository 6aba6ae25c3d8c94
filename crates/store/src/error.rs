use thiserror::Error;

use crate::RowKey;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A write targeted a row this transaction has not locked.
    #[error("Row {0} must be locked before it is written")]
    NotLocked(RowKey),

    /// A lock was requested below one already held, which could deadlock.
    #[error("Lock order violation: requested {requested} while holding {held}")]
    LockOrder { requested: RowKey, held: RowKey },

    /// A row the operation depends on does not exist.
    #[error("Row not found: {0}")]
    Missing(RowKey),

    /// A uniqueness constraint was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored row could not be mapped back into a record.
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
