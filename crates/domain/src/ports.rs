//! Boundaries to collaborators outside the checkout core.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use common::{AddressId, IdentityId, Order, OrderId};
use thiserror::Error;
use tokio::sync::{Notify, RwLock};

/// Read-only view of the identities' shipping addresses.
#[async_trait]
pub trait AddressBook: Send + Sync {
    /// Returns the identity's default address, if it has one.
    async fn default_address_for(&self, identity: IdentityId) -> Option<AddressId>;

    /// Returns true if `address` belongs to `identity`.
    async fn address_belongs_to(&self, address: AddressId, identity: IdentityId) -> bool;
}

#[derive(Debug, Default)]
struct AddressBookState {
    owners: HashMap<AddressId, IdentityId>,
    defaults: HashMap<IdentityId, AddressId>,
}

/// In-memory address book.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAddressBook {
    state: Arc<RwLock<AddressBookState>>,
}

impl InMemoryAddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new address for `identity`, optionally as its default.
    pub async fn add_address(&self, identity: IdentityId, default: bool) -> AddressId {
        let address = AddressId::new();
        let mut state = self.state.write().await;
        state.owners.insert(address, identity);
        if default {
            state.defaults.insert(identity, address);
        }
        address
    }
}

#[async_trait]
impl AddressBook for InMemoryAddressBook {
    async fn default_address_for(&self, identity: IdentityId) -> Option<AddressId> {
        self.state.read().await.defaults.get(&identity).copied()
    }

    async fn address_belongs_to(&self, address: AddressId, identity: IdentityId) -> bool {
        self.state.read().await.owners.get(&address) == Some(&identity)
    }
}

/// A notification that could not be delivered.
#[derive(Debug, Error)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

/// Hook invoked once an order has been committed.
///
/// Checkout runs it on a spawned task, so implementations are cloned into
/// that task and their errors never reach the customer.
#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn order_created(&self, order: &Order) -> Result<(), NotifyError>;
}

/// Notifier that emits a structured log event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl OrderNotifier for LogNotifier {
    async fn order_created(&self, order: &Order) -> Result<(), NotifyError> {
        tracing::info!(
            order_id = %order.id,
            owner = %order.owner,
            total = %order.total,
            lines = order.lines.len(),
            "order created notification"
        );
        Ok(())
    }
}

/// Notifier that records what it was asked to send, for tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<RwLock<Vec<OrderId>>>,
    fail: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
    attempted: Arc<Notify>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following notification fail.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Returns the orders notified so far.
    pub async fn sent(&self) -> Vec<OrderId> {
        self.sent.read().await.clone()
    }

    /// Waits until `attempts` notifications have been tried, successful or
    /// not, and returns the orders notified by then.
    pub async fn settled(&self, attempts: usize) -> Vec<OrderId> {
        loop {
            let attempted = self.attempted.notified();
            if self.attempts.load(Ordering::SeqCst) >= attempts {
                return self.sent().await;
            }
            attempted.await;
        }
    }
}

#[async_trait]
impl OrderNotifier for RecordingNotifier {
    async fn order_created(&self, order: &Order) -> Result<(), NotifyError> {
        let result = if self.fail.load(Ordering::SeqCst) {
            Err(NotifyError("notification channel unavailable".to_string()))
        } else {
            self.sent.write().await.push(order.id);
            Ok(())
        };
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.attempted.notify_waiters();
        result
    }
}
