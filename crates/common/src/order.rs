//! Orders and their lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    AddressId, AmountOverflow, IdentityId, ItemRef, Money, OrderId, ParseStatusError, ProductId,
    VariantId,
};

/// The status of an order in its lifecycle.
///
/// ```text
/// Pending ──► Paid, Shipped, Canceled
/// Paid    ──► Shipped, Received, Canceled
/// Shipped ──► Received, Canceled
/// ```
///
/// The transition rules themselves live with the order lifecycle in `domain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Order placed, awaiting payment (initial state).
    #[default]
    Pending,

    /// Payment settled.
    Paid,

    /// Handed to the carrier.
    Shipped,

    /// Delivered to the customer (terminal state).
    Received,

    /// Canceled, reserved stock restored (terminal state).
    Canceled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Shipped,
        OrderStatus::Received,
        OrderStatus::Canceled,
    ];

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Received | OrderStatus::Canceled)
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Received => "received",
            OrderStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError {
                kind: "order",
                value: s.to_string(),
            })
    }
}

/// A line of a placed order.
///
/// `unit_price` is captured at checkout and never re-derived from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderLine {
    /// Returns `unit_price * quantity`.
    ///
    /// Saturates rather than overflowing. Lines of an [`Order`] never reach
    /// the bound because [`Order::new`] rejects totals that do not fit.
    pub fn line_total(&self) -> Money {
        self.unit_price.saturating_mul(self.quantity)
    }

    /// Returns the inventory row this line reserved from.
    pub fn item(&self) -> ItemRef {
        ItemRef::for_line(self.product_id, self.variant_id)
    }
}

/// An immutable record of a checkout.
///
/// Only `status` changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub owner: IdentityId,
    pub status: OrderStatus,
    pub total: Money,
    pub address: Option<AddressId>,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// Creates a pending order whose total is computed once from `lines`.
    pub fn new(
        owner: IdentityId,
        address: Option<AddressId>,
        lines: Vec<OrderLine>,
    ) -> Result<Self, AmountOverflow> {
        let total = Money::total_of(lines.iter().map(|line| (line.unit_price, line.quantity)))?;
        Ok(Self {
            id: OrderId::new(),
            owner,
            status: OrderStatus::Pending,
            total,
            address,
            created_at: Utc::now(),
            lines,
        })
    }

    /// Returns the total quantity across all lines.
    pub fn total_quantity(&self) -> u64 {
        self.lines.iter().map(|line| u64::from(line.quantity)).sum()
    }

    /// Returns the (item, quantity) pairs this order holds in the ledger.
    pub fn reserved_items(&self) -> impl Iterator<Item = (ItemRef, u32)> + '_ {
        self.lines.iter().map(|line| (line.item(), line.quantity))
    }
}
