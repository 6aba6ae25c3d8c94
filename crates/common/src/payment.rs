//! Payment records: a passive ledger entry attached 1:1 to an order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Money, OrderId, ParseStatusError};

/// Provider recorded when no gateway is involved.
pub const MANUAL_PROVIDER: &str = "manual";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(ParseStatusError {
                kind: "payment",
                value: other.to_string(),
            }),
        }
    }
}

/// Payment ledger entry for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub order_id: OrderId,
    pub provider: String,
    pub status: PaymentStatus,
    pub amount: Money,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Creates the pending record written alongside a new order.
    pub fn pending(order_id: OrderId, amount: Money) -> Self {
        Self {
            order_id,
            provider: MANUAL_PROVIDER.to_string(),
            status: PaymentStatus::Pending,
            amount,
            reference: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_paid(&self) -> bool {
        self.status == PaymentStatus::Paid
    }

    /// Records settlement. A `None` reference keeps any reference already stored.
    pub fn mark_paid(&mut self, reference: Option<String>) {
        self.status = PaymentStatus::Paid;
        if reference.is_some() {
            self.reference = reference;
        }
    }
}
