//! Order state machine.

use common::OrderStatus;
use serde::{Deserialize, Serialize};

use super::{CancelRefusal, OrderError};

/// Who asked for a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOrigin {
    /// The identity that placed the order.
    SelfService,
    /// An administrator.
    Admin,
}

impl CancelOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelOrigin::SelfService => "self_service",
            CancelOrigin::Admin => "admin",
        }
    }
}

/// An externally driven request to move an order along its lifecycle.
///
/// Transition table:
/// ```text
/// action              from                        to
/// MarkPaid            Pending                     Paid
/// Ship                Pending, Paid               Shipped
/// Receive             Paid, Shipped               Received
/// Cancel(SelfService) Pending                     Canceled
/// Cancel(Admin)       Pending, Paid, Shipped      Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderAction {
    MarkPaid,
    Ship,
    Receive,
    Cancel(CancelOrigin),
}

impl OrderAction {
    /// Returns the administrative action that moves an order to `status`.
    ///
    /// There is no action leading back to `Pending`.
    pub fn for_target(status: OrderStatus) -> Option<Self> {
        match status {
            OrderStatus::Pending => None,
            OrderStatus::Paid => Some(OrderAction::MarkPaid),
            OrderStatus::Shipped => Some(OrderAction::Ship),
            OrderStatus::Received => Some(OrderAction::Receive),
            OrderStatus::Canceled => Some(OrderAction::Cancel(CancelOrigin::Admin)),
        }
    }

    /// Returns the status this action leads to.
    pub fn target(&self) -> OrderStatus {
        match self {
            OrderAction::MarkPaid => OrderStatus::Paid,
            OrderAction::Ship => OrderStatus::Shipped,
            OrderAction::Receive => OrderStatus::Received,
            OrderAction::Cancel(_) => OrderStatus::Canceled,
        }
    }

    /// Applies the action to an order in `from`, returning the new status.
    pub fn apply(&self, from: OrderStatus) -> Result<OrderStatus, OrderError> {
        use OrderStatus::*;

        let allowed = match self {
            OrderAction::MarkPaid => matches!(from, Pending),
            OrderAction::Ship => matches!(from, Pending | Paid),
            OrderAction::Receive => matches!(from, Paid | Shipped),
            OrderAction::Cancel(CancelOrigin::SelfService) => matches!(from, Pending),
            OrderAction::Cancel(CancelOrigin::Admin) => matches!(from, Pending | Paid | Shipped),
        };

        if allowed {
            return Ok(self.target());
        }
        match self {
            OrderAction::Cancel(CancelOrigin::SelfService) => {
                Err(OrderError::NotCancelable(CancelRefusal::Status(from)))
            }
            _ => Err(OrderError::InvalidStatusTransition {
                from,
                to: self.target(),
            }),
        }
    }

    /// Returns true if entering the target status must restore reserved stock.
    pub fn compensates(&self) -> bool {
        matches!(self, OrderAction::Cancel(_))
    }
}
