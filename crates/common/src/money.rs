//! Exact money amounts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An amount computation left the representable range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Amount out of range")]
pub struct AmountOverflow;

/// Money amount with two fractional digits, held as minor units.
///
/// Prices, order totals and payment amounts all use this type so that
/// `total == Σ price * quantity` holds exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money {
    cents: i64,
}

impl Money {
    /// Creates a new amount from minor units (e.g., 1000 = 10.00).
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Creates a new amount from whole major units, saturating at the bounds.
    pub fn from_major(major: i64) -> Self {
        Self {
            cents: major.saturating_mul(100),
        }
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in minor units.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns the whole major units.
    pub fn major(&self) -> i64 {
        self.cents / 100
    }

    /// Returns the minor-unit remainder after the major units.
    pub fn minor_part(&self) -> i64 {
        (self.cents % 100).abs()
    }

    pub fn is_zero(&self) -> bool {
        self.cents == 0
    }

    pub fn is_negative(&self) -> bool {
        self.cents < 0
    }

    /// Multiplies by a quantity, or `None` on overflow.
    pub fn checked_mul(&self, quantity: u32) -> Option<Money> {
        self.cents
            .checked_mul(i64::from(quantity))
            .map(Money::from_cents)
    }

    /// Multiplies by a quantity, saturating at the bounds.
    pub fn saturating_mul(&self, quantity: u32) -> Money {
        Money::from_cents(self.cents.saturating_mul(i64::from(quantity)))
    }

    /// Adds two amounts, or `None` on overflow.
    pub fn checked_add(&self, other: Money) -> Option<Money> {
        self.cents.checked_add(other.cents).map(Money::from_cents)
    }

    /// Sums `unit * quantity` over `lines`, failing if any step overflows.
    pub fn total_of<I>(lines: I) -> Result<Money, AmountOverflow>
    where
        I: IntoIterator<Item = (Money, u32)>,
    {
        lines
            .into_iter()
            .try_fold(Money::zero(), |sum, (unit, quantity)| {
                unit.checked_mul(quantity)
                    .and_then(|line| sum.checked_add(line))
            })
            .ok_or(AmountOverflow)
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cents < 0 {
            write!(f, "-{}.{:02}", self.major().unsigned_abs(), self.minor_part())
        } else {
            write!(f, "{}.{:02}", self.major(), self.minor_part())
        }
    }
}
