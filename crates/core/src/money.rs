//! Fixed-scale monetary amounts.
//!
//! Every amount that enters or leaves the ledger is carried at [`MONEY_SCALE`]
//! fractional digits with half-even (banker's) rounding. Arithmetic happens on
//! normalized values and re-normalizes its result, so balances never drift.

use core::fmt;
use core::ops::Neg;
use core::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_object::ValueObject;

/// Number of fractional digits every amount is stored with.
pub const MONEY_SCALE: u32 = 4;

const ROUNDING: RoundingStrategy = RoundingStrategy::MidpointNearestEven;

/// A decimal quantity normalized to scale 4, half-even.
///
/// Equality and ordering are by numeric value. Serializes as a decimal string
/// and normalizes whatever it deserializes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl ValueObject for Money {}

/// Round `amount` to scale 4 using half-even rounding.
///
/// The result reports scale 4 (`100` becomes `100.0000`), and a rounded
/// negative zero is returned as plain zero. Amounts too large to carry four
/// fractional digits in a 96-bit mantissa (above roughly 7.9e24) keep a lower
/// scale; [`checked_normalize`] rejects those instead.
pub fn normalize(amount: Decimal) -> Money {
    let mut value = amount.round_dp_with_strategy(MONEY_SCALE, ROUNDING);
    value.rescale(MONEY_SCALE);
    if value.is_zero() {
        value.set_sign_positive(true);
    }
    Money(value)
}

/// [`normalize`], or `None` when the result cannot be represented at scale 4.
pub fn checked_normalize(amount: Decimal) -> Option<Money> {
    let money = normalize(amount);
    (money.0.scale() == MONEY_SCALE).then_some(money)
}

/// `amount >= 0`.
pub fn is_non_negative(amount: Decimal) -> bool {
    amount >= Decimal::ZERO
}

impl Money {
    /// Canonical scale-4 zero used for every sufficiency check.
    pub fn zero() -> Self {
        normalize(Decimal::ZERO)
    }

    pub fn normalize(amount: Decimal) -> Self {
        normalize(amount)
    }

    pub fn amount(self) -> Decimal {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self < Self::zero()
    }

    pub fn is_positive(self) -> bool {
        self > Self::zero()
    }

    pub fn is_non_negative(self) -> bool {
        is_non_negative(self.0)
    }

    /// `self + other`, normalized. `None` when the sum overflows or no longer
    /// fits at scale 4.
    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).and_then(checked_normalize)
    }

    /// `self - other`, normalized. `None` when the difference overflows or no
    /// longer fits at scale 4.
    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).and_then(checked_normalize)
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Self::Output {
        normalize(-self.0)
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        normalize(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl FromStr for Money {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim())
            .map_err(|e| DomainError::validation(format!("invalid amount '{s}': {e}")))?;
        Ok(normalize(value))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
