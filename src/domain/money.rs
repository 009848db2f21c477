use crate::error::{EscrowError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Symbol used when rendering amounts for display.
pub const CURRENCY_SYMBOL: &str = "₹";

/// Basis points in one whole (100%).
pub const BPS_DENOMINATOR: u128 = 10_000;

/// A monetary value in the smallest currency unit (paise).
///
/// All stored amounts use this type. Conversion to the major unit happens only
/// when rendering for display and never feeds back into stored values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Paise(pub u64);

impl Paise {
    pub const ZERO: Self = Self(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Floor of `self * bps / 10_000`.
    pub fn apply_bps(self, bps: u32) -> Self {
        let scaled = (self.0 as u128 * bps as u128) / BPS_DENOMINATOR;
        Self(scaled as u64)
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// The amount in the major currency unit, exact to two decimal places.
    pub fn to_major(self) -> Decimal {
        Decimal::from_i128_with_scale(self.0 as i128, 2)
    }

    /// Human-readable rendering such as `₹558.25`.
    pub fn display(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Paise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:.2}", CURRENCY_SYMBOL, self.to_major())
    }
}

/// Saturates at `u64::MAX`. Use [`Paise::checked_add`] where overflow must
/// be reported.
impl Add for Paise {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl AddAssign for Paise {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.saturating_add(rhs);
    }
}

impl Sum for Paise {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, p| acc + p)
    }
}

impl From<u64> for Paise {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A strictly positive amount requested for disbursement.
///
/// Callers hand in signed integers; anything at or below zero is rejected
/// before it can reach a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount(Paise);

impl Amount {
    pub fn new(value: i64) -> Result<Self> {
        if value > 0 {
            Ok(Self(Paise(value as u64)))
        } else {
            Err(EscrowError::InvalidOperation(format!(
                "Payout amount must be greater than 0 paise, got {value}"
            )))
        }
    }

    pub fn value(&self) -> Paise {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = EscrowError;

    fn try_from(value: i64) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<Paise> for Amount {
    type Error = EscrowError;

    fn try_from(value: Paise) -> Result<Self> {
        if value.is_zero() {
            return Err(EscrowError::InvalidOperation(
                "Payout amount must be greater than 0 paise".to_string(),
            ));
        }
        Ok(Self(value))
    }
}

impl From<Amount> for Paise {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// An integer amount paired with its display rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoneyView {
    pub paise: u64,
    pub display: String,
}

impl From<Paise> for MoneyView {
    fn from(value: Paise) -> Self {
        Self {
            paise: value.0,
            display: value.display(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_paise_arithmetic() {
        let a = Paise::new(1000);
        let b = Paise::new(250);
        assert_eq!(a + b, Paise::new(1250));
        assert_eq!(b.saturating_sub(a), Paise::ZERO);
        assert_eq!(vec![a, b, b].into_iter().sum::<Paise>(), Paise::new(1500));
    }

    #[test]
    fn test_sums_saturate_instead_of_wrapping() {
        let max = Paise::new(u64::MAX);
        assert_eq!(max + Paise::new(1), max);
        assert_eq!(max.checked_add(Paise::new(1)), None);

        let mut total = Paise::new(u64::MAX - 5);
        total += Paise::new(10);
        assert_eq!(total, max);
        assert_eq!([max, max, Paise::new(7)].into_iter().sum::<Paise>(), max);
    }

    #[test]
    fn test_apply_bps_floors() {
        assert_eq!(Paise::new(50000).apply_bps(1000), Paise::new(5000));
        assert_eq!(Paise::new(55000).apply_bps(150), Paise::new(825));
        assert_eq!(Paise::new(99).apply_bps(150), Paise::ZERO);
        assert_eq!(Paise::new(u64::MAX).apply_bps(10_000), Paise::new(u64::MAX));
    }

    #[test]
    fn test_display_is_major_unit() {
        assert_eq!(Paise::new(55825).to_major(), dec!(558.25));
        assert_eq!(Paise::new(55825).display(), "₹558.25");
        assert_eq!(Paise::new(1000).display(), "₹10.00");
        assert_eq!(Paise::new(5).display(), "₹0.05");
    }

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(1).is_ok());
        assert!(matches!(
            Amount::new(0),
            Err(EscrowError::InvalidOperation(_))
        ));
        assert!(matches!(
            Amount::new(-100),
            Err(EscrowError::InvalidOperation(_))
        ));
        assert!(Amount::try_from(Paise::ZERO).is_err());
        assert_eq!(Paise::from(Amount::new(42).unwrap()), Paise::new(42));
    }
}
