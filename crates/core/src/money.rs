use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub};
use std::str::FromStr;

/// A dollar amount held at two decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Money(Decimal);

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Money(Decimal::new(cents, 2))
    }

    /// Saturates at `i64::MIN`/`i64::MAX`.
    pub fn to_cents(self) -> i64 {
        let bound = if self.0.is_sign_negative() { i64::MIN } else { i64::MAX };
        self.0
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|c| c.round().to_i64())
            .unwrap_or(bound)
    }

    pub fn from_decimal(decimal: Decimal) -> Self {
        Money(decimal.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }

    pub fn as_decimal(self) -> Decimal {
        self.0
    }

    pub fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn abs(self) -> Self {
        Money(self.0.abs())
    }

    /// Half of the amount, rounded to the cent.
    pub fn half(self) -> Self {
        Money::from_decimal(self.0 / Decimal::TWO)
    }

    /// Divides by a quantity. `None` for a zero divisor or an overflowing result.
    pub fn checked_div(self, divisor: Decimal) -> Option<Money> {
        self.0.checked_div(divisor).map(Money::from_decimal)
    }

    /// Whether `self` and `other` differ by no more than `tolerance`.
    pub fn approx_eq(self, other: Money, tolerance: Money) -> bool {
        (self - other).abs() <= tolerance
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    /// Accepts `12.34`, `$12.34` and `1,234.56`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let clean: String = s
            .trim()
            .chars()
            .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
            .collect();
        Decimal::from_str(&clean).map(Money::from_decimal)
    }
}

impl From<Decimal> for Money {
    fn from(d: Decimal) -> Self {
        Money::from_decimal(d)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_sign_negative() && !self.0.is_zero() {
            write!(f, "-${:.2}", self.0.abs())
        } else {
            write!(f, "${:.2}", self.0)
        }
    }
}

/// Clamps an overflowed result to the largest amount with the given sign.
fn saturated(negative: bool) -> Decimal {
    if negative {
        Decimal::MIN
    } else {
        Decimal::MAX
    }
}

// OCR amounts are unbounded, so arithmetic saturates.
impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Money(
            self.0
                .checked_add(rhs.0)
                .unwrap_or_else(|| saturated(rhs.0.is_sign_negative())),
        )
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Money(
            self.0
                .checked_sub(rhs.0)
                .unwrap_or_else(|| saturated(!rhs.0.is_sign_negative())),
        )
    }
}

impl Neg for Money {
    type Output = Self;
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Mul<Decimal> for Money {
    type Output = Self;
    fn mul(self, rhs: Decimal) -> Self {
        match self.0.checked_mul(rhs) {
            Some(product) => Money::from_decimal(product),
            None => Money(saturated(self.0.is_sign_negative() != rhs.is_sign_negative())),
        }
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |a, b| a + b)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cents_roundtrip() {
        assert_eq!(Money::from_cents(1234).to_cents(), 1234);
        assert_eq!(Money::from_cents(-5).to_cents(), -5);
    }

    #[test]
    fn parse_with_symbols_and_separators() {
        assert_eq!("$1,234.56".parse::<Money>().unwrap(), Money::from_cents(123456));
        assert_eq!(" 4.5 ".parse::<Money>().unwrap(), Money::from_cents(450));
        assert!("abc".parse::<Money>().is_err());
    }

    #[test]
    fn half_rounds_to_cent() {
        assert_eq!(Money::from_cents(1001).half(), Money::from_cents(501));
        assert_eq!(Money::from_cents(1000).half(), Money::from_cents(500));
    }

    #[test]
    fn approx_eq_respects_tolerance() {
        let a = Money::from_cents(1000);
        assert!(a.approx_eq(Money::from_cents(1001), Money::from_cents(1)));
        assert!(!a.approx_eq(Money::from_cents(1002), Money::from_cents(1)));
    }

    #[test]
    fn sum_and_display() {
        let total: Money = [Money::from_cents(150), Money::from_cents(250)].iter().sum();
        assert_eq!(total.to_string(), "$4.00");
        assert_eq!((-Money::from_cents(250)).to_string(), "-$2.50");
    }

    #[test]
    fn arithmetic_saturates_instead_of_overflowing() {
        let big = Money::from_decimal(Decimal::MAX);
        assert_eq!(big + big, big);
        assert_eq!(-big - big, -big);
        let total: Money = [big, big, Money::from_cents(1)].iter().sum();
        assert_eq!(total, big);
        assert_eq!(big * Decimal::from(10), big);
        assert_eq!(big * Decimal::from(-10), -big);
        assert_eq!(big.to_cents(), i64::MAX);
        assert_eq!((-big).to_cents(), i64::MIN);
    }

    #[test]
    fn checked_div_by_quantity() {
        assert_eq!(Money::from_cents(798).checked_div(Decimal::from(2)), Some(Money::from_cents(399)));
        assert_eq!(Money::from_cents(798).checked_div(Decimal::ZERO), None);
    }

    #[test]
    fn multiply_by_quantity() {
        let unit = Money::from_cents(399);
        assert_eq!(unit * Decimal::from(2), Money::from_cents(798));
        assert_eq!(unit * Decimal::new(5, 1), Money::from_cents(200));
    }
}
