//! Fixed-point coin amounts.
//!
//! A coin is a whole part plus a fractional part counted in units of
//! 10^-8. The fractional part is always kept below [`FRACTIONS_IN_WHOLE`];
//! every arithmetic operation normalizes carries and borrows and reports
//! underflow, overflow and division by zero as errors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of fractional digits
pub const DECIMALS: u32 = 8;

/// Fractional units in one whole coin
pub const FRACTIONS_IN_WHOLE: u64 = 100_000_000;

/// A non-negative fixed-point amount.
///
/// Field order matters: the derived ordering compares `whole` first, which
/// is numeric ordering because `fraction < FRACTIONS_IN_WHOLE`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Coin {
    whole: u64,
    fraction: u64,
}

impl Coin {
    /// Zero amount
    pub const ZERO: Self = Self {
        whole: 0,
        fraction: 0,
    };

    /// Create a coin from its parts
    ///
    /// # Errors
    /// Returns error if `fraction` is not below one whole coin
    pub const fn new(whole: u64, fraction: u64) -> Result<Self, CoinError> {
        if fraction >= FRACTIONS_IN_WHOLE {
            return Err(CoinError::InvalidFraction(fraction));
        }
        Ok(Self { whole, fraction })
    }

    /// Create a coin holding whole units only
    #[must_use]
    pub const fn from_whole(whole: u64) -> Self {
        Self { whole, fraction: 0 }
    }

    /// Create a coin from a total count of fractional units
    ///
    /// # Errors
    /// Returns error if the whole part does not fit in a `u64`
    pub fn from_fractions(total: u128) -> Result<Self, CoinError> {
        let divisor = u128::from(FRACTIONS_IN_WHOLE);
        let whole = u64::try_from(total / divisor).map_err(|_| CoinError::Overflow)?;
        // remainder is below 10^8 so the cast is lossless
        #[allow(clippy::cast_possible_truncation)]
        let fraction = (total % divisor) as u64;
        Ok(Self { whole, fraction })
    }

    /// Whole part
    #[must_use]
    pub const fn whole(&self) -> u64 {
        self.whole
    }

    /// Fractional part
    #[must_use]
    pub const fn fraction(&self) -> u64 {
        self.fraction
    }

    /// Total amount in fractional units
    #[must_use]
    pub fn to_fractions(&self) -> u128 {
        u128::from(self.whole) * u128::from(FRACTIONS_IN_WHOLE) + u128::from(self.fraction)
    }

    /// Check if amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.whole == 0 && self.fraction == 0
    }

    /// Checked addition
    ///
    /// # Errors
    /// Returns error if the whole part overflows
    pub fn checked_add(self, other: Self) -> Result<Self, CoinError> {
        let mut fraction = self.fraction + other.fraction;
        let mut carry = 0;
        if fraction >= FRACTIONS_IN_WHOLE {
            fraction -= FRACTIONS_IN_WHOLE;
            carry = 1;
        }
        let whole = self
            .whole
            .checked_add(other.whole)
            .and_then(|w| w.checked_add(carry))
            .ok_or(CoinError::Overflow)?;
        Ok(Self { whole, fraction })
    }

    /// Checked subtraction
    ///
    /// # Errors
    /// Returns error if the result would be negative
    pub fn checked_sub(self, other: Self) -> Result<Self, CoinError> {
        if self < other {
            return Err(CoinError::Underflow {
                minuend: self,
                subtrahend: other,
            });
        }
        let (fraction, borrow) = if self.fraction >= other.fraction {
            (self.fraction - other.fraction, 0)
        } else {
            (self.fraction + FRACTIONS_IN_WHOLE - other.fraction, 1)
        };
        Ok(Self {
            whole: self.whole - other.whole - borrow,
            fraction,
        })
    }

    /// Checked multiplication by an integer factor
    ///
    /// # Errors
    /// Returns error on overflow
    pub fn checked_mul(self, factor: u64) -> Result<Self, CoinError> {
        let total = self
            .to_fractions()
            .checked_mul(u128::from(factor))
            .ok_or(CoinError::Overflow)?;
        Self::from_fractions(total)
    }

    /// Checked division by an integer divisor, truncating toward zero
    ///
    /// # Errors
    /// Returns error if `divisor` is zero
    pub fn checked_div(self, divisor: u64) -> Result<Self, CoinError> {
        if divisor == 0 {
            return Err(CoinError::DivisionByZero);
        }
        Self::from_fractions(self.to_fractions() / u128::from(divisor))
    }

    /// Remainder of division by an integer divisor, in fractional units
    ///
    /// # Errors
    /// Returns error if `divisor` is zero
    pub fn checked_rem(self, divisor: u64) -> Result<Self, CoinError> {
        if divisor == 0 {
            return Err(CoinError::DivisionByZero);
        }
        Self::from_fractions(self.to_fractions() % u128::from(divisor))
    }

    /// `self * numerator / denominator`, truncating, computed without
    /// intermediate rounding
    ///
    /// # Errors
    /// Returns error if `denominator` is zero or the result overflows
    pub fn mul_div(self, numerator: u128, denominator: u128) -> Result<Self, CoinError> {
        if denominator == 0 {
            return Err(CoinError::DivisionByZero);
        }
        let scaled = self
            .to_fractions()
            .checked_mul(numerator)
            .ok_or(CoinError::Overflow)?;
        Self::from_fractions(scaled / denominator)
    }

    /// Percentage of the amount (e.g. 25 = 25%), truncating
    ///
    /// # Errors
    /// Returns error on overflow
    pub fn percentage(self, percent: u8) -> Result<Self, CoinError> {
        self.mul_div(u128::from(percent), 100)
    }

    /// Parse a decimal string such as `"12.5"`
    ///
    /// # Errors
    /// Returns error if the format is invalid or has more than eight decimals
    pub fn from_decimal_str(s: &str) -> Result<Self, CoinError> {
        let mut parts = s.split('.');
        let whole_part = parts.next().unwrap_or_default();
        let fraction_part = parts.next();
        if parts.next().is_some() || whole_part.is_empty() {
            return Err(CoinError::InvalidFormat(s.to_string()));
        }

        let whole: u64 = whole_part
            .parse()
            .map_err(|_| CoinError::InvalidFormat(s.to_string()))?;

        let fraction = match fraction_part {
            None => 0,
            Some(digits) => {
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(CoinError::InvalidFormat(s.to_string()));
                }
                if digits.len() > DECIMALS as usize {
                    return Err(CoinError::TooManyDecimals);
                }
                let padded = format!("{digits:0<width$}", width = DECIMALS as usize);
                padded
                    .parse::<u64>()
                    .map_err(|_| CoinError::InvalidFormat(s.to_string()))?
            }
        };

        Ok(Self { whole, fraction })
    }

    /// Convert to a decimal string representation
    #[must_use]
    pub fn to_decimal_string(&self) -> String {
        if self.fraction == 0 {
            format!("{}.0", self.whole)
        } else {
            let digits = format!("{:08}", self.fraction);
            format!("{}.{}", self.whole, digits.trim_end_matches('0'))
        }
    }
}

impl fmt::Debug for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Coin({})", self.to_decimal_string())
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal_string())
    }
}

/// Coin arithmetic and parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoinError {
    /// Fractional part out of range
    #[error("fraction {0} is not below one whole coin")]
    InvalidFraction(u64),
    /// Invalid number format
    #[error("invalid amount format: {0}")]
    InvalidFormat(String),
    /// Too many decimal places
    #[error("too many decimal places (max {DECIMALS})")]
    TooManyDecimals,
    /// Arithmetic overflow
    #[error("amount overflow")]
    Overflow,
    /// Result would be negative
    #[error("amount underflow: {minuend} - {subtrahend}")]
    Underflow {
        /// Left operand
        minuend: Coin,
        /// Right operand
        subtrahend: Coin,
    },
    /// Division by zero
    #[error("division by zero")]
    DivisionByZero,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn coin(whole: u64, fraction: u64) -> Coin {
        Coin::new(whole, fraction).unwrap()
    }

    #[test]
    fn test_new_rejects_large_fraction() {
        assert!(Coin::new(1, FRACTIONS_IN_WHOLE).is_err());
        assert!(Coin::new(1, FRACTIONS_IN_WHOLE - 1).is_ok());
    }

    #[test]
    fn test_add_carries() {
        let sum = coin(1, 60_000_000).checked_add(coin(2, 50_000_000)).unwrap();
        assert_eq!(sum, coin(4, 10_000_000));
    }

    #[test]
    fn test_sub_borrows() {
        let diff = coin(4, 10_000_000).checked_sub(coin(1, 60_000_000)).unwrap();
        assert_eq!(diff, coin(2, 50_000_000));
    }

    #[test]
    fn test_sub_underflow_is_error() {
        let result = coin(1, 0).checked_sub(coin(1, 1));
        assert!(matches!(result, Err(CoinError::Underflow { .. })));
    }

    #[test]
    fn test_add_overflow_is_error() {
        let max = coin(u64::MAX, 99_999_999);
        assert_eq!(max.checked_add(coin(0, 1)), Err(CoinError::Overflow));
    }

    #[test]
    fn test_div_by_zero_is_error() {
        assert_eq!(coin(5, 0).checked_div(0), Err(CoinError::DivisionByZero));
        assert_eq!(coin(5, 0).checked_rem(0), Err(CoinError::DivisionByZero));
        assert_eq!(coin(5, 0).mul_div(1, 0), Err(CoinError::DivisionByZero));
    }

    #[test]
    fn test_div_truncates_to_fraction_units() {
        assert_eq!(coin(1, 0).checked_div(3).unwrap(), coin(0, 33_333_333));
        assert_eq!(coin(1, 0).checked_rem(3).unwrap(), coin(0, 1));
    }

    #[test]
    fn test_percentage() {
        assert_eq!(coin(1000, 0).percentage(25).unwrap(), coin(250, 0));
        assert_eq!(coin(0, 3).percentage(50).unwrap(), coin(0, 1));
    }

    #[test]
    fn test_decimal_string_roundtrip() {
        assert_eq!(Coin::from_decimal_str("12.5").unwrap(), coin(12, 50_000_000));
        assert_eq!(Coin::from_decimal_str("0.00000001").unwrap(), coin(0, 1));
        assert_eq!(coin(12, 50_000_000).to_decimal_string(), "12.5");
        assert_eq!(coin(3, 0).to_decimal_string(), "3.0");
        assert!(Coin::from_decimal_str("1.000000001").is_err());
        assert!(Coin::from_decimal_str("1.2.3").is_err());
        assert!(Coin::from_decimal_str(".5").is_err());
    }

    fn any_coin() -> impl Strategy<Value = Coin> {
        (0u64..=u64::MAX / 4, 0u64..FRACTIONS_IN_WHOLE).prop_map(|(w, f)| coin(w, f))
    }

    proptest! {
        #[test]
        fn prop_add_then_sub_restores(a in any_coin(), b in any_coin()) {
            let sum = a.checked_add(b).unwrap();
            prop_assert_eq!(sum.checked_sub(b).unwrap(), a);
        }

        #[test]
        fn prop_mul_div_keep_fraction_invariant(a in any_coin(), k in 1u64..1000) {
            let product = a.checked_div(k).unwrap().checked_mul(k).unwrap();
            prop_assert!(product.fraction() < FRACTIONS_IN_WHOLE);
            prop_assert!(product <= a);
            let rem = a.checked_rem(k).unwrap();
            prop_assert_eq!(product.checked_add(rem).unwrap(), a);
        }
    }
}
