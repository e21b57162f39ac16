//! 256-bit fixed-point reward index.
//!
//! Indices are scaled by [`crate::SCALE`] and persisted as decimal strings,
//! since neither JSON consumers nor SQLite handle 256-bit integers natively.

use std::fmt;
use std::str::FromStr;

use ethnum::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Amount, TypesError};

/// A monotonic reward-per-share accumulator.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Index(U256);

impl Index {
    pub const fn from_u128(value: u128) -> Self {
        Self(U256::new(value))
    }

    pub const fn from_u256(value: U256) -> Self {
        Self(value)
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    /// Advance the index by `delta`, `None` on overflow.
    pub fn checked_add(self, delta: U256) -> Option<Self> {
        self.0.checked_add(delta).map(Self)
    }

    /// Growth of `self` over an earlier observation, `None` if `earlier` is ahead.
    pub fn growth_since(self, earlier: Index) -> Option<U256> {
        self.0.checked_sub(earlier.0)
    }
}

/// Narrow a 256-bit intermediate back to an amount, `None` if it does not fit.
pub fn to_amount(value: U256) -> Option<Amount> {
    let (hi, lo) = value.into_words();
    (hi == 0).then_some(lo)
}

/// `a * b / c` in 256-bit arithmetic. `None` on overflow or `c == 0`.
pub fn mul_div(a: U256, b: U256, c: U256) -> Option<U256> {
    a.checked_mul(b)?.checked_div(c)
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Index({})", self.0)
    }
}

impl FromStr for Index {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        U256::from_str_radix(s, 10)
            .map(Self)
            .map_err(|e| TypesError::Decimal(format!("{s}: {e}")))
    }
}

impl Serialize for Index {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Index {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{INITIAL_INDEX, SCALE};

    #[test]
    fn test_decimal_serialization() {
        let json = serde_json::to_string(&INITIAL_INDEX).expect("serialize");
        assert_eq!(json, format!("\"{SCALE}\""));
        let back: Index = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, INITIAL_INDEX);
    }

    #[test]
    fn test_large_values_survive() {
        let big = U256::from_words(7, 42);
        let index = Index::from_u256(big);
        let back: Index = index.to_string().parse().expect("parse");
        assert_eq!(back.as_u256(), big);
    }

    #[test]
    fn test_growth_since() {
        let a = INITIAL_INDEX;
        let b = a.checked_add(U256::new(5)).expect("add");
        assert_eq!(b.growth_since(a), Some(U256::new(5)));
        assert_eq!(a.growth_since(b), None);
    }

    #[test]
    fn test_to_amount_bounds() {
        assert_eq!(to_amount(U256::new(u128::MAX)), Some(u128::MAX));
        assert_eq!(to_amount(U256::from_words(1, 0)), None);
    }

    #[test]
    fn test_mul_div() {
        let r = mul_div(U256::new(10), U256::new(SCALE), U256::new(4)).expect("mul_div");
        assert_eq!(r, U256::new(SCALE * 10 / 4));
        assert_eq!(mul_div(U256::ONE, U256::ONE, U256::ZERO), None);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("12x".parse::<Index>().is_err());
    }
}
