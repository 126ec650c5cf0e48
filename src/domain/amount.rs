//! Arbitrary-precision signed integer amount backed by num-bigint.
//!
//! Token amounts, liquidity, cost basis and PnL all live in raw on-chain units,
//! which routinely exceed 128 bits once multiplied by a Q96 price. Every ledger
//! computation goes through this type so nothing ever touches a float.

use num_bigint::{BigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Signed, Zero};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};
use std::str::FromStr;
use thiserror::Error;

/// Error returned when an amount string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid integer amount: {0:?}")]
pub struct AmountParseError(pub String);

/// Exact signed integer amount.
///
/// Serializes to a JSON string so values larger than 2^53 survive any consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(BigInt);

impl Amount {
    /// Wrap a BigInt.
    pub fn new(value: BigInt) -> Self {
        Amount(value)
    }

    /// The additive identity (0).
    pub fn zero() -> Self {
        Amount(BigInt::zero())
    }

    /// 2^bits, used for Q64.96 / Q128 fixed-point scaling.
    pub fn pow2(bits: u32) -> Self {
        Amount(BigInt::one() << bits)
    }

    /// 10^exp, used to scale prices to whole-token units.
    pub fn pow10(exp: u32) -> Self {
        Amount(num_traits::pow(BigInt::from(10u8), exp as usize))
    }

    /// Parse a base-10 integer string (optional leading `-`).
    ///
    /// # Errors
    /// Returns an error for empty strings, fractions, exponents or any non-digit.
    pub fn from_str_canonical(s: &str) -> Result<Self, AmountParseError> {
        let trimmed = s.trim();
        let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountParseError(s.to_string()));
        }
        BigInt::parse_bytes(trimmed.as_bytes(), 10)
            .map(Amount)
            .ok_or_else(|| AmountParseError(s.to_string()))
    }

    /// Parse a `0x`-prefixed hex quantity as returned by JSON-RPC.
    pub fn from_hex(s: &str) -> Result<Self, AmountParseError> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| AmountParseError(s.to_string()))?;
        if digits.is_empty() {
            return Ok(Amount::zero());
        }
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AmountParseError(s.to_string()));
        }
        BigInt::parse_bytes(digits.as_bytes(), 16)
            .map(Amount)
            .ok_or_else(|| AmountParseError(s.to_string()))
    }

    /// Interpret big-endian bytes as an unsigned integer (an ABI `uint` word).
    pub fn from_be_bytes_unsigned(bytes: &[u8]) -> Self {
        Amount(BigInt::from_bytes_be(Sign::Plus, bytes))
    }

    /// Canonical base-10 representation, used for storage and hashing.
    pub fn to_canonical_string(&self) -> String {
        self.0.to_str_radix(10)
    }

    /// Borrow the underlying BigInt.
    pub fn inner(&self) -> &BigInt {
        &self.0
    }

    /// Returns true if the value is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the value is > 0.
    pub fn is_positive(&self) -> bool {
        self.0.is_positive()
    }

    /// Returns true if the value is < 0.
    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    /// The smaller of two amounts.
    pub fn min_of(&self, other: &Amount) -> Amount {
        if self <= other {
            self.clone()
        } else {
            other.clone()
        }
    }

    /// `self - other`, floored at zero.
    pub fn saturating_sub_zero(&self, other: &Amount) -> Amount {
        if self > other {
            self - other
        } else {
            Amount::zero()
        }
    }

    /// Floor division. Returns None when dividing by zero.
    pub fn checked_div_floor(&self, divisor: &Amount) -> Option<Amount> {
        if divisor.is_zero() {
            return None;
        }
        Some(Amount(self.0.div_floor(&divisor.0)))
    }

    /// `floor(self * numerator / denominator)` without intermediate rounding.
    pub fn mul_div_floor(&self, numerator: &Amount, denominator: &Amount) -> Option<Amount> {
        (self * numerator).checked_div_floor(denominator)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<BigInt> for Amount {
    fn from(value: BigInt) -> Self {
        Amount(value)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Amount(BigInt::from(value))
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Amount(BigInt::from(value))
    }
}

impl From<u128> for Amount {
    fn from(value: u128) -> Self {
        Amount(BigInt::from(value))
    }
}

macro_rules! forward_binop {
    ($trait:ident, $method:ident) => {
        impl $trait for Amount {
            type Output = Amount;

            fn $method(self, rhs: Amount) -> Amount {
                Amount((self.0).$method(rhs.0))
            }
        }

        impl<'a> $trait<&'a Amount> for &'a Amount {
            type Output = Amount;

            fn $method(self, rhs: &'a Amount) -> Amount {
                Amount((&self.0).$method(&rhs.0))
            }
        }

        impl<'a> $trait<&'a Amount> for Amount {
            type Output = Amount;

            fn $method(self, rhs: &'a Amount) -> Amount {
                Amount((self.0).$method(&rhs.0))
            }
        }
    };
}

forward_binop!(Add, add);
forward_binop!(Sub, sub);
forward_binop!(Mul, mul);

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount(-self.0)
    }
}

impl<'a> Neg for &'a Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount(-&self.0)
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::zero(), |acc, x| acc + x)
    }
}

impl<'a> std::iter::Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Self {
        iter.fold(Amount::zero(), |acc, x| acc + x)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_canonical_string())
    }
}

struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer or a base-10 integer string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
        Amount::from_str_canonical(v).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
        Ok(Amount::from(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
        Ok(Amount::from(v))
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a(s: &str) -> Amount {
        Amount::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_amount_parse_roundtrip() {
        for s in [
            "0",
            "-1",
            "1000",
            "340282366920938463463374607431768211455",
            "-79228162514264337593543950336",
        ] {
            assert_eq!(a(s).to_canonical_string(), s);
        }
    }

    #[test]
    fn test_amount_rejects_non_integers() {
        for s in ["", "-", "1.5", "1e18", "0x10", "abc", "--1"] {
            assert!(Amount::from_str_canonical(s).is_err(), "accepted {:?}", s);
        }
    }

    #[test]
    fn test_amount_from_hex() {
        assert_eq!(Amount::from_hex("0x0").unwrap(), Amount::zero());
        assert_eq!(Amount::from_hex("0xff").unwrap(), a("255"));
        assert_eq!(Amount::from_hex("0x").unwrap(), Amount::zero());
        assert!(Amount::from_hex("ff").is_err());
    }

    #[test]
    fn test_amount_div_floor_rounds_toward_negative_infinity() {
        assert_eq!(a("7").checked_div_floor(&a("2")), Some(a("3")));
        assert_eq!(a("-7").checked_div_floor(&a("2")), Some(a("-4")));
        assert_eq!(a("7").checked_div_floor(&Amount::zero()), None);
    }

    #[test]
    fn test_amount_mul_div_floor_keeps_full_precision() {
        let q96 = Amount::pow2(96);
        let x = a("123456789");
        assert_eq!(x.mul_div_floor(&q96, &q96), Some(x));
    }

    #[test]
    fn test_amount_min_and_saturating_sub() {
        assert_eq!(a("5").min_of(&a("3")), a("3"));
        assert_eq!(a("3").saturating_sub_zero(&a("5")), Amount::zero());
        assert_eq!(a("5").saturating_sub_zero(&a("3")), a("2"));
    }

    #[test]
    fn test_amount_json_is_string() {
        let json = serde_json::to_value(a("1000000000000000000000")).unwrap();
        assert_eq!(json, serde_json::json!("1000000000000000000000"));
    }

    #[test]
    fn test_amount_json_accepts_numbers_and_strings() {
        let from_num: Amount = serde_json::from_str("42").unwrap();
        let from_str: Amount = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(from_num, from_str);
        assert!(serde_json::from_str::<Amount>("\"4.2\"").is_err());
    }

    #[test]
    fn test_amount_sum() {
        let total: Amount = [a("1"), a("-3"), a("10")].iter().sum();
        assert_eq!(total, a("8"));
    }
}
