//! Fixed-point decimal arithmetic
//!
//! This module handles:
//! - 18 digit fixed-point decimals backed by arbitrary precision integers
//! - Round-half-up at the 18th digit for multiplication and division
//! - Rounding to whole token amounts
//! - String encoding for storage and parameters
//!
//! Reward accounting runs across thousands of checkpoints, so no floating
//! point value ever enters the math.

use crate::error::{RegistryError, Result};
use num_bigint::{BigInt, Sign};
use num_traits::{Signed, ToPrimitive, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// Number of fractional digits
pub const PRECISION: u32 = 18;

fn scale() -> BigInt {
    BigInt::from(10u64).pow(PRECISION)
}

/// Divide and round half away from zero
fn div_round(numerator: &BigInt, denominator: &BigInt) -> BigInt {
    let negative = numerator.is_negative() != denominator.is_negative();
    let n = numerator.abs();
    let d = denominator.abs();

    let mut quotient = &n / &d;
    let remainder = &n % &d;
    if remainder * 2u32 >= d {
        quotient += 1u32;
    }

    if negative {
        -quotient
    } else {
        quotient
    }
}

/// Signed fixed-point decimal with 18 fractional digits
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Dec {
    /// Value multiplied by 10^18
    scaled: BigInt,
}

impl Dec {
    /// Zero
    pub fn zero() -> Self {
        Self {
            scaled: BigInt::zero(),
        }
    }

    /// One
    pub fn one() -> Self {
        Self { scaled: scale() }
    }

    /// Whole number
    pub fn from_u64(value: u64) -> Self {
        Self {
            scaled: BigInt::from(value) * scale(),
        }
    }

    /// Ratio `numerator / denominator`, zero when the denominator is zero
    pub fn from_ratio(numerator: u64, denominator: u64) -> Self {
        if denominator == 0 {
            return Self::zero();
        }
        Self::from_u64(numerator).quo(&Self::from_u64(denominator))
    }

    /// True for exactly zero
    pub fn is_zero(&self) -> bool {
        self.scaled.is_zero()
    }

    /// True for values below zero
    pub fn is_negative(&self) -> bool {
        self.scaled.is_negative()
    }

    /// Product rounded half up at the last digit
    pub fn mul(&self, other: &Dec) -> Dec {
        Dec {
            scaled: div_round(&(&self.scaled * &other.scaled), &scale()),
        }
    }

    /// Product with a whole number
    pub fn mul_u64(&self, value: u64) -> Dec {
        Dec {
            scaled: &self.scaled * BigInt::from(value),
        }
    }

    /// Quotient rounded half up at the last digit, zero for a zero divisor
    pub fn quo(&self, other: &Dec) -> Dec {
        if other.is_zero() {
            return Dec::zero();
        }
        Dec {
            scaled: div_round(&(&self.scaled * scale()), &other.scaled),
        }
    }

    /// Quotient by a whole number, zero for a zero divisor
    pub fn quo_u64(&self, value: u64) -> Dec {
        if value == 0 {
            return Dec::zero();
        }
        Dec {
            scaled: div_round(&self.scaled, &BigInt::from(value)),
        }
    }

    /// Nearest integer, halves rounded away from zero
    pub fn round_int(&self) -> BigInt {
        div_round(&self.scaled, &scale())
    }

    /// Nearest token amount. Negative values give zero and values past
    /// `u64::MAX` saturate.
    pub fn round_u64(&self) -> u64 {
        let rounded = self.round_int();
        if rounded.is_negative() {
            return 0;
        }
        rounded.to_u64().unwrap_or(u64::MAX)
    }

    /// Integer part, fraction dropped
    pub fn truncate_u64(&self) -> u64 {
        let truncated = &self.scaled / scale();
        if truncated.is_negative() {
            return 0;
        }
        truncated.to_u64().unwrap_or(u64::MAX)
    }

    /// Whether the value lies in `[0, 1]`
    pub fn is_unit_interval(&self) -> bool {
        !self.is_negative() && self.scaled <= scale()
    }
}

impl FromStr for Dec {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || RegistryError::InvalidArgs(format!("invalid decimal '{}'", s));

        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };

        if int_part.is_empty()
            || !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
            || frac_part.len() > PRECISION as usize
            || (digits.contains('.') && frac_part.is_empty())
        {
            return Err(invalid());
        }

        let mut combined = String::with_capacity(int_part.len() + PRECISION as usize);
        combined.push_str(int_part);
        combined.push_str(frac_part);
        for _ in frac_part.len()..PRECISION as usize {
            combined.push('0');
        }

        let mut scaled = BigInt::parse_bytes(combined.as_bytes(), 10).ok_or_else(invalid)?;
        if negative {
            scaled = -scaled;
        }

        Ok(Self { scaled })
    }
}

impl fmt::Display for Dec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let abs = self.scaled.abs();
        let divisor = scale();
        let int_part = &abs / &divisor;
        let frac_part = &abs % &divisor;

        if self.scaled.sign() == Sign::Minus {
            write!(f, "-")?;
        }
        write!(
            f,
            "{}.{:0>width$}",
            int_part,
            frac_part.to_string(),
            width = PRECISION as usize
        )
    }
}

impl Add for &Dec {
    type Output = Dec;

    fn add(self, rhs: &Dec) -> Dec {
        Dec {
            scaled: &self.scaled + &rhs.scaled,
        }
    }
}

impl Add for Dec {
    type Output = Dec;

    fn add(self, rhs: Dec) -> Dec {
        &self + &rhs
    }
}

impl Sub for &Dec {
    type Output = Dec;

    fn sub(self, rhs: &Dec) -> Dec {
        Dec {
            scaled: &self.scaled - &rhs.scaled,
        }
    }
}

impl Sub for Dec {
    type Output = Dec;

    fn sub(self, rhs: Dec) -> Dec {
        &self - &rhs
    }
}

impl Serialize for Dec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Dec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
