//! Arbitrary-precision signed integers in the AVM wire format.
//!
//! Stack numbers serialize as a little-endian magnitude with the sign carried
//! in bit 7 of the most significant (last) byte; zero is the empty string.
//! The backing `num-bigint` representation never leaks through this module.

use core::cmp::Ordering;
use core::fmt;

use num_bigint::{BigInt as Inner, Sign};
use num_traits::{Signed, ToPrimitive, Zero};

/// Raised when a big-integer operation cannot produce a result.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BigIntError {
    DivisionByZero,
}

impl fmt::Display for BigIntError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BigIntError::DivisionByZero => f.write_str("big integer division by zero"),
        }
    }
}

impl std::error::Error for BigIntError {}

/// Signed arbitrary-precision integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigInt(Inner);

impl BigInt {
    pub fn zero() -> Self {
        Self(Inner::zero())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    pub fn add(&self, other: &Self) -> Self {
        Self(&self.0 + &other.0)
    }

    pub fn sub(&self, other: &Self) -> Self {
        Self(&self.0 - &other.0)
    }

    pub fn mul(&self, other: &Self) -> Self {
        Self(&self.0 * &other.0)
    }

    /// Truncating division. The quotient rounds toward zero and the remainder
    /// of [`BigInt::rem`] carries the sign of the dividend.
    pub fn div(&self, other: &Self) -> Result<Self, BigIntError> {
        if other.0.is_zero() {
            return Err(BigIntError::DivisionByZero);
        }
        Ok(Self(&self.0 / &other.0))
    }

    pub fn rem(&self, other: &Self) -> Result<Self, BigIntError> {
        if other.0.is_zero() {
            return Err(BigIntError::DivisionByZero);
        }
        Ok(Self(&self.0 % &other.0))
    }

    pub fn neg(&self) -> Self {
        Self(-&self.0)
    }

    /// Bitwise AND over the little-endian magnitude bytes. The result keeps
    /// the shorter operand's length and is negative only when both operands
    /// are negative.
    pub fn bitand(&self, other: &Self) -> Self {
        if other.0.is_zero() || self.0.is_zero() {
            return Self::zero();
        }
        let negative = self.is_negative() && other.is_negative();
        let (_, a) = self.0.to_bytes_le();
        let (_, b) = other.0.to_bytes_le();
        let len = a.len().min(b.len());
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            out.push(a[i] & b[i]);
        }
        Self::from_magnitude(out, negative)
    }

    /// Bitwise OR over the little-endian magnitude bytes. The result keeps
    /// the longer operand's length; the sign flips when exactly one operand
    /// is negative.
    pub fn bitor(&self, other: &Self) -> Self {
        if other.0.is_zero() {
            return self.clone();
        }
        if self.0.is_zero() {
            return other.clone();
        }
        let negative = self.is_negative() != other.is_negative();
        let (_, a) = self.0.to_bytes_le();
        let (_, b) = other.0.to_bytes_le();
        let (mut longer, shorter) = if a.len() >= b.len() { (a, b) } else { (b, a) };
        for (i, byte) in shorter.iter().enumerate() {
            longer[i] |= byte;
        }
        Self::from_magnitude(longer, negative)
    }

    /// Logical left shift; shifting by zero or a negative count is a no-op.
    pub fn shifted_left(&self, n: i64) -> Self {
        if n <= 0 {
            return self.clone();
        }
        Self(&self.0 << n as usize)
    }

    /// Logical right shift; shifting by zero or a negative count is a no-op.
    pub fn shifted_right(&self, n: i64) -> Self {
        if n <= 0 {
            return self.clone();
        }
        Self(&self.0 >> n as usize)
    }

    pub fn to_i64(&self) -> Option<i64> {
        self.0.to_i64()
    }

    /// Canonical wire form: empty for zero, otherwise the little-endian
    /// magnitude with the sign in bit 7 of the last byte.
    pub fn serialize(&self) -> Vec<u8> {
        if self.0.is_zero() {
            return Vec::new();
        }
        let (sign, mut bytes) = self.0.to_bytes_le();
        if bytes.last().map_or(false, |b| b & 0x80 != 0) {
            bytes.push(0x00);
        }
        if sign == Sign::Minus {
            if let Some(last) = bytes.last_mut() {
                *last |= 0x80;
            }
        }
        bytes
    }

    /// Inverse of [`BigInt::serialize`]. Accepts any encoding; minimality is
    /// enforced by the numeric context above this layer.
    pub fn deserialize(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self::zero();
        }
        let mut magnitude = bytes.to_vec();
        let negative = magnitude
            .last()
            .map_or(false, |b| b & 0x80 != 0);
        if let Some(last) = magnitude.last_mut() {
            *last &= 0x7f;
        }
        Self::from_magnitude(magnitude, negative)
    }

    fn from_magnitude(magnitude: Vec<u8>, negative: bool) -> Self {
        let value = Inner::from_bytes_le(Sign::Plus, &magnitude);
        if value.is_zero() {
            return Self::zero();
        }
        Self(if negative { -value } else { value })
    }
}

impl From<i64> for BigInt {
    fn from(n: i64) -> Self {
        Self(Inner::from(n))
    }
}

impl From<u64> for BigInt {
    fn from(n: u64) -> Self {
        Self(Inner::from(n))
    }
}

impl From<usize> for BigInt {
    fn from(n: usize) -> Self {
        Self(Inner::from(n))
    }
}

impl PartialOrd for BigInt {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BigInt {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for BigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
