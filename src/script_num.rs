//! The numeric stack element.
//!
//! A `ScriptNum` is either a native `i64` or an arbitrary-precision
//! [`BigInt`]. Values decoded from stack bytes always take the wide
//! representation; the narrow one is reserved for numbers the interpreter
//! itself injects (introspection results, counters). Operations between two
//! same-tagged values stay in that representation, mixed operands are
//! upcast.

use core::cmp::Ordering;

use crate::bigint::{BigInt, BigIntError};

/// Byte-size cap for numbers parsed from the stack.
pub const MAXIMUM_NUMBER_SIZE: usize = 100_000;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScriptNumError {
    /// The encoding exceeds the allowed byte size.
    Overflow,
    /// The encoding carries redundant trailing bytes.
    MinimalEncoding,
    /// An arithmetic fault in the wide representation.
    BigInt,
}

impl From<BigIntError> for ScriptNumError {
    fn from(_: BigIntError) -> Self {
        ScriptNumError::BigInt
    }
}

#[derive(Debug, Clone)]
enum Repr {
    Small(i64),
    Big(BigInt),
}

#[derive(Debug, Clone)]
pub struct ScriptNum {
    value: Repr,
}

impl ScriptNum {
    pub fn from_i64(n: i64) -> Self {
        Self {
            value: Repr::Small(n),
        }
    }

    pub fn from_u64(n: u64) -> Self {
        match i64::try_from(n) {
            Ok(v) => Self::from_i64(v),
            Err(_) => Self::from_bigint(BigInt::from(n)),
        }
    }

    pub fn from_bigint(n: BigInt) -> Self {
        Self {
            value: Repr::Big(n),
        }
    }

    /// Decodes a stack element, enforcing the size cap and minimal encoding.
    pub fn from_bytes(bytes: &[u8], max_size: usize) -> Result<Self, ScriptNumError> {
        if bytes.len() > max_size {
            return Err(ScriptNumError::Overflow);
        }
        if !is_minimally_encoded(bytes, max_size) {
            return Err(ScriptNumError::MinimalEncoding);
        }
        Ok(Self::from_bigint(BigInt::deserialize(bytes)))
    }

    /// Canonical minimally-encoded serialization.
    pub fn to_bytes(&self) -> Vec<u8> {
        match &self.value {
            Repr::Small(n) => encode_i64(*n),
            Repr::Big(n) => n.serialize(),
        }
    }

    /// Saturates to the `i32` range, mirroring the reference `getint()`.
    pub fn to_i32_saturating(&self) -> i32 {
        match &self.value {
            Repr::Small(n) => {
                if *n > i32::MAX as i64 {
                    i32::MAX
                } else if *n < i32::MIN as i64 {
                    i32::MIN
                } else {
                    *n as i32
                }
            }
            Repr::Big(n) => match n.to_i64() {
                Some(v) if v > i32::MAX as i64 => i32::MAX,
                Some(v) if v < i32::MIN as i64 => i32::MIN,
                Some(v) => v as i32,
                None => {
                    if n.is_negative() {
                        i32::MIN
                    } else {
                        i32::MAX
                    }
                }
            },
        }
    }

    /// Exact conversion, when the value fits.
    pub fn to_i64(&self) -> Option<i64> {
        match &self.value {
            Repr::Small(n) => Some(*n),
            Repr::Big(n) => n.to_i64(),
        }
    }

    /// Converts to a size, requiring the value to sit in `[0, i32::MAX]`.
    pub fn to_size(&self) -> Option<usize> {
        match &self.value {
            Repr::Small(n) => {
                if *n < 0 || *n > i32::MAX as i64 {
                    None
                } else {
                    Some(*n as usize)
                }
            }
            Repr::Big(n) => match n.to_i64() {
                Some(v) if (0..=i32::MAX as i64).contains(&v) => Some(v as usize),
                _ => None,
            },
        }
    }

    pub fn is_zero(&self) -> bool {
        match &self.value {
            Repr::Small(n) => *n == 0,
            Repr::Big(n) => n.is_zero(),
        }
    }

    pub fn is_negative(&self) -> bool {
        match &self.value {
            Repr::Small(n) => *n < 0,
            Repr::Big(n) => n.is_negative(),
        }
    }

    fn to_bigint(&self) -> BigInt {
        match &self.value {
            Repr::Small(n) => BigInt::from(*n),
            Repr::Big(n) => n.clone(),
        }
    }

    pub fn add(&self, other: &Self) -> Result<Self, ScriptNumError> {
        match (&self.value, &other.value) {
            (Repr::Small(a), Repr::Small(b)) => a
                .checked_add(*b)
                .map(Self::from_i64)
                .ok_or(ScriptNumError::Overflow),
            (Repr::Big(a), Repr::Big(b)) => Ok(Self::from_bigint(a.add(b))),
            _ => Ok(Self::from_bigint(self.to_bigint().add(&other.to_bigint()))),
        }
    }

    pub fn sub(&self, other: &Self) -> Result<Self, ScriptNumError> {
        match (&self.value, &other.value) {
            (Repr::Small(a), Repr::Small(b)) => a
                .checked_sub(*b)
                .map(Self::from_i64)
                .ok_or(ScriptNumError::Overflow),
            (Repr::Big(a), Repr::Big(b)) => Ok(Self::from_bigint(a.sub(b))),
            _ => Ok(Self::from_bigint(self.to_bigint().sub(&other.to_bigint()))),
        }
    }

    pub fn mul(&self, other: &Self) -> Result<Self, ScriptNumError> {
        match (&self.value, &other.value) {
            (Repr::Small(a), Repr::Small(b)) => a
                .checked_mul(*b)
                .map(Self::from_i64)
                .ok_or(ScriptNumError::Overflow),
            (Repr::Big(a), Repr::Big(b)) => Ok(Self::from_bigint(a.mul(b))),
            _ => Ok(Self::from_bigint(self.to_bigint().mul(&other.to_bigint()))),
        }
    }

    pub fn div(&self, other: &Self) -> Result<Self, ScriptNumError> {
        match (&self.value, &other.value) {
            (Repr::Small(a), Repr::Small(b)) => {
                if *b == 0 {
                    return Err(ScriptNumError::BigInt);
                }
                a.checked_div(*b)
                    .map(Self::from_i64)
                    .ok_or(ScriptNumError::Overflow)
            }
            (Repr::Big(a), Repr::Big(b)) => Ok(Self::from_bigint(a.div(b)?)),
            _ => Ok(Self::from_bigint(
                self.to_bigint().div(&other.to_bigint())?,
            )),
        }
    }

    pub fn rem(&self, other: &Self) -> Result<Self, ScriptNumError> {
        match (&self.value, &other.value) {
            (Repr::Small(a), Repr::Small(b)) => {
                if *b == 0 {
                    return Err(ScriptNumError::BigInt);
                }
                a.checked_rem(*b)
                    .map(Self::from_i64)
                    .ok_or(ScriptNumError::Overflow)
            }
            (Repr::Big(a), Repr::Big(b)) => Ok(Self::from_bigint(a.rem(b)?)),
            _ => Ok(Self::from_bigint(
                self.to_bigint().rem(&other.to_bigint())?,
            )),
        }
    }

    /// Negation preserves the tag.
    pub fn neg(&self) -> Result<Self, ScriptNumError> {
        match &self.value {
            Repr::Small(n) => n
                .checked_neg()
                .map(Self::from_i64)
                .ok_or(ScriptNumError::Overflow),
            Repr::Big(n) => Ok(Self::from_bigint(n.neg())),
        }
    }

    pub fn bitand(&self, other: &Self) -> Self {
        match (&self.value, &other.value) {
            (Repr::Small(a), Repr::Small(b)) => Self::from_i64(a & b),
            (Repr::Big(a), Repr::Big(b)) => Self::from_bigint(a.bitand(b)),
            _ => Self::from_bigint(self.to_bigint().bitand(&other.to_bigint())),
        }
    }
}

// Equality is numeric: a narrow and a wide node holding the same value
// compare equal.
impl PartialEq for ScriptNum {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScriptNum {}

impl PartialOrd for ScriptNum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScriptNum {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.value, &other.value) {
            (Repr::Small(a), Repr::Small(b)) => a.cmp(b),
            (Repr::Big(a), Repr::Big(b)) => a.cmp(b),
            _ => self.to_bigint().cmp(&other.to_bigint()),
        }
    }
}

/// Encodes a native integer in the canonical stack format.
pub fn encode_i64(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }

    let mut result = Vec::new();
    let mut abs_value = value.unsigned_abs();

    while abs_value > 0 {
        result.push((abs_value & 0xff) as u8);
        abs_value >>= 8;
    }

    if let Some(last) = result.last_mut() {
        if *last & 0x80 != 0 {
            result.push(if value < 0 { 0x80 } else { 0x00 });
        } else if value < 0 {
            *last |= 0x80;
        }
    }

    result
}

/// Checks the minimal-encoding rule: no trailing 0x00/0x80 byte unless the
/// sign bit of the preceding byte is occupied.
pub fn is_minimally_encoded(bytes: &[u8], max_size: usize) -> bool {
    if bytes.len() > max_size {
        return false;
    }
    if let Some(&last) = bytes.last() {
        if last & 0x7f == 0 {
            if bytes.len() == 1 {
                // Rejects negative zero as well.
                return false;
            }
            if bytes[bytes.len() - 2] & 0x80 == 0 {
                return false;
            }
        }
    }
    true
}

/// Rewrites `data` into its minimal encoding in place. Returns whether the
/// buffer changed.
pub fn minimally_encode(data: &mut Vec<u8>) -> bool {
    let last = match data.last() {
        Some(&last) => last,
        None => return false,
    };
    if last & 0x7f != 0 {
        return false;
    }
    if data.len() == 1 {
        data.clear();
        return true;
    }
    if data[data.len() - 2] & 0x80 != 0 {
        return false;
    }
    for i in (1..data.len()).rev() {
        if data[i - 1] != 0 {
            if data[i - 1] & 0x80 != 0 {
                // The sign bit is taken, keep one extra byte for it.
                data[i] = last;
                data.truncate(i + 1);
            } else {
                data[i - 1] |= last;
                data.truncate(i);
            }
            return true;
        }
    }
    data.clear();
    true
}
