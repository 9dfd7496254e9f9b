//! Goldilocks prime field used by the inference circuits.
//!
//! Quantized activations are signed integers; they are embedded into the field
//! with [`FieldElement::from_i64`] and recovered with [`FieldElement::to_i64`],
//! which lifts every element to the representative closest to zero.

use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metadata describing the underlying field modulus.
#[derive(Debug, Clone, Copy)]
pub struct Modulus {
    /// Prime modulus value in canonical representation.
    pub value: u64,
    /// Largest value whose signed lift is non-negative, `(p - 1) / 2`.
    pub half: u64,
}

impl Modulus {
    /// Creates a new modulus descriptor.
    pub const fn new(value: u64) -> Self {
        Self {
            value,
            half: (value - 1) / 2,
        }
    }
}

/// Goldilocks prime `2^64 - 2^32 + 1`.
pub const DEFAULT_MODULUS: Modulus = Modulus::new(0xffff_ffff_0000_0001);

/// Field element represented as a canonical value modulo the prime.
///
/// The wrapped integer is always within `[0, MODULUS.value)`. Serialization
/// uses little-endian byte order.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct FieldElement(u64);

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FieldElement").field(&self.0).finish()
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_i64())
    }
}

impl FieldElement {
    /// Canonical prime modulus associated with this field.
    pub const MODULUS: Modulus = DEFAULT_MODULUS;
    /// Additive identity.
    pub const ZERO: FieldElement = FieldElement(0);
    /// Multiplicative identity.
    pub const ONE: FieldElement = FieldElement(1);
    /// Byte length of the canonical encoding.
    pub const BYTE_LENGTH: usize = 8;

    /// Returns the canonical representative.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Embeds a signed integer, mapping negatives to `p - |v|`.
    pub fn from_i64(value: i64) -> Self {
        if value >= 0 {
            FieldElement::from(value as u64)
        } else {
            FieldElement::from(value.unsigned_abs()).neg()
        }
    }

    /// Signed lift: elements above `(p - 1) / 2` map to negative integers.
    pub fn to_i64(self) -> i64 {
        if self.0 <= Self::MODULUS.half {
            self.0 as i64
        } else {
            -((Self::MODULUS.value - self.0) as i64)
        }
    }

    /// `2^exp` as a field element (`exp < 64`).
    pub fn power_of_two(exp: u32) -> Self {
        FieldElement::from(1u64 << exp)
    }

    /// Exponentiation by square-and-multiply.
    pub fn pow(&self, mut exp: u64) -> Self {
        let mut base = *self;
        let mut acc = FieldElement::ONE;
        while exp > 0 {
            if exp & 1 == 1 {
                acc = acc.mul(&base);
            }
            base = base.square();
            exp >>= 1;
        }
        acc
    }

    /// Returns `true` for the additive identity.
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for FieldElement {
    fn from(value: u64) -> Self {
        let p = Self::MODULUS.value;
        FieldElement(if value >= p { value - p } else { value })
    }
}

impl From<bool> for FieldElement {
    fn from(bit: bool) -> Self {
        if bit {
            FieldElement::ONE
        } else {
            FieldElement::ZERO
        }
    }
}

/// Trait describing the arithmetic contract for field elements.
pub trait FieldElementOps: Sized {
    /// Adds two canonical field elements.
    fn add(&self, rhs: &Self) -> Self;
    /// Subtracts `rhs` from `self`.
    fn sub(&self, rhs: &Self) -> Self;
    /// Computes the additive inverse of `self`.
    fn neg(&self) -> Self;
    /// Multiplies two field elements.
    fn mul(&self, rhs: &Self) -> Self;
    /// Squares the field element.
    fn square(&self) -> Self;
    /// Computes the multiplicative inverse, returning `None` for zero.
    fn inv(&self) -> Option<Self>;
}

impl FieldElementOps for FieldElement {
    fn add(&self, rhs: &Self) -> Self {
        let p = Self::MODULUS.value as u128;
        let sum = self.0 as u128 + rhs.0 as u128;
        FieldElement(if sum >= p { sum - p } else { sum } as u64)
    }

    fn sub(&self, rhs: &Self) -> Self {
        if self.0 >= rhs.0 {
            FieldElement(self.0 - rhs.0)
        } else {
            FieldElement(Self::MODULUS.value - (rhs.0 - self.0))
        }
    }

    fn neg(&self) -> Self {
        if self.0 == 0 {
            *self
        } else {
            FieldElement(Self::MODULUS.value - self.0)
        }
    }

    fn mul(&self, rhs: &Self) -> Self {
        let product = self.0 as u128 * rhs.0 as u128;
        FieldElement((product % Self::MODULUS.value as u128) as u64)
    }

    fn square(&self) -> Self {
        self.mul(self)
    }

    fn inv(&self) -> Option<Self> {
        if self.is_zero() {
            None
        } else {
            Some(self.pow(Self::MODULUS.value - 2))
        }
    }
}

/// Error raised when decoding a field element from bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FieldDeserializeError {
    /// The encoded integer is not smaller than the modulus.
    #[error("field element deserialization failed: non-canonical input")]
    FieldDeserializeNonCanonical,
}

/// Serialization contract for field elements.
pub trait CanonicalSerialize: Sized {
    /// Canonical serialization output type.
    type Bytes;

    /// Serializes the element into canonical little-endian bytes.
    fn to_bytes(&self) -> Self::Bytes;

    /// Deserializes from canonical little-endian bytes.
    fn from_bytes(bytes: &Self::Bytes) -> Result<Self, FieldDeserializeError>;
}

impl CanonicalSerialize for FieldElement {
    type Bytes = [u8; 8];

    fn to_bytes(&self) -> Self::Bytes {
        self.0.to_le_bytes()
    }

    fn from_bytes(bytes: &Self::Bytes) -> Result<Self, FieldDeserializeError> {
        let value = u64::from_le_bytes(*bytes);
        if value >= Self::MODULUS.value {
            return Err(FieldDeserializeError::FieldDeserializeNonCanonical);
        }
        Ok(FieldElement(value))
    }
}
