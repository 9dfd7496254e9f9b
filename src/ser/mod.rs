//! Canonical little-endian codec shared by circuit rows and proofs.
//!
//! Layout rules: integers are fixed-width little-endian, field elements are 8
//! canonical bytes, digests are 32 raw bytes and sequences carry a `u32` item
//! count.

mod cursor;
mod error;

pub use cursor::ByteReader;
pub use error::{SerError, SerKind, SerResult};

use crate::field::{CanonicalSerialize, FieldElement};
use crate::hash::Digest;

/// Append-only encoder mirroring [`ByteReader`].
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    out: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            out: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.out.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_felt(&mut self, value: &FieldElement) {
        self.out.extend_from_slice(&value.to_bytes());
    }

    pub fn write_digest(&mut self, digest: &Digest) {
        self.out.extend_from_slice(digest);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    /// Writes a `u32` length prefix, failing for sequences that do not fit.
    pub fn write_len(&mut self, len: usize, kind: SerKind, field: &'static str) -> SerResult<()> {
        let len = u32::try_from(len).map_err(|_| SerError::invalid_length(kind, field))?;
        self.write_u32(len);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.out.len()
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }
}
