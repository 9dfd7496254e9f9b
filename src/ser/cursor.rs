use super::error::{SerError, SerKind, SerResult};
use crate::field::{CanonicalSerialize, FieldElement};
use crate::hash::{Digest, DIGEST_SIZE};

/// Cursor over a byte slice providing typed little-endian reads.
///
/// Every read names the section and field it belongs to so decoding failures
/// point at the offending part of the encoding.
#[derive(Debug, Clone, Copy)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
    kind: SerKind,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8], kind: SerKind) -> Self {
        Self {
            bytes,
            offset: 0,
            kind,
        }
    }

    /// Switches the section reported by subsequent failures.
    pub fn section(&mut self, kind: SerKind) -> &mut Self {
        self.kind = kind;
        self
    }

    pub fn position(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.offset)
    }

    /// Reads exactly `len` bytes.
    pub fn read_exact(&mut self, len: usize, field: &'static str) -> SerResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(SerError::unexpected_end(self.kind, field));
        }
        let start = self.offset;
        self.offset += len;
        Ok(&self.bytes[start..start + len])
    }

    pub fn read_array<const N: usize>(&mut self, field: &'static str) -> SerResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_exact(N, field)?);
        Ok(out)
    }

    pub fn read_u8(&mut self, field: &'static str) -> SerResult<u8> {
        Ok(self.read_array::<1>(field)?[0])
    }

    pub fn read_u16(&mut self, field: &'static str) -> SerResult<u16> {
        self.read_array(field).map(u16::from_le_bytes)
    }

    pub fn read_u32(&mut self, field: &'static str) -> SerResult<u32> {
        self.read_array(field).map(u32::from_le_bytes)
    }

    pub fn read_i64(&mut self, field: &'static str) -> SerResult<i64> {
        self.read_array(field).map(i64::from_le_bytes)
    }

    pub fn read_digest(&mut self, field: &'static str) -> SerResult<Digest> {
        self.read_array::<DIGEST_SIZE>(field)
    }

    /// Reads a canonical field element, rejecting values not below the modulus.
    pub fn read_felt(&mut self, field: &'static str) -> SerResult<FieldElement> {
        let bytes = self.read_array::<8>(field)?;
        FieldElement::from_bytes(&bytes).map_err(|_| SerError::invalid_value(self.kind, field))
    }

    /// Reads a `u32` count and checks that at least `count * min_item_len`
    /// bytes remain, so corrupt prefixes cannot trigger huge allocations.
    pub fn read_len(&mut self, field: &'static str, min_item_len: usize) -> SerResult<usize> {
        let count = self.read_u32(field)? as usize;
        if count.saturating_mul(min_item_len.max(1)) > self.remaining() {
            return Err(SerError::invalid_length(self.kind, field));
        }
        Ok(count)
    }

    /// Reads a `u32`-prefixed vector of items.
    pub fn read_vec<T, F>(
        &mut self,
        field: &'static str,
        min_item_len: usize,
        mut read_item: F,
    ) -> SerResult<Vec<T>>
    where
        F: FnMut(&mut Self) -> SerResult<T>,
    {
        let count = self.read_len(field, min_item_len)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(read_item(self)?);
        }
        Ok(out)
    }

    /// Fails when unread bytes remain.
    pub fn finish(&self) -> SerResult<()> {
        if self.remaining() != 0 {
            return Err(SerError::TrailingBytes {
                kind: self.kind,
                consumed: self.offset,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_and_reports_section() {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0xff];
        let mut reader = ByteReader::new(&bytes, SerKind::Proof);
        assert_eq!(reader.read_u32("word").unwrap(), 0x0403_0201);
        let err = reader.section(SerKind::MerklePath).read_u16("short").unwrap_err();
        assert_eq!(err, SerError::unexpected_end(SerKind::MerklePath, "short"));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let bytes = u32::MAX.to_le_bytes();
        let mut reader = ByteReader::new(&bytes, SerKind::PublicValues);
        let err = reader.read_len("inputs", 8).unwrap_err();
        assert_eq!(err, SerError::invalid_length(SerKind::PublicValues, "inputs"));
    }

    #[test]
    fn trailing_bytes_are_reported() {
        let bytes = [0u8; 3];
        let mut reader = ByteReader::new(&bytes, SerKind::ConstraintRow);
        reader.read_u8("tag").unwrap();
        assert_eq!(
            reader.finish().unwrap_err().to_string(),
            "constraint row: 2 trailing bytes after offset 1"
        );
    }
}
