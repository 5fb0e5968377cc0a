//! Bounded byte cursor
//!
//! All multi-byte fields are host-native endian, matching the daemon that
//! wrote the image on the same machine.

use crate::error::DecodeError;

/// Cursor over a byte slice that never reads past its end
///
/// Every read advances the position and counts toward [`consumed`](Self::consumed).
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf, pos: 0 }
    }

    /// Bytes consumed so far
    pub fn consumed(&self) -> usize {
        self.pos
    }

    /// Bytes left before the end of the slice
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Take the next `len` bytes
    pub fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::Truncated {
                field,
                needed: len,
                remaining: self.remaining(),
            });
        }

        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take_array::<1>(field)?[0])
    }

    pub fn read_i32(&mut self, field: &'static str) -> Result<i32, DecodeError> {
        self.take_array(field).map(i32::from_ne_bytes)
    }

    pub fn read_u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        self.take_array(field).map(u32::from_ne_bytes)
    }

    pub fn read_u64(&mut self, field: &'static str) -> Result<u64, DecodeError> {
        self.take_array(field).map(u64::from_ne_bytes)
    }

    /// Read a signed length field and reject negative values
    pub fn read_len(&mut self, field: &'static str) -> Result<usize, DecodeError> {
        let value = self.read_i32(field)?;
        usize::try_from(value).map_err(|_| DecodeError::NegativeLength { field, value })
    }

    /// Skip padding bytes
    pub fn skip(&mut self, len: usize, field: &'static str) -> Result<(), DecodeError> {
        self.take(len, field).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_reads() {
        let mut bytes = Vec::new();
        bytes.push(7u8);
        bytes.extend_from_slice(&(-3i32).to_ne_bytes());
        bytes.extend_from_slice(&0xdead_beefu32.to_ne_bytes());
        bytes.extend_from_slice(&42u64.to_ne_bytes());

        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.read_u8("a").unwrap(), 7);
        assert_eq!(reader.read_i32("b").unwrap(), -3);
        assert_eq!(reader.read_u32("c").unwrap(), 0xdead_beef);
        assert_eq!(reader.read_u64("d").unwrap(), 42);
        assert_eq!(reader.consumed(), 17);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_take_past_end_fails_without_advancing() {
        let bytes = [1u8, 2, 3];
        let mut reader = ByteReader::new(&bytes);
        reader.skip(1, "pad").unwrap();

        let err = reader.take(3, "name").unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                field: "name",
                needed: 3,
                remaining: 2
            }
        );
        assert_eq!(reader.consumed(), 1);
        assert_eq!(reader.take(2, "name").unwrap(), &[2, 3]);
    }

    #[test]
    fn test_negative_length_rejected() {
        let bytes = (-1i32).to_ne_bytes();
        let mut reader = ByteReader::new(&bytes);
        assert!(matches!(
            reader.read_len("h_name_len"),
            Err(DecodeError::NegativeLength { value: -1, .. })
        ));
    }
}
