//! Common Utilities
//!
//! Provides utility functions used across the PDCP data plane

use bytes::{BufMut, Bytes, BytesMut};

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Bit-level writer (MSB first)
///
/// Used for control PDUs whose fields are not byte aligned.
#[derive(Debug, Default)]
pub struct BitEncoder {
    buf: BytesMut,
    /// Bits already used in the last byte (0 means the last byte is full)
    offset: u32,
}

impl BitEncoder {
    /// Create an empty encoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an encoder with room for `bytes` bytes
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(bytes),
            offset: 0,
        }
    }

    /// Append the `nof_bits` least significant bits of `value`, MSB first
    pub fn pack(&mut self, value: u64, nof_bits: u32) {
        assert!(nof_bits <= 64, "Cannot pack more than 64 bits at once: {}", nof_bits);

        // Byte aligned fast path
        if self.offset == 0 && nof_bits % 8 == 0 {
            for i in (0..nof_bits / 8).rev() {
                self.buf.put_u8((value >> (i * 8)) as u8);
            }
            return;
        }

        for i in (0..nof_bits).rev() {
            self.pack_bit((value >> i) & 1 == 1);
        }
    }

    fn pack_bit(&mut self, bit: bool) {
        if self.offset == 0 {
            self.buf.put_u8(0);
        }
        if bit {
            let last = self.buf.len() - 1;
            self.buf[last] |= 1 << (7 - self.offset);
        }
        self.offset = (self.offset + 1) % 8;
    }

    /// Number of bits written so far
    pub fn nof_bits(&self) -> usize {
        if self.offset == 0 {
            self.buf.len() * 8
        } else {
            (self.buf.len() - 1) * 8 + self.offset as usize
        }
    }

    /// Finish encoding, padding the last byte with zeros
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Bit-level reader (MSB first)
#[derive(Debug)]
pub struct BitDecoder<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    /// Read `nof_bits` bits, or `None` if the buffer is exhausted
    pub fn unpack(&mut self, nof_bits: u32) -> Option<u64> {
        assert!(nof_bits <= 64, "Cannot unpack more than 64 bits at once: {}", nof_bits);
        if self.bits_remaining() < nof_bits as usize {
            return None;
        }

        let mut value = 0u64;
        for _ in 0..nof_bits {
            let byte = self.data[self.bit_pos / 8];
            let bit = (byte >> (7 - (self.bit_pos % 8))) & 1;
            value = (value << 1) | u64::from(bit);
            self.bit_pos += 1;
        }
        Some(value)
    }

    /// Number of bits not yet read
    pub fn bits_remaining(&self) -> usize {
        self.data.len() * 8 - self.bit_pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_hex() {
        let data = vec![0x12, 0x34, 0xAB, 0xCD];
        assert_eq!(bytes_to_hex(&data), "12 34 ab cd");
    }

    #[test]
    fn test_bit_packing() {
        let mut enc = BitEncoder::new();
        enc.pack(0, 1);
        enc.pack(0b101, 3);
        enc.pack(0xF, 4);
        enc.pack(0xDEADBEEF, 32);
        enc.pack(1, 1);
        assert_eq!(enc.nof_bits(), 41);

        let packed = enc.finish();
        assert_eq!(&packed[..], &[0x5F, 0xDE, 0xAD, 0xBE, 0xEF, 0x80]);

        let mut dec = BitDecoder::new(&packed);
        assert_eq!(dec.unpack(1), Some(0));
        assert_eq!(dec.unpack(3), Some(0b101));
        assert_eq!(dec.unpack(4), Some(0xF));
        assert_eq!(dec.unpack(32), Some(0xDEADBEEF));
        assert_eq!(dec.unpack(1), Some(1));
        // Padding bits
        assert_eq!(dec.bits_remaining(), 7);
        assert_eq!(dec.unpack(8), None);
    }

    #[test]
    fn test_unaligned_word() {
        let mut enc = BitEncoder::new();
        enc.pack(1, 1);
        enc.pack(0x8000_0001, 32);
        let packed = enc.finish();
        assert_eq!(&packed[..], &[0xC0, 0x00, 0x00, 0x00, 0x80]);

        let mut dec = BitDecoder::new(&packed);
        assert_eq!(dec.unpack(1), Some(1));
        assert_eq!(dec.unpack(32), Some(0x8000_0001));
    }
}
