//! Bit-level reader and writer used by the gorilla codec. Bits are packed
//! MSB-first within each byte.

use bytes::Bytes;

use super::{CompressionError, TruncatedSnafu};
use snafu::prelude::*;

#[derive(Debug, Default)]
pub(crate) struct BitWriter {
    bytes: Vec<u8>,
    /// Number of valid bits in the last byte, 0..=7; 0 means byte-aligned.
    partial: u32,
}

impl BitWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn write_bit(&mut self, bit: bool) {
        if self.partial == 0 {
            self.bytes.push(0);
        }
        if bit {
            let last = self.bytes.len() - 1;
            self.bytes[last] |= 1 << (7 - self.partial);
        }
        self.partial = (self.partial + 1) % 8;
    }

    /// Write the low `count` bits of `value`, most significant first.
    pub(crate) fn write_bits(&mut self, value: u64, count: u32) {
        for i in (0..count).rev() {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    /// Pad the final byte with zero bits and return the buffer.
    pub(crate) fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

#[derive(Debug)]
pub(crate) struct BitReader {
    data: Bytes,
    pos_bits: usize,
}

impl BitReader {
    pub(crate) fn new(data: Bytes) -> Self {
        Self { data, pos_bits: 0 }
    }

    pub(crate) fn read_bit(&mut self) -> Result<bool, CompressionError> {
        let byte = self.pos_bits / 8;
        ensure!(byte < self.data.len(), TruncatedSnafu { offset: byte });
        let bit = (self.data[byte] >> (7 - (self.pos_bits % 8))) & 1 == 1;
        self.pos_bits += 1;
        Ok(bit)
    }

    /// Read `count` bits, most significant first.
    pub(crate) fn read_bits(&mut self, count: u32) -> Result<u64, CompressionError> {
        let mut value = 0u64;
        for _ in 0..count {
            value = (value << 1) | u64::from(self.read_bit()?);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_round_trip() {
        let mut writer = BitWriter::new();
        writer.write_bit(true);
        writer.write_bits(0b1011, 4);
        writer.write_bits(u64::MAX, 64);
        writer.write_bits(0, 3);
        writer.write_bit(true);

        let mut reader = BitReader::new(Bytes::from(writer.finish()));
        assert!(reader.read_bit().expect("bit"));
        assert_eq!(reader.read_bits(4).expect("nibble"), 0b1011);
        assert_eq!(reader.read_bits(64).expect("word"), u64::MAX);
        assert_eq!(reader.read_bits(3).expect("zeros"), 0);
        assert!(reader.read_bit().expect("last"));
    }

    #[test]
    fn reader_errors_past_end() {
        let mut reader = BitReader::new(Bytes::from_static(&[0xff]));
        assert_eq!(reader.read_bits(8).expect("full byte"), 0xff);
        assert!(matches!(
            reader.read_bit(),
            Err(CompressionError::Truncated { .. })
        ));
    }
}
