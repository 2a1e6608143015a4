//! XOR float codec for 64-bit floats.
//!
//! Consecutive values are XORed; a zero XOR costs one bit, otherwise the
//! meaningful bits are written either inside the previous leading/trailing
//! window (control `10`) or with a fresh 6-bit leading-zero count and 6-bit
//! length (control `11`). Slow-moving gauges compress to roughly a bit per
//! row.

use bytes::Bytes;

use super::bits::{BitReader, BitWriter};
use super::encoding::{ByteReader, Validity, validity_len, write_varint};
use super::{
    ColumnCompressor, CompressionAlgorithm, CompressionError, DecompressionIterator, ReversedCells,
    ScanDirection, ValueTypeMismatchSnafu,
};
use crate::value::{Cell, Datum, ValueType};
use snafu::prelude::*;

/// Sentinel meaning "no reusable bit window yet".
const NO_WINDOW: u32 = 65;

/// Buffering compressor for the gorilla codec.
pub struct GorillaCompressor {
    cells: Vec<Cell>,
}

impl GorillaCompressor {
    pub fn new() -> Self {
        Self { cells: Vec::new() }
    }
}

impl Default for GorillaCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl ColumnCompressor for GorillaCompressor {
    fn append(&mut self, cell: &Cell) -> Result<(), CompressionError> {
        if let Some(datum) = cell {
            ensure!(
                matches!(datum, Datum::Float64(_)),
                ValueTypeMismatchSnafu {
                    expected: ValueType::Float64,
                    actual: datum.value_type(),
                }
            );
        }
        self.cells.push(cell.clone());
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Bytes, CompressionError> {
        let mut out = vec![CompressionAlgorithm::Gorilla.id()];
        write_varint(&mut out, self.cells.len() as u64);
        super::encoding::write_validity(&mut out, self.cells.iter().map(|c| c.is_some()));

        let mut writer = BitWriter::new();
        let mut prev: Option<u64> = None;
        let mut prev_leading = NO_WINDOW;
        let mut prev_trailing = NO_WINDOW;

        for datum in self.cells.iter().flatten() {
            let bits = match datum {
                Datum::Float64(v) => v.to_bits(),
                // append() enforced the type
                _ => 0,
            };
            let Some(prev_bits) = prev else {
                writer.write_bits(bits, 64);
                prev = Some(bits);
                continue;
            };

            let xor = bits ^ prev_bits;
            prev = Some(bits);
            if xor == 0 {
                writer.write_bit(false);
                continue;
            }
            writer.write_bit(true);

            let leading = xor.leading_zeros();
            let trailing = xor.trailing_zeros();
            if leading >= prev_leading && trailing >= prev_trailing {
                writer.write_bit(false);
                let len = 64 - prev_leading - prev_trailing;
                writer.write_bits(xor >> prev_trailing, len);
            } else {
                writer.write_bit(true);
                let len = 64 - leading - trailing;
                writer.write_bits(u64::from(leading), 6);
                writer.write_bits(u64::from(len - 1), 6);
                writer.write_bits(xor >> trailing, len);
                prev_leading = leading;
                prev_trailing = trailing;
            }
        }

        out.extend_from_slice(&writer.finish());
        Ok(Bytes::from(out))
    }
}

struct GorillaIterator {
    bits: BitReader,
    validity: Validity,
    row_count: usize,
    row: usize,
    prev: Option<u64>,
    prev_leading: u32,
    prev_trailing: u32,
}

impl GorillaIterator {
    fn decode_value(&mut self) -> Result<u64, CompressionError> {
        let Some(prev_bits) = self.prev else {
            let bits = self.bits.read_bits(64)?;
            self.prev = Some(bits);
            return Ok(bits);
        };

        if !self.bits.read_bit()? {
            return Ok(prev_bits);
        }

        let xor = if self.bits.read_bit()? {
            let leading = self.bits.read_bits(6)? as u32;
            let len = self.bits.read_bits(6)? as u32 + 1;
            ensure!(
                leading + len <= 64,
                super::CorruptStreamSnafu {
                    detail: format!("xor window {leading}+{len} exceeds 64 bits"),
                }
            );
            let trailing = 64 - leading - len;
            self.prev_leading = leading;
            self.prev_trailing = trailing;
            self.bits.read_bits(len)? << trailing
        } else {
            ensure!(
                self.prev_leading != NO_WINDOW,
                super::CorruptStreamSnafu {
                    detail: "bit window reused before it was established".to_string(),
                }
            );
            let len = 64 - self.prev_leading - self.prev_trailing;
            self.bits.read_bits(len)? << self.prev_trailing
        };

        let bits = prev_bits ^ xor;
        self.prev = Some(bits);
        Ok(bits)
    }
}

impl DecompressionIterator for GorillaIterator {
    fn try_next(&mut self) -> Result<Option<Cell>, CompressionError> {
        if self.row == self.row_count {
            return Ok(None);
        }
        let present = self.validity.is_present(self.row);
        self.row += 1;
        if !present {
            return Ok(Some(None));
        }
        let bits = self.decode_value()?;
        Ok(Some(Some(Datum::Float64(f64::from_bits(bits)))))
    }
}

/// Decompressor factory registered for [`CompressionAlgorithm::Gorilla`].
pub fn decompressor(
    payload: Bytes,
    value_type: ValueType,
    direction: ScanDirection,
) -> Result<Box<dyn DecompressionIterator>, CompressionError> {
    ensure!(
        value_type == ValueType::Float64,
        super::UnsupportedTypeSnafu {
            algorithm: CompressionAlgorithm::Gorilla,
            value_type,
        }
    );

    let mut reader = ByteReader::new(payload);
    let row_count = reader.read_varint()? as usize;
    let validity = Validity::new(reader.read_slice(validity_len(row_count))?);

    let forward = GorillaIterator {
        bits: BitReader::new(reader.read_rest()),
        validity,
        row_count,
        row: 0,
        prev: None,
        prev_leading: NO_WINDOW,
        prev_trailing: NO_WINDOW,
    };
    match direction {
        ScanDirection::Forward => Ok(Box::new(forward)),
        ScanDirection::Reverse => Ok(Box::new(ReversedCells::materialize(forward)?)),
    }
}
