//! Delta-of-delta codec for integers and timestamps.
//!
//! The payload stores the first present value zigzag-varint encoded, then for
//! every following present value the change in delta relative to the previous
//! one. Regularly spaced timestamps therefore collapse to a run of zero
//! bytes. Arithmetic wraps on both sides, which keeps the mapping lossless
//! over the full `i64` range.

use bytes::Bytes;

use super::encoding::{ByteReader, Validity, validity_len, write_varint, write_zigzag};
use super::{
    ColumnCompressor, CompressionAlgorithm, CompressionError, DecompressionIterator, ReversedCells,
    ScanDirection, ValueTypeMismatchSnafu,
};
use crate::value::{Cell, Datum, ValueType};
use snafu::prelude::*;

fn widen(datum: &Datum) -> Option<i64> {
    match datum {
        Datum::Int32(v) => Some(i64::from(*v)),
        Datum::Int64(v) | Datum::Timestamp(v) => Some(*v),
        _ => None,
    }
}

/// Buffering compressor for the delta-delta codec.
pub struct DeltaDeltaCompressor {
    value_type: ValueType,
    cells: Vec<Cell>,
}

impl DeltaDeltaCompressor {
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            cells: Vec::new(),
        }
    }
}

impl ColumnCompressor for DeltaDeltaCompressor {
    fn append(&mut self, cell: &Cell) -> Result<(), CompressionError> {
        if let Some(datum) = cell {
            ensure!(
                datum.value_type() == self.value_type,
                ValueTypeMismatchSnafu {
                    expected: self.value_type,
                    actual: datum.value_type(),
                }
            );
        }
        self.cells.push(cell.clone());
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Bytes, CompressionError> {
        let mut out = vec![CompressionAlgorithm::DeltaDelta.id()];
        write_varint(&mut out, self.cells.len() as u64);
        super::encoding::write_validity(&mut out, self.cells.iter().map(|c| c.is_some()));

        let mut prev: Option<i64> = None;
        let mut prev_delta = 0i64;
        for datum in self.cells.iter().flatten() {
            // append() enforced the type, so widen cannot fail here
            let value = widen(datum).unwrap_or_default();
            match prev {
                None => write_zigzag(&mut out, value),
                Some(p) => {
                    let delta = value.wrapping_sub(p);
                    write_zigzag(&mut out, delta.wrapping_sub(prev_delta));
                    prev_delta = delta;
                }
            }
            prev = Some(value);
        }
        Ok(Bytes::from(out))
    }
}

struct DeltaDeltaIterator {
    reader: ByteReader,
    validity: Validity,
    value_type: ValueType,
    row_count: usize,
    row: usize,
    prev: Option<i64>,
    prev_delta: i64,
}

impl DeltaDeltaIterator {
    fn narrow(&self, value: i64) -> Result<Datum, CompressionError> {
        match self.value_type {
            ValueType::Int32 => {
                let narrow = i32::try_from(value).map_err(|_| {
                    CompressionError::CorruptStream {
                        detail: format!("int32 value {value} out of range"),
                    }
                })?;
                Ok(Datum::Int32(narrow))
            }
            ValueType::Timestamp => Ok(Datum::Timestamp(value)),
            _ => Ok(Datum::Int64(value)),
        }
    }
}

impl DecompressionIterator for DeltaDeltaIterator {
    fn try_next(&mut self) -> Result<Option<Cell>, CompressionError> {
        if self.row == self.row_count {
            return Ok(None);
        }
        let present = self.validity.is_present(self.row);
        self.row += 1;
        if !present {
            return Ok(Some(None));
        }

        let value = match self.prev {
            None => self.reader.read_zigzag()?,
            Some(p) => {
                let delta = self.prev_delta.wrapping_add(self.reader.read_zigzag()?);
                self.prev_delta = delta;
                p.wrapping_add(delta)
            }
        };
        self.prev = Some(value);
        Ok(Some(Some(self.narrow(value)?)))
    }
}

/// Decompressor factory registered for [`CompressionAlgorithm::DeltaDelta`].
pub fn decompressor(
    payload: Bytes,
    value_type: ValueType,
    direction: ScanDirection,
) -> Result<Box<dyn DecompressionIterator>, CompressionError> {
    let mut reader = ByteReader::new(payload);
    let row_count = reader.read_varint()? as usize;
    let validity = Validity::new(reader.read_slice(validity_len(row_count))?);

    let forward = DeltaDeltaIterator {
        reader,
        validity,
        value_type,
        row_count,
        row: 0,
        prev: None,
        prev_delta: 0,
    };
    match direction {
        ScanDirection::Forward => Ok(Box::new(forward)),
        ScanDirection::Reverse => Ok(Box::new(ReversedCells::materialize(forward)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::compress_column;

    fn round_trip(value_type: ValueType, cells: Vec<Cell>, direction: ScanDirection) -> Vec<Cell> {
        let stream = compress_column(CompressionAlgorithm::DeltaDelta, value_type, &cells)
            .expect("compress");
        let mut it = decompressor(stream.slice(1..), value_type, direction).expect("open");
        let mut out = Vec::new();
        while let Some(cell) = it.try_next().expect("decode") {
            out.push(cell);
        }
        out
    }

    fn ts(values: &[Option<i64>]) -> Vec<Cell> {
        values.iter().map(|v| v.map(Datum::Timestamp)).collect()
    }

    #[test]
    fn regular_timestamps_round_trip() {
        let cells = ts(&[Some(0), Some(1_000), Some(2_000), Some(3_000), Some(4_000)]);
        assert_eq!(round_trip(ValueType::Timestamp, cells.clone(), ScanDirection::Forward), cells);
    }

    #[test]
    fn regular_spacing_collapses_to_one_byte_per_row() {
        let cells = ts(&(0..100).map(|i| Some(i * 60_000_000)).collect::<Vec<_>>());
        let stream = compress_column(CompressionAlgorithm::DeltaDelta, ValueType::Timestamp, &cells)
            .expect("compress");
        // header + count + bitmap + first value + first delta + 98 zero bytes
        assert!(stream.len() < 40 + 98 + 1);
    }

    #[test]
    fn nulls_and_irregular_values_round_trip() {
        let cells = ts(&[None, Some(10), Some(7), None, Some(-3), Some(-3), None]);
        assert_eq!(round_trip(ValueType::Timestamp, cells.clone(), ScanDirection::Forward), cells);
    }

    #[test]
    fn extremes_round_trip_via_wrapping() {
        let cells: Vec<Cell> = vec![
            Some(Datum::Int64(i64::MIN)),
            Some(Datum::Int64(i64::MAX)),
            Some(Datum::Int64(0)),
            Some(Datum::Int64(i64::MIN + 1)),
        ];
        assert_eq!(round_trip(ValueType::Int64, cells.clone(), ScanDirection::Forward), cells);
    }

    #[test]
    fn int32_round_trip_reverse() {
        let cells: Vec<Cell> = vec![
            Some(Datum::Int32(5)),
            Some(Datum::Int32(-5)),
            None,
            Some(Datum::Int32(i32::MAX)),
        ];
        let mut reversed = cells.clone();
        reversed.reverse();
        assert_eq!(round_trip(ValueType::Int32, cells, ScanDirection::Reverse), reversed);
    }

    #[test]
    fn single_value_round_trip() {
        let cells = ts(&[Some(42)]);
        assert_eq!(round_trip(ValueType::Timestamp, cells.clone(), ScanDirection::Forward), cells);
    }

    #[test]
    fn truncated_stream_errors() {
        let cells = ts(&[Some(1), Some(100_000)]);
        let stream = compress_column(CompressionAlgorithm::DeltaDelta, ValueType::Timestamp, &cells)
            .expect("compress");
        let mut it = decompressor(
            stream.slice(1..stream.len() - 1),
            ValueType::Timestamp,
            ScanDirection::Forward,
        )
        .expect("open");
        it.try_next().expect("first value intact");
        assert!(matches!(
            it.try_next(),
            Err(CompressionError::Truncated { .. })
        ));
    }
}
