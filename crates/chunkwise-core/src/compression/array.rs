//! Verbatim "array" codec: values are stored one after another with a typed
//! scalar encoding and no cross-row modelling. The fallback for types the
//! specialized codecs cannot handle, and the baseline codec in tests.

use std::sync::Arc;

use bytes::Bytes;

use super::encoding::{ByteReader, Validity, validity_len, write_varint, write_zigzag};
use super::{
    ColumnCompressor, CompressionAlgorithm, CompressionError, DecompressionIterator, NonUtf8TextSnafu,
    ReversedCells, ScanDirection, ValueTypeMismatchSnafu,
};
use crate::value::{Cell, Datum, ValueType};
use snafu::prelude::*;

/// Buffering compressor for the array codec.
pub struct ArrayCompressor {
    value_type: ValueType,
    cells: Vec<Cell>,
}

impl ArrayCompressor {
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            cells: Vec::new(),
        }
    }
}

impl ColumnCompressor for ArrayCompressor {
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
        let mut out = vec![CompressionAlgorithm::Array.id()];
        write_varint(&mut out, self.cells.len() as u64);
        super::encoding::write_validity(&mut out, self.cells.iter().map(|c| c.is_some()));

        for datum in self.cells.iter().flatten() {
            encode_datum(&mut out, datum);
        }
        Ok(Bytes::from(out))
    }
}

fn encode_datum(out: &mut Vec<u8>, datum: &Datum) {
    match datum {
        Datum::Bool(v) => out.push(u8::from(*v)),
        Datum::Int32(v) => write_zigzag(out, i64::from(*v)),
        Datum::Int64(v) | Datum::Timestamp(v) => write_zigzag(out, *v),
        Datum::Float64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Datum::Text(v) => {
            write_varint(out, v.len() as u64);
            out.extend_from_slice(v.as_bytes());
        }
        Datum::Bytes(v) => {
            write_varint(out, v.len() as u64);
            out.extend_from_slice(v);
        }
    }
}

struct ArrayIterator {
    reader: ByteReader,
    validity: Validity,
    value_type: ValueType,
    row_count: usize,
    row: usize,
}

impl ArrayIterator {
    fn decode_datum(&mut self) -> Result<Datum, CompressionError> {
        let datum = match self.value_type {
            ValueType::Bool => Datum::Bool(self.reader.read_u8()? != 0),
            ValueType::Int32 => {
                let wide = self.reader.read_zigzag()?;
                let narrow = i32::try_from(wide).map_err(|_| {
                    CompressionError::CorruptStream {
                        detail: format!("int32 value {wide} out of range"),
                    }
                })?;
                Datum::Int32(narrow)
            }
            ValueType::Int64 => Datum::Int64(self.reader.read_zigzag()?),
            ValueType::Timestamp => Datum::Timestamp(self.reader.read_zigzag()?),
            ValueType::Float64 => {
                let raw = self.reader.read_slice(8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&raw);
                Datum::Float64(f64::from_le_bytes(buf))
            }
            ValueType::Text => {
                let len = self.reader.read_varint()? as usize;
                let raw = self.reader.read_slice(len)?;
                let text = std::str::from_utf8(&raw).context(NonUtf8TextSnafu)?;
                Datum::Text(Arc::from(text))
            }
            ValueType::Bytes => {
                let len = self.reader.read_varint()? as usize;
                Datum::Bytes(self.reader.read_slice(len)?)
            }
        };
        Ok(datum)
    }
}

impl DecompressionIterator for ArrayIterator {
    fn try_next(&mut self) -> Result<Option<Cell>, CompressionError> {
        if self.row == self.row_count {
            return Ok(None);
        }
        let present = self.validity.is_present(self.row);
        self.row += 1;
        if !present {
            return Ok(Some(None));
        }
        Ok(Some(Some(self.decode_datum()?)))
    }
}

/// Decompressor factory registered for [`CompressionAlgorithm::Array`].
pub fn decompressor(
    payload: Bytes,
    value_type: ValueType,
    direction: ScanDirection,
) -> Result<Box<dyn DecompressionIterator>, CompressionError> {
    let mut reader = ByteReader::new(payload);
    let row_count = reader.read_varint()? as usize;
    let validity = Validity::new(reader.read_slice(validity_len(row_count))?);

    let forward = ArrayIterator {
        reader,
        validity,
        value_type,
        row_count,
        row: 0,
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
        let stream =
            compress_column(CompressionAlgorithm::Array, value_type, &cells).expect("compress");
        let mut it = decompressor(stream.slice(1..), value_type, direction).expect("open");
        let mut out = Vec::new();
        while let Some(cell) = it.try_next().expect("decode") {
            out.push(cell);
        }
        out
    }

    #[test]
    fn text_round_trip_with_nulls() {
        let cells: Vec<Cell> = vec![
            Some(Datum::Text("meter-1".into())),
            None,
            Some(Datum::Text("".into())),
            Some(Datum::Text("meter-2".into())),
        ];
        assert_eq!(round_trip(ValueType::Text, cells.clone(), ScanDirection::Forward), cells);
    }

    #[test]
    fn reverse_direction_reverses_rows() {
        let cells: Vec<Cell> = vec![
            Some(Datum::Bool(true)),
            None,
            Some(Datum::Bool(false)),
        ];
        let mut reversed = cells.clone();
        reversed.reverse();
        assert_eq!(round_trip(ValueType::Bool, cells, ScanDirection::Reverse), reversed);
    }

    #[test]
    fn empty_column_round_trip() {
        assert_eq!(round_trip(ValueType::Int64, vec![], ScanDirection::Forward), vec![]);
    }

    #[test]
    fn bytes_and_floats_round_trip() {
        let cells: Vec<Cell> = vec![
            Some(Datum::Bytes(Bytes::from_static(b"\x00\x01\x02"))),
            Some(Datum::Bytes(Bytes::new())),
        ];
        assert_eq!(round_trip(ValueType::Bytes, cells.clone(), ScanDirection::Forward), cells);

        let floats: Vec<Cell> = vec![
            Some(Datum::Float64(1.5)),
            Some(Datum::Float64(f64::NEG_INFINITY)),
            None,
        ];
        assert_eq!(
            round_trip(ValueType::Float64, floats.clone(), ScanDirection::Forward),
            floats
        );
    }

    #[test]
    fn appending_wrong_type_errors() {
        let mut compressor = ArrayCompressor::new(ValueType::Int64);
        let err = compressor
            .append(&Some(Datum::Text("nope".into())))
            .expect_err("type mismatch");
        assert!(matches!(err, CompressionError::ValueTypeMismatch { .. }));
    }

    #[test]
    fn truncated_payload_errors() {
        let cells: Vec<Cell> = vec![Some(Datum::Int64(1_000_000))];
        let stream =
            compress_column(CompressionAlgorithm::Array, ValueType::Int64, &cells).expect("compress");
        let truncated = stream.slice(1..stream.len() - 1);
        let mut it =
            decompressor(truncated, ValueType::Int64, ScanDirection::Forward).expect("open");
        assert!(matches!(
            it.try_next(),
            Err(CompressionError::Truncated { .. })
        ));
    }
}
