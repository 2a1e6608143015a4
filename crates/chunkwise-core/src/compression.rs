//! Columnar compression codecs and the decompression-iterator port.
//!
//! Every compressed column stream starts with a one-byte algorithm id
//! followed by a codec-specific payload. The scan operator never looks past
//! that header: it asks the [`CodecRegistry`] for a [`DecompressionIterator`]
//! and pulls decoded cells one at a time. Iterators are finite, forward-only
//! and not restartable; asking for [`ScanDirection::Reverse`] yields a fresh
//! iterator over the same stream in the opposite order.
//!
//! Shared payload layout across the built-in codecs:
//!
//! ```text
//! [algo: u8][row_count: varint][validity bitmap, LSB-first, 1 = present][payload]
//! ```
//!
//! The payload encodes only the present (non-null) values. Codec-specific
//! details live in the codec modules; compressors buffer appended cells and
//! serialize on `finish`, which keeps the encoders trivial for batches that
//! are bounded at 1000 rows anyway.

pub mod array;
mod bits;
pub mod delta_delta;
mod encoding;
pub mod gorilla;

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use snafu::prelude::*;

use crate::value::{Cell, ValueType};

/// Built-in compression algorithms. The ids are part of the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgorithm {
    /// Values stored verbatim, any supported type.
    Array,
    /// XOR bit-packing for 64-bit floats.
    Gorilla,
    /// Delta-of-delta varints for integers and timestamps.
    DeltaDelta,
}

impl CompressionAlgorithm {
    /// Wire id of this algorithm, written as the stream header byte.
    pub fn id(self) -> u8 {
        match self {
            CompressionAlgorithm::Array => 1,
            CompressionAlgorithm::Gorilla => 3,
            CompressionAlgorithm::DeltaDelta => 4,
        }
    }

    /// Reverse lookup from a wire id.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(CompressionAlgorithm::Array),
            3 => Some(CompressionAlgorithm::Gorilla),
            4 => Some(CompressionAlgorithm::DeltaDelta),
            _ => None,
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionAlgorithm::Array => "array",
            CompressionAlgorithm::Gorilla => "gorilla",
            CompressionAlgorithm::DeltaDelta => "delta-delta",
        };
        f.write_str(name)
    }
}

/// Scan direction requested when a decompression iterator is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanDirection {
    /// Storage order.
    #[default]
    Forward,
    /// Opposite of storage order.
    Reverse,
}

/// Errors raised by codecs and the registry.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CompressionError {
    /// A compressed stream with no bytes at all, not even a header.
    #[snafu(display("Compressed stream is empty"))]
    EmptyStream,

    /// The header byte names an algorithm nobody registered.
    #[snafu(display("Unknown compression algorithm id {algorithm}"))]
    UnknownAlgorithm {
        /// The unrecognized wire id.
        algorithm: u8,
    },

    /// The stream ended in the middle of a value.
    #[snafu(display("Compressed stream truncated at byte {offset}"))]
    Truncated {
        /// Byte offset at which more data was expected.
        offset: usize,
    },

    /// The algorithm cannot encode the column's type at all.
    #[snafu(display("{algorithm} codec does not support values of type {value_type:?}"))]
    UnsupportedType {
        /// The codec that rejected the column.
        algorithm: CompressionAlgorithm,
        /// The column type it cannot handle.
        value_type: ValueType,
    },

    /// A value appended to a compressor does not match the declared column type.
    #[snafu(display("Value of type {actual:?} appended to a column of type {expected:?}"))]
    ValueTypeMismatch {
        /// Declared column type.
        expected: ValueType,
        /// Type of the offending value.
        actual: ValueType,
    },

    /// The payload decoded to something structurally impossible.
    #[snafu(display("Corrupt compressed stream: {detail}"))]
    CorruptStream {
        /// What was wrong.
        detail: String,
    },

    /// Text payload that is not valid UTF-8.
    #[snafu(display("Compressed text is not valid UTF-8"))]
    NonUtf8Text {
        /// Underlying UTF-8 error.
        source: std::str::Utf8Error,
    },
}

/// Pull-based iterator over the decoded cells of one compressed column of
/// one segment.
///
/// `Ok(None)` signals the end of the stream; the stream length equals the
/// segment's row count unless the data is corrupt. Calling `try_next` again
/// after the end is a contract violation and may return anything.
pub trait DecompressionIterator {
    /// Decode and return the next cell.
    fn try_next(&mut self) -> Result<Option<Cell>, CompressionError>;
}

impl std::fmt::Debug for dyn DecompressionIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn DecompressionIterator").finish()
    }
}

/// Streaming encoder for one column of one segment.
///
/// Compressors write their own algorithm header byte in `finish`.
pub trait ColumnCompressor {
    /// Append the next cell in row order.
    fn append(&mut self, cell: &Cell) -> Result<(), CompressionError>;

    /// Serialize the full stream, header byte included.
    fn finish(self: Box<Self>) -> Result<Bytes, CompressionError>;
}

/// Constructor for a decompression iterator, registered per algorithm id.
///
/// Receives the payload with the header byte already stripped.
pub type DecompressorFactory =
    fn(Bytes, ValueType, ScanDirection) -> Result<Box<dyn DecompressionIterator>, CompressionError>;

/// Table of decompressor constructors keyed by algorithm id.
///
/// The built-in codecs are pre-registered; embedders can add their own ids
/// at process start with [`CodecRegistry::register`].
pub struct CodecRegistry {
    factories: HashMap<u8, DecompressorFactory>,
}

impl CodecRegistry {
    /// A registry with the built-in codecs registered.
    pub fn with_builtin() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(CompressionAlgorithm::Array.id(), array::decompressor);
        registry.register(CompressionAlgorithm::Gorilla.id(), gorilla::decompressor);
        registry.register(CompressionAlgorithm::DeltaDelta.id(), delta_delta::decompressor);
        registry
    }

    /// Register (or replace) the decompressor for an algorithm id.
    pub fn register(&mut self, algorithm: u8, factory: DecompressorFactory) {
        self.factories.insert(algorithm, factory);
    }

    /// Open an iterator over a full compressed stream (header byte first).
    pub fn open_iterator(
        &self,
        stream: Bytes,
        value_type: ValueType,
        direction: ScanDirection,
    ) -> Result<Box<dyn DecompressionIterator>, CompressionError> {
        ensure!(!stream.is_empty(), EmptyStreamSnafu);

        let algorithm = stream[0];
        let factory = self
            .factories
            .get(&algorithm)
            .context(UnknownAlgorithmSnafu { algorithm })?;

        factory(stream.slice(1..), value_type, direction)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

/// The algorithm the segment writer picks for a column type.
pub fn default_algorithm(value_type: ValueType) -> CompressionAlgorithm {
    match value_type {
        ValueType::Int32 | ValueType::Int64 | ValueType::Timestamp => {
            CompressionAlgorithm::DeltaDelta
        }
        ValueType::Float64 => CompressionAlgorithm::Gorilla,
        ValueType::Bool | ValueType::Text | ValueType::Bytes => CompressionAlgorithm::Array,
    }
}

/// Build a compressor for an algorithm and column type.
pub fn compressor_for(
    algorithm: CompressionAlgorithm,
    value_type: ValueType,
) -> Result<Box<dyn ColumnCompressor>, CompressionError> {
    match algorithm {
        CompressionAlgorithm::Array => Ok(Box::new(array::ArrayCompressor::new(value_type))),
        CompressionAlgorithm::Gorilla => {
            ensure!(
                value_type == ValueType::Float64,
                UnsupportedTypeSnafu {
                    algorithm,
                    value_type
                }
            );
            Ok(Box::new(gorilla::GorillaCompressor::new()))
        }
        CompressionAlgorithm::DeltaDelta => {
            ensure!(
                matches!(
                    value_type,
                    ValueType::Int32 | ValueType::Int64 | ValueType::Timestamp
                ),
                UnsupportedTypeSnafu {
                    algorithm,
                    value_type
                }
            );
            Ok(Box::new(delta_delta::DeltaDeltaCompressor::new(value_type)))
        }
    }
}

/// Compress a full column of cells in one call. Convenience for the segment
/// writer and tests.
pub fn compress_column(
    algorithm: CompressionAlgorithm,
    value_type: ValueType,
    cells: &[Cell],
) -> Result<Bytes, CompressionError> {
    let mut compressor = compressor_for(algorithm, value_type)?;
    for cell in cells {
        compressor.append(cell)?;
    }
    compressor.finish()
}

/// Iterator over already-decoded cells, walked back to front. Wraps any
/// forward iterator to serve [`ScanDirection::Reverse`].
pub(crate) struct ReversedCells {
    cells: Vec<Cell>,
}

impl ReversedCells {
    /// Drain `forward` completely and serve its cells in reverse order.
    pub(crate) fn materialize(
        mut forward: impl DecompressionIterator,
    ) -> Result<Self, CompressionError> {
        let mut cells = Vec::new();
        while let Some(cell) = forward.try_next()? {
            cells.push(cell);
        }
        Ok(Self { cells })
    }
}

impl DecompressionIterator for ReversedCells {
    fn try_next(&mut self) -> Result<Option<Cell>, CompressionError> {
        Ok(self.cells.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Datum;

    fn int_cells(values: &[Option<i64>]) -> Vec<Cell> {
        values.iter().map(|v| v.map(Datum::Int64)).collect()
    }

    fn collect(mut it: Box<dyn DecompressionIterator>) -> Vec<Cell> {
        let mut out = Vec::new();
        while let Some(cell) = it.try_next().expect("decode") {
            out.push(cell);
        }
        out
    }

    #[test]
    fn registry_rejects_empty_stream() {
        let registry = CodecRegistry::with_builtin();
        let err = registry
            .open_iterator(Bytes::new(), ValueType::Int64, ScanDirection::Forward)
            .expect_err("empty stream");
        assert!(matches!(err, CompressionError::EmptyStream));
    }

    #[test]
    fn registry_rejects_unknown_algorithm() {
        let registry = CodecRegistry::with_builtin();
        let err = registry
            .open_iterator(
                Bytes::from_static(&[200, 0, 0]),
                ValueType::Int64,
                ScanDirection::Forward,
            )
            .expect_err("unknown algorithm");
        assert!(matches!(
            err,
            CompressionError::UnknownAlgorithm { algorithm: 200 }
        ));
    }

    #[test]
    fn registry_dispatches_on_header_byte() {
        let registry = CodecRegistry::with_builtin();
        let cells = int_cells(&[Some(3), None, Some(-7)]);
        let stream = compress_column(
            CompressionAlgorithm::DeltaDelta,
            ValueType::Int64,
            &cells,
        )
        .expect("compress");
        assert_eq!(stream[0], CompressionAlgorithm::DeltaDelta.id());

        let it = registry
            .open_iterator(stream, ValueType::Int64, ScanDirection::Forward)
            .expect("open");
        assert_eq!(collect(it), cells);
    }

    #[test]
    fn custom_algorithm_can_be_registered() {
        struct Ones(usize);
        impl DecompressionIterator for Ones {
            fn try_next(&mut self) -> Result<Option<Cell>, CompressionError> {
                if self.0 == 0 {
                    return Ok(None);
                }
                self.0 -= 1;
                Ok(Some(Some(Datum::Int64(1))))
            }
        }
        fn ones_factory(
            payload: Bytes,
            _value_type: ValueType,
            _direction: ScanDirection,
        ) -> Result<Box<dyn DecompressionIterator>, CompressionError> {
            Ok(Box::new(Ones(payload.len())))
        }

        let mut registry = CodecRegistry::with_builtin();
        registry.register(42, ones_factory);
        let it = registry
            .open_iterator(
                Bytes::from_static(&[42, 0, 0]),
                ValueType::Int64,
                ScanDirection::Forward,
            )
            .expect("open custom");
        assert_eq!(collect(it), int_cells(&[Some(1), Some(1)]));
    }

    #[test]
    fn default_algorithms_match_types() {
        assert_eq!(
            default_algorithm(ValueType::Timestamp),
            CompressionAlgorithm::DeltaDelta
        );
        assert_eq!(
            default_algorithm(ValueType::Float64),
            CompressionAlgorithm::Gorilla
        );
        assert_eq!(default_algorithm(ValueType::Text), CompressionAlgorithm::Array);
    }

    #[test]
    fn gorilla_compressor_rejects_non_float_columns() {
        let err = compressor_for(CompressionAlgorithm::Gorilla, ValueType::Int64)
            .err()
            .expect("type check");
        assert!(matches!(err, CompressionError::UnsupportedType { .. }));
    }
}
