//! Format-specific helpers: Arrow conversions and Parquet segment files.
//!
//! A compressed chunk is persisted as a single Parquet file of segment rows
//! (segment-by columns with native Arrow types, compressed streams as
//! binary, metadata columns as 64-bit integers). The readers build over
//! in-memory `Bytes` fetched through the storage layer, so no I/O happens
//! after open.

pub mod convert;
pub mod parquet;

use arrow::error::ArrowError;
use snafu::prelude::*;

use crate::storage::StorageError;
use crate::value::ValueType;

/// Errors from format conversion and segment file I/O.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FormatError {
    /// Arrow kernel or construction failure.
    #[snafu(display("Arrow error: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// Parquet encode/decode failure.
    #[snafu(display("Parquet error: {source}"))]
    Parquet {
        /// Underlying Parquet error.
        source: ::parquet::errors::ParquetError,
    },

    /// Storage failure while reading or writing a segment file.
    #[snafu(display("Storage error: {source}"))]
    Storage {
        /// Underlying storage error.
        source: StorageError,
    },

    /// A column's Arrow data does not match its declared type.
    #[snafu(display("Column {column} does not decode as {expected:?}"))]
    ColumnTypeMismatch {
        /// The offending column.
        column: String,
        /// The type the layout declares.
        expected: ValueType,
    },

    /// A value of the wrong type showed up while building a column.
    #[snafu(display("Value of type {actual:?} in column {column} declared {expected:?}"))]
    ValueTypeMismatch {
        /// The offending column.
        column: String,
        /// Declared type.
        expected: ValueType,
        /// Actual type found.
        actual: ValueType,
    },

    /// A record batch is narrower or wider than the layout.
    #[snafu(display("Record batch has {got} columns, layout expects {expected}"))]
    WidthMismatch {
        /// Layout width.
        expected: usize,
        /// Batch width.
        got: usize,
    },
}
