//! Error type for the decompress scan operator.
//!
//! Variants split into configuration errors (raised while the operator is
//! being built, all of them programming or planning mistakes), data-integrity
//! errors (the segment data contradicts itself), codec errors passed through
//! unmodified, and cancellation. Nothing here is retried; every error
//! surfaces to the caller, who is expected to run the operator's `end` path
//! regardless.

use snafu::prelude::*;

use crate::compression::CompressionError;

/// Errors raised by the decompress scan operator.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ScanError {
    /// The decompression map has no entries at all.
    #[snafu(display("No columns specified to decompress"))]
    EmptyDecompressionMap,

    /// A negative output attribute number that is neither the count nor the
    /// sequence-number id.
    #[snafu(display("Invalid metadata column attno {attno} in decompression map"))]
    UnknownMetadataColumn {
        /// The unrecognized attribute number.
        attno: i32,
    },

    /// A positive output attribute number beyond the output schema.
    #[snafu(display("Output attno {attno} out of range for schema of width {width}"))]
    OutputColumnOutOfRange {
        /// The out-of-range attribute number.
        attno: i32,
        /// Output schema width.
        width: usize,
    },

    /// The decompression map carries no row-count column.
    #[snafu(display("Decompression map has no row-count column"))]
    MissingRowCountColumn,

    /// Merge mode needs at least one sort key.
    #[snafu(display("Merge mode enabled without sort keys"))]
    MergeWithoutSortKeys,

    /// Sort keys are only meaningful in merge mode.
    #[snafu(display("Sort keys supplied but merge mode is disabled"))]
    SortKeysWithoutMerge,

    /// A sort key references a column beyond the output schema.
    #[snafu(display("Sort key attno {attno} out of range for schema of width {width}"))]
    SortKeyOutOfRange {
        /// The out-of-range attribute number.
        attno: usize,
        /// Output schema width.
        width: usize,
    },

    /// A projection references a system column other than the table oid.
    /// Decoded rows are virtual and have no other system columns.
    #[snafu(display(
        "Transparent decompression only supports the tableoid system column, got attno {attno}"
    ))]
    UnsupportedSystemColumn {
        /// The offending system attribute number.
        attno: i32,
    },

    /// A projection references an output column beyond the schema.
    #[snafu(display("Projection attno {attno} out of range for schema of width {width}"))]
    ProjectionColumnOutOfRange {
        /// The out-of-range attribute number.
        attno: usize,
        /// Output schema width.
        width: usize,
    },

    /// A segment row carries NULL in its row-count column.
    #[snafu(display("Segment row-count column is NULL"))]
    NullRowCount,

    /// The row-count column holds something other than a non-negative integer.
    #[snafu(display("Invalid segment row count: {detail}"))]
    InvalidRowCount {
        /// What was found instead.
        detail: String,
    },

    /// A segment row is narrower than the decompression map expects.
    #[snafu(display("Segment row has no attribute {input_attno}"))]
    SegmentColumnMissing {
        /// The 1-based input attribute that was missing.
        input_attno: usize,
    },

    /// A compressed column holds a non-binary, non-null value.
    #[snafu(display("Compressed column {column} does not hold a binary stream"))]
    CompressedColumnNotBinary {
        /// The offending column.
        column: String,
    },

    /// A compressed stream kept yielding values after the row counter
    /// reached zero: segment metadata and column streams have desynchronized.
    #[snafu(display("Compressed column {column} out of sync with segment row counter"))]
    CompressedColumnOutOfSync {
        /// The column whose stream disagrees with the counter.
        column: String,
    },

    /// Codec failure, propagated unmodified.
    #[snafu(display("Codec error in column {column}: {source}"))]
    Codec {
        /// The column being decoded.
        column: String,
        /// Underlying codec error.
        source: CompressionError,
    },

    /// The child segment scan failed.
    #[snafu(display("Segment source error: {source}"))]
    SegmentSource {
        /// Underlying source error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The cancellation flag was raised.
    #[snafu(display("Scan cancelled"))]
    Cancelled,
}
