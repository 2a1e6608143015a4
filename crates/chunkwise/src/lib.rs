//! # chunkwise
//!
//! Compressed time-series chunks inside a relational store.
//!
//! This crate is the supported public entry point and provides a small,
//! stable surface over `chunkwise-core`: the table-store handle, the scan
//! operator and the types needed to configure both.
//!
//! ## Example
//!
//! ```rust,ignore
//! use chunkwise::prelude::*;
//! ```

/// Convenience prelude with the stable, supported surface.
pub mod prelude;

/// Codec namespace (wrapper-only).
pub mod compression {
    pub use chunkwise_core::compression::{
        CodecRegistry, ColumnCompressor, CompressionAlgorithm, CompressionError,
        DecompressionIterator, ScanDirection,
    };
}

pub use chunkwise_core::catalog::{
    Catalog, ChunkId, ChunkMeta, ChunkRange, ColumnCompression, CompressionSettings, TableId,
    TableMeta,
};
pub use chunkwise_core::planner::OrderByRequest;
pub use chunkwise_core::scan::sort::{SortDirection, SortKey};
pub use chunkwise_core::scan::{
    CancellationToken, DecompressScan, ExecOptions, ScanConfig, ScanError, SegmentScan,
};
pub use chunkwise_core::storage::TableLocation;
pub use chunkwise_core::table::{ChunkStore, ChunkStoreError};
pub use chunkwise_core::value::{Cell, Datum, Field, Row, RowSchema, ValueType};
