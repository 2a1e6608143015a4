//! Wrapper prelude.
//!
//! The `chunkwise` crate is the supported public entry point. Downstream
//! code should prefer importing from this prelude instead of depending on
//! internal core module paths.

pub use crate::compression;
pub use crate::{
    CancellationToken, Catalog, Cell, ChunkId, ChunkStore, ChunkStoreError, ColumnCompression,
    CompressionSettings, Datum, DecompressScan, ExecOptions, Field, OrderByRequest, Row, RowSchema,
    ScanConfig, ScanError, SortDirection, SortKey, TableId, TableLocation, ValueType,
};
