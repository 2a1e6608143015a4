//! On-disk layout conventions under a table-store root.
//!
//! Keeping path construction in one place means the storage and format
//! layers never concatenate strings ad hoc:
//!
//! - `<root>/_chunkwise/catalog.json` — the catalog file.
//! - `<root>/chunks/t<table>/c<chunk>.parquet` — one compressed segment file
//!   per chunk.
//! - `<root>/staging/t<table>/c<chunk>.parquet` — staged uncompressed rows
//!   awaiting compression.

use std::path::PathBuf;

use crate::catalog::{ChunkId, TableId};

/// Relative path of the catalog file.
pub const CATALOG_FILE: &str = "_chunkwise/catalog.json";

/// Relative path of the compressed segment file for a chunk.
pub fn segment_file_path(table_id: TableId, chunk_id: ChunkId) -> PathBuf {
    PathBuf::from(format!("chunks/t{table_id}/c{chunk_id}.parquet"))
}

/// Relative path of the staged-row file for a chunk.
pub fn staging_file_path(table_id: TableId, chunk_id: ChunkId) -> PathBuf {
    PathBuf::from(format!("staging/t{table_id}/c{chunk_id}.parquet"))
}
