//! Core engine for compressed time-series chunks inside a relational store.
//!
//! A chunkwise table is partitioned by time into chunks. A chunk can be
//! compressed, at which point its rows are re-grouped into *segments*: each
//! segment row carries the constant segment-by column values once, one opaque
//! compressed stream per remaining column, a row count and a sequence number.
//! This crate provides everything needed to produce and consume that layout:
//!
//! - A scalar [`value`] model (`Datum` / `Cell`) and row schemas.
//! - Columnar [`compression`] codecs behind a pull-based decompression
//!   iterator port, selected by an algorithm id embedded in every stream.
//! - The [`scan`] operator that streams decoded rows out of a compressed
//!   chunk, optionally k-way-merging segments on a sort key so a downstream
//!   ORDER BY needs no extra sort node.
//! - A [`catalog`] of tables, chunks and per-column compression settings,
//!   plus the [`planner`] that derives an immutable scan configuration from
//!   it.
//! - Producer-side pieces: the [`segment`] builder, Parquet segment files
//!   ([`formats`]), the bulk [`ingest`] pipeline and local [`storage`].
//! - The [`table::ChunkStore`] handle that ties the above together for
//!   embedders and the CLI.
//!
//! The scan operator itself is synchronous and single-threaded; only storage
//! and segment file I/O are async.
pub mod catalog;
pub mod compression;
pub mod formats;
pub mod ingest;
pub mod layout;
pub mod planner;
pub mod scan;
pub mod segment;
pub mod storage;
pub mod table;
pub mod value;

pub use scan::error::ScanError;
pub use table::ChunkStoreError;
