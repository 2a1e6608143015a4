//! Bulk ingest: chunk dispatch plus multi-insert buffering.
//!
//! Incoming rows are routed to their chunk by timestamp (chunks are created
//! on demand, aligned to the table's chunk interval) and collected in
//! per-chunk buffers so rows land in the staging area in batches rather
//! than one at a time. The pipeline flushes every buffer once it holds
//! [`MAX_BUFFERED_ROWS`] rows or [`MAX_BUFFERED_BYTES`] bytes in total, and
//! after a flush trims the tracked buffer list oldest-first down to
//! [`MAX_CHUNK_BUFFERS`] — old buffers are less likely to see rows again
//! than recent ones, and an unbounded list would grow with the number of
//! chunks touched by one load. The buffer for the chunk currently being
//! written is never evicted.

use std::collections::HashMap;

use log::debug;
use snafu::prelude::*;

use crate::catalog::{Catalog, CatalogError, ChunkId, TableId};
use crate::value::{Datum, Row};

/// Flush once this many rows are buffered across all chunk buffers.
pub const MAX_BUFFERED_ROWS: usize = 1000;

/// Flush once the buffered rows are estimated at this many bytes.
pub const MAX_BUFFERED_BYTES: usize = 65535;

/// Trim the tracked buffer list back down to this many after a flush.
pub const MAX_CHUNK_BUFFERS: usize = 32;

/// Errors from the ingest pipeline.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum IngestError {
    /// A row's partitioning timestamp is NULL.
    #[snafu(display("NULL timestamp in row {line}"))]
    NullTimestamp {
        /// 1-based row number in the input stream.
        line: u64,
    },

    /// A row's partitioning column holds something other than a timestamp.
    #[snafu(display("Row {line} has a non-timestamp value in the time column"))]
    InvalidTimestamp {
        /// 1-based row number in the input stream.
        line: u64,
    },

    /// A row has the wrong number of cells.
    #[snafu(display("Row {line} has {got} cells, schema expects {expected}"))]
    RowWidthMismatch {
        /// 1-based row number in the input stream.
        line: u64,
        /// Schema width.
        expected: usize,
        /// Offending row width.
        got: usize,
    },

    /// The row routes to a chunk that has already been compressed.
    #[snafu(display("Row {line} routes to chunk {chunk_id}, which is already compressed"))]
    ChunkCompressed {
        /// 1-based row number in the input stream.
        line: u64,
        /// The compressed chunk the row belongs to.
        chunk_id: ChunkId,
    },

    /// Catalog lookup or chunk creation failed.
    #[snafu(display("Catalog error during ingest: {source}"))]
    Catalog {
        /// Underlying catalog error.
        source: CatalogError,
    },
}

struct MultiInsertBuffer {
    chunk_id: ChunkId,
    rows: Vec<Row>,
}

/// One bulk-ingest run into a table. Rows go in one at a time; buffered
/// rows land in the per-chunk staging area on flush. `finish` flushes the
/// remainder and reports how many rows were ingested.
pub struct IngestPipeline<'a> {
    catalog: &'a mut Catalog,
    staging: &'a mut HashMap<ChunkId, Vec<Row>>,
    table_id: TableId,
    time_offset: usize,
    schema_width: usize,
    /// Tracked buffers in creation order; the front is the oldest.
    buffers: Vec<MultiInsertBuffer>,
    buffered_rows: usize,
    buffered_bytes: usize,
    line: u64,
    rows_ingested: u64,
}

impl<'a> IngestPipeline<'a> {
    /// Start an ingest run into `table_id`.
    pub fn new(
        catalog: &'a mut Catalog,
        staging: &'a mut HashMap<ChunkId, Vec<Row>>,
        table_id: TableId,
    ) -> Result<Self, IngestError> {
        let entry = catalog.table(table_id).context(CatalogSnafu)?;
        let time_offset = entry
            .meta
            .schema
            .index_of(&entry.meta.time_column)
            .unwrap_or(0);
        let schema_width = entry.meta.schema.width();
        Ok(Self {
            catalog,
            staging,
            table_id,
            time_offset,
            schema_width,
            buffers: Vec::new(),
            buffered_rows: 0,
            buffered_bytes: 0,
            line: 0,
            rows_ingested: 0,
        })
    }

    /// Route and buffer one row.
    pub fn ingest_row(&mut self, row: Row) -> Result<(), IngestError> {
        self.line += 1;
        ensure!(
            row.len() == self.schema_width,
            RowWidthMismatchSnafu {
                line: self.line,
                expected: self.schema_width,
                got: row.len(),
            }
        );

        let ts = match &row[self.time_offset] {
            None => return NullTimestampSnafu { line: self.line }.fail(),
            Some(Datum::Timestamp(ts)) => *ts,
            Some(_) => return InvalidTimestampSnafu { line: self.line }.fail(),
        };

        let chunk_id = self
            .catalog
            .chunk_for_timestamp(self.table_id, ts)
            .context(CatalogSnafu)?;
        let chunk = self
            .catalog
            .chunk(self.table_id, chunk_id)
            .context(CatalogSnafu)?;
        ensure!(
            !chunk.is_compressed(),
            ChunkCompressedSnafu {
                line: self.line,
                chunk_id,
            }
        );

        self.buffered_bytes += estimated_row_bytes(&row);
        self.buffered_rows += 1;
        self.rows_ingested += 1;

        match self.buffers.iter_mut().find(|b| b.chunk_id == chunk_id) {
            Some(buffer) => buffer.rows.push(row),
            None => self.buffers.push(MultiInsertBuffer {
                chunk_id,
                rows: vec![row],
            }),
        }

        if self.buffered_rows >= MAX_BUFFERED_ROWS || self.buffered_bytes >= MAX_BUFFERED_BYTES {
            self.flush_all(chunk_id);
        }
        Ok(())
    }

    /// Flush the remainder and return the number of rows ingested.
    pub fn finish(mut self) -> u64 {
        let current = self.buffers.last().map(|b| b.chunk_id);
        if let Some(current) = current {
            self.flush_all(current);
        }
        self.rows_ingested
    }

    /// Write every buffer's rows to staging, then trim the tracked buffer
    /// list oldest-first, keeping the buffer for `current` alive.
    fn flush_all(&mut self, current: ChunkId) {
        let mut flushed = 0;
        for buffer in &mut self.buffers {
            flushed += buffer.rows.len();
            self.staging
                .entry(buffer.chunk_id)
                .or_default()
                .append(&mut buffer.rows);
        }
        debug!(
            "ingest flushed {flushed} rows across {} chunk buffers",
            self.buffers.len()
        );
        self.buffered_rows = 0;
        self.buffered_bytes = 0;

        while self.buffers.len() > MAX_CHUNK_BUFFERS {
            if self.buffers[0].chunk_id == current {
                let head = self.buffers.remove(0);
                self.buffers.push(head);
            }
            self.buffers.remove(0);
        }
    }

    #[cfg(test)]
    fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    #[cfg(test)]
    fn has_buffer(&self, chunk_id: ChunkId) -> bool {
        self.buffers.iter().any(|b| b.chunk_id == chunk_id)
    }
}

/// Rough wire size of one row, for the byte-based flush threshold.
fn estimated_row_bytes(row: &Row) -> usize {
    row.iter()
        .map(|cell| match cell {
            None => 1,
            Some(Datum::Bool(_)) => 1,
            Some(Datum::Int32(_)) => 4,
            Some(Datum::Int64(_)) | Some(Datum::Float64(_)) | Some(Datum::Timestamp(_)) => 8,
            Some(Datum::Text(v)) => 8 + v.len(),
            Some(Datum::Bytes(v)) => 8 + v.len(),
        })
        .sum()
}
