//! The user-facing table-store handle.
//!
//! [`ChunkStore`] bundles the persisted catalog with the storage location
//! and exposes the whole lifecycle: create tables, bulk-ingest rows,
//! compress chunks into segment files and open (optionally merge-ordered)
//! scans over them. Ingested rows are staged per chunk in plain Parquet row
//! files until the chunk is compressed, so a load and the compression that
//! follows it can run in different processes. The CLI and embedders talk to
//! this type; the operator itself stays independent of it.

use std::collections::HashMap;
use std::path::Path;

use futures::future::try_join_all;
use log::info;
use snafu::prelude::*;

use crate::catalog::{Catalog, CatalogError, ChunkId, CompressionSettings, TableId};
use crate::formats::FormatError;
use crate::formats::parquet::{
    ParquetSegmentScan, read_row_file, write_row_file, write_segment_file,
};
use crate::ingest::{IngestError, IngestPipeline};
use crate::layout;
use crate::planner::{OrderByRequest, PlanError, plan_chunk_scan};
use crate::scan::{DecompressScan, ExecOptions, ScanError};
use crate::segment::{SegmentBuildError, build_segment_rows, segment_layout};
use crate::storage::{self, StorageError, TableLocation};
use crate::value::{Row, RowSchema};

/// Errors from [`ChunkStore`] operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChunkStoreError {
    /// Catalog failure.
    #[snafu(display("Catalog error: {source}"))]
    Catalog {
        /// Underlying catalog error.
        source: CatalogError,
    },

    /// Ingest failure.
    #[snafu(display("Ingest error: {source}"))]
    Ingest {
        /// Underlying ingest error.
        source: IngestError,
    },

    /// Segment building failure.
    #[snafu(display("Segment build error: {source}"))]
    SegmentBuild {
        /// Underlying segment-build error.
        source: SegmentBuildError,
    },

    /// Segment or staging file I/O failure.
    #[snafu(display("Segment file error: {source}"))]
    Format {
        /// Underlying format error.
        source: FormatError,
    },

    /// Raw storage failure.
    #[snafu(display("Storage error: {source}"))]
    Storage {
        /// Underlying storage error.
        source: StorageError,
    },

    /// Scan planning failure.
    #[snafu(display("Plan error: {source}"))]
    Plan {
        /// Underlying planner error.
        source: PlanError,
    },

    /// Scan construction failure.
    #[snafu(display("Scan error: {source}"))]
    Scan {
        /// Underlying scan error.
        source: ScanError,
    },

    /// Scanning a chunk that has no segment file yet.
    #[snafu(display("Chunk {chunk_id} is not compressed yet"))]
    ChunkNotCompressed {
        /// The chunk without a segment file.
        chunk_id: ChunkId,
    },

    /// Compressing a chunk twice.
    #[snafu(display("Chunk {chunk_id} is already compressed"))]
    ChunkAlreadyCompressed {
        /// The chunk that already has a segment file.
        chunk_id: ChunkId,
    },
}

/// A table store rooted at one location.
pub struct ChunkStore {
    location: TableLocation,
    catalog: Catalog,
}

impl ChunkStore {
    /// Create a fresh store at `location` and persist an empty catalog.
    pub async fn create(location: TableLocation) -> Result<Self, ChunkStoreError> {
        let catalog = Catalog::new();
        catalog.save(&location).await.context(CatalogSnafu)?;
        Ok(Self { location, catalog })
    }

    /// Open an existing store at `location`.
    pub async fn open(location: TableLocation) -> Result<Self, ChunkStoreError> {
        let catalog = Catalog::load(&location).await.context(CatalogSnafu)?;
        Ok(Self { location, catalog })
    }

    /// The persisted catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Register a table and persist the catalog.
    pub async fn create_table(
        &mut self,
        name: impl Into<String>,
        schema: RowSchema,
        time_column: impl Into<String>,
        chunk_interval: chrono::TimeDelta,
        compression: CompressionSettings,
    ) -> Result<TableId, ChunkStoreError> {
        let table_id = self
            .catalog
            .create_table(name, schema, time_column, chunk_interval, compression)
            .context(CatalogSnafu)?;
        self.catalog
            .save(&self.location)
            .await
            .context(CatalogSnafu)?;
        Ok(table_id)
    }

    /// Bulk-ingest rows into a table.
    ///
    /// Rows are routed to chunks by timestamp and appended to each chunk's
    /// staged-row file; newly created chunks and the updated staged-row
    /// counts are persisted to the catalog.
    pub async fn ingest_rows(
        &mut self,
        table_id: TableId,
        rows: impl IntoIterator<Item = Row>,
    ) -> Result<u64, ChunkStoreError> {
        let mut staged: HashMap<ChunkId, Vec<Row>> = HashMap::new();
        let mut pipeline = IngestPipeline::new(&mut self.catalog, &mut staged, table_id)
            .context(IngestSnafu)?;
        for row in rows {
            pipeline.ingest_row(row).context(IngestSnafu)?;
        }
        let ingested = pipeline.finish();

        let schema = self
            .catalog
            .table(table_id)
            .context(CatalogSnafu)?
            .meta
            .schema
            .clone();

        // merge each chunk's new rows with whatever is already staged, then
        // write all the staging files concurrently
        let mut pending = Vec::new();
        for (chunk_id, mut new_rows) in staged {
            let added = new_rows.len() as u64;
            let rel_path = layout::staging_file_path(table_id, chunk_id);

            let already_staged = self
                .catalog
                .chunk(table_id, chunk_id)
                .context(CatalogSnafu)?
                .staged_rows;
            let all_rows = if already_staged > 0 {
                let mut existing = read_row_file(&self.location, &rel_path, &schema)
                    .await
                    .context(FormatSnafu)?;
                existing.append(&mut new_rows);
                existing
            } else {
                new_rows
            };
            pending.push((chunk_id, added, rel_path, all_rows));
        }

        try_join_all(pending.iter().map(|(_, _, rel_path, all_rows)| {
            write_row_file(&self.location, rel_path, &schema, all_rows)
        }))
        .await
        .context(FormatSnafu)?;

        for (chunk_id, added, _, _) in pending {
            self.catalog
                .add_staged_rows(table_id, chunk_id, added)
                .context(CatalogSnafu)?;
        }

        self.catalog
            .save(&self.location)
            .await
            .context(CatalogSnafu)?;
        info!("ingested {ingested} rows into table {table_id}");
        Ok(ingested)
    }

    /// Number of staged (uncompressed) rows for a chunk.
    pub fn staged_row_count(&self, table_id: TableId, chunk_id: ChunkId) -> u64 {
        self.catalog
            .chunk(table_id, chunk_id)
            .map(|c| c.staged_rows)
            .unwrap_or(0)
    }

    /// Compress a chunk: drain its staged rows into segment rows, write the
    /// chunk's segment Parquet file and record it in the catalog. Returns
    /// the number of segments written.
    pub async fn compress_chunk(
        &mut self,
        table_id: TableId,
        chunk_id: ChunkId,
    ) -> Result<usize, ChunkStoreError> {
        let chunk = self
            .catalog
            .chunk(table_id, chunk_id)
            .context(CatalogSnafu)?;
        ensure!(
            !chunk.is_compressed(),
            ChunkAlreadyCompressedSnafu { chunk_id }
        );
        let staged_rows = chunk.staged_rows;

        let entry = self.catalog.table(table_id).context(CatalogSnafu)?;
        let schema = entry.meta.schema.clone();
        let settings = entry.compression.clone();

        let staging_path = layout::staging_file_path(table_id, chunk_id);
        let rows = if staged_rows > 0 {
            read_row_file(&self.location, &staging_path, &schema)
                .await
                .context(FormatSnafu)?
        } else {
            Vec::new()
        };
        let row_count = rows.len();

        let segments = build_segment_rows(&schema, &settings, rows).context(SegmentBuildSnafu)?;
        let seg_layout = segment_layout(&schema, &settings);

        let rel_path = layout::segment_file_path(table_id, chunk_id);
        write_segment_file(&self.location, &rel_path, &seg_layout, &segments)
            .await
            .context(FormatSnafu)?;

        self.catalog
            .mark_chunk_compressed(table_id, chunk_id, rel_path.to_string_lossy())
            .context(CatalogSnafu)?;
        self.catalog
            .save(&self.location)
            .await
            .context(CatalogSnafu)?;
        storage::remove_file(&self.location, &staging_path)
            .await
            .context(StorageSnafu)?;

        info!(
            "compressed chunk {chunk_id} of table {table_id}: {row_count} rows into {} segments",
            segments.len()
        );
        Ok(segments.len())
    }

    /// Open a scan over a compressed chunk.
    ///
    /// The planner decides from `requested_order` whether the segments can
    /// be merge-appended; `needed_columns` optionally restricts which
    /// columns are decompressed.
    pub async fn scan_chunk(
        &self,
        table_id: TableId,
        chunk_id: ChunkId,
        requested_order: &[OrderByRequest],
        needed_columns: Option<&[String]>,
        options: ExecOptions,
    ) -> Result<DecompressScan, ChunkStoreError> {
        let entry = self.catalog.table(table_id).context(CatalogSnafu)?;
        let chunk = self
            .catalog
            .chunk(table_id, chunk_id)
            .context(CatalogSnafu)?;
        let segment_path = chunk
            .segment_path
            .as_ref()
            .context(ChunkNotCompressedSnafu { chunk_id })?;

        let config = plan_chunk_scan(
            table_id,
            chunk_id,
            &entry.meta.schema,
            &entry.compression,
            requested_order,
            needed_columns,
        )
        .context(PlanSnafu)?;

        let seg_layout = segment_layout(&entry.meta.schema, &entry.compression);
        let child =
            ParquetSegmentScan::open(&self.location, Path::new(segment_path), &seg_layout)
                .await
                .context(FormatSnafu)?;

        DecompressScan::begin(
            config,
            entry.meta.schema.clone(),
            &entry.compression,
            Box::new(child),
            options,
        )
        .context(ScanSnafu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnCompression;
    use crate::value::{Datum, Field, ValueType};
    use chrono::TimeDelta;
    use tempfile::TempDir;

    fn schema() -> RowSchema {
        RowSchema::new(vec![
            Field::new("ts", ValueType::Timestamp),
            Field::new("reading", ValueType::Float64),
        ])
    }

    fn settings() -> CompressionSettings {
        CompressionSettings::new(vec![ColumnCompression::orderby("ts", 1, true, false)])
    }

    fn row(ts: i64, reading: f64) -> Row {
        vec![Some(Datum::Timestamp(ts)), Some(Datum::Float64(reading))]
    }

    #[tokio::test]
    async fn create_then_open_round_trips_the_catalog() {
        let tmp = TempDir::new().expect("tempdir");
        let location = TableLocation::local(tmp.path());

        let table_id = {
            let mut store = ChunkStore::create(location.clone()).await.expect("create");
            store
                .create_table("metrics", schema(), "ts", TimeDelta::hours(1), settings())
                .await
                .expect("table")
        };

        let store = ChunkStore::open(location).await.expect("open");
        assert_eq!(
            store.catalog().table(table_id).expect("table").meta.name,
            "metrics"
        );
    }

    #[tokio::test]
    async fn staged_rows_survive_a_reopen() {
        let tmp = TempDir::new().expect("tempdir");
        let location = TableLocation::local(tmp.path());

        let (table_id, chunk_id) = {
            let mut store = ChunkStore::create(location.clone()).await.expect("create");
            let table_id = store
                .create_table("metrics", schema(), "ts", TimeDelta::hours(1), settings())
                .await
                .expect("table");
            store
                .ingest_rows(table_id, vec![row(1, 1.0), row(2, 2.0)])
                .await
                .expect("first ingest");
            let chunk_id = store.catalog().chunks(table_id).expect("chunks")[0].chunk_id;
            (table_id, chunk_id)
        };

        // second process: more rows into the same chunk, then compress
        let mut store = ChunkStore::open(location).await.expect("reopen");
        assert_eq!(store.staged_row_count(table_id, chunk_id), 2);
        store
            .ingest_rows(table_id, vec![row(3, 3.0)])
            .await
            .expect("second ingest");
        assert_eq!(store.staged_row_count(table_id, chunk_id), 3);

        store
            .compress_chunk(table_id, chunk_id)
            .await
            .expect("compress");
        assert_eq!(store.staged_row_count(table_id, chunk_id), 0);

        let mut scan = store
            .scan_chunk(table_id, chunk_id, &[], None, ExecOptions::default())
            .await
            .expect("scan");
        let mut rows_out = 0;
        while scan.next_row().expect("next").is_some() {
            rows_out += 1;
        }
        assert_eq!(rows_out, 3, "both ingests made it into the segment file");
    }

    #[tokio::test]
    async fn scanning_an_uncompressed_chunk_errors() {
        let tmp = TempDir::new().expect("tempdir");
        let location = TableLocation::local(tmp.path());
        let mut store = ChunkStore::create(location).await.expect("create");
        let table_id = store
            .create_table("metrics", schema(), "ts", TimeDelta::hours(1), settings())
            .await
            .expect("table");

        store
            .ingest_rows(table_id, vec![row(1, 1.0)])
            .await
            .expect("ingest");
        let chunk_id = store.catalog().chunks(table_id).expect("chunks")[0].chunk_id;

        let err = store
            .scan_chunk(table_id, chunk_id, &[], None, ExecOptions::default())
            .await
            .expect_err("not compressed");
        assert!(matches!(err, ChunkStoreError::ChunkNotCompressed { .. }));
    }

    #[tokio::test]
    async fn double_compression_is_rejected() {
        let tmp = TempDir::new().expect("tempdir");
        let location = TableLocation::local(tmp.path());
        let mut store = ChunkStore::create(location).await.expect("create");
        let table_id = store
            .create_table("metrics", schema(), "ts", TimeDelta::hours(1), settings())
            .await
            .expect("table");
        store
            .ingest_rows(table_id, vec![row(1, 1.0)])
            .await
            .expect("ingest");
        let chunk_id = store.catalog().chunks(table_id).expect("chunks")[0].chunk_id;

        store
            .compress_chunk(table_id, chunk_id)
            .await
            .expect("compress");
        let err = store
            .compress_chunk(table_id, chunk_id)
            .await
            .expect_err("second compress");
        assert!(matches!(err, ChunkStoreError::ChunkAlreadyCompressed { .. }));
    }

    #[tokio::test]
    async fn ingest_into_a_compressed_chunk_is_rejected() {
        let tmp = TempDir::new().expect("tempdir");
        let location = TableLocation::local(tmp.path());
        let mut store = ChunkStore::create(location).await.expect("create");
        let table_id = store
            .create_table("metrics", schema(), "ts", TimeDelta::hours(1), settings())
            .await
            .expect("table");
        store
            .ingest_rows(table_id, vec![row(1, 1.0)])
            .await
            .expect("ingest");
        let chunk_id = store.catalog().chunks(table_id).expect("chunks")[0].chunk_id;
        store
            .compress_chunk(table_id, chunk_id)
            .await
            .expect("compress");

        let err = store
            .ingest_rows(table_id, vec![row(2, 2.0)])
            .await
            .expect_err("chunk is frozen");
        assert!(matches!(
            err,
            ChunkStoreError::Ingest {
                source: IngestError::ChunkCompressed { .. }
            }
        ));
    }
}
