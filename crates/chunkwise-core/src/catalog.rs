//! In-memory catalog of tables, chunks and compression settings.
//!
//! The catalog is the single source of truth the planner and the scan
//! operator consult: which chunks a table has, which time range each chunk
//! covers, where its compressed segment file lives, and how each column is
//! treated under compression (segment-by constant versus compressed stream,
//! plus the compression order). It serializes to JSON and persists through
//! the [`crate::storage`] layer with an atomic write.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::layout;
use crate::storage::{self, StorageError, TableLocation};
use crate::value::{RowSchema, ValueType};

/// Identifier of a table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TableId(pub u32);

/// Identifier of a chunk, unique across the catalog.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ChunkId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Half-open time range `[start, end)` in epoch microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRange {
    /// Inclusive start.
    pub start_micros: i64,
    /// Exclusive end.
    pub end_micros: i64,
}

impl ChunkRange {
    /// Whether a timestamp falls inside this range.
    pub fn contains(&self, ts_micros: i64) -> bool {
        ts_micros >= self.start_micros && ts_micros < self.end_micros
    }

    /// Range start as a UTC datetime, if representable.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.start_micros)
    }

    /// Range end as a UTC datetime, if representable.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.end_micros)
    }
}

/// Catalog record of one chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMeta {
    /// Chunk id.
    pub chunk_id: ChunkId,
    /// Time range this chunk covers.
    pub range: ChunkRange,
    /// Relative path of the compressed segment file, once the chunk has been
    /// compressed. `None` means the chunk only has staged, uncompressed rows.
    pub segment_path: Option<String>,
    /// Number of uncompressed rows staged for this chunk.
    #[serde(default)]
    pub staged_rows: u64,
}

impl ChunkMeta {
    /// Whether the chunk has a compressed segment file.
    pub fn is_compressed(&self) -> bool {
        self.segment_path.is_some()
    }
}

/// Compression treatment of a single column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnCompression {
    /// Column name in the table schema.
    pub column: String,
    /// 1-based position among segment-by columns, or `None` if the column is
    /// stored as a compressed stream.
    pub segmentby_index: Option<u16>,
    /// 1-based position in the compression order-by, or `None` if the column
    /// does not participate in it.
    pub orderby_index: Option<u16>,
    /// Ascending order within the segment (only meaningful with an
    /// order-by index).
    pub orderby_asc: bool,
    /// NULLS FIRST within the segment (only meaningful with an order-by
    /// index).
    pub orderby_nulls_first: bool,
}

impl ColumnCompression {
    /// A plain compressed column with no role in segment-by or order-by.
    pub fn compressed(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            segmentby_index: None,
            orderby_index: None,
            orderby_asc: true,
            orderby_nulls_first: false,
        }
    }

    /// A segment-by column at the given 1-based position.
    pub fn segmentby(column: impl Into<String>, index: u16) -> Self {
        Self {
            segmentby_index: Some(index),
            ..Self::compressed(column)
        }
    }

    /// A compressed column participating in the compression order-by.
    pub fn orderby(column: impl Into<String>, index: u16, asc: bool, nulls_first: bool) -> Self {
        Self {
            orderby_index: Some(index),
            orderby_asc: asc,
            orderby_nulls_first: nulls_first,
            ..Self::compressed(column)
        }
    }
}

/// Per-table compression settings: one entry per column that has an explicit
/// role. Columns without an entry are plain compressed streams.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompressionSettings {
    /// Explicitly configured columns.
    pub columns: Vec<ColumnCompression>,
}

impl CompressionSettings {
    pub fn new(columns: Vec<ColumnCompression>) -> Self {
        Self { columns }
    }

    /// Settings entry for a column name, if any.
    pub fn column(&self, name: &str) -> Option<&ColumnCompression> {
        self.columns.iter().find(|c| c.column == name)
    }

    /// Whether the named column is a segment-by column. Columns without an
    /// entry default to compressed.
    pub fn is_segmentby(&self, name: &str) -> bool {
        self.column(name)
            .is_some_and(|c| c.segmentby_index.is_some())
    }

    /// Segment-by columns ordered by their segment-by index.
    pub fn segmentby_columns(&self) -> Vec<&ColumnCompression> {
        let mut cols: Vec<_> = self
            .columns
            .iter()
            .filter(|c| c.segmentby_index.is_some())
            .collect();
        cols.sort_by_key(|c| c.segmentby_index);
        cols
    }

    /// Order-by columns ordered by their order-by index.
    pub fn orderby_columns(&self) -> Vec<&ColumnCompression> {
        let mut cols: Vec<_> = self
            .columns
            .iter()
            .filter(|c| c.orderby_index.is_some())
            .collect();
        cols.sort_by_key(|c| c.orderby_index);
        cols
    }

    fn validate(&self, schema: &RowSchema) -> Result<(), CatalogError> {
        for col in &self.columns {
            ensure!(
                schema.index_of(&col.column).is_some(),
                UnknownCompressionColumnSnafu {
                    column: col.column.clone(),
                }
            );
            ensure!(
                !(col.segmentby_index.is_some() && col.orderby_index.is_some()),
                SegmentbyInOrderbySnafu {
                    column: col.column.clone(),
                }
            );
        }
        Ok(())
    }
}

/// Catalog record of one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    /// Table id.
    pub table_id: TableId,
    /// Table name, unique within the catalog.
    pub name: String,
    /// Uncompressed row schema.
    pub schema: RowSchema,
    /// Name of the partitioning time column.
    pub time_column: String,
    /// Width of each chunk in microseconds.
    pub chunk_interval_micros: i64,
}

/// A table with its compression settings and chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableEntry {
    /// Table metadata.
    pub meta: TableMeta,
    /// Compression settings.
    pub compression: CompressionSettings,
    /// Chunks keyed by chunk id.
    pub chunks: BTreeMap<u32, ChunkMeta>,
}

/// Errors from catalog operations and persistence.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CatalogError {
    /// A table with this name already exists.
    #[snafu(display("Table {name} already exists"))]
    DuplicateTable {
        /// The duplicate name.
        name: String,
    },

    /// The schema repeats a column name.
    #[snafu(display("Duplicate column {column} in table schema"))]
    DuplicateColumn {
        /// The repeated column name.
        column: String,
    },

    /// Lookup by table id failed.
    #[snafu(display("Unknown table id {table_id}"))]
    UnknownTable {
        /// The id that was not found.
        table_id: TableId,
    },

    /// Lookup by table name failed.
    #[snafu(display("Unknown table {name}"))]
    UnknownTableName {
        /// The name that was not found.
        name: String,
    },

    /// Lookup by chunk id failed.
    #[snafu(display("Unknown chunk id {chunk_id}"))]
    UnknownChunk {
        /// The id that was not found.
        chunk_id: ChunkId,
    },

    /// The declared time column is not part of the schema.
    #[snafu(display("Time column {column} is not in the table schema"))]
    MissingTimeColumn {
        /// The configured time column.
        column: String,
    },

    /// The declared time column is not a timestamp.
    #[snafu(display("Time column {column} must have type Timestamp"))]
    TimeColumnNotTimestamp {
        /// The configured time column.
        column: String,
    },

    /// Compression settings reference a column the schema does not have.
    #[snafu(display("Compression settings reference unknown column {column}"))]
    UnknownCompressionColumn {
        /// The unknown column.
        column: String,
    },

    /// A column cannot be both segment-by and order-by.
    #[snafu(display("Column {column} is both segment-by and order-by"))]
    SegmentbyInOrderby {
        /// The conflicting column.
        column: String,
    },

    /// Chunk interval must be a positive number of microseconds.
    #[snafu(display("Chunk interval must be positive"))]
    InvalidChunkInterval,

    /// Storage failure while loading or saving the catalog file.
    #[snafu(display("Storage error while accessing the catalog: {source}"))]
    Storage {
        /// Underlying storage error.
        source: StorageError,
    },

    /// The catalog file does not parse.
    #[snafu(display("Catalog file is not valid JSON: {source}"))]
    Serde {
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

/// The catalog root: all tables, plus id counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    tables: BTreeMap<u32, TableEntry>,
    next_table_id: u32,
    next_chunk_id: u32,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new table and return its id.
    pub fn create_table(
        &mut self,
        name: impl Into<String>,
        schema: RowSchema,
        time_column: impl Into<String>,
        chunk_interval: TimeDelta,
        compression: CompressionSettings,
    ) -> Result<TableId, CatalogError> {
        let name = name.into();
        let time_column = time_column.into();

        ensure!(
            !self.tables.values().any(|t| t.meta.name == name),
            DuplicateTableSnafu { name }
        );
        for (i, field) in schema.fields().iter().enumerate() {
            ensure!(
                schema.index_of(&field.name) == Some(i),
                DuplicateColumnSnafu {
                    column: field.name.clone(),
                }
            );
        }

        let time_offset = schema
            .index_of(&time_column)
            .context(MissingTimeColumnSnafu {
                column: time_column.clone(),
            })?;
        ensure!(
            schema.fields()[time_offset].value_type == ValueType::Timestamp,
            TimeColumnNotTimestampSnafu {
                column: time_column.clone(),
            }
        );

        let chunk_interval_micros = chunk_interval.num_microseconds().unwrap_or(0);
        ensure!(chunk_interval_micros > 0, InvalidChunkIntervalSnafu);

        compression.validate(&schema)?;

        let table_id = TableId(self.next_table_id);
        self.next_table_id += 1;
        self.tables.insert(
            table_id.0,
            TableEntry {
                meta: TableMeta {
                    table_id,
                    name,
                    schema,
                    time_column,
                    chunk_interval_micros,
                },
                compression,
                chunks: BTreeMap::new(),
            },
        );
        Ok(table_id)
    }

    /// Look up a table by id.
    pub fn table(&self, table_id: TableId) -> Result<&TableEntry, CatalogError> {
        self.tables
            .get(&table_id.0)
            .context(UnknownTableSnafu { table_id })
    }

    /// Look up a table by name.
    pub fn table_by_name(&self, name: &str) -> Result<&TableEntry, CatalogError> {
        self.tables
            .values()
            .find(|t| t.meta.name == name)
            .context(UnknownTableNameSnafu { name })
    }

    /// Compression settings for a table.
    pub fn compression_settings(
        &self,
        table_id: TableId,
    ) -> Result<&CompressionSettings, CatalogError> {
        Ok(&self.table(table_id)?.compression)
    }

    /// Look up a chunk of a table.
    pub fn chunk(&self, table_id: TableId, chunk_id: ChunkId) -> Result<&ChunkMeta, CatalogError> {
        self.table(table_id)?
            .chunks
            .get(&chunk_id.0)
            .context(UnknownChunkSnafu { chunk_id })
    }

    /// All chunks of a table in id order.
    pub fn chunks(&self, table_id: TableId) -> Result<Vec<&ChunkMeta>, CatalogError> {
        Ok(self.table(table_id)?.chunks.values().collect())
    }

    /// The chunk covering a timestamp, created aligned to the chunk interval
    /// if none exists yet.
    pub fn chunk_for_timestamp(
        &mut self,
        table_id: TableId,
        ts_micros: i64,
    ) -> Result<ChunkId, CatalogError> {
        let entry = self
            .tables
            .get_mut(&table_id.0)
            .context(UnknownTableSnafu { table_id })?;

        if let Some(chunk) = entry.chunks.values().find(|c| c.range.contains(ts_micros)) {
            return Ok(chunk.chunk_id);
        }

        let interval = entry.meta.chunk_interval_micros;
        let start = ts_micros - ts_micros.rem_euclid(interval);
        let chunk_id = ChunkId(self.next_chunk_id);
        self.next_chunk_id += 1;
        entry.chunks.insert(
            chunk_id.0,
            ChunkMeta {
                chunk_id,
                range: ChunkRange {
                    start_micros: start,
                    end_micros: start + interval,
                },
                segment_path: None,
                staged_rows: 0,
            },
        );
        Ok(chunk_id)
    }

    fn chunk_mut(
        &mut self,
        table_id: TableId,
        chunk_id: ChunkId,
    ) -> Result<&mut ChunkMeta, CatalogError> {
        self.tables
            .get_mut(&table_id.0)
            .context(UnknownTableSnafu { table_id })?
            .chunks
            .get_mut(&chunk_id.0)
            .context(UnknownChunkSnafu { chunk_id })
    }

    /// Bump the staged-row count of a chunk after an ingest flush.
    pub fn add_staged_rows(
        &mut self,
        table_id: TableId,
        chunk_id: ChunkId,
        rows: u64,
    ) -> Result<(), CatalogError> {
        self.chunk_mut(table_id, chunk_id)?.staged_rows += rows;
        Ok(())
    }

    /// Record the segment file written for a chunk; the staged rows it was
    /// built from are accounted as drained.
    pub fn mark_chunk_compressed(
        &mut self,
        table_id: TableId,
        chunk_id: ChunkId,
        segment_path: impl Into<String>,
    ) -> Result<(), CatalogError> {
        let chunk = self.chunk_mut(table_id, chunk_id)?;
        chunk.segment_path = Some(segment_path.into());
        chunk.staged_rows = 0;
        Ok(())
    }

    /// Load the catalog from its file under `location`.
    pub async fn load(location: &TableLocation) -> Result<Self, CatalogError> {
        let bytes = storage::read_all_bytes(location, Path::new(layout::CATALOG_FILE))
            .await
            .context(StorageSnafu)?;
        serde_json::from_slice(&bytes).context(SerdeSnafu)
    }

    /// Persist the catalog atomically under `location`.
    pub async fn save(&self, location: &TableLocation) -> Result<(), CatalogError> {
        let bytes = serde_json::to_vec_pretty(self).context(SerdeSnafu)?;
        storage::write_atomic(location, Path::new(layout::CATALOG_FILE), &bytes)
            .await
            .context(StorageSnafu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Field;

    fn schema() -> RowSchema {
        RowSchema::new(vec![
            Field::new("ts", ValueType::Timestamp),
            Field::new("device", ValueType::Text),
            Field::new("reading", ValueType::Float64),
        ])
    }

    fn settings() -> CompressionSettings {
        CompressionSettings::new(vec![
            ColumnCompression::segmentby("device", 1),
            ColumnCompression::orderby("ts", 1, true, false),
        ])
    }

    #[test]
    fn create_table_validates_time_column() {
        let mut catalog = Catalog::new();
        let err = catalog
            .create_table(
                "metrics",
                schema(),
                "device",
                TimeDelta::hours(1),
                CompressionSettings::default(),
            )
            .expect_err("text time column");
        assert!(matches!(err, CatalogError::TimeColumnNotTimestamp { .. }));
    }

    #[test]
    fn chunk_creation_aligns_to_interval() {
        let mut catalog = Catalog::new();
        let table_id = catalog
            .create_table("metrics", schema(), "ts", TimeDelta::hours(1), settings())
            .expect("create");

        let hour = 3_600_000_000i64;
        let a = catalog.chunk_for_timestamp(table_id, hour + 17).expect("chunk");
        let b = catalog
            .chunk_for_timestamp(table_id, 2 * hour - 1)
            .expect("chunk");
        let c = catalog.chunk_for_timestamp(table_id, -1).expect("chunk");

        assert_eq!(a, b, "same hour maps to the same chunk");
        assert_ne!(a, c);

        let meta = catalog.chunk(table_id, a).expect("meta");
        assert_eq!(meta.range.start_micros, hour);
        assert_eq!(meta.range.end_micros, 2 * hour);

        let neg = catalog.chunk(table_id, c).expect("meta");
        assert_eq!(neg.range.start_micros, -hour, "negative timestamps align down");
    }

    #[test]
    fn compression_settings_classify_columns() {
        let s = settings();
        assert!(s.is_segmentby("device"));
        assert!(!s.is_segmentby("ts"));
        assert!(!s.is_segmentby("reading"));
        let orderby = s.orderby_columns();
        assert_eq!(orderby.len(), 1);
        assert_eq!(orderby[0].column, "ts");
    }

    #[test]
    fn settings_reject_unknown_and_conflicting_columns() {
        let mut catalog = Catalog::new();
        let err = catalog
            .create_table(
                "metrics",
                schema(),
                "ts",
                TimeDelta::hours(1),
                CompressionSettings::new(vec![ColumnCompression::segmentby("nope", 1)]),
            )
            .expect_err("unknown column");
        assert!(matches!(err, CatalogError::UnknownCompressionColumn { .. }));

        let conflicting = ColumnCompression {
            orderby_index: Some(1),
            ..ColumnCompression::segmentby("device", 1)
        };
        let err = catalog
            .create_table(
                "metrics",
                schema(),
                "ts",
                TimeDelta::hours(1),
                CompressionSettings::new(vec![conflicting]),
            )
            .expect_err("conflict");
        assert!(matches!(err, CatalogError::SegmentbyInOrderby { .. }));
    }

    #[test]
    fn serde_round_trip() {
        let mut catalog = Catalog::new();
        let table_id = catalog
            .create_table("metrics", schema(), "ts", TimeDelta::hours(1), settings())
            .expect("create");
        catalog.chunk_for_timestamp(table_id, 0).expect("chunk");

        let json = serde_json::to_string(&catalog).expect("serialize");
        let back: Catalog = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.table(table_id).expect("table").meta.name, "metrics");
        assert_eq!(back.chunks(table_id).expect("chunks").len(), 1);
    }
}
