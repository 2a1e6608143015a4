//! Parquet segment files: one file per compressed chunk.

use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch};
use arrow::datatypes::{DataType, Field as ArrowField, Schema, SchemaRef};
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use super::convert::{arrow_data_type, arrow_schema, array_to_cells, batch_to_rows, cells_to_array};
use super::{ArrowSnafu, FormatError, ParquetSnafu, StorageSnafu, WidthMismatchSnafu};
use crate::scan::{ScanError, SegmentScan};
use crate::segment::{SegmentColumn, SegmentColumnKind, SegmentRow};
use crate::storage::{self, TableLocation};
use crate::value::{Cell, Row, RowSchema, ValueType};
use snafu::prelude::*;

/// The value type a segment column stores on disk: binary for compressed
/// streams, 64-bit integers for the metadata columns, native otherwise.
fn stored_value_type(column: &SegmentColumn) -> ValueType {
    match column.kind {
        SegmentColumnKind::SegmentBy => column.value_type,
        SegmentColumnKind::Compressed => ValueType::Bytes,
        SegmentColumnKind::Count | SegmentColumnKind::SequenceNum => ValueType::Int64,
    }
}

/// Arrow schema of a segment file.
pub fn segment_arrow_schema(layout: &[SegmentColumn]) -> SchemaRef {
    let fields: Vec<ArrowField> = layout
        .iter()
        .map(|column| {
            let data_type = match column.kind {
                SegmentColumnKind::Compressed => DataType::Binary,
                _ => arrow_data_type(stored_value_type(column)),
            };
            ArrowField::new(&column.name, data_type, true)
        })
        .collect();
    Arc::new(Schema::new(fields))
}

/// Write segment rows to a Parquet file under `location`, atomically.
pub async fn write_segment_file(
    location: &TableLocation,
    rel_path: &Path,
    layout: &[SegmentColumn],
    segments: &[SegmentRow],
) -> Result<(), FormatError> {
    let schema = segment_arrow_schema(layout);

    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(layout.len());
    for (i, column) in layout.iter().enumerate() {
        let cells: Vec<Cell> = segments
            .iter()
            .map(|segment| segment.cells.get(i).cloned().unwrap_or(None))
            .collect();
        arrays.push(cells_to_array(stored_value_type(column), &cells, &column.name)?);
    }
    let batch = RecordBatch::try_new(schema.clone(), arrays).context(ArrowSnafu)?;

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, schema, None).context(ParquetSnafu)?;
    writer.write(&batch).context(ParquetSnafu)?;
    writer.close().context(ParquetSnafu)?;

    storage::write_atomic(location, rel_path, &buffer)
        .await
        .context(StorageSnafu)
}

/// Read all segment rows of a chunk's Parquet file.
pub async fn read_segment_rows(
    location: &TableLocation,
    rel_path: &Path,
    layout: &[SegmentColumn],
) -> Result<Vec<SegmentRow>, FormatError> {
    let bytes = storage::read_all_bytes(location, rel_path)
        .await
        .context(StorageSnafu)?;

    let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))
        .context(ParquetSnafu)?
        .build()
        .context(ParquetSnafu)?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.context(ArrowSnafu)?;
        ensure!(
            batch.num_columns() == layout.len(),
            WidthMismatchSnafu {
                expected: layout.len(),
                got: batch.num_columns(),
            }
        );

        let mut columns = Vec::with_capacity(layout.len());
        for (i, column) in layout.iter().enumerate() {
            columns.push(array_to_cells(
                stored_value_type(column),
                batch.column(i),
                &column.name,
            )?);
        }
        for i in 0..batch.num_rows() {
            rows.push(SegmentRow::new(
                columns.iter().map(|col| col[i].clone()).collect(),
            ));
        }
    }
    Ok(rows)
}

/// Write plain (uncompressed) rows to a Parquet file. Used for the staged
/// rows of a chunk awaiting compression.
pub async fn write_row_file(
    location: &TableLocation,
    rel_path: &Path,
    schema: &RowSchema,
    rows: &[Row],
) -> Result<(), FormatError> {
    let arrow = arrow_schema(schema);

    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.width());
    for (i, field) in schema.fields().iter().enumerate() {
        let cells: Vec<Cell> = rows
            .iter()
            .map(|row| row.get(i).cloned().unwrap_or(None))
            .collect();
        arrays.push(cells_to_array(field.value_type, &cells, &field.name)?);
    }
    let batch = RecordBatch::try_new(arrow.clone(), arrays).context(ArrowSnafu)?;

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, arrow, None).context(ParquetSnafu)?;
    writer.write(&batch).context(ParquetSnafu)?;
    writer.close().context(ParquetSnafu)?;

    storage::write_atomic(location, rel_path, &buffer)
        .await
        .context(StorageSnafu)
}

/// Read a plain-row Parquet file back.
pub async fn read_row_file(
    location: &TableLocation,
    rel_path: &Path,
    schema: &RowSchema,
) -> Result<Vec<Row>, FormatError> {
    let bytes = storage::read_all_bytes(location, rel_path)
        .await
        .context(StorageSnafu)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))
        .context(ParquetSnafu)?
        .build()
        .context(ParquetSnafu)?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.context(ArrowSnafu)?;
        rows.extend(batch_to_rows(schema, &batch)?);
    }
    Ok(rows)
}

/// Child scan over a chunk's Parquet segment file.
///
/// The file is decoded eagerly on open (segment rows are few: each stands
/// for up to a thousand source rows), so the pull side never does I/O and
/// never fails.
pub struct ParquetSegmentScan {
    rows: Vec<SegmentRow>,
    pos: usize,
}

impl ParquetSegmentScan {
    /// Open the segment file for a chunk.
    pub async fn open(
        location: &TableLocation,
        rel_path: &Path,
        layout: &[SegmentColumn],
    ) -> Result<Self, FormatError> {
        let rows = read_segment_rows(location, rel_path, layout).await?;
        Ok(Self { rows, pos: 0 })
    }

    /// Number of segment rows in the file.
    pub fn segment_count(&self) -> usize {
        self.rows.len()
    }
}

impl SegmentScan for ParquetSegmentScan {
    fn next_segment(&mut self) -> Result<Option<SegmentRow>, ScanError> {
        let row = self.rows.get(self.pos).cloned();
        if row.is_some() {
            self.pos += 1;
        }
        Ok(row)
    }

    fn rescan(&mut self) -> Result<(), ScanError> {
        self.pos = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnCompression, CompressionSettings};
    use crate::segment::{build_segment_rows, segment_layout};
    use crate::value::{Datum, Field, Row, RowSchema};
    use tempfile::TempDir;

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

    fn rows() -> Vec<Row> {
        (0..10i64)
            .map(|i| {
                vec![
                    Some(Datum::Timestamp(i * 1_000)),
                    Some(Datum::Text(if i % 2 == 0 { "even".into() } else { "odd".into() })),
                    Some(Datum::Float64(i as f64)),
                ]
            })
            .collect()
    }

    #[tokio::test]
    async fn segment_file_round_trip() {
        let tmp = TempDir::new().expect("tempdir");
        let location = TableLocation::local(tmp.path());
        let layout = segment_layout(&schema(), &settings());
        let segments = build_segment_rows(&schema(), &settings(), rows()).expect("segments");

        let rel = Path::new("chunks/t0/c0.parquet");
        write_segment_file(&location, rel, &layout, &segments)
            .await
            .expect("write");

        let back = read_segment_rows(&location, rel, &layout).await.expect("read");
        assert_eq!(back.len(), segments.len());
        for (a, b) in segments.iter().zip(&back) {
            assert_eq!(a.cells, b.cells);
        }
    }

    #[tokio::test]
    async fn parquet_scan_pulls_and_rescans() {
        let tmp = TempDir::new().expect("tempdir");
        let location = TableLocation::local(tmp.path());
        let layout = segment_layout(&schema(), &settings());
        let segments = build_segment_rows(&schema(), &settings(), rows()).expect("segments");

        let rel = Path::new("chunks/t0/c1.parquet");
        write_segment_file(&location, rel, &layout, &segments)
            .await
            .expect("write");

        let mut scan = ParquetSegmentScan::open(&location, rel, &layout)
            .await
            .expect("open");
        assert_eq!(scan.segment_count(), segments.len());

        let mut pulled = 0;
        while scan.next_segment().expect("pull").is_some() {
            pulled += 1;
        }
        assert_eq!(pulled, segments.len());
        assert!(scan.next_segment().expect("past end").is_none());

        scan.rescan().expect("rescan");
        assert!(scan.next_segment().expect("after rescan").is_some());
    }

    #[tokio::test]
    async fn row_file_round_trip() {
        let tmp = TempDir::new().expect("tempdir");
        let location = TableLocation::local(tmp.path());
        let rows = rows();

        let rel = Path::new("staging/t0/c0.parquet");
        write_row_file(&location, rel, &schema(), &rows)
            .await
            .expect("write");
        let back = read_row_file(&location, rel, &schema()).await.expect("read");
        assert_eq!(back, rows);
    }

    #[tokio::test]
    async fn missing_file_is_a_storage_error() {
        let tmp = TempDir::new().expect("tempdir");
        let location = TableLocation::local(tmp.path());
        let layout = segment_layout(&schema(), &settings());
        let err = read_segment_rows(&location, Path::new("absent.parquet"), &layout)
            .await
            .expect_err("missing");
        assert!(matches!(err, FormatError::Storage { .. }));
    }
}
