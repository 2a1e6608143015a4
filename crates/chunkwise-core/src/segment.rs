//! Segment model and the producer-side segment builder.
//!
//! A compressed chunk is a table of segment rows. Each segment row packs up
//! to [`BATCH_MAX_ROWS`] source rows: segment-by columns keep their native
//! value (constant across the whole segment), every other column becomes one
//! compressed stream, and two metadata columns carry the row count and a
//! sequence number ordering the segments of one segment-by group.
//!
//! The builder here is what ingest and tests use to produce segment rows;
//! the scan side only ever consumes them.

use snafu::prelude::*;

use crate::catalog::CompressionSettings;
use crate::compression::{CompressionError, compress_column, default_algorithm};
use crate::scan::sort::{SortDirection, SortKey, compare_rows};
use crate::value::{Cell, Datum, Row, RowSchema, ValueType};

/// Maximum number of source rows folded into one segment row.
pub const BATCH_MAX_ROWS: usize = 1000;

/// Gap between the sequence numbers of consecutive segments in a group,
/// leaving room to splice segments in later without renumbering.
pub const SEQUENCE_NUM_GAP: i64 = 10;

/// Name of the row-count metadata column in segment files.
pub const COUNT_METADATA_COLUMN: &str = "_meta_count";

/// Name of the sequence-number metadata column in segment files.
pub const SEQUENCE_NUM_METADATA_COLUMN: &str = "_meta_sequence_num";

/// Role of one column of the segment-row layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentColumnKind {
    /// Constant across the segment, stored with its native type.
    SegmentBy,
    /// Compressed stream, stored as binary.
    Compressed,
    /// Row count of the segment.
    Count,
    /// Sequence number within the segment-by group.
    SequenceNum,
}

/// One column of the segment-row layout.
#[derive(Debug, Clone)]
pub struct SegmentColumn {
    /// Column name: the source column's name, or a `_meta_*` name.
    pub name: String,
    /// Role in the layout.
    pub kind: SegmentColumnKind,
    /// Logical type of the decoded values (`Int64` for metadata columns).
    pub value_type: ValueType,
}

/// The segment-row layout for a table: all schema columns in order, each
/// classified via the compression settings, followed by the two metadata
/// columns.
pub fn segment_layout(schema: &RowSchema, settings: &CompressionSettings) -> Vec<SegmentColumn> {
    let mut layout: Vec<SegmentColumn> = schema
        .fields()
        .iter()
        .map(|field| {
            let kind = if settings.is_segmentby(&field.name) {
                SegmentColumnKind::SegmentBy
            } else {
                SegmentColumnKind::Compressed
            };
            SegmentColumn {
                name: field.name.clone(),
                kind,
                value_type: field.value_type,
            }
        })
        .collect();
    layout.push(SegmentColumn {
        name: COUNT_METADATA_COLUMN.to_string(),
        kind: SegmentColumnKind::Count,
        value_type: ValueType::Int64,
    });
    layout.push(SegmentColumn {
        name: SEQUENCE_NUM_METADATA_COLUMN.to_string(),
        kind: SegmentColumnKind::SequenceNum,
        value_type: ValueType::Int64,
    });
    layout
}

/// One row of a compressed chunk, in segment-row layout.
#[derive(Debug, Clone)]
pub struct SegmentRow {
    /// Cells laid out per [`segment_layout`].
    pub cells: Vec<Cell>,
}

impl SegmentRow {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    /// Cell at a 1-based attribute number, `None` if out of range.
    pub fn attr(&self, attno: usize) -> Option<&Cell> {
        if attno == 0 {
            return None;
        }
        self.cells.get(attno - 1)
    }
}

/// Errors from building segment rows.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SegmentBuildError {
    /// A source row has the wrong number of cells for the schema.
    #[snafu(display("Row has {got} cells, schema expects {expected}"))]
    RowWidthMismatch {
        /// Schema width.
        expected: usize,
        /// Offending row width.
        got: usize,
    },

    /// Compressing one column of one segment failed.
    #[snafu(display("Failed to compress column {column}: {source}"))]
    Compress {
        /// The column being compressed.
        column: String,
        /// Underlying codec error.
        source: CompressionError,
    },
}

/// Sort keys ordering source rows for segmentation: segment-by columns
/// first, then the compression order-by.
fn build_order(schema: &RowSchema, settings: &CompressionSettings) -> Vec<SortKey> {
    let mut keys = Vec::new();
    for col in settings.segmentby_columns() {
        if let Some(offset) = schema.index_of(&col.column) {
            keys.push(SortKey {
                attno: offset + 1,
                direction: SortDirection::Asc,
                nulls_first: false,
            });
        }
    }
    for col in settings.orderby_columns() {
        if let Some(offset) = schema.index_of(&col.column) {
            keys.push(SortKey {
                attno: offset + 1,
                direction: if col.orderby_asc {
                    SortDirection::Asc
                } else {
                    SortDirection::Desc
                },
                nulls_first: col.orderby_nulls_first,
            });
        }
    }
    keys
}

fn segmentby_key_equal(a: &Row, b: &Row, segmentby_offsets: &[usize]) -> bool {
    segmentby_offsets.iter().all(|&off| match (&a[off], &b[off]) {
        (None, None) => true,
        (Some(x), Some(y)) => x.total_cmp(y).is_eq(),
        _ => false,
    })
}

/// Fold source rows into segment rows.
///
/// Rows are sorted by segment-by values and the compression order-by, split
/// into runs of equal segment-by values, and each run is cut into segments
/// of at most [`BATCH_MAX_ROWS`] rows. Column streams use the default
/// algorithm for their type.
pub fn build_segment_rows(
    schema: &RowSchema,
    settings: &CompressionSettings,
    mut rows: Vec<Row>,
) -> Result<Vec<SegmentRow>, SegmentBuildError> {
    let width = schema.width();
    for row in &rows {
        ensure!(
            row.len() == width,
            RowWidthMismatchSnafu {
                expected: width,
                got: row.len(),
            }
        );
    }

    let order = build_order(schema, settings);
    rows.sort_by(|a, b| compare_rows(a, b, &order));

    let segmentby_offsets: Vec<usize> = settings
        .segmentby_columns()
        .iter()
        .filter_map(|c| schema.index_of(&c.column))
        .collect();
    let layout = segment_layout(schema, settings);

    let mut segments = Vec::new();
    let mut start = 0;
    while start < rows.len() {
        // one segment-by group: [start, group_end)
        let mut group_end = start + 1;
        while group_end < rows.len()
            && segmentby_key_equal(&rows[start], &rows[group_end], &segmentby_offsets)
        {
            group_end += 1;
        }

        let mut sequence = SEQUENCE_NUM_GAP;
        for batch in rows[start..group_end].chunks(BATCH_MAX_ROWS) {
            segments.push(build_one_segment(&layout, batch, sequence)?);
            sequence += SEQUENCE_NUM_GAP;
        }
        start = group_end;
    }
    Ok(segments)
}

fn build_one_segment(
    layout: &[SegmentColumn],
    batch: &[Row],
    sequence: i64,
) -> Result<SegmentRow, SegmentBuildError> {
    let mut cells = Vec::with_capacity(layout.len());
    // the first schema-width layout entries are 1:1 with schema columns
    for (offset, column) in layout.iter().enumerate() {
        let cell = match column.kind {
            SegmentColumnKind::SegmentBy => batch[0][offset].clone(),
            SegmentColumnKind::Compressed => {
                let column_cells: Vec<Cell> = batch.iter().map(|r| r[offset].clone()).collect();
                let stream = compress_column(
                    default_algorithm(column.value_type),
                    column.value_type,
                    &column_cells,
                )
                .context(CompressSnafu {
                    column: column.name.clone(),
                })?;
                Some(Datum::Bytes(stream))
            }
            SegmentColumnKind::Count => Some(Datum::Int64(batch.len() as i64)),
            SegmentColumnKind::SequenceNum => Some(Datum::Int64(sequence)),
        };
        cells.push(cell);
    }
    Ok(SegmentRow::new(cells))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnCompression;
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

    fn row(ts: i64, device: &str, reading: f64) -> Row {
        vec![
            Some(Datum::Timestamp(ts)),
            Some(Datum::Text(device.into())),
            Some(Datum::Float64(reading)),
        ]
    }

    fn count_of(segment: &SegmentRow) -> i64 {
        match segment.attr(4) {
            Some(Some(Datum::Int64(n))) => *n,
            other => panic!("bad count cell: {other:?}"),
        }
    }

    fn sequence_of(segment: &SegmentRow) -> i64 {
        match segment.attr(5) {
            Some(Some(Datum::Int64(n))) => *n,
            other => panic!("bad sequence cell: {other:?}"),
        }
    }

    #[test]
    fn layout_classifies_columns_and_appends_metadata() {
        let layout = segment_layout(&schema(), &settings());
        let kinds: Vec<_> = layout.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SegmentColumnKind::Compressed,
                SegmentColumnKind::SegmentBy,
                SegmentColumnKind::Compressed,
                SegmentColumnKind::Count,
                SegmentColumnKind::SequenceNum,
            ]
        );
        assert_eq!(layout[3].name, COUNT_METADATA_COLUMN);
        assert_eq!(layout[4].name, SEQUENCE_NUM_METADATA_COLUMN);
    }

    #[test]
    fn rows_group_by_segmentby_value() {
        let rows = vec![
            row(3, "b", 1.0),
            row(1, "a", 2.0),
            row(2, "b", 3.0),
            row(4, "a", 4.0),
        ];
        let segments = build_segment_rows(&schema(), &settings(), rows).expect("build");
        assert_eq!(segments.len(), 2, "one segment per device");
        assert_eq!(count_of(&segments[0]), 2);
        assert_eq!(count_of(&segments[1]), 2);
        // group "a" sorts first
        assert_eq!(
            segments[0].attr(2),
            Some(&Some(Datum::Text("a".into())))
        );
    }

    #[test]
    fn oversized_groups_split_with_sequence_gap() {
        let rows: Vec<Row> = (0..(BATCH_MAX_ROWS as i64 + 5))
            .map(|i| row(i, "only", i as f64))
            .collect();
        let segments = build_segment_rows(&schema(), &settings(), rows).expect("build");
        assert_eq!(segments.len(), 2);
        assert_eq!(count_of(&segments[0]), BATCH_MAX_ROWS as i64);
        assert_eq!(count_of(&segments[1]), 5);
        assert_eq!(sequence_of(&segments[0]), SEQUENCE_NUM_GAP);
        assert_eq!(sequence_of(&segments[1]), 2 * SEQUENCE_NUM_GAP);
    }

    #[test]
    fn width_mismatch_is_rejected() {
        let err = build_segment_rows(&schema(), &settings(), vec![vec![None, None]])
            .expect_err("narrow row");
        assert!(matches!(err, SegmentBuildError::RowWidthMismatch { expected: 3, got: 2 }));
    }

    #[test]
    fn empty_input_builds_no_segments() {
        let segments = build_segment_rows(&schema(), &settings(), Vec::new()).expect("build");
        assert!(segments.is_empty());
    }
}
