//! Planning of chunk scans over compressed chunks.
//!
//! Given the table's compression settings and what the query needs (columns
//! and a requested output order), this derives the immutable [`ScanConfig`]
//! the operator is built from: the decompression map, the scan direction and
//! whether the segments can be merge-appended so the requested ORDER BY
//! needs no sort node on top.
//!
//! Merge append is sound when the requested keys are a prefix of the
//! compression order-by with matching directions (segments are internally
//! sorted that way), or the exact inverse of one (scan the streams
//! backwards). Anything else falls back to a plain streaming scan, and
//! ordering is the caller's problem.

use snafu::prelude::*;

use crate::catalog::{ChunkId, CompressionSettings, TableId};
use crate::scan::ScanConfig;
use crate::scan::descriptor::{COUNT_COLUMN_ID, SEQUENCE_NUM_COLUMN_ID};
use crate::scan::sort::{SortDirection, SortKey};
use crate::segment::{SegmentColumnKind, segment_layout};
use crate::value::RowSchema;

/// One key of the query's requested output order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByRequest {
    /// Output column name.
    pub column: String,
    /// Requested direction.
    pub direction: SortDirection,
    /// Requested NULLS FIRST/LAST.
    pub nulls_first: bool,
}

/// Errors from scan planning.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PlanError {
    /// A requested order or projection column is not in the table schema.
    #[snafu(display("Unknown column {column} in scan request"))]
    UnknownColumn {
        /// The unknown column name.
        column: String,
    },
}

/// Plan a scan of one compressed chunk.
///
/// `needed_columns` restricts which columns are decompressed (`None` means
/// all); columns required by the requested order are always decoded, since
/// the merge comparator reads them from the output row.
pub fn plan_chunk_scan(
    table_id: TableId,
    chunk_id: ChunkId,
    schema: &RowSchema,
    settings: &CompressionSettings,
    requested_order: &[OrderByRequest],
    needed_columns: Option<&[String]>,
) -> Result<ScanConfig, PlanError> {
    for request in requested_order {
        ensure!(
            schema.index_of(&request.column).is_some(),
            UnknownColumnSnafu {
                column: request.column.clone(),
            }
        );
    }
    if let Some(needed) = needed_columns {
        for column in needed {
            ensure!(
                schema.index_of(column).is_some(),
                UnknownColumnSnafu {
                    column: column.clone(),
                }
            );
        }
    }

    let (merge_enabled, reverse) = merge_decision(settings, requested_order);

    let is_needed = |name: &str| -> bool {
        match needed_columns {
            None => true,
            Some(needed) => {
                needed.iter().any(|c| c == name)
                    || requested_order.iter().any(|r| r.column == name)
            }
        }
    };

    let decompression_map = segment_layout(schema, settings)
        .iter()
        .map(|column| match column.kind {
            SegmentColumnKind::SegmentBy | SegmentColumnKind::Compressed => {
                if is_needed(&column.name) {
                    // unwrap is safe: layout columns come from the schema
                    schema.index_of(&column.name).map_or(0, |i| i as i32 + 1)
                } else {
                    0
                }
            }
            SegmentColumnKind::Count => COUNT_COLUMN_ID,
            SegmentColumnKind::SequenceNum => {
                if merge_enabled {
                    SEQUENCE_NUM_COLUMN_ID
                } else {
                    0
                }
            }
        })
        .collect();

    let sort_keys = if merge_enabled {
        requested_order
            .iter()
            .map(|request| SortKey {
                // validated above
                attno: schema.index_of(&request.column).unwrap_or(0) + 1,
                direction: request.direction,
                nulls_first: request.nulls_first,
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(ScanConfig {
        table_id,
        chunk_id,
        reverse,
        merge_enabled,
        decompression_map,
        sort_keys,
    })
}

/// Decide `(merge_enabled, reverse)` from the compression order-by and the
/// requested order.
fn merge_decision(
    settings: &CompressionSettings,
    requested_order: &[OrderByRequest],
) -> (bool, bool) {
    if requested_order.is_empty() {
        return (false, false);
    }
    let orderby = settings.orderby_columns();
    if requested_order.len() > orderby.len() {
        return (false, false);
    }

    let forward = requested_order.iter().zip(&orderby).all(|(req, col)| {
        let stored = if col.orderby_asc {
            SortDirection::Asc
        } else {
            SortDirection::Desc
        };
        req.column == col.column
            && req.direction == stored
            && req.nulls_first == col.orderby_nulls_first
    });
    if forward {
        return (true, false);
    }

    let inverted = requested_order.iter().zip(&orderby).all(|(req, col)| {
        let stored = if col.orderby_asc {
            SortDirection::Asc
        } else {
            SortDirection::Desc
        };
        req.column == col.column
            && req.direction == stored.reversed()
            && req.nulls_first != col.orderby_nulls_first
    });
    if inverted {
        return (true, true);
    }

    (false, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnCompression;
    use crate::value::{Field, ValueType};

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
            ColumnCompression::orderby("ts", 1, false, true), // ts DESC NULLS FIRST
        ])
    }

    fn request(column: &str, direction: SortDirection, nulls_first: bool) -> OrderByRequest {
        OrderByRequest {
            column: column.to_string(),
            direction,
            nulls_first,
        }
    }

    fn plan(
        requested: &[OrderByRequest],
        needed: Option<&[String]>,
    ) -> ScanConfig {
        plan_chunk_scan(TableId(1), ChunkId(2), &schema(), &settings(), requested, needed)
            .expect("plan")
    }

    #[test]
    fn matching_order_enables_merge() {
        let config = plan(&[request("ts", SortDirection::Desc, true)], None);
        assert!(config.merge_enabled);
        assert!(!config.reverse);
        assert_eq!(config.sort_keys.len(), 1);
        assert_eq!(config.sort_keys[0].attno, 1);
        // full map: ts, device, reading, count, seqnum
        assert_eq!(
            config.decompression_map,
            vec![1, 2, 3, COUNT_COLUMN_ID, SEQUENCE_NUM_COLUMN_ID]
        );
    }

    #[test]
    fn inverted_order_enables_reverse_merge() {
        let config = plan(&[request("ts", SortDirection::Asc, false)], None);
        assert!(config.merge_enabled);
        assert!(config.reverse);
    }

    #[test]
    fn mismatched_order_falls_back_to_streaming() {
        let config = plan(&[request("reading", SortDirection::Asc, false)], None);
        assert!(!config.merge_enabled);
        assert!(config.sort_keys.is_empty());

        // same column, same direction, different nulls ordering
        let config = plan(&[request("ts", SortDirection::Desc, false)], None);
        assert!(!config.merge_enabled);
    }

    #[test]
    fn no_requested_order_streams() {
        let config = plan(&[], None);
        assert!(!config.merge_enabled);
        assert!(!config.reverse);
        assert!(config.sort_keys.is_empty());
        // sequence number is not decoded without merge
        assert_eq!(config.decompression_map[4], 0);
    }

    #[test]
    fn projection_zeroes_unneeded_columns_but_keeps_order_columns() {
        let needed = vec!["reading".to_string()];
        let config = plan(&[request("ts", SortDirection::Desc, true)], Some(&needed));
        // ts forced in by the sort, device skipped, reading kept
        assert_eq!(
            config.decompression_map,
            vec![1, 0, 3, COUNT_COLUMN_ID, SEQUENCE_NUM_COLUMN_ID]
        );
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let err = plan_chunk_scan(
            TableId(1),
            ChunkId(2),
            &schema(),
            &settings(),
            &[request("nope", SortDirection::Asc, false)],
            None,
        )
        .expect_err("unknown order column");
        assert!(matches!(err, PlanError::UnknownColumn { .. }));
    }

    #[test]
    fn longer_request_than_compression_order_streams() {
        let config = plan(
            &[
                request("ts", SortDirection::Desc, true),
                request("reading", SortDirection::Asc, false),
            ],
            None,
        );
        assert!(!config.merge_enabled);
    }
}
