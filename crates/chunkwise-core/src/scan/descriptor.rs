//! Column descriptors: the bridge between the segment-row input layout and
//! the decoded output layout.
//!
//! Descriptors are built once per operator from the decompression map and
//! the table's compression settings, then shared read-only by every batch
//! state. The input attribute number of a descriptor is strictly its 1-based
//! position in the decompression map, including skipped (zero) entries, so
//! the child scan's row layout is preserved.

use crate::catalog::CompressionSettings;
use crate::scan::error::ScanError;
use crate::value::{RowSchema, ValueType};

/// Output attno mapping to the segment row count.
pub const COUNT_COLUMN_ID: i32 = -9;

/// Output attno mapping to the segment sequence number.
pub const SEQUENCE_NUM_COLUMN_ID: i32 = -10;

/// Classification of one mapped input column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Constant across the segment; copied into every output row.
    SegmentBy,
    /// Compressed stream; decoded one value per output row.
    Compressed,
    /// Segment row count; drives the per-batch countdown.
    RowCount,
    /// Segment sequence number; only ever consulted by sorts below the
    /// operator, never materialized here.
    SequenceNum,
}

/// Immutable description of one mapped input column.
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    /// Classification.
    pub kind: ColumnKind,
    /// 1-based position in the output row; negative for metadata columns
    /// that are never materialized.
    pub output_attno: i32,
    /// 1-based position in the segment (input) row.
    pub input_attno: usize,
    /// Decoded value type, for data columns.
    pub value_type: Option<ValueType>,
}

/// Build the descriptor table from a decompression map.
///
/// Each map entry gives the output attno of the corresponding input column:
/// zero means "do not decompress this column", positive attnos resolve to
/// segment-by versus compressed via the compression settings, and the two
/// reserved negative ids name the metadata columns. Any other negative
/// value is a fatal configuration error.
pub(crate) fn build_column_descriptors(
    schema: &RowSchema,
    settings: &CompressionSettings,
    decompression_map: &[i32],
) -> Result<Vec<ColumnDescriptor>, ScanError> {
    if decompression_map.is_empty() {
        return Err(ScanError::EmptyDecompressionMap);
    }

    let mut descriptors = Vec::new();
    let mut has_row_count = false;

    for (position, &output_attno) in decompression_map.iter().enumerate() {
        let input_attno = position + 1;
        if output_attno == 0 {
            continue;
        }

        let descriptor = if output_attno > 0 {
            let offset = (output_attno - 1) as usize;
            let field = schema
                .field(offset)
                .ok_or(ScanError::OutputColumnOutOfRange {
                    attno: output_attno,
                    width: schema.width(),
                })?;
            let kind = if settings.is_segmentby(&field.name) {
                ColumnKind::SegmentBy
            } else {
                ColumnKind::Compressed
            };
            ColumnDescriptor {
                kind,
                output_attno,
                input_attno,
                value_type: Some(field.value_type),
            }
        } else {
            let kind = match output_attno {
                COUNT_COLUMN_ID => {
                    has_row_count = true;
                    ColumnKind::RowCount
                }
                SEQUENCE_NUM_COLUMN_ID => ColumnKind::SequenceNum,
                _ => return Err(ScanError::UnknownMetadataColumn { attno: output_attno }),
            };
            ColumnDescriptor {
                kind,
                output_attno,
                input_attno,
                value_type: None,
            }
        };
        descriptors.push(descriptor);
    }

    if !has_row_count {
        return Err(ScanError::MissingRowCountColumn);
    }
    Ok(descriptors)
}
