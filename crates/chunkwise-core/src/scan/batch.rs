//! Per-batch decompression state.
//!
//! A [`BatchState`] is the working set for one open segment: the raw segment
//! row it was opened on, one slot per column descriptor holding either a
//! cached segment-by constant or a live decompression iterator, the
//! remaining-row countdown, and the output row the most recent decode landed
//! in. All of it is owned by the state and dropped (or recycled) on
//! `open`/`close`, so per-batch memory stays bounded no matter how many
//! batches are open in parallel and no pointers ever cross batches.

use crate::compression::{CodecRegistry, DecompressionIterator, ScanDirection};
use crate::scan::descriptor::{ColumnDescriptor, ColumnKind};
use crate::scan::error::ScanError;
use crate::segment::SegmentRow;
use crate::value::{Cell, Datum, Row, RowSchema};
use snafu::prelude::*;

use super::error::{CodecSnafu, SegmentColumnMissingSnafu};

/// Per-descriptor slot of an open batch.
pub(crate) enum ColumnValue {
    /// Slot of a closed batch, or a metadata column.
    Unset,
    /// Cached segment-by constant.
    SegmentBy(Cell),
    /// Decompression iterator; `None` when the stored stream was NULL and
    /// the column decodes to its missing-value default.
    Compressed(Option<Box<dyn DecompressionIterator>>),
}

/// Result of decoding one row out of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BatchStep {
    /// A row landed in the output slot.
    Row,
    /// The batch is exhausted; the output slot is cleared.
    Exhausted,
}

/// Decompression state of one open segment.
pub(crate) struct BatchState {
    segment_row: Option<SegmentRow>,
    columns: Vec<ColumnValue>,
    remaining: Option<i64>,
    output_row: Row,
    output_valid: bool,
}

/// Read and validate the row count of a segment row before any slot is
/// committed to it. Lets the merge driver skip empty segments without
/// spending a pool slot on them.
pub(crate) fn segment_row_count(
    descriptors: &[ColumnDescriptor],
    row: &SegmentRow,
) -> Result<i64, ScanError> {
    let descriptor = descriptors
        .iter()
        .find(|d| d.kind == ColumnKind::RowCount)
        .ok_or(ScanError::MissingRowCountColumn)?;
    let cell = row
        .attr(descriptor.input_attno)
        .context(SegmentColumnMissingSnafu {
            input_attno: descriptor.input_attno,
        })?;
    match cell {
        None => Err(ScanError::NullRowCount),
        Some(Datum::Int64(n)) if *n >= 0 => Ok(*n),
        Some(Datum::Int32(n)) if *n >= 0 => Ok(i64::from(*n)),
        Some(other) => Err(ScanError::InvalidRowCount {
            detail: format!("{other:?}"),
        }),
    }
}

impl BatchState {
    /// A closed state sized for the operator's descriptors and output width.
    pub(crate) fn new(num_columns: usize, output_width: usize) -> Self {
        let mut columns = Vec::with_capacity(num_columns);
        columns.resize_with(num_columns, || ColumnValue::Unset);
        Self {
            segment_row: None,
            columns,
            remaining: None,
            output_row: vec![None; output_width],
            output_valid: false,
        }
    }

    /// Whether the state currently holds an open batch.
    pub(crate) fn is_open(&self) -> bool {
        self.remaining.is_some()
    }

    /// The most recently decoded row, if the last decode produced one.
    pub(crate) fn output(&self) -> Option<&[Cell]> {
        self.output_valid.then_some(self.output_row.as_slice())
    }

    /// Bind this state to a segment row: cache segment-by constants, open a
    /// decompression iterator per compressed column and initialize the
    /// remaining-row countdown. Any previous batch is closed first.
    pub(crate) fn open(
        &mut self,
        descriptors: &[ColumnDescriptor],
        schema: &RowSchema,
        registry: &CodecRegistry,
        direction: ScanDirection,
        row: SegmentRow,
    ) -> Result<(), ScanError> {
        self.close();

        let mut remaining = None;
        for (slot, descriptor) in descriptors.iter().enumerate() {
            let cell = row
                .attr(descriptor.input_attno)
                .context(SegmentColumnMissingSnafu {
                    input_attno: descriptor.input_attno,
                })?;

            match descriptor.kind {
                ColumnKind::SegmentBy => {
                    self.columns[slot] = ColumnValue::SegmentBy(cell.clone());
                }
                ColumnKind::Compressed => {
                    let iterator = match cell {
                        None => None,
                        Some(Datum::Bytes(stream)) => {
                            // iterators hold zero-copy slices of the stream
                            let value_type = descriptor
                                .value_type
                                .unwrap_or(crate::value::ValueType::Bytes);
                            Some(
                                registry
                                    .open_iterator(stream.clone(), value_type, direction)
                                    .context(CodecSnafu {
                                        column: column_name(descriptor, schema),
                                    })?,
                            )
                        }
                        Some(_) => {
                            return Err(ScanError::CompressedColumnNotBinary {
                                column: column_name(descriptor, schema),
                            });
                        }
                    };
                    self.columns[slot] = ColumnValue::Compressed(iterator);
                }
                ColumnKind::RowCount => {
                    remaining = Some(segment_row_count(
                        std::slice::from_ref(descriptor),
                        &row,
                    )?);
                }
                ColumnKind::SequenceNum => {
                    // only sorts below the operator ever look at this column
                }
            }
        }

        self.remaining = Some(remaining.ok_or(ScanError::MissingRowCountColumn)?);
        self.segment_row = Some(row);
        Ok(())
    }

    /// Decode the next row of the open batch into the output slot.
    ///
    /// The countdown is consulted first: once it hits zero the batch is
    /// done, and a compressed stream still yielding a value at that point is
    /// a fatal desynchronization between the segment metadata and its column
    /// streams. A stream finishing before the countdown is tolerated as
    /// batch end.
    pub(crate) fn decode_next(
        &mut self,
        descriptors: &[ColumnDescriptor],
        schema: &RowSchema,
    ) -> Result<BatchStep, ScanError> {
        let remaining = self.remaining.unwrap_or(0);
        let mut batch_done = remaining == 0;
        self.output_valid = false;

        for (slot, descriptor) in descriptors.iter().enumerate() {
            match descriptor.kind {
                ColumnKind::RowCount | ColumnKind::SequenceNum => {}
                ColumnKind::SegmentBy => {
                    let offset = (descriptor.output_attno - 1) as usize;
                    if let ColumnValue::SegmentBy(cell) = &self.columns[slot] {
                        self.output_row[offset] = cell.clone();
                    }
                }
                ColumnKind::Compressed => {
                    let offset = (descriptor.output_attno - 1) as usize;
                    match &mut self.columns[slot] {
                        ColumnValue::Compressed(None) => {
                            self.output_row[offset] = schema
                                .field(offset)
                                .and_then(|f| f.missing_default.clone());
                        }
                        ColumnValue::Compressed(Some(iterator)) => {
                            let next = iterator.try_next().context(CodecSnafu {
                                column: column_name(descriptor, schema),
                            })?;
                            match next {
                                None => batch_done = true,
                                Some(_) if batch_done => {
                                    return Err(ScanError::CompressedColumnOutOfSync {
                                        column: column_name(descriptor, schema),
                                    });
                                }
                                Some(cell) => self.output_row[offset] = cell,
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        if batch_done {
            self.remaining = Some(0);
            return Ok(BatchStep::Exhausted);
        }
        self.remaining = Some(remaining - 1);
        self.output_valid = true;
        Ok(BatchStep::Row)
    }

    /// Drop iterators, constants and the bound segment row, and clear the
    /// output slot. Idempotent; the row buffer allocation is kept for reuse.
    pub(crate) fn close(&mut self) {
        for column in &mut self.columns {
            *column = ColumnValue::Unset;
        }
        self.segment_row = None;
        self.remaining = None;
        self.output_valid = false;
        for cell in &mut self.output_row {
            *cell = None;
        }
    }
}

fn column_name(descriptor: &ColumnDescriptor, schema: &RowSchema) -> String {
    if descriptor.output_attno > 0 {
        if let Some(field) = schema.field((descriptor.output_attno - 1) as usize) {
            return field.name.clone();
        }
    }
    format!("#{}", descriptor.input_attno)
}
