//! The decompress scan operator.
//!
//! Streams decoded rows out of a compressed chunk, one row per `next_row`
//! call. Two modes share the batch-state and descriptor machinery but keep
//! separate drivers:
//!
//! - **Streaming** (default): one batch state is recycled across segments,
//!   rows come out in child-scan order, and an optional predicate and
//!   projection apply after decode.
//! - **Merge** (`merge_enabled`): every segment of the chunk is opened up
//!   front, the first decoded row of each enters a binary heap ordered by
//!   the configured sort keys, and rows are drained globally ordered with
//!   O(log B) work per row for B open batches. This is what lets a
//!   downstream ORDER BY skip its sort node when segments are internally
//!   sorted the same way.
//!
//! The operator is a single-threaded pull iterator: nothing happens outside
//! `next_row`, and a returned row borrow is valid only until the next call.

pub mod descriptor;
pub mod error;
pub mod sort;

mod batch;
mod heap;
mod pool;

pub use error::ScanError;
pub use heap::BINARY_HEAP_DEFAULT_CAPACITY;
pub use pool::{INITIAL_BATCH_CAPACITY, SlotNumber};

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use log::debug;
use snafu::prelude::*;

use crate::catalog::{ChunkId, CompressionSettings, TableId};
use crate::compression::{CodecRegistry, ScanDirection};
use crate::scan::batch::{BatchStep, segment_row_count};
use crate::scan::descriptor::{ColumnDescriptor, build_column_descriptors};
use crate::scan::error::CancelledSnafu;
use crate::scan::heap::MergeHeap;
use crate::scan::pool::BatchPool;
use crate::scan::sort::{SortKey, compare_rows};
use crate::segment::SegmentRow;
use crate::value::{Cell, Datum, Row, RowSchema};

/// Immutable operator configuration, produced by the planner.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Table whose compression settings govern column classification.
    pub table_id: TableId,
    /// The chunk being scanned; also the value table-oid references
    /// constify to.
    pub chunk_id: ChunkId,
    /// Decode column streams back to front.
    pub reverse: bool,
    /// Merge segments on the sort keys instead of streaming them serially.
    pub merge_enabled: bool,
    /// Output attno (or zero to skip, or a reserved metadata id) for each
    /// input column, in input order.
    pub decompression_map: Vec<i32>,
    /// Sort keys for merge mode; must be empty exactly when merge is
    /// disabled.
    pub sort_keys: Vec<SortKey>,
}

/// Pull-based source of segment rows: the operator's child scan.
pub trait SegmentScan {
    /// The next segment row, or `None` at the end.
    fn next_segment(&mut self) -> Result<Option<SegmentRow>, ScanError>;

    /// Restart from the first segment row.
    fn rescan(&mut self) -> Result<(), ScanError>;

    /// Release resources. May be called more than once.
    fn close(&mut self) {}
}

/// Segment scan over rows held in memory. The child scan used by unit tests
/// and small embedders.
pub struct MemorySegmentScan {
    rows: Vec<SegmentRow>,
    pos: usize,
}

impl MemorySegmentScan {
    pub fn new(rows: Vec<SegmentRow>) -> Self {
        Self { rows, pos: 0 }
    }
}

impl SegmentScan for MemorySegmentScan {
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

/// Cooperative cancellation flag, checked at the top of every `next_row`.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the scan to stop at its next `next_row` call.
    pub fn cancel(&self) {
        self.flag.store(true, AtomicOrdering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(AtomicOrdering::Relaxed)
    }
}

/// System attribute number of the table-oid column, the only system column
/// a projection over decoded rows may reference.
pub const TABLE_OID_COLUMN_ID: i32 = -6;

/// One output expression of a projection.
#[derive(Debug, Clone)]
pub enum ProjectionExpr {
    /// A 1-based output column of the decoded row.
    Column(usize),
    /// A system column by its attribute number. Decoded rows are virtual
    /// and have none, so `begin` rewrites the table-oid into a literal and
    /// rejects everything else.
    SystemColumn(i32),
    /// A constant.
    Literal(Cell),
}

/// Projection applied to decoded rows in streaming mode.
#[derive(Debug, Clone, Default)]
pub struct Projection {
    /// Output expressions in order.
    pub exprs: Vec<ProjectionExpr>,
}

/// Row filter applied after decode in streaming mode.
pub type RowPredicate = Arc<dyn Fn(&[Cell]) -> bool + Send + Sync>;

/// Runtime pieces of the operator that are not part of the planned
/// configuration.
pub struct ExecOptions {
    /// Codec registry used to open decompression iterators.
    pub registry: Arc<CodecRegistry>,
    /// Optional post-decode row filter (streaming mode only).
    pub predicate: Option<RowPredicate>,
    /// Optional projection (streaming mode only).
    pub projection: Option<Projection>,
    /// Cancellation flag shared with the host.
    pub cancellation: CancellationToken,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            registry: Arc::new(CodecRegistry::with_builtin()),
            predicate: None,
            projection: None,
            cancellation: CancellationToken::new(),
        }
    }
}

/// Operator state machine. Transitions happen only inside `next_row`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecState {
    Init,
    Streaming,
    Done,
}

/// What a streaming-mode iteration decided to emit.
enum Emit {
    Row,
    Projected,
    End,
}

/// The decompress scan operator. See the module docs for the two modes.
impl std::fmt::Debug for DecompressScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecompressScan").finish()
    }
}

pub struct DecompressScan {
    config: ScanConfig,
    schema: RowSchema,
    descriptors: Vec<ColumnDescriptor>,
    direction: ScanDirection,
    registry: Arc<CodecRegistry>,
    child: Box<dyn SegmentScan>,
    pool: BatchPool,
    heap: Option<MergeHeap>,
    state: ExecState,
    /// Merge mode: the emitted top-of-heap batch still has to be advanced
    /// before the next row can be produced. Advancement is deferred so the
    /// row handed out stays valid until the next call.
    advance_pending: bool,
    /// Streaming mode: the single recycled slot, allocated on first use.
    stream_slot: Option<SlotNumber>,
    /// Streaming mode: the current batch still has rows to decode.
    batch_open: bool,
    predicate: Option<RowPredicate>,
    projection: Option<Projection>,
    projected_row: Row,
    cancellation: CancellationToken,
}

impl DecompressScan {
    /// Build the operator: validate the configuration, build the column
    /// descriptor table and rewrite system-column references in the
    /// projection. The child scan is not touched yet.
    pub fn begin(
        config: ScanConfig,
        schema: RowSchema,
        settings: &CompressionSettings,
        child: Box<dyn SegmentScan>,
        options: ExecOptions,
    ) -> Result<Self, ScanError> {
        if config.merge_enabled {
            ensure!(!config.sort_keys.is_empty(), error::MergeWithoutSortKeysSnafu);
        } else {
            ensure!(config.sort_keys.is_empty(), error::SortKeysWithoutMergeSnafu);
        }
        for key in &config.sort_keys {
            ensure!(
                key.attno >= 1 && key.attno <= schema.width(),
                error::SortKeyOutOfRangeSnafu {
                    attno: key.attno,
                    width: schema.width(),
                }
            );
        }

        let descriptors = build_column_descriptors(&schema, settings, &config.decompression_map)?;
        let projection = options
            .projection
            .map(|p| constify_projection(p, &schema, config.chunk_id))
            .transpose()?;
        let projected_width = projection.as_ref().map_or(0, |p| p.exprs.len());

        let direction = if config.reverse {
            ScanDirection::Reverse
        } else {
            ScanDirection::Forward
        };

        let num_columns = descriptors.len();
        let output_width = schema.width();
        Ok(Self {
            config,
            schema,
            descriptors,
            direction,
            registry: options.registry,
            child,
            pool: BatchPool::new(num_columns, output_width),
            heap: None,
            state: ExecState::Init,
            advance_pending: false,
            stream_slot: None,
            batch_open: false,
            predicate: options.predicate,
            projection,
            projected_row: vec![None; projected_width],
            cancellation: options.cancellation,
        })
    }

    /// Output schema of the decoded rows.
    pub fn schema(&self) -> &RowSchema {
        &self.schema
    }

    /// The planned configuration.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Produce the next decoded row, or `None` at the end of the chunk.
    ///
    /// The returned borrow is valid until the next call on this operator.
    pub fn next_row(&mut self) -> Result<Option<&[Cell]>, ScanError> {
        ensure!(!self.cancellation.is_cancelled(), CancelledSnafu);
        if self.config.merge_enabled {
            self.merge_next()
        } else {
            self.stream_next()
        }
    }

    /// Restart the scan from the beginning. The heap is discarded rather
    /// than reused; rebuilding it from the rescanned child is what keeps
    /// rescan correct when the child produces different rows.
    pub fn rescan(&mut self) -> Result<(), ScanError> {
        self.state = ExecState::Init;
        self.advance_pending = false;
        self.batch_open = false;
        self.heap = None;
        self.stream_slot = None;
        self.pool.release_all();
        self.child.rescan()
    }

    /// Drop all batch state and close the child. Safe to call in an error
    /// state and more than once.
    pub fn end(&mut self) {
        self.state = ExecState::Done;
        self.advance_pending = false;
        self.batch_open = false;
        self.heap = None;
        self.stream_slot = None;
        self.pool.release_all();
        self.child.close();
    }

    /// Properties reported for EXPLAIN-style output.
    pub fn explain(&self) -> ScanExplain {
        ScanExplain {
            chunk_id: self.config.chunk_id,
            reverse: self.config.reverse,
            merge_append: self.config.merge_enabled,
        }
    }

    fn merge_next(&mut self) -> Result<Option<&[Cell]>, ScanError> {
        match self.state {
            ExecState::Init => self.initialize_merge()?,
            ExecState::Streaming => {
                if self.advance_pending {
                    self.advance_pending = false;
                    self.advance_top()?;
                }
            }
            ExecState::Done => return Ok(None),
        }

        let Some(heap) = self.heap.as_ref() else {
            self.state = ExecState::Done;
            return Ok(None);
        };
        let Some(top) = heap.first() else {
            self.state = ExecState::Done;
            return Ok(None);
        };

        self.advance_pending = true;
        let row = self.pool.get(top).output();
        debug_assert!(row.is_some(), "heap top batch has an empty output slot");
        Ok(row)
    }

    /// First call in merge mode: pull every segment from the child, open a
    /// batch per segment, decode one row each and build the heap. Segments
    /// that are empty up front are filtered before they ever claim a pool
    /// slot.
    fn initialize_merge(&mut self) -> Result<(), ScanError> {
        let mut heap = MergeHeap::new();
        self.pool.initialize(INITIAL_BATCH_CAPACITY);

        while let Some(segment_row) = self.child.next_segment()? {
            ensure!(!self.cancellation.is_cancelled(), CancelledSnafu);
            if segment_row_count(&self.descriptors, &segment_row)? == 0 {
                continue;
            }

            let id = self.pool.allocate();
            self.pool.get_mut(id).open(
                &self.descriptors,
                &self.schema,
                &self.registry,
                self.direction,
                segment_row,
            )?;
            match self
                .pool
                .get_mut(id)
                .decode_next(&self.descriptors, &self.schema)?
            {
                BatchStep::Row => heap.add_unordered(id),
                BatchStep::Exhausted => self.pool.release(id),
            }
        }

        self.state = ExecState::Streaming;
        self.advance_pending = false;
        if heap.is_empty() {
            return Ok(());
        }

        let Self { pool, config, .. } = &*self;
        heap.build(&mut |a, b| compare_batches(pool, &config.sort_keys, a, b));
        debug!(
            "merge scan of chunk {} opened {} batches (pool capacity {}, heap capacity {})",
            self.config.chunk_id,
            heap.len(),
            self.pool.capacity(),
            heap.capacity()
        );
        self.heap = Some(heap);
        Ok(())
    }

    /// Advance the batch whose row was emitted last call: decode its next
    /// row and sift it back down, or drop it from the heap and release its
    /// slot when exhausted.
    fn advance_top(&mut self) -> Result<(), ScanError> {
        let Self {
            heap,
            pool,
            descriptors,
            schema,
            config,
            ..
        } = self;
        let Some(heap) = heap.as_mut() else {
            return Ok(());
        };
        let Some(top) = heap.first() else {
            return Ok(());
        };

        match pool.get_mut(top).decode_next(descriptors, schema)? {
            BatchStep::Row => {
                heap.replace_first(top, &mut |a, b| {
                    compare_batches(pool, &config.sort_keys, a, b)
                });
            }
            BatchStep::Exhausted => {
                heap.remove_first(&mut |a, b| compare_batches(pool, &config.sort_keys, a, b));
                pool.release(top);
            }
        }
        Ok(())
    }

    fn stream_next(&mut self) -> Result<Option<&[Cell]>, ScanError> {
        match self.state {
            ExecState::Done => return Ok(None),
            ExecState::Init => {
                self.state = ExecState::Streaming;
                self.batch_open = false;
            }
            ExecState::Streaming => {}
        }

        let slot = match self.stream_slot {
            Some(slot) => slot,
            None => {
                self.pool.initialize(1);
                let slot = self.pool.allocate();
                self.stream_slot = Some(slot);
                slot
            }
        };

        let emit = loop {
            if !self.batch_open {
                match self.child.next_segment()? {
                    None => break Emit::End,
                    Some(segment_row) => {
                        self.pool.get_mut(slot).open(
                            &self.descriptors,
                            &self.schema,
                            &self.registry,
                            self.direction,
                            segment_row,
                        )?;
                        self.batch_open = true;
                    }
                }
            }

            match self
                .pool
                .get_mut(slot)
                .decode_next(&self.descriptors, &self.schema)?
            {
                BatchStep::Exhausted => {
                    self.batch_open = false;
                    continue;
                }
                BatchStep::Row => {}
            }

            if let Some(predicate) = &self.predicate {
                let keep = self
                    .pool
                    .get(slot)
                    .output()
                    .is_some_and(|row| predicate(row));
                if !keep {
                    continue;
                }
            }

            if let Some(projection) = &self.projection {
                if let Some(src) = self.pool.get(slot).output() {
                    project_into(projection, src, &mut self.projected_row);
                    break Emit::Projected;
                }
            }
            break Emit::Row;
        };

        match emit {
            Emit::End => {
                self.state = ExecState::Done;
                Ok(None)
            }
            Emit::Row => Ok(self.pool.get(slot).output()),
            Emit::Projected => Ok(Some(self.projected_row.as_slice())),
        }
    }

    #[cfg(test)]
    fn open_batch_count(&self) -> usize {
        self.pool.live_count()
    }

    #[cfg(test)]
    fn pool_capacity(&self) -> usize {
        self.pool.capacity()
    }

    #[cfg(test)]
    fn heap_is_built(&self) -> bool {
        self.heap.is_some()
    }
}

/// Heap comparator: the inverse of the query order applied to the two
/// batches' current output rows, so the heap top is the row that sorts
/// first under the query ORDER BY.
fn compare_batches(
    pool: &BatchPool,
    sort_keys: &[SortKey],
    a: SlotNumber,
    b: SlotNumber,
) -> Ordering {
    let row_a = pool.get(a).output().expect("batch in heap has no output row");
    let row_b = pool.get(b).output().expect("batch in heap has no output row");
    compare_rows(row_a, row_b, sort_keys).reverse()
}

/// Rewrite system-column references into literals and validate column
/// references. Decoded rows are virtual, so a surviving system-column
/// reference would have nothing to read.
fn constify_projection(
    projection: Projection,
    schema: &RowSchema,
    chunk_id: ChunkId,
) -> Result<Projection, ScanError> {
    let exprs = projection
        .exprs
        .into_iter()
        .map(|expr| match expr {
            ProjectionExpr::Column(attno) => {
                ensure!(
                    attno >= 1 && attno <= schema.width(),
                    error::ProjectionColumnOutOfRangeSnafu {
                        attno,
                        width: schema.width(),
                    }
                );
                Ok(ProjectionExpr::Column(attno))
            }
            ProjectionExpr::SystemColumn(TABLE_OID_COLUMN_ID) => Ok(ProjectionExpr::Literal(
                Some(Datum::Int64(i64::from(chunk_id.0))),
            )),
            ProjectionExpr::SystemColumn(attno) => {
                error::UnsupportedSystemColumnSnafu { attno }.fail()
            }
            ProjectionExpr::Literal(cell) => Ok(ProjectionExpr::Literal(cell)),
        })
        .collect::<Result<Vec<_>, ScanError>>()?;
    Ok(Projection { exprs })
}

fn project_into(projection: &Projection, src: &[Cell], out: &mut Row) {
    out.clear();
    for expr in &projection.exprs {
        let cell = match expr {
            ProjectionExpr::Column(attno) => src[attno - 1].clone(),
            ProjectionExpr::Literal(cell) => cell.clone(),
            // begin() rewrote every system column
            ProjectionExpr::SystemColumn(_) => None,
        };
        out.push(cell);
    }
}

/// EXPLAIN-style property block for the operator.
#[derive(Debug, Clone, Copy)]
pub struct ScanExplain {
    /// The chunk being scanned.
    pub chunk_id: ChunkId,
    /// Whether the scan runs back to front.
    pub reverse: bool,
    /// Whether segments are merged on the sort keys.
    pub merge_append: bool,
}

impl fmt::Display for ScanExplain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DecompressScan on chunk {}{}",
            self.chunk_id,
            if self.reverse { " (reverse)" } else { "" }
        )?;
        write!(f, "\n  Per segment merge append: {}", self.merge_append)
    }
}
