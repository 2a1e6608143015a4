//! Pool of batch states with an explicit free-set.
//!
//! Slots are identified by dense [`SlotNumber`]s that stay stable across
//! growth; the merge heap stores these ids rather than pointers. The pool
//! grows in steps of [`INITIAL_BATCH_CAPACITY`] when exhausted and never
//! shrinks within an operator lifetime.

use roaring::RoaringBitmap;

use crate::scan::batch::BatchState;

/// Initial number of batch states, and the growth step.
pub const INITIAL_BATCH_CAPACITY: usize = 16;

/// Dense identifier of a batch state in the pool. Also the payload stored in
/// the merge heap.
pub type SlotNumber = u32;

pub(crate) struct BatchPool {
    slots: Vec<BatchState>,
    free: RoaringBitmap,
    num_columns: usize,
    output_width: usize,
}

impl BatchPool {
    /// An empty pool; call [`BatchPool::initialize`] before allocating.
    pub(crate) fn new(num_columns: usize, output_width: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: RoaringBitmap::new(),
            num_columns,
            output_width,
        }
    }

    /// Pre-fill the pool with `n` closed slots.
    pub(crate) fn initialize(&mut self, n: usize) {
        if self.slots.len() >= n {
            return;
        }
        self.grow(n - self.slots.len());
    }

    fn grow(&mut self, additional: usize) {
        let start = self.slots.len() as u32;
        self.slots.reserve(additional);
        for id in 0..additional as u32 {
            self.slots
                .push(BatchState::new(self.num_columns, self.output_width));
            self.free.insert(start + id);
        }
    }

    /// Lowest free slot id, growing the pool if every slot is live.
    /// Amortized O(1).
    pub(crate) fn allocate(&mut self) -> SlotNumber {
        if self.free.is_empty() {
            self.grow(INITIAL_BATCH_CAPACITY);
        }
        let id = self.free.min().expect("free set is empty after growth");
        self.free.remove(id);
        id
    }

    /// Close the batch state and return its slot to the free set.
    pub(crate) fn release(&mut self, id: SlotNumber) {
        debug_assert!(!self.free.contains(id), "double release of slot {id}");
        self.slots[id as usize].close();
        self.free.insert(id);
    }

    /// Close every live batch state. Used by rescan and the end path, which
    /// must work even when the operator aborted mid-stream.
    pub(crate) fn release_all(&mut self) {
        for id in 0..self.slots.len() as u32 {
            if !self.free.contains(id) {
                self.release(id);
            }
        }
    }

    pub(crate) fn get(&self, id: SlotNumber) -> &BatchState {
        &self.slots[id as usize]
    }

    pub(crate) fn get_mut(&mut self, id: SlotNumber) -> &mut BatchState {
        &mut self.slots[id as usize]
    }

    /// Total number of slots, live or free.
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently holding live batches.
    pub(crate) fn live_count(&self) -> usize {
        self.slots.len() - self.free.len() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> BatchPool {
        let mut pool = BatchPool::new(1, 1);
        pool.initialize(INITIAL_BATCH_CAPACITY);
        pool
    }

    #[test]
    fn allocate_returns_lowest_free_id() {
        let mut pool = pool();
        assert_eq!(pool.allocate(), 0);
        assert_eq!(pool.allocate(), 1);
        pool.release(0);
        assert_eq!(pool.allocate(), 0, "released id is reused first");
    }

    #[test]
    fn exhaustion_grows_by_one_step_and_keeps_ids() {
        let mut pool = pool();
        let ids: Vec<_> = (0..INITIAL_BATCH_CAPACITY).map(|_| pool.allocate()).collect();
        assert_eq!(pool.capacity(), INITIAL_BATCH_CAPACITY);

        let next = pool.allocate();
        assert_eq!(next, INITIAL_BATCH_CAPACITY as u32);
        assert_eq!(pool.capacity(), 2 * INITIAL_BATCH_CAPACITY);

        // previously handed-out ids still address their slots
        for id in ids {
            pool.release(id);
        }
        pool.release(next);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn free_and_live_partition_the_slots() {
        let mut pool = pool();
        let a = pool.allocate();
        let _b = pool.allocate();
        let c = pool.allocate();
        pool.release(a);
        pool.release(c);

        assert_eq!(pool.live_count(), 1);
        assert_eq!(pool.capacity(), INITIAL_BATCH_CAPACITY);
    }

    #[test]
    fn release_all_clears_every_live_slot() {
        let mut pool = pool();
        for _ in 0..5 {
            pool.allocate();
        }
        assert_eq!(pool.live_count(), 5);
        pool.release_all();
        assert_eq!(pool.live_count(), 0);
        pool.release_all();
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn initialize_is_idempotent() {
        let mut pool = pool();
        pool.initialize(4);
        assert_eq!(pool.capacity(), INITIAL_BATCH_CAPACITY);
    }
}
