//! Tuning knobs of the allocator.
//!
//! Every threshold the engine consults lives in [`Policy`]. The defaults are
//! the values the allocator ships with; tests build engines with smaller
//! numbers so the same code paths trigger on small heaps.

use std::mem;

use crate::block::{ALIGNMENT, BLOCK_HEADER_SIZE};

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

/// Recognised "many same-size slots" signature and how the bump sub-heap
/// serves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BumpPolicy {
    /// A request of exactly this many bytes arms the bump sub-heap. It is the
    /// size of a pointer array indexing the slots that are about to come.
    pub trigger: usize,
    /// Raw request size served from the sub-heap once armed.
    pub slot: usize,
    /// Slots per chunk. Chunks are the unit given back to the OS.
    pub chunk: usize,
}

impl BumpPolicy {
    pub const fn new() -> Self {
        Self {
            trigger: 5 * MIB * mem::size_of::<usize>(),
            slot: mem::size_of::<u32>(),
            chunk: MIB,
        }
    }

    /// Number of slots the sub-heap reserves: one per pointer the trigger
    /// request can hold.
    pub const fn capacity(&self) -> usize {
        self.trigger / mem::size_of::<usize>()
    }
}

impl Default for BumpPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Heap growth, shrink and fast path policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Requests below this size grow the heap by this many bytes and keep the
    /// remainder in the free list.
    pub bulk_size: usize,
    /// Requests at or above this size grow the heap by exactly what they need.
    pub large_threshold: usize,
    /// Requests at or above this size get `messy_slack` extra bytes.
    pub messy_threshold: usize,
    /// Extra growth for irregular large requests.
    pub messy_slack: usize,
    /// A free block at the end of the heap larger than this goes back to the OS.
    pub trim_threshold: usize,
    /// Smallest payload a split may leave behind.
    pub min_payload: usize,
    /// Serve the very first request from a headerless slot.
    pub fast_slot: bool,
    /// Bump sub-heap, `None` disables it.
    pub bump: Option<BumpPolicy>,
}

impl Policy {
    pub const fn new() -> Self {
        Self {
            bulk_size: MIB,
            large_threshold: MIB,
            messy_threshold: 128 * MIB,
            messy_slack: 2 * BLOCK_HEADER_SIZE + 32 * 4096,
            trim_threshold: 128 * MIB,
            min_payload: ALIGNMENT,
            fast_slot: true,
            bump: Some(BumpPolicy::new()),
        }
    }

    /// A policy without the workload-shaped fast paths: no fast slot, no
    /// bump sub-heap.
    pub const fn general() -> Self {
        Self {
            fast_slot: false,
            bump: None,
            ..Self::new()
        }
    }

    /// Smallest residual that is worth turning into its own free block.
    #[inline]
    pub const fn min_split(&self) -> usize {
        BLOCK_HEADER_SIZE + self.min_payload
    }

    /// Payload bytes to request from the OS for a request of `size` bytes
    /// that no free block could satisfy. `None` on overflow.
    pub const fn growth_size(&self, size: usize) -> Option<usize> {
        if size < self.bulk_size {
            return Some(self.bulk_size);
        }

        if size >= self.messy_threshold {
            return size.checked_add(self.messy_slack);
        }

        if size >= self.large_threshold {
            return Some(size);
        }

        // Between the bulk and the large threshold growth stays amortised.
        crate::utils::checked_align(size, self.bulk_size.next_power_of_two())
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::new()
    }
}
