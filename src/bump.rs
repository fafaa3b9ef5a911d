//! Bump sub-heap for large arrays of same-size slots.
//!
//! Some programs allocate a big pointer array and then millions of tiny
//! objects of one size, one per array entry. Tracking each of those with a
//! block header would triple their footprint, so once the allocator sees the
//! pointer array request it serves the tiny objects from a dedicated mapping
//! by moving an index:
//!
//! ```text
//!   base                             top                          capacity
//!    +----+----+----+----+----+----+-----------------------------------+
//!    | s0 | s1 | s2 | s3 | s4 | s5 |            not handed out         |
//!    +----+----+----+----+----+----+-----------------------------------+
//!    |<------- chunk 0 -------->|<------- chunk 1 -------->| ...
//! ```
//!
//! Releases are expected in last-in-first-out order. Releasing the top slot
//! moves `top` back; releasing any other slot only lowers the live count and
//! the slot stays reserved until every slot is gone. Chunks above `top` are
//! handed back to the OS.

use std::ptr::NonNull;

use log::debug;

use crate::{
    config::BumpPolicy,
    kernel::{self, page_size},
    utils::{align, align_down},
};

pub(crate) struct BumpHeap {
    base: NonNull<u8>,
    /// Bytes mapped at `base`.
    len: usize,
    slot: usize,
    chunk: usize,
    capacity: usize,
    top: usize,
    live: usize,
}

impl BumpHeap {
    /// Maps the sub-heap described by `policy`. `None` if the OS refuses.
    pub fn new(policy: &BumpPolicy) -> Option<Self> {
        let capacity = policy.capacity();
        let len = align(capacity.checked_mul(policy.slot)?.max(1), page_size());
        let base = unsafe { kernel::request_memory(len)? };

        debug!(
            "bump sub-heap of {capacity} slots of {} bytes mapped at {base:p}",
            policy.slot
        );

        Some(Self {
            base,
            len,
            slot: policy.slot,
            chunk: policy.chunk.max(1),
            capacity,
            top: 0,
            live: 0,
        })
    }

    #[inline]
    pub fn slot_size(&self) -> usize {
        self.slot
    }

    #[inline]
    pub fn live(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        let start = self.base.as_ptr() as usize;

        addr >= start && addr < start + self.capacity * self.slot
    }

    /// Next slot, `None` once every slot was handed out.
    pub fn allocate(&mut self) -> Option<NonNull<u8>> {
        if self.top == self.capacity {
            return None;
        }

        let ptr = unsafe { self.base.add(self.top * self.slot) };
        self.top += 1;
        self.live += 1;

        Some(ptr)
    }

    /// Gives a slot back.
    ///
    /// **SAFETY**: `ptr` must be a live slot of this sub-heap.
    pub unsafe fn release(&mut self, ptr: NonNull<u8>) {
        debug_assert!(self.contains(ptr) && self.live > 0);

        let index = (ptr.as_ptr() as usize - self.base.as_ptr() as usize) / self.slot;
        let old_top = self.top;

        self.live -= 1;

        if self.live == 0 {
            self.top = 0;
        } else if index + 1 == self.top {
            self.top -= 1;
        }

        self.discard_chunks(old_top);
    }

    /// Hands the chunks between the current and the previous top back to the OS.
    fn discard_chunks(&mut self, old_top: usize) {
        let first_unused = self.top.div_ceil(self.chunk);
        let previously_used = old_top.div_ceil(self.chunk);

        if first_unused >= previously_used {
            return;
        }

        let base = self.base.as_ptr() as usize;
        let page = page_size();
        let start = align(base + first_unused * self.chunk * self.slot, page);
        let end = if previously_used * self.chunk >= self.capacity {
            base + self.len
        } else {
            align_down(base + previously_used * self.chunk * self.slot, page)
        };

        if end > start {
            debug!(
                "bump sub-heap retreated to slot {}, discarding {} bytes",
                self.top,
                end - start
            );

            unsafe {
                kernel::discard_memory(start as *mut u8, end - start);
            }
        }
    }
}

impl Drop for BumpHeap {
    fn drop(&mut self) {
        unsafe {
            kernel::return_memory(self.base.as_ptr(), self.len);
        }
    }
}
