//! Reallocation engine.
//!
//! A resize tries, in order:
//!
//! 1. shrinking in place, handing the excess back to the free list;
//! 2. absorbing free physical neighbours;
//! 3. growing through the break when the block ends the heap;
//! 4. moving large blocks into a free final block grown to fit;
//! 5. allocate, copy and release.

use std::ptr::{self, NonNull};

use log::trace;

use crate::{
    block::{BLOCK_HEADER_SIZE, Block, BlockPtr},
    error::AllocError,
    kernel::Break,
    memalloc::{Allocator, BumpState},
    region::FastSlot,
    stats::StatsHook,
};

impl<B: Break, H: StatsHook> Allocator<B, H> {
    /// Changes the size of the allocation at `ptr` to `n` bytes.
    ///
    /// `None` behaves as [`Allocator::allocate`], `n == 0` releases `ptr` and
    /// returns `Ok(None)`. The first `min(n, capacity)` bytes are preserved
    /// wherever the allocation ends up. On error `ptr` stays valid and owned
    /// by the caller.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation of this allocator.
    pub unsafe fn resize(&mut self, ptr: Option<NonNull<u8>>, n: usize) -> Result<Option<NonNull<u8>>, AllocError> {
        let Some(ptr) = ptr else {
            return self.allocate(n).map(Some);
        };

        if n == 0 {
            unsafe { self.release(Some(ptr)) };
            return Ok(None);
        }

        unsafe {
            let old_capacity = self.capacity_of(ptr);
            let (new_ptr, capacity) = self.resize_inner(ptr, n)?;

            self.hook.on_release(old_capacity);
            self.hook.on_allocate(capacity);

            Ok(Some(new_ptr))
        }
    }

    unsafe fn resize_inner(&mut self, ptr: NonNull<u8>, n: usize) -> Result<(NonNull<u8>, usize), AllocError> {
        let size = Self::round(n)?;

        if let Some(slot) = self.region.slot().filter(|slot| slot.addr == ptr) {
            return unsafe { self.resize_slot(slot, size, n) };
        }

        if let BumpState::Active(bump) = &self.bump {
            if bump.contains(ptr) {
                let slot = bump.slot_size();
                if n <= slot {
                    return Ok((ptr, slot));
                }
                return unsafe { self.relocate(ptr, slot, n) };
            }
        }

        unsafe {
            let block = Block::from_payload(ptr);
            let capacity = Block::size(block);

            if capacity >= size {
                self.free_list.split(&mut self.region, block, size, &self.policy);
                return Ok((ptr, Block::size(block)));
            }

            if let Some(block) = self.absorb_neighbours(block, size) {
                return Ok((Block::payload(block), Block::size(block)));
            }

            if self.extend_in_place(block, size) {
                return Ok((ptr, Block::size(block)));
            }

            if size >= self.policy.large_threshold {
                if let Some(found) = self.relocate_to_tail(ptr, capacity, size) {
                    return Ok(found);
                }
            }

            trace!("resize of {capacity} bytes at {ptr:p} to {n} falls back to copying");

            self.relocate(ptr, capacity, n)
        }
    }

    /// The fast slot grows in place while it's the whole heap, otherwise it
    /// moves like any other allocation.
    unsafe fn resize_slot(&mut self, slot: FastSlot, size: usize, n: usize) -> Result<(NonNull<u8>, usize), AllocError> {
        if size <= slot.capacity {
            return Ok((slot.addr, slot.capacity));
        }

        if self.region.extend_slot(size).is_ok() {
            return Ok((slot.addr, size));
        }

        unsafe { self.relocate(slot.addr, slot.capacity, n) }
    }

    /// Merges `block` with its free physical neighbours if together they
    /// hold `size` bytes. The payload moves to the left neighbour if that one
    /// is absorbed. Returns the surviving block, already split to `size`.
    unsafe fn absorb_neighbours(&mut self, block: BlockPtr, size: usize) -> Option<BlockPtr> {
        unsafe {
            let right = self.free_list.right_of(block);
            let left = self.free_list.left_of(block);

            let extra = |neighbour: Option<BlockPtr>| neighbour.map_or(0, |n| BLOCK_HEADER_SIZE + Block::size(n));
            let capacity = Block::size(block);

            if capacity + extra(left) + extra(right) < size {
                return None;
            }

            let mut block = block;

            if let Some(right) = right {
                self.free_list.remove(right);
                block.as_mut().data.size += BLOCK_HEADER_SIZE + Block::size(right);
            }

            if let Some(mut left) = left {
                self.free_list.remove(left);
                left.as_mut().data.size += BLOCK_HEADER_SIZE + Block::size(block);

                // Regions overlap whenever the payload is bigger than a header.
                ptr::copy(Block::payload(block).as_ptr(), Block::payload(left).as_ptr(), capacity);
                block = left;
            }

            self.free_list.split(&mut self.region, block, size, &self.policy);

            Some(block)
        }
    }

    /// Grows `block` through the break when it is the final block, or when
    /// its free right neighbour is.
    unsafe fn extend_in_place(&mut self, mut block: BlockPtr, size: usize) -> bool {
        unsafe {
            let right = self
                .free_list
                .right_of(block)
                .filter(|right| self.region.is_last(*right));

            if right.is_none() && !self.region.is_last(block) {
                return false;
            }

            let available = Block::size(block) + right.map_or(0, |r| BLOCK_HEADER_SIZE + Block::size(r));
            let deficit = size - available;

            if self.region.extend_tail(deficit).is_err() {
                return false;
            }

            if let Some(right) = right {
                self.free_list.remove(right);
            }

            block.as_mut().data.size = available + deficit;

            true
        }
    }

    /// Moves a large allocation into the free final block, growing that
    /// block through the break to exactly `size`.
    unsafe fn relocate_to_tail(&mut self, ptr: NonNull<u8>, capacity: usize, size: usize) -> Option<(NonNull<u8>, usize)> {
        unsafe {
            let fence = self.region.final_fence()?;
            let mut last = self.free_list.left_of(fence)?;

            let deficit = size.saturating_sub(Block::size(last));
            if deficit > 0 {
                self.region.extend_tail(deficit).ok()?;
                last.as_mut().data.size += deficit;
            }

            self.free_list.remove(last);
            self.free_list.split(&mut self.region, last, size, &self.policy);

            let new_ptr = Block::payload(last);
            ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), capacity);
            self.release_inner(ptr);

            trace!("large resize moved {ptr:p} into the final block at {new_ptr:p}");

            Some((new_ptr, Block::size(last)))
        }
    }
}
