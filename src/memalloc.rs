//! The allocator context: allocation and release.
//!
//! ```text
//!   allocate(n)
//!     |
//!     +-- heap not established ------------> fast slot (no header)
//!     +-- fast slot free and big enough ----> reuse it
//!     |   fast slot free, too small --------> promote it to a block, go on
//!     +-- bump signature -------------------> bump sub-heap
//!     +-- free list has a fit -------------> take it, split the excess
//!     +-- otherwise -----------------------> grow the heap, split the excess
//! ```
//!
//! Resizing lives in the `realloc` module.

use std::ptr::{self, NonNull};

use log::debug;
use snafu::{OptionExt, ensure};

use crate::{
    block::{ALIGNMENT, Block, BlockPtr},
    bump::BumpHeap,
    config::Policy,
    error::{AllocError, SizeOverflowSnafu, ZeroSizeSnafu},
    freelist::FreeList,
    kernel::{Break, SystemBreak},
    region::HeapRegion,
    stats::StatsHook,
    utils::align,
};

/// Largest request the allocator will try to serve.
const MAX_REQUEST: usize = isize::MAX as usize / 2;

/// Lifecycle of the bump sub-heap.
pub(crate) enum BumpState {
    /// The trigger request hasn't been seen.
    Idle,
    /// Trigger seen, the sub-heap is created on the first slot request.
    Armed,
    Active(BumpHeap),
    /// The sub-heap couldn't be mapped; never try again.
    Disabled,
}

/// A dynamic memory allocator over a single region that grows through a
/// [`Break`].
///
/// Each value is an independent allocator context: its heap, free list and
/// fast paths are private to it. The process-wide allocator is one of these
/// behind a lock, see [`crate::BrkAlloc`].
///
/// The engine is single threaded. Every method takes `&mut self`, so
/// callers that share a context have to serialise access themselves.
///
/// # Caller obligations
///
/// Pointers given to [`Allocator::release`] and [`Allocator::resize`] must
/// come from this same context and must not have been released since.
/// Releasing a block twice is tolerated while the block is still free, but
/// releasing a foreign address is undefined behaviour.
pub struct Allocator<B: Break = SystemBreak, H: StatsHook = ()> {
    pub(crate) region: HeapRegion<B>,
    pub(crate) free_list: FreeList,
    pub(crate) bump: BumpState,
    pub(crate) policy: Policy,
    pub(crate) hook: H,
}

// SAFETY: the context exclusively owns every byte its pointers refer to.
unsafe impl<B: Break + Send, H: StatsHook + Send> Send for Allocator<B, H> {}

/// Summary of the heap, built by walking every block.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapReport {
    /// Headered blocks, used or free.
    pub blocks: usize,
    /// Segments the heap consists of.
    pub segments: usize,
    /// Free blocks found while walking the heap.
    pub free_blocks: usize,
    /// Payload bytes of those free blocks.
    pub free_bytes: usize,
    /// Largest free payload.
    pub largest_free: usize,
    /// Members of the free list.
    pub index_len: usize,
    /// Whether the free list is sorted by size and only holds free blocks.
    pub index_sorted: bool,
    /// Physically adjacent pairs of free blocks (should always be zero).
    pub adjacent_free_pairs: usize,
    /// Capacity of the headerless fast slot, if it still exists.
    pub fast_slot: Option<usize>,
    /// Live slots of the bump sub-heap.
    pub bump_live: usize,
}

impl Allocator<SystemBreak, ()> {
    /// Allocator over the process break with the default policy.
    pub const fn system() -> Self {
        Self::new(SystemBreak::new(), (), Policy::new())
    }
}

impl<B: Break, H: StatsHook> Allocator<B, H> {
    pub const fn new(brk: B, hook: H, policy: Policy) -> Self {
        Self {
            region: HeapRegion::new(brk),
            free_list: FreeList::new(),
            bump: BumpState::Idle,
            policy,
            hook,
        }
    }

    #[inline]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    #[inline]
    pub fn hook(&self) -> &H {
        &self.hook
    }

    #[inline]
    pub fn hook_mut(&mut self) -> &mut H {
        &mut self.hook
    }

    /// The break the heap grows through.
    #[inline]
    pub fn brk(&self) -> &B {
        self.region.brk()
    }

    /// Validates `n` and rounds it to [`ALIGNMENT`].
    pub(crate) fn round(n: usize) -> Result<usize, AllocError> {
        ensure!(n != 0, ZeroSizeSnafu);
        ensure!(n <= MAX_REQUEST, SizeOverflowSnafu);

        Ok(align(n, ALIGNMENT))
    }

    /// Returns the address of at least `n` usable bytes.
    ///
    /// Fails with [`AllocError::ZeroSize`] for `n == 0` without touching the
    /// heap, and with [`AllocError::Exhausted`] if the heap couldn't grow.
    pub fn allocate(&mut self, n: usize) -> Result<NonNull<u8>, AllocError> {
        let (ptr, capacity) = self.allocate_inner(n)?;
        self.hook.on_allocate(capacity);

        Ok(ptr)
    }

    /// Allocates `count * elem` zeroed bytes.
    pub fn zero_allocate(&mut self, count: usize, elem: usize) -> Result<NonNull<u8>, AllocError> {
        ensure!(count != 0 && elem != 0, ZeroSizeSnafu);
        let n = count.checked_mul(elem).context(SizeOverflowSnafu)?;

        let ptr = self.allocate(n)?;
        unsafe {
            ptr.as_ptr().write_bytes(0, n);
        }

        Ok(ptr)
    }

    /// Gives `ptr` back to the allocator. `None` is ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator. See the caller
    /// obligations on [`Allocator`].
    pub unsafe fn release(&mut self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else {
            return;
        };

        if let Some(capacity) = unsafe { self.release_inner(ptr) } {
            self.hook.on_release(capacity);
        }
    }

    /// Usable bytes behind `ptr`, which can be more than were requested.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation of this allocator.
    pub unsafe fn capacity_of(&self, ptr: NonNull<u8>) -> usize {
        if let Some(slot) = self.region.slot().filter(|slot| slot.addr == ptr) {
            return slot.capacity;
        }

        if let BumpState::Active(bump) = &self.bump {
            if bump.contains(ptr) {
                return bump.slot_size();
            }
        }

        unsafe { Block::size(Block::from_payload(ptr)) }
    }

    /// Allocation engine. Returns the payload and its capacity.
    pub(crate) fn allocate_inner(&mut self, n: usize) -> Result<(NonNull<u8>, usize), AllocError> {
        let size = Self::round(n)?;

        if !self.region.is_established() && self.policy.fast_slot {
            let ptr = self.region.bootstrap(size)?;
            return Ok((ptr, size));
        }

        if let Some(slot) = self.region.slot_mut() {
            if slot.is_free && slot.capacity >= size {
                slot.is_free = false;
                return Ok((slot.addr, slot.capacity));
            }
        }

        if let Some(block) = self.region.promote_slot(self.policy.min_payload)? {
            unsafe {
                self.free_list.insert(&mut self.region, block, &self.policy);
            }
        }

        if let Some(ptr) = self.bump_allocate(n) {
            return Ok(ptr);
        }

        let block = match self.free_list.find(size) {
            Some(block) => {
                unsafe { self.free_list.remove(block) };
                block
            }
            None => self.grow_for(size)?,
        };

        unsafe {
            self.free_list.split(&mut self.region, block, size, &self.policy);

            Ok((Block::payload(block), Block::size(block)))
        }
    }

    /// Gets a used block of at least `size` bytes from the OS.
    ///
    /// A free final block that ends at the break is extended by the deficit
    /// instead of being left stranded in front of a new block.
    fn grow_for(&mut self, size: usize) -> Result<BlockPtr, AllocError> {
        let last = self
            .region
            .final_fence()
            .filter(|_| self.region.at_break())
            .and_then(|fence| unsafe { self.free_list.left_of(fence) });

        let Some(mut last) = last else {
            let payload = self.policy.growth_size(size).context(SizeOverflowSnafu)?;
            return self.region.grow(payload);
        };

        unsafe {
            // `find` failed, so the final block is smaller than `size`.
            let deficit = size - Block::size(last);
            let delta = self.policy.growth_size(deficit).context(SizeOverflowSnafu)?;

            self.region.extend_tail(delta)?;
            self.free_list.remove(last);
            last.as_mut().data.size += delta;

            debug!("free final block at {last:p} extended by {delta} bytes");
        }

        Ok(last)
    }

    /// Serves `n` from the bump sub-heap if the request matches its signature.
    fn bump_allocate(&mut self, n: usize) -> Option<(NonNull<u8>, usize)> {
        let bump_policy = self.policy.bump?;

        match &mut self.bump {
            BumpState::Idle => {
                if n == bump_policy.trigger {
                    debug!("bump sub-heap armed by a {n} byte request");
                    self.bump = BumpState::Armed;
                }
                None
            }
            BumpState::Armed if n == bump_policy.slot => match BumpHeap::new(&bump_policy) {
                Some(mut heap) => {
                    let ptr = heap.allocate();
                    self.bump = BumpState::Active(heap);
                    ptr.map(|ptr| (ptr, bump_policy.slot))
                }
                None => {
                    debug!("bump sub-heap couldn't be mapped, disabling it");
                    self.bump = BumpState::Disabled;
                    None
                }
            },
            BumpState::Active(heap) if n == bump_policy.slot => heap.allocate().map(|ptr| (ptr, bump_policy.slot)),
            _ => None,
        }
    }

    /// Deallocation engine. Returns the capacity that went back to the
    /// allocator, `None` if nothing changed.
    pub(crate) unsafe fn release_inner(&mut self, ptr: NonNull<u8>) -> Option<usize> {
        if let Some(slot) = self.region.slot_mut().filter(|slot| slot.addr == ptr) {
            if slot.is_free {
                return None;
            }
            slot.is_free = true;
            return Some(slot.capacity);
        }

        if let BumpState::Active(bump) = &mut self.bump {
            if bump.contains(ptr) {
                unsafe { bump.release(ptr) };
                return Some(bump.slot_size());
            }
        }

        unsafe {
            let block = Block::from_payload(ptr);

            if Block::is_free(block) {
                return None;
            }

            let capacity = Block::size(block);
            self.free_list.insert(&mut self.region, block, &self.policy);

            Some(capacity)
        }
    }

    /// Copies `old_capacity` bytes of `ptr` into a fresh allocation of `n`
    /// bytes and releases `ptr`. On failure `ptr` is untouched.
    pub(crate) unsafe fn relocate(
        &mut self,
        ptr: NonNull<u8>,
        old_capacity: usize,
        n: usize,
    ) -> Result<(NonNull<u8>, usize), AllocError> {
        let (new_ptr, capacity) = self.allocate_inner(n)?;

        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_capacity.min(capacity));
            self.release_inner(ptr);
        }

        Ok((new_ptr, capacity))
    }

    /// Walks the heap and the free list.
    pub fn report(&self) -> HeapReport {
        let mut report = HeapReport::default();
        let mut previous_free = false;

        for visit in self.region.blocks() {
            let block = visit.block;
            let is_free = unsafe { Block::is_free(block) };

            report.blocks += 1;

            if visit.segment_start {
                report.segments += 1;
                previous_free = false;
            }

            if is_free {
                let size = unsafe { Block::size(block) };

                report.free_blocks += 1;
                report.free_bytes += size;
                report.largest_free = report.largest_free.max(size);

                if previous_free {
                    report.adjacent_free_pairs += 1;
                }
            }

            previous_free = is_free;
        }

        let mut last_size = 0;
        report.index_len = self.free_list.len();
        report.index_sorted = true;

        for block in self.free_list.blocks() {
            let (size, is_free) = unsafe { (Block::size(block), Block::is_free(block)) };

            report.index_sorted &= is_free && size >= last_size;
            last_size = size;
        }

        report.fast_slot = self.region.slot().map(|slot| slot.capacity);

        if let BumpState::Active(bump) = &self.bump {
            report.bump_live = bump.live();
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ArenaBreak, Stats, block::BLOCK_HEADER_SIZE, config::BumpPolicy};

    use test_log::test;

    const ARENA: usize = 64 << 20;

    fn allocator(policy: Policy) -> Allocator<ArenaBreak, Stats> {
        Allocator::new(ArenaBreak::new(ARENA).unwrap(), Stats::new(), policy)
    }

    fn small_policy() -> Policy {
        Policy {
            bulk_size: 4096,
            large_threshold: 4096,
            ..Policy::new()
        }
    }

    fn assert_healthy<B: Break, H: StatsHook>(allocator: &Allocator<B, H>) -> HeapReport {
        let report = allocator.report();

        assert_eq!(report.adjacent_free_pairs, 0, "{report:?}");
        assert!(report.index_sorted, "{report:?}");
        assert_eq!(report.index_len, report.free_blocks, "{report:?}");

        report
    }

    #[test]
    fn zero_sized_requests_fail_without_growth() {
        let mut allocator = allocator(Policy::new());

        assert_eq!(allocator.allocate(0), Err(AllocError::ZeroSize));
        assert_eq!(allocator.zero_allocate(0, 8), Err(AllocError::ZeroSize));
        assert_eq!(allocator.zero_allocate(8, 0), Err(AllocError::ZeroSize));
        assert_eq!(allocator.zero_allocate(usize::MAX, 2), Err(AllocError::SizeOverflow));
        assert_eq!(allocator.allocate(usize::MAX), Err(AllocError::SizeOverflow));

        assert_eq!(allocator.brk().used(), 0);
        assert!(!allocator.region.is_established());
        assert_eq!(allocator.hook().snapshot().events, 0);
    }

    #[test]
    fn first_allocation_is_a_headerless_slot() {
        let mut allocator = allocator(Policy::new());

        let ptr = allocator.allocate(10).unwrap();

        assert_eq!(ptr.as_ptr() as usize, allocator.brk().base());
        assert_eq!(allocator.brk().used(), 16);
        assert_eq!(allocator.report().fast_slot, Some(16));
        unsafe {
            assert_eq!(allocator.capacity_of(ptr), 16);
        }
    }

    #[test]
    fn released_slot_is_reused_when_big_enough() {
        let mut allocator = allocator(Policy::new());

        let ptr = allocator.allocate(64).unwrap();
        unsafe { allocator.release(Some(ptr)) };

        assert_eq!(allocator.allocate(48).unwrap(), ptr);
        assert_eq!(allocator.brk().used(), 64);
    }

    #[test]
    fn released_slot_is_promoted_when_too_small() {
        let mut allocator = allocator(small_policy());

        let ptr = allocator.allocate(64).unwrap();
        unsafe { allocator.release(Some(ptr)) };

        let big = allocator.allocate(128).unwrap();

        let report = assert_healthy(&allocator);
        assert_eq!(report.fast_slot, None);
        // The promoted slot opens the heap, the new chunk follows it.
        assert_eq!(report.segments, 1);
        assert!(report.free_bytes >= 64);
        assert_eq!(big.as_ptr() as usize, ptr.as_ptr() as usize + 64 + 2 * BLOCK_HEADER_SIZE);
    }

    #[test]
    fn payloads_are_aligned_and_disjoint() {
        let mut allocator = allocator(small_policy());
        let sizes = [1, 7, 16, 33, 100, 4000, 5000, 24];

        let ptrs: Vec<_> = sizes.iter().map(|&n| allocator.allocate(n).unwrap()).collect();

        for (i, (&ptr, &n)) in ptrs.iter().zip(&sizes).enumerate() {
            assert_eq!(ptr.as_ptr() as usize % ALIGNMENT, 0);
            unsafe { ptr.as_ptr().write_bytes(i as u8, n) };
        }

        for (i, (&ptr, &n)) in ptrs.iter().zip(&sizes).enumerate() {
            let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), n) };
            assert!(bytes.iter().all(|&b| b == i as u8));
        }

        assert_healthy(&allocator);
    }

    #[test]
    fn freed_space_is_reused() {
        let mut allocator = allocator(small_policy());
        let _first = allocator.allocate(8).unwrap();

        let a = allocator.allocate(256).unwrap();
        let _b = allocator.allocate(64).unwrap();
        let used = allocator.brk().used();

        unsafe { allocator.release(Some(a)) };
        let c = allocator.allocate(200).unwrap();

        assert_eq!(c, a);
        assert_eq!(allocator.brk().used(), used);
        assert_healthy(&allocator);
    }

    #[test]
    fn release_coalesces_neighbours() {
        let mut allocator = allocator(small_policy());
        let _first = allocator.allocate(8).unwrap();

        let ptrs: Vec<_> = (0..6).map(|_| allocator.allocate(96).unwrap()).collect();

        for &i in &[1, 3, 2, 5, 0, 4] {
            unsafe { allocator.release(Some(ptrs[i])) };
            assert_healthy(&allocator);
        }

        let report = allocator.report();
        assert_eq!(report.free_blocks, 1);
        assert_eq!(report.blocks, 1);
    }

    #[test]
    fn double_release_is_ignored() {
        let mut allocator = allocator(small_policy());
        let _first = allocator.allocate(8).unwrap();

        let a = allocator.allocate(64).unwrap();
        let _b = allocator.allocate(64).unwrap();

        unsafe {
            allocator.release(Some(a));
            let before = allocator.report();
            allocator.release(Some(a));
            assert_eq!(allocator.report(), before);
        }

        assert_eq!(allocator.hook().snapshot().current, 16 + 64);
    }

    /// Slot, `a`, `b` and a guard, so `a` and `b` merge with each other only.
    fn merged_pair() -> (Allocator<ArenaBreak, Stats>, NonNull<u8>, NonNull<u8>) {
        let mut allocator = allocator(small_policy());
        let _first = allocator.allocate(8).unwrap();

        let a = allocator.allocate(64).unwrap();
        let b = allocator.allocate(64).unwrap();
        let _guard = allocator.allocate(64).unwrap();

        (allocator, a, b)
    }

    #[test]
    fn double_release_of_a_block_absorbed_from_the_right() {
        let (mut allocator, a, b) = merged_pair();

        unsafe {
            allocator.release(Some(b));
            allocator.release(Some(a));
        }

        let before = assert_healthy(&allocator);
        let stats = allocator.hook().snapshot();
        assert_eq!(stats.current, 16 + 64);

        unsafe { allocator.release(Some(b)) };

        assert_eq!(assert_healthy(&allocator), before);
        assert_eq!(allocator.hook().snapshot(), stats);
    }

    #[test]
    fn double_release_of_a_block_merged_into_its_left_neighbour() {
        let (mut allocator, a, b) = merged_pair();

        unsafe {
            allocator.release(Some(a));
            allocator.release(Some(b));
        }

        let before = assert_healthy(&allocator);
        let stats = allocator.hook().snapshot();
        assert_eq!(stats.current, 16 + 64);

        unsafe { allocator.release(Some(b)) };

        assert_eq!(assert_healthy(&allocator), before);
        assert_eq!(allocator.hook().snapshot(), stats);

        // The merged block is still handed out whole.
        assert_eq!(allocator.allocate(64 + BLOCK_HEADER_SIZE + 64).unwrap(), a);
    }

    #[test]
    fn release_of_none_changes_nothing() {
        let mut allocator = allocator(small_policy());
        let _first = allocator.allocate(8).unwrap();
        let _a = allocator.allocate(64).unwrap();

        let before = allocator.report();
        let stats = allocator.hook().snapshot();
        unsafe { allocator.release(None) };

        assert_eq!(allocator.report(), before);
        assert_eq!(allocator.hook().snapshot(), stats);
    }

    #[test]
    fn zero_allocate_clears_recycled_memory() {
        let mut allocator = allocator(small_policy());
        let _first = allocator.allocate(8).unwrap();

        let dirty = allocator.allocate(128).unwrap();
        let _guard = allocator.allocate(16).unwrap();
        unsafe {
            dirty.as_ptr().write_bytes(0xff, 128);
            allocator.release(Some(dirty));
        }

        let clean = allocator.zero_allocate(16, 8).unwrap();
        assert_eq!(clean, dirty);

        let bytes = unsafe { std::slice::from_raw_parts(clean.as_ptr(), 128) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn exhaustion_leaves_heap_intact() {
        let mut allocator = Allocator::new(ArenaBreak::new(1 << 20).unwrap(), Stats::new(), small_policy());
        let _first = allocator.allocate(8).unwrap();
        let a = allocator.allocate(1000).unwrap();
        unsafe { a.as_ptr().write_bytes(0x42, 1000) };

        let before = allocator.report();
        let used = allocator.brk().used();

        let error = allocator.allocate(4 << 20).unwrap_err();
        assert!(matches!(error, AllocError::Exhausted { .. }));
        assert!(!error.is_invalid_request());

        assert_eq!(allocator.report(), before);
        assert_eq!(allocator.brk().used(), used);
        let bytes = unsafe { std::slice::from_raw_parts(a.as_ptr(), 1000) };
        assert!(bytes.iter().all(|&b| b == 0x42));
    }

    #[test]
    fn small_requests_grow_in_bulk_and_large_exactly() {
        let mut allocator = allocator(small_policy());
        let _first = allocator.allocate(8).unwrap();
        let base_used = allocator.brk().used();

        let _small = allocator.allocate(100).unwrap();
        assert_eq!(allocator.brk().used() - base_used, 4096 + 2 * BLOCK_HEADER_SIZE);

        // Use up the rest of the chunk so the final block is in use.
        let _rest = allocator.allocate(4096 - 112 - BLOCK_HEADER_SIZE).unwrap();
        assert_eq!(allocator.report().free_blocks, 0);

        let grown = allocator.brk().used();
        let _large = allocator.allocate(10_000).unwrap();
        assert_eq!(allocator.brk().used() - grown, align(10_000, ALIGNMENT) + BLOCK_HEADER_SIZE);

        assert_healthy(&allocator);
    }

    #[test]
    fn growth_extends_a_free_final_block_by_the_deficit() {
        let mut allocator = allocator(small_policy());
        let _first = allocator.allocate(8).unwrap();

        let small = allocator.allocate(100).unwrap();
        let tail = 4096 - 112 - BLOCK_HEADER_SIZE;
        let grown = allocator.brk().used();

        let large = allocator.allocate(10_000).unwrap();

        assert_eq!(large.as_ptr() as usize, small.as_ptr() as usize + 112 + BLOCK_HEADER_SIZE);
        assert_eq!(allocator.brk().used() - grown, align(10_000, ALIGNMENT) - tail);
        unsafe {
            assert_eq!(allocator.capacity_of(large), align(10_000, ALIGNMENT));
        }

        let report = assert_healthy(&allocator);
        assert_eq!(report.free_blocks, 0);
        assert_eq!(report.segments, 1);
    }

    #[test]
    fn small_growth_over_a_free_final_block_stays_in_bulk() {
        let mut allocator = allocator(small_policy());
        let _first = allocator.allocate(8).unwrap();

        let _small = allocator.allocate(100).unwrap();
        let tail = 4096 - 112 - BLOCK_HEADER_SIZE;
        let grown = allocator.brk().used();

        let next = allocator.allocate(tail + 16).unwrap();

        assert_eq!(allocator.brk().used() - grown, 4096);
        unsafe {
            assert_eq!(allocator.capacity_of(next), tail + 16);
        }

        let report = assert_healthy(&allocator);
        assert_eq!(report.free_blocks, 1);
        assert_eq!(report.free_bytes, 4096 - 16 - BLOCK_HEADER_SIZE);
    }

    #[test]
    fn trailing_free_space_above_threshold_goes_back_to_the_os() {
        let policy = Policy {
            trim_threshold: 64 << 10,
            ..small_policy()
        };
        let mut allocator = allocator(policy);
        let _first = allocator.allocate(8).unwrap();
        let _keep = allocator.allocate(64).unwrap();
        let used = allocator.brk().used();

        let big = allocator.allocate(1 << 20).unwrap();
        assert!(allocator.brk().used() > used);

        unsafe { allocator.release(Some(big)) };
        assert!(allocator.brk().used() <= used);
        assert_healthy(&allocator);
    }

    #[test]
    fn bump_sub_heap_serves_slot_requests_after_trigger() {
        let bump = BumpPolicy {
            trigger: 1024 * std::mem::size_of::<usize>(),
            slot: 4,
            chunk: 256,
        };
        let mut allocator = allocator(Policy {
            bump: Some(bump),
            ..small_policy()
        });
        let _first = allocator.allocate(1).unwrap();

        // Before the trigger 4 byte requests are ordinary blocks.
        let ordinary = allocator.allocate(4).unwrap();
        unsafe { allocator.release(Some(ordinary)) };

        let index = allocator.allocate(bump.trigger).unwrap().cast::<NonNull<u8>>();
        let slots: Vec<_> = (0..1024).map(|_| allocator.allocate(4).unwrap()).collect();

        for (i, slot) in slots.iter().enumerate() {
            unsafe {
                index.add(i).write(*slot);
                slot.cast::<u32>().write(i as u32);
            }
        }
        assert_eq!(allocator.report().bump_live, 1024);
        assert_eq!(slots[1].as_ptr() as usize - slots[0].as_ptr() as usize, 4);

        // Full: the next one comes from the heap.
        let overflow = allocator.allocate(4).unwrap();
        assert_eq!(overflow.as_ptr() as usize % ALIGNMENT, 0);

        for i in 0..1024 {
            unsafe {
                let slot = index.add(i).read();
                assert_eq!(slot.cast::<u32>().read(), i as u32);
                allocator.release(Some(slot));
            }
        }
        assert_eq!(allocator.report().bump_live, 0);
        assert_healthy(&allocator);
    }

    #[test]
    fn stats_follow_block_capacities() {
        let mut allocator = allocator(small_policy());

        let first = allocator.allocate(10).unwrap();
        let a = allocator.allocate(100).unwrap();
        let b = allocator.allocate(33).unwrap();

        let snapshot = allocator.hook().snapshot();
        assert_eq!(snapshot.current, 16 + 112 + 48);
        assert_eq!(snapshot.events, 3);

        unsafe {
            allocator.release(Some(a));
            allocator.release(Some(b));
            allocator.release(Some(first));
        }

        let snapshot = allocator.hook().snapshot();
        assert_eq!(snapshot.current, 0);
        assert_eq!(snapshot.peak, 16 + 112 + 48);
    }

    #[test]
    fn general_policy_skips_fast_paths() {
        let mut allocator = allocator(Policy {
            bulk_size: 4096,
            large_threshold: 4096,
            ..Policy::general()
        });

        let ptr = allocator.allocate(8).unwrap();

        let report = assert_healthy(&allocator);
        assert_eq!(report.fast_slot, None);
        assert_eq!(report.blocks, 2);
        unsafe {
            assert_eq!(allocator.capacity_of(ptr), 16);
        }
    }
}
