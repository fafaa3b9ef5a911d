use std::ptr::NonNull;

use log::debug;
use snafu::OptionExt;

use crate::{
    block::{ALIGNMENT, BLOCK_HEADER_SIZE, Block, BlockPtr},
    error::{AllocError, ExhaustedSnafu},
    kernel::Break,
    list::Link,
    utils::align,
};

/// The very first allocation of the process, carved straight from the break
/// without a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FastSlot {
    pub addr: NonNull<u8>,
    pub capacity: usize,
    pub is_free: bool,
}

/// Owner of the single memory region that grows through a [`Break`].
///
/// The region is a chain of segments. A segment is a run of blocks without
/// gaps, closed by a fence (see [`Block`]). Growing while the break still ends
/// at the final fence extends the last segment in place; growing after
/// somebody else moved the break starts a new one.
///
/// ```text
///  fast slot      segment                                 segment
/// +---------+----------+----------+-------+    gap    +----------+-------+
/// | payload | hdr|data | hdr|data | fence | --------> | hdr|data | fence | <- break
/// +---------+----------+----------+-------+           +----------+-------+
///                                                                  final fence
/// ```
pub(crate) struct HeapRegion<B: Break> {
    brk: B,
    established: bool,
    slot: Option<FastSlot>,
    /// First header of the first segment.
    first: Link<crate::list::Node<Block>>,
    /// Fence closing the last segment.
    fence: Link<crate::list::Node<Block>>,
}

impl<B: Break> HeapRegion<B> {
    pub const fn new(brk: B) -> Self {
        Self {
            brk,
            established: false,
            slot: None,
            first: None,
            fence: None,
        }
    }

    #[inline]
    pub fn brk(&self) -> &B {
        &self.brk
    }

    #[inline]
    pub fn is_established(&self) -> bool {
        self.established
    }

    #[inline]
    pub fn slot(&self) -> Option<FastSlot> {
        self.slot
    }

    #[inline]
    pub fn slot_mut(&mut self) -> Option<&mut FastSlot> {
        self.slot.as_mut()
    }

    /// Moves the break forward by `bytes` and returns the previous break.
    fn extend(&mut self, bytes: usize) -> Result<NonNull<u8>, AllocError> {
        let delta = isize::try_from(bytes).ok().context(ExhaustedSnafu { bytes })?;

        unsafe { self.brk.adjust(delta) }.context(ExhaustedSnafu { bytes })
    }

    /// Padding needed to bring the current break to [`ALIGNMENT`].
    fn break_padding(&self) -> usize {
        let current = self.brk.current();
        align(current, ALIGNMENT) - current
    }

    /// Serves the first ever request: `size` bytes with no header.
    pub fn bootstrap(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        debug_assert!(!self.established);

        let pad = self.break_padding();
        let previous = self.extend(pad + size)?;
        let addr = unsafe { previous.add(pad) };

        debug!("heap established with a {size} byte fast slot at {addr:p}");

        self.established = true;
        self.slot = Some(FastSlot {
            addr,
            capacity: size,
            is_free: false,
        });

        Ok(addr)
    }

    /// `true` while nothing moved the break since our last growth.
    #[inline]
    pub fn at_break(&self) -> bool {
        match self.fence {
            Some(fence) => Block::addr(fence) + BLOCK_HEADER_SIZE == self.brk.current(),
            None => false,
        }
    }

    /// `true` if `block` is the physically final block of the heap.
    #[inline]
    pub unsafe fn is_last(&self, block: BlockPtr) -> bool {
        Some(unsafe { Block::right(block) }) == self.fence
    }

    /// Final fence of the heap, if any segment exists.
    #[inline]
    pub fn final_fence(&self) -> Link<crate::list::Node<Block>> {
        self.fence
    }

    /// Grows the heap by a used block with `payload` bytes.
    ///
    /// A failed growth leaves every existing block and the break untouched.
    pub fn grow(&mut self, payload: usize) -> Result<BlockPtr, AllocError> {
        debug_assert!(payload % ALIGNMENT == 0 && payload > 0);

        let block = match self.fence {
            Some(fence) if self.at_break() => {
                // The old fence becomes the header of the new block.
                let bytes = payload
                    .checked_add(BLOCK_HEADER_SIZE)
                    .context(ExhaustedSnafu { bytes: payload })?;
                self.extend(bytes)?;

                unsafe {
                    let block = Block::write(fence.cast(), payload, false);
                    self.close_segment(block);
                    block
                }
            }
            _ => {
                let pad = self.break_padding();
                let bytes = payload
                    .checked_add(pad + 2 * BLOCK_HEADER_SIZE)
                    .context(ExhaustedSnafu { bytes: payload })?;
                let previous = self.extend(bytes)?;

                unsafe {
                    let block = Block::write(previous.add(pad), payload, false);

                    match self.fence {
                        Some(mut fence) => fence.as_mut().next = Some(block),
                        None => self.first = Some(block),
                    }

                    debug!("new heap segment at {:p}", block);

                    self.close_segment(block);
                    block
                }
            }
        };

        debug!("heap grew by {payload} bytes, break at {:#x}", self.brk.current());

        self.established = true;

        Ok(block)
    }

    /// Writes the final fence right after `block`.
    unsafe fn close_segment(&mut self, block: BlockPtr) {
        unsafe {
            let end = NonNull::new_unchecked(Block::end(block) as *mut u8);
            self.fence = Some(Block::write_fence(end, None));
        }
    }

    /// Moves the break and the final fence forward by `delta` bytes. The
    /// caller owns the bytes between the old and the new fence and must grow
    /// the last block over them.
    pub fn extend_tail(&mut self, delta: usize) -> Result<(), AllocError> {
        debug_assert!(delta % ALIGNMENT == 0);

        let fence = self
            .fence
            .filter(|_| self.at_break())
            .context(ExhaustedSnafu { bytes: delta })?;

        self.extend(delta)?;

        unsafe {
            let end = fence.cast::<u8>().add(delta);
            self.fence = Some(Block::write_fence(end, None));
        }

        debug!("heap tail extended in place by {delta} bytes");

        Ok(())
    }

    /// Gives the final block back to the OS. `block` must be the last block,
    /// must not be in the free list and the break must still end at the heap.
    ///
    /// Returns `false` (and changes nothing) if the OS refused to shrink.
    pub unsafe fn trim(&mut self, block: BlockPtr) -> bool {
        debug_assert!(unsafe { self.is_last(block) } && self.at_break());

        let bytes = unsafe { BLOCK_HEADER_SIZE + Block::size(block) };
        let Ok(delta) = isize::try_from(bytes) else {
            return false;
        };

        if unsafe { self.brk.adjust(-delta) }.is_none() {
            return false;
        }

        // The header bytes of `block` are still below the break.
        self.fence = Some(unsafe { Block::write_fence(block.cast(), None) });

        debug!("returned {bytes} trailing bytes to the OS");

        true
    }

    /// Grows the fast slot in place to `capacity`. Only possible while the
    /// slot is the whole heap and the break still ends at it.
    pub fn extend_slot(&mut self, capacity: usize) -> Result<(), AllocError> {
        let slot = self
            .slot
            .filter(|slot| {
                self.first.is_none() && slot.addr.as_ptr() as usize + slot.capacity == self.brk.current()
            })
            .context(ExhaustedSnafu { bytes: capacity })?;

        self.extend(capacity - slot.capacity)?;

        if let Some(slot) = self.slot.as_mut() {
            slot.capacity = capacity;
        }

        Ok(())
    }

    /// Turns a free fast slot into a headered block.
    ///
    /// Returns the block (used, not in any list) on success, `None` if the
    /// slot has to stay a headerless span.
    pub fn promote_slot(&mut self, min_payload: usize) -> Result<Option<BlockPtr>, AllocError> {
        let Some(slot) = self.slot.filter(|slot| slot.is_free) else {
            return Ok(None);
        };

        let start = slot.addr.as_ptr() as usize;
        let end = start + slot.capacity;

        let block = match self.first {
            // Nothing after the slot yet: retrofit a header with an extra OS request.
            None if end == self.brk.current() => {
                self.extend(2 * BLOCK_HEADER_SIZE)?;

                unsafe {
                    let block = Block::write(slot.addr, slot.capacity, false);
                    self.first = Some(block);
                    self.close_segment(block);
                    block
                }
            }
            // The first segment starts right after the slot: the header goes
            // into the slot's own bytes.
            Some(first)
                if Block::addr(first) == end && slot.capacity >= BLOCK_HEADER_SIZE + min_payload =>
            unsafe {
                let block = Block::write(slot.addr, slot.capacity - BLOCK_HEADER_SIZE, false);
                self.first = Some(block);
                block
            }
            // Somewhere else: the slot becomes a segment of its own.
            Some(first) if slot.capacity >= 2 * BLOCK_HEADER_SIZE + min_payload => unsafe {
                let payload = slot.capacity - 2 * BLOCK_HEADER_SIZE;
                let block = Block::write(slot.addr, payload, false);
                let fence_addr = NonNull::new_unchecked(Block::end(block) as *mut u8);
                Block::write_fence(fence_addr, Some(first));
                self.first = Some(block);
                block
            },
            _ => return Ok(None),
        };

        debug!("fast slot of {} bytes promoted to a block", slot.capacity);

        self.slot = None;

        Ok(Some(block))
    }

    /// Iterates over every non-fence block, segment by segment.
    pub fn blocks(&self) -> Blocks {
        Blocks {
            current: self.first,
            segment_start: true,
        }
    }
}

pub(crate) struct Blocks {
    current: Link<crate::list::Node<Block>>,
    segment_start: bool,
}

/// Item of [`Blocks`]: the block and whether it opens a segment.
pub(crate) struct Visit {
    pub block: BlockPtr,
    pub segment_start: bool,
}

impl Iterator for Blocks {
    type Item = Visit;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let block = self.current?;

            unsafe {
                if Block::is_fence(block) {
                    self.current = block.as_ref().next;
                    self.segment_start = true;
                    continue;
                }

                self.current = Some(Block::right(block));
            }

            let segment_start = std::mem::replace(&mut self.segment_start, false);

            return Some(Visit { block, segment_start });
        }
    }
}
