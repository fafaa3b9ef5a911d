use std::ptr::NonNull;

use crate::{
    block::{BLOCK_HEADER_SIZE, Block, BlockPtr},
    config::Policy,
    kernel::Break,
    list::List,
    region::HeapRegion,
};

/// Size-ordered list of free [`Block`].
///
/// The list is intrusive: the `next`/`prev` links live in the header of each
/// free block, so keeping track of free space costs no memory beyond the
/// headers we already have.
///
/// ```text
///                        Free List (ascending size)
///
///           +-----------------------------+   +------------------+
///           |                             v   |                  v
/// +--------|-------+-------+    +---------|---+----+    +--------|-------+
/// | Free (32)      | Block | .. | Free (96)        | .. | Free (4096)    | fence
/// +----------------+-------+    +------------------+    +----------------+
/// ```
///
/// Invariants kept by [`FreeList::insert`]:
///
/// - every member has `is_free` set, every free block is a member once;
/// - no two free blocks are physically adjacent;
/// - members are sorted by ascending payload size, so the first block that
///   fits is also the best fit.
pub(crate) struct FreeList {
    items: List<Block>,
}

impl FreeList {
    /// Creates a new empty List
    pub const fn new() -> Self {
        Self { items: List::new() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Iterates over the free blocks in ascending size order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockPtr> + '_ {
        self.items.nodes()
    }

    /// Links `block` at the position that keeps the list sorted, without
    /// looking at its neighbours.
    unsafe fn link(&mut self, mut block: BlockPtr) {
        unsafe {
            block.as_mut().data.is_free = true;

            let size = Block::size(block);
            let anchor = self.items.nodes().find(|node| Block::size(*node) >= size);

            self.items.insert_before(anchor, block);
        }
    }

    /// Unlinks `block` and marks it as used.
    pub unsafe fn remove(&mut self, mut block: BlockPtr) {
        unsafe {
            debug_assert!(Block::is_free(block));

            self.items.remove(block);
            block.as_mut().data.is_free = false;
        }
    }

    /// Unlinks a `block` that is being absorbed by a neighbour. Its header
    /// keeps `is_free`, so a stale pointer to it still reads as released.
    unsafe fn unlink(&mut self, block: BlockPtr) {
        unsafe {
            debug_assert!(Block::is_free(block));

            self.items.remove(block);
        }
    }

    /// Returns the smallest free block with at least `size` payload bytes.
    pub fn find(&self, size: usize) -> Option<BlockPtr> {
        self.items.nodes().find(|node| unsafe { Block::size(*node) >= size })
    }

    /// Free block that ends exactly where `block` starts.
    ///
    /// A left neighbour that is in use doesn't matter to any caller, so
    /// searching the free blocks is enough.
    pub unsafe fn left_of(&self, block: BlockPtr) -> Option<BlockPtr> {
        let addr = Block::addr(block);

        self.items.nodes().find(|node| unsafe { Block::end(*node) } == addr)
    }

    /// Free block that starts exactly where `block` ends.
    #[inline]
    pub unsafe fn right_of(&self, block: BlockPtr) -> Option<BlockPtr> {
        unsafe {
            let right = Block::right(block);
            (!Block::is_fence(right) && Block::is_free(right)).then_some(right)
        }
    }

    /// Returns a used `block` to the free list.
    ///
    /// Free neighbours are absorbed first so no two free blocks ever touch.
    /// If the merged block ends the heap and is larger than
    /// [`Policy::trim_threshold`], it goes back to the OS instead of the list.
    pub unsafe fn insert<B: Break>(&mut self, region: &mut HeapRegion<B>, block: BlockPtr, policy: &Policy) {
        unsafe {
            let mut block = block;
            block.as_mut().data.is_free = true;

            if let Some(right) = self.right_of(block) {
                self.unlink(right);
                block.as_mut().data.size += BLOCK_HEADER_SIZE + Block::size(right);
            }

            if let Some(mut left) = self.left_of(block) {
                self.unlink(left);
                left.as_mut().data.size += BLOCK_HEADER_SIZE + Block::size(block);
                block = left;
            }

            if Block::size(block) > policy.trim_threshold
                && region.is_last(block)
                && region.at_break()
                && region.trim(block)
            {
                return;
            }

            self.link(block);
        }
    }

    /// Shrinks the used `block` to `size` payload bytes and returns the tail
    /// to the free list, if the tail is big enough to be a block of its own.
    /// Otherwise the block is left oversized.
    pub unsafe fn split<B: Break>(
        &mut self,
        region: &mut HeapRegion<B>,
        mut block: BlockPtr,
        size: usize,
        policy: &Policy,
    ) {
        unsafe {
            let capacity = Block::size(block);
            debug_assert!(capacity >= size);

            if capacity - size < policy.min_split() {
                return;
            }

            let tail_addr = NonNull::new_unchecked((Block::payload(block).as_ptr()).add(size));
            let tail = Block::write(tail_addr, capacity - size - BLOCK_HEADER_SIZE, false);

            block.as_mut().data.size = size;

            self.insert(region, tail, policy);
        }
    }
}
