use std::{mem, ptr::NonNull};

use crate::list::{Link, Node};

/// Every payload handed out by the allocator starts on this boundary.
pub const ALIGNMENT: usize = 16;

/// Header size of a block. We need to add the overhead introduced by our
/// [`Node`] structure since we always use our `Block` as a node of the
/// free list.
pub const BLOCK_HEADER_SIZE: usize = mem::size_of::<Node<Block>>();

const _: () = assert!(BLOCK_HEADER_SIZE % ALIGNMENT == 0);
const _: () = assert!(mem::align_of::<Node<Block>>() <= ALIGNMENT);

/// Pointer to a block header.
pub(crate) type BlockPtr = NonNull<Node<Block>>;

/// This is the structure of a block. The fields of the block are it's metadata,
/// content is placed after this header.
///
/// The following diagram represents a block together with the [`Node`] links
/// that wrap it. The links are only meaningful while the block is free.
///
/// ```text
/// +---------------------+ <------+
/// |      next_free      |        |
/// +---------------------+        |
/// |      prev_free      |        |
/// +---------------------+        | -> Header
/// |        size         |        |
/// +---------------------+        |
/// |    is_free (1b)     |        |
/// +---------------------+ <------+
/// |       Content       |        |
/// |         ...         |        | -> Addressable content (`size` bytes)
/// |         ...         |        |
/// +---------------------+ <------+ <- next header (or fence)
/// ```
///
/// Blocks are laid out back to back: the byte right after a payload is the
/// header of the next block. Every run of blocks is closed by a *fence*, a
/// header with `size == 0` that is never free. A fence reuses its `next` link
/// to point at the first header of the following run (segment), if any.
#[repr(C)]
pub(crate) struct Block {
    /// Size of the payload in bytes, always a multiple of [`ALIGNMENT`].
    pub size: usize,
    /// Flag to tell whether the block is free or not.
    pub is_free: bool,
}

impl Block {
    /// Writes a new header at `addr`.
    ///
    /// **SAFETY**: `addr` must be aligned to [`ALIGNMENT`] and the range
    /// `addr..addr + BLOCK_HEADER_SIZE + size` must belong to the heap.
    #[inline]
    pub unsafe fn write(addr: NonNull<u8>, size: usize, is_free: bool) -> BlockPtr {
        let block = addr.cast::<Node<Block>>();
        unsafe {
            block.write(Node::new(Block { size, is_free }));
        }
        block
    }

    /// Writes a fence at `addr` that links to `next_segment`.
    ///
    /// **SAFETY**: same as [`Block::write`] with a zero payload.
    #[inline]
    pub unsafe fn write_fence(addr: NonNull<u8>, next_segment: Link<Node<Block>>) -> BlockPtr {
        unsafe {
            let mut fence = Self::write(addr, 0, false);
            fence.as_mut().next = next_segment;
            fence
        }
    }

    #[inline]
    pub fn addr(block: BlockPtr) -> usize {
        block.as_ptr() as usize
    }

    #[inline]
    pub unsafe fn size(block: BlockPtr) -> usize {
        unsafe { block.as_ref().data.size }
    }

    #[inline]
    pub unsafe fn is_free(block: BlockPtr) -> bool {
        unsafe { block.as_ref().data.is_free }
    }

    #[inline]
    pub unsafe fn is_fence(block: BlockPtr) -> bool {
        unsafe { block.as_ref().data.size == 0 }
    }

    /// Address of the first payload byte.
    #[inline]
    pub fn payload(block: BlockPtr) -> NonNull<u8> {
        unsafe { block.cast::<u8>().add(BLOCK_HEADER_SIZE) }
    }

    /// Recovers the header from a payload pointer handed out earlier.
    ///
    /// **SAFETY**: `ptr` must be a payload address returned by [`Block::payload`].
    #[inline]
    pub unsafe fn from_payload(ptr: NonNull<u8>) -> BlockPtr {
        unsafe { ptr.sub(BLOCK_HEADER_SIZE).cast() }
    }

    /// One past the last payload byte, which is also where the physically
    /// next header starts.
    #[inline]
    pub unsafe fn end(block: BlockPtr) -> usize {
        unsafe { Self::addr(block) + BLOCK_HEADER_SIZE + Self::size(block) }
    }

    /// Physically next header. Every block is followed by either a block or a
    /// fence, so this never leaves the heap for a non-fence `block`.
    #[inline]
    pub unsafe fn right(block: BlockPtr) -> BlockPtr {
        unsafe { NonNull::new_unchecked(Self::end(block) as *mut Node<Block>) }
    }
}
