use std::ptr::NonNull;

use crate::{
    kernel::{self, Break},
    utils::align,
};

/// A private break over a fixed anonymous mapping.
///
/// The mapping is requested once, with [`kernel::request_memory`], and the
/// break moves inside it exactly like the process break would, except that it
/// refuses to grow past `capacity`. This lets several [`crate::Allocator`]
/// contexts live side by side in one process and makes address-space
/// exhaustion reproducible.
///
/// ```text
///  base                      brk                     base + capacity
///   +------------------------+--------------------------------+
///   |   handed to the heap   |        not yet handed out      |
///   +------------------------+--------------------------------+
/// ```
pub struct ArenaBreak {
    base: NonNull<u8>,
    capacity: usize,
    brk: usize,
}

// SAFETY: the mapping is owned by the value and only reached through it.
unsafe impl Send for ArenaBreak {}

impl ArenaBreak {
    /// Maps `capacity` bytes (rounded up to the page size).
    ///
    /// Returns `None` if the mapping can't be created.
    pub fn new(capacity: usize) -> Option<Self> {
        let capacity = align(capacity.max(1), kernel::page_size());
        let base = unsafe { kernel::request_memory(capacity)? };

        Some(Self {
            base,
            capacity,
            brk: 0,
        })
    }

    /// Total bytes the break may ever cover.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently below the break.
    pub fn used(&self) -> usize {
        self.brk
    }

    /// Start of the mapping.
    pub fn base(&self) -> usize {
        self.base.as_ptr() as usize
    }
}

impl Break for ArenaBreak {
    fn current(&self) -> usize {
        self.base() + self.brk
    }

    unsafe fn adjust(&mut self, delta: isize) -> Option<NonNull<u8>> {
        let target = self.brk.checked_add_signed(delta)?;

        if target > self.capacity {
            return None;
        }

        let previous = unsafe { self.base.add(self.brk) };
        self.brk = target;

        Some(previous)
    }
}

impl Drop for ArenaBreak {
    fn drop(&mut self) {
        unsafe {
            kernel::return_memory(self.base.as_ptr(), self.capacity);
        }
    }
}
