use std::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

use spin::Mutex;

use crate::{
    block::ALIGNMENT,
    config::Policy,
    kernel::{Break, SystemBreak},
    memalloc::Allocator,
    stats::{Stats, StatsSnapshot},
};

/// [`GlobalAlloc`] adapter over one locked [`Allocator`] context.
///
/// ```no_run
/// use brkalloc::BrkAlloc;
///
/// #[global_allocator]
/// static ALLOCATOR: BrkAlloc = BrkAlloc::new();
/// ```
///
/// The lock only serialises callers, the engine itself stays single
/// threaded. Layouts aligned to more than [`ALIGNMENT`] are refused.
///
/// The allocator logs through the [`log`] facade. Don't install a logger
/// that allocates while this is the global allocator: the log call happens
/// with the lock held.
pub struct BrkAlloc<B: Break = SystemBreak> {
    inner: Mutex<Allocator<B, Stats>>,
}

impl BrkAlloc<SystemBreak> {
    pub const fn new() -> Self {
        Self::with_break(SystemBreak::new(), Policy::new())
    }
}

impl Default for BrkAlloc<SystemBreak> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Break> BrkAlloc<B> {
    pub const fn with_break(brk: B, policy: Policy) -> Self {
        Self {
            inner: Mutex::new(Allocator::new(brk, Stats::new(), policy)),
        }
    }

    /// Counters of outstanding memory.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.lock().hook().snapshot()
    }

    /// Runs `f` with the context locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut Allocator<B, Stats>) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

/// Request size for `layout`, `None` if the alignment can't be honoured.
///
/// Requests are at least `align` bytes so that small slots, which are only
/// aligned to their own size, still satisfy the layout.
#[inline]
fn request_size(layout: Layout) -> Option<usize> {
    (layout.align() <= ALIGNMENT).then(|| layout.size().max(layout.align()))
}

#[inline]
fn into_raw(ptr: Option<NonNull<u8>>) -> *mut u8 {
    ptr.map_or(ptr::null_mut(), NonNull::as_ptr)
}

unsafe impl<B: Break> GlobalAlloc for BrkAlloc<B> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let Some(size) = request_size(layout) else {
            return ptr::null_mut();
        };

        into_raw(self.with(|allocator| allocator.allocate(size)).ok())
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let Some(size) = request_size(layout) else {
            return ptr::null_mut();
        };

        into_raw(self.with(|allocator| allocator.zero_allocate(1, size)).ok())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.with(|allocator| unsafe { allocator.release(NonNull::new(ptr)) });
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        let size = new_size.max(layout.align());

        self.with(|allocator| unsafe { allocator.resize(NonNull::new(ptr), size) })
            .map_or(ptr::null_mut(), into_raw)
    }
}
