//! Low level memory requests and platform-dependant stuff.
//!
//! The allocator talks to the operating system through two primitives:
//!
//! - a [`Break`]: the single moving boundary of the process data segment,
//!   which backs the heap proper;
//! - anonymous mappings ([`request_memory`], [`return_memory`],
//!   [`discard_memory`]) which back the bump sub-heap and [`crate::ArenaBreak`].

use std::{ptr::NonNull, sync::atomic::{AtomicUsize, Ordering}};

/// Virtual memory page size of the computer. This is usually 4096.
/// This value should be a constant, but we can't do that since we
/// don't know the value at compile time.
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// A monotonic break pointer: the end of a contiguous region that can be
/// moved forwards (grow) and backwards (shrink).
///
/// This trait is what the heap grows through. [`SystemBreak`] is the real
/// process break; [`crate::ArenaBreak`] is a private break used to run
/// isolated allocator contexts.
pub trait Break {
    /// Current break address.
    fn current(&self) -> usize;

    /// Moves the break by `delta` bytes and returns the previous break, or
    /// `None` if the request was refused. A refused request leaves the break
    /// where it was.
    ///
    /// # Safety
    ///
    /// Shrinking must only give back memory the caller owns and no longer uses.
    unsafe fn adjust(&mut self, delta: isize) -> Option<NonNull<u8>>;
}

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the allocator, our top level view of this, has nothing
/// to do with the concrete implementations / APIs offered by each kernel.
trait PlatformMemory {
    /// Request a memory region of size `len`. It returns a Pointer to the
    /// given location or None if the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    unsafe fn return_memory(addr: *mut u8, len: usize);

    /// Tells the kernel the contents of `addr..addr + len` are no longer
    /// needed. The range stays mapped and reads back as zeroes or as the old
    /// contents, so it can be reused without another request.
    unsafe fn discard_memory(addr: *mut u8, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

/// The platform memory services: anonymous mappings and the process break.
pub(crate) struct Kernel;

/// Wrapper to calculate the computer's page size.
#[inline]
pub fn page_size() -> usize {
    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let size = unsafe { Kernel::page_size() };
            PAGE_SIZE.store(size, Ordering::Relaxed);
            size
        }
        size => size,
    }
}

/// Wrapper to use [`Kernel::request_memory`]
#[inline]
pub(crate) unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
    unsafe { Kernel::request_memory(len) }
}

/// Wrapper to use [`Kernel::return_memory`]
#[inline]
pub(crate) unsafe fn return_memory(addr: *mut u8, len: usize) {
    unsafe {
        Kernel::return_memory(addr, len);
    }
}

/// Wrapper to use [`Kernel::discard_memory`]
#[inline]
pub(crate) unsafe fn discard_memory(addr: *mut u8, len: usize) {
    unsafe {
        Kernel::discard_memory(addr, len);
    }
}

#[cfg(unix)]
mod unix {
    use super::{Break, Kernel, PlatformMemory, SystemBreak};

    use libc::{intptr_t, mmap, munmap, off_t, sbrk, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    const SBRK_FAILURE: *mut c_void = usize::MAX as *mut c_void;

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                if addr == libc::MAP_FAILED {
                    return None;
                }

                NonNull::new(addr.cast::<u8>())
            }
        }

        unsafe fn return_memory(addr: *mut u8, len: usize) {
            unsafe {
                munmap(addr as *mut c_void, len as size_t);
            }
        }

        unsafe fn discard_memory(addr: *mut u8, len: usize) {
            unsafe {
                libc::madvise(addr as *mut c_void, len as size_t, libc::MADV_DONTNEED);
            }
        }

        unsafe fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }

    impl Break for SystemBreak {
        fn current(&self) -> usize {
            unsafe { sbrk(0) as usize }
        }

        unsafe fn adjust(&mut self, delta: isize) -> Option<NonNull<u8>> {
            let previous = unsafe { sbrk(delta as intptr_t) };

            if previous == SBRK_FAILURE {
                return None;
            }

            NonNull::new(previous.cast::<u8>())
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{Break, Kernel, PlatformMemory, SystemBreak, page_size};
    use crate::utils::align;

    use windows::Win32::System::{Memory, SystemInformation};

    /// Address space reserved up front for the emulated break.
    #[cfg(target_pointer_width = "64")]
    const BREAK_RESERVATION: usize = 1 << 38;
    #[cfg(not(target_pointer_width = "64"))]
    const BREAK_RESERVATION: usize = 1 << 30;

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<std::ptr::NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: *mut u8, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr as *mut c_void, 0, Memory::MEM_RELEASE);
            }
        }

        unsafe fn discard_memory(addr: *mut u8, len: usize) {
            unsafe {
                Memory::VirtualAlloc(
                    Some(addr as *const c_void),
                    len,
                    Memory::MEM_RESET,
                    Memory::PAGE_READWRITE,
                );
            }
        }

        unsafe fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }

    impl SystemBreak {
        /// Reserves the address range the emulated break moves in.
        unsafe fn reserve(&mut self) -> bool {
            unsafe {
                let addr = Memory::VirtualAlloc(
                    None,
                    BREAK_RESERVATION,
                    Memory::MEM_RESERVE,
                    Memory::PAGE_NOACCESS,
                );

                if addr.is_null() {
                    return false;
                }

                self.base = addr as usize;
                self.brk = self.base;
                self.committed = self.base;
            }

            true
        }
    }

    /// Windows has no data segment break, so [`SystemBreak`] emulates one:
    /// a large reservation whose pages are committed as the break advances
    /// and decommitted as it retreats.
    impl Break for SystemBreak {
        fn current(&self) -> usize {
            self.brk
        }

        unsafe fn adjust(&mut self, delta: isize) -> Option<NonNull<u8>> {
            unsafe {
                if self.base == 0 && !self.reserve() {
                    return None;
                }

                let previous = self.brk;
                let target = previous.checked_add_signed(delta)?;

                if target < self.base || target > self.base + BREAK_RESERVATION {
                    return None;
                }

                let page = page_size();
                let needed = align(target, page);

                if needed > self.committed {
                    let addr = Memory::VirtualAlloc(
                        Some(self.committed as *const c_void),
                        needed - self.committed,
                        Memory::MEM_COMMIT,
                        Memory::PAGE_READWRITE,
                    );

                    if addr.is_null() {
                        return None;
                    }

                    self.committed = needed;
                } else if needed < self.committed {
                    let _ = Memory::VirtualFree(
                        needed as *mut c_void,
                        self.committed - needed,
                        Memory::MEM_DECOMMIT,
                    );

                    self.committed = needed;
                }

                self.brk = target;

                NonNull::new(previous as *mut u8)
            }
        }
    }
}

/// The process break.
///
/// On unix this is `sbrk(2)`. On Windows the break is emulated over a
/// reserved address range, committed page by page.
#[derive(Debug, Default)]
pub struct SystemBreak {
    #[cfg(windows)]
    base: usize,
    #[cfg(windows)]
    brk: usize,
    #[cfg(windows)]
    committed: usize,
}

impl SystemBreak {
    pub const fn new() -> Self {
        Self {
            #[cfg(windows)]
            base: 0,
            #[cfg(windows)]
            brk: 0,
            #[cfg(windows)]
            committed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    #[test]
    fn page_size_is_power_of_two() {
        let size = page_size();

        assert!(size.is_power_of_two());
        assert_eq!(size, page_size());
    }

    #[test]
    fn requested_memory_is_writable_and_discardable() {
        let len = 4 * page_size();

        unsafe {
            let addr = request_memory(len).expect("mapping should succeed");
            addr.as_ptr().write_bytes(0x5a, len);
            assert_eq!(*addr.as_ptr().add(len - 1), 0x5a);

            discard_memory(addr.as_ptr(), len);
            // Still mapped after a discard.
            addr.as_ptr().write(1);
            assert_eq!(*addr.as_ptr(), 1);

            return_memory(addr.as_ptr(), len);
        }
    }
}
