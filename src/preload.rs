//! C allocation entry points, so the `cdylib` can replace the C library
//! allocator of any dynamically linked program:
//!
//! ```text
//! $ cargo build --release --features preload
//! $ LD_PRELOAD=target/release/libbrkalloc.so ls
//! ```

use std::ptr::{self, NonNull};

use libc::{c_int, c_void, size_t};

use crate::{BrkAlloc, block::ALIGNMENT};

static ALLOCATOR: BrkAlloc = BrkAlloc::new();

#[inline]
fn into_raw(ptr: Option<NonNull<u8>>) -> *mut c_void {
    ptr.map_or(ptr::null_mut(), |ptr| ptr.as_ptr().cast())
}

/// `true` if blocks can be handed out at `alignment`.
#[inline]
fn supported(alignment: size_t) -> bool {
    alignment.is_power_of_two() && alignment <= ALIGNMENT
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void {
    into_raw(ALLOCATOR.with(|allocator| allocator.allocate(size)).ok())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn calloc(count: size_t, size: size_t) -> *mut c_void {
    into_raw(ALLOCATOR.with(|allocator| allocator.zero_allocate(count, size)).ok())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: size_t) -> *mut c_void {
    let ptr = NonNull::new(ptr.cast::<u8>());

    ALLOCATOR
        .with(|allocator| unsafe { allocator.resize(ptr, size) })
        .map_or(ptr::null_mut(), into_raw)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    let ptr = NonNull::new(ptr.cast::<u8>());

    ALLOCATOR.with(|allocator| unsafe { allocator.release(ptr) });
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc_usable_size(ptr: *mut c_void) -> size_t {
    match NonNull::new(ptr.cast::<u8>()) {
        Some(ptr) => ALLOCATOR.with(|allocator| unsafe { allocator.capacity_of(ptr) }),
        None => 0,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn posix_memalign(memptr: *mut *mut c_void, alignment: size_t, size: size_t) -> c_int {
    if !alignment.is_power_of_two() || alignment % size_of::<*mut c_void>() != 0 {
        return libc::EINVAL;
    }

    if !supported(alignment) {
        return libc::ENOMEM;
    }

    if size == 0 {
        unsafe { memptr.write(ptr::null_mut()) };
        return 0;
    }

    match ALLOCATOR.with(|allocator| allocator.allocate(size.max(alignment))) {
        Ok(ptr) => {
            unsafe { memptr.write(ptr.as_ptr().cast()) };
            0
        }
        Err(_) => libc::ENOMEM,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn aligned_alloc(alignment: size_t, size: size_t) -> *mut c_void {
    if !supported(alignment) {
        return ptr::null_mut();
    }

    unsafe { malloc(size.max(alignment)) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn memalign(alignment: size_t, size: size_t) -> *mut c_void {
    unsafe { aligned_alloc(alignment, size) }
}
