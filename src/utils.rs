//! This file contains all the helper functions for the allocator.
//! This are functions that don't particularly belong to any concrete module of the program.

/// Rounds `to_be_aligned` up to the next multiple of `aligment`.
///
/// This method is used to align growth requests to the computer's page size
/// and payload sizes to [`crate::block::ALIGNMENT`], because every payload we
/// hand out has to start on that boundary.
///
/// `aligment` must be a power of two.
#[inline]
pub const fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping around when
/// `to_be_aligned` is too close to `usize::MAX`.
#[inline]
pub const fn checked_align(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    match to_be_aligned.checked_add(aligment - 1) {
        Some(bumped) => Some(bumped & !(aligment - 1)),
        None => None,
    }
}

/// Rounds `to_be_aligned` down to a multiple of `aligment`.
#[inline]
pub const fn align_down(to_be_aligned: usize, aligment: usize) -> usize {
    to_be_aligned & !(aligment - 1)
}
