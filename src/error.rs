use snafu::Snafu;

/// Why an allocation, zero-allocation or resize could not be served.
///
/// [`AllocError::ZeroSize`] and [`AllocError::SizeOverflow`] are *invalid
/// requests*: they are rejected before the heap or the OS is touched.
/// [`AllocError::Exhausted`] means the OS refused to extend the heap; every
/// block handed out earlier is still valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AllocError {
    #[snafu(display("zero-sized allocation request"))]
    ZeroSize,
    #[snafu(display("allocation size overflows the address space"))]
    SizeOverflow,
    #[snafu(display("the operating system refused to extend the heap by {bytes} bytes"))]
    Exhausted { bytes: usize },
}

impl AllocError {
    /// `true` for requests that were rejected without touching the OS.
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::ZeroSize | Self::SizeOverflow)
    }
}
