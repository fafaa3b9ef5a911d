//! A dynamic memory allocator that grows a single heap through the program
//! break.
//!
//! Every block carries a header in front of its payload. Blocks are laid out
//! back to back and free blocks are kept in a size-ordered intrusive list, so
//! released memory is reused best-fit and physically adjacent free blocks
//! are always merged.
//!
//! ```text
//!         +-----+-------------+-----+---------+-----+---------------+-------+
//!  heap:  | hdr | payload     | hdr | payload | hdr | payload       | fence | <- break
//!         +-----+-------------+-----+---------+-----+---------------+-------+
//!                 used                free          used
//! ```
//!
//! [`Allocator`] is one allocator context. [`BrkAlloc`] wraps the process
//! wide context in a lock and implements [`std::alloc::GlobalAlloc`]; with
//! the `preload` feature the C allocation functions are exported as well.
//!
//! ```
//! use brkalloc::{Allocator, ArenaBreak, Policy};
//!
//! let brk = ArenaBreak::new(16 << 20).unwrap();
//! let mut allocator = Allocator::new(brk, (), Policy::new());
//!
//! let ptr = allocator.allocate(100).unwrap();
//! let ptr = unsafe { allocator.resize(Some(ptr), 4000) }.unwrap();
//! unsafe { allocator.release(ptr) };
//! ```

mod arena;
mod block;
mod bump;
mod config;
mod error;
mod freelist;
mod global;
mod kernel;
mod list;
mod memalloc;
mod realloc;
mod region;
mod stats;
mod utils;

#[cfg(all(unix, feature = "preload"))]
mod preload;

pub use arena::ArenaBreak;
pub use block::{ALIGNMENT, BLOCK_HEADER_SIZE};
pub use config::{BumpPolicy, Policy};
pub use error::AllocError;
pub use global::BrkAlloc;
pub use kernel::{Break, SystemBreak, page_size};
pub use memalloc::{Allocator, HeapReport};
pub use stats::{Stats, StatsHook, StatsSnapshot};
