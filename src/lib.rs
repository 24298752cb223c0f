//! Free-list allocator with size-segregated bins.
//!
//! [`Heap`] hands out blocks carved from [`PAGE_SIZE`] regions that it
//! requests from a [`PageProvider`]. Every block is preceded by a small header
//! holding its size, so releasing only needs the pointer:
//!
//! ```text
//! +-------------------------------+
//! | Header   | Actual memory block |
//! +-------------------------------+
//!            ^
//!            pointer handed to the user
//! ```
//!
//! Free blocks are filed in power of two size classes and searched best-fit.
//! Released blocks are never merged with their neighbours.
//!
//! ```
//! use binalloc::Heap;
//!
//! let mut heap = Heap::new();
//!
//! let ptr = heap.allocate(64).unwrap();
//! unsafe {
//!     ptr.as_ptr().write_bytes(0xAA, 64);
//!     heap.release(ptr);
//! }
//!
//! assert_eq!(heap.allocate(64).unwrap(), ptr);
//! ```

mod bins;
mod block;
mod error;
mod freelist;
mod heap;
mod kernel;
mod stats;
mod utils;

pub use bins::{BIN_COUNT, MAX_BIN_SCALE, MIN_BIN_SCALE, OVERFLOW_BIN, bin_index};
pub use block::HEADER_SIZE;
pub use error::Error;
pub use heap::{ALIGNMENT, Heap, MAX_SIZE, MIN_SIZE, PAGE_SIZE};
pub use kernel::{PageProvider, SystemPages, page_size};
pub use stats::HeapStats;
pub use utils::align;
