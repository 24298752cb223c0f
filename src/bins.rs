//! Size-segregated free lists.
//!
//! Free blocks are filed by size class. Bin `i` holds blocks whose size is
//! at most `2^(i + MIN_BIN_SCALE)`, and the last bin catches everything that
//! is larger than the biggest class:
//!
//! ```text
//!  bin:     0     1     2     3    ...     8      9
//!  sizes: <=8  <=16  <=32  <=64   ...  <=2048  (overflow)
//! ```
//!
//! Classification only bounds a block from above, so a search for `size`
//! starts at `bin_index(size)` and may have to look at every bin after it.

use std::ptr::NonNull;

use crate::{
    block::Header,
    freelist::{Fit, FreeList},
};

/// Scale of the smallest size class, `2^3 = 8` bytes.
pub const MIN_BIN_SCALE: usize = 3;
/// Scale from which on everything lands in the overflow bin.
pub const MAX_BIN_SCALE: usize = 12;
/// Number of bins, the overflow bin included.
pub const BIN_COUNT: usize = MAX_BIN_SCALE - MIN_BIN_SCALE + 1;
/// Index of the overflow bin.
pub const OVERFLOW_BIN: usize = MAX_BIN_SCALE - MIN_BIN_SCALE;

/// Returns the smallest bin whose upper bound can hold `size`, or the
/// overflow bin if no size class is big enough.
pub fn bin_index(size: usize) -> usize {
    (MIN_BIN_SCALE..MAX_BIN_SCALE)
        .find(|&scale| 1usize << scale >= size)
        .map_or(OVERFLOW_BIN, |scale| scale - MIN_BIN_SCALE)
}

/// The fixed array of bins.
pub(crate) struct Bins {
    lists: [FreeList; BIN_COUNT],
}

/// Result of a search across bins: which bin and which block of it.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Found {
    pub bin: usize,
    pub fit: Fit,
}

impl Bins {
    pub const fn new() -> Self {
        Self {
            lists: [const { FreeList::new() }; BIN_COUNT],
        }
    }

    /// Empties every bin.
    pub fn clear(&mut self) {
        self.lists.iter_mut().for_each(FreeList::clear);
    }

    /// Files a free `block` in the bin of its size.
    ///
    /// **SAFETY**: `block` must be a valid header not linked from any list.
    pub unsafe fn insert(&mut self, block: NonNull<Header>) -> usize {
        let bin = bin_index(unsafe { block.as_ref().size });

        unsafe { self.lists[bin].push(block) };

        bin
    }

    /// Looks for a block that fits `size`, starting at its own size class.
    ///
    /// Each bin is scanned for its best fit, but the search stops at the
    /// first bin that has any fitting block at all. A tighter fit sitting in
    /// a later bin is never considered.
    pub fn find(&self, size: usize) -> Option<Found> {
        (bin_index(size)..BIN_COUNT).find_map(|bin| {
            self.lists[bin]
                .best_fit(size)
                .map(|fit| Found { bin, fit })
        })
    }

    /// Takes the block described by `found` out of its bin.
    ///
    /// **SAFETY**: `found` must come from [`Bins::find`] with no mutation in
    /// between.
    pub unsafe fn remove(&mut self, found: Found) {
        unsafe { self.lists[found.bin].unlink(found.fit) }
    }

    /// The free list of `bin`.
    #[cfg(test)]
    pub fn list(&self, bin: usize) -> &FreeList {
        &self.lists[bin]
    }

    /// Total number of free blocks across all bins.
    pub fn free_blocks(&self) -> usize {
        self.lists.iter().map(FreeList::len).sum()
    }

    /// Payload bytes held by free blocks across all bins.
    pub fn free_bytes(&self) -> usize {
        self.lists
            .iter()
            .flatten()
            .map(|block| unsafe { block.as_ref().size })
            .sum()
    }
}
