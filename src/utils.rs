//! Helper functions that don't belong to any concrete module of the allocator.

/// It aligns `to_be_aligned` up to the next multiple of `aligment`.
///
/// `aligment` must be a power of two. This is used to round region requests
/// up to the system page size and to check that payload sizes keep block
/// headers word aligned.
#[inline]
pub const fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Whether `value` is already a multiple of `aligment`.
#[inline]
pub const fn is_aligned(value: usize, aligment: usize) -> bool {
    value & (aligment - 1) == 0
}
