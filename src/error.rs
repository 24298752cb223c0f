use std::io;

/// Errors surfaced by [`crate::Heap::allocate`].
///
/// Misuse of the allocator (releasing a foreign pointer, releasing twice,
/// sizes that are not multiples of [`crate::ALIGNMENT`]) is not reported
/// here. Those are preconditions of the callers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The page provider could not hand out a region of `len` bytes.
    #[error("page provider refused a region of {len} bytes")]
    OutOfPages {
        len: usize,
        #[source]
        source: io::Error,
    },

    /// No fresh page is big enough to hold a block of `size` bytes.
    #[error("allocation of {size} bytes does not fit in a single page")]
    Unsupported { size: usize },
}
