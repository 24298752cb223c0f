use std::{mem, ptr::NonNull};

/// Non-null pointer to `T`. `None` terminates every free list.
pub(crate) type Link<T> = Option<NonNull<T>>;

/// Size of the block header in bytes. Every block, free or allocated, pays
/// this overhead right before its payload.
pub const HEADER_SIZE: usize = mem::size_of::<Header>();

/// This is the structure of a block. The header is the metadata of the block
/// and the payload handed out to the user starts right after it.
///
/// ```text
/// +---------------------+ <------+
/// |        size         |        |
/// +---------------------+        | -> Header
/// |   next (free only)  |        |
/// +---------------------+ <------+ <-- payload_of(header)
/// |       Payload       |        |
/// |         ...         |        | -> `size` bytes
/// |         ...         |        |
/// +---------------------+ <------+
/// ```
///
/// The header is two machine words, so as long as payload sizes are multiples
/// of [`crate::ALIGNMENT`] every header and every payload we hand out stays
/// word aligned inside the page.
#[repr(C)]
pub(crate) struct Header {
    /// Payload capacity in bytes, the header itself not included.
    pub size: usize,
    /// Next free block of the same bin. Always `None` while the block is
    /// handed out to the user.
    pub next: Link<Header>,
}

impl Header {
    /// Writes a fresh header with an empty link at `addr`.
    ///
    /// **SAFETY**: `addr` must be word aligned and valid for writes of
    /// [`HEADER_SIZE`] bytes.
    pub unsafe fn write(addr: NonNull<u8>, size: usize) -> NonNull<Header> {
        let header = addr.cast::<Header>();

        unsafe {
            header.as_ptr().write(Header { size, next: None });
        }

        header
    }
}

/// Returns the payload that follows `header`.
#[inline]
pub(crate) fn payload_of(header: NonNull<Header>) -> NonNull<u8> {
    // SAFETY: the header is always followed by its payload inside the same
    // page, so one header past it is still in bounds.
    unsafe { header.add(1).cast() }
}

/// Recovers the header of a payload previously returned by [`payload_of`].
///
/// **SAFETY**: `payload` must have been produced by [`payload_of`].
#[inline]
pub(crate) unsafe fn header_of(payload: NonNull<u8>) -> NonNull<Header> {
    unsafe { payload.cast::<Header>().sub(1) }
}
