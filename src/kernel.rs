use std::{ptr::NonNull, sync::OnceLock};

use crate::{error::Error, utils::align};

/// Where the heap gets its memory from.
///
/// The heap has nothing to do with the concrete APIs offered by each kernel,
/// it only needs something that hands out raw regions and, optionally, takes
/// them back. [`SystemPages`] is the implementation backed by the OS.
pub trait PageProvider {
    /// Request a memory region of size `len`. The region must be writable,
    /// at least word aligned and exactly `len` bytes long from the heap's
    /// point of view.
    ///
    /// **SAFETY**: the returned region is raw memory, the caller is in charge
    /// of everything that gets written to it.
    unsafe fn acquire_region(&mut self, len: usize) -> Result<NonNull<u8>, Error>;

    /// Returns the region of size `len` starting at `addr`.
    ///
    /// **SAFETY**: `addr` and `len` must describe a region returned by
    /// [`PageProvider::acquire_region`] on this provider, and nothing may
    /// point into it anymore.
    unsafe fn release_region(&mut self, addr: NonNull<u8>, len: usize);
}

/// Anonymous memory straight from the kernel: `mmap` on unix and
/// `VirtualAlloc` on windows.
///
/// Requests are rounded up to the computer's page size, so a heap using
/// [`crate::PAGE_SIZE`] regions maps exactly one page per request on most
/// systems.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPages;

/// Platform dependant half of [`SystemPages`].
trait PlatformMemory {
    /// Request a memory region of size `len`. It returns a Pointer to the
    /// given location or None if the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    unsafe fn return_memory(addr: *mut u8, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

/// Virtual memory page size of the computer, usually 4096. Only known at
/// runtime, so it is asked once and cached.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

    *PAGE_SIZE.get_or_init(|| unsafe { SystemPages::page_size() })
}

impl PageProvider for SystemPages {
    unsafe fn acquire_region(&mut self, len: usize) -> Result<NonNull<u8>, Error> {
        let len = align(len, page_size());

        unsafe { Self::request_memory(len) }.ok_or_else(|| Error::OutOfPages {
            len,
            source: std::io::Error::last_os_error(),
        })
    }

    unsafe fn release_region(&mut self, addr: NonNull<u8>, len: usize) {
        let len = align(len, page_size());

        unsafe { Self::return_memory(addr.as_ptr(), len) }
    }
}

#[cfg(unix)]
mod unix {
    use log::warn;

    use super::{PlatformMemory, SystemPages};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for SystemPages {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                match mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET) {
                    libc::MAP_FAILED => None,
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        unsafe fn return_memory(addr: *mut u8, len: usize) {
            if unsafe { munmap(addr as *mut c_void, len as size_t) } != 0 {
                let err = std::io::Error::last_os_error();
                warn!("could not release region {addr:p} ({len} bytes): {err}");
            }
        }

        unsafe fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use log::warn;

    use super::{PlatformMemory, SystemPages};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for SystemPages {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: *mut u8, len: usize) {
            let released =
                unsafe { Memory::VirtualFree(addr as *mut c_void, 0, Memory::MEM_RELEASE) };

            if let Err(err) = released {
                warn!("could not release region {addr:p} ({len} bytes): {err}");
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
}
