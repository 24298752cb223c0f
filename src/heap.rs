use std::ptr::NonNull;

use log::{debug, trace, warn};

use crate::{
    bins::Bins,
    block::{HEADER_SIZE, Header, header_of, payload_of},
    error::Error,
    kernel::{PageProvider, SystemPages},
    stats::HeapStats,
    utils::is_aligned,
};

/// Every request size must be a multiple of this.
pub const ALIGNMENT: usize = 8;
/// Smallest supported request.
pub const MIN_SIZE: usize = 8;
/// Largest supported request.
pub const MAX_SIZE: usize = 4000;
/// Size of every region requested from the [`PageProvider`]. It comfortably
/// exceeds [`MAX_SIZE`] plus one header, so a fresh region always satisfies
/// a supported request.
pub const PAGE_SIZE: usize = 4096;

/// Free-list allocator with size-segregated bins.
///
/// The heap grabs [`PAGE_SIZE`] regions from its [`PageProvider`] and carves
/// them into blocks. Every block is preceded by a [`HEADER_SIZE`] header (see
/// [`crate::block`]). Free blocks are kept in bins by size class and the
/// allocator searches them best-fit:
///
/// ```text
///   bins
/// +------+
/// |  0   | -> None
/// +------+      +------+      +------+
/// |  1   | ---> |  16  | ---> |  8   | -> None
/// +------+      +------+      +------+
/// | ...  |
/// +------+      +------+
/// |  9   | ---> | 3064 | -> None
/// +------+      +------+
/// ```
///
/// Released blocks are pushed back into their bin as they are. Neighbouring
/// free blocks are never merged, so a released block is only ever reused as
/// a whole or split further.
///
/// A heap is single threaded. It holds raw pointers, so it is neither `Send`
/// nor `Sync`, and every operation needs `&mut self`.
pub struct Heap<P: PageProvider = SystemPages> {
    bins: Bins,
    pages: P,
    stats: HeapStats,
}

impl Heap {
    /// Creates an empty heap backed by the operating system.
    pub fn new() -> Self {
        Self::with_provider(SystemPages)
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PageProvider> Heap<P> {
    /// Creates an empty heap that requests its regions from `pages`.
    pub fn with_provider(pages: P) -> Self {
        let mut heap = Self {
            bins: Bins::new(),
            pages,
            stats: HeapStats::default(),
        };

        heap.initialize();
        heap
    }

    /// Empties every bin and resets the statistics.
    ///
    /// Free blocks known to the heap are forgotten and the regions they live
    /// in stay with the heap, they are never handed back to the provider.
    /// Pointers that are still live remain valid and can be released later,
    /// which files them in the new bins.
    pub fn initialize(&mut self) {
        self.bins.clear();
        self.stats = HeapStats::default();
    }

    /// Hook called once the heap is no longer needed.
    ///
    /// It only reports the statistics. Every region acquired so far stays
    /// outstanding, as does every live allocation.
    pub fn finalize(&mut self) {
        debug!("finalizing heap: {}", self.stats);
    }

    /// Allocates `size` bytes and returns a pointer to them.
    ///
    /// `size` must be a multiple of [`ALIGNMENT`] between [`MIN_SIZE`] and
    /// [`MAX_SIZE`]. This is the caller's contract and it is only checked in
    /// debug builds. Sizes that no region could hold are refused with
    /// [`Error::Unsupported`].
    ///
    /// The returned pointer is [`ALIGNMENT`] aligned and valid for `size`
    /// bytes until it is handed to [`Heap::release`].
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, Error> {
        debug_assert!(
            size >= MIN_SIZE && is_aligned(size, ALIGNMENT),
            "unsupported allocation size {size}"
        );

        if size > PAGE_SIZE - HEADER_SIZE {
            return Err(Error::Unsupported { size });
        }

        let found = loop {
            if let Some(found) = self.bins.find(size) {
                break found;
            }

            self.grow()?;
        };

        unsafe {
            self.bins.remove(found);

            let mut block = found.fit.block;
            let remaining = block.as_ref().size - size;
            block.as_mut().size = size;

            let payload = payload_of(block);

            if remaining > HEADER_SIZE {
                // ... | header | payload | header | free rest | ...
                //               <-------> <------------------>
                //                 size         remaining
                let rest = Header::write(payload.add(size), remaining - HEADER_SIZE);
                let bin = self.bins.insert(rest);

                self.stats.splits += 1;
                trace!(
                    "split {block:p}: {size} bytes out, {} bytes to bin {bin}",
                    remaining - HEADER_SIZE
                );
            } else {
                self.stats.slack_bytes += remaining;
            }

            self.stats.allocations += 1;
            self.stats.live_bytes += size;
            trace!("allocate({size}) -> {payload:p} from bin {}", found.bin);

            Ok(payload)
        }
    }

    /// Gives the memory at `ptr` back to the heap.
    ///
    /// The block goes to the head of the bin matching its size. It is not
    /// merged with adjacent free blocks.
    ///
    /// **SAFETY**: `ptr` must have been returned by [`Heap::allocate`] on this
    /// heap and not released since. Nothing detects a violation in release
    /// builds, it silently corrupts the free lists.
    pub unsafe fn release(&mut self, ptr: NonNull<u8>) {
        unsafe {
            let block = header_of(ptr);
            let size = block.as_ref().size;
            let bin = self.bins.insert(block);

            self.stats.releases += 1;
            self.stats.live_bytes = self.stats.live_bytes.saturating_sub(size);
            trace!("release({ptr:p}) -> {size} bytes to bin {bin}");
        }
    }

    /// Statistics gathered since the last [`Heap::initialize`].
    pub fn stats(&self) -> &HeapStats {
        &self.stats
    }

    /// Number of free blocks currently filed in the bins.
    pub fn free_blocks(&self) -> usize {
        self.bins.free_blocks()
    }

    /// Payload bytes held by the free blocks in the bins.
    pub fn free_bytes(&self) -> usize {
        self.bins.free_bytes()
    }

    /// The page provider this heap requests its regions from.
    pub fn provider(&self) -> &P {
        &self.pages
    }

    /// Mutable access to the page provider, e.g. to reconfigure it between
    /// requests. Regions already handed to the heap must not be touched.
    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.pages
    }

    /// Requests a new region and files it as a single free block.
    fn grow(&mut self) -> Result<(), Error> {
        let region = unsafe { self.pages.acquire_region(PAGE_SIZE) }.inspect_err(|err| {
            warn!("could not grow heap: {err}");
        })?;

        //     | header | free block |
        //     ^
        //     region
        //     <----------------------->
        //            PAGE_SIZE
        let block = unsafe { Header::write(region, PAGE_SIZE - HEADER_SIZE) };
        let bin = unsafe { self.bins.insert(block) };

        self.stats.pages_acquired += 1;
        self.stats.bytes_acquired += PAGE_SIZE;
        debug!("acquired region {region:p} ({PAGE_SIZE} bytes) into bin {bin}");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        alloc::{self, Layout},
        io, ptr,
    };

    use super::*;
    use crate::bins::bin_index;

    /// Page provider on top of the global allocator. It counts requests, can
    /// be told to refuse them and frees everything it handed out on drop.
    #[derive(Default)]
    struct TestPages {
        regions: Vec<(NonNull<u8>, usize)>,
        requests: usize,
        fail: bool,
    }

    impl TestPages {
        fn layout(len: usize) -> Layout {
            Layout::from_size_align(len, PAGE_SIZE).unwrap()
        }
    }

    impl PageProvider for TestPages {
        unsafe fn acquire_region(&mut self, len: usize) -> Result<NonNull<u8>, Error> {
            self.requests += 1;

            if self.fail {
                return Err(Error::OutOfPages {
                    len,
                    source: io::Error::from(io::ErrorKind::OutOfMemory),
                });
            }

            let addr = NonNull::new(unsafe { alloc::alloc(Self::layout(len)) }).unwrap();
            self.regions.push((addr, len));

            Ok(addr)
        }

        unsafe fn release_region(&mut self, addr: NonNull<u8>, len: usize) {
            self.regions.retain(|&(region, _)| region != addr);

            unsafe { alloc::dealloc(addr.as_ptr(), Self::layout(len)) }
        }
    }

    impl Drop for TestPages {
        fn drop(&mut self) {
            for (addr, len) in std::mem::take(&mut self.regions) {
                unsafe { alloc::dealloc(addr.as_ptr(), Self::layout(len)) }
            }
        }
    }

    fn heap() -> Heap<TestPages> {
        Heap::with_provider(TestPages::default())
    }

    fn overlaps(a: (NonNull<u8>, usize), b: (NonNull<u8>, usize)) -> bool {
        let (a_start, b_start) = (a.0.as_ptr() as usize, b.0.as_ptr() as usize);

        a_start < b_start + b.1 && b_start < a_start + a.1
    }

    unsafe fn fill(ptr: NonNull<u8>, size: usize, byte: u8) {
        unsafe { ptr::write_bytes(ptr.as_ptr(), byte, size) }
    }

    unsafe fn holds(ptr: NonNull<u8>, size: usize, byte: u8) -> bool {
        unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size) }
            .iter()
            .all(|&b| b == byte)
    }

    #[test]
    fn new_heap_is_empty() {
        let heap = heap();

        assert_eq!(heap.free_blocks(), 0);
        assert_eq!(*heap.stats(), HeapStats::default());
        assert_eq!(heap.provider().requests, 0);
    }

    #[test]
    fn every_supported_size_is_aligned_and_usable() {
        let mut heap = heap();
        let mut live = Vec::new();

        for (i, size) in (MIN_SIZE..=MAX_SIZE).step_by(ALIGNMENT).enumerate() {
            let ptr = heap.allocate(size).unwrap();

            assert_eq!(ptr.as_ptr() as usize % ALIGNMENT, 0);
            unsafe { fill(ptr, size, i as u8) };

            live.push((ptr, size, i as u8));
        }

        for &(ptr, size, byte) in &live {
            assert!(unsafe { holds(ptr, size, byte) }, "block {ptr:p} was clobbered");
        }

        for (i, a) in live.iter().enumerate() {
            for b in &live[i + 1..] {
                assert!(!overlaps((a.0, a.1), (b.0, b.1)));
            }
        }
    }

    #[test]
    fn two_big_allocations_need_two_pages() {
        let mut heap = heap();

        let first = heap.allocate(3000).unwrap();
        assert_eq!(heap.stats().pages_acquired, 1);

        let second = heap.allocate(3000).unwrap();
        assert_eq!(heap.stats().pages_acquired, 2);
        assert_eq!(heap.provider().requests, 2);

        assert_ne!(first, second);
        assert!(!overlaps((first, 3000), (second, 3000)));
    }

    #[test]
    fn released_block_is_reused() {
        let mut heap = heap();

        let first = heap.allocate(16).unwrap();
        unsafe { heap.release(first) };
        let second = heap.allocate(16).unwrap();

        assert_eq!(first, second);
        assert_eq!(heap.stats().pages_acquired, 1);
    }

    #[test]
    fn split_remainder_serves_next_request() {
        let mut heap = heap();

        let first = heap.allocate(104).unwrap();
        let second = heap.allocate(56).unwrap();

        assert_eq!(heap.stats().pages_acquired, 1);
        assert_eq!(heap.stats().splits, 2);

        // The remainder starts right after the first block.
        let expected = first.as_ptr() as usize + 104 + HEADER_SIZE;
        assert_eq!(second.as_ptr() as usize, expected);
    }

    #[test]
    fn small_remainder_stays_as_slack() {
        let mut heap = heap();

        heap.allocate(4000).unwrap();
        // The page leaves 4096 - 16 - 4000 = 80 bytes, split into a 64 byte block.
        assert_eq!(heap.stats().splits, 1);
        assert_eq!(heap.free_blocks(), 1);
        assert_eq!(heap.free_bytes(), 64);

        let tail = heap.allocate(56).unwrap();

        assert_eq!(heap.stats().pages_acquired, 1);
        assert_eq!(heap.stats().splits, 1);
        assert_eq!(heap.stats().slack_bytes, 8);
        assert_eq!(heap.free_blocks(), 0);

        // The slack is gone for good: the block comes back as 56 bytes.
        unsafe {
            heap.release(tail);
            assert_eq!(header_of(tail).as_ref().size, 56);
        }
    }

    #[test]
    fn best_fit_within_bin() {
        let mut heap = heap();

        let a = heap.allocate(48).unwrap();
        let b = heap.allocate(40).unwrap();
        let _guard = heap.allocate(48).unwrap();

        unsafe {
            heap.release(b);
            heap.release(a);
        }

        // Bin 3 holds 48 (head) and 40, the remainder of the page sits in the
        // overflow bin. The tighter 40 byte block wins over the head.
        assert_eq!(heap.allocate(40).unwrap(), b);
        assert_eq!(heap.allocate(40).unwrap(), a);
    }

    #[test]
    fn adjacent_free_blocks_are_not_merged() {
        let mut heap = heap();

        let a = heap.allocate(64).unwrap();
        let b = heap.allocate(64).unwrap();
        assert_eq!(b.as_ptr() as usize, a.as_ptr() as usize + 64 + HEADER_SIZE);

        unsafe {
            heap.release(a);
            heap.release(b);
        }

        assert_eq!(heap.bins.list(bin_index(64)).len(), 2);

        // 128 bytes would fit in a + b merged, but it has to come from the
        // rest of the page instead.
        let c = heap.allocate(128).unwrap();
        assert_ne!(c, a);
        assert_eq!(heap.bins.list(bin_index(64)).len(), 2);
    }

    #[test]
    fn pages_grow_with_bytes_consumed() {
        let mut heap = heap();

        for _ in 0..100 {
            heap.allocate(1000).unwrap();
        }

        // 4080 usable bytes per page: four blocks of 1000 plus headers, and a
        // 16 byte leftover that never fits a 1000 byte request.
        assert_eq!(heap.stats().pages_acquired, 25);
        assert_eq!(heap.stats().live_bytes, 100_000);
        assert_eq!(heap.stats().live_allocations(), 100);
    }

    #[test]
    fn live_blocks_survive_churn() {
        let mut heap = heap();
        let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();
        let mut seed: u32 = 0x2545_f491;

        for round in 0..2000u32 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;

            if seed % 3 == 0 && !live.is_empty() {
                let (ptr, size, byte) = live.swap_remove(seed as usize % live.len());

                assert!(unsafe { holds(ptr, size, byte) });
                unsafe { heap.release(ptr) };
            } else {
                let size = (seed as usize % (MAX_SIZE / ALIGNMENT) + 1) * ALIGNMENT;
                let ptr = heap.allocate(size).unwrap();
                let byte = round as u8;

                unsafe { fill(ptr, size, byte) };
                live.push((ptr, size, byte));
            }
        }

        for &(ptr, size, byte) in &live {
            assert!(unsafe { holds(ptr, size, byte) });
        }

        assert_eq!(heap.stats().live_allocations(), live.len());
        assert_eq!(
            heap.stats().live_bytes,
            live.iter().map(|&(_, size, _)| size).sum::<usize>()
        );
    }

    #[test]
    fn provider_failure_is_reported() {
        let mut heap = heap();
        heap.provider_mut().fail = true;

        let err = heap.allocate(64).unwrap_err();
        assert!(matches!(err, Error::OutOfPages { len: PAGE_SIZE, .. }));
        assert_eq!(heap.stats().pages_acquired, 0);
        assert_eq!(heap.free_blocks(), 0);

        heap.provider_mut().fail = false;
        assert!(heap.allocate(64).is_ok());
        assert_eq!(heap.stats().pages_acquired, 1);
    }

    #[test]
    fn oversized_request_never_reaches_provider() {
        let mut heap = heap();

        let err = heap.allocate(PAGE_SIZE).unwrap_err();

        assert!(matches!(err, Error::Unsupported { size: PAGE_SIZE }));
        assert_eq!(heap.provider().requests, 0);
    }

    #[test]
    fn largest_block_fits_a_fresh_page() {
        let mut heap = heap();

        let ptr = heap.allocate(PAGE_SIZE - HEADER_SIZE).unwrap();

        assert_eq!(heap.stats().pages_acquired, 1);
        assert_eq!(heap.stats().slack_bytes, 0);
        assert_eq!(heap.free_blocks(), 0);
        unsafe { fill(ptr, PAGE_SIZE - HEADER_SIZE, 0xFF) };
    }

    #[test]
    fn initialize_forgets_free_blocks() {
        let mut heap = heap();

        let live = heap.allocate(32).unwrap();
        assert_eq!(heap.free_blocks(), 1);

        heap.initialize();
        assert_eq!(heap.free_blocks(), 0);
        assert_eq!(*heap.stats(), HeapStats::default());

        // The old page is forgotten, the next request needs a new one.
        heap.allocate(32).unwrap();
        assert_eq!(heap.provider().requests, 2);

        // Pointers handed out before are still good to release.
        unsafe { heap.release(live) };
        assert_eq!(heap.bins.list(bin_index(32)).len(), 1);
    }

    #[test]
    fn finalize_keeps_pages_outstanding() {
        let mut heap = heap();

        let ptr = heap.allocate(128).unwrap();
        unsafe { fill(ptr, 128, 7) };

        heap.finalize();

        assert_eq!(heap.provider().regions.len(), 1);
        assert!(unsafe { holds(ptr, 128, 7) });
    }

    #[test]
    fn system_heap_smoke() {
        let mut heap = Heap::new();

        let a = heap.allocate(3000).unwrap();
        let b = heap.allocate(3000).unwrap();

        unsafe {
            fill(a, 3000, 1);
            fill(b, 3000, 2);
            assert!(holds(a, 3000, 1));
            heap.release(a);
            heap.release(b);
        }

        assert_eq!(heap.stats().pages_acquired, 2);
        heap.finalize();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "released twice")]
    fn releasing_twice_panics_in_debug() {
        let mut heap = heap();

        let ptr = heap.allocate(64).unwrap();

        unsafe {
            // The block lands alone in an empty bin, with no successor.
            heap.release(ptr);
            heap.release(ptr);
        }
    }

    #[test]
    fn released_block_at_list_tail_is_reused_once() {
        let mut heap = heap();

        let a = heap.allocate(64).unwrap();
        let b = heap.allocate(64).unwrap();

        unsafe {
            heap.release(a);
            heap.release(b);
        }

        // Both come back exactly once, the bin is not looping.
        let first = heap.allocate(64).unwrap();
        let second = heap.allocate(64).unwrap();
        assert_eq!((first, second), (b, a));
        assert_eq!(heap.bins.list(bin_index(64)).len(), 0);
    }
}
