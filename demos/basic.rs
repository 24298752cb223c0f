use std::ptr::NonNull;

use binalloc::Heap;

fn log_alloc(addr: NonNull<u8>, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() -> Result<(), binalloc::Error> {
    let mut heap = Heap::new();

    let addr1 = heap.allocate(8)?;
    log_alloc(addr1, 8);

    let addr2 = heap.allocate(104)?;
    log_alloc(addr2, 104);

    // Doesn't fit next to the others, so this one needs a second page.
    let addr3 = heap.allocate(4000)?;
    log_alloc(addr3, 4000);

    unsafe {
        heap.release(addr1);
    }

    let addr4 = heap.allocate(8)?;
    println!("Should be first addr {addr4:?}");

    unsafe {
        heap.release(addr2);
        heap.release(addr3);
        heap.release(addr4);
    }

    heap.finalize();
    println!("{}", heap.stats());

    Ok(())
}
