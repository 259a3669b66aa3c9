//! Drives a [`BucketAllocator`] directly and prints how its free lists evolve.

use segalloc::{BucketAllocator, Kernel, MAX_REQUEST};

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() -> Result<(), segalloc::Error> {
    let mut allocator = BucketAllocator::new(Kernel::new());

    let small = allocator.allocate(8)?;
    log_alloc(small.as_ptr(), 8);
    println!("{allocator:?}");

    let medium = allocator.allocate(200)?;
    log_alloc(medium.as_ptr(), 200);

    let big = allocator.allocate(MAX_REQUEST)?;
    log_alloc(big.as_ptr(), MAX_REQUEST);
    println!("{allocator:?}");

    unsafe {
        allocator.release(small);
        allocator.release(medium);
        allocator.release(big);
    }

    let again = allocator.allocate(8)?;
    println!("Should be first addr {:?}", again);
    println!("{allocator:?}");

    Ok(())
}
