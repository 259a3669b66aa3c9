//! Runs the whole program on top of [`SegAlloc`] and checks, through ordinary
//! boxes, how its size classes behave.

use std::{mem, thread};

use segalloc::{HEADER_SIZE, SegAlloc, class::class_of};

#[global_allocator]
static ALLOCATOR: SegAlloc = SegAlloc::new();

/// Payload that fills a block of `block` bytes exactly.
const fn payload(block: usize) -> usize {
    block - HEADER_SIZE
}

fn main() {
    // The runtime allocated before `main`, so the first region is already split.
    let regions = ALLOCATOR.regions_acquired();
    assert!(regions >= 1);
    println!("Regions mapped before main: {regions}");
    println!("Free blocks per class: {:?}", ALLOCATOR.occupancy());

    // A released block is the next one handed out for its class.
    let first = Box::new(7u64);
    let first_addr = &*first as *const u64;
    drop(first);

    let second = Box::new(9u64);
    assert_eq!(first_addr, &*second as *const u64);
    println!("u64 box reused at {first_addr:p}");

    // Two released halves never serve a request of twice their size.
    let small = class_of(64);
    let big = class_of(128);

    let a = Box::new([1u8; payload(64)]);
    let b = Box::new([2u8; payload(64)]);
    let a_addr = a.as_ptr() as usize;
    let b_addr = b.as_ptr() as usize;

    let before = ALLOCATOR.occupancy();
    drop(a);
    drop(b);
    let released = ALLOCATOR.occupancy();
    assert_eq!(released[small], before[small] + 2);

    let c = Box::new([3u8; payload(128)]);
    let c_addr = c.as_ptr() as usize;
    let after = ALLOCATOR.occupancy();

    assert_eq!(after[small], released[small]);
    assert!(after[big] <= released[big]);
    assert_ne!(c_addr, a_addr);
    assert_ne!(c_addr, b_addr);
    println!("{} byte box at {c_addr:#x}, released 64 byte blocks left alone", mem::size_of_val(&*c));

    // Every thread goes through the same lock.
    let workers: Vec<_> = (0..4)
        .map(|id| thread::spawn(move || (0..100).map(|i| format!("{id}:{i}")).collect::<Vec<_>>()))
        .collect();

    let total: usize = workers.into_iter().map(|worker| worker.join().unwrap().len()).sum();
    assert_eq!(total, 400);

    println!("Regions mapped: {}", ALLOCATOR.regions_acquired());
    println!("Free blocks per class: {:?}", ALLOCATOR.occupancy());
}
