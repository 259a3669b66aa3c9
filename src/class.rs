//! Size classes of the allocator.
//!
//! Every block handed out or kept on a free list has one of the following
//! sizes, header included:
//!
//! ```text
//! index:   0    1    2    3     4     5     6      7      8
//! size:   16   32   64  128   256   512  1024   2048   4096
//! ```
//!
//! Class `i` holds blocks of `MIN_CLASS_SIZE << i` bytes. The biggest class is
//! exactly one region as we request it from the system, so a fresh region is
//! always a single free block of the top class.
//!
//! On 64-bit targets the header alone fills a class 0 block, so requests start
//! at class 1 and class 0 only ever holds leftovers of a split.

use crate::block::HEADER_SIZE;

/// Size in bytes of the smallest class (index 0).
pub const MIN_CLASS_SIZE: usize = 16;

/// Number of size classes, and therefore of free lists.
pub const NUM_CLASSES: usize = 9;

/// Size in bytes of the biggest class (index `NUM_CLASSES - 1`).
pub const MAX_CLASS_SIZE: usize = class_size(NUM_CLASSES - 1);

/// Length of every region requested from the [`crate::kernel::RegionProvider`].
pub const REGION_SIZE: usize = MAX_CLASS_SIZE;

/// Smallest payload a caller may ask for.
pub const MIN_REQUEST: usize = 8;

/// Biggest payload a caller may ask for.
pub const MAX_REQUEST: usize = 4000;

// Every class block can hold its own header, the class serving the smallest
// request has room for its payload, and the biggest request plus its header
// fits in one region.
const _: () = assert!(HEADER_SIZE <= MIN_CLASS_SIZE);
const _: () = assert!(class_size(class_of(MIN_REQUEST + HEADER_SIZE)) - HEADER_SIZE >= MIN_REQUEST);
const _: () = assert!(MAX_REQUEST + HEADER_SIZE <= MAX_CLASS_SIZE);

/// Size in bytes of the blocks in class `index`.
#[inline]
pub const fn class_size(index: usize) -> usize {
    MIN_CLASS_SIZE << index
}

/// Returns the smallest class whose blocks can hold `len` bytes, header
/// included.
///
/// Lengths above [`MAX_CLASS_SIZE`] give an index `>= NUM_CLASSES`, callers
/// have to reject those before indexing the free lists.
#[inline]
pub const fn class_of(len: usize) -> usize {
    let len = if len < MIN_CLASS_SIZE { MIN_CLASS_SIZE } else { len };

    (len.next_power_of_two().trailing_zeros() - MIN_CLASS_SIZE.trailing_zeros()) as usize
}
