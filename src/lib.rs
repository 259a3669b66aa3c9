//! # segalloc - segregated buddy allocator
//!
//! A user-space allocator for workloads whose requests are small multiples of
//! 8 bytes (8 to 4000). Memory comes from the system one 4096 byte region at a
//! time and is handed out in power-of-two blocks:
//!
//! ```text
//!   free lists (one per size class)
//!
//!   [0]   16 : Block -> Block
//!   [1]   32 : Block
//!   [2]   64 : (empty)
//!   ...
//!   [8] 4096 : Block -> Block -> Block
//! ```
//!
//! A request is served from the list of its class. If that list is empty, a
//! block from a bigger class is halved as many times as needed, filing every
//! leftover half in its own list. If every bigger list is empty too, a new
//! region is requested through a [`RegionProvider`].
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── class     - Size classes and their arithmetic
//!   ├── block     - Block header
//!   ├── freelist  - Intrusive LIFO list of free blocks (internal)
//!   ├── bucket    - BucketAllocator, the allocator itself
//!   ├── kernel    - RegionProvider and the OS backed Kernel provider
//!   └── utils     - Alignment helper
//! ```
//!
//! [`BucketAllocator`] is the single-threaded core and can be embedded with
//! any provider. [`SegAlloc`] wraps it behind a lock so it can be used as the
//! `#[global_allocator]`.

use std::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

use displaydoc_lite::displaydoc;
use spin::Mutex;

pub mod block;
pub mod bucket;
pub mod class;
pub(crate) mod freelist;
pub mod kernel;
pub mod utils;

pub use block::HEADER_SIZE;
pub use bucket::BucketAllocator;
pub use class::{MAX_REQUEST, MIN_REQUEST, NUM_CLASSES};
pub use kernel::{Kernel, RegionProvider};

use utils::align;

/// Result for every allocation operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

displaydoc! {
    /// Any error that can happen while allocating memory.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Error {
        /// the region provider could not supply a new region.
        OutOfMemory,
        /// the requested size does not fit in a single region.
        SizeTooLarge,
    }
}

impl std::error::Error for Error {}

/// Biggest alignment a payload is guaranteed to have. Blocks are aligned to
/// their own size, which is always a multiple of the header size.
pub const MAX_ALIGN: usize = HEADER_SIZE;

/// Thread-safe front end of [`BucketAllocator`] over the system [`Kernel`].
///
/// Every call takes a single spin lock around the whole allocator. Layouts
/// bigger than [`MAX_REQUEST`] or aligned to more than [`MAX_ALIGN`] are not
/// supported and get a null pointer.
///
/// ```rust,ignore
/// #[global_allocator]
/// static ALLOCATOR: SegAlloc = SegAlloc::new();
/// ```
///
/// The allocator logs through [`log`] while holding its lock, so a logger that
/// allocates must not be installed together with this global allocator.
pub struct SegAlloc {
    inner: Mutex<BucketAllocator<Kernel>>,
}

impl SegAlloc {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(BucketAllocator::new(Kernel::new())),
        }
    }

    /// Maps `layout` to the request size the allocator works with, a multiple
    /// of 8 of at least 8 bytes. `None` if the layout can't be served.
    fn request_size(layout: Layout) -> Option<usize> {
        if layout.align() > MAX_ALIGN || layout.size() > MAX_REQUEST {
            return None;
        }

        Some(align(layout.size().max(MIN_REQUEST), 8))
    }

    /// Allocates memory for `layout`. Returns null if the layout is not
    /// supported or the system is out of memory.
    ///
    /// **SAFETY**: same contract as [`GlobalAlloc::alloc`].
    pub unsafe fn allocate(&self, layout: Layout) -> *mut u8 {
        let Some(size) = Self::request_size(layout) else {
            log::debug!("unsupported layout {layout:?}");
            return ptr::null_mut();
        };

        self.inner
            .lock()
            .allocate(size)
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    /// Returns the memory at `ptr` to the allocator. Null pointers are ignored.
    ///
    /// **SAFETY**: same contract as [`GlobalAlloc::dealloc`].
    pub unsafe fn deallocate(&self, ptr: *mut u8, _layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            unsafe { self.inner.lock().release(ptr) }
        }
    }

    /// Number of free blocks of every size class.
    pub fn occupancy(&self) -> [usize; NUM_CLASSES] {
        self.inner.lock().occupancy()
    }

    /// Number of regions mapped from the system so far.
    pub fn regions_acquired(&self) -> usize {
        self.inner.lock().regions_acquired()
    }
}

impl Default for SegAlloc {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl GlobalAlloc for SegAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        unsafe { self.allocate(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { self.deallocate(ptr, layout) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_env_log::test;

    #[test]
    fn error_messages() {
        assert!(Error::OutOfMemory.to_string().contains("could not supply a new region"));
        assert!(Error::SizeTooLarge.to_string().contains("does not fit in a single region"));
    }

    #[test]
    fn request_sizes() {
        let sizes = vec![(0, 8), (1, 8), (8, 8), (9, 16), (4000, 4000)];

        for (size, expected) in sizes {
            let layout = Layout::from_size_align(size, 1).unwrap();
            assert_eq!(Some(expected), SegAlloc::request_size(layout));
        }
    }

    #[test]
    fn unsupported_layouts_get_null() {
        let allocator = SegAlloc::new();

        unsafe {
            let too_big = Layout::from_size_align(MAX_REQUEST + 1, 8).unwrap();
            assert!(allocator.allocate(too_big).is_null());

            let over_aligned = Layout::from_size_align(64, 2 * MAX_ALIGN).unwrap();
            assert!(allocator.allocate(over_aligned).is_null());
        }

        assert_eq!(allocator.regions_acquired(), 0);
    }

    #[test]
    fn basic_alloc() {
        let allocator = SegAlloc::new();

        unsafe {
            let layout = Layout::new::<u32>();
            // Allocated space for unsigned 32 bit integer.
            let block = allocator.allocate(layout).cast::<u32>();
            *block = 23;
            assert_eq!(23, *block);

            allocator.deallocate(block.cast(), layout);
        }

        assert_eq!(allocator.regions_acquired(), 1);
    }

    #[test]
    fn space_for_free_block_is_used() {
        let allocator = SegAlloc::new();

        unsafe {
            let first_block = allocator.allocate(Layout::new::<u32>());
            let _ = allocator.allocate(Layout::new::<u64>());
            let _ = allocator.allocate(Layout::new::<u64>());

            allocator.deallocate(first_block, Layout::new::<u32>());

            let second_block = allocator.allocate(Layout::new::<u32>());

            assert_eq!(first_block, second_block);
        }
    }

    #[test]
    fn realloc_keeps_contents() {
        let allocator = SegAlloc::new();
        let layout = Layout::array::<u8>(24).unwrap();

        unsafe {
            let block = allocator.alloc(layout);
            for i in 0..24 {
                *block.add(i) = i as u8;
            }

            let grown = allocator.realloc(block, layout, 3000);
            assert!(!grown.is_null());

            for i in 0..24 {
                assert_eq!(*grown.add(i), i as u8);
            }

            allocator.dealloc(grown, Layout::array::<u8>(3000).unwrap());
        }
    }

    #[test]
    fn usable_from_many_threads() {
        static ALLOCATOR: SegAlloc = SegAlloc::new();

        let handles: Vec<_> = (0..4u8)
            .map(|id| {
                std::thread::spawn(move || unsafe {
                    let layout = Layout::array::<u8>(64).unwrap();
                    let blocks: Vec<*mut u8> = (0..100).map(|_| ALLOCATOR.allocate(layout)).collect();

                    for block in &blocks {
                        block.write_bytes(id, 64);
                    }
                    for block in &blocks {
                        assert!((0..64).all(|i| *block.add(i) == id));
                        ALLOCATOR.deallocate(*block, layout);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
