use std::{fmt, ptr::NonNull};

use crate::{
    Error, Result,
    block::{HEADER_SIZE, Header},
    class::{MAX_CLASS_SIZE, MIN_CLASS_SIZE, NUM_CLASSES, REGION_SIZE, class_of, class_size},
    freelist::FreeList,
    kernel::RegionProvider,
};

/// Segregated free-list allocator that carves power-of-two blocks out of
/// whole regions by repeated halving.
///
/// There is one [`FreeList`] (bucket) per size class. A request is rounded up
/// to its class, header included, and served from that bucket. When the bucket
/// is empty the next non-empty bigger bucket gives up one block, which is split
/// in halves until a half has the needed size. Every other half lands in the
/// bucket of its own size:
///
/// ```text
///  fresh region (4096)
/// +-------------------------------------------------------------------+
/// |                                                                   |
/// +-------------------------------------------------------------------+
///
///  after serving a 32 byte class request
/// +----+----+--------+----------------+-- ... --+----------------------+
/// | 32 | 32 |   64   |      128       |         |         2048         |
/// +----+----+--------+----------------+-- ... --+----------------------+
///   ^    ^      ^            ^                             ^
///   |    |      |            |                             |
/// caller +------+------------+------ each one filed in its own bucket
/// ```
///
/// Only when no bucket at or above the needed class has a block do we ask the
/// [`RegionProvider`] for a new region. Released blocks go back to the bucket
/// of their class as they are; halves are never merged again, and regions are
/// never handed back to the provider.
pub struct BucketAllocator<P: RegionProvider> {
    /// `free_lists[i]` holds the free blocks of `class_size(i)` bytes.
    free_lists: [FreeList; NUM_CLASSES],
    /// Where fresh regions come from.
    provider: P,
    /// Number of regions acquired so far.
    regions: usize,
}

// SAFETY: the blocks behind the free lists are owned by the allocator, nothing
// else points into them while they are free.
unsafe impl<P: RegionProvider + Send> Send for BucketAllocator<P> {}

impl<P: RegionProvider> BucketAllocator<P> {
    /// Creates an allocator with every free list empty. No memory is requested
    /// until the first allocation.
    pub const fn new(provider: P) -> Self {
        Self {
            free_lists: [const { FreeList::new() }; NUM_CLASSES],
            provider,
            regions: 0,
        }
    }

    /// Returns a pointer to at least `size` writable bytes.
    ///
    /// `size` is expected to be a multiple of 8 between 8 and
    /// [`crate::class::MAX_REQUEST`]. Bigger sizes that still fit in a region
    /// together with the header are served as well; anything above that fails
    /// with [`Error::SizeTooLarge`]. The returned address is aligned to
    /// [`HEADER_SIZE`].
    ///
    /// Fails with [`Error::OutOfMemory`] if a new region is needed and the
    /// provider cannot supply it.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>> {
        debug_assert!(size > 0 && size % 8 == 0, "unsupported request of {size} bytes");

        if size > MAX_CLASS_SIZE - HEADER_SIZE {
            log::debug!("request of {size} bytes does not fit in a {MAX_CLASS_SIZE} byte region");
            return Err(Error::SizeTooLarge);
        }

        let needed = class_of(size + HEADER_SIZE);

        // SAFETY: blocks on the free lists were carved by `grow` and `split`.
        if let Some(block) = self.free_lists[needed].pop() {
            return Ok(unsafe { Header::payload(block) });
        }

        let source = match self.take_bigger(needed) {
            Some(block) => block,
            None => self.grow()?,
        };

        unsafe {
            self.split(class_size(needed), source);
        }

        // `split` always files a block of the target class.
        let block = self.free_lists[needed].pop();
        debug_assert!(block.is_some(), "split did not produce a class {needed} block");

        block
            .map(|block| unsafe { Header::payload(block) })
            .ok_or(Error::OutOfMemory)
    }

    /// Gives the block at `ptr` back to the allocator.
    ///
    /// **SAFETY**: `ptr` must have been returned by [`BucketAllocator::allocate`]
    /// on this same allocator and must not have been released since. The
    /// caller must not use it afterwards.
    pub unsafe fn release(&mut self, ptr: NonNull<u8>) {
        unsafe {
            let block = Header::from_payload(ptr);
            let size = block.as_ref().size;

            debug_assert!(
                size.is_power_of_two() && (MIN_CLASS_SIZE..=MAX_CLASS_SIZE).contains(&size),
                "corrupted header at {block:?}: size {size}"
            );

            self.free_lists[class_of(size)].push(block);
        }
    }

    /// Pops a block from the smallest non-empty class above `class`.
    fn take_bigger(&mut self, class: usize) -> Option<NonNull<Header>> {
        self.free_lists[class + 1..].iter_mut().find_map(FreeList::pop)
    }

    /// Requests a new region and turns it into a single free block of the
    /// biggest class. The block is not filed anywhere yet.
    fn grow(&mut self) -> Result<NonNull<Header>> {
        let Some(addr) = (unsafe { self.provider.acquire_region(REGION_SIZE) }) else {
            log::warn!("out of memory after {} regions", self.regions);
            return Err(Error::OutOfMemory);
        };

        // Halves are only aligned to their size if the region is.
        debug_assert_eq!(addr.as_ptr() as usize % REGION_SIZE, 0);

        self.regions += 1;
        log::trace!("region #{} at {addr:?}", self.regions);

        Ok(unsafe { Header::write(addr, REGION_SIZE) })
    }

    /// Halves `block` until it is `target` bytes long and files it in the
    /// bucket of `target`. The second half of every cut goes to the bucket one
    /// class below the block that was cut.
    ///
    /// **SAFETY**: `block` must be a free block owned by the allocator and not
    /// on any list, and `target` a class size no bigger than the block.
    unsafe fn split(&mut self, target: usize, mut block: NonNull<Header>) {
        let size = unsafe { block.as_ref().size };
        debug_assert!(target <= size);

        if class_of(size) == class_of(target) {
            unsafe { self.free_lists[class_of(size)].push(block) };
            return;
        }

        let half = size / 2;
        log::trace!("splitting {size} byte block at {block:?}");

        unsafe {
            block.as_mut().size = half;

            let buddy = Header::write(block.cast::<u8>().add(half), half);
            self.free_lists[class_of(half)].push(buddy);

            self.split(target, block);
        }
    }

    /// Number of free blocks in class `class`.
    pub fn free_blocks(&self, class: usize) -> usize {
        self.free_lists[class].len()
    }

    /// Number of free blocks of every class, smallest class first.
    pub fn occupancy(&self) -> [usize; NUM_CLASSES] {
        std::array::from_fn(|class| self.free_blocks(class))
    }

    /// Total size in bytes of every free block, headers included. Walks the
    /// free lists and reads the size of every block.
    pub fn free_bytes(&self) -> usize {
        self.free_lists
            .iter()
            .flat_map(FreeList::iter)
            .map(|block| unsafe { block.as_ref().size })
            .sum()
    }

    /// Number of regions requested from the provider so far.
    pub fn regions_acquired(&self) -> usize {
        self.regions
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

impl<P: RegionProvider> fmt::Debug for BucketAllocator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketAllocator")
            .field("regions", &self.regions)
            .field("occupancy", &self.occupancy())
            .field("free_bytes", &self.free_bytes())
            .finish()
    }
}
