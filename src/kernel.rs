use std::{
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::utils::align;

/// Virtual memory page size of the computer. This is usually 4096. We can't
/// know it at compile time, so it is queried once and cached here.
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Source of the raw memory the allocator carves blocks out of.
///
/// The allocator itself knows nothing about syscalls, it only asks for whole
/// regions when every free list it could split from is empty. [`Kernel`] is
/// the implementation backed by the operating system; anything else (a fixed
/// arena, a counting wrapper in tests) can be plugged in the same way.
pub trait RegionProvider {
    /// Request a region of `len` bytes. It returns a pointer to the start of
    /// the region, aligned to at least the page size, or `None` if the system
    /// cannot supply it.
    ///
    /// **SAFETY**: the caller becomes the owner of the region and must only
    /// hand it back through [`RegionProvider::release_region`].
    unsafe fn acquire_region(&mut self, len: usize) -> Option<NonNull<u8>>;

    /// Returns the region of `len` bytes starting at `addr`.
    ///
    /// **SAFETY**: `addr` and `len` must match an earlier call to
    /// [`RegionProvider::acquire_region`] and nothing may use the region afterwards.
    unsafe fn release_region(&mut self, addr: NonNull<u8>, len: usize);
}

/// This trait hides the syscalls of each platform from [`Kernel`].
trait PlatformMemory {
    /// Request a memory region of size `len`. It returns a Pointer to the
    /// given location or None if the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    /// It returns false if the underlying syscall fails.
    unsafe fn return_memory(addr: *mut u8, len: usize) -> bool;

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

/// [`RegionProvider`] that maps anonymous memory straight from the
/// operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct Kernel;

impl Kernel {
    pub const fn new() -> Self {
        Self
    }
}

/// Wrapper to calculate the computer's page size.
#[inline]
pub fn page_size() -> usize {
    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let size = unsafe { <Kernel as PlatformMemory>::page_size() };
            PAGE_SIZE.store(size, Ordering::Relaxed);
            size
        }
        size => size,
    }
}

/// Length actually mapped for a region of `len` bytes, rounded up to whole pages.
#[inline]
pub fn mapped_len(len: usize) -> usize {
    align(len, page_size())
}

impl RegionProvider for Kernel {
    unsafe fn acquire_region(&mut self, len: usize) -> Option<NonNull<u8>> {
        let len = mapped_len(len);
        let addr = unsafe { <Kernel as PlatformMemory>::request_memory(len) };

        match addr {
            Some(addr) => log::trace!("mapped {len} bytes at {addr:?}"),
            None => log::warn!("system refused to map {len} bytes"),
        }

        addr
    }

    unsafe fn release_region(&mut self, addr: NonNull<u8>, len: usize) {
        let len = mapped_len(len);
        log::trace!("unmapping {len} bytes at {addr:?}");

        if !unsafe { <Kernel as PlatformMemory>::return_memory(addr.as_ptr(), len) } {
            log::warn!("system refused to unmap {len} bytes at {addr:?}");
        }
    }
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                if addr == libc::MAP_FAILED {
                    return None;
                }

                NonNull::new(addr.cast::<u8>())
            }
        }

        unsafe fn return_memory(addr: *mut u8, len: usize) -> bool {
            unsafe { munmap(addr as *mut c_void, len as size_t) == 0 }
        }

        unsafe fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{Kernel, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: *mut u8, _len: usize) -> bool {
            unsafe { Memory::VirtualFree(addr as *mut c_void, 0, Memory::MEM_RELEASE).is_ok() }
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


#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::REGION_SIZE;

    #[test]
    fn page_size_is_cached_power_of_two() {
        let size = page_size();

        assert!(size.is_power_of_two());
        assert!(size >= REGION_SIZE);
        assert_eq!(size, page_size());
    }

    #[test]
    fn kernel_regions_are_page_aligned_and_writable() {
        let mut kernel = Kernel::new();

        unsafe {
            let region = kernel.acquire_region(REGION_SIZE).unwrap();

            assert_eq!(region.as_ptr() as usize % page_size(), 0);

            region.as_ptr().write_bytes(0xAB, REGION_SIZE);
            assert_eq!(*region.as_ptr().add(REGION_SIZE - 1), 0xAB);

            kernel.release_region(region, REGION_SIZE);
        }
    }

    #[test]
    fn regions_are_rounded_to_whole_pages() {
        let page = page_size();

        assert_eq!(mapped_len(1), page);
        assert_eq!(mapped_len(REGION_SIZE), page);
        assert_eq!(mapped_len(page + 1), 2 * page);
    }

    #[test]
    fn failed_unmap_is_reported() {
        let mut kernel = Kernel::new();

        unsafe {
            let region = kernel.acquire_region(REGION_SIZE).unwrap();

            // Not the start of a mapping, so the system refuses it.
            let inside = region.as_ptr().add(1);
            assert!(!<Kernel as PlatformMemory>::return_memory(inside, REGION_SIZE));

            assert!(<Kernel as PlatformMemory>::return_memory(region.as_ptr(), mapped_len(REGION_SIZE)));
        }
    }

    #[test]
    fn mock_runs_dry_after_budget() {
        let mut regions = mock::HeapRegions::with_budget(1);

        unsafe {
            let first = regions.acquire_region(REGION_SIZE);

            assert!(first.is_some());
            assert!(regions.acquire_region(REGION_SIZE).is_none());

            regions.release_region(first.unwrap(), REGION_SIZE);
        }

        assert!(regions.acquired.is_empty());
    }
}
