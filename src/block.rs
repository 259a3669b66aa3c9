use std::{mem, ptr::NonNull};

/// Non-null pointer to `T`.
pub(crate) type Link<T> = Option<NonNull<T>>;

/// Overhead in bytes that every block pays for its [`Header`]. This is also
/// the distance between the start of a block and the address the caller gets.
pub const HEADER_SIZE: usize = mem::size_of::<Header>();

/// Header placed at the start of every block, free or allocated. The payload
/// handed to the caller starts right after it.
///
/// ```text
/// +---------------------+ <------+  block address (aligned to `size`)
/// |        next         |        |
/// +---------------------+        | -> Header
/// |        size         |        |
/// +---------------------+ <------+  payload address
/// |       Content       |        |
/// |         ...         |        | -> Addressable content
/// |         ...         |        |    (`size - HEADER_SIZE` bytes)
/// +---------------------+ <------+
/// ```
///
/// `size` covers the whole block, header included, and is always one of the
/// class sizes in [`crate::class`]. It is written when the block is carved out
/// of a bigger one and never touched while the caller owns the block, so it is
/// all we need to file the block back on release.
///
/// `next` only means something while the block sits on a free list.
#[repr(C)]
pub(crate) struct Header {
    /// Next free block of the same class.
    pub next: Link<Header>,
    /// Size of the whole block.
    pub size: usize,
}

impl Header {
    /// Writes a fresh header of `size` bytes at `addr` and returns it.
    ///
    /// **SAFETY**: `addr` must be valid for writes of `size` bytes and aligned
    /// for [`Header`].
    pub unsafe fn write(addr: NonNull<u8>, size: usize) -> NonNull<Header> {
        let header = addr.cast::<Header>();

        unsafe {
            header.as_ptr().write(Header { next: None, size });
        }

        header
    }

    /// Address of the payload of the block starting at `header`.
    ///
    /// **SAFETY**: `header` must start a block carved by the allocator, so that
    /// the block extends past its header.
    #[inline]
    pub unsafe fn payload(header: NonNull<Header>) -> NonNull<u8> {
        unsafe { header.cast::<u8>().add(HEADER_SIZE) }
    }

    /// Recovers the header from a payload address previously returned by
    /// [`Header::payload`].
    ///
    /// **SAFETY**: `payload` must come from [`Header::payload`].
    #[inline]
    pub unsafe fn from_payload(payload: NonNull<u8>) -> NonNull<Header> {
        unsafe { payload.sub(HEADER_SIZE).cast() }
    }
}
