use std::{marker::PhantomData, ptr::NonNull};

use crate::block::{Header, Link};

/// Singly linked list of free blocks of one size class.
///
/// The list is intrusive: the links live in the [`Header`] of the blocks
/// themselves, so keeping track of free memory costs nothing beyond the
/// headers every block already has.
///
/// ```text
///  head
///   |
///   v
/// +--------------+      +--------------+      +--------------+
/// | Header(free) | ---> | Header(free) | ---> | Header(free) | ---> None
/// +--------------+      +--------------+      +--------------+
/// |   payload    |      |   payload    |      |   payload    |
/// |   (unused)   |      |   (unused)   |      |   (unused)   |
/// +--------------+      +--------------+      +--------------+
/// ```
///
/// Blocks are pushed and popped at the head (LIFO). The order carries no
/// meaning, every block on a list has the same size.
pub(crate) struct FreeList {
    head: Link<Header>,
    len: usize,
}

pub(crate) struct Iter<'a> {
    current: Link<Header>,
    marker: PhantomData<&'a FreeList>,
}

impl FreeList {
    /// Creates a new empty list.
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Links `block` as the new head of the list.
    ///
    /// **SAFETY**: `block` must be a valid header that is not already on any
    /// list. The allocator takes ownership of it.
    pub unsafe fn push(&mut self, mut block: NonNull<Header>) {
        unsafe {
            block.as_mut().next = self.head;
        }

        self.head = Some(block);
        self.len += 1;
    }

    /// Unlinks and returns the head of the list, or `None` if it is empty.
    pub fn pop(&mut self) -> Link<Header> {
        let block = self.head?;

        // SAFETY: blocks are only linked through `push`, which requires valid headers.
        unsafe {
            self.head = block.as_ref().next;
        }
        self.len -= 1;

        Some(block)
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            current: self.head,
            marker: PhantomData,
        }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = NonNull<Header>;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current?;

        unsafe {
            self.current = block.as_ref().next;
        }

        Some(block)
    }
}
