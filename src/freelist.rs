use std::{marker::PhantomData, ptr::NonNull};

use crate::block::{Header, Link};

/// Intrusive singly linked list of free blocks. One of these backs every bin.
///
/// The list does not own any memory: the links live inside the headers of
/// the free blocks themselves, so pushing and unlinking never allocates.
///
/// ```text
///  head
///   |
///   v
/// +------+      +------+      +------+
/// | Free | ---> | Free | ---> | Free | ---> None
/// +------+      +------+      +------+
/// ```
///
/// New blocks go to the head, so the most recently freed block is the first
/// one we look at.
pub(crate) struct FreeList {
    head: Link<Header>,
    len: usize,
}

/// A block chosen by [`FreeList::best_fit`] together with its predecessor,
/// which is what we need to unlink it from a singly linked list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Fit {
    pub prev: Link<Header>,
    pub block: NonNull<Header>,
}

pub(crate) struct Iter<'a> {
    current: Link<Header>,
    marker: PhantomData<&'a Header>,
}

impl FreeList {
    /// Creates a new empty list.
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Forgets every block of the list. The blocks themselves are untouched.
    pub fn clear(&mut self) {
        self.head = None;
        self.len = 0;
    }

    /// Pushes `block` at the head of the list.
    ///
    /// **SAFETY**: `block` must point to a valid header that is not linked
    /// from any list.
    pub unsafe fn push(&mut self, mut block: NonNull<Header>) {
        unsafe {
            debug_assert!(
                block.as_ref().next.is_none() && !self.contains(block),
                "block {block:p} is already linked, released twice?"
            );

            block.as_mut().next = self.head;
        }

        self.head = Some(block);
        self.len += 1;
    }

    /// Whether `block` is linked from this list. Walks the whole list.
    pub fn contains(&self, block: NonNull<Header>) -> bool {
        self.iter().any(|linked| linked == block)
    }

    /// Walks the whole list and returns the smallest block whose size is at
    /// least `size`. On ties the block closer to the head wins.
    pub fn best_fit(&self, size: usize) -> Option<Fit> {
        let mut best: Option<Fit> = None;
        let mut prev = None;
        let mut current = self.head;

        while let Some(block) = current {
            unsafe {
                let block_size = block.as_ref().size;

                let better = match best {
                    Some(fit) => block_size < fit.block.as_ref().size,
                    None => true,
                };

                if block_size >= size && better {
                    best = Some(Fit { prev, block });
                }

                prev = current;
                current = block.as_ref().next;
            }
        }

        best
    }

    /// Unlinks the block described by `fit` and clears its link.
    ///
    /// **SAFETY**: `fit` must come from [`FreeList::best_fit`] on this list
    /// with no mutation in between.
    pub unsafe fn unlink(&mut self, fit: Fit) {
        let mut block = fit.block;

        unsafe {
            let next = block.as_ref().next;

            match fit.prev {
                Some(mut prev) => prev.as_mut().next = next,
                None => self.head = next,
            }

            block.as_mut().next = None;
        }

        self.len -= 1;
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

impl<'a> IntoIterator for &'a FreeList {
    type Item = NonNull<Header>;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
