use crate::QueueError;
use allocator_api2::alloc::{Allocator, Layout};
use std::{mem, ptr::NonNull};

/// One fixed-capacity block of element storage plus its chain links.
///
/// A group owns the raw block only. Slots hold no values of their own: the
/// queue decides which slots are live and is responsible for dropping them
/// before the group is released.
pub(crate) struct Group<T> {
    elements: NonNull<T>,
    capacity: usize,
    /// Successor in the chain; the last group (or a spare past it) has none.
    pub(crate) next: Option<NonNull<Group<T>>>,
    /// Non-owning back link used for reverse traversal and push rollback.
    pub(crate) previous: Option<NonNull<Group<T>>>,
}

impl<T> Group<T> {
    /// Allocate a group header and its element block from `alloc`.
    ///
    /// `next` starts unset. The caller links the new group into the chain
    /// only after this returns `Ok`, so a failure never leaves a dangling
    /// link behind.
    pub(crate) fn allocate<A: Allocator>(
        capacity: usize,
        previous: Option<NonNull<Self>>,
        alloc: &A,
    ) -> Result<NonNull<Self>, QueueError> {
        debug_assert!(capacity > 0, "groups always hold at least one slot");

        let block_layout = Layout::array::<T>(capacity).map_err(|_| QueueError::CapacityOverflow)?;
        let elements = alloc
            .allocate(block_layout)
            .map_err(|_| QueueError::AllocationFailed {
                layout: block_layout,
            })?
            .cast::<T>();

        let header_layout = Layout::new::<Self>();
        let header = match alloc.allocate(header_layout) {
            Ok(header) => header.cast::<Self>(),
            Err(_) => {
                // SAFETY: `elements` was allocated just above with `block_layout`.
                unsafe { alloc.deallocate(elements.cast(), block_layout) };
                return Err(QueueError::AllocationFailed {
                    layout: header_layout,
                });
            },
        };

        // SAFETY: `header` is freshly allocated, properly aligned for `Self`
        // and large enough to hold it.
        unsafe {
            header.as_ptr().write(Self {
                elements,
                capacity,
                next: None,
                previous,
            });
        }

        Ok(header)
    }

    /// Release the header and element block of `group`.
    ///
    /// # Safety
    ///
    /// `group` must come from [`Group::allocate`] with an allocator equivalent
    /// to `alloc`, must not be reachable from the chain any more and must hold
    /// no live elements (they are not dropped here).
    pub(crate) unsafe fn deallocate<A: Allocator>(group: NonNull<Self>, alloc: &A) {
        // SAFETY: the caller guarantees `group` is a valid, initialized header.
        let Self {
            elements, capacity, ..
        } = unsafe { group.as_ptr().read() };

        // SAFETY: the same size/alignment pair was validated by
        // `Layout::array` when the block was allocated.
        let block_layout = unsafe {
            Layout::from_size_align_unchecked(mem::size_of::<T>() * capacity, mem::align_of::<T>())
        };

        // SAFETY: both blocks were obtained from `alloc` with these layouts.
        unsafe {
            alloc.deallocate(elements.cast(), block_layout);
            alloc.deallocate(group.cast(), Layout::new::<Self>());
        }
    }

    /// Number of element slots in this group.
    #[inline]
    pub(crate) const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Raw pointer to slot `index`. `index == capacity` yields the
    /// one-past-the-end pointer.
    #[inline]
    pub(crate) fn slot(&self, index: usize) -> NonNull<T> {
        debug_assert!(index <= self.capacity);
        // SAFETY: `index` is within the allocated block (or one past it).
        unsafe { self.elements.add(index) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use allocator_api2::alloc::{AllocError, Global};
    use std::cell::Cell;

    #[derive(Default)]
    struct CountingAllocator {
        live: Cell<isize>,
        refuse_after: Cell<Option<usize>>,
        served: Cell<usize>,
    }

    unsafe impl Allocator for CountingAllocator {
        fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
            if self
                .refuse_after
                .get()
                .is_some_and(|limit| self.served.get() >= limit)
            {
                return Err(AllocError);
            }
            self.served.set(self.served.get() + 1);
            self.live.set(self.live.get() + 1);
            Global.allocate(layout)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            self.live.set(self.live.get() - 1);
            unsafe { Global.deallocate(ptr, layout) }
        }
    }

    #[test]
    fn allocate_links_previous_only() {
        let alloc = CountingAllocator::default();
        let first = Group::<u64>::allocate(4, None, &alloc).unwrap();
        let second = Group::<u64>::allocate(8, Some(first), &alloc).unwrap();

        unsafe {
            assert_eq!(first.as_ref().capacity(), 4);
            assert_eq!(second.as_ref().capacity(), 8);
            assert_eq!(second.as_ref().previous, Some(first));
            assert!(second.as_ref().next.is_none());
            assert!(first.as_ref().next.is_none());

            Group::deallocate(second, &alloc);
            Group::deallocate(first, &alloc);
        }
        assert_eq!(alloc.live.get(), 0);
    }

    #[test]
    fn slots_are_contiguous() {
        let group = Group::<u32>::allocate(3, None, &Global).unwrap();
        unsafe {
            let g = group.as_ref();
            for i in 0..3 {
                g.slot(i).write(i as u32 * 10);
            }
            assert_eq!(g.slot(1).as_ptr(), g.slot(0).as_ptr().add(1));
            assert_eq!(*g.slot(2).as_ptr(), 20);
            Group::deallocate(group, &Global);
        }
    }

    #[test]
    fn failed_header_allocation_releases_block() {
        let alloc = CountingAllocator::default();
        alloc.refuse_after.set(Some(1));

        let err = Group::<u64>::allocate(16, None, &alloc).unwrap_err();
        assert!(matches!(err, QueueError::AllocationFailed { .. }));
        assert_eq!(alloc.live.get(), 0);
    }

    #[test]
    fn oversized_block_is_capacity_overflow() {
        let err = Group::<u64>::allocate(usize::MAX / 2, None, &Global).unwrap_err();
        assert_eq!(err, QueueError::CapacityOverflow);
    }

    #[test]
    fn zero_sized_elements() {
        let group = Group::<()>::allocate(32, None, &Global).unwrap();
        unsafe {
            assert_eq!(group.as_ref().capacity(), 32);
            Group::deallocate(group, &Global);
        }
    }
}
