#![allow(missing_docs)]

use allocator_api2::alloc::{AllocError, Allocator, Global, Layout};
use plexus::{EmplaceError, Performance, Queue, QueueError, queue};
use std::{cell::Cell, ptr::NonNull, rc::Rc};

/// Allocator that can be switched off and counts outstanding allocations.
#[derive(Default)]
struct FickleAllocator {
    works: Cell<bool>,
    live: Cell<usize>,
    bytes: Cell<usize>,
}

impl FickleAllocator {
    fn working() -> Self {
        let alloc = Self::default();
        alloc.works.set(true);
        alloc
    }
}

unsafe impl Allocator for FickleAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if !self.works.get() {
            return Err(AllocError);
        }
        let block = Global.allocate(layout)?;
        self.live.set(self.live.get() + 1);
        self.bytes.set(self.bytes.get() + layout.size());
        Ok(block)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.live.set(self.live.get() - 1);
        self.bytes.set(self.bytes.get() - layout.size());
        unsafe { Global.deallocate(ptr, layout) }
    }
}

#[test]
fn try_push_returns_value_when_allocation_fails() {
    let alloc = FickleAllocator::default();
    let mut queue = Queue::<String, Performance, _>::with_block_capacities_in(2, 4, &alloc).unwrap();

    let (value, err) = queue.try_push("lost?".to_owned()).unwrap_err();
    assert_eq!(value, "lost?");
    assert!(matches!(err, QueueError::AllocationFailed { .. }));
    assert!(queue.is_empty());
    assert_eq!(queue.capacity(), 0);
}

#[test]
fn failure_at_block_boundary_keeps_state() {
    let alloc = FickleAllocator::working();
    let mut queue = Queue::<u32, Performance, _>::with_block_capacities_in(4, 4, &alloc).unwrap();
    queue.extend(0..4);

    alloc.works.set(false);
    assert!(queue.try_push(4).is_err());
    assert_eq!(queue.len(), 4);
    assert_eq!(queue.back(), Some(&3));
    assert_eq!(queue.capacity(), 4);

    let result = queue.try_emplace_with(|| Ok::<_, ()>(4));
    assert!(matches!(result, Err(EmplaceError::Queue(QueueError::AllocationFailed { .. }))));
    assert_eq!(queue.len(), 4);

    alloc.works.set(true);
    queue.push(4);
    assert!(queue.iter().copied().eq(0..5));
}

#[test]
fn reserve_works_up_to_capacity_once_allocator_fails() {
    let alloc = FickleAllocator::default();
    let mut queue = queue::<u32>()
        .block_capacities(8, 64)
        .allocator(&alloc)
        .build()
        .unwrap();

    assert!(queue.try_reserve(1000).is_err());

    alloc.works.set(true);
    queue.try_reserve(1000).unwrap();
    assert!(queue.capacity() >= 1000);

    alloc.works.set(false);
    for i in 0..1000 {
        queue.try_push(i).unwrap();
    }
    assert!(queue.try_push(1000).is_err());
    assert_eq!(queue.len(), 1000);
}

#[test]
fn failed_reshape_keeps_bounds_and_elements() {
    let alloc = FickleAllocator::working();
    let mut queue = Queue::<u64, Performance, _>::with_block_capacities_in(8, 8, &alloc).unwrap();
    queue.extend(0..50);
    let bounds = queue.block_capacities();
    let capacity = queue.capacity();
    let live = alloc.live.get();

    alloc.works.set(false);
    assert!(matches!(
        queue.reshape(16, 16),
        Err(QueueError::AllocationFailed { .. })
    ));
    assert_eq!(queue.block_capacities(), bounds);
    assert_eq!(queue.capacity(), capacity);
    assert_eq!(alloc.live.get(), live);
    assert!(queue.iter().copied().eq(0..50));
}

#[test]
fn failed_clone_leaves_source_intact() {
    let alloc = FickleAllocator::working();
    let mut source = Queue::<u8>::with_block_capacities(4, 16).unwrap();
    source.extend(0..100);

    alloc.works.set(false);
    assert!(source.try_clone_in(&alloc).is_err());
    assert_eq!(alloc.live.get(), 0);

    alloc.works.set(true);
    let copy = source.try_clone_in(&alloc).unwrap();
    assert_eq!(copy, source);
}

#[test]
fn failed_take_keeps_elements_in_source() {
    let alloc = FickleAllocator::default();
    let mut source: Queue<u32> = (0..40).collect();

    assert!(source.try_take_in(&alloc).is_err());
    assert_eq!(source.len(), 40);

    alloc.works.set(true);
    let moved = source.try_take_in(&alloc).unwrap();
    assert!(source.is_empty());
    assert!(moved.iter().copied().eq(0..40));
}

#[test]
fn every_block_is_returned() {
    let alloc = FickleAllocator::working();
    {
        let mut queue = Queue::<Rc<u32>, Performance, _>::with_block_capacities_in(2, 32, &alloc).unwrap();
        for i in 0..500 {
            queue.push(Rc::new(i));
            if i % 3 == 0 {
                queue.pop();
            }
        }
        queue.reserve(300);
        queue.shrink_to_fit();
        queue.reshape(5, 9).unwrap();
        queue.trim();
        let copy = queue.clone_in(&alloc);
        assert_eq!(copy, queue);
        queue.clear();
        assert_eq!(queue.capacity(), 0);
    }
    assert_eq!(alloc.live.get(), 0);
    assert_eq!(alloc.bytes.get(), 0);
}

#[test]
fn group_headers_come_from_the_queue_allocator() {
    let alloc = FickleAllocator::working();
    let mut queue = Queue::<u64, Performance, _>::with_block_capacities_in(4, 4, &alloc).unwrap();
    queue.extend(0..12);
    // One header and one element block per group.
    assert_eq!(queue.group_count(), 3);
    assert_eq!(alloc.live.get(), 6);
}
