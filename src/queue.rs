use crate::{
    EmplaceError, QueueError,
    group::Group,
    iter::{Cursor, IntoIter, Iter, IterMut, RawIter, ReverseCursor, Span},
    policy::{self, BlockCapacity, MemoryUse, Priority},
};
use allocator_api2::alloc::{Allocator, Global};
use std::{
    convert::Infallible,
    fmt,
    hash::{Hash, Hasher},
    iter, mem,
    marker::PhantomData,
    ops::Range,
    ptr::{self, NonNull},
};
use tracing::{debug, trace, warn};

/// FIFO queue stored in a chain of independently allocated blocks.
///
/// Elements are pushed at the back of the newest block (the *current*
/// group) and popped from the front of the oldest block (the *first*
/// group). When the current group fills up the queue moves on to a spare
/// successor or allocates a new group sized by the [`Priority`] policy. When
/// the first group empties it is either recycled behind the current group or
/// freed.
///
/// # Type Parameters
///
/// * `T` - The element type
/// * `P` - Growth priority ([`MemoryUse`] by default, or
///   [`Performance`](crate::Performance))
/// * `A` - Allocator for group headers and element blocks
///
/// # Examples
///
/// ```
/// use plexus::Queue;
///
/// let mut queue = Queue::new();
/// queue.push(1);
/// queue.push(2);
/// queue.push(3);
///
/// assert_eq!(queue.front(), Some(&1));
/// assert_eq!(queue.back(), Some(&3));
/// assert_eq!(queue.pop(), Some(1));
/// assert_eq!(queue.len(), 2);
/// ```
pub struct Queue<T, P: Priority = MemoryUse, A: Allocator = Global> {
    first_group: Option<NonNull<Group<T>>>,
    current_group: Option<NonNull<Group<T>>>,
    /// Slot of the front element inside `first_group`.
    start: usize,
    /// Slot one past the back element inside `current_group`.
    tail: usize,
    /// Cached capacity of `current_group`.
    current_end: usize,
    len: usize,
    /// Sum of the capacities of every group reachable from `first_group`.
    capacity: usize,
    bounds: BlockCapacity,
    alloc: A,
    _marker: PhantomData<(T, fn() -> P)>,
}

/// A slot claimed for the next push.
struct Slot<T> {
    ptr: NonNull<T>,
    /// The claim moved `current_group` forward across a block boundary.
    crossed: bool,
}

/// Rolls a claimed slot back when construction fails or panics.
struct ClaimGuard<'a, T, P: Priority, A: Allocator> {
    queue: &'a mut Queue<T, P, A>,
    crossed: bool,
}

impl<T, P: Priority, A: Allocator> Drop for ClaimGuard<'_, T, P, A> {
    fn drop(&mut self) {
        if self.crossed {
            self.queue.step_back();
        }
    }
}

impl<T> Queue<T> {
    /// Create an empty queue with default block bounds.
    ///
    /// Nothing is allocated until the first push or reservation.
    pub fn new() -> Self {
        Self::new_in(Global)
    }

    /// Create an empty queue whose groups hold between `min` and `max`
    /// elements.
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidBlockCapacity`] unless
    /// `2 <= min <= max <= usize::MAX / 2`.
    pub fn with_block_capacities(min: usize, max: usize) -> Result<Self, QueueError> {
        Self::with_block_capacities_in(min, max, Global)
    }
}

impl<T, P: Priority, A: Allocator> Queue<T, P, A> {
    /// Create an empty queue with default block bounds that allocates from
    /// `alloc`.
    pub fn new_in(alloc: A) -> Self {
        Self::with_bounds_in(BlockCapacity::default_for::<T, P>(), alloc)
    }

    /// Create an empty queue with explicit block bounds that allocates from
    /// `alloc`.
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidBlockCapacity`] unless
    /// `2 <= min <= max <= usize::MAX / 2`.
    pub fn with_block_capacities_in(min: usize, max: usize, alloc: A) -> Result<Self, QueueError> {
        Ok(Self::with_bounds_in(BlockCapacity::new(min, max)?, alloc))
    }

    pub(crate) const fn with_bounds_in(bounds: BlockCapacity, alloc: A) -> Self {
        Self {
            first_group: None,
            current_group: None,
            start: 0,
            tail: 0,
            current_end: 0,
            len: 0,
            capacity: 0,
            bounds,
            alloc,
            _marker: PhantomData,
        }
    }

    /// The allocator backing this queue.
    pub const fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Current block bounds.
    pub const fn block_capacities(&self) -> BlockCapacity {
        self.bounds
    }

    /// Number of live elements.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// `true` when the queue holds no elements.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total slots across all groups, including spare groups past the back
    /// element and already-popped slots of the first group.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest number of elements the queue could address.
    pub const fn max_size(&self) -> usize {
        let element = mem::size_of::<T>();
        if element == 0 {
            isize::MAX as usize
        } else {
            isize::MAX as usize / element
        }
    }

    /// Number of groups in the chain, spare groups included.
    pub fn group_count(&self) -> usize {
        self.groups().count()
    }

    /// Approximate heap and inline footprint in bytes: the queue header,
    /// every element slot and every group header.
    pub fn memory(&self) -> usize {
        mem::size_of::<Self>()
            + mem::size_of::<T>() * self.capacity
            + mem::size_of::<Group<T>>() * self.group_count()
    }

    /// Oldest element, or `None` when empty.
    pub fn front(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        let first = self.first_group?;
        // SAFETY: the queue is non-empty so `start` is a live slot of the
        // first group.
        unsafe { Some(first.as_ref().slot(self.start).as_ref()) }
    }

    /// Mutable access to the oldest element.
    pub fn front_mut(&mut self) -> Option<&mut T> {
        if self.len == 0 {
            return None;
        }
        let first = self.first_group?;
        // SAFETY: as in `front`, with unique access through `&mut self`.
        unsafe { Some(first.as_ref().slot(self.start).as_mut()) }
    }

    /// Newest element, or `None` when empty.
    pub fn back(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        let current = self.current_group?;
        // SAFETY: a non-empty queue always has its back element at
        // `tail - 1` of the current group.
        unsafe { Some(current.as_ref().slot(self.tail - 1).as_ref()) }
    }

    /// Mutable access to the newest element.
    pub fn back_mut(&mut self) -> Option<&mut T> {
        if self.len == 0 {
            return None;
        }
        let current = self.current_group?;
        // SAFETY: as in `back`, with unique access through `&mut self`.
        unsafe { Some(current.as_ref().slot(self.tail - 1).as_mut()) }
    }

    /// Append `value` at the back.
    ///
    /// # Panics
    ///
    /// Aborts through [`handle_alloc_error`](std::alloc::handle_alloc_error)
    /// when a new group cannot be allocated and panics on capacity overflow.
    pub fn push(&mut self, value: T) {
        if let Err((_, err)) = self.try_push(value) {
            err.raise();
        }
    }

    /// Append `value` at the back, handing it back if a group could not be
    /// allocated.
    ///
    /// # Errors
    ///
    /// [`QueueError::AllocationFailed`] or [`QueueError::CapacityOverflow`],
    /// together with the rejected value. The queue is unchanged.
    pub fn try_push(&mut self, value: T) -> Result<(), (T, QueueError)> {
        match self.claim_slot() {
            Ok(slot) => {
                // SAFETY: `slot` was just claimed and nothing ran in between.
                unsafe { self.commit(slot.ptr, value) };
                Ok(())
            },
            Err(err) => Err((value, err)),
        }
    }

    /// Construct the new back element in place from `construct`.
    ///
    /// If `construct` panics the queue is left exactly as it was, apart from
    /// any group obtained for the push, which stays attached as spare
    /// capacity.
    ///
    /// # Panics
    ///
    /// Same allocation behaviour as [`push`](Self::push).
    pub fn emplace_with<F>(&mut self, construct: F)
    where
        F: FnOnce() -> T,
    {
        match self.try_emplace_with(|| Ok::<T, Infallible>(construct())) {
            Ok(()) => {},
            Err(EmplaceError::Queue(err)) => err.raise(),
            Err(EmplaceError::Construct(never)) => match never {},
        }
    }

    /// Fallible in-place construction of the new back element.
    ///
    /// The slot is claimed first (growing the chain if needed), then
    /// `construct` runs. On `Err` or panic the write cursor is restored to
    /// the previous back element and the length is not incremented. A group
    /// obtained for the claim stays attached as spare capacity.
    ///
    /// # Errors
    ///
    /// [`EmplaceError::Queue`] when a group could not be obtained (the
    /// closure is not called), [`EmplaceError::Construct`] when `construct`
    /// fails.
    pub fn try_emplace_with<E, F>(&mut self, construct: F) -> Result<(), EmplaceError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let slot = self.claim_slot()?;
        let mut guard = ClaimGuard {
            queue: self,
            crossed: slot.crossed,
        };

        match construct() {
            Ok(value) => {
                guard.crossed = false;
                // SAFETY: the claim is still in place; the guard was disarmed.
                unsafe { guard.queue.commit(slot.ptr, value) };
                Ok(())
            },
            Err(err) => Err(EmplaceError::Construct(err)),
        }
    }

    /// Remove and return the oldest element, or `None` when empty.
    ///
    /// When the front group becomes empty it is recycled behind the current
    /// group if its capacity matches and no spare exists yet; otherwise it is
    /// freed.
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let first = self.first_group?;

        // SAFETY: `start` is the live front slot; it is considered vacant
        // from here on.
        let value = unsafe { first.as_ref().slot(self.start).read() };
        self.len -= 1;

        if self.len == 0 {
            debug_assert_eq!(self.first_group, self.current_group);
            self.start = 0;
            self.tail = 0;
            // SAFETY: `first` is a live group header.
            self.current_end = unsafe { first.as_ref().capacity() };
        } else {
            self.start += 1;
            // SAFETY: `first` is a live group header.
            if self.start == unsafe { first.as_ref().capacity() } {
                // SAFETY: the first group is now empty and, since elements
                // remain, distinct from the current group.
                unsafe { self.retire_first_group(first) };
            }
        }

        Some(value)
    }

    /// Drop every element and free every group.
    ///
    /// Block bounds are kept; the next push allocates afresh.
    pub fn clear(&mut self) {
        self.destroy_all();
    }

    /// Ensure at least `additional` more elements can be pushed without
    /// allocating.
    ///
    /// Missing room is appended as spare groups after the last group of the
    /// chain: as many full `max`-sized groups as fit plus one remainder group
    /// (at least `min`). Existing elements do not move.
    ///
    /// # Panics
    ///
    /// Same allocation behaviour as [`push`](Self::push).
    pub fn reserve(&mut self, additional: usize) {
        if let Err(err) = self.try_reserve(additional) {
            err.raise();
        }
    }

    /// Fallible [`reserve`](Self::reserve).
    ///
    /// # Errors
    ///
    /// [`QueueError::CapacityOverflow`] when the request exceeds
    /// [`max_size`](Self::max_size), [`QueueError::AllocationFailed`] when a
    /// group cannot be allocated. Groups appended before the failure stay in
    /// the chain.
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), QueueError> {
        let spare = self.spare_capacity();
        if additional <= spare {
            return Ok(());
        }

        let needed = additional - spare;
        if needed > self.max_size() {
            return Err(QueueError::CapacityOverflow);
        }

        let (min, max) = (self.bounds.min(), self.bounds.max());
        let needed = needed.max(min);
        let mut full_groups = needed / max;
        let mut remainder = needed % max;
        if remainder != 0 && remainder < min {
            remainder = min;
        }

        debug!(
            additional,
            needed, full_groups, remainder, "reserving spare groups"
        );

        let mut last = match self.current_group {
            Some(current) => current,
            None => {
                let head = if remainder == 0 {
                    full_groups -= 1;
                    max
                } else {
                    mem::take(&mut remainder)
                };
                self.initialize(head)?
            },
        };

        // SAFETY: every link in the chain points at a live group header.
        while let Some(next) = unsafe { last.as_ref().next } {
            last = next;
        }

        if remainder != 0 {
            last = self.link_group_after(last, remainder)?;
        }
        for _ in 0..full_groups {
            last = self.link_group_after(last, max)?;
        }

        Ok(())
    }

    /// Free every spare group after the current group.
    ///
    /// Spare groups come from [`reserve`](Self::reserve), from recycling on
    /// pop and from failed emplacements.
    pub fn trim(&mut self) {
        let Some(current) = self.current_group else {
            return;
        };

        // SAFETY: `current` is live; spare groups hold no elements.
        let mut spare = unsafe { (*current.as_ptr()).next.take() };
        let mut freed = 0usize;
        while let Some(group) = spare {
            // SAFETY: `group` is a detached spare header.
            unsafe {
                spare = group.as_ref().next;
                self.capacity -= group.as_ref().capacity();
                Group::deallocate(group, &self.alloc);
            }
            freed += 1;
        }

        if freed != 0 {
            debug!(freed, capacity = self.capacity, "trimmed spare groups");
        }
    }

    /// Rebuild the chain so that it fits the current length as tightly as
    /// the block bounds allow.
    ///
    /// An empty queue releases all of its groups. A queue that already has
    /// no unused slots is left alone.
    ///
    /// # Panics
    ///
    /// Same allocation behaviour as [`push`](Self::push).
    pub fn shrink_to_fit(&mut self) {
        if self.first_group.is_none() || self.len == self.capacity {
            return;
        }
        if self.len == 0 {
            self.clear();
            return;
        }
        if let Err(err) = self.consolidate(self.bounds, HeadFit::Exact) {
            err.raise();
        }
    }

    /// Change the block bounds.
    ///
    /// If any existing group falls outside the new bounds the whole chain is
    /// consolidated once into groups that conform to them. The new bounds are
    /// committed only after that succeeded.
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidBlockCapacity`] for invalid bounds, or an
    /// allocation error from the consolidation. Either way the queue keeps
    /// its previous bounds and chain.
    pub fn reshape(&mut self, min: usize, max: usize) -> Result<(), QueueError> {
        let bounds = BlockCapacity::new(min, max)?;

        let conforming = self.groups().all(|group| {
            // SAFETY: `groups` yields live headers.
            bounds.contains(unsafe { group.as_ref().capacity() })
        });
        if !conforming {
            self.consolidate(bounds, HeadFit::Bounded)?;
        }

        debug!(min, max, consolidated = !conforming, "reshaped queue");
        self.bounds = bounds;
        Ok(())
    }

    /// Exchange the contents, bounds and allocators of two queues in O(1).
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// Copy the queue into a new one backed by `alloc`.
    ///
    /// # Panics
    ///
    /// Same allocation behaviour as [`push`](Self::push).
    pub fn clone_in<B: Allocator>(&self, alloc: B) -> Queue<T, P, B>
    where
        T: Clone,
    {
        self.try_clone_in(alloc).unwrap_or_else(|err| err.raise())
    }

    /// Copy the queue into a new one backed by `alloc`.
    ///
    /// When all elements fit in one maximum-sized block the copy gets a
    /// single group of exactly `len()` slots; otherwise it gets a chain of
    /// maximum-sized groups. Bounds are carried over.
    ///
    /// # Errors
    ///
    /// An allocation error; the source is untouched.
    pub fn try_clone_in<B: Allocator>(&self, alloc: B) -> Result<Queue<T, P, B>, QueueError>
    where
        T: Clone,
    {
        let mut copy = Queue::with_bounds_in(self.bounds, alloc);
        copy.prepare_for(self.len)?;
        for value in self {
            // SAFETY: `prepare_for` provided room for every element.
            unsafe { copy.push_within_capacity(value.clone()) };
        }
        Ok(copy)
    }

    /// Hand the whole chain over to a new queue in O(1), leaving this one
    /// empty with the same bounds and a clone of the allocator.
    ///
    /// No element moves in memory.
    #[must_use]
    pub fn take(&mut self) -> Self
    where
        A: Clone,
    {
        let empty = Self::with_bounds_in(self.bounds, self.alloc.clone());
        mem::replace(self, empty)
    }

    /// Move every element into a new queue backed by `alloc`, leaving this
    /// one empty.
    ///
    /// Elements are moved one by one; prefer [`take`](Self::take) when the
    /// allocator stays the same.
    ///
    /// # Panics
    ///
    /// Same allocation behaviour as [`push`](Self::push).
    pub fn take_in<B: Allocator>(&mut self, alloc: B) -> Queue<T, P, B> {
        self.try_take_in(alloc).unwrap_or_else(|err| err.raise())
    }

    /// Move every element into a new queue backed by `alloc`.
    ///
    /// The destination chain is allocated before anything moves, so on
    /// failure the source keeps all of its elements. On success the source
    /// is cleared and releases its groups.
    ///
    /// # Errors
    ///
    /// An allocation error.
    pub fn try_take_in<B: Allocator>(&mut self, alloc: B) -> Result<Queue<T, P, B>, QueueError> {
        let mut moved = Queue::with_bounds_in(self.bounds, alloc);
        moved.prepare_for(self.len)?;
        while let Some(value) = self.pop() {
            // SAFETY: `prepare_for` provided room for every element.
            unsafe { moved.push_within_capacity(value) };
        }
        self.clear();
        Ok(moved)
    }

    /// Front-to-back iterator.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter::new(self.raw_iter())
    }

    /// Front-to-back iterator over mutable references.
    pub fn iter_mut(&mut self) -> IterMut<'_, T> {
        IterMut::new(self.raw_iter())
    }

    /// Cursor at the front element (`begin`).
    pub fn cursor_begin(&self) -> Cursor<'_, T> {
        Cursor::new(self.span(), self.first_group, self.start)
    }

    /// Cursor one past the back element (`end`).
    pub fn cursor_end(&self) -> Cursor<'_, T> {
        Cursor::new(self.span(), self.current_group, self.tail)
    }

    /// Reverse cursor at the back element (`rbegin`).
    pub fn rcursor_begin(&self) -> ReverseCursor<'_, T> {
        ReverseCursor::new(self.cursor_end())
    }

    /// Reverse cursor one before the front element (`rend`).
    pub fn rcursor_end(&self) -> ReverseCursor<'_, T> {
        ReverseCursor::new(self.cursor_begin())
    }

    fn raw_iter(&self) -> RawIter<T> {
        RawIter::new(
            self.first_group,
            self.start,
            self.current_group,
            self.tail,
            self.len,
        )
    }

    fn span(&self) -> Span<T> {
        Span {
            first: self.first_group,
            start: self.start,
            last: self.current_group,
            tail: self.tail,
            owner: ptr::from_ref(self).cast(),
        }
    }

    /// Every group of the chain, spare groups included.
    fn groups(&self) -> impl Iterator<Item = NonNull<Group<T>>> + '_ {
        // SAFETY: links always point at live headers owned by this queue.
        iter::successors(self.first_group, |group| unsafe { group.as_ref().next })
    }

    /// Live slot ranges, one per group from front to back.
    fn segments(&self) -> impl Iterator<Item = (NonNull<Group<T>>, Range<usize>)> + '_ {
        let mut next = if self.len == 0 {
            None
        } else {
            self.first_group
        };
        let mut from = self.start;

        iter::from_fn(move || {
            let group = next?;
            let is_last = Some(group) == self.current_group;
            // SAFETY: `group` is a live header between first and current.
            let to = if is_last {
                self.tail
            } else {
                unsafe { group.as_ref().capacity() }
            };
            next = if is_last {
                None
            } else {
                unsafe { group.as_ref().next }
            };
            Some((group, mem::take(&mut from)..to))
        })
    }

    /// Free slots that pushes can use without allocating.
    fn spare_capacity(&self) -> usize {
        let Some(current) = self.current_group else {
            return 0;
        };
        // SAFETY: links always point at live headers owned by this queue.
        let trailing: usize = iter::successors(unsafe { current.as_ref().next }, |group| unsafe {
            group.as_ref().next
        })
        .map(|group| unsafe { group.as_ref().capacity() })
        .sum();
        self.current_end - self.tail + trailing
    }

    /// Allocate the first group of an uninitialized queue.
    fn initialize(&mut self, capacity: usize) -> Result<NonNull<Group<T>>, QueueError> {
        debug_assert!(self.first_group.is_none());

        let group = Group::allocate(capacity, None, &self.alloc).inspect_err(|err| {
            warn!(capacity, error = %err, "failed to allocate first group");
        })?;
        trace!(capacity, "allocated first group");

        self.first_group = Some(group);
        self.current_group = Some(group);
        self.start = 0;
        self.tail = 0;
        self.current_end = capacity;
        self.capacity = capacity;
        Ok(group)
    }

    /// Allocate a group and link it as the successor of `previous`.
    fn link_group_after(
        &mut self,
        previous: NonNull<Group<T>>,
        capacity: usize,
    ) -> Result<NonNull<Group<T>>, QueueError> {
        let group = Group::allocate(capacity, Some(previous), &self.alloc).inspect_err(|err| {
            warn!(capacity, len = self.len, error = %err, "failed to allocate group");
        })?;

        // SAFETY: `previous` is a live header at the end of the chain.
        unsafe { (*previous.as_ptr()).next = Some(group) };
        self.capacity += capacity;
        trace!(capacity, total = self.capacity, "allocated group");
        Ok(group)
    }

    /// Reserve the next back slot without writing it.
    fn claim_slot(&mut self) -> Result<Slot<T>, QueueError> {
        let (group, crossed) = match self.current_group {
            None => (self.initialize(self.bounds.min())?, false),
            Some(current) if self.tail == self.current_end => {
                // SAFETY: `current` is a live header.
                let next = match unsafe { current.as_ref().next } {
                    Some(spare) => spare,
                    None => {
                        let capacity = policy::next_group_capacity(
                            self.current_end,
                            self.len,
                            P::DIVISOR,
                            self.bounds,
                        );
                        self.link_group_after(current, capacity)?
                    },
                };
                self.current_group = Some(next);
                self.tail = 0;
                // SAFETY: `next` is a live header.
                self.current_end = unsafe { next.as_ref().capacity() };
                (next, true)
            },
            Some(current) => (current, false),
        };

        Ok(Slot {
            // SAFETY: `group` is live and `tail < current_end` at this point.
            ptr: unsafe { group.as_ref().slot(self.tail) },
            crossed,
        })
    }

    /// Undo a claim that crossed into a new group: the previous group is
    /// full, so the back element is its last slot.
    fn step_back(&mut self) {
        let previous = self
            .current_group
            // SAFETY: `current_group` is a live header.
            .and_then(|current| unsafe { current.as_ref().previous });

        if let Some(previous) = previous {
            self.current_group = Some(previous);
            // SAFETY: `previous` is a live header.
            self.current_end = unsafe { previous.as_ref().capacity() };
            self.tail = self.current_end;
        }
    }

    /// Write `value` into a claimed slot and publish it.
    ///
    /// # Safety
    ///
    /// `ptr` must be the slot returned by the latest `claim_slot`.
    #[inline]
    unsafe fn commit(&mut self, ptr: NonNull<T>, value: T) {
        // SAFETY: the slot is vacant and inside the current group.
        unsafe { ptr.write(value) };
        self.tail += 1;
        self.len += 1;
    }

    /// Push into already-available room.
    ///
    /// # Safety
    ///
    /// The chain must have a free slot at or after the back, so that
    /// `claim_slot` never allocates.
    unsafe fn push_within_capacity(&mut self, value: T) {
        debug_assert!(self.spare_capacity() > 0);
        match self.claim_slot() {
            // SAFETY: the slot was just claimed.
            Ok(slot) => unsafe { self.commit(slot.ptr, value) },
            Err(_) => unreachable!("push_within_capacity without spare room"),
        }
    }

    /// Allocate room for exactly `len` elements in an empty, uninitialized
    /// queue: one exact-fit group if `len <= max`, otherwise full `max`-sized
    /// groups.
    fn prepare_for(&mut self, len: usize) -> Result<(), QueueError> {
        debug_assert!(self.first_group.is_none());

        if len == 0 {
            return Ok(());
        }
        if len <= self.bounds.max() {
            return self.initialize(len).map(drop);
        }

        let bounds = self.bounds;
        self.bounds = BlockCapacity::pinned(bounds.max());
        let reserved = self.try_reserve(len);
        self.bounds = bounds;
        reserved
    }

    /// Detach the emptied first group, recycling or freeing it.
    ///
    /// # Safety
    ///
    /// `first` must be the first group, hold no live elements and differ
    /// from the current group.
    unsafe fn retire_first_group(&mut self, first: NonNull<Group<T>>) {
        let Some(current) = self.current_group else {
            return;
        };
        debug_assert_ne!(first, current);

        // SAFETY: all headers involved are live and owned by this queue.
        unsafe {
            let Some(next) = first.as_ref().next else {
                return;
            };
            let emptied = first.as_ref().capacity();

            if policy::should_recycle(emptied, self.current_end, current.as_ref().next.is_some()) {
                (*current.as_ptr()).next = Some(first);
                (*first.as_ptr()).next = None;
                (*first.as_ptr()).previous = Some(current);
                trace!(capacity = emptied, "recycled front group");
            } else {
                self.capacity -= emptied;
                Group::deallocate(first, &self.alloc);
                trace!(capacity = emptied, total = self.capacity, "freed front group");
            }

            (*next.as_ptr()).previous = None;
            self.first_group = Some(next);
            self.start = 0;
        }
    }

    /// Rebuild the live elements into a fresh, minimal chain for `bounds`
    /// and free the old chain (spare groups included).
    ///
    /// The new chain is fully allocated before any element moves, so an
    /// allocation failure leaves the queue untouched.
    fn consolidate(&mut self, bounds: BlockCapacity, fit: HeadFit) -> Result<(), QueueError> {
        if self.len == 0 {
            self.clear();
            return Ok(());
        }

        let max = bounds.max();
        let (head_capacity, count) = if self.len <= max {
            let head = match fit {
                HeadFit::Exact => self.len,
                HeadFit::Bounded => bounds.clamp(self.len),
            };
            (head, 1)
        } else {
            (max, self.len.div_ceil(max))
        };

        debug!(
            len = self.len,
            groups = count,
            capacity = head_capacity,
            "consolidating queue"
        );

        let head = Group::allocate(head_capacity, None, &self.alloc)?;
        let mut last = head;
        for _ in 1..count {
            match Group::allocate(max, Some(last), &self.alloc) {
                Ok(group) => {
                    // SAFETY: `last` is the live tail of the new chain.
                    unsafe { (*last.as_ptr()).next = Some(group) };
                    last = group;
                },
                Err(err) => {
                    warn!(error = %err, "consolidation aborted");
                    // SAFETY: the partial chain holds no elements.
                    unsafe { free_chain(Some(head), &self.alloc) };
                    return Err(err);
                },
            }
        }

        // Relocate every live element; moves are bitwise and cannot fail.
        let mut dest = head;
        let mut dest_index = 0usize;
        for (group, range) in self.segments() {
            let mut from = range.start;
            while from < range.end {
                // SAFETY: `dest` and `group` are live headers; the new chain
                // has exactly enough room for `len` elements.
                unsafe {
                    if dest_index == dest.as_ref().capacity() {
                        let Some(next) = dest.as_ref().next else {
                            unreachable!("consolidated chain too short");
                        };
                        dest = next;
                        dest_index = 0;
                    }
                    let count = (range.end - from).min(dest.as_ref().capacity() - dest_index);
                    ptr::copy_nonoverlapping(
                        group.as_ref().slot(from).as_ptr(),
                        dest.as_ref().slot(dest_index).as_ptr(),
                        count,
                    );
                    from += count;
                    dest_index += count;
                }
            }
        }

        // SAFETY: every element of the old chain was moved out above.
        unsafe { free_chain(self.first_group, &self.alloc) };

        self.first_group = Some(head);
        self.current_group = Some(dest);
        self.start = 0;
        self.tail = dest_index;
        // SAFETY: `dest` is a live header of the new chain.
        self.current_end = unsafe { dest.as_ref().capacity() };
        self.capacity = head_capacity + (count - 1) * max;
        Ok(())
    }

    /// Drop all live elements and free every group.
    fn destroy_all(&mut self) {
        let live: Vec<_> = if mem::needs_drop::<T>() {
            self.segments().collect()
        } else {
            Vec::new()
        };
        // Nothing is live any more, even if a destructor below panics.
        self.len = 0;

        for (group, range) in live {
            // SAFETY: `range` covers live slots, each dropped once.
            unsafe {
                let base = group.as_ref().slot(range.start).as_ptr();
                ptr::drop_in_place(ptr::slice_from_raw_parts_mut(base, range.len()));
            }
        }

        // SAFETY: no live elements remain.
        unsafe { free_chain(self.first_group.take(), &self.alloc) };
        self.current_group = None;
        self.start = 0;
        self.tail = 0;
        self.current_end = 0;
        self.capacity = 0;
    }
}

/// How [`Queue::consolidate`] sizes a chain that fits in a single group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeadFit {
    /// Exactly `len` slots.
    Exact,
    /// `len` clamped into the target bounds.
    Bounded,
}

/// Free `head` and every group after it.
///
/// # Safety
///
/// The groups must hold no live elements and be unreachable afterwards.
unsafe fn free_chain<T, A: Allocator>(head: Option<NonNull<Group<T>>>, alloc: &A) {
    let mut next = head;
    while let Some(group) = next {
        // SAFETY: the caller hands over ownership of the whole chain.
        unsafe {
            next = group.as_ref().next;
            Group::deallocate(group, alloc);
        }
    }
}

impl<T, P: Priority, A: Allocator> Drop for Queue<T, P, A> {
    fn drop(&mut self) {
        self.destroy_all();
    }
}

impl<T, P: Priority, A: Allocator + Default> Default for Queue<T, P, A> {
    fn default() -> Self {
        Self::new_in(A::default())
    }
}

impl<T: Clone, P: Priority, A: Allocator + Clone> Clone for Queue<T, P, A> {
    fn clone(&self) -> Self {
        self.clone_in(self.alloc.clone())
    }
}

impl<T: fmt::Debug, P: Priority, A: Allocator> fmt::Debug for Queue<T, P, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .field("bounds", &self.bounds)
            .field("elements", &self.iter())
            .finish_non_exhaustive()
    }
}

impl<T, U, P, Q, A, B> PartialEq<Queue<U, Q, B>> for Queue<T, P, A>
where
    T: PartialEq<U>,
    P: Priority,
    Q: Priority,
    A: Allocator,
    B: Allocator,
{
    fn eq(&self, other: &Queue<U, Q, B>) -> bool {
        self.len == other.len && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl<T: Eq, P: Priority, A: Allocator> Eq for Queue<T, P, A> {}

impl<T: Hash, P: Priority, A: Allocator> Hash for Queue<T, P, A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.len);
        for value in self {
            value.hash(state);
        }
    }
}

impl<T, P: Priority, A: Allocator> Extend<T> for Queue<T, P, A> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.push(value);
        }
    }
}

impl<'a, T: Copy + 'a, P: Priority, A: Allocator> Extend<&'a T> for Queue<T, P, A> {
    fn extend<I: IntoIterator<Item = &'a T>>(&mut self, iter: I) {
        self.extend(iter.into_iter().copied());
    }
}

impl<T, P: Priority> FromIterator<T> for Queue<T, P> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut queue = Self::new_in(Global);
        queue.extend(iter);
        queue
    }
}

impl<T, P: Priority, A: Allocator> IntoIterator for Queue<T, P, A> {
    type Item = T;
    type IntoIter = IntoIter<T, P, A>;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter::new(self)
    }
}

impl<'a, T, P: Priority, A: Allocator> IntoIterator for &'a Queue<T, P, A> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T, P: Priority, A: Allocator> IntoIterator for &'a mut Queue<T, P, A> {
    type Item = &'a mut T;
    type IntoIter = IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

// SAFETY: the queue owns its elements and groups exclusively; sending it
// sends the elements and the allocator.
unsafe impl<T: Send, P: Priority, A: Allocator + Send> Send for Queue<T, P, A> {}

// SAFETY: shared access only hands out `&T` and `&A`.
unsafe impl<T: Sync, P: Priority, A: Allocator + Sync> Sync for Queue<T, P, A> {}
