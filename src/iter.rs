use crate::{group::Group, policy::Priority, queue::Queue};
use allocator_api2::alloc::Allocator;
use std::{fmt, iter::FusedIterator, marker::PhantomData, ptr::NonNull};

/// Two-ended walk over the live slots of a chain.
///
/// `front` is the next slot to yield, `back` is one past the last slot to
/// yield. Crossing into a neighbouring group happens lazily and is bounded by
/// `remaining`, so the walk never touches spare groups past the back element.
pub(crate) struct RawIter<T> {
    front_group: Option<NonNull<Group<T>>>,
    front: usize,
    back_group: Option<NonNull<Group<T>>>,
    back: usize,
    remaining: usize,
}

impl<T> RawIter<T> {
    pub(crate) const fn new(
        front_group: Option<NonNull<Group<T>>>,
        front: usize,
        back_group: Option<NonNull<Group<T>>>,
        back: usize,
        remaining: usize,
    ) -> Self {
        Self {
            front_group,
            front,
            back_group,
            back,
            remaining,
        }
    }

    fn next(&mut self) -> Option<NonNull<T>> {
        if self.remaining == 0 {
            return None;
        }
        let mut group = self.front_group?;

        // SAFETY: while elements remain, `group` and its successors up to the
        // back group are live headers.
        unsafe {
            if self.front == group.as_ref().capacity() {
                group = group.as_ref().next?;
                self.front_group = Some(group);
                self.front = 0;
            }
            let slot = group.as_ref().slot(self.front);
            self.front += 1;
            self.remaining -= 1;
            Some(slot)
        }
    }

    fn next_back(&mut self) -> Option<NonNull<T>> {
        if self.remaining == 0 {
            return None;
        }
        let mut group = self.back_group?;

        // SAFETY: as in `next`, walking the `previous` links instead.
        unsafe {
            if self.back == 0 {
                group = group.as_ref().previous?;
                self.back_group = Some(group);
                self.back = group.as_ref().capacity();
            }
            self.back -= 1;
            self.remaining -= 1;
            Some(group.as_ref().slot(self.back))
        }
    }
}

impl<T> Clone for RawIter<T> {
    fn clone(&self) -> Self {
        Self { ..*self }
    }
}

/// Front-to-back iterator over shared references, from [`Queue::iter`].
pub struct Iter<'a, T> {
    raw: RawIter<T>,
    _marker: PhantomData<&'a T>,
}

impl<T> Iter<'_, T> {
    pub(crate) const fn new(raw: RawIter<T>) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: the slot is live for as long as the queue is borrowed.
        self.raw.next().map(|slot| unsafe { slot.as_ref() })
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.raw.remaining, Some(self.raw.remaining))
    }
}

impl<T> DoubleEndedIterator for Iter<'_, T> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        // SAFETY: the slot is live for as long as the queue is borrowed.
        self.raw.next_back().map(|slot| unsafe { slot.as_ref() })
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}
impl<T> FusedIterator for Iter<'_, T> {}

impl<T> Clone for Iter<'_, T> {
    fn clone(&self) -> Self {
        Self::new(self.raw.clone())
    }
}

impl<T: fmt::Debug> fmt::Debug for Iter<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.clone()).finish()
    }
}

// SAFETY: `Iter` only hands out `&T`.
unsafe impl<T: Sync> Send for Iter<'_, T> {}
// SAFETY: as above.
unsafe impl<T: Sync> Sync for Iter<'_, T> {}

/// Front-to-back iterator over mutable references, from
/// [`Queue::iter_mut`].
pub struct IterMut<'a, T> {
    raw: RawIter<T>,
    _marker: PhantomData<&'a mut T>,
}

impl<T> IterMut<'_, T> {
    pub(crate) const fn new(raw: RawIter<T>) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }
}

impl<'a, T> Iterator for IterMut<'a, T> {
    type Item = &'a mut T;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: each live slot is yielded at most once while the queue is
        // mutably borrowed.
        self.raw.next().map(|mut slot| unsafe { slot.as_mut() })
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.raw.remaining, Some(self.raw.remaining))
    }
}

impl<T> DoubleEndedIterator for IterMut<'_, T> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        // SAFETY: as in `next`; the two ends never overlap.
        self.raw.next_back().map(|mut slot| unsafe { slot.as_mut() })
    }
}

impl<T> ExactSizeIterator for IterMut<'_, T> {}
impl<T> FusedIterator for IterMut<'_, T> {}

impl<T: fmt::Debug> fmt::Debug for IterMut<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let remaining = Iter::<T>::new(self.raw.clone());
        f.debug_tuple("IterMut").field(&remaining).finish()
    }
}

// SAFETY: `IterMut` hands out `&mut T`, which is `Send` when `T` is.
unsafe impl<T: Send> Send for IterMut<'_, T> {}
// SAFETY: shared access to `IterMut` exposes nothing.
unsafe impl<T: Sync> Sync for IterMut<'_, T> {}

/// Owning front-to-back iterator, from [`Queue::into_iter`].
///
/// Elements are popped one at a time, so groups are recycled or freed as the
/// iterator advances.
pub struct IntoIter<T, P: Priority, A: Allocator> {
    queue: Queue<T, P, A>,
}

impl<T, P: Priority, A: Allocator> IntoIter<T, P, A> {
    pub(crate) const fn new(queue: Queue<T, P, A>) -> Self {
        Self { queue }
    }
}

impl<T, P: Priority, A: Allocator> Iterator for IntoIter<T, P, A> {
    type Item = T;

    #[inline]
    fn next(&mut self) -> Option<T> {
        self.queue.pop()
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.queue.len(), Some(self.queue.len()))
    }
}

impl<T, P: Priority, A: Allocator> ExactSizeIterator for IntoIter<T, P, A> {}
impl<T, P: Priority, A: Allocator> FusedIterator for IntoIter<T, P, A> {}

impl<T: fmt::Debug, P: Priority, A: Allocator> fmt::Debug for IntoIter<T, P, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IntoIter").field(&self.queue.iter()).finish()
    }
}

/// Snapshot of the live span of a queue, shared by every cursor created from
/// the same borrow.
pub(crate) struct Span<T> {
    pub(crate) first: Option<NonNull<Group<T>>>,
    pub(crate) start: usize,
    pub(crate) last: Option<NonNull<Group<T>>>,
    pub(crate) tail: usize,
    pub(crate) owner: *const (),
}

impl<T> Clone for Span<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Span<T> {}

/// Bidirectional position inside a [`Queue`].
///
/// A cursor sits either on a live element or on the end position one past the
/// back element. Moving stops at the ends instead of wrapping or stepping into
/// spare groups.
///
/// Two cursors are equal when they denote the same slot. Comparing cursors of
/// different queues is a logic error, caught by a debug assertion.
///
/// # Examples
///
/// ```
/// use plexus::Queue;
///
/// let queue: Queue<u32> = (1..=3).collect();
/// let mut cursor = queue.cursor_begin();
/// assert_eq!(cursor.current(), Some(&1));
///
/// cursor.move_next();
/// cursor.move_next();
/// cursor.move_next();
/// assert!(cursor == queue.cursor_end());
/// assert_eq!(cursor.current(), None);
///
/// cursor.move_prev();
/// assert_eq!(cursor.current(), Some(&3));
/// ```
pub struct Cursor<'a, T> {
    span: Span<T>,
    group: Option<NonNull<Group<T>>>,
    index: usize,
    _marker: PhantomData<&'a T>,
}

impl<'a, T> Cursor<'a, T> {
    pub(crate) const fn new(span: Span<T>, group: Option<NonNull<Group<T>>>, index: usize) -> Self {
        Self {
            span,
            group,
            index,
            _marker: PhantomData,
        }
    }

    /// `true` at the front element (or at the end of an empty queue).
    pub fn is_begin(&self) -> bool {
        self.group == self.span.first && self.index == self.span.start
    }

    /// `true` one past the back element.
    pub fn is_end(&self) -> bool {
        self.group == self.span.last && self.index == self.span.tail
    }

    /// The element under the cursor, or `None` at the end position.
    pub fn current(&self) -> Option<&'a T> {
        if self.is_end() {
            return None;
        }
        let group = self.group?;
        // SAFETY: every position other than the end is a live slot, valid
        // for the borrow `'a`.
        unsafe { Some(group.as_ref().slot(self.index).as_ref()) }
    }

    /// Step towards the back. Returns `false` (and stays) at the end.
    pub fn move_next(&mut self) -> bool {
        if self.is_end() {
            return false;
        }
        let Some(group) = self.group else {
            return false;
        };

        self.index += 1;
        // SAFETY: `group` lies between the first and last group of the span.
        unsafe {
            if self.index == group.as_ref().capacity() && Some(group) != self.span.last {
                self.group = group.as_ref().next;
                self.index = 0;
            }
        }
        true
    }

    /// Step towards the front. Returns `false` (and stays) at the front.
    pub fn move_prev(&mut self) -> bool {
        if self.is_begin() {
            return false;
        }
        let Some(group) = self.group else {
            return false;
        };

        if self.index == 0 {
            // SAFETY: not at the front, so a live predecessor group exists.
            unsafe {
                let Some(previous) = group.as_ref().previous else {
                    return false;
                };
                self.group = Some(previous);
                self.index = previous.as_ref().capacity() - 1;
            }
        } else {
            self.index -= 1;
        }
        true
    }
}

impl<T> Clone for Cursor<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Cursor<'_, T> {}

impl<T> PartialEq for Cursor<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        debug_assert_eq!(
            self.span.owner, other.span.owner,
            "cursors from different queues compared"
        );
        self.group == other.group && self.index == other.index
    }
}

impl<T> Eq for Cursor<'_, T> {}

impl<T: fmt::Debug> fmt::Debug for Cursor<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("index", &self.index)
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}

/// Back-to-front position inside a [`Queue`], built on the predecessor step
/// of a forward [`Cursor`].
///
/// The element under a reverse cursor is the one just before its base
/// cursor, so [`Queue::rcursor_begin`] (based on `end`) sits on the back
/// element and [`Queue::rcursor_end`] (based on `begin`) sits past the front.
pub struct ReverseCursor<'a, T> {
    base: Cursor<'a, T>,
}

impl<'a, T> ReverseCursor<'a, T> {
    pub(crate) const fn new(base: Cursor<'a, T>) -> Self {
        Self { base }
    }

    /// The forward cursor one position towards the back.
    pub const fn base(&self) -> Cursor<'a, T> {
        self.base
    }

    /// `true` one before the front element.
    pub fn is_end(&self) -> bool {
        self.base.is_begin()
    }

    /// The element under the cursor, or `None` past the front.
    pub fn current(&self) -> Option<&'a T> {
        let mut previous = self.base;
        if previous.move_prev() {
            previous.current()
        } else {
            None
        }
    }

    /// Step towards the front. Returns `false` (and stays) past the front.
    pub fn move_next(&mut self) -> bool {
        self.base.move_prev()
    }

    /// Step towards the back. Returns `false` (and stays) at the back
    /// element.
    pub fn move_prev(&mut self) -> bool {
        let mut ahead = self.base;
        if !ahead.move_next() {
            return false;
        }
        self.base = ahead;
        true
    }
}

impl<T> Clone for ReverseCursor<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ReverseCursor<'_, T> {}

impl<T> PartialEq for ReverseCursor<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base
    }
}

impl<T> Eq for ReverseCursor<'_, T> {}

impl<T: fmt::Debug> fmt::Debug for ReverseCursor<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReverseCursor")
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}
