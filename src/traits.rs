use crate::{QueueError, policy::Priority, queue::Queue};
use allocator_api2::alloc::Allocator;

/// Trait for queue producers that can push items into a queue.
///
/// Lets code append to a queue without naming its priority or allocator.
pub trait QueueProducer<T> {
    /// Push a value, handing it back if no slot could be obtained.
    ///
    /// # Arguments
    /// * `value` - The value to push
    ///
    /// # Returns
    /// `Ok(())` on success, or the value together with the `QueueError`
    fn try_push(&mut self, value: T) -> Result<(), (T, QueueError)>;

    /// Push a value.
    ///
    /// # Arguments
    /// * `value` - The value to push
    ///
    /// # Panics
    /// When a new block cannot be allocated
    fn push(&mut self, value: T);

    /// Construct the new back element in place.
    ///
    /// # Arguments
    /// * `construct` - Produces the value once a slot is available
    fn emplace_with<F>(&mut self, construct: F)
    where
        F: FnOnce() -> T;
}

/// Trait for queue consumers that can pop items from a queue.
///
/// Lets code drain a queue in FIFO order without naming its priority or
/// allocator.
pub trait QueueConsumer<T> {
    /// Pop the oldest value.
    ///
    /// # Returns
    /// The popped value, or `None` if the queue is empty
    fn pop(&mut self) -> Option<T>;

    /// Peek at the oldest value without removing it.
    ///
    /// # Returns
    /// A reference to the head element, or `None` if the queue is empty
    fn peek(&self) -> Option<&T>;

    /// Pop if predicate returns true for the head element.
    ///
    /// # Arguments
    /// * `predicate` - Function to test the head element
    ///
    /// # Returns
    /// The popped value if the predicate accepted it, otherwise `None`
    fn pop_if<F>(&mut self, predicate: F) -> Option<T>
    where
        F: FnOnce(&T) -> bool,
    {
        if predicate(self.peek()?) {
            self.pop()
        } else {
            None
        }
    }

    /// Consume elements with a closure until the queue is empty or the closure
    /// returns true to stop.
    ///
    /// # Arguments
    /// * `consumer` - Function to process each element, returns true to stop
    ///
    /// # Returns
    /// Number of elements consumed
    fn consume<F>(&mut self, mut consumer: F) -> usize
    where
        F: FnMut(T) -> bool,
    {
        let mut count = 0;
        while let Some(value) = self.pop() {
            count += 1;
            if consumer(value) {
                break;
            }
        }
        count
    }

    /// Check if the queue is empty.
    fn is_empty(&self) -> bool;

    /// Number of elements in the queue.
    fn size(&self) -> usize;
}

impl<T, P: Priority, A: Allocator> QueueProducer<T> for Queue<T, P, A> {
    #[inline]
    fn try_push(&mut self, value: T) -> Result<(), (T, QueueError)> {
        Self::try_push(self, value)
    }

    #[inline]
    fn push(&mut self, value: T) {
        Self::push(self, value);
    }

    #[inline]
    fn emplace_with<F>(&mut self, construct: F)
    where
        F: FnOnce() -> T,
    {
        Self::emplace_with(self, construct);
    }
}

impl<T, P: Priority, A: Allocator> QueueConsumer<T> for Queue<T, P, A> {
    #[inline]
    fn pop(&mut self) -> Option<T> {
        Self::pop(self)
    }

    #[inline]
    fn peek(&self) -> Option<&T> {
        self.front()
    }

    #[inline]
    fn is_empty(&self) -> bool {
        Self::is_empty(self)
    }

    #[inline]
    fn size(&self) -> usize {
        self.len()
    }
}
