use crate::{
    QueueError,
    policy::{BlockCapacity, MemoryUse, Performance, Priority},
    queue::Queue,
};
use allocator_api2::alloc::{Allocator, Global};
use std::{fmt, marker::PhantomData};
use tracing::debug;

/// Builder for creating queues with different configurations.
///
/// Provides a fluent API for block bounds, an initial reservation, the
/// allocator and the growth priority. Everything is validated in
/// [`build`](Self::build); unset bounds fall back to the defaults for `T`
/// under `P`.
///
/// # Type Parameters
///
/// * `T` - The element type
/// * `P` - Growth priority (default: [`MemoryUse`])
/// * `A` - Allocator (default: [`Global`])
///
/// # Examples
///
/// ```
/// use plexus::queue;
///
/// # fn main() -> Result<(), plexus::QueueError> {
/// let mut queue = queue::<u32>().block_capacities(16, 256).build()?;
///
/// queue.push(100);
/// assert_eq!(queue.pop(), Some(100));
/// assert_eq!(queue.block_capacities().min(), 16);
/// # Ok(())
/// # }
/// ```
pub struct QueueBuilder<T, P = MemoryUse, A = Global>
where
    P: Priority,
    A: Allocator,
{
    min: Option<usize>,
    max: Option<usize>,
    reserve: usize,
    alloc: A,
    _phantom: PhantomData<(T, fn() -> P)>,
}

impl<T> Default for QueueBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> QueueBuilder<T> {
    /// Create a new queue builder
    pub const fn new() -> Self {
        Self::new_in(Global)
    }
}

impl<T, P, A> QueueBuilder<T, P, A>
where
    P: Priority,
    A: Allocator,
{
    const fn new_in(alloc: A) -> Self {
        Self {
            min: None,
            max: None,
            reserve: 0,
            alloc,
            _phantom: PhantomData,
        }
    }

    /// Set the smallest capacity of a newly grown group
    #[must_use]
    pub const fn min_block_capacity(mut self, min: usize) -> Self {
        self.min = Some(min);
        self
    }

    /// Set the largest capacity of a newly grown group
    #[must_use]
    pub const fn max_block_capacity(mut self, max: usize) -> Self {
        self.max = Some(max);
        self
    }

    /// Set both block bounds
    #[must_use]
    pub const fn block_capacities(self, min: usize, max: usize) -> Self {
        self.min_block_capacity(min).max_block_capacity(max)
    }

    /// Reserve room for `additional` elements right after construction
    #[must_use]
    pub const fn reserve(mut self, additional: usize) -> Self {
        self.reserve = additional;
        self
    }

    /// Allocate groups from `alloc`
    pub fn allocator<B: Allocator>(self, alloc: B) -> QueueBuilder<T, P, B> {
        QueueBuilder {
            min: self.min,
            max: self.max,
            reserve: self.reserve,
            alloc,
            _phantom: PhantomData,
        }
    }

    /// Switch the growth priority
    pub fn priority<Q: Priority>(self) -> QueueBuilder<T, Q, A> {
        QueueBuilder {
            min: self.min,
            max: self.max,
            reserve: self.reserve,
            alloc: self.alloc,
            _phantom: PhantomData,
        }
    }

    /// Shorthand for `priority::<Performance>()`
    pub fn performance(self) -> QueueBuilder<T, Performance, A> {
        self.priority()
    }

    /// Resolve the block bounds, filling unset sides from the defaults.
    ///
    /// A lone explicit bound pulls the default of the other side along so
    /// that `min <= max` still holds; two explicit bounds are validated as
    /// given.
    fn bounds(&self) -> Result<BlockCapacity, QueueError> {
        let defaults = BlockCapacity::default_for::<T, P>();
        let (min, max) = match (self.min, self.max) {
            (Some(min), Some(max)) => (min, max),
            (Some(min), None) => (min, defaults.max().max(min)),
            (None, Some(max)) => (defaults.min().min(max), max),
            (None, None) => return Ok(defaults),
        };
        BlockCapacity::new(min, max)
    }

    /// Build the queue
    pub fn build(self) -> Result<Queue<T, P, A>, QueueError> {
        let bounds = self.bounds()?;
        debug!(
            min = bounds.min(),
            max = bounds.max(),
            reserve = self.reserve,
            "building queue"
        );

        let mut queue = Queue::with_block_capacities_in(bounds.min(), bounds.max(), self.alloc)?;
        if self.reserve != 0 {
            queue.try_reserve(self.reserve)?;
        }
        Ok(queue)
    }
}

impl<T, P, A> fmt::Debug for QueueBuilder<T, P, A>
where
    P: Priority,
    A: Allocator,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueBuilder")
            .field("min", &self.min)
            .field("max", &self.max)
            .field("reserve", &self.reserve)
            .finish_non_exhaustive()
    }
}

/// Convenience function for creating queues with the default priority.
///
/// This is the primary entry point for configuring a queue. Returns a builder
/// that allows setting block bounds and other parameters.
///
/// # Examples
///
/// ```
/// use plexus::queue;
///
/// # fn main() -> Result<(), plexus::QueueError> {
/// let mut queue = queue::<u64>().reserve(128).build()?;
///
/// queue.push(42);
/// assert!(queue.capacity() >= 128);
/// # Ok(())
/// # }
/// ```
pub const fn queue<T>() -> QueueBuilder<T> {
    QueueBuilder::new()
}

/// Convenience function for creating queues with a chosen priority.
///
/// Use [`Performance`] for larger blocks and fewer allocations, or
/// [`MemoryUse`] (the default) for a smaller footprint.
///
/// # Type Parameters
///
/// * `T` - The element type
/// * `P` - The growth priority
///
/// # Examples
///
/// ```
/// use plexus::{Performance, queue_with_priority};
///
/// # fn main() -> Result<(), plexus::QueueError> {
/// let queue = queue_with_priority::<u8, Performance>().build()?;
/// assert_eq!(queue.block_capacities().max(), 12288);
/// # Ok(())
/// # }
/// ```
pub const fn queue_with_priority<T, P: Priority>() -> QueueBuilder<T, P> {
    QueueBuilder::new_in(Global)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let queue = queue::<u32>().build().unwrap();
        assert_eq!(
            queue.block_capacities(),
            BlockCapacity::default_for::<u32, MemoryUse>()
        );
        assert_eq!(queue.capacity(), 0);
    }

    #[test]
    fn explicit_bounds_are_validated() {
        assert_eq!(
            queue::<u32>().block_capacities(0, 10).build().unwrap_err(),
            QueueError::InvalidBlockCapacity { min: 0, max: 10 }
        );
        assert!(queue::<u32>().block_capacities(20, 10).build().is_err());
        assert!(queue::<u32>().block_capacities(2, 2).build().is_ok());
    }

    #[test]
    fn single_bound_keeps_order() {
        let defaults = BlockCapacity::default_for::<u32, MemoryUse>();

        let queue = queue::<u32>().min_block_capacity(defaults.max() + 10).build().unwrap();
        assert_eq!(queue.block_capacities().min(), defaults.max() + 10);
        assert_eq!(queue.block_capacities().max(), defaults.max() + 10);

        let queue = super::queue::<u32>().max_block_capacity(4).build().unwrap();
        assert!(queue.block_capacities().min() <= 4);
        assert_eq!(queue.block_capacities().max(), 4);
    }

    #[test]
    fn reserve_preallocates() {
        let queue = queue::<u32>().block_capacities(8, 32).reserve(100).build().unwrap();
        assert!(queue.capacity() >= 100);
        assert!(queue.is_empty());
    }

    #[test]
    fn priority_changes_defaults() {
        let memory = queue::<u16>().build().unwrap();
        let performance = queue::<u16>().performance().build().unwrap();
        assert!(performance.block_capacities().max() > memory.block_capacities().max());
        assert_eq!(
            performance.block_capacities(),
            BlockCapacity::default_for::<u16, Performance>()
        );
    }

    #[test]
    fn custom_allocator_is_kept() {
        #[derive(Clone, Copy, Debug, PartialEq)]
        struct Tagged(u8);

        unsafe impl Allocator for Tagged {
            fn allocate(
                &self,
                layout: allocator_api2::alloc::Layout,
            ) -> Result<std::ptr::NonNull<[u8]>, allocator_api2::alloc::AllocError> {
                Global.allocate(layout)
            }

            unsafe fn deallocate(
                &self,
                ptr: std::ptr::NonNull<u8>,
                layout: allocator_api2::alloc::Layout,
            ) {
                unsafe { Global.deallocate(ptr, layout) }
            }
        }

        let mut queue = queue::<u32>().allocator(Tagged(7)).build().unwrap();
        queue.extend(0..100);
        assert_eq!(*queue.allocator(), Tagged(7));
        assert_eq!(queue.len(), 100);
    }

    #[test]
    fn debug_omits_allocator() {
        let rendered = format!("{:?}", queue::<u8>().reserve(3));
        assert!(rendered.contains("reserve: 3"));
    }
}
