use crate::{Queue, QueueError, group::Group};
use std::mem;

/// Tuning constant that trades block size against memory use.
///
/// The divisor is applied to the live element count when sizing a new group
/// and to the default block bounds. It is fixed per queue type.
pub trait Priority {
    /// Divisor applied to the element count when sizing new groups.
    const DIVISOR: usize;
}

/// Favour throughput: larger blocks, fewer allocations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Performance;

impl Priority for Performance {
    const DIVISOR: usize = 1;
}

/// Favour a small footprint: blocks are a quarter of the performance size.
///
/// This is the default priority of [`Queue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MemoryUse;

impl Priority for MemoryUse {
    const DIVISOR: usize = 4;
}

/// Validated lower and upper bound on the capacity of any group.
///
/// Both bounds are at least 2, `min <= max`, and `max` never exceeds half of
/// `usize::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockCapacity {
    min: usize,
    max: usize,
}

impl BlockCapacity {
    /// Validate a pair of bounds.
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidBlockCapacity`] when `min < 2`, `min > max` or
    /// `max > usize::MAX / 2`.
    pub const fn new(min: usize, max: usize) -> Result<Self, QueueError> {
        if min < 2 || min > max || max > usize::MAX / 2 {
            return Err(QueueError::InvalidBlockCapacity { min, max });
        }
        Ok(Self { min, max })
    }

    /// Default bounds for elements of type `T` under priority `P`.
    ///
    /// Small elements get a minimum block large enough to amortise the
    /// group and queue headers; large elements get a minimum of 8. The
    /// maximum block spans roughly 12 KiB of elements (768 elements past 128
    /// bytes each). Both are divided by the priority divisor.
    pub fn default_for<T, P: Priority>() -> Self {
        let element = mem::size_of::<T>().max(1);
        let overhead = (mem::size_of::<Queue<T, P>>() + mem::size_of::<Group<T>>()) * 2;

        let min = (if element * 8 > overhead {
            8
        } else {
            overhead / element + 1
        }) / P::DIVISOR;
        let max = (if element > 128 { 768 } else { 12288 / element }) / P::DIVISOR;

        let max = max.max(2);
        Self {
            min: min.clamp(2, max),
            max,
        }
    }

    /// Bounds that admit exactly one capacity.
    pub(crate) const fn pinned(capacity: usize) -> Self {
        Self {
            min: capacity,
            max: capacity,
        }
    }

    /// Smallest capacity a newly grown group may have.
    #[inline]
    pub const fn min(&self) -> usize {
        self.min
    }

    /// Largest capacity a newly grown group may have.
    #[inline]
    pub const fn max(&self) -> usize {
        self.max
    }

    /// Whether a group of `capacity` slots conforms to these bounds.
    #[inline]
    pub const fn contains(&self, capacity: usize) -> bool {
        capacity >= self.min && capacity <= self.max
    }

    #[inline]
    pub(crate) const fn clamp(&self, capacity: usize) -> usize {
        if capacity < self.min {
            self.min
        } else if capacity > self.max {
            self.max
        } else {
            capacity
        }
    }
}

/// Capacity of the group appended when the current group is full.
///
/// While the scaled element count stays within `(current / 2, current * 2)`
/// the current capacity is repeated, so blocks freed by pops have the same
/// size as the active block and can be recycled. Otherwise the scaled count
/// is clamped into `bounds`.
#[inline]
pub(crate) const fn next_group_capacity(
    current: usize,
    len: usize,
    divisor: usize,
    bounds: BlockCapacity,
) -> usize {
    let divided = len / divisor;

    if divided < current.saturating_mul(2) && divided > current / 2 {
        current
    } else {
        bounds.clamp(divided)
    }
}

/// Whether an emptied front group is kept as the spare successor of the
/// current group instead of being freed.
///
/// Only an exact capacity match qualifies, and only when the current group
/// has no spare successor yet.
#[inline]
pub(crate) const fn should_recycle(
    emptied: usize,
    current: usize,
    current_has_successor: bool,
) -> bool {
    !current_has_successor && emptied == current
}
