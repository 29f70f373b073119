//! # Plexus: FIFO Queues on a Chain of Reusable Blocks
//!
//! Plexus provides [`Queue`], a first-in first-out container that stores its
//! elements in a singly-linked chain of independently allocated blocks
//! (*groups*). Pushing appends to the newest group, popping consumes from the
//! oldest one, and emptied groups are recycled or released as the queue
//! drains.
//!
//! ## Features
//!
//! - **Stable elements**: elements never move while they are live, except
//!   during an explicit [`shrink_to_fit`](Queue::shrink_to_fit) or
//!   [`reshape`](Queue::reshape)
//! - **Block reuse**: a drained front block is relinked behind the back block
//!   under steady load instead of being freed and reallocated
//! - **Tunable growth**: per-queue minimum and maximum block capacities and a
//!   compile-time [`Priority`] that trades block size against memory use
//! - **Custom allocators**: every group comes from an
//!   [`allocator_api2::alloc::Allocator`] held by value
//! - **Fallible twins**: `try_push`, `try_emplace_with`, `try_reserve` and
//!   `try_clone_in` report allocation failure instead of aborting
//!
//! ## Basic Usage
//!
//! ```rust
//! use plexus::Queue;
//!
//! let mut queue = Queue::new();
//! for i in 0..1000 {
//!     queue.push(i);
//! }
//!
//! assert_eq!(queue.front(), Some(&0));
//! assert_eq!(queue.back(), Some(&999));
//!
//! let mut sum = 0;
//! while let Some(value) = queue.pop() {
//!     sum += value;
//! }
//! assert_eq!(sum, 499_500);
//! ```
//!
//! ## Configuring Blocks
//!
//! Use the [`builder`] to set block bounds, an initial reservation or the
//! growth priority:
//!
//! ```rust
//! use plexus::{Performance, queue_with_priority};
//!
//! # fn main() -> Result<(), plexus::QueueError> {
//! let mut queue = queue_with_priority::<u64, Performance>()
//!     .block_capacities(64, 4096)
//!     .reserve(10_000)
//!     .build()?;
//!
//! let capacity = queue.capacity();
//! queue.extend(0..10_000);
//! assert_eq!(queue.capacity(), capacity);
//! # Ok(())
//! # }
//! ```
//!
//! ## Fallible Construction
//!
//! Elements can be constructed in place. When the constructor fails the queue
//! is left as it was:
//!
//! ```rust
//! use plexus::{EmplaceError, Queue};
//!
//! let mut queue = Queue::<String>::new();
//! queue.push("ready".to_owned());
//!
//! let result = queue.try_emplace_with(|| "not a number".parse::<u8>().map(|n| n.to_string()));
//! assert!(matches!(result, Err(EmplaceError::Construct(_))));
//! assert_eq!(queue.len(), 1);
//! assert_eq!(queue.back().map(String::as_str), Some("ready"));
//! ```
//!
//! ## Producer and Consumer Traits
//!
//! [`Queue`] implements [`QueueProducer`] and [`QueueConsumer`], so code can
//! be written against the seam instead of the concrete type:
//!
//! ```rust
//! use plexus::{
//!     Queue,
//!     traits::{QueueConsumer, QueueProducer},
//! };
//!
//! fn fill(producer: &mut impl QueueProducer<u32>) {
//!     for i in 0..5 {
//!         producer.push(i);
//!     }
//! }
//!
//! let mut queue = Queue::new();
//! fill(&mut queue);
//!
//! let even = queue.pop_if(|value| value % 2 == 0);
//! assert_eq!(even, Some(0));
//!
//! let mut seen = Vec::new();
//! let count = queue.consume(|value| {
//!     seen.push(value);
//!     value >= 3
//! });
//! assert_eq!(count, 3);
//! assert_eq!(seen, [1, 2, 3]);
//! ```
//!
//! ## Logging
//!
//! Block-level events (allocation, recycling, consolidation, trimming and
//! allocation failures) are emitted through [`tracing`]. No subscriber is
//! installed by the library.
//!
//! ## Error Handling
//!
//! Fallible operations return [`QueueError`]:
//! - `QueueError::InvalidBlockCapacity` - Block bounds out of range
//! - `QueueError::CapacityOverflow` - A size computation overflowed
//! - `QueueError::AllocationFailed` - The allocator refused a group
//!
//! Their panicking counterparts follow the standard collections and call
//! [`std::alloc::handle_alloc_error`] or panic with "capacity overflow".
//!
//! ## Minimum Supported Rust Version (MSRV)
//!
//! Plexus requires Rust 1.88 or later.
#![deny(
    missing_docs,
    unused_imports,
    unused_variables,
    dead_code,
    unreachable_code,
    unused_must_use
)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::type_complexity
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Fluent configuration for new queues.
///
/// This module provides [`QueueBuilder`] and the [`queue`] /
/// [`queue_with_priority`] entry points.
///
/// [`QueueBuilder`]: builder::QueueBuilder
/// [`queue`]: builder::queue
/// [`queue_with_priority`]: builder::queue_with_priority
pub mod builder;

mod group;

/// Iterators and cursors over a [`Queue`].
pub mod iter;

/// Block sizing: priorities, block bounds and the growth/reuse rules.
///
/// [`Priority`] fixes the divisor applied when sizing groups;
/// [`BlockCapacity`] holds the validated per-queue bounds.
///
/// [`Priority`]: policy::Priority
/// [`BlockCapacity`]: policy::BlockCapacity
pub mod policy;

mod queue;

/// Common traits for queue producers and consumers.
///
/// This module defines the abstractions that let callers push into and drain
/// a queue without naming its concrete type: [`QueueProducer`] and
/// [`QueueConsumer`].
///
/// [`QueueProducer`]: traits::QueueProducer
/// [`QueueConsumer`]: traits::QueueConsumer
pub mod traits;

pub use builder::{QueueBuilder, queue, queue_with_priority};
pub use iter::{Cursor, IntoIter, Iter, IterMut, ReverseCursor};
pub use policy::{BlockCapacity, MemoryUse, Performance, Priority};
pub use queue::Queue;
pub use traits::{QueueConsumer, QueueProducer};

use allocator_api2::alloc::Layout;
use thiserror::Error;

/// Errors that can occur during queue operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The requested block bounds are out of range.
    ///
    /// Both bounds must be at least 2, `min` must not exceed `max`, and `max`
    /// must not exceed `usize::MAX / 2`. Returned by the builder,
    /// [`Queue::with_block_capacities`] and [`Queue::reshape`]; the queue is
    /// never modified.
    #[error("invalid block capacities: min {min}, max {max} (need 2 <= min <= max <= usize::MAX / 2)")]
    InvalidBlockCapacity {
        /// Requested minimum group capacity.
        min: usize,
        /// Requested maximum group capacity.
        max: usize,
    },

    /// A group size or reservation does not fit the address space.
    #[error("capacity overflow")]
    CapacityOverflow,

    /// The allocator refused a group request.
    ///
    /// The queue's length, front and back are unchanged.
    #[error("memory allocation of {} bytes failed", layout.size())]
    AllocationFailed {
        /// Layout of the refused request.
        layout: Layout,
    },
}

impl QueueError {
    /// Escalate an error from an operation without a fallible signature, the
    /// way the standard collections do.
    pub(crate) fn raise(self) -> ! {
        match self {
            Self::AllocationFailed { layout } => std::alloc::handle_alloc_error(layout),
            Self::CapacityOverflow => panic!("capacity overflow"),
            Self::InvalidBlockCapacity { .. } => panic!("{self}"),
        }
    }
}

/// Failure of [`Queue::try_emplace_with`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmplaceError<E> {
    /// No slot could be obtained; the constructor was not called.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// The constructor returned an error; the queue is unchanged.
    #[error("element construction failed")]
    Construct(E),
}
