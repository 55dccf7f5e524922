//! Error types for ring queue construction and operations.

use thiserror::Error;

use super::{MAX_QUEUE_CAPACITY, SLOT_SIZE};
use crate::error::ErrorKind;

/// Errors produced by the ring queue.
#[non_exhaustive]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The requested capacity was zero, not a power of two, or above
    /// [`MAX_QUEUE_CAPACITY`].
    #[error(
        "invalid queue capacity {0}; must be a power of two between 1 and {max}",
        max = MAX_QUEUE_CAPACITY
    )]
    InvalidCapacity(usize),
    /// The payload does not fit in a single slot.
    #[error("payload of {len} bytes exceeds slot size {max}", max = SLOT_SIZE)]
    PayloadTooLarge {
        /// Length of the rejected payload.
        len: usize,
    },
    /// Every slot is occupied.
    #[error("queue full at capacity {capacity}")]
    Full {
        /// Capacity of the queue.
        capacity: usize,
    },
    /// The slot array could not be allocated.
    #[error("failed to allocate {capacity} queue slots")]
    Allocation {
        /// Capacity that was requested.
        capacity: usize,
    },
    /// The queue failed an integrity check and refuses further work.
    #[error("queue state corrupted")]
    Corrupted,
}

impl QueueError {
    /// Classify this error within the crate-wide taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCapacity(_) | Self::PayloadTooLarge { .. } => ErrorKind::Param,
            Self::Full { .. } => ErrorKind::Capacity,
            Self::Allocation { .. } => ErrorKind::Resource,
            Self::Corrupted => ErrorKind::State,
        }
    }
}
