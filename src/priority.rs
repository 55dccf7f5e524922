//! Message priority levels shared by the queue, flow control and sessions.

use thiserror::Error;

/// Priority level for outbound messages.
///
/// Levels are ordered so that `Critical > High > Normal > Low`; the ring
/// queue always dequeues the highest non-empty level first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    /// Bulk or speculative traffic, first to be shed under pressure.
    Low = 0,
    /// Ordinary application messages.
    #[default]
    Normal = 1,
    /// Latency-sensitive application messages.
    High = 2,
    /// Control traffic that must bypass every throttle.
    Critical = 3,
}

impl Priority {
    /// Number of distinct priority levels.
    pub const COUNT: usize = 4;

    /// All levels in dequeue order, highest first.
    pub const DESCENDING: [Self; Self::COUNT] =
        [Self::Critical, Self::High, Self::Normal, Self::Low];

    /// Index of this level into per-priority tables.
    #[must_use]
    pub const fn index(self) -> usize { self as usize }

    /// Wire representation of this level.
    #[must_use]
    pub const fn as_u8(self) -> u8 { self as u8 }
}

/// Error returned when a byte does not name a priority level.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("invalid priority level {0}")]
pub struct InvalidPriority(pub u8);

impl TryFrom<u8> for Priority {
    type Error = InvalidPriority;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Low),
            1 => Ok(Self::Normal),
            2 => Ok(Self::High),
            3 => Ok(Self::Critical),
            other => Err(InvalidPriority(other)),
        }
    }
}
