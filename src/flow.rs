//! Priority-aware admission control.
//!
//! Two independent gates decide whether a message may be queued. The local
//! gate looks at the occupancy of our own send queue and sheds low-priority
//! traffic as it fills. The peer gate looks at the buffer pressure the remote
//! side last advertised and holds back traffic it is unlikely to absorb.
//! [`Priority::Critical`] always passes the peer gate and is the only level
//! admitted once the local queue is nearly full.

use derive_more::Display;
use thiserror::Error;

use crate::{capability::PeerCapabilities, error::ErrorKind, priority::Priority};

/// Local backpressure level derived from send queue occupancy.
#[derive(Clone, Copy, Debug, Display, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Backpressure {
    /// Below 50%: everything is admitted.
    #[default]
    #[display("none")]
    None,
    /// 50% to 74%: everything is admitted.
    #[display("light")]
    Light,
    /// 75% to 89%: [`Priority::Low`] is rejected.
    #[display("heavy")]
    Heavy,
    /// 90% and above: only [`Priority::Critical`] is admitted.
    #[display("blocking")]
    Blocking,
}

impl Backpressure {
    /// Classify an occupancy percentage.
    ///
    /// # Examples
    ///
    /// ```
    /// use peertalk::flow::Backpressure;
    ///
    /// assert_eq!(Backpressure::from_pressure(49), Backpressure::None);
    /// assert_eq!(Backpressure::from_pressure(50), Backpressure::Light);
    /// assert_eq!(Backpressure::from_pressure(75), Backpressure::Heavy);
    /// assert_eq!(Backpressure::from_pressure(90), Backpressure::Blocking);
    /// ```
    #[must_use]
    pub const fn from_pressure(pressure: u8) -> Self {
        match pressure {
            0..50 => Self::None,
            50..75 => Self::Light,
            75..90 => Self::Heavy,
            _ => Self::Blocking,
        }
    }

    /// Whether a message of `priority` is admitted at this level.
    #[must_use]
    pub const fn admits(self, priority: Priority) -> bool {
        match self {
            Self::None | Self::Light => true,
            Self::Heavy => !matches!(priority, Priority::Low),
            Self::Blocking => matches!(priority, Priority::Critical),
        }
    }
}

/// Errors produced by flow control.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FlowError {
    /// The local send queue is too full for this priority.
    #[error("{priority:?} message rejected under {level} backpressure")]
    Rejected {
        /// Priority of the rejected message.
        priority: Priority,
        /// Backpressure level at the time of rejection.
        level: Backpressure,
    },
    /// The peer reported too much pressure to accept this priority.
    #[error("{priority:?} message throttled; peer reports {pressure}% pressure")]
    Throttled {
        /// Priority of the throttled message.
        priority: Priority,
        /// Pressure the peer advertised.
        pressure: u8,
    },
}

impl FlowError {
    /// Classify this error within the crate-wide taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind { ErrorKind::Capacity }
}

/// Admit or reject a message of `priority` given local queue `pressure`.
///
/// # Errors
///
/// Returns [`FlowError::Rejected`] when the backpressure level derived from
/// `pressure` does not admit `priority`.
///
/// # Examples
///
/// ```
/// use peertalk::{Priority, flow::try_push};
///
/// assert!(try_push(95, Priority::Critical).is_ok());
/// assert!(try_push(95, Priority::High).is_err());
/// ```
pub fn try_push(pressure: u8, priority: Priority) -> Result<(), FlowError> {
    let level = Backpressure::from_pressure(pressure);
    if level.admits(priority) {
        Ok(())
    } else {
        Err(FlowError::Rejected { priority, level })
    }
}

/// Whether traffic of `priority` should be held back from `peer`.
#[must_use]
pub fn should_throttle(peer: &PeerCapabilities, priority: Priority) -> bool {
    let pressure = peer.buffer_pressure();
    match priority {
        Priority::Critical => false,
        Priority::High => pressure >= 75,
        Priority::Normal => pressure >= 50,
        Priority::Low => pressure >= 25,
    }
}

/// Apply the peer gate as a `Result`.
///
/// # Errors
///
/// Returns [`FlowError::Throttled`] when [`should_throttle`] holds.
pub fn check_peer(peer: &PeerCapabilities, priority: Priority) -> Result<(), FlowError> {
    if should_throttle(peer, priority) {
        Err(FlowError::Throttled {
            priority,
            pressure: peer.buffer_pressure(),
        })
    } else {
        Ok(())
    }
}

/// Occupancy levels at which a filling queue is reported.
pub const PRESSURE_WARNINGS: [u8; 3] = [80, 90, 95];

/// Tracks which occupancy warning was last reported so each is logged once
/// per crossing.
#[derive(Clone, Copy, Debug, Default)]
pub struct PressureMonitor {
    reported: usize,
}

impl PressureMonitor {
    /// Record a new occupancy reading.
    ///
    /// Returns the warning threshold newly crossed upwards, if any. Falling
    /// back below a threshold re-arms it.
    pub fn observe(&mut self, pressure: u8) -> Option<u8> {
        let level = PRESSURE_WARNINGS
            .iter()
            .take_while(|&&threshold| pressure >= threshold)
            .count();
        let previous = self.reported;
        self.reported = level;
        if level > previous {
            PRESSURE_WARNINGS.get(level - 1).copied()
        } else {
            None
        }
    }
}
