//! Canonical error and result types for the crate.
//!
//! Each component reports its own `thiserror` enum. [`Error`] wraps them for
//! callers that drive a whole [`Session`](crate::session::Session), and every
//! error classifies itself into an [`ErrorKind`] so callers can tell expected
//! flow-control outcomes from bugs and corrupt input.

use std::io;

use thiserror::Error;

use crate::{
    batch::BatchError,
    capability::CapabilityError,
    direct::DirectError,
    flow::FlowError,
    fragment::{FragmentationError, ReassemblyError},
    frame::CodecError,
    session::{ConfigError, PeerId},
};

/// Broad classification of a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid size, capacity or argument; a caller bug.
    Param,
    /// Full or would block; expected, recoverable and not a failure.
    Capacity,
    /// Malformed or inconsistent input from the peer; the message is dropped
    /// and the connection kept.
    Protocol,
    /// Allocation failed while constructing a component.
    Resource,
    /// The operation is invalid in the current state.
    State,
    /// The transport reported a network failure.
    Network,
}

impl ErrorKind {
    /// Whether the condition is expected back-pressure rather than a fault.
    #[must_use]
    pub const fn is_recoverable(self) -> bool { matches!(self, Self::Capacity) }
}

/// Top-level error type exposed by `peertalk`.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// Tier-1 queue failure.
    #[error(transparent)]
    Queue(#[from] crate::queue::QueueError),
    /// Tier-2 direct buffer failure.
    #[error(transparent)]
    Direct(#[from] DirectError),
    /// Batch assembly failure.
    #[error(transparent)]
    Batch(#[from] BatchError),
    /// Flow control rejected the message.
    #[error(transparent)]
    Flow(#[from] FlowError),
    /// Capability payload failure.
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    /// Outbound fragmentation failure.
    #[error(transparent)]
    Fragmentation(#[from] FragmentationError),
    /// Inbound reassembly failure.
    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),
    /// Envelope decoding failure.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Invalid session configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The payload exceeds the locally configured maximum message size.
    #[error("message of {size} bytes exceeds local limit {limit}")]
    MessageTooLarge {
        /// Length of the rejected payload.
        size: usize,
        /// Local maximum message size.
        limit: usize,
    },
    /// Critical sends kept failing for lack of capacity.
    #[error("peer {peer} unresponsive after {failures} rejected critical sends")]
    PeerUnresponsive {
        /// Peer the session talks to.
        peer: PeerId,
        /// Consecutive rejected critical sends.
        failures: u32,
    },
    /// The session has been closed by either side.
    #[error("session closed")]
    Closed,
    /// The transport failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Queue(err) => err.kind(),
            Self::Direct(err) => err.kind(),
            Self::Batch(err) => err.kind(),
            Self::Flow(_) | Self::PeerUnresponsive { .. } => ErrorKind::Capacity,
            Self::Capability(_) | Self::Reassembly(_) => ErrorKind::Protocol,
            Self::Codec(err) => err.kind(),
            Self::Fragmentation(err) => err.kind(),
            Self::Config(_) | Self::MessageTooLarge { .. } => ErrorKind::Param,
            Self::Closed => ErrorKind::State,
            Self::Io(_) => ErrorKind::Network,
        }
    }

    /// Whether the error is back-pressure the caller may retry after a poll.
    #[must_use]
    pub fn is_would_block(&self) -> bool {
        matches!(self.kind(), ErrorKind::Capacity) && !matches!(self, Self::PeerUnresponsive { .. })
    }
}

/// Canonical result alias used by `peertalk` public APIs.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{Error, ErrorKind};
    use crate::{direct::DirectError, queue::QueueError, session::PeerId};

    #[rstest]
    #[case(Error::from(QueueError::Full { capacity: 4 }), ErrorKind::Capacity, true)]
    #[case(Error::from(QueueError::InvalidCapacity(3)), ErrorKind::Param, false)]
    #[case(Error::from(DirectError::WouldBlock), ErrorKind::Capacity, true)]
    #[case(
        Error::PeerUnresponsive { peer: PeerId::new(1), failures: 8 },
        ErrorKind::Capacity,
        false
    )]
    #[case(Error::Closed, ErrorKind::State, false)]
    fn errors_classify(
        #[case] error: Error,
        #[case] kind: ErrorKind,
        #[case] would_block: bool,
    ) {
        assert_eq!(error.kind(), kind);
        assert_eq!(error.is_would_block(), would_block);
    }

    #[test]
    fn display_is_transparent_for_components() {
        let error = Error::from(QueueError::Full { capacity: 8 });
        assert_eq!(error.to_string(), "queue full at capacity 8");
    }
}
