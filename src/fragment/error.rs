//! Error types emitted by the fragmentation layer.
//!
//! Outbound failures are caller mistakes and classify as parameter errors.
//! Inbound failures describe a peer that broke the fragment sequence; the
//! reassembler resets and the connection carries on.

use bincode::error::EncodeError;
use thiserror::Error;

use super::MessageId;
use crate::error::ErrorKind;

/// Errors produced while fragmenting outbound messages.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum FragmentationError {
    /// The message cannot be described by a 16-bit total length.
    #[error("message of {len} bytes is too large to fragment")]
    MessageTooLarge {
        /// Length of the rejected message.
        len: usize,
    },
    /// The chunk size leaves no room for a fragment body.
    #[error("fragment chunk of {0} bytes cannot hold a header and body")]
    ChunkTooSmall(usize),
    /// Header serialisation failed.
    #[error("failed to encode fragment header: {0}")]
    Encode(#[from] EncodeError),
}

impl FragmentationError {
    /// Classify this error within the crate-wide taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind { ErrorKind::Param }
}

/// Errors produced while reassembling inbound fragments.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ReassemblyError {
    /// The payload is too short to hold a fragment header.
    #[error("fragment payload of {len} bytes has no valid header")]
    MalformedHeader {
        /// Length of the payload.
        len: usize,
    },
    /// A continuation fragment arrived with no message in progress.
    #[error("fragment for message {message_id} arrived with no message in progress")]
    NoActiveMessage {
        /// Identifier carried by the fragment.
        message_id: MessageId,
    },
    /// The fragment belongs to a different message.
    #[error("fragment message mismatch: expected {expected}, found {found}")]
    MessageMismatch {
        /// Message in progress.
        expected: MessageId,
        /// Message named by the fragment.
        found: MessageId,
    },
    /// The fragment does not continue where the previous one stopped.
    #[error("fragment offset mismatch: expected {expected}, found {found}")]
    OffsetMismatch {
        /// Bytes received so far.
        expected: usize,
        /// Offset carried by the fragment.
        found: usize,
    },
    /// The accumulated length disagrees with the advertised total.
    #[error("fragment length mismatch: total {total}, received {received}")]
    LengthMismatch {
        /// Total length advertised by the message.
        total: usize,
        /// Bytes received, including the offending fragment.
        received: usize,
    },
    /// The complete message would not fit the receive buffer.
    #[error("message {message_id} of {total} bytes exceeds receive capacity {capacity}")]
    MessageTooLarge {
        /// Message in progress.
        message_id: MessageId,
        /// Total length advertised by the message.
        total: usize,
        /// Receive buffer capacity.
        capacity: usize,
    },
}

impl ReassemblyError {
    /// Classify this error within the crate-wide taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind { ErrorKind::Protocol }
}
