//! Wire envelope shared by data and control frames.
//!
//! Every frame on the byte stream has the layout
//!
//! ```text
//! "PTMG" | version:8 | type:8 | flags:8 | sequence:8 | payload_len:16 | payload | crc16:16
//! ```
//!
//! with multi-byte fields in network byte order and the CRC-16 computed over
//! the header and payload. [`EnvelopeCodec`] implements the
//! `tokio_util::codec` traits for this layout.

mod checksum;
mod codec;
mod error;

use bitflags::bitflags;
use bytes::Bytes;
pub use checksum::{crc16, crc16_update};
pub use codec::{EnvelopeCodec, encode_frame};
pub use error::CodecError;

/// Magic prefix of every frame.
pub const MAGIC: [u8; 4] = *b"PTMG";
/// Envelope version produced and accepted.
pub const PROTOCOL_VERSION: u8 = 1;
/// Bytes before the payload.
pub const HEADER_LEN: usize = 10;
/// Bytes after the payload.
pub const CHECKSUM_LEN: usize = 2;
/// Total framing overhead per frame.
pub const FRAME_OVERHEAD: usize = HEADER_LEN + CHECKSUM_LEN;

/// Envelope message type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Application payload, possibly batched or fragmented.
    Data = 1,
    /// Liveness probe.
    Ping = 2,
    /// Reply to a [`MessageType::Ping`].
    Pong = 3,
    /// Orderly shutdown notice.
    Disconnect = 4,
    /// Acknowledgement.
    Ack = 5,
    /// Refusal of a request.
    Reject = 6,
    /// Capability exchange.
    Capability = 7,
}

impl MessageType {
    /// Wire identifier.
    #[must_use]
    pub const fn as_u8(self) -> u8 { self as u8 }

    /// Decode a wire identifier.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Data,
            2 => Self::Ping,
            3 => Self::Pong,
            4 => Self::Disconnect,
            5 => Self::Ack,
            6 => Self::Reject,
            7 => Self::Capability,
            _ => return None,
        })
    }
}

bitflags! {
    /// Envelope flag bits.
    ///
    /// # Examples
    ///
    /// ```
    /// use peertalk::frame::MessageFlags;
    ///
    /// let flags = MessageFlags::BATCH | MessageFlags::NO_DELAY;
    /// assert!(flags.contains(MessageFlags::BATCH));
    /// assert!(!flags.contains(MessageFlags::FRAGMENT));
    /// ```
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MessageFlags: u8 {
        /// Delivery may be skipped under pressure.
        const UNRELIABLE = 0x01;
        /// The message was coalesced by key.
        const COALESCABLE = 0x02;
        /// Send without waiting to fill a batch.
        const NO_DELAY = 0x04;
        /// The payload is a batch of entries.
        const BATCH = 0x08;
        /// The payload is one fragment of a larger message.
        const FRAGMENT = 0x10;
    }
}

/// Decoded envelope header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Message type.
    pub kind: MessageType,
    /// Flag bits.
    pub flags: MessageFlags,
    /// Sender's sequence number.
    pub sequence: u8,
}

impl EnvelopeHeader {
    /// Header for a frame of `kind` with no flags and sequence zero.
    #[must_use]
    pub const fn new(kind: MessageType) -> Self {
        Self {
            kind,
            flags: MessageFlags::empty(),
            sequence: 0,
        }
    }

    /// Replace the flag bits.
    #[must_use]
    pub const fn with_flags(mut self, flags: MessageFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Replace the sequence number.
    #[must_use]
    pub const fn with_sequence(mut self, sequence: u8) -> Self {
        self.sequence = sequence;
        self
    }
}

/// A decoded frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Header fields.
    pub header: EnvelopeHeader,
    /// Payload bytes, shared with the read buffer.
    pub payload: Bytes,
}

impl Envelope {
    /// Build an envelope.
    #[must_use]
    pub fn new(header: EnvelopeHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }
}

#[cfg(test)]
mod tests;
