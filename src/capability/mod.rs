//! Capability negotiation between peers.
//!
//! Right after connecting, each side advertises its message-size limits and
//! buffer pressure. The [`CapabilityNegotiator`] keeps the local view and the
//! last values heard from the peer, derives the effective per-peer ceiling
//! and decides when the local pressure has moved far enough to advertise
//! again.

mod tlv;

use bitflags::bitflags;
use bytes::BytesMut;
use thiserror::Error;
use tracing::{debug, info};

pub use self::tlv::CAPABILITY_PAYLOAD_LEN;
use crate::error::ErrorKind;

/// Smallest message size a peer may advertise.
pub const MIN_MESSAGE_SIZE: u16 = 256;
/// Largest message size a peer may advertise.
pub const MAX_MESSAGE_SIZE: u16 = 8192;
/// Chunk size preferred when a peer does not say otherwise.
pub const DEFAULT_PREFERRED_CHUNK: u16 = 1024;
/// Pressure percentages whose crossing triggers a new advertisement.
pub const PRESSURE_THRESHOLDS: [u8; 4] = [25, 50, 75, 90];

bitflags! {
    /// Feature bits advertised during negotiation. Unknown bits from newer
    /// peers are retained.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CapabilityFlags: u16 {
        /// The peer reassembles fragmented messages.
        const FRAGMENTATION = 0x0001;
    }
}

/// Errors produced while decoding capability payloads.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    /// A field header or value runs past the end of the payload.
    #[error("capability payload truncated at offset {offset}")]
    Truncated {
        /// Offset of the incomplete field.
        offset: usize,
    },
    /// A known field carries a value of the wrong width.
    #[error("capability field {tag} has invalid length {len}")]
    BadLength {
        /// Field tag.
        tag: u8,
        /// Length found on the wire.
        len: usize,
    },
}

impl CapabilityError {
    /// Classify this error within the crate-wide taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind { ErrorKind::Protocol }
}

/// Capability fields as carried on the wire.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use peertalk::capability::{CapabilityFlags, CapabilityMessage};
///
/// let message = CapabilityMessage {
///     max_message_size: 512,
///     preferred_chunk: 256,
///     flags: CapabilityFlags::FRAGMENTATION,
///     buffer_pressure: 30,
/// };
/// let mut buf = BytesMut::new();
/// message.encode(&mut buf);
/// assert_eq!(CapabilityMessage::decode(&buf), Ok(message));
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CapabilityMessage {
    /// Largest message the sender accepts, in bytes.
    pub max_message_size: u16,
    /// Fragment size the sender prefers, in bytes.
    pub preferred_chunk: u16,
    /// Feature bits.
    pub flags: CapabilityFlags,
    /// Sender's buffer occupancy, 0 to 100.
    pub buffer_pressure: u8,
}

impl CapabilityMessage {
    /// Append the TLV encoding to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) { tlv::encode(self, dst); }

    /// Parse a TLV payload. Absent fields keep their defaults and unknown
    /// tags are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError`] if a field is truncated or a known field
    /// has the wrong width.
    pub fn decode(payload: &[u8]) -> Result<Self, CapabilityError> { tlv::decode(payload) }
}

/// Limits and pressure last reported by the remote peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerCapabilities {
    max_message_size: u16,
    preferred_chunk: u16,
    flags: CapabilityFlags,
    buffer_pressure: u8,
    exchanged: bool,
}

impl Default for PeerCapabilities {
    fn default() -> Self {
        Self {
            max_message_size: 0,
            preferred_chunk: DEFAULT_PREFERRED_CHUNK,
            flags: CapabilityFlags::empty(),
            buffer_pressure: 0,
            exchanged: false,
        }
    }
}

impl PeerCapabilities {
    /// Build from a received message, clamping out-of-range values.
    #[must_use]
    pub fn from_message(message: CapabilityMessage) -> Self {
        let preferred_chunk = if message.preferred_chunk == 0 {
            DEFAULT_PREFERRED_CHUNK
        } else {
            message.preferred_chunk
        };
        Self {
            max_message_size: message
                .max_message_size
                .clamp(MIN_MESSAGE_SIZE, MAX_MESSAGE_SIZE),
            preferred_chunk,
            flags: message.flags,
            buffer_pressure: message.buffer_pressure.min(100),
            exchanged: true,
        }
    }

    /// Largest message the peer accepts; zero until capabilities arrive.
    #[must_use]
    pub const fn max_message_size(&self) -> u16 { self.max_message_size }

    /// Fragment size the peer prefers.
    #[must_use]
    pub const fn preferred_chunk(&self) -> u16 { self.preferred_chunk }

    /// Feature bits the peer advertised.
    #[must_use]
    pub const fn flags(&self) -> CapabilityFlags { self.flags }

    /// Peer's reported buffer occupancy, 0 to 100.
    #[must_use]
    pub const fn buffer_pressure(&self) -> u8 { self.buffer_pressure }

    /// Whether the peer has sent its capabilities.
    #[must_use]
    pub const fn exchanged(&self) -> bool { self.exchanged }

    /// Whether the peer can reassemble fragments. Assumed until the peer
    /// says otherwise.
    #[must_use]
    pub const fn accepts_fragments(&self) -> bool {
        !self.exchanged || self.flags.contains(CapabilityFlags::FRAGMENTATION)
    }
}

/// Limits this side advertises.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalCapabilities {
    /// Largest message accepted locally.
    pub max_message_size: u16,
    /// Preferred fragment size.
    pub preferred_chunk: u16,
    /// Feature bits.
    pub flags: CapabilityFlags,
}

impl Default for LocalCapabilities {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            preferred_chunk: DEFAULT_PREFERRED_CHUNK,
            flags: CapabilityFlags::FRAGMENTATION,
        }
    }
}

/// Index of the pressure band containing `pressure`.
///
/// # Examples
///
/// ```
/// use peertalk::capability::pressure_band;
///
/// assert_eq!(pressure_band(0), 0);
/// assert_eq!(pressure_band(25), 1);
/// assert_eq!(pressure_band(89), 3);
/// assert_eq!(pressure_band(100), 4);
/// ```
#[must_use]
pub fn pressure_band(pressure: u8) -> usize {
    PRESSURE_THRESHOLDS
        .iter()
        .take_while(|&&threshold| pressure >= threshold)
        .count()
}

/// Combine send and receive occupancy into the value advertised to peers.
///
/// The worse-constrained direction wins.
#[must_use]
pub fn reported_pressure(send_pressure: u8, recv_pressure: u8) -> u8 {
    send_pressure.max(recv_pressure).min(100)
}

/// Per-peer negotiation state.
#[derive(Clone, Debug)]
pub struct CapabilityNegotiator {
    local: LocalCapabilities,
    peer: PeerCapabilities,
    announced_band: Option<usize>,
}

impl CapabilityNegotiator {
    /// Start negotiating with the given local limits.
    #[must_use]
    pub fn new(local: LocalCapabilities) -> Self {
        Self {
            local,
            peer: PeerCapabilities::default(),
            announced_band: None,
        }
    }

    /// Local limits.
    #[must_use]
    pub const fn local(&self) -> &LocalCapabilities { &self.local }

    /// Limits last reported by the peer.
    #[must_use]
    pub const fn peer(&self) -> &PeerCapabilities { &self.peer }

    /// Record a capability message from the peer.
    pub fn apply(&mut self, message: CapabilityMessage) {
        let first = !self.peer.exchanged;
        self.peer = PeerCapabilities::from_message(message);
        if first {
            info!(
                peer_max = self.peer.max_message_size,
                effective_max = self.effective_max_message_size(),
                preferred_chunk = self.peer.preferred_chunk,
                "capabilities exchanged"
            );
        } else {
            debug!(pressure = self.peer.buffer_pressure, "peer capabilities updated");
        }
    }

    /// Ceiling for a single unfragmented message to this peer.
    ///
    /// Falls back to the local limit while the peer's limit is unknown.
    #[must_use]
    pub fn effective_max_message_size(&self) -> u16 {
        match self.peer.max_message_size {
            0 => self.local.max_message_size,
            peer => self.local.max_message_size.min(peer),
        }
    }

    /// Upper bound on a fragment, before transport limits are applied.
    #[must_use]
    pub fn effective_chunk(&self) -> u16 {
        self.local
            .preferred_chunk
            .min(self.peer.preferred_chunk)
            .min(self.effective_max_message_size())
    }

    /// Build the advertisement for `pressure`.
    #[must_use]
    pub fn local_message(&self, pressure: u8) -> CapabilityMessage {
        CapabilityMessage {
            max_message_size: self.local.max_message_size,
            preferred_chunk: self.local.preferred_chunk,
            flags: self.local.flags,
            buffer_pressure: pressure.min(100),
        }
    }

    /// Whether `pressure` lies in a different band from the last
    /// advertisement, or nothing has been advertised yet.
    #[must_use]
    pub fn needs_announce(&self, pressure: u8) -> bool {
        self.announced_band != Some(pressure_band(pressure))
    }

    /// Record that an advertisement for `pressure` was sent.
    pub fn mark_announced(&mut self, pressure: u8) {
        self.announced_band = Some(pressure_band(pressure));
    }
}
