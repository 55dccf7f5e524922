//! Error types for the envelope codec.
//!
//! Every decoding error is recoverable at the stream level: before returning
//! it the decoder advances the read buffer past the offending bytes, so the
//! caller drops one frame and keeps decoding.

use std::io;

use thiserror::Error;

use crate::error::ErrorKind;

/// Errors produced while encoding or decoding envelopes.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CodecError {
    /// The stream did not start with the envelope magic.
    #[error("bad frame magic; skipped {skipped} bytes")]
    BadMagic {
        /// Bytes discarded while resynchronising.
        skipped: usize,
    },
    /// The envelope version is not supported.
    #[error("unsupported protocol version: {version}")]
    UnsupportedVersion {
        /// Version found in the header.
        version: u8,
    },
    /// The message type is not recognised.
    #[error("unknown message type: {type_id}")]
    UnknownMessageType {
        /// Type identifier found in the header.
        type_id: u8,
    },
    /// The declared payload exceeds the configured maximum.
    #[error("frame exceeds max length: {size} > {max}")]
    OversizedFrame {
        /// Declared payload length.
        size: usize,
        /// Maximum accepted payload length.
        max: usize,
    },
    /// The checksum did not match the header and payload.
    #[error("frame checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch {
        /// Checksum carried by the frame.
        expected: u16,
        /// Checksum computed over the received bytes.
        actual: u16,
    },
    /// The stream ended part-way through a frame.
    #[error("truncated frame: {have} of {need} bytes received")]
    Truncated {
        /// Bytes received before the end of the stream.
        have: usize,
        /// Bytes the frame required.
        need: usize,
    },
    /// The payload does not fit the 16-bit length field.
    #[error("payload of {0} bytes cannot be framed")]
    PayloadTooLarge(usize),
    /// I/O failure surfaced through `tokio_util` framing.
    #[error("codec I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Classify this error within the crate-wide taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::PayloadTooLarge(_) => ErrorKind::Param,
            Self::Io(_) => ErrorKind::Network,
            _ => ErrorKind::Protocol,
        }
    }
}
