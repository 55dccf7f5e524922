//! Fragment header codec.
//!
//! Every fragment body is prefixed with an eight-byte header: the message
//! id, the total message length and this fragment's byte offset as
//! big-endian `u16` values, then a flags byte marking the first and last
//! fragment and one reserved byte. `bincode` writes the header with a
//! big-endian, fixed-width configuration so its size never varies.

use bincode::{
    Decode,
    Encode,
    config::{self, Config},
};
use bitflags::bitflags;

use super::{FragmentationError, MessageId, ReassemblyError};

/// Encoded size of a [`FragmentHeader`].
pub const FRAGMENT_HEADER_LEN: usize = 8;

/// Big-endian, fixed-width layout so the header is always
/// [`FRAGMENT_HEADER_LEN`] bytes.
fn wire_config() -> impl Config {
    config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

bitflags! {
    /// Position flags carried by a fragment.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct FragmentFlags: u8 {
        /// The fragment starts a message.
        const FIRST = 0x01;
        /// The fragment ends a message.
        const LAST = 0x02;
    }
}

/// Header prefixed to every fragment body.
///
/// ```text
/// message_id:16 | total_length:16 | offset:16 | flags:8 | reserved:8
/// ```
///
/// # Examples
///
/// ```
/// use peertalk::fragment::{FragmentFlags, FragmentHeader, MessageId};
///
/// let header = FragmentHeader::new(MessageId::new(7), 2000, 0, FragmentFlags::FIRST);
/// let mut buf = [0u8; 16];
/// let written = header.write_to(&mut buf).expect("room for header");
/// assert_eq!(&buf[..written], &[0, 7, 0x07, 0xd0, 0, 0, 0x01, 0]);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub struct FragmentHeader {
    message_id: MessageId,
    total_length: u16,
    offset: u16,
    flags: u8,
    reserved: u8,
}

impl FragmentHeader {
    /// Create a new fragment header.
    #[must_use]
    pub const fn new(
        message_id: MessageId,
        total_length: u16,
        offset: u16,
        flags: FragmentFlags,
    ) -> Self {
        Self {
            message_id,
            total_length,
            offset,
            flags: flags.bits(),
            reserved: 0,
        }
    }

    /// Return the logical message identifier.
    #[must_use]
    pub const fn message_id(&self) -> MessageId { self.message_id }

    /// Length of the complete message.
    #[must_use]
    pub const fn total_length(&self) -> u16 { self.total_length }

    /// Byte offset of this fragment within the message.
    #[must_use]
    pub const fn offset(&self) -> u16 { self.offset }

    /// Position flags.
    #[must_use]
    pub const fn flags(&self) -> FragmentFlags { FragmentFlags::from_bits_retain(self.flags) }

    /// Whether this fragment starts a message.
    #[must_use]
    pub const fn is_first(&self) -> bool { self.flags().contains(FragmentFlags::FIRST) }

    /// Whether this fragment ends a message.
    #[must_use]
    pub const fn is_last(&self) -> bool { self.flags().contains(FragmentFlags::LAST) }

    /// Encode into the front of `dst`, returning the bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`FragmentationError::Encode`] if `dst` is shorter than
    /// [`FRAGMENT_HEADER_LEN`].
    pub fn write_to(&self, dst: &mut [u8]) -> Result<usize, FragmentationError> {
        Ok(bincode::encode_into_slice(self, dst, wire_config())?)
    }

    /// Split a fragment payload into its header and body.
    ///
    /// # Errors
    ///
    /// Returns [`ReassemblyError::MalformedHeader`] if `payload` is too short
    /// to hold a header.
    pub fn parse(payload: &[u8]) -> Result<(Self, &[u8]), ReassemblyError> {
        let (header, body) = payload
            .split_at_checked(FRAGMENT_HEADER_LEN)
            .ok_or(ReassemblyError::MalformedHeader { len: payload.len() })?;
        let (decoded, _) = bincode::decode_from_slice::<Self, _>(header, wire_config())
            .map_err(|_| ReassemblyError::MalformedHeader { len: payload.len() })?;
        Ok((decoded, body))
    }
}
