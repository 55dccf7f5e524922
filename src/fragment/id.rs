use bincode::{Decode, Encode};
use derive_more::{Display, From, Into};

/// Identifier shared by every fragment of one logical message.
///
/// Identifiers are 16 bits on the wire and wrap around; only one message per
/// peer is reassembled at a time, so reuse after wrapping is harmless.
///
/// # Examples
///
/// ```
/// use peertalk::fragment::MessageId;
/// let id = MessageId::new(u16::MAX);
/// assert_eq!(id.next().get(), 0);
/// ```
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Encode, Decode, Display, From, Into,
)]
#[display("{_0}")]
pub struct MessageId(u16);

impl MessageId {
    /// Create a new identifier.
    #[must_use]
    pub const fn new(value: u16) -> Self { Self(value) }

    /// Return the inner numeric identifier.
    #[must_use]
    pub const fn get(self) -> u16 { self.0 }

    /// The identifier following this one, wrapping at `u16::MAX`.
    #[must_use]
    pub const fn next(self) -> Self { Self(self.0.wrapping_add(1)) }
}
