//! Outbound helper that splits large messages into slot-sized fragments.
//!
//! [`Fragmenter`] hands out wrapping [`MessageId`] values and produces a
//! borrowing [`FragmentChunks`] iterator, so splitting a message allocates
//! nothing: each [`Fragment`] refers back into the caller's payload and is
//! written straight into a queue slot.

use std::num::NonZeroUsize;

use super::{FRAGMENT_HEADER_LEN, FragmentFlags, FragmentHeader, FragmentationError, MessageId};

/// Largest fragment body that fits a `limit`-byte fragment.
///
/// Returns `None` when `limit` cannot hold a header and at least one body
/// byte.
///
/// # Examples
///
/// ```
/// use peertalk::fragment::chunk_body_len;
///
/// assert_eq!(chunk_body_len(256).map(|n| n.get()), Some(248));
/// assert_eq!(chunk_body_len(8), None);
/// ```
#[must_use]
pub fn chunk_body_len(limit: usize) -> Option<NonZeroUsize> {
    NonZeroUsize::new(limit.saturating_sub(FRAGMENT_HEADER_LEN))
}

/// Splits messages into fragments.
#[derive(Debug, Default)]
pub struct Fragmenter {
    next_message_id: MessageId,
}

impl Fragmenter {
    /// Create a fragmenter whose first message uses identifier zero.
    #[must_use]
    pub const fn new() -> Self { Self::with_starting_id(MessageId::new(0)) }

    /// Create a fragmenter starting from a specific [`MessageId`].
    #[must_use]
    pub const fn with_starting_id(start_at: MessageId) -> Self {
        Self {
            next_message_id: start_at,
        }
    }

    /// Generate and return the next [`MessageId`].
    pub fn next_message_id(&mut self) -> MessageId {
        let id = self.next_message_id;
        self.next_message_id = id.next();
        id
    }

    /// Split `payload` into fragments of at most `max_fragment` bytes,
    /// header included, under a fresh [`MessageId`].
    ///
    /// # Errors
    ///
    /// Returns [`FragmentationError::MessageTooLarge`] if `payload` exceeds
    /// `u16::MAX` bytes, or [`FragmentationError::ChunkTooSmall`] if
    /// `max_fragment` cannot hold a header and body.
    pub fn split<'a>(
        &mut self,
        payload: &'a [u8],
        max_fragment: usize,
    ) -> Result<FragmentChunks<'a>, FragmentationError> {
        let total = u16::try_from(payload.len())
            .map_err(|_| FragmentationError::MessageTooLarge { len: payload.len() })?;
        let body =
            chunk_body_len(max_fragment).ok_or(FragmentationError::ChunkTooSmall(max_fragment))?;
        Ok(FragmentChunks {
            message_id: self.next_message_id(),
            payload,
            total,
            body,
            offset: 0,
            done: false,
        })
    }
}

/// Number of fragments needed for `len` bytes with `max_fragment`-byte
/// fragments.
#[must_use]
pub fn fragment_count(len: usize, max_fragment: usize) -> Option<usize> {
    chunk_body_len(max_fragment).map(|body| len.div_ceil(body.get()).max(1))
}

/// One outbound fragment borrowing its body from the original payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fragment<'a> {
    header: FragmentHeader,
    body: &'a [u8],
}

impl<'a> Fragment<'a> {
    /// Return the fragment header.
    #[must_use]
    pub const fn header(&self) -> &FragmentHeader { &self.header }

    /// Return the fragment body.
    #[must_use]
    pub const fn body(&self) -> &'a [u8] { self.body }

    /// Bytes needed to encode the fragment.
    #[must_use]
    pub const fn encoded_len(&self) -> usize { FRAGMENT_HEADER_LEN + self.body.len() }

    /// Write header and body into the front of `dst`, returning the bytes
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`FragmentationError::Encode`] if `dst` is too short.
    pub fn write_to(&self, dst: &mut [u8]) -> Result<usize, FragmentationError> {
        let end = self.encoded_len();
        let header_len = self.header.write_to(dst)?;
        let dst_len = dst.len();
        let body = dst
            .get_mut(header_len..end)
            .ok_or(FragmentationError::ChunkTooSmall(dst_len))?;
        body.copy_from_slice(self.body);
        Ok(end)
    }
}

/// Iterator over the fragments of one message.
#[derive(Clone, Debug)]
pub struct FragmentChunks<'a> {
    message_id: MessageId,
    payload: &'a [u8],
    total: u16,
    body: NonZeroUsize,
    offset: usize,
    done: bool,
}

impl FragmentChunks<'_> {
    /// Identifier shared by the fragments.
    #[must_use]
    pub const fn message_id(&self) -> MessageId { self.message_id }
}

impl<'a> Iterator for FragmentChunks<'a> {
    type Item = Fragment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let start = self.offset;
        let end = start.saturating_add(self.body.get()).min(self.payload.len());
        let mut flags = FragmentFlags::empty();
        if start == 0 {
            flags = flags | FragmentFlags::FIRST;
        }
        if end == self.payload.len() {
            flags = flags | FragmentFlags::LAST;
            self.done = true;
        }
        self.offset = end;
        // `start` never exceeds the payload length, which fits in `u16`.
        let offset = u16::try_from(start).unwrap_or(u16::MAX);
        Some(Fragment {
            header: FragmentHeader::new(self.message_id, self.total, offset, flags),
            body: &self.payload[start..end],
        })
    }
}
