//! Batch assembly for Tier-1 messages.
//!
//! A batch packs several small messages into one frame payload as repeated
//! `[length:16][reserved:16][payload]` entries. The outbound [`Batch`] is
//! allocated once per session and reused; [`BatchEntries`] walks a received
//! batch payload without copying.

use thiserror::Error;

use crate::{
    byte_order::{read_network_u16_at, write_network_u16},
    error::ErrorKind,
    queue::SLOT_SIZE,
};

/// Largest batch payload, sized to fit one Ethernet MTU.
pub const BATCH_MAX: usize = 1400;
/// Bytes of framing in front of each entry.
pub const BATCH_ENTRY_HEADER: usize = 4;

static_assertions::const_assert!(BATCH_MAX >= SLOT_SIZE + BATCH_ENTRY_HEADER);

/// Errors produced while building or reading batches.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    /// The entry would not fit in the remaining space.
    #[error("batch entry needs {needed} bytes but only {available} remain")]
    Overflow {
        /// Framed size of the rejected entry.
        needed: usize,
        /// Space left in the batch.
        available: usize,
    },
    /// The requested limit is outside the supported range.
    #[error(
        "invalid batch limit {0}; must be between {min} and {max}",
        min = SLOT_SIZE + BATCH_ENTRY_HEADER,
        max = BATCH_MAX
    )]
    InvalidLimit(usize),
    /// A received batch entry header claims more bytes than remain.
    #[error("malformed batch entry at offset {offset}")]
    Malformed {
        /// Offset of the bad entry header.
        offset: usize,
    },
}

impl BatchError {
    /// Classify this error within the crate-wide taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Overflow { .. } => ErrorKind::Capacity,
            Self::InvalidLimit(_) => ErrorKind::Param,
            Self::Malformed { .. } => ErrorKind::Protocol,
        }
    }
}

/// Outbound batch under construction.
///
/// # Examples
///
/// ```
/// use peertalk::batch::{Batch, BatchEntries};
///
/// let mut batch = Batch::new();
/// batch.add(b"alpha").expect("fits");
/// batch.add(b"beta").expect("fits");
///
/// let entries: Vec<_> = BatchEntries::new(batch.as_bytes())
///     .collect::<Result<_, _>>()
///     .expect("well formed");
/// assert_eq!(entries, vec![&b"alpha"[..], &b"beta"[..]]);
/// ```
#[derive(Debug)]
pub struct Batch {
    buffer: Box<[u8]>,
    used: usize,
    count: usize,
}

impl Default for Batch {
    fn default() -> Self { Self::new() }
}

impl Batch {
    /// Create an empty batch of [`BATCH_MAX`] bytes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: vec![0; BATCH_MAX].into_boxed_slice(),
            used: 0,
            count: 0,
        }
    }

    /// Create an empty batch limited to `limit` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidLimit`] unless a full slot fits and the
    /// limit does not exceed [`BATCH_MAX`].
    pub fn with_limit(limit: usize) -> Result<Self, BatchError> {
        if !(SLOT_SIZE + BATCH_ENTRY_HEADER..=BATCH_MAX).contains(&limit) {
            return Err(BatchError::InvalidLimit(limit));
        }
        Ok(Self {
            buffer: vec![0; limit].into_boxed_slice(),
            used: 0,
            count: 0,
        })
    }

    /// Empty the batch for reuse.
    pub fn reset(&mut self) {
        self.used = 0;
        self.count = 0;
    }

    /// Append one framed entry.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Overflow`] if the framed entry does not fit. The
    /// batch is unchanged on error.
    pub fn add(&mut self, data: &[u8]) -> Result<(), BatchError> {
        let available = self.remaining();
        let needed = data.len().saturating_add(BATCH_ENTRY_HEADER);
        let len = u16::try_from(data.len()).ok().filter(|_| needed <= available);
        let Some(len) = len else {
            return Err(BatchError::Overflow { needed, available });
        };

        let start = self.used;
        let body = start + BATCH_ENTRY_HEADER;
        self.buffer[start..start + 2].copy_from_slice(&write_network_u16(len));
        self.buffer[start + 2..body].fill(0);
        self.buffer[body..body + data.len()].copy_from_slice(data);
        self.used += needed;
        self.count += 1;
        Ok(())
    }

    /// Encoded batch payload.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.buffer[..self.used] }

    /// Number of entries.
    #[must_use]
    pub const fn len(&self) -> usize { self.count }

    /// Whether the batch has no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool { self.count == 0 }

    /// Bytes used, including entry headers.
    #[must_use]
    pub const fn used(&self) -> usize { self.used }

    /// Bytes still available, including room for entry headers.
    #[must_use]
    pub fn remaining(&self) -> usize { self.buffer.len() - self.used }

    /// Maximum encoded size.
    #[must_use]
    pub fn limit(&self) -> usize { self.buffer.len() }
}

/// Iterator over the entries of a received batch payload.
///
/// Yields [`BatchError::Malformed`] once and then stops if an entry header is
/// truncated or claims more bytes than remain.
#[derive(Clone, Debug)]
pub struct BatchEntries<'a> {
    payload: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> BatchEntries<'a> {
    /// Walk the entries of `payload`.
    #[must_use]
    pub const fn new(payload: &'a [u8]) -> Self {
        Self {
            payload,
            offset: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for BatchEntries<'a> {
    type Item = Result<&'a [u8], BatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.payload.len() {
            return None;
        }
        let offset = self.offset;
        let entry = read_network_u16_at(self.payload, offset).and_then(|len| {
            let start = offset + BATCH_ENTRY_HEADER;
            self.payload.get(start..start + usize::from(len))
        });
        if let Some(entry) = entry {
            self.offset = offset + BATCH_ENTRY_HEADER + entry.len();
            Some(Ok(entry))
        } else {
            self.failed = true;
            Some(Err(BatchError::Malformed { offset }))
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{BATCH_ENTRY_HEADER, BATCH_MAX, Batch, BatchEntries, BatchError};
    use crate::queue::SLOT_SIZE;

    #[test]
    fn entries_use_big_endian_length_and_reserved_bytes() {
        let mut batch = Batch::new();
        batch.add(&[0xaa; 3]).expect("fits");
        assert_eq!(batch.as_bytes(), &[0x00, 0x03, 0x00, 0x00, 0xaa, 0xaa, 0xaa]);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.used(), 7);
    }

    #[test]
    fn overflowing_entry_leaves_batch_unchanged() {
        let mut batch = Batch::new();
        let entry = [1u8; SLOT_SIZE];
        let per_entry = SLOT_SIZE + BATCH_ENTRY_HEADER;
        let fits = BATCH_MAX / per_entry;
        for _ in 0..fits {
            batch.add(&entry).expect("fits");
        }
        let (count, used) = (batch.len(), batch.used());

        let err = batch.add(&entry).expect_err("must overflow");
        assert_eq!(
            err,
            BatchError::Overflow {
                needed: per_entry,
                available: BATCH_MAX - used
            }
        );
        assert_eq!((batch.len(), batch.used()), (count, used));

        batch.add(&[2u8; 10]).expect("smaller entry still fits");
    }

    #[test]
    fn reset_empties_batch() {
        let mut batch = Batch::new();
        batch.add(b"one").expect("fits");
        batch.reset();
        assert!(batch.is_empty());
        assert!(batch.as_bytes().is_empty());
        assert_eq!(batch.remaining(), BATCH_MAX);
    }

    #[rstest]
    #[case(SLOT_SIZE)]
    #[case(BATCH_MAX + 1)]
    fn rejects_invalid_limits(#[case] limit: usize) {
        assert_eq!(
            Batch::with_limit(limit).map(|_| ()),
            Err(BatchError::InvalidLimit(limit))
        );
    }

    #[rstest]
    #[case(&[0x00][..], 0)]
    #[case(&[0x00, 0x05, 0x00, 0x00, 0x01][..], 0)]
    #[case(&[0x00, 0x01, 0x00, 0x00, 0x07, 0x00, 0x09, 0x00, 0x00][..], 5)]
    fn malformed_entries_are_reported(#[case] payload: &[u8], #[case] offset: usize) {
        let results: Vec<_> = BatchEntries::new(payload).collect();
        assert_eq!(results.last(), Some(&Err(BatchError::Malformed { offset })));
    }

    #[test]
    fn empty_entries_round_trip() {
        let mut batch = Batch::new();
        batch.add(b"").expect("fits");
        batch.add(b"x").expect("fits");
        let entries: Vec<_> = BatchEntries::new(batch.as_bytes())
            .collect::<Result<_, _>>()
            .expect("well formed");
        assert_eq!(entries, vec![&b""[..], &b"x"[..]]);
    }
}
