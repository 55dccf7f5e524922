//! Inbound helper that stitches fragments back into complete messages.
//!
//! [`Reassembler`] tracks at most one message per peer. Fragment bodies are
//! appended to the peer's [`ReceiveBuffer`], so reassembly owns no memory of
//! its own. Any sequencing violation discards the partial message and resets
//! the state; the caller drops the offending fragment and keeps the
//! connection. A partial message older than the configured timeout is
//! evicted on the next call.

use std::time::{Duration, Instant};

use tracing::debug;

use super::{FragmentHeader, MessageId, ReassemblyError};
use crate::direct::ReceiveBuffer;

/// Default time a partial message may wait for its remaining fragments.
pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Progress of the message being reassembled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReassemblyState {
    message_id: MessageId,
    total_length: usize,
    received_length: usize,
    started_at: Instant,
}

impl ReassemblyState {
    /// Message being reassembled.
    #[must_use]
    pub const fn message_id(&self) -> MessageId { self.message_id }

    /// Advertised length of the complete message.
    #[must_use]
    pub const fn total_length(&self) -> usize { self.total_length }

    /// Bytes received so far.
    #[must_use]
    pub const fn received_length(&self) -> usize { self.received_length }
}

/// Single-slot fragment reassembler with timeout-based eviction.
#[derive(Debug)]
pub struct Reassembler {
    timeout: Duration,
    state: Option<ReassemblyState>,
}

impl Default for Reassembler {
    fn default() -> Self { Self::new(DEFAULT_REASSEMBLY_TIMEOUT) }
}

impl Reassembler {
    /// Create a reassembler that evicts partial messages after `timeout`.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: None,
        }
    }

    /// The message in progress, if any.
    #[must_use]
    pub const fn state(&self) -> Option<&ReassemblyState> { self.state.as_ref() }

    /// Whether a message is in progress.
    #[must_use]
    pub const fn is_active(&self) -> bool { self.state.is_some() }

    /// Process a fragment using the current time.
    ///
    /// # Errors
    ///
    /// See [`Reassembler::push_at`].
    pub fn push<'b>(
        &mut self,
        header: FragmentHeader,
        body: &[u8],
        buffer: &'b mut ReceiveBuffer,
    ) -> Result<Option<&'b [u8]>, ReassemblyError> {
        self.push_at(header, body, buffer, Instant::now())
    }

    /// Process a fragment using an explicit clock reading.
    ///
    /// Returns the complete message, borrowed from `buffer`, when `header`
    /// is the last fragment and the accumulated length matches. A first
    /// fragment aborts any message in progress and starts a new one.
    ///
    /// # Errors
    ///
    /// Returns [`ReassemblyError`] on a sequencing violation or when the
    /// message cannot fit `buffer`. The partial message is discarded.
    pub fn push_at<'b>(
        &mut self,
        header: FragmentHeader,
        body: &[u8],
        buffer: &'b mut ReceiveBuffer,
        now: Instant,
    ) -> Result<Option<&'b [u8]>, ReassemblyError> {
        self.purge_expired_at(now);

        let result = self.accept(header, body, buffer, now);
        if result.is_err() {
            self.reset(buffer);
        }
        let complete = result?;
        if complete {
            self.state = None;
            Ok(Some(buffer.as_slice()))
        } else {
            Ok(None)
        }
    }

    fn accept(
        &mut self,
        header: FragmentHeader,
        body: &[u8],
        buffer: &mut ReceiveBuffer,
        now: Instant,
    ) -> Result<bool, ReassemblyError> {
        let message_id = header.message_id();
        let total = usize::from(header.total_length());
        let offset = usize::from(header.offset());

        if header.is_first() {
            if let Some(previous) = self.state.take() {
                debug!(
                    aborted = %previous.message_id,
                    replacement = %message_id,
                    "new fragmented message replaces one in progress"
                );
            }
            buffer.clear();
            if total > buffer.capacity() {
                return Err(ReassemblyError::MessageTooLarge {
                    message_id,
                    total,
                    capacity: buffer.capacity(),
                });
            }
            self.state = Some(ReassemblyState {
                message_id,
                total_length: total,
                received_length: 0,
                started_at: now,
            });
        }

        let state = self
            .state
            .as_mut()
            .ok_or(ReassemblyError::NoActiveMessage { message_id })?;
        if state.message_id != message_id {
            return Err(ReassemblyError::MessageMismatch {
                expected: state.message_id,
                found: message_id,
            });
        }
        if offset != state.received_length {
            return Err(ReassemblyError::OffsetMismatch {
                expected: state.received_length,
                found: offset,
            });
        }
        let received = state.received_length + body.len();
        if total != state.total_length || received > state.total_length {
            return Err(ReassemblyError::LengthMismatch {
                total: state.total_length,
                received,
            });
        }
        buffer
            .append(body)
            .map_err(|_| ReassemblyError::MessageTooLarge {
                message_id,
                total,
                capacity: buffer.capacity(),
            })?;
        state.received_length = received;

        if !header.is_last() {
            return Ok(false);
        }
        if received == state.total_length {
            Ok(true)
        } else {
            Err(ReassemblyError::LengthMismatch {
                total: state.total_length,
                received,
            })
        }
    }

    fn reset(&mut self, buffer: &mut ReceiveBuffer) {
        self.state = None;
        buffer.clear();
    }

    /// Evict the partial message if it exceeded the timeout.
    ///
    /// Returns the identifier of the evicted message.
    pub fn purge_expired(&mut self) -> Option<MessageId> { self.purge_expired_at(Instant::now()) }

    /// Evict the partial message if it exceeded the timeout, using an
    /// explicit clock reading.
    ///
    /// Returns the identifier of the evicted message.
    pub fn purge_expired_at(&mut self, now: Instant) -> Option<MessageId> {
        let state = self.state?;
        if now.saturating_duration_since(state.started_at) < self.timeout {
            return None;
        }
        debug!(
            message_id = %state.message_id,
            received = state.received_length,
            total = state.total_length,
            "partial message expired"
        );
        self.state = None;
        Some(state.message_id)
    }
}
