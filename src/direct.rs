//! Tier-2 single-slot buffers for large messages.
//!
//! Each peer owns one [`DirectBuffer`] for outbound and one [`ReceiveBuffer`]
//! for inbound traffic. The outbound buffer holds at most one message at a
//! time; a second [`DirectBuffer::queue`] before [`DirectBuffer::complete`]
//! reports [`DirectError::WouldBlock`], which is the back-pressure signal for
//! large messages.

use thiserror::Error;

use crate::{error::ErrorKind, frame::MessageFlags, priority::Priority};

/// Default direct buffer size in bytes.
pub const DIRECT_DEFAULT_CAPACITY: usize = 4096;
/// Smallest permitted direct buffer.
pub const DIRECT_MIN_CAPACITY: usize = 256;
/// Largest permitted direct buffer.
pub const DIRECT_MAX_CAPACITY: usize = 8192;

/// Transfer state of an outbound [`DirectBuffer`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DirectState {
    /// Empty and ready to accept a message.
    #[default]
    Idle,
    /// Holding a message that has not been handed to the transport.
    Queued,
    /// The transport is writing the message.
    Sending,
}

/// Errors produced by direct buffers.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum DirectError {
    /// The buffer already holds a message.
    #[error("direct buffer busy")]
    WouldBlock,
    /// The payload exceeds the buffer capacity.
    #[error("payload of {len} bytes exceeds direct buffer capacity {capacity}")]
    TooLarge {
        /// Length of the rejected payload.
        len: usize,
        /// Capacity of the buffer.
        capacity: usize,
    },
    /// The requested capacity is outside the supported range.
    #[error(
        "invalid direct buffer capacity {0}; must be between {min} and {max}",
        min = DIRECT_MIN_CAPACITY,
        max = DIRECT_MAX_CAPACITY
    )]
    InvalidCapacity(usize),
    /// The buffer storage could not be allocated.
    #[error("failed to allocate {0} byte direct buffer")]
    Allocation(usize),
    /// The transition is not valid from the current state.
    #[error("invalid direct buffer transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// State the buffer was in.
        from: DirectState,
        /// State that was requested.
        to: DirectState,
    },
}

impl DirectError {
    /// Classify this error within the crate-wide taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::WouldBlock => ErrorKind::Capacity,
            Self::TooLarge { .. } | Self::InvalidCapacity(_) => ErrorKind::Param,
            Self::Allocation(_) => ErrorKind::Resource,
            Self::InvalidTransition { .. } => ErrorKind::State,
        }
    }
}

fn allocate(capacity: usize) -> Result<Box<[u8]>, DirectError> {
    if !(DIRECT_MIN_CAPACITY..=DIRECT_MAX_CAPACITY).contains(&capacity) {
        return Err(DirectError::InvalidCapacity(capacity));
    }
    let mut data = Vec::new();
    data.try_reserve_exact(capacity)
        .map_err(|_| DirectError::Allocation(capacity))?;
    data.resize(capacity, 0);
    Ok(data.into_boxed_slice())
}

/// Outbound single-message buffer.
///
/// # Examples
///
/// ```
/// use peertalk::{
///     Priority,
///     direct::{DirectBuffer, DirectError, DirectState},
///     frame::MessageFlags,
/// };
///
/// let mut buffer = DirectBuffer::with_capacity(1024).expect("valid capacity");
/// buffer
///     .queue(&[7; 600], Priority::Normal, MessageFlags::empty())
///     .expect("idle buffer accepts");
/// assert_eq!(
///     buffer.queue(&[8; 10], Priority::Normal, MessageFlags::empty()),
///     Err(DirectError::WouldBlock)
/// );
/// buffer.mark_sending().expect("queued");
/// buffer.complete().expect("sending");
/// assert_eq!(buffer.state(), DirectState::Idle);
/// ```
#[derive(Debug)]
pub struct DirectBuffer {
    data: Box<[u8]>,
    len: usize,
    priority: Priority,
    flags: MessageFlags,
    state: DirectState,
}

impl DirectBuffer {
    /// Allocate a buffer of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DirectError::InvalidCapacity`] outside
    /// [`DIRECT_MIN_CAPACITY`]..=[`DIRECT_MAX_CAPACITY`] and
    /// [`DirectError::Allocation`] if the storage cannot be reserved.
    pub fn with_capacity(capacity: usize) -> Result<Self, DirectError> {
        Ok(Self {
            data: allocate(capacity)?,
            len: 0,
            priority: Priority::Normal,
            flags: MessageFlags::empty(),
            state: DirectState::Idle,
        })
    }

    /// Copy `payload` into the buffer and mark it queued.
    ///
    /// # Errors
    ///
    /// Returns [`DirectError::WouldBlock`] unless the buffer is idle and
    /// [`DirectError::TooLarge`] if `payload` does not fit. The state is
    /// unchanged on error.
    pub fn queue(
        &mut self,
        payload: &[u8],
        priority: Priority,
        flags: MessageFlags,
    ) -> Result<(), DirectError> {
        if self.state != DirectState::Idle {
            return Err(DirectError::WouldBlock);
        }
        let Some(target) = self.data.get_mut(..payload.len()) else {
            return Err(DirectError::TooLarge {
                len: payload.len(),
                capacity: self.data.len(),
            });
        };
        target.copy_from_slice(payload);
        self.len = payload.len();
        self.priority = priority;
        self.flags = flags;
        self.state = DirectState::Queued;
        Ok(())
    }

    /// Record that the transport started writing the queued message.
    ///
    /// # Errors
    ///
    /// Returns [`DirectError::InvalidTransition`] unless the buffer is queued.
    pub fn mark_sending(&mut self) -> Result<(), DirectError> {
        self.transition(DirectState::Queued, DirectState::Sending)
    }

    /// Record that the transport finished with the message.
    ///
    /// # Errors
    ///
    /// Returns [`DirectError::InvalidTransition`] unless the buffer is sending.
    pub fn complete(&mut self) -> Result<(), DirectError> {
        self.transition(DirectState::Sending, DirectState::Idle)?;
        self.len = 0;
        Ok(())
    }

    /// Return a started send to the queued state after the transport
    /// reported it would block.
    ///
    /// # Errors
    ///
    /// Returns [`DirectError::InvalidTransition`] unless the buffer is sending.
    pub fn requeue(&mut self) -> Result<(), DirectError> {
        self.transition(DirectState::Sending, DirectState::Queued)
    }

    /// Discard a queued message without sending it.
    ///
    /// # Errors
    ///
    /// Returns [`DirectError::InvalidTransition`] unless the buffer is queued.
    pub fn cancel(&mut self) -> Result<(), DirectError> {
        self.transition(DirectState::Queued, DirectState::Idle)?;
        self.len = 0;
        Ok(())
    }

    fn transition(&mut self, from: DirectState, to: DirectState) -> Result<(), DirectError> {
        if self.state != from {
            return Err(DirectError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Current transfer state.
    #[must_use]
    pub const fn state(&self) -> DirectState { self.state }

    /// Whether a message is waiting to be sent.
    #[must_use]
    pub fn is_queued(&self) -> bool { self.state == DirectState::Queued }

    /// Bytes of the held message; empty when idle.
    #[must_use]
    pub fn payload(&self) -> &[u8] { &self.data[..self.len] }

    /// Priority of the held message.
    #[must_use]
    pub const fn priority(&self) -> Priority { self.priority }

    /// Envelope flags of the held message.
    #[must_use]
    pub const fn flags(&self) -> MessageFlags { self.flags }

    /// Buffer size in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize { self.data.len() }
}

/// Inbound landing area for large and reassembled messages.
///
/// There is no state machine: delivery to the application is synchronous
/// with the read, so the contents are only valid until the next write.
#[derive(Debug)]
pub struct ReceiveBuffer {
    data: Box<[u8]>,
    len: usize,
}

impl ReceiveBuffer {
    /// Allocate a buffer of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// See [`DirectBuffer::with_capacity`].
    pub fn with_capacity(capacity: usize) -> Result<Self, DirectError> {
        Ok(Self {
            data: allocate(capacity)?,
            len: 0,
        })
    }

    /// Replace the contents with `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`DirectError::TooLarge`] if `payload` does not fit; the
    /// previous contents are kept.
    pub fn receive(&mut self, payload: &[u8]) -> Result<(), DirectError> {
        let capacity = self.data.len();
        let target = self
            .data
            .get_mut(..payload.len())
            .ok_or(DirectError::TooLarge {
                len: payload.len(),
                capacity,
            })?;
        target.copy_from_slice(payload);
        self.len = payload.len();
        Ok(())
    }

    /// Append `payload` after the current contents.
    ///
    /// # Errors
    ///
    /// Returns [`DirectError::TooLarge`] if the combined length does not fit;
    /// the contents are unchanged.
    pub fn append(&mut self, payload: &[u8]) -> Result<(), DirectError> {
        let capacity = self.data.len();
        let end = self.len.saturating_add(payload.len());
        let target = self
            .data
            .get_mut(self.len..end)
            .ok_or(DirectError::TooLarge { len: end, capacity })?;
        target.copy_from_slice(payload);
        self.len = end;
        Ok(())
    }

    /// Drop the contents.
    pub fn clear(&mut self) { self.len = 0; }

    /// Bytes written so far.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] { &self.data[..self.len] }

    /// Number of bytes written so far.
    #[must_use]
    pub const fn len(&self) -> usize { self.len }

    /// Whether nothing has been written.
    #[must_use]
    pub const fn is_empty(&self) -> bool { self.len == 0 }

    /// Buffer size in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize { self.data.len() }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::{
        DIRECT_MAX_CAPACITY,
        DIRECT_MIN_CAPACITY,
        DirectBuffer,
        DirectError,
        DirectState,
        ReceiveBuffer,
    };
    use crate::{error::ErrorKind, frame::MessageFlags, priority::Priority};

    #[fixture]
    fn buffer() -> DirectBuffer { DirectBuffer::with_capacity(512).expect("valid capacity") }

    #[rstest]
    fn full_state_cycle(mut buffer: DirectBuffer) {
        buffer
            .queue(&[1; 300], Priority::High, MessageFlags::empty())
            .expect("idle buffer accepts");
        assert_eq!(buffer.state(), DirectState::Queued);
        assert_eq!(buffer.priority(), Priority::High);

        let second = buffer.queue(&[2; 10], Priority::Low, MessageFlags::empty());
        assert_eq!(second, Err(DirectError::WouldBlock));
        assert_eq!(second.unwrap_err().kind(), ErrorKind::Capacity);
        assert_eq!(buffer.payload(), &[1; 300][..]);

        buffer.mark_sending().expect("queued → sending");
        assert_eq!(
            buffer.queue(&[2; 10], Priority::Low, MessageFlags::empty()),
            Err(DirectError::WouldBlock)
        );
        buffer.complete().expect("sending → idle");
        assert_eq!(buffer.state(), DirectState::Idle);
        assert!(buffer.payload().is_empty());

        buffer
            .queue(&[3; 20], Priority::Normal, MessageFlags::empty())
            .expect("idle again");
    }

    #[rstest]
    fn oversized_payload_leaves_buffer_idle(mut buffer: DirectBuffer) {
        let err = buffer
            .queue(&[0; 513], Priority::Normal, MessageFlags::empty())
            .expect_err("payload too large");
        assert_eq!(
            err,
            DirectError::TooLarge {
                len: 513,
                capacity: 512
            }
        );
        assert_eq!(err.kind(), ErrorKind::Param);
        assert_eq!(buffer.state(), DirectState::Idle);
    }

    #[rstest]
    #[case::sending_from_idle(DirectState::Idle, DirectState::Sending)]
    fn mark_sending_requires_queued(
        mut buffer: DirectBuffer,
        #[case] from: DirectState,
        #[case] to: DirectState,
    ) {
        let err = buffer.mark_sending().expect_err("idle cannot send");
        assert_eq!(err, DirectError::InvalidTransition { from, to });
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[rstest]
    fn complete_requires_sending(mut buffer: DirectBuffer) {
        buffer
            .queue(b"x", Priority::Normal, MessageFlags::empty())
            .expect("queue");
        assert!(matches!(
            buffer.complete(),
            Err(DirectError::InvalidTransition {
                from: DirectState::Queued,
                ..
            })
        ));
    }

    #[rstest]
    fn cancel_and_requeue_recover(mut buffer: DirectBuffer) {
        buffer
            .queue(b"abc", Priority::Normal, MessageFlags::empty())
            .expect("queue");
        buffer.cancel().expect("queued → idle");
        assert_eq!(buffer.state(), DirectState::Idle);

        buffer
            .queue(b"def", Priority::Normal, MessageFlags::empty())
            .expect("queue");
        buffer.mark_sending().expect("sending");
        buffer.requeue().expect("sending → queued");
        assert!(buffer.is_queued());
        assert_eq!(buffer.payload(), b"def");
    }

    #[rstest]
    #[case(0)]
    #[case(DIRECT_MIN_CAPACITY - 1)]
    #[case(DIRECT_MAX_CAPACITY + 1)]
    fn rejects_capacity_out_of_range(#[case] capacity: usize) {
        assert_eq!(
            DirectBuffer::with_capacity(capacity).map(|_| ()),
            Err(DirectError::InvalidCapacity(capacity))
        );
    }

    #[test]
    fn receive_buffer_copies_and_appends() {
        let mut recv = ReceiveBuffer::with_capacity(256).expect("capacity");
        recv.receive(b"hello").expect("fits");
        recv.append(b", world").expect("fits");
        assert_eq!(recv.as_slice(), b"hello, world");

        let err = recv.append(&[0; 250]).expect_err("overflow");
        assert_eq!(err.kind(), ErrorKind::Param);
        assert_eq!(recv.as_slice(), b"hello, world");

        recv.receive(b"new").expect("fits");
        assert_eq!(recv.as_slice(), b"new");
        recv.clear();
        assert!(recv.is_empty());
    }
}
