//! Per-peer messaging session.
//!
//! A [`Session`] ties the engine together for one connected peer. It owns
//! the Tier-1 [`RingQueue`](crate::queue::RingQueue), the Tier-2
//! [`DirectBuffer`], the outbound [`Batch`], the [`CapabilityNegotiator`]
//! and the fragmentation state for both directions.
//!
//! Nothing blocks. [`Session::send`] routes a message into one of the tiers
//! or fails immediately with a back-pressure error, and [`Session::poll`]
//! performs one round of non-blocking I/O: it reads and dispatches inbound
//! frames, delivers messages pushed by an asynchronous receive callback,
//! re-advertises capabilities when local pressure changes band, and drains
//! both tiers to the transport until it reports would-block.

mod config;
mod drain;
mod link;
mod receive;
mod send;

use std::time::Instant;

use bytes::BytesMut;
use derive_more::{Display, From, Into};
use tracing::{debug, info};

pub use self::config::{ConfigError, SessionConfig, SessionConfigBuilder};
use self::link::Link;
use crate::{
    batch::Batch,
    capability::{self, CapabilityNegotiator},
    direct::{DirectBuffer, DirectState, ReceiveBuffer},
    error::Result,
    flow::PressureMonitor,
    fragment::{Fragmenter, Reassembler},
    metrics::{self, DropReason},
    queue::{IsrProducer, QueueConsumer, RingQueue},
    transport::Transport,
};

/// Identifier of the remote peer a session talks to.
///
/// # Examples
///
/// ```
/// use peertalk::session::PeerId;
/// let peer = PeerId::new(3);
/// assert_eq!(peer.get(), 3);
/// assert_eq!(peer.to_string(), "3");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Display, From, Into)]
#[display("{_0}")]
pub struct PeerId(u16);

impl PeerId {
    /// Create a new identifier.
    #[must_use]
    pub const fn new(value: u16) -> Self { Self(value) }

    /// Return the inner numeric identifier.
    #[must_use]
    pub const fn get(self) -> u16 { self.0 }
}

/// Receives messages delivered by [`Session::poll`].
///
/// Payloads are borrowed from session buffers and are only valid for the
/// duration of the call.
pub trait MessageHandler {
    /// A complete message arrived from `peer`.
    fn on_message(&mut self, peer: PeerId, payload: &[u8]);

    /// The peer announced an orderly shutdown or closed the connection.
    fn on_disconnect(&mut self, peer: PeerId) { let _ = peer; }
}

impl<F> MessageHandler for F
where
    F: FnMut(PeerId, &[u8]),
{
    fn on_message(&mut self, peer: PeerId, payload: &[u8]) { self(peer, payload); }
}

/// Lifecycle of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Sending and receiving.
    #[default]
    Open,
    /// [`Session::close`] was called; queued traffic and a disconnect
    /// notice are still being written.
    Closing,
    /// Either side has finished the connection.
    Closed,
}

/// What one call to [`Session::poll`] accomplished.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Messages handed to the handler.
    pub delivered: usize,
    /// Frames accepted by the transport.
    pub frames_sent: usize,
    /// Whether the session is now closed.
    pub closed: bool,
}

/// Control frames waiting for the transport.
#[derive(Clone, Copy, Debug, Default)]
struct PendingControl {
    /// Pressure to advertise in a capability frame.
    capability: Option<u8>,
    pongs: u32,
    disconnect: bool,
}

/// Messaging session with one peer over transport `T`.
#[derive(Debug)]
pub struct Session<T> {
    peer: PeerId,
    state: SessionState,
    link: Link<T>,
    send_queue: RingQueue,
    direct: DirectBuffer,
    batch: Batch,
    negotiator: CapabilityNegotiator,
    fragmenter: Fragmenter,
    fragments_queued: usize,
    reassembler: Reassembler,
    receive: ReceiveBuffer,
    callback_queue: QueueConsumer,
    callback_producer: Option<IsrProducer>,
    control: PendingControl,
    control_buf: BytesMut,
    critical_failures: u32,
    unresponsive_after: u32,
    send_pressure: PressureMonitor,
}

impl<T: Transport> Session<T> {
    /// Build a session for `peer` over `transport`.
    ///
    /// Capabilities are advertised on the first poll.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if `config` is invalid,
    /// or a resource error if a buffer cannot be allocated.
    pub fn new(peer: PeerId, transport: T, config: &SessionConfig) -> Result<Self> {
        config.validate()?;
        let (callback_producer, callback_queue) =
            RingQueue::new(config.receive_queue_capacity)?.split();
        let session = Self {
            peer,
            state: SessionState::Open,
            link: Link::new(transport, config.read_chunk),
            send_queue: RingQueue::new(config.queue_capacity)?,
            direct: DirectBuffer::with_capacity(config.direct_capacity)?,
            batch: Batch::with_limit(config.batch_limit)?,
            negotiator: CapabilityNegotiator::new(config.local_capabilities()),
            fragmenter: Fragmenter::new(),
            fragments_queued: 0,
            reassembler: Reassembler::new(config.reassembly_timeout()),
            receive: ReceiveBuffer::with_capacity(usize::from(capability::MAX_MESSAGE_SIZE))?,
            callback_queue,
            callback_producer: Some(callback_producer),
            control: PendingControl::default(),
            control_buf: BytesMut::with_capacity(capability::CAPABILITY_PAYLOAD_LEN),
            critical_failures: 0,
            unresponsive_after: config.unresponsive_after,
            send_pressure: PressureMonitor::default(),
        };
        debug!(peer = %peer, "session opened");
        Ok(session)
    }

    /// Perform one round of non-blocking I/O using the current time.
    ///
    /// # Errors
    ///
    /// See [`Session::poll_at`].
    pub fn poll<H: MessageHandler>(&mut self, handler: &mut H) -> Result<PollSummary> {
        self.poll_at(Instant::now(), handler)
    }

    /// Perform one round of non-blocking I/O.
    ///
    /// `now` drives reassembly timeouts. Malformed inbound frames are
    /// logged and dropped without failing the poll.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) when the transport fails, and
    /// [`Error::Queue`](crate::Error::Queue) if a queue fails its integrity
    /// checks. Messages lost to a transport failure are logged and dropped.
    pub fn poll_at<H: MessageHandler>(
        &mut self,
        now: Instant,
        handler: &mut H,
    ) -> Result<PollSummary> {
        let mut summary = PollSummary::default();
        if self.state != SessionState::Closed {
            self.receive_frames(now, handler, &mut summary)?;
            self.deliver_callback_messages(handler, &mut summary)?;
            self.expire_reassembly(now);
        }
        if self.state != SessionState::Closed {
            self.schedule_announce();
            self.drain(&mut summary)?;
            self.observe_send_pressure();
        }
        summary.closed = self.state == SessionState::Closed;
        Ok(summary)
    }

    /// Begin an orderly shutdown.
    ///
    /// Further sends fail with [`Error::Closed`](crate::Error::Closed).
    /// Queued messages are still written, followed by a disconnect notice,
    /// over subsequent polls.
    pub fn close(&mut self) {
        if self.state == SessionState::Open {
            info!(peer = %self.peer, "closing session");
            self.state = SessionState::Closing;
            self.control.disconnect = true;
        }
    }

    /// Take the producer half of the receive-callback queue.
    ///
    /// An asynchronous receive callback pushes small inbound messages
    /// through it; the session delivers them on the next poll. Returns
    /// `None` after the first call.
    pub fn take_isr_producer(&mut self) -> Option<IsrProducer> { self.callback_producer.take() }

    /// Peer this session talks to.
    #[must_use]
    pub const fn peer(&self) -> PeerId { self.peer }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState { self.state }

    /// Negotiation state, including the peer's last advertised limits.
    #[must_use]
    pub const fn negotiator(&self) -> &CapabilityNegotiator { &self.negotiator }

    /// Messages waiting in the Tier-1 queue.
    #[must_use]
    pub fn queued(&self) -> usize { self.send_queue.len() }

    /// Entries held in the outbound batch awaiting a flush.
    #[must_use]
    pub const fn pending_batch(&self) -> usize { self.batch.len() }

    /// State of the Tier-2 send buffer.
    #[must_use]
    pub const fn direct_state(&self) -> DirectState { self.direct.state() }

    /// Pressure advertised to the peer: the fuller of the send queue and the
    /// receive-callback queue.
    #[must_use]
    pub fn reported_pressure(&self) -> u8 {
        capability::reported_pressure(self.send_queue.pressure(), self.callback_queue.pressure())
    }

    /// Borrow the transport.
    #[must_use]
    pub const fn transport(&self) -> &T { &self.link.transport }

    /// Mutably borrow the transport.
    pub fn transport_mut(&mut self) -> &mut T { &mut self.link.transport }

    fn schedule_announce(&mut self) {
        let pressure = self.reported_pressure();
        if self.state == SessionState::Open && self.negotiator.needs_announce(pressure) {
            self.control.capability = Some(pressure);
        }
    }

    fn expire_reassembly(&mut self, now: Instant) {
        if let Some(message_id) = self.reassembler.purge_expired_at(now) {
            self.receive.clear();
            debug!(peer = %self.peer, %message_id, "discarded expired partial message");
            metrics::inc_dropped(DropReason::Reassembly, 1);
        }
    }
}

#[cfg(test)]
mod tests;
