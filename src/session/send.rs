//! Outbound routing.
//!
//! Admitted messages go to one of three places, decided by length against
//! the per-peer ceiling `min(effective max message size, Tier-2 capacity)`:
//!
//! - longer than the ceiling: split into fragments queued on Tier 1;
//! - at most one slot: queued on Tier 1, optionally coalesced by key;
//! - otherwise: staged in the Tier-2 direct buffer.

use tracing::{debug, warn};

use super::{Session, SessionState};
use crate::{
    capability::MAX_MESSAGE_SIZE,
    error::{Error, Result},
    flow,
    fragment::{FRAGMENT_HEADER_LEN, FragmentationError, fragment_count},
    frame::MessageFlags,
    priority::Priority,
    queue::{QueueError, SLOT_SIZE, SlotFlags},
    transport::Transport,
};

impl<T: Transport> Session<T> {
    /// Queue `payload` for delivery at `priority`.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] once the session is closing or closed.
    /// - [`Error::MessageTooLarge`] if `payload` exceeds
    ///   [`MAX_MESSAGE_SIZE`], or needs fragmenting and either the peer
    ///   cannot reassemble or the fragments would outnumber the queue slots.
    /// - [`Error::Flow`] if local or peer pressure rules out `priority`.
    /// - [`Error::Queue`] or [`Error::Direct`] when the chosen tier is full;
    ///   retry after a poll.
    /// - [`Error::PeerUnresponsive`] when critical sends have kept failing.
    ///
    /// # Examples
    ///
    /// ```
    /// use peertalk::{
    ///     Priority,
    ///     session::{PeerId, Session, SessionConfig},
    ///     transport::MemoryTransport,
    /// };
    ///
    /// let (transport, _peer_end) = MemoryTransport::pair();
    /// let mut session =
    ///     Session::new(PeerId::new(1), transport, &SessionConfig::default()).expect("session");
    /// session.send(b"hello", Priority::Normal).expect("queued");
    /// assert_eq!(session.queued(), 1);
    /// ```
    pub fn send(&mut self, payload: &[u8], priority: Priority) -> Result<()> {
        self.send_keyed(payload, priority, 0)
    }

    /// Queue `payload`, replacing any queued message sharing `key`.
    ///
    /// Only messages that fit one Tier-1 slot are coalesced; a `key` of
    /// zero behaves as [`Session::send`].
    ///
    /// # Errors
    ///
    /// See [`Session::send`].
    pub fn send_coalesced(&mut self, payload: &[u8], priority: Priority, key: u16) -> Result<()> {
        self.send_keyed(payload, priority, key)
    }

    fn send_keyed(&mut self, payload: &[u8], priority: Priority, key: u16) -> Result<()> {
        if self.state != SessionState::Open {
            return Err(Error::Closed);
        }
        let limit = usize::from(MAX_MESSAGE_SIZE);
        if payload.len() > limit {
            return Err(Error::MessageTooLarge {
                size: payload.len(),
                limit,
            });
        }
        flow::try_push(self.send_queue.pressure(), priority)?;
        flow::check_peer(self.negotiator.peer(), priority)?;

        let routed = self.route(payload, priority, key);
        if routed.is_ok() {
            self.observe_send_pressure();
        }
        self.track_critical(priority, routed)
    }

    fn route(&mut self, payload: &[u8], priority: Priority, key: u16) -> Result<()> {
        let ceiling = usize::from(self.negotiator.effective_max_message_size())
            .min(self.direct.capacity());
        if payload.len() > ceiling {
            return self.queue_fragments(payload, priority, ceiling);
        }
        if payload.len() <= SLOT_SIZE {
            self.send_queue.push_coalesce(payload, priority, key)?;
            return Ok(());
        }
        self.direct.queue(payload, priority, MessageFlags::empty())?;
        Ok(())
    }

    /// Queue every fragment of `payload`, or none of them.
    ///
    /// The peer reassembles one message at a time, so a second fragmented
    /// message waits until every fragment of the first has been written.
    fn queue_fragments(&mut self, payload: &[u8], priority: Priority, ceiling: usize) -> Result<()> {
        if !self.negotiator.peer().accepts_fragments() {
            return Err(Error::MessageTooLarge {
                size: payload.len(),
                limit: ceiling,
            });
        }
        let max_fragment = usize::from(self.negotiator.effective_chunk()).min(SLOT_SIZE);
        let chunk_body = max_fragment.saturating_sub(FRAGMENT_HEADER_LEN);
        let needed = fragment_count(payload.len(), max_fragment)
            .ok_or(FragmentationError::ChunkTooSmall(max_fragment))?;
        if needed > self.send_queue.capacity() {
            return Err(Error::MessageTooLarge {
                size: payload.len(),
                limit: self.send_queue.capacity() * chunk_body,
            });
        }
        if self.fragments_queued > 0 || needed > self.send_queue.free_slots() {
            return Err(QueueError::Full {
                capacity: self.send_queue.capacity(),
            }
            .into());
        }

        let fragments = self.fragmenter.split(payload, max_fragment)?;
        let message_id = fragments.message_id();
        let mut slot = [0u8; SLOT_SIZE];
        for fragment in fragments {
            let len = fragment.write_to(&mut slot)?;
            self.send_queue
                .push_with_flags(&slot[..len], priority, SlotFlags::FRAGMENT)?;
            self.fragments_queued += 1;
        }
        debug!(
            peer = %self.peer,
            %message_id,
            len = payload.len(),
            fragments = needed,
            "queued fragmented message"
        );
        Ok(())
    }

    /// Count consecutive capacity failures of critical sends.
    fn track_critical(&mut self, priority: Priority, routed: Result<()>) -> Result<()> {
        if priority != Priority::Critical {
            return routed;
        }
        match routed {
            Ok(()) => {
                self.critical_failures = 0;
                Ok(())
            }
            Err(err) if err.is_would_block() => {
                self.critical_failures = self.critical_failures.saturating_add(1);
                if self.critical_failures < self.unresponsive_after {
                    return Err(err);
                }
                warn!(
                    peer = %self.peer,
                    failures = self.critical_failures,
                    "critical sends keep failing; peer unresponsive"
                );
                Err(Error::PeerUnresponsive {
                    peer: self.peer,
                    failures: self.critical_failures,
                })
            }
            Err(err) => Err(err),
        }
    }

    pub(super) fn observe_send_pressure(&mut self) {
        let pressure = self.send_queue.pressure();
        if let Some(threshold) = self.send_pressure.observe(pressure) {
            warn!(peer = %self.peer, pressure, threshold, "send queue filling");
        }
    }
}
