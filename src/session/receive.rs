//! Inbound dispatch.
//!
//! Frames are read until the transport runs dry, then decoded and routed by
//! type. Data frames are delivered through the receive buffer, batch frames
//! entry by entry, and fragments through the reassembler into that same
//! buffer. Anything malformed is logged and dropped.

use std::time::Instant;

use tracing::{debug, info, trace, warn};

use super::{MessageHandler, PollSummary, Session, SessionState, link::ReadOutcome};
use crate::{
    batch::BatchEntries,
    capability::CapabilityMessage,
    error::Result,
    fragment::FragmentHeader,
    frame::{Envelope, MessageFlags, MessageType},
    metrics::{self, DropReason},
    transport::Transport,
};

impl<T: Transport> Session<T> {
    pub(super) fn receive_frames<H: MessageHandler>(
        &mut self,
        now: Instant,
        handler: &mut H,
        summary: &mut PollSummary,
    ) -> Result<()> {
        loop {
            let outcome = self.link.read()?;
            self.dispatch_buffered(now, handler, summary);
            if self.state == SessionState::Closed {
                return Ok(());
            }
            match outcome {
                ReadOutcome::Data => {}
                ReadOutcome::Empty => return Ok(()),
                ReadOutcome::Closed => {
                    info!(peer = %self.peer, "peer closed the connection");
                    self.finish(handler);
                    return Ok(());
                }
            }
        }
    }

    fn dispatch_buffered<H: MessageHandler>(
        &mut self,
        now: Instant,
        handler: &mut H,
        summary: &mut PollSummary,
    ) {
        while self.state != SessionState::Closed {
            match self.link.next_envelope() {
                None => break,
                Some(Ok(envelope)) => self.dispatch(envelope, now, handler, summary),
                Some(Err(err)) => warn!(peer = %self.peer, error = %err, "dropping malformed frame"),
            }
        }
    }

    fn dispatch<H: MessageHandler>(
        &mut self,
        envelope: Envelope,
        now: Instant,
        handler: &mut H,
        summary: &mut PollSummary,
    ) {
        let Envelope { header, payload } = envelope;
        trace!(peer = %self.peer, kind = ?header.kind, sequence = header.sequence, len = payload.len(), "frame received");
        match header.kind {
            MessageType::Data if header.flags.contains(MessageFlags::FRAGMENT) => {
                self.receive_fragment(&payload, now, handler, summary);
            }
            MessageType::Data if header.flags.contains(MessageFlags::BATCH) => {
                for entry in BatchEntries::new(&payload) {
                    match entry {
                        Ok(message) => {
                            handler.on_message(self.peer, message);
                            summary.delivered += 1;
                        }
                        Err(err) => {
                            warn!(peer = %self.peer, error = %err, "dropping remainder of malformed batch");
                        }
                    }
                }
            }
            MessageType::Data => self.receive_direct(&payload, handler, summary),
            MessageType::Capability => match CapabilityMessage::decode(&payload) {
                Ok(message) => self.negotiator.apply(message),
                Err(err) => warn!(peer = %self.peer, error = %err, "ignoring malformed capability frame"),
            },
            MessageType::Ping => self.control.pongs = self.control.pongs.saturating_add(1),
            MessageType::Pong => trace!(peer = %self.peer, "pong received"),
            MessageType::Disconnect => {
                info!(peer = %self.peer, "peer disconnected");
                self.finish(handler);
            }
            MessageType::Ack | MessageType::Reject => {
                debug!(peer = %self.peer, kind = ?header.kind, "ignoring unsolicited control frame");
            }
        }
    }

    /// Deliver an unfragmented message from the receive buffer. While a
    /// fragmented message is being reassembled the buffer holds its prefix,
    /// so the payload is handed over in place instead.
    fn receive_direct<H: MessageHandler>(
        &mut self,
        payload: &[u8],
        handler: &mut H,
        summary: &mut PollSummary,
    ) {
        if self.reassembler.is_active() {
            handler.on_message(self.peer, payload);
        } else {
            if let Err(err) = self.receive.receive(payload) {
                warn!(peer = %self.peer, error = %err, "dropping oversized message");
                metrics::inc_dropped(DropReason::Oversize, 1);
                return;
            }
            handler.on_message(self.peer, self.receive.as_slice());
            self.receive.clear();
        }
        summary.delivered += 1;
    }

    fn receive_fragment<H: MessageHandler>(
        &mut self,
        payload: &[u8],
        now: Instant,
        handler: &mut H,
        summary: &mut PollSummary,
    ) {
        let pushed = match FragmentHeader::parse(payload) {
            Ok((header, body)) => self
                .reassembler
                .push_at(header, body, &mut self.receive, now),
            Err(err) => Err(err),
        };
        match pushed {
            Ok(Some(message)) => {
                handler.on_message(self.peer, message);
                summary.delivered += 1;
                metrics::inc_reassembled();
                self.receive.clear();
            }
            Ok(None) => {}
            Err(err) => {
                warn!(peer = %self.peer, error = %err, "dropping partial message");
                metrics::inc_dropped(DropReason::Reassembly, 1);
            }
        }
    }

    /// Deliver messages pushed through the receive-callback queue.
    pub(super) fn deliver_callback_messages<H: MessageHandler>(
        &mut self,
        handler: &mut H,
        summary: &mut PollSummary,
    ) -> Result<()> {
        let events = self.callback_queue.take_isr_events();
        if events.queue_full {
            warn!(peer = %self.peer, "receive callback queue overflowed");
        }
        if events.oversize {
            warn!(peer = %self.peer, "receive callback rejected an oversized message");
        }
        while let Some(message) = self.callback_queue.pop_direct()? {
            handler.on_message(self.peer, message.payload());
            summary.delivered += 1;
            message.commit()?;
        }
        Ok(())
    }

    fn finish<H: MessageHandler>(&mut self, handler: &mut H) {
        self.state = SessionState::Closed;
        self.control = super::PendingControl::default();
        handler.on_disconnect(self.peer);
    }
}
