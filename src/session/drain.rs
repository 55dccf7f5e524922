//! Outbound drain: control frames, then Tier 1 through the batch, then
//! Tier 2.
//!
//! A message leaves Tier 1 only once it sits in a batch that will be sent
//! or its own frame has been accepted. Would-block rolls the current
//! message back and ends the drain; the batch itself survives until the
//! next poll.

use tracing::{debug, warn};

use super::{
    Session,
    SessionState,
    link::WriteOutcome,
};
use crate::{
    batch::BatchError,
    error::Result,
    frame::{MessageFlags, MessageType},
    metrics::{self, DropReason},
    queue::SlotFlags,
    transport::Transport,
};

/// Whether the drain may continue after a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Blocked,
}

impl<T: Transport> Session<T> {
    pub(super) fn drain(&mut self, summary: &mut super::PollSummary) -> Result<()> {
        if let Err(err) = self.link.transport.flush() {
            warn!(peer = %self.peer, error = %err, "transport flush failed");
            return Err(err.into());
        }
        if self.flush_control(summary)? == Flow::Blocked {
            return Ok(());
        }
        if self.drain_queue(summary)? == Flow::Blocked {
            return Ok(());
        }
        if self.drain_direct(summary)? == Flow::Blocked {
            return Ok(());
        }
        self.flush_disconnect(summary)
    }

    fn flush_control(&mut self, summary: &mut super::PollSummary) -> Result<Flow> {
        if let Some(pressure) = self.control.capability {
            self.control_buf.clear();
            self.negotiator
                .local_message(pressure)
                .encode(&mut self.control_buf);
            match self
                .link
                .send(MessageType::Capability, MessageFlags::empty(), &self.control_buf)
            {
                WriteOutcome::Sent => {
                    self.negotiator.mark_announced(pressure);
                    self.control.capability = None;
                    summary.frames_sent += 1;
                    debug!(peer = %self.peer, pressure, "capabilities advertised");
                }
                WriteOutcome::WouldBlock => return Ok(Flow::Blocked),
                WriteOutcome::Failed(err) => return Err(err.into()),
            }
        }
        while self.control.pongs > 0 {
            match self
                .link
                .send(MessageType::Pong, MessageFlags::empty(), &[])
            {
                WriteOutcome::Sent => {
                    self.control.pongs -= 1;
                    summary.frames_sent += 1;
                }
                WriteOutcome::WouldBlock => return Ok(Flow::Blocked),
                WriteOutcome::Failed(err) => return Err(err.into()),
            }
        }
        Ok(Flow::Continue)
    }

    fn flush_batch(&mut self, summary: &mut super::PollSummary) -> Result<Flow> {
        if self.batch.is_empty() {
            return Ok(Flow::Continue);
        }
        match self.link.flush_batch(&mut self.batch) {
            WriteOutcome::Sent => {
                summary.frames_sent += 1;
                Ok(Flow::Continue)
            }
            WriteOutcome::WouldBlock => Ok(Flow::Blocked),
            WriteOutcome::Failed(err) => Err(err.into()),
        }
    }

    fn drain_queue(&mut self, summary: &mut super::PollSummary) -> Result<Flow> {
        if self.flush_batch(summary)? == Flow::Blocked {
            return Ok(Flow::Blocked);
        }
        loop {
            let Some(message) = self.send_queue.pop_direct()? else {
                break;
            };

            if message.flags().contains(SlotFlags::FRAGMENT) {
                if !self.batch.is_empty() {
                    match self.link.flush_batch(&mut self.batch) {
                        WriteOutcome::Sent => summary.frames_sent += 1,
                        WriteOutcome::WouldBlock => {
                            message.rollback();
                            return Ok(Flow::Blocked);
                        }
                        WriteOutcome::Failed(err) => {
                            message.rollback();
                            return Err(err.into());
                        }
                    }
                }
                match self
                    .link
                    .send(MessageType::Data, MessageFlags::FRAGMENT, message.payload())
                {
                    WriteOutcome::Sent => {
                        message.commit()?;
                        self.fragments_queued = self.fragments_queued.saturating_sub(1);
                        summary.frames_sent += 1;
                    }
                    WriteOutcome::WouldBlock => {
                        message.rollback();
                        return Ok(Flow::Blocked);
                    }
                    WriteOutcome::Failed(err) => {
                        warn!(peer = %self.peer, error = %err, "fragment lost to transport failure");
                        metrics::inc_dropped(DropReason::Network, 1);
                        message.commit()?;
                        self.fragments_queued = self.fragments_queued.saturating_sub(1);
                        return Err(err.into());
                    }
                }
                continue;
            }

            match self.batch.add(message.payload()) {
                Ok(()) => message.commit()?,
                Err(BatchError::Overflow { .. }) if !self.batch.is_empty() => {
                    match self.link.flush_batch(&mut self.batch) {
                        WriteOutcome::Sent => summary.frames_sent += 1,
                        WriteOutcome::WouldBlock => {
                            message.rollback();
                            return Ok(Flow::Blocked);
                        }
                        WriteOutcome::Failed(err) => {
                            message.rollback();
                            return Err(err.into());
                        }
                    }
                    if let Err(err) = self.batch.add(message.payload()) {
                        warn!(peer = %self.peer, error = %err, "message does not fit an empty batch; dropped");
                        metrics::inc_dropped(DropReason::BatchOverflow, 1);
                    }
                    message.commit()?;
                }
                Err(err) => {
                    warn!(peer = %self.peer, error = %err, "message does not fit an empty batch; dropped");
                    metrics::inc_dropped(DropReason::BatchOverflow, 1);
                    message.commit()?;
                }
            }
        }
        self.flush_batch(summary)
    }

    fn drain_direct(&mut self, summary: &mut super::PollSummary) -> Result<Flow> {
        if !self.direct.is_queued() {
            return Ok(Flow::Continue);
        }
        self.direct.mark_sending()?;
        match self
            .link
            .send(MessageType::Data, self.direct.flags(), self.direct.payload())
        {
            WriteOutcome::Sent => {
                self.direct.complete()?;
                summary.frames_sent += 1;
                Ok(Flow::Continue)
            }
            WriteOutcome::WouldBlock => {
                self.direct.requeue()?;
                Ok(Flow::Blocked)
            }
            WriteOutcome::Failed(err) => {
                warn!(peer = %self.peer, error = %err, "direct message lost to transport failure");
                metrics::inc_dropped(DropReason::Network, 1);
                self.direct.complete()?;
                Err(err.into())
            }
        }
    }

    fn flush_disconnect(&mut self, summary: &mut super::PollSummary) -> Result<()> {
        if !self.control.disconnect {
            return Ok(());
        }
        match self
            .link
            .send(MessageType::Disconnect, MessageFlags::empty(), &[])
        {
            WriteOutcome::Sent => {
                self.control.disconnect = false;
                self.state = SessionState::Closed;
                summary.frames_sent += 1;
                debug!(peer = %self.peer, "disconnect sent");
                Ok(())
            }
            WriteOutcome::WouldBlock => Ok(()),
            WriteOutcome::Failed(err) => {
                self.control.disconnect = false;
                self.state = SessionState::Closed;
                Err(err.into())
            }
        }
    }
}
