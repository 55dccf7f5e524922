//! Framing between a session and its transport.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::warn;

use crate::{
    batch::Batch,
    frame::{
        CodecError,
        Envelope,
        EnvelopeCodec,
        EnvelopeHeader,
        MessageFlags,
        MessageType,
        encode_frame,
    },
    metrics::{self, Direction, DropReason},
    transport::Transport,
};

/// Result of handing one frame to the transport.
#[derive(Debug)]
pub(super) enum WriteOutcome {
    Sent,
    WouldBlock,
    Failed(io::Error),
}

/// Result of one transport read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ReadOutcome {
    Data,
    Empty,
    Closed,
}

/// Transport plus the buffers needed to frame and unframe envelopes.
#[derive(Debug)]
pub(super) struct Link<T> {
    pub(super) transport: T,
    codec: EnvelopeCodec,
    scratch: BytesMut,
    inbound: BytesMut,
    read_buf: Box<[u8]>,
    sequence: u8,
    peer_closed: bool,
}

impl<T: Transport> Link<T> {
    pub(super) fn new(transport: T, read_chunk: usize) -> Self {
        Self {
            transport,
            codec: EnvelopeCodec::default(),
            scratch: BytesMut::new(),
            inbound: BytesMut::new(),
            read_buf: vec![0; read_chunk].into_boxed_slice(),
            sequence: 0,
            peer_closed: false,
        }
    }

    /// Frame `payload` and offer it to the transport.
    pub(super) fn send(&mut self, kind: MessageType, flags: MessageFlags, payload: &[u8]) -> WriteOutcome {
        self.scratch.clear();
        let header = EnvelopeHeader::new(kind)
            .with_flags(flags)
            .with_sequence(self.sequence);
        if let Err(err) = encode_frame(header, payload, &mut self.scratch) {
            return WriteOutcome::Failed(io::Error::new(io::ErrorKind::InvalidInput, err));
        }
        match self.transport.try_write(&self.scratch) {
            Ok(()) => {
                self.sequence = self.sequence.wrapping_add(1);
                metrics::inc_frames(Direction::Outbound);
                WriteOutcome::Sent
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => WriteOutcome::WouldBlock,
            Err(err) => WriteOutcome::Failed(err),
        }
    }

    /// Send the batch as one frame. The batch is emptied when the frame is
    /// sent or lost to a network failure, and kept on would-block.
    pub(super) fn flush_batch(&mut self, batch: &mut Batch) -> WriteOutcome {
        let outcome = self.send(MessageType::Data, MessageFlags::BATCH, batch.as_bytes());
        match &outcome {
            WriteOutcome::Sent => batch.reset(),
            WriteOutcome::Failed(err) => {
                warn!(entries = batch.len(), error = %err, "batch lost to transport failure");
                metrics::inc_dropped(DropReason::Network, u64::try_from(batch.len()).unwrap_or(u64::MAX));
                batch.reset();
            }
            WriteOutcome::WouldBlock => {}
        }
        outcome
    }

    /// Read once from the transport into the inbound buffer.
    pub(super) fn read(&mut self) -> io::Result<ReadOutcome> {
        if self.peer_closed {
            return Ok(ReadOutcome::Closed);
        }
        match self.transport.try_read(&mut self.read_buf) {
            Ok(0) => {
                self.peer_closed = true;
                Ok(ReadOutcome::Closed)
            }
            Ok(n) => {
                self.inbound.extend_from_slice(&self.read_buf[..n]);
                Ok(ReadOutcome::Data)
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::Empty),
            Err(err) => Err(err),
        }
    }

    /// Decode the next buffered envelope.
    ///
    /// Once the peer has closed, a trailing partial frame is reported as
    /// truncated and discarded.
    pub(super) fn next_envelope(&mut self) -> Option<Result<Envelope, CodecError>> {
        let decoded = if self.peer_closed {
            self.codec.decode_eof(&mut self.inbound)
        } else {
            self.codec.decode(&mut self.inbound)
        };
        match decoded {
            Ok(Some(envelope)) => {
                metrics::inc_frames(Direction::Inbound);
                Some(Ok(envelope))
            }
            Ok(None) => None,
            Err(err) => {
                metrics::inc_decode_errors();
                Some(Err(err))
            }
        }
    }
}
