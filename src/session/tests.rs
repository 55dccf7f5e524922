//! Unit tests for [`Session`](super::Session).

use std::time::{Duration, Instant};

use bytes::BytesMut;
use rstest::{fixture, rstest};
use tokio_util::codec::Decoder;

use super::{MessageHandler, PeerId, Session, SessionConfig, SessionState};
use crate::{
    Error,
    batch::BatchEntries,
    capability::{CapabilityFlags, CapabilityMessage},
    direct::DirectState,
    fragment::{FragmentFlags, FragmentHeader, MessageId},
    frame::{Envelope, EnvelopeCodec, EnvelopeHeader, MessageFlags, MessageType, encode_frame},
    priority::Priority,
    transport::{MemoryTransport, Transport},
};

/// Records everything a session hands to the application.
#[derive(Debug, Default)]
struct Recorder {
    messages: Vec<Vec<u8>>,
    disconnects: usize,
}

impl MessageHandler for Recorder {
    fn on_message(&mut self, _peer: PeerId, payload: &[u8]) { self.messages.push(payload.to_vec()); }

    fn on_disconnect(&mut self, _peer: PeerId) { self.disconnects += 1; }
}

/// A session plus the raw far end of its transport.
struct Harness {
    session: Session<MemoryTransport>,
    remote: MemoryTransport,
    recorder: Recorder,
}

impl Harness {
    fn new(config: &SessionConfig) -> Self {
        let (local, remote) = MemoryTransport::pair();
        Self {
            session: Session::new(PeerId::new(7), local, config).expect("valid config"),
            remote,
            recorder: Recorder::default(),
        }
    }

    fn poll(&mut self) -> super::PollSummary {
        self.session
            .poll(&mut self.recorder)
            .expect("poll succeeds")
    }

    /// Poll once and discard the initial capability advertisement.
    fn announced(mut self) -> Self {
        self.poll();
        let frames = self.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.kind, MessageType::Capability);
        self
    }

    /// Everything the session has written so far.
    fn frames(&mut self) -> Vec<Envelope> {
        let mut raw = BytesMut::new();
        let mut buf = [0u8; 512];
        while let Ok(n) = self.remote.try_read(&mut buf) {
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
        }
        let mut codec = EnvelopeCodec::default();
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut raw).expect("well-formed output") {
            frames.push(frame);
        }
        assert!(raw.is_empty(), "trailing partial frame");
        frames
    }

    fn stall_writes(&mut self, stalled: bool) { self.session.transport_mut().set_write_stalled(stalled); }

    /// Write a frame as the peer would.
    fn inject(&mut self, kind: MessageType, flags: MessageFlags, payload: &[u8]) {
        let mut raw = BytesMut::new();
        encode_frame(EnvelopeHeader::new(kind).with_flags(flags), payload, &mut raw)
            .expect("encodable");
        self.remote.try_write(&raw).expect("pipe open");
    }
}

#[fixture]
fn harness() -> Harness { Harness::new(&SessionConfig::default()).announced() }

#[test]
fn first_poll_advertises_local_capabilities() {
    let mut harness = Harness::new(&SessionConfig::default());
    let summary = harness.poll();
    assert_eq!(summary.frames_sent, 1);

    let frames = harness.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].header.kind, MessageType::Capability);
    let advertised = CapabilityMessage::decode(&frames[0].payload).expect("valid TLV");
    assert_eq!(advertised.max_message_size, 8192);
    assert_eq!(advertised.preferred_chunk, 1024);
    assert!(advertised.flags.contains(CapabilityFlags::FRAGMENTATION));
    assert_eq!(advertised.buffer_pressure, 0);

    assert_eq!(harness.poll().frames_sent, 0);
}

#[rstest]
fn small_messages_share_one_batch_in_priority_order(mut harness: Harness) {
    harness.session.send(b"low", Priority::Low).expect("queued");
    harness.session.send(b"high", Priority::High).expect("queued");
    harness.session.send(b"normal", Priority::Normal).expect("queued");

    assert_eq!(harness.poll().frames_sent, 1);
    let frames = harness.frames();
    assert_eq!(frames.len(), 1);
    assert!(frames[0].header.flags.contains(MessageFlags::BATCH));
    let entries: Vec<&[u8]> = BatchEntries::new(&frames[0].payload)
        .collect::<Result<_, _>>()
        .expect("well-formed batch");
    assert_eq!(entries, [&b"high"[..], &b"normal"[..], &b"low"[..]]);
}

#[rstest]
fn coalesced_sends_keep_only_the_latest(mut harness: Harness) {
    harness
        .session
        .send_coalesced(b"pos=1", Priority::Normal, 9)
        .expect("queued");
    harness
        .session
        .send_coalesced(b"pos=2", Priority::Normal, 9)
        .expect("coalesced");
    assert_eq!(harness.session.queued(), 1);

    harness.poll();
    let frames = harness.frames();
    let entries: Vec<&[u8]> = BatchEntries::new(&frames[0].payload)
        .collect::<Result<_, _>>()
        .expect("well-formed batch");
    assert_eq!(entries, [&b"pos=2"[..]]);
}

#[rstest]
fn medium_messages_use_the_direct_buffer(mut harness: Harness) {
    let payload = vec![0x5a; 600];
    harness.session.send(&payload, Priority::Normal).expect("staged");
    assert_eq!(harness.session.queued(), 0);
    assert_eq!(harness.session.direct_state(), DirectState::Queued);
    assert!(matches!(
        harness.session.send(&payload, Priority::Normal),
        Err(Error::Direct(_))
    ));

    harness.poll();
    assert_eq!(harness.session.direct_state(), DirectState::Idle);
    let frames = harness.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].header.flags, MessageFlags::empty());
    assert_eq!(frames[0].payload.as_ref(), payload.as_slice());
}

#[rstest]
fn stalled_transport_keeps_the_batch_for_the_next_poll(mut harness: Harness) {
    harness.stall_writes(true);
    harness.session.send(b"hold", Priority::Normal).expect("queued");

    assert_eq!(harness.poll().frames_sent, 0);
    assert_eq!(harness.session.queued(), 0);
    assert_eq!(harness.session.pending_batch(), 1);

    harness.stall_writes(false);
    assert_eq!(harness.poll().frames_sent, 1);
    assert_eq!(harness.session.pending_batch(), 0);
    assert_eq!(harness.frames().len(), 1);
}

#[rstest]
fn stalled_direct_send_is_requeued(mut harness: Harness) {
    harness.stall_writes(true);
    harness
        .session
        .send(&[1; 400], Priority::High)
        .expect("staged");
    harness.poll();
    assert_eq!(harness.session.direct_state(), DirectState::Queued);

    harness.stall_writes(false);
    harness.poll();
    assert_eq!(harness.session.direct_state(), DirectState::Idle);
}

#[rstest]
fn oversized_messages_are_fragmented_and_rolled_back_while_stalled(mut harness: Harness) {
    let payload: Vec<u8> = (0..5_000usize).map(|i| (i % 251) as u8).collect();
    harness.stall_writes(true);
    harness.session.send(&payload, Priority::Normal).expect("fragmented");
    let queued = harness.session.queued();
    assert_eq!(queued, 21);

    harness.poll();
    assert_eq!(harness.session.queued(), queued);

    harness.stall_writes(false);
    harness.poll();
    assert_eq!(harness.session.queued(), 0);
    let fragments: Vec<_> = harness
        .frames()
        .into_iter()
        .filter(|frame| frame.header.flags.contains(MessageFlags::FRAGMENT))
        .collect();
    assert_eq!(fragments.len(), 21);
    let (first, _) = FragmentHeader::parse(&fragments[0].payload).expect("header");
    assert!(first.is_first());
    assert_eq!(usize::from(first.total_length()), payload.len());
}

#[test]
fn messages_beyond_the_global_maximum_are_rejected() {
    let mut harness = Harness::new(&SessionConfig::default());
    let err = harness
        .session
        .send(&[0; 8193], Priority::Normal)
        .expect_err("too large");
    assert!(matches!(err, Error::MessageTooLarge { size: 8193, .. }));
}

#[rstest]
fn peers_without_fragmentation_cannot_receive_oversized_messages(mut harness: Harness) {
    let mut payload = BytesMut::new();
    CapabilityMessage {
        max_message_size: 512,
        preferred_chunk: 512,
        flags: CapabilityFlags::empty(),
        buffer_pressure: 0,
    }
    .encode(&mut payload);
    harness.inject(MessageType::Capability, MessageFlags::empty(), &payload);
    harness.poll();
    assert_eq!(harness.session.negotiator().effective_max_message_size(), 512);

    let err = harness
        .session
        .send(&[0; 1_000], Priority::Normal)
        .expect_err("cannot fragment");
    assert!(matches!(err, Error::MessageTooLarge { size: 1_000, limit: 512 }));
}

#[test]
fn crossing_a_pressure_band_re_advertises_capabilities() {
    let config = SessionConfig::builder()
        .queue_capacity(4)
        .build()
        .expect("valid");
    let mut harness = Harness::new(&config).announced();
    harness.session.send(b"a", Priority::Normal).expect("queued");
    harness.session.send(b"b", Priority::Normal).expect("queued");

    harness.poll();
    let frames = harness.frames();
    assert_eq!(frames[0].header.kind, MessageType::Capability);
    let advertised = CapabilityMessage::decode(&frames[0].payload).expect("valid TLV");
    assert_eq!(advertised.buffer_pressure, 50);
    assert!(frames[1].header.flags.contains(MessageFlags::BATCH));
}

#[rstest]
fn pings_are_answered(mut harness: Harness) {
    harness.inject(MessageType::Ping, MessageFlags::empty(), &[]);
    harness.inject(MessageType::Ping, MessageFlags::empty(), &[]);
    harness.poll();
    let kinds: Vec<_> = harness.frames().iter().map(|f| f.header.kind).collect();
    assert_eq!(kinds, [MessageType::Pong, MessageType::Pong]);
}

#[rstest]
fn inbound_batches_and_plain_data_are_delivered(mut harness: Harness) {
    let mut batch = crate::batch::Batch::new();
    batch.add(b"one").expect("fits");
    batch.add(b"two").expect("fits");
    harness.inject(MessageType::Data, MessageFlags::BATCH, batch.as_bytes());
    harness.inject(MessageType::Data, MessageFlags::empty(), b"three");

    assert_eq!(harness.poll().delivered, 3);
    assert_eq!(
        harness.recorder.messages,
        [b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
    );
}

#[rstest]
fn malformed_frames_are_skipped(mut harness: Harness) {
    harness.remote.try_write(b"garbage!").expect("pipe open");
    harness.inject(MessageType::Data, MessageFlags::empty(), b"after");
    harness.poll();
    assert_eq!(harness.recorder.messages, [b"after".to_vec()]);
}

fn fragment(id: u16, total: u16, offset: u16, flags: FragmentFlags, body: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; 8 + body.len()];
    FragmentHeader::new(MessageId::new(id), total, offset, flags)
        .write_to(&mut out)
        .expect("header fits");
    out[8..].copy_from_slice(body);
    out
}

#[rstest]
fn fragments_are_reassembled_once(mut harness: Harness) {
    let first = fragment(3, 6, 0, FragmentFlags::FIRST, b"abc");
    let last = fragment(3, 6, 3, FragmentFlags::LAST, b"def");
    harness.inject(MessageType::Data, MessageFlags::FRAGMENT, &first);
    harness.inject(MessageType::Data, MessageFlags::FRAGMENT, &last);

    assert_eq!(harness.poll().delivered, 1);
    assert_eq!(harness.recorder.messages, [b"abcdef".to_vec()]);
}

#[rstest]
fn plain_message_between_fragments_leaves_reassembly_intact(mut harness: Harness) {
    let first = fragment(3, 6, 0, FragmentFlags::FIRST, b"abc");
    let last = fragment(3, 6, 3, FragmentFlags::LAST, b"def");
    let plain = vec![0x5a; 600];
    harness.inject(MessageType::Data, MessageFlags::FRAGMENT, &first);
    harness.inject(MessageType::Data, MessageFlags::empty(), &plain);
    harness.inject(MessageType::Data, MessageFlags::FRAGMENT, &last);
    harness.inject(MessageType::Data, MessageFlags::empty(), b"after");

    assert_eq!(harness.poll().delivered, 3);
    assert_eq!(
        harness.recorder.messages,
        [plain, b"abcdef".to_vec(), b"after".to_vec()]
    );
}

#[rstest]
fn out_of_order_fragments_are_discarded(mut harness: Harness) {
    let first = fragment(3, 6, 0, FragmentFlags::FIRST, b"abc");
    let skipped = fragment(3, 6, 4, FragmentFlags::LAST, b"ef");
    harness.inject(MessageType::Data, MessageFlags::FRAGMENT, &first);
    harness.inject(MessageType::Data, MessageFlags::FRAGMENT, &skipped);

    assert_eq!(harness.poll().delivered, 0);
    assert!(harness.recorder.messages.is_empty());
}

#[rstest]
fn stale_partial_messages_expire(mut harness: Harness) {
    let first = fragment(3, 6, 0, FragmentFlags::FIRST, b"abc");
    let last = fragment(3, 6, 3, FragmentFlags::LAST, b"def");
    let start = Instant::now();
    harness.inject(MessageType::Data, MessageFlags::FRAGMENT, &first);
    harness
        .session
        .poll_at(start, &mut harness.recorder)
        .expect("poll");

    harness.inject(MessageType::Data, MessageFlags::FRAGMENT, &last);
    harness
        .session
        .poll_at(start + Duration::from_secs(6), &mut harness.recorder)
        .expect("poll");
    assert!(harness.recorder.messages.is_empty());
}

#[rstest]
fn receive_callback_messages_are_delivered_on_poll(mut harness: Harness) {
    let mut producer = harness.session.take_isr_producer().expect("first take");
    assert!(harness.session.take_isr_producer().is_none());
    producer.push_isr(b"from isr", Priority::Normal).expect("space");

    assert_eq!(harness.poll().delivered, 1);
    assert_eq!(harness.recorder.messages, [b"from isr".to_vec()]);
}

#[rstest]
fn close_flushes_then_disconnects(mut harness: Harness) {
    harness.session.send(b"last words", Priority::Normal).expect("queued");
    harness.session.close();
    assert_eq!(harness.session.state(), SessionState::Closing);
    assert!(matches!(
        harness.session.send(b"late", Priority::Normal),
        Err(Error::Closed)
    ));

    let summary = harness.poll();
    assert!(summary.closed);
    assert_eq!(harness.session.state(), SessionState::Closed);
    let kinds: Vec<_> = harness.frames().iter().map(|f| f.header.kind).collect();
    assert_eq!(kinds, [MessageType::Data, MessageType::Disconnect]);
}

#[rstest]
fn peer_disconnect_closes_the_session(mut harness: Harness) {
    harness.inject(MessageType::Disconnect, MessageFlags::empty(), &[]);
    let summary = harness.poll();
    assert!(summary.closed);
    assert_eq!(harness.recorder.disconnects, 1);
    assert!(matches!(
        harness.session.send(b"x", Priority::Critical),
        Err(Error::Closed)
    ));
}

#[rstest]
fn end_of_stream_closes_the_session(mut harness: Harness) {
    harness.remote.close();
    assert!(harness.poll().closed);
    assert_eq!(harness.recorder.disconnects, 1);
}

#[test]
fn repeated_critical_failures_mark_the_peer_unresponsive() {
    let config = SessionConfig::builder()
        .queue_capacity(2)
        .unresponsive_after(2)
        .build()
        .expect("valid");
    let mut harness = Harness::new(&config);
    harness.session.send(b"1", Priority::Critical).expect("space");
    harness.session.send(b"2", Priority::Critical).expect("space");

    let first = harness
        .session
        .send(b"3", Priority::Critical)
        .expect_err("full");
    assert!(first.is_would_block());
    let second = harness
        .session
        .send(b"4", Priority::Critical)
        .expect_err("still full");
    assert!(matches!(
        second,
        Error::PeerUnresponsive { failures: 2, .. }
    ));
}

#[test]
fn low_priority_is_rejected_under_heavy_pressure() {
    let config = SessionConfig::builder()
        .queue_capacity(4)
        .build()
        .expect("valid");
    let mut harness = Harness::new(&config);
    for payload in [b"a", b"b", b"c"] {
        harness.session.send(payload, Priority::Normal).expect("space");
    }
    let err = harness
        .session
        .send(b"d", Priority::Low)
        .expect_err("heavy");
    assert!(matches!(err, Error::Flow(_)));
    harness.session.send(b"d", Priority::High).expect("admitted");
}

#[rstest]
fn transport_failure_surfaces_from_poll(mut harness: Harness) {
    harness.session.send(b"doomed", Priority::Normal).expect("queued");
    harness.session.transport_mut().set_write_failing(true);
    let err = harness
        .session
        .poll(&mut harness.recorder)
        .expect_err("broken pipe");
    assert!(matches!(err, Error::Io(_)));
    assert_eq!(harness.session.pending_batch(), 0);
}


#[test]
#[tracing_test::traced_test]
fn filling_the_send_queue_is_logged() {
    let config = SessionConfig::builder()
        .queue_capacity(8)
        .build()
        .expect("valid");
    let mut harness = Harness::new(&config);
    for byte in 0u8..7 {
        harness.session.send(&[byte], Priority::Normal).expect("admitted");
    }
    assert!(logs_contain("send queue filling"));
}

/// Accepts each frame but holds back its last bytes until flushed, like a
/// socket that took only part of a write.
#[derive(Debug)]
struct ShortWrites {
    inner: MemoryTransport,
    held: Vec<u8>,
}

impl Transport for ShortWrites {
    fn try_write(&mut self, frame: &[u8]) -> std::io::Result<()> {
        if !self.held.is_empty() {
            return Err(std::io::ErrorKind::WouldBlock.into());
        }
        let (now, later) = frame.split_at(frame.len().saturating_sub(3));
        self.inner.try_write(now)?;
        self.held.extend_from_slice(later);
        Ok(())
    }

    fn try_read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> { self.inner.try_read(buf) }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.held.is_empty() {
            self.inner.try_write(&self.held)?;
            self.held.clear();
        }
        Ok(())
    }
}

#[test]
fn held_back_frame_tails_are_flushed_by_later_polls() {
    let (left, right) = MemoryTransport::pair();
    let config = SessionConfig::default();
    let short = ShortWrites {
        inner: left,
        held: Vec::new(),
    };
    let mut a = Session::new(PeerId::new(1), short, &config).expect("a");
    let mut b = Session::new(PeerId::new(2), right, &config).expect("b");
    let mut ignored = Recorder::default();
    let mut received = Recorder::default();

    a.send(b"hello", Priority::Normal).expect("queued");
    for _ in 0..4 {
        a.poll(&mut ignored).expect("a polls");
        b.poll(&mut received).expect("b polls");
    }

    assert_eq!(received.messages, [b"hello".to_vec()]);
    assert!(a.transport().held.is_empty());
}
