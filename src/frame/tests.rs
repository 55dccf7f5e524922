//! Unit tests for envelope framing.

use bytes::{BufMut, BytesMut};
use rstest::{fixture, rstest};
use tokio_util::codec::{Decoder, Encoder};

use super::{
    CodecError,
    Envelope,
    EnvelopeCodec,
    EnvelopeHeader,
    FRAME_OVERHEAD,
    HEADER_LEN,
    MessageFlags,
    MessageType,
    crc16,
    encode_frame,
};
use crate::error::ErrorKind;

#[fixture]
fn codec() -> EnvelopeCodec { EnvelopeCodec::new(512) }

fn frame(kind: MessageType, flags: MessageFlags, sequence: u8, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::new();
    let header = EnvelopeHeader::new(kind)
        .with_flags(flags)
        .with_sequence(sequence);
    encode_frame(header, payload, &mut buf).expect("encode");
    buf
}

#[test]
fn header_layout_is_network_order() {
    let buf = frame(MessageType::Data, MessageFlags::BATCH, 9, &[0xab; 0x0102]);
    assert_eq!(&buf[..HEADER_LEN], &[b'P', b'T', b'M', b'G', 1, 1, 0x08, 9, 0x01, 0x02]);
    let body_end = buf.len() - 2;
    let crc = crc16(&buf[..body_end]);
    assert_eq!(&buf[body_end..], &crc.to_be_bytes());
}

#[rstest]
fn decodes_what_it_encodes(mut codec: EnvelopeCodec) {
    let mut buf = BytesMut::new();
    let envelope = Envelope::new(
        EnvelopeHeader::new(MessageType::Capability).with_sequence(3),
        &b"caps"[..],
    );
    codec.encode(envelope.clone(), &mut buf).expect("encode");
    assert_eq!(codec.decode(&mut buf).expect("decode"), Some(envelope));
    assert!(buf.is_empty());
}

#[rstest]
fn waits_for_complete_frame(mut codec: EnvelopeCodec) {
    let full = frame(MessageType::Data, MessageFlags::empty(), 1, b"partial");
    let mut buf = BytesMut::new();
    for byte in &full[..full.len() - 1] {
        buf.put_u8(*byte);
        assert_eq!(codec.decode(&mut buf).expect("no error yet"), None);
    }
    buf.put_u8(full[full.len() - 1]);
    let decoded = codec.decode(&mut buf).expect("decode").expect("complete");
    assert_eq!(&decoded.payload[..], b"partial");
}

#[rstest]
fn resynchronises_after_garbage(mut codec: EnvelopeCodec) {
    let mut buf = BytesMut::from(&b"xxPTjunk"[..]);
    buf.extend_from_slice(&frame(MessageType::Ping, MessageFlags::empty(), 0, b""));

    let err = codec.decode(&mut buf).expect_err("garbage first");
    assert!(matches!(err, CodecError::BadMagic { skipped: 8 }));
    let decoded = codec.decode(&mut buf).expect("decode").expect("frame");
    assert_eq!(decoded.header.kind, MessageType::Ping);
}

#[rstest]
fn partial_magic_at_buffer_end_is_kept(mut codec: EnvelopeCodec) {
    let mut buf = BytesMut::from(&b"zzPT"[..]);
    let err = codec.decode(&mut buf).expect_err("garbage");
    assert!(matches!(err, CodecError::BadMagic { skipped: 2 }));
    assert_eq!(&buf[..], b"PT");
    assert_eq!(codec.decode(&mut buf).expect("waits"), None);
}

#[rstest]
fn checksum_mismatch_drops_only_that_frame(mut codec: EnvelopeCodec) {
    let mut buf = frame(MessageType::Data, MessageFlags::empty(), 1, b"corrupt me");
    buf[HEADER_LEN] ^= 0xff;
    buf.extend_from_slice(&frame(MessageType::Data, MessageFlags::empty(), 2, b"fine"));

    let err = codec.decode(&mut buf).expect_err("checksum");
    assert!(matches!(err, CodecError::ChecksumMismatch { .. }));
    assert_eq!(err.kind(), ErrorKind::Protocol);
    let next = codec.decode(&mut buf).expect("decode").expect("frame");
    assert_eq!(next.header.sequence, 2);
}

#[rstest]
#[case::version(4, 9, CodecErrorKind::Version)]
#[case::message_type(5, 42, CodecErrorKind::Type)]
fn rejects_bad_header_fields(
    mut codec: EnvelopeCodec,
    #[case] offset: usize,
    #[case] value: u8,
    #[case] expected: CodecErrorKind,
) {
    let mut buf = frame(MessageType::Data, MessageFlags::empty(), 0, b"abc");
    buf[offset] = value;
    let body_end = buf.len() - 2;
    let crc = crc16(&buf[..body_end]).to_be_bytes();
    buf[body_end..].copy_from_slice(&crc);

    let err = codec.decode(&mut buf).expect_err("bad header");
    match expected {
        CodecErrorKind::Version => {
            assert!(matches!(err, CodecError::UnsupportedVersion { version: 9 }));
        }
        CodecErrorKind::Type => {
            assert!(matches!(err, CodecError::UnknownMessageType { type_id: 42 }));
        }
    }
    assert!(buf.is_empty(), "whole frame skipped");
}

#[derive(Clone, Copy, Debug)]
enum CodecErrorKind {
    Version,
    Type,
}

#[rstest]
fn oversized_length_is_rejected(mut codec: EnvelopeCodec) {
    let mut buf = frame(MessageType::Data, MessageFlags::empty(), 0, &[0; 600]);
    let err = codec.decode(&mut buf).expect_err("too large");
    assert!(matches!(err, CodecError::OversizedFrame { size: 600, max: 512 }));

    let envelope = Envelope::new(EnvelopeHeader::new(MessageType::Data), vec![0; 513]);
    assert!(matches!(
        codec.encode(envelope, &mut BytesMut::new()),
        Err(CodecError::OversizedFrame { .. })
    ));
}

#[rstest]
fn eof_mid_frame_reports_truncation(mut codec: EnvelopeCodec) {
    let full = frame(MessageType::Data, MessageFlags::empty(), 0, b"0123456789");
    let mut buf = BytesMut::from(&full[..15]);
    let err = codec.decode_eof(&mut buf).expect_err("truncated");
    assert!(matches!(
        err,
        CodecError::Truncated {
            have: 15,
            need
        } if need == FRAME_OVERHEAD + 10
    ));
    assert!(buf.is_empty());
    assert_eq!(codec.decode_eof(&mut buf).expect("clean"), None);
}

#[test]
fn message_types_round_trip() {
    for id in 1..=7 {
        let kind = MessageType::from_u8(id).expect("known type");
        assert_eq!(kind.as_u8(), id);
    }
    assert_eq!(MessageType::from_u8(0), None);
    assert_eq!(MessageType::from_u8(8), None);
}
