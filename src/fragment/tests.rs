//! Unit tests for fragmentation and reassembly.

use std::time::{Duration, Instant};

use proptest::prelude::*;
use rstest::{fixture, rstest};

use super::{
    FRAGMENT_HEADER_LEN,
    FragmentFlags,
    FragmentHeader,
    FragmentationError,
    Fragmenter,
    MessageId,
    ReassemblyError,
    Reassembler,
    fragment_count,
};
use crate::direct::ReceiveBuffer;

#[fixture]
fn buffer() -> ReceiveBuffer { ReceiveBuffer::with_capacity(4096).expect("receive buffer") }

fn header(id: u16, total: u16, offset: u16, flags: FragmentFlags) -> FragmentHeader {
    FragmentHeader::new(MessageId::new(id), total, offset, flags)
}

fn encode_all(payload: &[u8], max_fragment: usize) -> Vec<Vec<u8>> {
    let mut fragmenter = Fragmenter::new();
    fragmenter
        .split(payload, max_fragment)
        .expect("split")
        .map(|fragment| {
            let mut slot = vec![0u8; fragment.encoded_len()];
            fragment.write_to(&mut slot).expect("write");
            slot
        })
        .collect()
}

#[test]
fn header_round_trips_through_wire_layout() {
    let original = header(0x0102, 2000, 248, FragmentFlags::LAST);
    let mut buf = [0u8; FRAGMENT_HEADER_LEN + 3];
    assert_eq!(original.write_to(&mut buf).expect("encode"), FRAGMENT_HEADER_LEN);
    assert_eq!(&buf[..FRAGMENT_HEADER_LEN], &[1, 2, 0x07, 0xd0, 0, 248, 0x02, 0]);
    buf[FRAGMENT_HEADER_LEN..].copy_from_slice(b"abc");

    let (decoded, body) = FragmentHeader::parse(&buf).expect("decode");
    assert_eq!(decoded, original);
    assert_eq!(body, b"abc");
}

#[test]
fn unknown_flag_bits_survive_decoding() {
    let mut buf = [0u8; FRAGMENT_HEADER_LEN];
    header(3, 10, 0, FragmentFlags::FIRST | FragmentFlags::LAST)
        .write_to(&mut buf)
        .expect("encode");
    assert_eq!(buf[6], 0x03);
    buf[6] = 0x81;

    let (decoded, _) = FragmentHeader::parse(&buf).expect("decode");
    assert!(decoded.is_first());
    assert!(!decoded.is_last());
    assert_eq!(decoded.flags().bits(), 0x81);
}

#[test]
fn fragment_write_reports_short_destination() {
    let mut fragmenter = Fragmenter::new();
    let fragment = fragmenter
        .split(b"0123456789", 64)
        .expect("split")
        .next()
        .expect("one fragment");
    let mut short = [0u8; FRAGMENT_HEADER_LEN + 4];
    let err = fragment.write_to(&mut short).expect_err("body does not fit");
    assert!(matches!(err, FragmentationError::ChunkTooSmall(12)));
}

#[test]
fn short_payload_has_no_header() {
    assert_eq!(
        FragmentHeader::parse(&[0; 5]),
        Err(ReassemblyError::MalformedHeader { len: 5 })
    );
}

#[test]
fn splits_into_flagged_slot_sized_fragments() {
    let payload: Vec<u8> = (0..2000u16).map(|i| (i % 251) as u8).collect();
    let mut fragmenter = Fragmenter::new();
    let fragments: Vec<_> = fragmenter.split(&payload, 256).expect("split").collect();

    assert_eq!(fragments.len(), 9);
    assert_eq!(fragment_count(payload.len(), 256), Some(9));
    assert!(fragments[0].header().is_first());
    assert!(fragments.iter().skip(1).all(|f| !f.header().is_first()));
    assert!(fragments[8].header().is_last());
    assert_eq!(fragments[8].body().len(), 2000 - 8 * 248);
    assert!(fragments.iter().all(|f| f.encoded_len() <= 256));
    assert_eq!(fragments[3].header().offset(), 3 * 248);
}

#[test]
fn message_ids_advance_and_wrap() {
    let mut fragmenter = Fragmenter::with_starting_id(MessageId::new(u16::MAX));
    let first = fragmenter.split(b"a", 64).expect("split").message_id();
    let second = fragmenter.split(b"b", 64).expect("split").message_id();
    assert_eq!(first.get(), u16::MAX);
    assert_eq!(second.get(), 0);
}

#[rstest]
#[case(8)]
#[case(3)]
fn rejects_chunks_without_room_for_body(#[case] max_fragment: usize) {
    let err = Fragmenter::new()
        .split(b"data", max_fragment)
        .expect_err("chunk too small");
    assert!(matches!(err, FragmentationError::ChunkTooSmall(n) if n == max_fragment));
}

#[test]
fn rejects_messages_beyond_u16_length() {
    let payload = vec![0u8; usize::from(u16::MAX) + 1];
    let err = Fragmenter::new().split(&payload, 256).expect_err("too large");
    assert!(matches!(err, FragmentationError::MessageTooLarge { .. }));
}

#[rstest]
fn reassembles_in_order_fragments(mut buffer: ReceiveBuffer) {
    let payload: Vec<u8> = (0..1000u16).map(|i| i as u8).collect();
    let mut reassembler = Reassembler::default();
    let now = Instant::now();
    let fragments = encode_all(&payload, 200);
    let (last, rest) = fragments.split_last().expect("fragments");

    for fragment in rest {
        let (header, body) = FragmentHeader::parse(fragment).expect("parse");
        assert_eq!(reassembler.push_at(header, body, &mut buffer, now), Ok(None));
    }
    let (header, body) = FragmentHeader::parse(last).expect("parse");
    let delivered = reassembler
        .push_at(header, body, &mut buffer, now)
        .expect("valid")
        .expect("complete");
    assert_eq!(delivered, payload.as_slice());
    assert!(!reassembler.is_active());
}

#[rstest]
fn first_fragment_replaces_message_in_progress(mut buffer: ReceiveBuffer) {
    let mut reassembler = Reassembler::default();
    let now = Instant::now();
    reassembler
        .push_at(header(1, 20, 0, FragmentFlags::FIRST), &[1; 10], &mut buffer, now)
        .expect("first");

    let replaced = reassembler
        .push_at(
            header(2, 4, 0, FragmentFlags::FIRST | FragmentFlags::LAST),
            b"new!",
            &mut buffer,
            now,
        )
        .expect("replacement");
    assert_eq!(replaced, Some(&b"new!"[..]));

    let stale = reassembler.push_at(header(1, 20, 10, FragmentFlags::LAST), &[1; 10], &mut buffer, now);
    assert_eq!(
        stale,
        Err(ReassemblyError::NoActiveMessage {
            message_id: MessageId::new(1)
        })
    );
}

#[rstest]
#[case::gap(
    header(7, 30, 15, FragmentFlags::empty()),
    ReassemblyError::OffsetMismatch { expected: 10, found: 15 }
)]
#[case::other_message(
    header(8, 30, 10, FragmentFlags::empty()),
    ReassemblyError::MessageMismatch { expected: MessageId::new(7), found: MessageId::new(8) }
)]
#[case::short_last(
    header(7, 30, 10, FragmentFlags::LAST),
    ReassemblyError::LengthMismatch { total: 30, received: 20 }
)]
#[case::changed_total(
    header(7, 40, 10, FragmentFlags::empty()),
    ReassemblyError::LengthMismatch { total: 30, received: 20 }
)]
fn sequencing_violations_reset_state(
    mut buffer: ReceiveBuffer,
    #[case] bad: FragmentHeader,
    #[case] expected: ReassemblyError,
) {
    let mut reassembler = Reassembler::default();
    let now = Instant::now();
    reassembler
        .push_at(header(7, 30, 0, FragmentFlags::FIRST), &[0; 10], &mut buffer, now)
        .expect("first");

    assert_eq!(reassembler.push_at(bad, &[0; 10], &mut buffer, now), Err(expected));
    assert!(!reassembler.is_active());
    assert!(buffer.is_empty());
}

#[rstest]
fn overlong_fragment_is_rejected(mut buffer: ReceiveBuffer) {
    let mut reassembler = Reassembler::default();
    let result = reassembler.push_at(
        header(3, 4, 0, FragmentFlags::FIRST | FragmentFlags::LAST),
        b"too long",
        &mut buffer,
        Instant::now(),
    );
    assert_eq!(
        result,
        Err(ReassemblyError::LengthMismatch {
            total: 4,
            received: 8
        })
    );
}

#[test]
fn message_larger_than_receive_buffer_is_rejected() {
    let mut buffer = ReceiveBuffer::with_capacity(256).expect("receive buffer");
    let mut reassembler = Reassembler::default();
    let result = reassembler.push_at(
        header(4, 1000, 0, FragmentFlags::FIRST),
        &[0; 100],
        &mut buffer,
        Instant::now(),
    );
    assert!(matches!(
        result,
        Err(ReassemblyError::MessageTooLarge {
            total: 1000,
            capacity: 256,
            ..
        })
    ));
}

#[rstest]
fn partial_message_expires(mut buffer: ReceiveBuffer) {
    let mut reassembler = Reassembler::new(Duration::from_millis(100));
    let start = Instant::now();
    reassembler
        .push_at(header(5, 20, 0, FragmentFlags::FIRST), &[0; 10], &mut buffer, start)
        .expect("first");

    assert_eq!(reassembler.purge_expired_at(start + Duration::from_millis(99)), None);
    let late = reassembler.push_at(
        header(5, 20, 10, FragmentFlags::LAST),
        &[0; 10],
        &mut buffer,
        start + Duration::from_millis(100),
    );
    assert!(matches!(late, Err(ReassemblyError::NoActiveMessage { .. })));
}

proptest! {
    #[test]
    fn arbitrary_payloads_reassemble(
        payload in proptest::collection::vec(any::<u8>(), 1..4096),
        max_fragment in 9usize..=256,
    ) {
        let mut buffer = ReceiveBuffer::with_capacity(4096).expect("receive buffer");
        let mut reassembler = Reassembler::default();
        let now = Instant::now();
        let mut delivered = None;
        for fragment in encode_all(&payload, max_fragment) {
            let (header, body) = FragmentHeader::parse(&fragment).expect("parse");
            prop_assert!(delivered.is_none(), "delivered before last fragment");
            delivered = reassembler
                .push_at(header, body, &mut buffer, now)
                .expect("valid sequence")
                .map(<[u8]>::to_vec);
        }
        prop_assert_eq!(delivered, Some(payload));
    }
}
