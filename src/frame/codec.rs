//! `tokio_util` codec for the wire envelope.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{
    CHECKSUM_LEN,
    CodecError,
    Envelope,
    EnvelopeHeader,
    FRAME_OVERHEAD,
    HEADER_LEN,
    MAGIC,
    MessageFlags,
    MessageType,
    PROTOCOL_VERSION,
    crc16,
};
use crate::{
    byte_order::{read_network_u16_at, write_network_u16},
    capability::MAX_MESSAGE_SIZE,
};

const LENGTH_OFFSET: usize = 8;

/// Append one framed envelope to `dst`.
///
/// # Errors
///
/// Returns [`CodecError::PayloadTooLarge`] if `payload` does not fit the
/// 16-bit length field.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use peertalk::frame::{EnvelopeHeader, FRAME_OVERHEAD, MessageType, encode_frame};
///
/// let mut buf = BytesMut::new();
/// encode_frame(EnvelopeHeader::new(MessageType::Ping), &[], &mut buf).expect("encodes");
/// assert_eq!(buf.len(), FRAME_OVERHEAD);
/// assert_eq!(&buf[..4], b"PTMG");
/// ```
pub fn encode_frame(
    header: EnvelopeHeader,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<(), CodecError> {
    let len = u16::try_from(payload.len()).map_err(|_| CodecError::PayloadTooLarge(payload.len()))?;
    dst.reserve(FRAME_OVERHEAD + payload.len());
    let start = dst.len();
    dst.put_slice(&MAGIC);
    dst.put_u8(PROTOCOL_VERSION);
    dst.put_u8(header.kind.as_u8());
    dst.put_u8(header.flags.bits());
    dst.put_u8(header.sequence);
    dst.put_slice(&write_network_u16(len));
    dst.put_slice(payload);
    let checksum = crc16(&dst[start..]);
    dst.put_slice(&write_network_u16(checksum));
    Ok(())
}

/// Decoder and encoder for envelopes.
///
/// Errors never poison the stream: the read buffer is advanced past the
/// offending bytes first. A bad magic resynchronises to the next candidate
/// magic, an oversized length skips the magic, and checksum, version or type
/// failures skip the whole frame.
#[derive(Clone, Copy, Debug)]
pub struct EnvelopeCodec {
    max_payload: usize,
}

impl Default for EnvelopeCodec {
    fn default() -> Self { Self::new(usize::from(MAX_MESSAGE_SIZE)) }
}

impl EnvelopeCodec {
    /// Create a codec accepting payloads up to `max_payload` bytes.
    #[must_use]
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload: max_payload.min(usize::from(u16::MAX)),
        }
    }

    /// Largest payload this codec accepts.
    #[must_use]
    pub const fn max_payload(&self) -> usize { self.max_payload }
}

fn starts_with_partial_magic(bytes: &[u8]) -> bool {
    let n = bytes.len().min(MAGIC.len());
    bytes[..n] == MAGIC[..n]
}

/// Drop bytes up to the next position that could begin a frame.
fn resync(src: &mut BytesMut) -> usize {
    let skip = (1..src.len())
        .find(|&start| starts_with_partial_magic(&src[start..]))
        .unwrap_or(src.len());
    src.advance(skip);
    skip
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        if !starts_with_partial_magic(src) {
            let skipped = resync(src);
            return Err(CodecError::BadMagic { skipped });
        }
        let Some(len) = read_network_u16_at(src, LENGTH_OFFSET) else {
            return Ok(None);
        };
        let len = usize::from(len);
        if len > self.max_payload {
            src.advance(MAGIC.len());
            return Err(CodecError::OversizedFrame {
                size: len,
                max: self.max_payload,
            });
        }
        let body_end = HEADER_LEN + len;
        let total = body_end + CHECKSUM_LEN;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total);
        let expected = read_network_u16_at(&frame, body_end).unwrap_or_default();
        let actual = crc16(&frame[..body_end]);
        if expected != actual {
            return Err(CodecError::ChecksumMismatch { expected, actual });
        }
        let version = frame[4];
        if version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion { version });
        }
        let type_id = frame[5];
        let kind = MessageType::from_u8(type_id).ok_or(CodecError::UnknownMessageType { type_id })?;
        let header = EnvelopeHeader {
            kind,
            flags: MessageFlags::from_bits_retain(frame[6]),
            sequence: frame[7],
        };

        frame.truncate(body_end);
        frame.advance(HEADER_LEN);
        Ok(Some(Envelope::new(header, frame.freeze())))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let have = src.len();
        let need = read_network_u16_at(src, LENGTH_OFFSET)
            .map_or(HEADER_LEN, |len| FRAME_OVERHEAD + usize::from(len));
        src.clear();
        Err(CodecError::Truncated { have, need })
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.payload.len() > self.max_payload {
            return Err(CodecError::OversizedFrame {
                size: item.payload.len(),
                max: self.max_payload,
            });
        }
        encode_frame(item.header, &item.payload, dst)
    }
}
