//! TLV encoding of capability payloads.
//!
//! Each field is `[tag:8][len:8][value]`. Decoders skip unknown tags so
//! newer peers can add fields without breaking older ones.

use bytes::{BufMut, BytesMut};

use super::{CapabilityError, CapabilityFlags, CapabilityMessage};
use crate::byte_order::{read_network_u16, write_network_u16};

const TAG_MAX_MESSAGE: u8 = 1;
const TAG_PREFERRED_CHUNK: u8 = 2;
const TAG_FLAGS: u8 = 3;
const TAG_PRESSURE: u8 = 4;

/// Encoded size of a [`CapabilityMessage`].
pub const CAPABILITY_PAYLOAD_LEN: usize = 3 * 4 + 3;

fn put_u16(dst: &mut BytesMut, tag: u8, value: u16) {
    dst.put_u8(tag);
    dst.put_u8(2);
    dst.put_slice(&write_network_u16(value));
}

pub(super) fn encode(message: &CapabilityMessage, dst: &mut BytesMut) {
    dst.reserve(CAPABILITY_PAYLOAD_LEN);
    put_u16(dst, TAG_MAX_MESSAGE, message.max_message_size);
    put_u16(dst, TAG_PREFERRED_CHUNK, message.preferred_chunk);
    put_u16(dst, TAG_FLAGS, message.flags.bits());
    dst.put_u8(TAG_PRESSURE);
    dst.put_u8(1);
    dst.put_u8(message.buffer_pressure);
}

fn value_u16(tag: u8, value: &[u8]) -> Result<u16, CapabilityError> {
    let bytes: [u8; 2] = value
        .try_into()
        .map_err(|_| CapabilityError::BadLength { tag, len: value.len() })?;
    Ok(read_network_u16(bytes))
}

pub(super) fn decode(mut payload: &[u8]) -> Result<CapabilityMessage, CapabilityError> {
    let mut message = CapabilityMessage::default();
    let mut offset = 0usize;
    while let [tag, len, rest @ ..] = payload {
        let len = usize::from(*len);
        let value = rest
            .get(..len)
            .ok_or(CapabilityError::Truncated { offset })?;
        match *tag {
            TAG_MAX_MESSAGE => message.max_message_size = value_u16(*tag, value)?,
            TAG_PREFERRED_CHUNK => message.preferred_chunk = value_u16(*tag, value)?,
            TAG_FLAGS => message.flags = CapabilityFlags::from_bits_retain(value_u16(*tag, value)?),
            TAG_PRESSURE => {
                let [pressure] = value else {
                    return Err(CapabilityError::BadLength { tag: *tag, len });
                };
                message.buffer_pressure = *pressure;
            }
            _ => {}
        }
        payload = &rest[len..];
        offset += 2 + len;
    }
    if payload.is_empty() {
        Ok(message)
    } else {
        Err(CapabilityError::Truncated { offset })
    }
}
