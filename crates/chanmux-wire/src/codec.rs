use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CommError, Result};

/// Object frame discriminator.
const OBJECT_DISCRIMINATOR: u8 = 0;

/// Data frame discriminator selecting the extended length tiers.
const EXTENDED_DISCRIMINATOR: u8 = 255;

/// Largest channel+data length encodable in the single-byte tier.
const SHORT_TIER_MAX: usize = 254;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// A decoded frame before object deserialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    /// Serialized object bytes (the envelope carries the channel).
    Object(Bytes),
    /// A channel-tagged byte array.
    Data { channel: u8, payload: Bytes },
}

/// Encode an object frame: discriminator `0`, 4-byte big-endian length, then
/// the serialized object.
pub fn encode_object_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(CommError::WriteNonSerializableObject(format!(
            "serialized object is {} bytes, max {}",
            payload.len(),
            u32::MAX
        )));
    }
    dst.reserve(5 + payload.len());
    dst.put_u8(OBJECT_DISCRIMINATOR);
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Encode a data frame for `channel`.
///
/// The discriminator counts the channel byte plus the data, so the three
/// tiers kick in at channel+data lengths of 254, 65535 and beyond:
///
/// ```text
/// len <= 254:    [len: u8]                  [channel][data]
/// len <= 65535:  [255][len: u16 BE]         [channel][data]
/// otherwise:     [255][0u16][len: u32 BE]   [channel][data]
/// ```
pub fn encode_data_frame(channel: u8, data: &[u8], dst: &mut BytesMut) -> Result<()> {
    let tagged_len = data.len() + 1;
    if tagged_len > u32::MAX as usize {
        return Err(CommError::IoFailedWriting(format!(
            "data payload is {} bytes, max {}",
            data.len(),
            u32::MAX as usize - 1
        )));
    }
    if tagged_len <= SHORT_TIER_MAX {
        dst.reserve(1 + tagged_len);
        dst.put_u8(tagged_len as u8);
    } else if tagged_len <= u16::MAX as usize {
        dst.reserve(3 + tagged_len);
        dst.put_u8(EXTENDED_DISCRIMINATOR);
        dst.put_u16(tagged_len as u16);
    } else {
        dst.reserve(7 + tagged_len);
        dst.put_u8(EXTENDED_DISCRIMINATOR);
        dst.put_u16(0);
        dst.put_u32(tagged_len as u32);
    }
    dst.put_u8(channel);
    dst.put_slice(data);
    Ok(())
}

/// Decode one frame from the front of `src`.
///
/// Returns `Ok(None)` if the buffer does not yet hold a complete frame; on
/// success the frame's bytes are consumed from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<RawFrame>> {
    if src.is_empty() {
        return Ok(None);
    }
    let discriminator = src[0];

    if discriminator == OBJECT_DISCRIMINATOR {
        if src.len() < 5 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        check_payload(len, max_payload)?;
        if src.len() < 5 + len {
            return Ok(None);
        }
        src.advance(5);
        return Ok(Some(RawFrame::Object(src.split_to(len).freeze())));
    }

    let (header_len, tagged_len) = if discriminator < EXTENDED_DISCRIMINATOR {
        (1, discriminator as usize)
    } else {
        if src.len() < 3 {
            return Ok(None);
        }
        let short = u16::from_be_bytes([src[1], src[2]]) as usize;
        if short != 0 {
            (3, short)
        } else {
            if src.len() < 7 {
                return Ok(None);
            }
            let long = u32::from_be_bytes([src[3], src[4], src[5], src[6]]) as usize;
            if long == 0 {
                return Err(CommError::IoFailedReading(
                    "data frame with zero-length channel tag".to_string(),
                ));
            }
            (7, long)
        }
    };

    check_payload(tagged_len, max_payload)?;
    if src.len() < header_len + tagged_len {
        return Ok(None);
    }
    src.advance(header_len);
    let channel = src[0];
    src.advance(1);
    let payload = src.split_to(tagged_len - 1).freeze();
    Ok(Some(RawFrame::Data { channel, payload }))
}

fn check_payload(len: usize, max_payload: usize) -> Result<()> {
    if len > max_payload {
        Err(CommError::IoFailedReading(format!(
            "frame payload is {len} bytes, max {max_payload}"
        )))
    } else {
        Ok(())
    }
}
