//! Control-channel framing.
//!
//! ```text
//! +-------------+----------------+-----------------+
//! | tag (u16 BE) | length (u32 BE) | payload (length) |
//! +-------------+----------------+-----------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::mumble::registry::{Message, MessageKind};
use crate::transport::errors::FrameError;

pub const HEADER_LEN: usize = 6;

/// Largest payload a server will ever send on the control channel.
pub const MAX_PAYLOAD_LEN: usize = 0x7f_ffff;

/// One complete frame whose tag resolved against the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFrame {
    pub kind: MessageKind,
    pub payload: Bytes,
}

#[derive(Debug, Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = RawFrame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RawFrame>, FrameError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let tag = u16::from_be_bytes([src[0], src[1]]);
        let length = u32::from_be_bytes([src[2], src[3], src[4], src[5]]) as usize;

        let kind = MessageKind::from_tag(tag).ok_or(FrameError::UnknownTag(tag))?;
        if length > MAX_PAYLOAD_LEN {
            return Err(FrameError::Oversized {
                size: length,
                max: MAX_PAYLOAD_LEN,
            });
        }

        let total = HEADER_LEN + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total);
        frame.advance(HEADER_LEN);
        Ok(Some(RawFrame {
            kind,
            payload: frame.freeze(),
        }))
    }
}

impl Encoder<&Message> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, message: &Message, dst: &mut BytesMut) -> Result<(), FrameError> {
        let payload = message.encode_payload()?;
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::Oversized {
                size: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }

        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u16(message.kind().tag());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

/// Encodes a single message into a standalone frame ready for writing.
pub fn encode_frame(message: &Message) -> Result<Bytes, FrameError> {
    let mut out = BytesMut::new();
    FrameCodec::new().encode(message, &mut out)?;
    Ok(out.freeze())
}
