//! C1: the wire frame codec.
//!
//! A frame is a ZeroMQ `(topic, message, extra)` triple flattened into a
//! single binary WebSocket message: a 4-byte little-endian `topic_len`, a
//! 4-byte little-endian `body_len`, then `topic`, then the serialized
//! message (`body`), then whatever remains to the end of the payload is
//! `extra`. `pack`/`unpack` are exact inverses for any frame that fits
//! within `max_frame_size`.

use crate::error::{CloudPinError, MalformedFrameError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Two little-endian `u32` length prefixes: `topic_len`, `body_len`.
const HEADER_LEN: usize = 8;

/// One message crossing the bridge, still attached to its ZeroMQ envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub topic: Bytes,
    pub message: Bytes,
    pub extra: Bytes,
}

impl Frame {
    pub fn new(topic: Bytes, message: Bytes, extra: Bytes) -> Self {
        Self {
            topic,
            message,
            extra,
        }
    }

    /// Total size this frame would occupy on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.topic.len() + self.message.len() + self.extra.len()
    }

    /// Encode as a single contiguous buffer suitable for a binary WS message.
    ///
    /// Rejects (rather than truncates) frames whose encoded size would
    /// exceed `max_frame_size` -- the resolution of the design notes' open
    /// question about an unbounded `extra` field.
    pub fn pack(&self, max_frame_size: usize) -> Result<Bytes, CloudPinError> {
        let len = self.wire_len();
        if len > max_frame_size {
            return Err(CloudPinError::MalformedFrame(MalformedFrameError::new(
                format!("encoded frame size {len} exceeds max_frame_size {max_frame_size}"),
            )));
        }
        if self.topic.len() > u32::MAX as usize || self.message.len() > u32::MAX as usize {
            return Err(CloudPinError::MalformedFrame(MalformedFrameError::new(
                "topic or message length does not fit in a u32 length prefix",
            )));
        }
        let mut buf = BytesMut::with_capacity(len);
        buf.put_u32_le(self.topic.len() as u32);
        buf.put_u32_le(self.message.len() as u32);
        buf.put_slice(&self.topic);
        buf.put_slice(&self.message);
        buf.put_slice(&self.extra);
        Ok(buf.freeze())
    }

    /// Decode a frame previously produced by [`Frame::pack`].
    pub fn unpack(mut bytes: Bytes, max_frame_size: usize) -> Result<Frame, CloudPinError> {
        if bytes.len() > max_frame_size {
            return Err(CloudPinError::MalformedFrame(MalformedFrameError::new(
                format!(
                    "received frame size {} exceeds max_frame_size {max_frame_size}",
                    bytes.len()
                ),
            )));
        }
        if bytes.len() < HEADER_LEN {
            return Err(CloudPinError::MalformedFrame(MalformedFrameError::new(
                "frame shorter than the 8 byte topic_len/body_len header",
            )));
        }
        let topic_len = bytes.get_u32_le() as usize;
        let body_len = bytes.get_u32_le() as usize;
        let remaining = bytes.len();
        let needed = topic_len
            .checked_add(body_len)
            .ok_or_else(|| malformed("topic_len + body_len overflows"))?;
        if needed > remaining {
            return Err(malformed(format!(
                "topic_len {topic_len} + body_len {body_len} exceeds remaining payload {remaining}"
            )));
        }
        let topic = bytes.split_to(topic_len);
        let message = bytes.split_to(body_len);
        let extra = bytes;
        Ok(Frame {
            topic,
            message,
            extra,
        })
    }
}

fn malformed(message: impl Into<String>) -> CloudPinError {
    CloudPinError::MalformedFrame(MalformedFrameError::new(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(topic: &str, message: &str, extra: &str) -> Frame {
        Frame::new(
            Bytes::copy_from_slice(topic.as_bytes()),
            Bytes::copy_from_slice(message.as_bytes()),
            Bytes::copy_from_slice(extra.as_bytes()),
        )
    }

    #[test]
    fn pack_unpack_round_trip() {
        let f = frame("camera.1", "hello world", "sidecar");
        let packed = f.pack(1024).unwrap();
        let unpacked = Frame::unpack(packed, 1024).unwrap();
        assert_eq!(unpacked, f);
    }

    #[test]
    fn pack_unpack_round_trip_with_empty_extra() {
        let f = frame("abc", "hello", "");
        let packed = f.pack(1024).unwrap();
        let unpacked = Frame::unpack(packed, 1024).unwrap();
        assert_eq!(unpacked, f);
    }

    #[test]
    fn pack_rejects_oversize_frame() {
        let f = frame("t", &"x".repeat(100), "");
        let err = f.pack(16).unwrap_err();
        assert!(matches!(err, CloudPinError::MalformedFrame(_)));
    }

    #[test]
    fn unpack_rejects_truncated_header() {
        let err = Frame::unpack(Bytes::from_static(&[1, 2, 3]), 1024).unwrap_err();
        assert!(matches!(err, CloudPinError::MalformedFrame(_)));
    }

    #[test]
    fn unpack_rejects_inconsistent_lengths() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(1000);
        buf.put_u32_le(0);
        buf.put_slice(b"short");
        let err = Frame::unpack(buf.freeze(), 1024).unwrap_err();
        assert!(matches!(err, CloudPinError::MalformedFrame(_)));
    }

    #[test]
    fn unpack_rejects_payload_over_max_frame_size() {
        let f = frame("t", &"x".repeat(100), "");
        let packed = f.pack(1024).unwrap();
        let err = Frame::unpack(packed, 16).unwrap_err();
        assert!(matches!(err, CloudPinError::MalformedFrame(_)));
    }
}
