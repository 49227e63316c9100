//! Length-prefixed framing for the IPC channel.
//!
//! ```text
//! length:  u32 LE  (payload bytes only, never 0)
//! payload: [u8; length]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::HostError;

/// Size of the length prefix.
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Largest payload accepted in either direction.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Check a payload length against the framing rules.
pub fn validate_length(len: usize, max: usize) -> Result<(), HostError> {
    if len == 0 {
        return Err(HostError::EmptyFrame);
    }
    if len > max {
        return Err(HostError::FrameTooLarge { size: len, max });
    }
    Ok(())
}

/// `tokio_util` codec for `[u32 LE length][payload]` frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Use a smaller frame limit.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = HostError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        let mut length_bytes = [0u8; LENGTH_FIELD_SIZE];
        length_bytes.copy_from_slice(&src[..LENGTH_FIELD_SIZE]);
        let length = u32::from_le_bytes(length_bytes) as usize;

        // Checked before buffering so a hostile length never allocates.
        validate_length(length, self.max_frame_size)?;

        if src.len() < LENGTH_FIELD_SIZE + length {
            src.reserve(LENGTH_FIELD_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        Ok(Some(src.split_to(length).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = HostError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        validate_length(item.len(), self.max_frame_size)?;

        dst.reserve(LENGTH_FIELD_SIZE + item.len());
        dst.put_u32_le(item.len() as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32_le(payload.len() as u32);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn decodes_complete_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = frame(b"hello");
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_partial_header_and_payload() {
        let mut codec = FrameCodec::new();
        let full = frame(b"abcdef");

        let mut buf = BytesMut::from(&full[..2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[2..7]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[7..]);
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"abcdef");
    }

    #[test]
    fn two_frames_in_one_read() {
        let mut codec = FrameCodec::new();
        let mut buf = frame(b"one");
        buf.extend_from_slice(&frame(b"two"));

        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"one");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"two");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_length_is_rejected_before_payload_arrives() {
        let mut codec = FrameCodec::with_max_frame_size(8);
        let mut buf = BytesMut::new();
        buf.put_u32_le(9);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, HostError::FrameTooLarge { size: 9, max: 8 }));
    }

    #[test]
    fn zero_length_is_a_protocol_error() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32_le(0);

        assert!(matches!(codec.decode(&mut buf), Err(HostError::EmptyFrame)));
    }

    #[test]
    fn encoder_writes_length_prefix() {
        let mut codec = FrameCodec::new();
        let mut dst = BytesMut::new();
        codec.encode(Bytes::from_static(b"xyz"), &mut dst).unwrap();
        assert_eq!(&dst[..], &[3, 0, 0, 0, b'x', b'y', b'z']);
    }

    #[test]
    fn encoder_rejects_empty_and_oversized_payloads() {
        let mut codec = FrameCodec::with_max_frame_size(2);
        let mut dst = BytesMut::new();
        assert!(codec.encode(Bytes::new(), &mut dst).is_err());
        assert!(codec.encode(Bytes::from_static(b"abc"), &mut dst).is_err());
        assert!(dst.is_empty());
    }
}
