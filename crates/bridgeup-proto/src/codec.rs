//! Length-prefixed framing for bridge session messages
//!
//! Each frame is a big-endian `u32` payload length followed by the bincode
//! encoding of one message.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Size of the length header
pub const FRAME_HEADER_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to (de)serialize frame: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Frame of {0} bytes exceeds the {max} byte limit", max = BridgeCodec::MAX_FRAME_LEN)]
    FrameTooLarge(usize),
}

/// Stateless frame encoder/decoder
pub struct BridgeCodec;

impl BridgeCodec {
    /// Largest accepted payload (16 MiB)
    pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

    pub fn encode<T: Serialize>(msg: &T) -> Result<Bytes, CodecError> {
        let payload = bincode::serialize(msg)?;
        Self::check_len(payload.len())?;

        let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.put_u32(payload.len() as u32);
        frame.put_slice(&payload);
        Ok(frame.freeze())
    }

    /// Take one message off the front of `buf`.
    ///
    /// `Ok(None)` means more bytes are needed; `buf` is left untouched.
    pub fn decode<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, CodecError> {
        let Some(header) = buf.get(..FRAME_HEADER_LEN) else {
            return Ok(None);
        };
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        Self::check_len(len)?;

        if buf.len() < FRAME_HEADER_LEN + len {
            buf.reserve(FRAME_HEADER_LEN + len - buf.len());
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_LEN);
        let payload = buf.split_to(len);
        Ok(Some(bincode::deserialize(&payload)?))
    }

    fn check_len(len: usize) -> Result<(), CodecError> {
        if len > Self::MAX_FRAME_LEN {
            return Err(CodecError::FrameTooLarge(len));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::BridgeMessage;

    #[test]
    fn test_partial_frame_waits_for_more() {
        let msg = BridgeMessage::Ping { timestamp: 67890 };
        let frame = BridgeCodec::encode(&msg).unwrap();

        let mut buf = BytesMut::from(&frame[..3]);
        assert_eq!(BridgeCodec::decode::<BridgeMessage>(&mut buf).unwrap(), None);

        buf.extend_from_slice(&frame[3..frame.len() - 1]);
        assert_eq!(BridgeCodec::decode::<BridgeMessage>(&mut buf).unwrap(), None);

        buf.extend_from_slice(&frame[frame.len() - 1..]);
        assert_eq!(
            BridgeCodec::decode::<BridgeMessage>(&mut buf).unwrap(),
            Some(msg)
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_back_to_back_frames() {
        let first = BridgeMessage::Ack;
        let second = BridgeMessage::Open {
            stream_id: 7,
            mode: crate::messages::TunnelMode::Udp,
            target: "127.0.0.1:22".to_string(),
        };

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&BridgeCodec::encode(&first).unwrap());
        buf.extend_from_slice(&BridgeCodec::encode(&second).unwrap());

        assert_eq!(BridgeCodec::decode(&mut buf).unwrap(), Some(first));
        assert_eq!(BridgeCodec::decode(&mut buf).unwrap(), Some(second));
        assert_eq!(BridgeCodec::decode::<BridgeMessage>(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_oversized_header_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(u32::MAX);
        assert!(matches!(
            BridgeCodec::decode::<BridgeMessage>(&mut buf),
            Err(CodecError::FrameTooLarge(_))
        ));
    }
}
