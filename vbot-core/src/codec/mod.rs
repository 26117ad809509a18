//! `tokio_util` codec for streams carried over a byte pipe (TCP).
//!
//! WebSocket transports get one stream per binary message; a plain byte
//! pipe has no message boundaries, so frames are cut using the total length
//! stored in the stream header.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{self, RpcError};
use crate::stream::BODY_POS;

/// Header offset of the little-endian total length.
const LENGTH_POS: usize = 4;

/// Frames larger than this are rejected before buffering.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Frames raw stream bytes. Integrity is checked one level up.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamCodec;

impl Decoder for StreamCodec {
    type Item = Vec<u8>;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_POS + 4 {
            return Ok(None);
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&src[LENGTH_POS..LENGTH_POS + 4]);
        let length = u32::from_le_bytes(raw) as usize;

        if length < BODY_POS {
            return Err(error::stream().add_debug(format!("frame length {length} is shorter than the header")));
        }
        if length > MAX_FRAME_SIZE {
            return Err(error::stream().add_debug(format!(
                "frame too large: {length} bytes (max {MAX_FRAME_SIZE})"
            )));
        }
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }
        Ok(Some(src.split_to(length).to_vec()))
    }
}

impl Encoder<Vec<u8>> for StreamCodec {
    type Error = RpcError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > MAX_FRAME_SIZE {
            return Err(error::write_stream().add_debug(format!(
                "frame too large: {} bytes (max {MAX_FRAME_SIZE})",
                item.len()
            )));
        }
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Stream;
    use crate::value::Value;

    fn frame(text: &str) -> Vec<u8> {
        let mut s = Stream::new();
        s.write(&Value::from(text)).unwrap();
        s.build_check();
        s.into_bytes()
    }

    #[test]
    fn decode_waits_for_full_frame() {
        let bytes = frame("hello");
        let mut buf = BytesMut::from(&bytes[..10]);
        assert_eq!(StreamCodec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&bytes[10..]);
        assert_eq!(StreamCodec.decode(&mut buf).unwrap(), Some(bytes));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_back_to_back_frames() {
        let a = frame("a");
        let b = frame("bb");
        let mut buf = BytesMut::new();
        StreamCodec.encode(a.clone(), &mut buf).unwrap();
        StreamCodec.encode(b.clone(), &mut buf).unwrap();
        assert_eq!(StreamCodec.decode(&mut buf).unwrap(), Some(a));
        assert_eq!(StreamCodec.decode(&mut buf).unwrap(), Some(b));
        assert_eq!(StreamCodec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn decode_rejects_short_length() {
        let mut bytes = frame("x");
        bytes[4..8].copy_from_slice(&10u32.to_le_bytes());
        let mut buf = BytesMut::from(&bytes[..]);
        assert!(StreamCodec.decode(&mut buf).is_err());
    }

    #[test]
    fn decode_rejects_oversized() {
        let mut bytes = frame("x");
        bytes[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        let mut buf = BytesMut::from(&bytes[..]);
        assert!(StreamCodec.decode(&mut buf).is_err());
    }
}
