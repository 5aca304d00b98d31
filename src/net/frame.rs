//! Length-prefixed frame codec
//!
//! Frames are `[length: u32 le][correlation id: i32 le][payload]` with the
//! length counting the entire frame. Encoding is a single allocation;
//! decoding is a pull-style state machine fed from one connection's reads,
//! buffering partial headers and payloads across pushes.

use super::error::NetError;
use super::wire::{FRAME_HEADER_SIZE, LENGTH_FIELD_SIZE, MIN_FRAME_SIZE};
use bytes::{Buf, Bytes, BytesMut};

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub correlation_id: i32,
    pub payload: Bytes,
}

/// Encode a payload into a complete frame.
pub fn encode_frame(correlation_id: i32, payload: &[u8]) -> Vec<u8> {
    let total = payload.len() + FRAME_HEADER_SIZE;
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&correlation_id.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Streaming frame decoder for a single connection.
///
/// Bytes from successive reads are pushed in; complete frames are pulled
/// out in arrival order. Never shared between connections: the internal
/// buffer holds one socket's byte stream only.
pub struct FrameDecoder {
    buf: BytesMut,
    /// Largest acceptable total frame size (payload cap plus header).
    max_frame: usize,
}

impl FrameDecoder {
    /// `max_message_size` caps the decoded payload, header excluded.
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_frame: max_message_size.saturating_add(FRAME_HEADER_SIZE),
        }
    }

    /// Append freshly read bytes to the stream buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Buffer for the next socket read. Appended bytes become visible to
    /// `next` immediately.
    pub fn read_buf(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Pull the next complete frame, if one is buffered.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A declared length
    /// at or below the header size, or above the configured cap, is a
    /// protocol violation.
    pub fn next(&mut self) -> Result<Option<Frame>, NetError> {
        if self.buf.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        let declared = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;

        if declared < MIN_FRAME_SIZE {
            return Err(NetError::protocol(format!("frame length {} too small", declared)));
        }
        if declared > self.max_frame {
            return Err(NetError::protocol(format!(
                "frame length {} exceeds limit {}",
                declared, self.max_frame
            )));
        }

        if self.buf.len() < declared {
            return Ok(None);
        }

        let mut frame = self.buf.split_to(declared);
        frame.advance(LENGTH_FIELD_SIZE);
        let correlation_id = i32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
        frame.advance(4);

        Ok(Some(Frame {
            correlation_id,
            payload: frame.freeze(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        let payload = b"\x01get k1 k2";
        let wire = encode_frame(42, payload);
        assert_eq!(wire.len(), payload.len() + FRAME_HEADER_SIZE);

        let mut dec = FrameDecoder::new(1024);
        dec.push(&wire);
        let frame = dec.next().unwrap().unwrap();
        assert_eq!(frame.correlation_id, 42);
        assert_eq!(&frame.payload[..], payload);
        assert!(dec.next().unwrap().is_none());
    }

    #[test]
    fn test_partial_header_then_payload() {
        let wire = encode_frame(-7, b"\x00hello");
        let mut dec = FrameDecoder::new(1024);

        // Feed two bytes at a time; no frame until the last push.
        for chunk in wire.chunks(2) {
            assert!(dec.next().unwrap().is_none() || chunk.is_empty());
            dec.push(chunk);
        }

        let frame = dec.next().unwrap().unwrap();
        assert_eq!(frame.correlation_id, -7);
        assert_eq!(&frame.payload[..], b"\x00hello");
    }

    #[test]
    fn test_two_frames_in_one_push() {
        let mut wire = encode_frame(1, b"\x00a");
        wire.extend_from_slice(&encode_frame(2, b"\x00b"));

        let mut dec = FrameDecoder::new(1024);
        dec.push(&wire);
        assert_eq!(dec.next().unwrap().unwrap().correlation_id, 1);
        assert_eq!(dec.next().unwrap().unwrap().correlation_id, 2);
        assert!(dec.next().unwrap().is_none());
    }

    #[test]
    fn test_empty_payload_frame() {
        // Smallest legal frame: header only, zero-length payload. The
        // dispatcher rejects it later; the decoder passes it through.
        let wire = encode_frame(5, b"");
        let mut dec = FrameDecoder::new(1024);
        dec.push(&wire);
        let frame = dec.next().unwrap().unwrap();
        assert_eq!(frame.correlation_id, 5);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_undersized_length_rejected() {
        let mut dec = FrameDecoder::new(1024);
        dec.push(&3u32.to_le_bytes());
        assert!(matches!(dec.next(), Err(NetError::Protocol(_))));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut dec = FrameDecoder::new(16);
        dec.push(&1_000u32.to_le_bytes());
        assert!(matches!(dec.next(), Err(NetError::Protocol(_))));
    }

    #[test]
    fn test_at_limit_accepted() {
        let payload = vec![0u8; 16];
        let wire = encode_frame(9, &payload);
        let mut dec = FrameDecoder::new(16);
        dec.push(&wire);
        assert_eq!(dec.next().unwrap().unwrap().payload.len(), 16);
    }
}
