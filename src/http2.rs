//! `Http2Frames`: a producer-only HTTP/2 frame encoder.
//!
//! CoreDeviceProxy and the RemoteXPC services it fronts run their
//! actual payloads over an HTTP/2 connection used purely as a framing
//! and multiplexing layer; nothing here parses inbound frames or
//! implements flow control, settings negotiation, or HPACK. Callers
//! that need to read frames back decode them with the same layout
//! this module writes.
//!
//! Grounded on the byte-at-a-time header assembly style already used
//! by `LengthSplitter`/`MuxClient`'s envelope writers (explicit
//! big-endian field widths, no external HTTP/2 crate), generalized to
//! HTTP/2's 9-byte frame header.

use log::trace;

use crate::error::{Error, Result};

/// The fixed client connection preface HTTP/2 requires before any
/// framed traffic.
pub const CLIENT_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Frame types this crate ever needs to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// `DATA (0x0)`.
    Data,
    /// `HEADERS (0x1)`.
    Headers,
    /// `SETTINGS (0x4)`.
    Settings,
    /// `WINDOW_UPDATE (0x8)`.
    WindowUpdate,
}

impl FrameType {
    fn code(self) -> u8 {
        match self {
            FrameType::Data => 0x0,
            FrameType::Headers => 0x1,
            FrameType::Settings => 0x4,
            FrameType::WindowUpdate => 0x8,
        }
    }
}

/// `END_STREAM`, bit 0 of the frame flags octet.
pub const FLAG_END_STREAM: u8 = 0x1;
/// `END_HEADERS`, bit 2 of the frame flags octet (shared with
/// `ACK` on `SETTINGS` frames, which this encoder never sets).
pub const FLAG_END_HEADERS: u8 = 0x4;

/// Maximum frame payload length a conforming peer must accept without
/// having negotiated `SETTINGS_MAX_FRAME_SIZE` upward.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1 << 14;

/// Encodes HTTP/2 frames into a flat byte stream: 3-byte big-endian
/// length, 1-byte type, 1-byte flags, 4-byte stream id (top bit
/// reserved and always clear), followed by the payload.
pub struct Http2Frames;

impl Http2Frames {
    /// Writes one frame. `payload.len()` must fit in 24 bits and not
    /// exceed `DEFAULT_MAX_FRAME_SIZE`; larger payloads are the
    /// caller's job to split across multiple `DATA`/`CONTINUATION`
    /// frames, which this encoder doesn't do since nothing in this
    /// crate's protocol ever needs headers that large.
    pub fn encode_frame(frame_type: FrameType, flags: u8, stream_id: u32, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > DEFAULT_MAX_FRAME_SIZE {
            return Err(Error::codec(format!(
                "HTTP/2 frame payload of {} bytes exceeds the default max frame size",
                payload.len()
            )));
        }
        if stream_id & 0x8000_0000 != 0 {
            return Err(Error::codec("HTTP/2 stream id must not set the reserved top bit"));
        }

        let mut out = Vec::with_capacity(9 + payload.len());
        let len = payload.len() as u32;
        out.extend_from_slice(&len.to_be_bytes()[1..]); // 24-bit length
        out.push(frame_type.code());
        out.push(flags);
        out.extend_from_slice(&stream_id.to_be_bytes());
        out.extend_from_slice(payload);
        trace!(
            "http2: encoded {:?} frame, stream {stream_id}, flags 0x{flags:02x}, {} byte payload",
            frame_type, payload.len()
        );
        Ok(out)
    }

    /// A `SETTINGS` frame on stream 0 carrying zero or more
    /// (identifier, value) pairs, six bytes each.
    pub fn settings(params: &[(u16, u32)]) -> Result<Vec<u8>> {
        let mut payload = Vec::with_capacity(params.len() * 6);
        for (id, value) in params {
            payload.extend_from_slice(&id.to_be_bytes());
            payload.extend_from_slice(&value.to_be_bytes());
        }
        Self::encode_frame(FrameType::Settings, 0, 0, &payload)
    }

    /// An empty `SETTINGS` frame with the `ACK` flag set, acknowledging
    /// the peer's settings frame.
    pub fn settings_ack() -> Result<Vec<u8>> {
        const FLAG_ACK: u8 = 0x1;
        Self::encode_frame(FrameType::Settings, FLAG_ACK, 0, &[])
    }

    /// A connection- or stream-level `WINDOW_UPDATE`, incrementing the
    /// flow-control window by `increment` (top bit reserved, always
    /// clear).
    pub fn window_update(stream_id: u32, increment: u32) -> Result<Vec<u8>> {
        if increment == 0 || increment & 0x8000_0000 != 0 {
            return Err(Error::codec("WINDOW_UPDATE increment must be nonzero and fit 31 bits"));
        }
        Self::encode_frame(FrameType::WindowUpdate, 0, stream_id, &increment.to_be_bytes())
    }

    /// A `HEADERS` frame carrying an already-HPACK-encoded block,
    /// ending both the header block and (when `end_stream` is set)
    /// the stream itself.
    pub fn headers(stream_id: u32, header_block: &[u8], end_stream: bool) -> Result<Vec<u8>> {
        if stream_id == 0 {
            return Err(Error::codec("HEADERS frame requires a nonzero stream id"));
        }
        let mut flags = FLAG_END_HEADERS;
        if end_stream {
            flags |= FLAG_END_STREAM;
        }
        Self::encode_frame(FrameType::Headers, flags, stream_id, header_block)
    }

    /// A `DATA` frame, optionally ending the stream.
    pub fn data(stream_id: u32, payload: &[u8], end_stream: bool) -> Result<Vec<u8>> {
        if stream_id == 0 {
            return Err(Error::codec("DATA frame requires a nonzero stream id"));
        }
        let flags = if end_stream { FLAG_END_STREAM } else { 0 };
        Self::encode_frame(FrameType::Data, flags, stream_id, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_the_nine_byte_header_correctly() {
        let frame = Http2Frames::encode_frame(FrameType::Data, FLAG_END_STREAM, 7, b"hi").unwrap();
        assert_eq!(&frame[0..3], &[0, 0, 2]); // 24-bit length = 2
        assert_eq!(frame[3], 0x0); // DATA
        assert_eq!(frame[4], FLAG_END_STREAM);
        assert_eq!(&frame[5..9], &7u32.to_be_bytes());
        assert_eq!(&frame[9..], b"hi");
    }

    #[test]
    fn settings_frame_packs_pairs_as_six_byte_tuples() {
        let frame = Http2Frames::settings(&[(0x3, 100), (0x4, 65535)]).unwrap();
        assert_eq!(&frame[0..3], &[0, 0, 12]); // two six-byte pairs
        assert_eq!(frame[3], 0x4); // SETTINGS
        assert_eq!(&frame[9..11], &0x3u16.to_be_bytes());
        assert_eq!(&frame[11..15], &100u32.to_be_bytes());
    }

    #[test]
    fn headers_sets_end_headers_always_and_end_stream_conditionally() {
        let with_body = Http2Frames::headers(1, b"block", false).unwrap();
        assert_eq!(with_body[4], FLAG_END_HEADERS);

        let without_body = Http2Frames::headers(1, b"block", true).unwrap();
        assert_eq!(without_body[4], FLAG_END_HEADERS | FLAG_END_STREAM);
    }

    #[test]
    fn rejects_headers_and_data_on_the_control_stream() {
        assert!(Http2Frames::headers(0, b"x", false).is_err());
        assert!(Http2Frames::data(0, b"x", false).is_err());
    }

    #[test]
    fn rejects_oversized_payloads() {
        let too_big = vec![0u8; DEFAULT_MAX_FRAME_SIZE + 1];
        let err = Http2Frames::encode_frame(FrameType::Data, 0, 1, &too_big).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn window_update_rejects_a_zero_increment() {
        assert!(Http2Frames::window_update(0, 0).is_err());
    }
}
