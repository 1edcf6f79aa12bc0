//! `LengthSplitter`: a stateful length-prefixed frame demuxer.
//!
//! Both the muxer dialect (little-endian length that *includes* its own
//! header) and the lockdown dialect (big-endian length that covers only
//! the body) are instances of the same shape: a fixed-width length field
//! at a fixed offset, optionally adjusted to account for header bytes
//! the length value does or doesn't count itself. `adjust` is what lets
//! one splitter implementation serve both.
//!
//! Grounded on `peertalk::Packet::from_reader`'s header-then-body read
//! loop, generalized from a single fixed 16-byte header into a
//! configurable length field so it can also drive lockdown's 4-byte-only
//! framing.

use log::{trace, warn};

use crate::error::{Error, Result};

/// Byte order of the length field itself. Payload bytes are passed
/// through untouched regardless of this setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Most significant byte first.
    Big,
    /// Least significant byte first.
    Little,
}

/// Static description of one length-prefixed framing dialect.
#[derive(Debug, Clone, Copy)]
pub struct SplitterConfig {
    /// Byte offset of the length field from the start of the frame.
    pub length_offset: usize,
    /// Width in bytes of the length field (1, 2, 4, or 8).
    pub length_width: usize,
    /// Signed correction applied when computing the total frame size,
    /// to account for whether the length value counts its own header.
    pub adjust: i64,
    /// Byte order of the length field.
    pub endian: Endian,
    /// Upper bound on the parsed length value, before `adjust`.
    pub max_frame: usize,
}

impl SplitterConfig {
    /// The muxer dialect: little-endian `u32` length at offset 0 that
    /// includes the full 16-byte envelope header.
    pub fn mux(max_frame: usize) -> Self {
        SplitterConfig {
            length_offset: 0,
            length_width: 4,
            adjust: -4,
            endian: Endian::Little,
            max_frame,
        }
    }

    /// The lockdown dialect: big-endian `u32` length at offset 0 that
    /// covers only the plist body following it.
    pub fn lockdown(max_frame: usize) -> Self {
        SplitterConfig {
            length_offset: 0,
            length_width: 4,
            adjust: 0,
            endian: Endian::Big,
            max_frame,
        }
    }
}

/// Accumulates inbound bytes and slices complete frames off the front
/// of the buffer as they become available.
pub struct LengthSplitter {
    config: SplitterConfig,
    buffer: Vec<u8>,
    shutdown: bool,
}

impl LengthSplitter {
    /// Builds an empty splitter for the given dialect.
    pub fn new(config: SplitterConfig) -> Self {
        LengthSplitter {
            config,
            buffer: Vec::new(),
            shutdown: false,
        }
    }

    /// Appends freshly-read bytes to the internal buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        if !self.shutdown {
            self.buffer.extend_from_slice(bytes);
        }
    }

    /// Attempts to slice one complete frame off the front of the buffer.
    /// Call repeatedly after a `feed` to drain every frame a single read
    /// may have delivered.
    pub fn try_take_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.shutdown {
            return Ok(None);
        }
        let header_end = self.config.length_offset + self.config.length_width;
        if self.buffer.len() < header_end {
            return Ok(None);
        }

        let field = &self.buffer[self.config.length_offset..header_end];
        let frame_len = read_uint(field, self.config.endian);
        trace!("splitter read a declared frame length of {frame_len} bytes");
        if frame_len as usize > self.config.max_frame {
            self.buffer.clear();
            warn!("frame length {frame_len} exceeds max_frame {}, buffer discarded", self.config.max_frame);
            return Err(Error::framing(format!(
                "frame length {} exceeds max_frame {}",
                frame_len, self.config.max_frame
            )));
        }

        let total_needed = header_end as i64 + frame_len as i64 + self.config.adjust;
        if total_needed < header_end as i64 {
            self.buffer.clear();
            return Err(Error::framing(
                "splitter config produced a frame shorter than its own header",
            ));
        }
        let total_needed = total_needed as usize;

        if self.buffer.len() < total_needed {
            trace!("splitter has {} of {total_needed} bytes needed, waiting for more", self.buffer.len());
            return Ok(None);
        }

        let payload = self.buffer[header_end..total_needed].to_vec();
        self.buffer.drain(..total_needed);
        trace!("splitter emitted a {}-byte frame", payload.len());
        Ok(Some(payload))
    }

    /// Stops the splitter from emitting further frames and returns
    /// whatever bytes remain buffered, unparsed. Used when handing the
    /// raw stream back to a caller (`MuxClient::connect`) or just before
    /// a TLS upgrade, where a non-empty result is a protocol error.
    pub fn shutdown(&mut self) -> Vec<u8> {
        self.shutdown = true;
        std::mem::take(&mut self.buffer)
    }

    /// Whether `shutdown` has already been called.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// The dialect this splitter was constructed with.
    pub fn config(&self) -> SplitterConfig {
        self.config
    }
}

fn read_uint(bytes: &[u8], endian: Endian) -> u64 {
    let mut value: u64 = 0;
    match endian {
        Endian::Big => {
            for &b in bytes {
                value = (value << 8) | b as u64;
            }
        }
        Endian::Little => {
            for &b in bytes.iter().rev() {
                value = (value << 8) | b as u64;
            }
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lockdown_frame(body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    fn mux_frame(header_rest: &[u8], body: &[u8]) -> Vec<u8> {
        let total = 4 + header_rest.len() + body.len();
        let mut out = Vec::new();
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(header_rest);
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn emits_n_lockdown_frames_fed_in_arbitrary_chunks() {
        let frames = vec![
            lockdown_frame(b"one"),
            lockdown_frame(b""),
            lockdown_frame(b"a slightly longer body here"),
        ];
        let concatenated: Vec<u8> = frames.iter().flatten().copied().collect();

        let mut splitter = LengthSplitter::new(SplitterConfig::lockdown(1 << 20));
        let mut emitted = Vec::new();
        // feed one byte at a time to exercise partial-header and
        // partial-body accumulation.
        for byte in &concatenated {
            splitter.feed(&[*byte]);
            while let Some(frame) = splitter.try_take_frame().unwrap() {
                emitted.push(frame);
            }
        }

        assert_eq!(emitted, vec![b"one".to_vec(), b"".to_vec(), b"a slightly longer body here".to_vec()]);
    }

    #[test]
    fn mux_length_includes_its_own_header() {
        let header_rest = [1u8, 0, 0, 0, 8, 0, 0, 0, 42, 0, 0, 0]; // version, type, tag
        let body = b"payload";
        let frame = mux_frame(&header_rest, body);

        let mut splitter = LengthSplitter::new(SplitterConfig::mux(1 << 20));
        splitter.feed(&frame);
        let payload = splitter.try_take_frame().unwrap().unwrap();
        assert_eq!(&payload[..12], &header_rest);
        assert_eq!(&payload[12..], body);
        assert_eq!(splitter.try_take_frame().unwrap(), None);
    }

    #[test]
    fn frame_exceeding_max_frame_is_rejected_and_buffer_discarded() {
        let mut splitter = LengthSplitter::new(SplitterConfig::lockdown(16));
        let huge = lockdown_frame(&vec![0u8; 64]);
        splitter.feed(&huge[..8]);
        let err = splitter.try_take_frame().unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
        // buffer was discarded; feeding the rest of the original frame
        // must not resurrect it.
        splitter.feed(&huge[8..]);
        assert_eq!(splitter.try_take_frame().unwrap(), None);
    }

    #[test]
    fn shutdown_stops_emission_and_returns_buffered_bytes() {
        let mut splitter = LengthSplitter::new(SplitterConfig::lockdown(1 << 20));
        let frame = lockdown_frame(b"hello");
        splitter.feed(&frame[..3]);
        let leftover = splitter.shutdown();
        assert_eq!(leftover, frame[..3]);
        splitter.feed(&frame[3..]);
        assert_eq!(splitter.try_take_frame().unwrap(), None);
    }
}
