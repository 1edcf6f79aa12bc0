//! XPC wire codec and the HTTP/2-framed handshake that opens a
//! RemoteXPC channel over a TLS-upgraded `CoreDeviceProxy` stream.
//!
//! Grounded on the wire-XPC encoder/decoder the retrieval pack carries
//! as a standalone reference (`jkcoxson/idevice`'s `xpc-format.rs`):
//! the type-tag scheme, the NUL-terminated/4-byte-aligned string and
//! data encoding, and the aggregate `byte_len`+`count`+`elements`
//! layout all come from there. The message header here is the
//! reference's 24-byte `(magic, flags, body_len, message_id)` shape;
//! the object stream that follows carries its own inner
//! `(magic=0x42133742, version=5)` pair ahead of the recursive body,
//! which is also lifted from the same source rather than re-derived.
//!
//! The handshake sequence itself (`XpcHandshake`) has no analogue in
//! the teacher or the reference file and is built directly from the
//! nine-step table this component's design specifies, reusing
//! `Http2Frames` for the carrier and a dispatch-by-(channel, id)
//! pattern modeled on `MuxClient::await_tag`.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use log::{debug, trace};

use crate::error::{Error, Result};
use crate::http2::Http2Frames;
use crate::transport::Socket;

/// The magic value every `XpcMessage`'s outer header starts with.
pub const MESSAGE_MAGIC: u32 = 0x29b0_0b92;
const OBJECT_MAGIC: u32 = 0x4213_3742;
const OBJECT_VERSION: u32 = 5;

/// Set on every handshake and request message observed on the wire.
pub const FLAG_ALWAYS_SET: u32 = 0x0000_0001;
/// Set on the `REPLY` channel's handshake message only.
pub const FLAG_INIT_HANDSHAKE: u32 = 0x0040_0000;

/// The HTTP/2 stream id used for the root control channel.
pub const CHANNEL_ROOT: u32 = 1;
/// The HTTP/2 stream id used for the reply channel.
pub const CHANNEL_REPLY: u32 = 3;

/// A decoded XPC object: the recursive value type the body of every
/// `XpcMessage` is built from.
#[derive(Debug, Clone, PartialEq)]
pub enum XpcValue {
    /// Boolean, encoded as a 4-byte `0`/`1`.
    Bool(bool),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Unsigned 64-bit integer.
    UInt64(u64),
    /// IEEE-754 double.
    Double(f64),
    /// UTF-8 string, NUL-terminated and length-prefixed on the wire.
    String(String),
    /// Opaque byte blob, length-prefixed on the wire.
    Data(Vec<u8>),
    /// A 16-byte UUID.
    Uuid([u8; 16]),
    /// An ordered list of values.
    Array(Vec<XpcValue>),
    /// A string-keyed map, encoded in insertion order.
    Dictionary(IndexMap<String, XpcValue>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum XpcType {
    Bool,
    Int64,
    UInt64,
    Double,
    String,
    Data,
    Uuid,
    Array,
    Dictionary,
}

impl XpcType {
    fn code(self) -> u32 {
        match self {
            XpcType::Bool => 0x0000_2000,
            XpcType::Int64 => 0x0000_3000,
            XpcType::UInt64 => 0x0000_4000,
            XpcType::Double => 0x0000_5000,
            XpcType::String => 0x0000_9000,
            XpcType::Data => 0x0000_8000,
            XpcType::Uuid => 0x0000_a000,
            XpcType::Array => 0x0000_e000,
            XpcType::Dictionary => 0x0000_f000,
        }
    }

    fn from_code(code: u32) -> Result<Self> {
        Ok(match code {
            0x0000_2000 => XpcType::Bool,
            0x0000_3000 => XpcType::Int64,
            0x0000_4000 => XpcType::UInt64,
            0x0000_5000 => XpcType::Double,
            0x0000_9000 => XpcType::String,
            0x0000_8000 => XpcType::Data,
            0x0000_a000 => XpcType::Uuid,
            0x0000_e000 => XpcType::Array,
            0x0000_f000 => XpcType::Dictionary,
            other => return Err(Error::codec(format!("unknown XPC type tag 0x{other:08x}"))),
        })
    }
}

fn padding_for(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

impl XpcValue {
    /// Borrows the inner map if this is a `Dictionary`.
    pub fn as_dict(&self) -> Option<&IndexMap<String, XpcValue>> {
        match self {
            XpcValue::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    /// Borrows the inner string if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            XpcValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Builds a `Dictionary` from an iterator of key/value pairs.
    pub fn dict<I: IntoIterator<Item = (String, XpcValue)>>(entries: I) -> Self {
        XpcValue::Dictionary(entries.into_iter().collect())
    }

    /// Encodes the recursive object stream only (no outer message
    /// header), prefixed by the inner magic/version pair the wire
    /// format repeats ahead of every top-level body.
    fn encode_body(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&OBJECT_MAGIC.to_le_bytes());
        buf.extend_from_slice(&OBJECT_VERSION.to_le_bytes());
        self.encode_object(&mut buf);
        buf
    }

    fn encode_object(&self, buf: &mut Vec<u8>) {
        match self {
            XpcValue::Bool(v) => {
                buf.extend_from_slice(&XpcType::Bool.code().to_le_bytes());
                buf.extend_from_slice(&(*v as u32).to_le_bytes());
            }
            XpcValue::Int64(v) => {
                buf.extend_from_slice(&XpcType::Int64.code().to_le_bytes());
                buf.extend_from_slice(&v.to_le_bytes());
            }
            XpcValue::UInt64(v) => {
                buf.extend_from_slice(&XpcType::UInt64.code().to_le_bytes());
                buf.extend_from_slice(&v.to_le_bytes());
            }
            XpcValue::Double(v) => {
                buf.extend_from_slice(&XpcType::Double.code().to_le_bytes());
                buf.extend_from_slice(&v.to_le_bytes());
            }
            XpcValue::String(s) => {
                buf.extend_from_slice(&XpcType::String.code().to_le_bytes());
                let len = s.len() + 1; // NUL included in the declared length
                buf.extend_from_slice(&(len as u32).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
                buf.push(0);
                buf.extend(std::iter::repeat(0u8).take(padding_for(len)));
            }
            XpcValue::Data(d) => {
                buf.extend_from_slice(&XpcType::Data.code().to_le_bytes());
                buf.extend_from_slice(&(d.len() as u32).to_le_bytes());
                buf.extend_from_slice(d);
                buf.extend(std::iter::repeat(0u8).take(padding_for(d.len())));
            }
            XpcValue::Uuid(bytes) => {
                buf.extend_from_slice(&XpcType::Uuid.code().to_le_bytes());
                buf.extend_from_slice(bytes);
            }
            XpcValue::Array(items) => {
                buf.extend_from_slice(&XpcType::Array.code().to_le_bytes());
                let mut content = Vec::new();
                content.extend_from_slice(&(items.len() as u32).to_le_bytes());
                for item in items {
                    item.encode_object(&mut content);
                }
                buf.extend_from_slice(&(content.len() as u32).to_le_bytes());
                buf.extend_from_slice(&content);
            }
            XpcValue::Dictionary(dict) => {
                buf.extend_from_slice(&XpcType::Dictionary.code().to_le_bytes());
                let mut content = Vec::new();
                content.extend_from_slice(&(dict.len() as u32).to_le_bytes());
                for (key, value) in dict {
                    let key_len = key.len() + 1;
                    content.extend_from_slice(key.as_bytes());
                    content.push(0);
                    content.extend(std::iter::repeat(0u8).take(padding_for(key_len)));
                    value.encode_object(&mut content);
                }
                buf.extend_from_slice(&(content.len() as u32).to_le_bytes());
                buf.extend_from_slice(&content);
            }
        }
    }

    fn decode_body(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(Error::codec("XPC body shorter than its inner header"));
        }
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if magic != OBJECT_MAGIC {
            return Err(Error::codec("XPC body has the wrong inner magic"));
        }
        let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if version != OBJECT_VERSION {
            return Err(Error::codec(format!("unsupported XPC object version {version}")));
        }
        let mut cursor = &bytes[8..];
        Self::decode_object(&mut cursor)
    }

    fn decode_object(cursor: &mut &[u8]) -> Result<Self> {
        let tag_code = take_u32(cursor)?;
        let tag = XpcType::from_code(tag_code)?;
        Ok(match tag {
            XpcType::Bool => XpcValue::Bool(take_u32(cursor)? != 0),
            XpcType::Int64 => XpcValue::Int64(take_u64(cursor)? as i64),
            XpcType::UInt64 => XpcValue::UInt64(take_u64(cursor)?),
            XpcType::Double => XpcValue::Double(f64::from_le_bytes(take_bytes(cursor, 8)?.try_into().unwrap())),
            XpcType::String => {
                let len = take_u32(cursor)? as usize;
                let raw = take_bytes(cursor, len)?;
                take_bytes(cursor, padding_for(len))?;
                let s = std::str::from_utf8(&raw[..len.saturating_sub(1)])
                    .map_err(|_| Error::codec("XPC string is not valid UTF-8"))?;
                XpcValue::String(s.to_owned())
            }
            XpcType::Data => {
                let len = take_u32(cursor)? as usize;
                let raw = take_bytes(cursor, len)?.to_vec();
                take_bytes(cursor, padding_for(len))?;
                XpcValue::Data(raw)
            }
            XpcType::Uuid => {
                let raw = take_bytes(cursor, 16)?;
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(raw);
                XpcValue::Uuid(bytes)
            }
            XpcType::Array => {
                let _byte_len = take_u32(cursor)?;
                let count = take_u32(cursor)?;
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(Self::decode_object(cursor)?);
                }
                XpcValue::Array(items)
            }
            XpcType::Dictionary => {
                let _byte_len = take_u32(cursor)?;
                let count = take_u32(cursor)?;
                let mut dict = IndexMap::new();
                for _ in 0..count {
                    let nul_at = cursor
                        .iter()
                        .position(|&b| b == 0)
                        .ok_or_else(|| Error::codec("XPC dict key missing its NUL terminator"))?;
                    let key = std::str::from_utf8(&cursor[..nul_at])
                        .map_err(|_| Error::codec("XPC dict key is not valid UTF-8"))?
                        .to_owned();
                    let consumed = nul_at + 1;
                    take_bytes(cursor, consumed)?;
                    take_bytes(cursor, padding_for(consumed))?;
                    let value = Self::decode_object(cursor)?;
                    dict.insert(key, value);
                }
                XpcValue::Dictionary(dict)
            }
        })
    }
}

fn take_bytes<'a>(cursor: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if cursor.len() < n {
        return Err(Error::codec("XPC object stream truncated"));
    }
    let (head, tail) = cursor.split_at(n);
    *cursor = tail;
    Ok(head)
}

fn take_u32(cursor: &mut &[u8]) -> Result<u32> {
    Ok(u32::from_le_bytes(take_bytes(cursor, 4)?.try_into().unwrap()))
}

fn take_u64(cursor: &mut &[u8]) -> Result<u64> {
    Ok(u64::from_le_bytes(take_bytes(cursor, 8)?.try_into().unwrap()))
}

/// One XPC message: a 24-byte header followed by an optional body.
#[derive(Debug, Clone)]
pub struct XpcMessage {
    /// Per-message flags; see `FLAG_ALWAYS_SET`/`FLAG_INIT_HANDSHAKE`.
    pub flags: u32,
    /// Monotonically increasing id, scoped to the channel it's sent on.
    pub message_id: u64,
    /// The message's payload, absent for bare control messages.
    pub body: Option<XpcValue>,
}

impl XpcMessage {
    /// Builds a message from its parts.
    pub fn new(flags: u32, message_id: u64, body: Option<XpcValue>) -> Self {
        XpcMessage { flags, message_id, body }
    }

    /// Encodes the 24-byte header and, if present, the body's object stream.
    pub fn encode(&self) -> Vec<u8> {
        let body_bytes = self.body.as_ref().map(XpcValue::encode_body).unwrap_or_default();
        let mut out = Vec::with_capacity(24 + body_bytes.len());
        out.extend_from_slice(&MESSAGE_MAGIC.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&(body_bytes.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.message_id.to_le_bytes());
        out.extend_from_slice(&body_bytes);
        out
    }

    /// Parses a header and optional body out of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 24 {
            return Err(Error::codec("XPC message shorter than its 24-byte header"));
        }
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if magic != MESSAGE_MAGIC {
            return Err(Error::codec("XPC message has the wrong magic"));
        }
        let flags = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let body_len = u64::from_le_bytes(bytes[8..16].try_into().unwrap()) as usize;
        let message_id = u64::from_le_bytes(bytes[16..24].try_into().unwrap());
        if 24 + body_len > bytes.len() {
            return Err(Error::codec("XPC message body length exceeds the received bytes"));
        }
        let body = if body_len > 0 {
            Some(XpcValue::decode_body(&bytes[24..24 + body_len])?)
        } else {
            None
        };
        Ok(XpcMessage { flags, message_id, body })
    }
}

/// An open RemoteXPC channel, past the nine-step handshake, able to
/// dispatch `(channel, id)`-addressed requests the way `MuxClient`
/// dispatches by tag.
pub struct XpcConnection {
    stream: Box<dyn Socket>,
    next_id: HashMap<u32, u64>,
    pending: HashMap<(u32, u64), XpcValue>,
}

impl XpcConnection {
    /// Drives the nine-step handshake table to completion and returns
    /// a connection ready to dispatch operation-level requests. Each
    /// step's write is checked against `timeout` before it happens, so
    /// a peer that stalls partway through the sequence fails fast with
    /// `Error::Timeout` rather than hanging in `write_all` forever.
    pub fn perform_handshake(mut stream: Box<dyn Socket>, timeout: Duration) -> Result<Self> {
        let deadline = Instant::now() + timeout;
        let step = |stream: &mut Box<dyn Socket>, bytes: &[u8]| -> Result<()> {
            if Instant::now() >= deadline {
                return Err(Error::Timeout { tag: 0 });
            }
            stream.write_all(bytes)?;
            Ok(())
        };

        debug!("xpc handshake: step 1/9, client preface");
        step(&mut stream, crate::http2::CLIENT_PREFACE)?;

        debug!("xpc handshake: step 2/9, SETTINGS");
        let settings = Http2Frames::settings(&[(0x3, 100), (0x4, 1_048_576)])?;
        step(&mut stream, &settings)?;

        debug!("xpc handshake: step 3/9, WINDOW_UPDATE");
        let window_update = Http2Frames::window_update(0, 983_041)?;
        step(&mut stream, &window_update)?;

        debug!("xpc handshake: step 4/9, HEADERS on ROOT");
        step(&mut stream, &Http2Frames::headers(CHANNEL_ROOT, &[], false)?)?;
        debug!("xpc handshake: step 5/9, DATA on ROOT (empty dict)");
        let first_root = XpcMessage::new(FLAG_ALWAYS_SET, 0, Some(XpcValue::Dictionary(IndexMap::new())));
        step(&mut stream, &Http2Frames::data(CHANNEL_ROOT, &first_root.encode(), false)?)?;

        debug!("xpc handshake: step 6/9, DATA on ROOT (null body)");
        let second_root = XpcMessage::new(0x0201, 0, None);
        step(&mut stream, &Http2Frames::data(CHANNEL_ROOT, &second_root.encode(), false)?)?;

        debug!("xpc handshake: step 7/9, HEADERS on REPLY");
        step(&mut stream, &Http2Frames::headers(CHANNEL_REPLY, &[], false)?)?;
        debug!("xpc handshake: step 8/9, DATA on REPLY (init handshake)");
        let init = XpcMessage::new(FLAG_ALWAYS_SET | FLAG_INIT_HANDSHAKE, 0, None);
        step(&mut stream, &Http2Frames::data(CHANNEL_REPLY, &init.encode(), false)?)?;

        debug!("xpc handshake: step 9/9, SETTINGS ack");
        step(&mut stream, &Http2Frames::settings_ack()?)?;

        let mut next_id = HashMap::new();
        next_id.insert(CHANNEL_ROOT, 1);
        next_id.insert(CHANNEL_REPLY, 1);

        Ok(XpcConnection {
            stream,
            next_id,
            pending: HashMap::new(),
        })
    }

    /// Sends `body` on `ROOT` with a fresh monotonically increasing id
    /// and returns that id for a matching `await_reply`.
    pub fn send_request(&mut self, body: XpcValue) -> Result<u64> {
        let id = *self.next_id.entry(CHANNEL_ROOT).or_insert(1);
        *self.next_id.get_mut(&CHANNEL_ROOT).unwrap() += 1;
        let message = XpcMessage::new(FLAG_ALWAYS_SET, id, Some(body));
        let frame = Http2Frames::data(CHANNEL_ROOT, &message.encode(), false)?;
        trace!("xpc: sending id {id} on ROOT, {} bytes", frame.len());
        self.stream.write_all(&frame)?;
        Ok(id)
    }

    /// Awaits the `REPLY` message with the given id, buffering any
    /// other id that arrives first the same way `MuxClient::await_tag`
    /// buffers out-of-order muxer responses.
    pub fn await_reply(&mut self, id: u64, timeout: Duration) -> Result<XpcValue> {
        if let Some(value) = self.pending.remove(&(CHANNEL_REPLY, id)) {
            return Ok(value);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(Error::Timeout { tag: id as u32 })?;
            self.stream.set_read_timeout(Some(remaining))?;

            let (stream_id, message) = self.read_data_frame()?;
            trace!(
                "xpc: received id {} on channel {stream_id}, flags 0x{:08x}",
                message.message_id, message.flags
            );
            let Some(body) = message.body else { continue };
            if stream_id == CHANNEL_REPLY && message.message_id == id {
                debug!("xpc: resolved reply id {id}");
                return Ok(body);
            }
            trace!("xpc: id {} on channel {stream_id} arrived out of order, buffering for later", message.message_id);
            self.pending.insert((stream_id, message.message_id), body);
        }
    }

    /// Sends `body` on `ROOT` and blocks for the matching `REPLY`.
    pub fn request(&mut self, body: XpcValue, timeout: Duration) -> Result<XpcValue> {
        let id = self.send_request(body)?;
        self.await_reply(id, timeout)
    }

    /// Reads exactly one HTTP/2 frame and, if it's a `DATA` frame,
    /// decodes its payload as an XPC message. Non-`DATA` frames
    /// (a `SETTINGS` keepalive, say) are skipped transparently.
    fn read_data_frame(&mut self) -> Result<(u32, XpcMessage)> {
        loop {
            let mut header = [0u8; 9];
            self.stream.read_exact(&mut header)?;
            let len = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize;
            let frame_type = header[3];
            let stream_id = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) & 0x7fff_ffff;

            let mut payload = vec![0u8; len];
            self.stream.read_exact(&mut payload)?;

            const DATA_FRAME: u8 = 0x0;
            if frame_type == DATA_FRAME {
                trace!("xpc: read a {len}-byte DATA frame on stream {stream_id}");
                return Ok((stream_id, XpcMessage::decode(&payload)?));
            }
            trace!("xpc: skipped a {len}-byte frame of type 0x{frame_type:02x} on stream {stream_id}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    struct MemorySocket {
        inbound: Cursor<Vec<u8>>,
        outbound: Arc<Mutex<Vec<u8>>>,
    }
    impl Read for MemorySocket {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.inbound.read(buf)
        }
    }
    impl Write for MemorySocket {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.outbound.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
    impl Socket for MemorySocket {
        fn set_read_timeout(&mut self, _dur: Option<Duration>) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn round_trips_a_dictionary_body() {
        let value = XpcValue::dict([
            ("a".to_owned(), XpcValue::Int64(1)),
            ("b".to_owned(), XpcValue::Array(vec![XpcValue::Bool(true)])),
        ]);
        let message = XpcMessage::new(FLAG_ALWAYS_SET, 7, Some(value.clone()));
        let encoded = message.encode();
        let decoded = XpcMessage::decode(&encoded).unwrap();
        assert_eq!(decoded.message_id, 7);
        assert_eq!(decoded.flags, FLAG_ALWAYS_SET);
        assert_eq!(decoded.body, Some(value));
    }

    #[test]
    fn string_length_includes_the_nul_terminator() {
        let value = XpcValue::String("hi".to_owned());
        let mut buf = Vec::new();
        value.encode_object(&mut buf);
        let declared_len = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        assert_eq!(declared_len, 3); // "hi" + NUL
    }

    #[test]
    fn decode_rejects_the_wrong_magic() {
        let mut bytes = vec![0u8; 24];
        bytes[0..4].copy_from_slice(&0xdeadbeefu32.to_le_bytes());
        let err = XpcMessage::decode(&bytes).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn send_request_allocates_increasing_root_ids() {
        let sock = MemorySocket {
            inbound: Cursor::new(Vec::new()),
            outbound: Arc::new(Mutex::new(Vec::new())),
        };
        let mut conn = XpcConnection {
            stream: Box::new(sock),
            next_id: HashMap::from([(CHANNEL_ROOT, 1), (CHANNEL_REPLY, 1)]),
            pending: HashMap::new(),
        };
        let first = conn.send_request(XpcValue::Dictionary(IndexMap::new())).unwrap();
        let second = conn.send_request(XpcValue::Dictionary(IndexMap::new())).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[test]
    fn perform_handshake_writes_the_nine_steps_in_order_with_matching_byte_counts() {
        let outbound = Arc::new(Mutex::new(Vec::new()));
        let sock = MemorySocket {
            inbound: Cursor::new(Vec::new()),
            outbound: outbound.clone(),
        };
        XpcConnection::perform_handshake(Box::new(sock), Duration::from_secs(1)).unwrap();

        let written = outbound.lock().unwrap().clone();
        let mut cursor = &written[..];

        assert_eq!(&cursor[..crate::http2::CLIENT_PREFACE.len()], crate::http2::CLIENT_PREFACE);
        cursor = &cursor[crate::http2::CLIENT_PREFACE.len()..];

        // the remaining eight frames each carry a 9-byte header whose
        // 24-bit length field equals their payload length; walk them
        // and check both the declared (type, stream id) sequence and
        // that total bytes written equal preface + sum(9 + payload).
        let expected_types_and_streams = [
            (0x4, 0),          // SETTINGS
            (0x8, 0),          // WINDOW_UPDATE
            (0x1, CHANNEL_ROOT),  // HEADERS
            (0x0, CHANNEL_ROOT),  // DATA (empty dict)
            (0x0, CHANNEL_ROOT),  // DATA (null body)
            (0x1, CHANNEL_REPLY), // HEADERS
            (0x0, CHANNEL_REPLY), // DATA (init handshake)
            (0x4, 0),          // SETTINGS ack
        ];

        let mut total = crate::http2::CLIENT_PREFACE.len();
        for (frame_type, stream_id) in expected_types_and_streams {
            let len = u32::from_be_bytes([0, cursor[0], cursor[1], cursor[2]]) as usize;
            assert_eq!(cursor[3], frame_type, "frame type mismatch at stream {stream_id}");
            let actual_stream = u32::from_be_bytes([cursor[5], cursor[6], cursor[7], cursor[8]]) & 0x7fff_ffff;
            assert_eq!(actual_stream, stream_id);
            cursor = &cursor[9 + len..];
            total += 9 + len;
        }

        assert_eq!(cursor.len(), 0);
        assert_eq!(written.len(), total);
    }
}
