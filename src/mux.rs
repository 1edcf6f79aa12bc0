//! `MuxClient`: talks to the host-side `usbmuxd` muxer.
//!
//! Builds its own thin envelope directly on top of [`PlistTransport`]'s
//! raw send/receive primitives rather than the transport's plist-aware
//! `send`/`receive`, since the muxer envelope carries three extra
//! fixed `u32` fields (version, type, tag) between the length prefix
//! and the plist body that the generic transport has no opinion about.
//!
//! Grounded on `peertalk::{DeviceListener, protocol::Packet}` for the
//! envelope shape and the little-endian header fields, generalized
//! from a fire-and-forget listener into a tag-dispatching
//! request/response client per the mux client's operation list.

use std::collections::HashMap;
use std::io::Cursor;
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, trace};

use crate::bplist::{self, PlistValue};
use crate::config::{Config, MuxerAddress};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::framing::SplitterConfig;
use crate::pairing::PairRecord;
use crate::transport::{PlistTransport, Socket};

const MUX_VERSION: u32 = 1;
const MUX_TYPE_PLIST: u32 = 8;

/// Opens the muxer socket per the discovery order in §4.4: explicit
/// argument, then the resolved config address (env var or caller
/// default), then `/var/run/usbmuxd`, then loopback TCP.
fn dial(config: &Config, explicit: Option<MuxerAddress>) -> Result<Box<dyn Socket>> {
    match config.resolve_muxer_address(explicit)? {
        MuxerAddress::Tcp(addr) => Ok(Box::new(TcpStream::connect(addr)?)),
        #[cfg(unix)]
        MuxerAddress::Unix(path) => Ok(Box::new(UnixStream::connect(path)?)),
        #[cfg(not(unix))]
        MuxerAddress::Unix(_) => Err(Error::SocketUnavailable),
    }
}

/// A tag-dispatching client for the host `usbmuxd` muxer.
pub struct MuxClient {
    transport: PlistTransport,
    next_tag: u32,
    /// Responses that arrived out of order relative to the tag a
    /// caller is currently awaiting, keyed by their own tag.
    pending: HashMap<u32, PlistValue>,
}

impl MuxClient {
    /// Connects to the muxer using the discovery order above.
    pub fn connect_muxer(config: &Config, explicit: Option<MuxerAddress>) -> Result<Self> {
        let stream = dial(config, explicit)?;
        let transport = PlistTransport::new(
            stream,
            SplitterConfig::mux(config.max_frame),
            // send_format is irrelevant here; MuxClient only ever
            // calls send_raw/receive_raw.
            crate::transport::PlistFormat::Binary,
        );
        Ok(MuxClient {
            transport,
            next_tag: 0,
            pending: HashMap::new(),
        })
    }

    fn allocate_tag(&mut self) -> u32 {
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1);
        tag
    }

    fn send_request(&mut self, tag: u32, fields: PlistValue) -> Result<()> {
        let mut body = Vec::with_capacity(12);
        body.write_u32::<LittleEndian>(MUX_VERSION)?;
        body.write_u32::<LittleEndian>(MUX_TYPE_PLIST)?;
        body.write_u32::<LittleEndian>(tag)?;
        body.extend_from_slice(&bplist::encode(&fields));
        trace!("mux: sending tag {tag}, {} bytes", body.len());
        self.transport.send_raw(&body)
    }

    /// Reads frames until the one tagged `tag` arrives, buffering any
    /// others in `pending` for a later call to resolve. This is what
    /// lets two outstanding requests resolve correctly even if their
    /// responses arrive in reverse order.
    fn await_tag(&mut self, tag: u32, timeout: Duration) -> Result<PlistValue> {
        if let Some(value) = self.pending.remove(&tag) {
            return Ok(value);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(Error::Timeout { tag })?;
            let raw = self.transport.receive_raw(remaining).map_err(|e| match e {
                Error::Timeout { .. } => Error::Timeout { tag },
                other => other,
            })?;
            let mut cursor = Cursor::new(&raw);
            let _version = cursor.read_u32::<LittleEndian>()?;
            let _msg_type = cursor.read_u32::<LittleEndian>()?;
            let resp_tag = cursor.read_u32::<LittleEndian>()?;
            let plist_bytes = &raw[12..];
            let value = if bplist::is_bplist(plist_bytes) {
                bplist::decode(plist_bytes)?
            } else {
                crate::xml_plist::decode(plist_bytes)?
            };
            trace!("mux: received tag {resp_tag}, {} plist bytes", plist_bytes.len());
            if resp_tag == tag {
                debug!("mux: resolved tag {tag}");
                return Ok(value);
            }
            trace!("mux: tag {resp_tag} arrived out of order, buffering for later");
            self.pending.insert(resp_tag, value);
        }
    }

    fn request(&mut self, fields: PlistValue, timeout: Duration) -> Result<PlistValue> {
        let tag = self.allocate_tag();
        self.send_request(tag, fields)?;
        self.await_tag(tag, timeout)
    }

    /// Fetches the host's base unique identifier, used as `SystemBUID`
    /// in a lockdown `StartSession` request.
    pub fn read_buid(&mut self, timeout: Duration) -> Result<String> {
        let response = self.request(
            PlistValue::dict([("MessageType".to_owned(), PlistValue::String("ReadBUID".to_owned()))]),
            timeout,
        )?;
        response
            .as_dict()
            .and_then(|d| d.get("BUID"))
            .and_then(PlistValue::as_str)
            .map(str::to_owned)
            .ok_or_else(|| Error::protocol("ReadBUID response missing BUID"))
    }

    /// Fetches the pairing record for `udid`, or `None` if the host
    /// has no pairing on file for that device.
    pub fn read_pair_record(&mut self, udid: &str, timeout: Duration) -> Result<Option<PairRecord>> {
        let response = self.request(
            PlistValue::dict([
                ("MessageType".to_owned(), PlistValue::String("ReadPairRecord".to_owned())),
                ("PairRecordID".to_owned(), PlistValue::String(udid.to_owned())),
            ]),
            timeout,
        )?;
        let dict = response
            .as_dict()
            .ok_or_else(|| Error::protocol("ReadPairRecord response is not a dict"))?;
        let Some(data) = dict.get("PairRecordData").and_then(PlistValue::as_data) else {
            return Ok(None);
        };
        let parsed = if bplist::is_bplist(data) {
            bplist::decode(data)?
        } else {
            crate::xml_plist::decode(data)?
        };
        Ok(Some(PairRecord::from_plist(&parsed)?))
    }

    /// Lists every device the host muxer currently has attached.
    pub fn list_devices(&mut self, timeout: Duration) -> Result<Vec<Device>> {
        let response = self.request(
            PlistValue::dict([("MessageType".to_owned(), PlistValue::String("ListDevices".to_owned()))]),
            timeout,
        )?;
        Device::list_from_plist(&response)
    }

    /// Opens a stream to `port` on `device_id`, tearing down the
    /// splitter and handing ownership of the raw socket to the caller
    /// on success, per §4.4.
    pub fn connect(mut self, device_id: u32, port: u16, timeout: Duration) -> Result<Box<dyn Socket>> {
        let swapped_port = port.swap_bytes();
        let response = self.request(
            PlistValue::dict([
                ("MessageType".to_owned(), PlistValue::String("Connect".to_owned())),
                ("DeviceID".to_owned(), PlistValue::Int(device_id as i64)),
                ("PortNumber".to_owned(), PlistValue::Int(swapped_port as i64)),
            ]),
            timeout,
        )?;
        let number = response
            .as_dict()
            .and_then(|d| d.get("Number"))
            .and_then(PlistValue::as_int)
            .ok_or_else(|| Error::protocol("Connect response missing Number"))?;
        if number != 0 {
            return Err(Error::muxer(number));
        }
        let (stream, leftover) = self.transport.into_raw_parts();
        if !leftover.is_empty() {
            return Err(Error::framing("splitter had buffered bytes past Connect's reply"));
        }
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
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

    fn mux_frame(tag: u32, payload: &PlistValue) -> Vec<u8> {
        let plist_bytes = bplist::encode(payload);
        let mut body = Vec::new();
        body.write_u32::<LittleEndian>(MUX_VERSION).unwrap();
        body.write_u32::<LittleEndian>(MUX_TYPE_PLIST).unwrap();
        body.write_u32::<LittleEndian>(tag).unwrap();
        body.extend_from_slice(&plist_bytes);
        let mut frame = Vec::new();
        frame.write_u32::<LittleEndian>((16 + plist_bytes.len()) as u32).unwrap();
        frame.extend_from_slice(&body);
        frame
    }

    fn client_with_canned_responses(frames: Vec<u8>) -> MuxClient {
        let sock = MemorySocket {
            inbound: Cursor::new(frames),
            outbound: Arc::new(Mutex::new(Vec::new())),
        };
        let transport = PlistTransport::new(
            Box::new(sock),
            SplitterConfig::mux(1 << 20),
            crate::transport::PlistFormat::Binary,
        );
        MuxClient {
            transport,
            next_tag: 0,
            pending: HashMap::new(),
        }
    }

    #[test]
    fn dispatches_responses_arriving_in_reverse_tag_order() {
        let resp0 = PlistValue::dict([("BUID".to_owned(), PlistValue::String("abc".into()))]);
        let mut device_list = indexmap::IndexMap::new();
        device_list.insert("DeviceList".to_owned(), PlistValue::Array(vec![]));
        let resp1 = PlistValue::Dict(device_list);

        // tag 1's response arrives first on the wire, then tag 0's.
        let mut frames = mux_frame(1, &resp1);
        frames.extend(mux_frame(0, &resp0));

        let mut client = client_with_canned_responses(frames);
        client.next_tag = 0;
        // Manually allocate both tags as if two requests had already
        // been sent (we don't exercise send_request here, only dispatch).
        let value0 = client.await_tag(0, Duration::from_secs(1)).unwrap();
        let value1 = client.await_tag(1, Duration::from_secs(1)).unwrap();
        assert_eq!(value0.as_dict().unwrap().get("BUID").unwrap().as_str(), Some("abc"));
        assert!(value1.as_dict().unwrap().contains_key("DeviceList"));
    }

    #[test]
    fn connect_rejects_nonzero_result_codes() {
        let mut resp = indexmap::IndexMap::new();
        resp.insert("Number".to_owned(), PlistValue::Int(3));
        let frames = mux_frame(0, &PlistValue::Dict(resp));
        let client = client_with_canned_responses(frames);

        let err = client.connect(7, 62078, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::Muxer(crate::error::MuxerError::ConnectionRefused)));
    }

    #[test]
    fn connect_byte_swaps_the_port_number() {
        let mut resp = indexmap::IndexMap::new();
        resp.insert("Number".to_owned(), PlistValue::Int(0));
        let frames = mux_frame(0, &PlistValue::Dict(resp));

        let outbound = Arc::new(Mutex::new(Vec::new()));
        let sock = MemorySocket {
            inbound: Cursor::new(frames),
            outbound: outbound.clone(),
        };
        let transport = PlistTransport::new(
            Box::new(sock),
            SplitterConfig::mux(1 << 20),
            crate::transport::PlistFormat::Binary,
        );
        let client = MuxClient {
            transport,
            next_tag: 0,
            pending: HashMap::new(),
        };
        client.connect(7, 62078, Duration::from_secs(1)).unwrap();

        let written = outbound.lock().unwrap();
        // skip the 4-byte length + 12-byte header to reach the plist body
        let plist_bytes = &written[16..];
        let decoded = bplist::decode(plist_bytes).unwrap();
        let port = decoded.as_dict().unwrap().get("PortNumber").unwrap().as_int().unwrap();
        assert_eq!(port as u16, 0x7EF2);
    }
}
