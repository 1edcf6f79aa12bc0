//! Binary property list (`bplist00`) codec.
//!
//! A bplist document is four segments back to back: an 8-byte header
//! (`bplist00`), a table of object records, an offset table, and a
//! 32-byte trailer describing how to find everything. This module
//! implements both directions bit-exactly enough to interoperate with
//! Apple's CoreFoundation encoder/decoder, with one deliberate deviation
//! from a common buggy reference implementation: UTF-16 string bodies are
//! always written big-endian (see [`encode`]'s doc comment).
//!
//! Grounded on `martinmroz/bplist`'s `document` module for the marker-byte
//! tag/value bit layout, generalized here into a full encoder/decoder
//! rather than just format constants.

use indexmap::IndexMap;
use serde::de::{Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::HashSet;
use std::fmt;

use crate::error::{Error, Result};

/// The bplist magic number, not including the two-byte version marker.
const HEADER_MAGIC: &[u8] = b"bplist";
/// Size in bytes of the trailer that follows the offset table.
const TRAILER_SIZE: usize = 32;

/// A parsed property list value.
///
/// `Dict` preserves insertion order; that order is observable on the wire,
/// since keys precede values in a dict's key/value reference blocks.
#[derive(Debug, Clone, PartialEq)]
pub enum PlistValue {
    /// The `null` atom (tag `0x00`). Apple's writers rarely emit this, but
    /// some usbmuxd payloads round-trip it.
    Null,
    /// A boolean atom (tag `0x08`/`0x09`).
    Bool(bool),
    /// A signed integer. Decoders widen all integer widths to 64 bits.
    Int(i64),
    /// An IEEE-754 double.
    Real(f64),
    /// Seconds since 2001-01-01T00:00:00Z.
    Date(f64),
    /// An opaque byte string.
    Data(Vec<u8>),
    /// A text string. Whether it is encoded as 7-bit ASCII or UTF-16BE on
    /// the wire is decided by [`encode`] from its content, not tracked
    /// here.
    String(String),
    /// An ordered sequence of values.
    Array(Vec<PlistValue>),
    /// An ordered mapping from string keys to values.
    Dict(IndexMap<String, PlistValue>),
}

impl PlistValue {
    /// Convenience constructor for a dict literal built from an iterator
    /// of key/value pairs, preserving iteration order.
    pub fn dict<I: IntoIterator<Item = (String, PlistValue)>>(entries: I) -> Self {
        PlistValue::Dict(entries.into_iter().collect())
    }

    /// Returns the string value, if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PlistValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the dict, if this is a `Dict`.
    pub fn as_dict(&self) -> Option<&IndexMap<String, PlistValue>> {
        match self {
            PlistValue::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the array, if this is an `Array`.
    pub fn as_array(&self) -> Option<&[PlistValue]> {
        match self {
            PlistValue::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Returns the integer value, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PlistValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the data bytes, if this is `Data`.
    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            PlistValue::Data(d) => Some(d),
            _ => None,
        }
    }
}

/// Returns `true` if `buf` begins with the bplist magic prefix.
///
/// Used to probe which plist dialect a payload uses before falling
/// through to the XML decoder (§9 of the design notes).
pub fn is_bplist(buf: &[u8]) -> bool {
    buf.len() >= HEADER_MAGIC.len() && &buf[..HEADER_MAGIC.len()] == HEADER_MAGIC
}

// ---------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------

enum Node {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Date(f64),
    Data(Vec<u8>),
    StringAscii(String),
    StringUtf16(String),
    /// Child object ids, in order.
    Array(Vec<usize>),
    /// Parallel key/value id lists, in insertion order.
    Dict(Vec<usize>, Vec<usize>),
}

struct Encoder {
    nodes: Vec<Node>,
    canonical_null: Option<usize>,
    canonical_true: Option<usize>,
    canonical_false: Option<usize>,
}

impl Encoder {
    fn new() -> Self {
        Encoder {
            nodes: Vec::new(),
            canonical_null: None,
            canonical_true: None,
            canonical_false: None,
        }
    }

    /// Depth-first, pre-order interning of `value`. The very first call
    /// made against a fresh encoder always produces id 0, which is how
    /// the root ends up satisfying the trailer's `top_object_id == 0`
    /// invariant.
    fn intern(&mut self, value: &PlistValue) -> usize {
        match value {
            PlistValue::Null => *self.canonical_null.get_or_insert_with_id(&mut self.nodes, Node::Null),
            PlistValue::Bool(true) => {
                *self.canonical_true.get_or_insert_with_id(&mut self.nodes, Node::Bool(true))
            }
            PlistValue::Bool(false) => {
                *self.canonical_false.get_or_insert_with_id(&mut self.nodes, Node::Bool(false))
            }
            PlistValue::Int(i) => self.push(Node::Int(*i)),
            PlistValue::Real(r) => self.push(Node::Real(*r)),
            PlistValue::Date(d) => self.push(Node::Date(*d)),
            PlistValue::Data(d) => self.push(Node::Data(d.clone())),
            PlistValue::String(s) => self.intern_string(s),
            PlistValue::Array(items) => {
                let id = self.push(Node::Array(Vec::new()));
                let child_ids: Vec<usize> = items.iter().map(|item| self.intern(item)).collect();
                self.nodes[id] = Node::Array(child_ids);
                id
            }
            PlistValue::Dict(entries) => {
                let id = self.push(Node::Dict(Vec::new(), Vec::new()));
                let mut key_ids = Vec::with_capacity(entries.len());
                let mut value_ids = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    key_ids.push(self.intern_string(k));
                    value_ids.push(self.intern(v));
                }
                self.nodes[id] = Node::Dict(key_ids, value_ids);
                id
            }
        }
    }

    fn intern_string(&mut self, s: &str) -> usize {
        if s.is_ascii() {
            self.push(Node::StringAscii(s.to_owned()))
        } else {
            self.push(Node::StringUtf16(s.to_owned()))
        }
    }

    fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }
}

/// Helper so the three canonical-atom slots above share one lazy-init
/// pattern without fighting the borrow checker over `&mut self.nodes`.
trait GetOrInsertId {
    fn get_or_insert_with_id(&mut self, nodes: &mut Vec<Node>, node: Node) -> &mut usize;
}
impl GetOrInsertId for Option<usize> {
    fn get_or_insert_with_id(&mut self, nodes: &mut Vec<Node>, node: Node) -> &mut usize {
        if self.is_none() {
            nodes.push(node);
            *self = Some(nodes.len() - 1);
        }
        self.as_mut().unwrap()
    }
}

fn int_byte_width(value: i64) -> usize {
    if value >= i8::MIN as i64 && value <= i8::MAX as i64 {
        1
    } else if value >= i16::MIN as i64 && value <= i16::MAX as i64 {
        2
    } else if value >= i32::MIN as i64 && value <= i32::MAX as i64 {
        4
    } else {
        8
    }
}

fn write_int_inline(buf: &mut Vec<u8>, value: i64) {
    let width = int_byte_width(value);
    let n: u8 = match width {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        _ => unreachable!(),
    };
    buf.push(0x10 | n);
    match width {
        1 => buf.push(value as i8 as u8),
        2 => buf.extend_from_slice(&(value as i16).to_be_bytes()),
        4 => buf.extend_from_slice(&(value as i32).to_be_bytes()),
        8 => buf.extend_from_slice(&value.to_be_bytes()),
        _ => unreachable!(),
    }
}

fn write_len_tagged(buf: &mut Vec<u8>, base_tag: u8, count: usize) {
    if count < 15 {
        buf.push(base_tag | count as u8);
    } else {
        buf.push(base_tag | 0x0F);
        write_int_inline(buf, count as i64);
    }
}

fn byte_width(max_value: u64) -> usize {
    if max_value <= 0xFF {
        1
    } else if max_value <= 0xFFFF {
        2
    } else if max_value <= 0xFFFF_FFFF {
        4
    } else {
        8
    }
}

fn write_ref(buf: &mut Vec<u8>, id: usize, ref_size: usize) {
    let id = id as u64;
    match ref_size {
        1 => buf.push(id as u8),
        2 => buf.extend_from_slice(&(id as u16).to_be_bytes()),
        4 => buf.extend_from_slice(&(id as u32).to_be_bytes()),
        8 => buf.extend_from_slice(&id.to_be_bytes()),
        _ => unreachable!(),
    }
}

/// Encodes `root` as a `bplist00` document.
///
/// # UTF-16 deviation
///
/// Apple's canonical bplist format stores 16-bit string bodies big-endian.
/// A frequently-copied reference implementation writes them little-endian
/// while keeping the length header big-endian, producing a file that only
/// its own decoder can read back correctly. This encoder always emits
/// UTF-16BE, matching Apple's CoreFoundation decoders.
pub fn encode(root: &PlistValue) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.intern(root);

    let ref_size = byte_width((enc.nodes.len().saturating_sub(1)) as u64);

    let mut buf = Vec::new();
    buf.extend_from_slice(b"bplist00");

    let mut offsets = Vec::with_capacity(enc.nodes.len());
    for node in &enc.nodes {
        offsets.push(buf.len() as u64);
        match node {
            Node::Null => buf.push(0x00),
            Node::Bool(false) => buf.push(0x08),
            Node::Bool(true) => buf.push(0x09),
            Node::Int(i) => write_int_inline(&mut buf, *i),
            Node::Real(r) => {
                buf.push(0x23);
                buf.extend_from_slice(&r.to_be_bytes());
            }
            Node::Date(d) => {
                buf.push(0x33);
                buf.extend_from_slice(&d.to_be_bytes());
            }
            Node::Data(data) => {
                write_len_tagged(&mut buf, 0x40, data.len());
                buf.extend_from_slice(data);
            }
            Node::StringAscii(s) => {
                write_len_tagged(&mut buf, 0x50, s.len());
                buf.extend_from_slice(s.as_bytes());
            }
            Node::StringUtf16(s) => {
                let units: Vec<u16> = s.encode_utf16().collect();
                write_len_tagged(&mut buf, 0x60, units.len());
                for unit in units {
                    buf.extend_from_slice(&unit.to_be_bytes());
                }
            }
            Node::Array(children) => {
                write_len_tagged(&mut buf, 0xA0, children.len());
                for &id in children {
                    write_ref(&mut buf, id, ref_size);
                }
            }
            Node::Dict(keys, values) => {
                write_len_tagged(&mut buf, 0xD0, keys.len());
                for &id in keys {
                    write_ref(&mut buf, id, ref_size);
                }
                for &id in values {
                    write_ref(&mut buf, id, ref_size);
                }
            }
        }
    }

    let offset_table_offset = buf.len() as u64;
    let offset_size = byte_width(offset_table_offset);
    for &offset in &offsets {
        match offset_size {
            1 => buf.push(offset as u8),
            2 => buf.extend_from_slice(&(offset as u16).to_be_bytes()),
            4 => buf.extend_from_slice(&(offset as u32).to_be_bytes()),
            8 => buf.extend_from_slice(&offset.to_be_bytes()),
            _ => unreachable!(),
        }
    }

    buf.extend_from_slice(&[0u8; 6]);
    buf.push(offset_size as u8);
    buf.push(ref_size as u8);
    buf.extend_from_slice(&(enc.nodes.len() as u64).to_be_bytes());
    buf.extend_from_slice(&0u64.to_be_bytes()); // top_object_id, always 0
    buf.extend_from_slice(&offset_table_offset.to_be_bytes());
    buf
}

// ---------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------

struct Trailer {
    offset_size: usize,
    ref_size: usize,
    num_objects: usize,
    top_object: usize,
    offset_table_offset: usize,
}

fn read_uint(buf: &[u8], pos: usize, width: usize) -> Result<u64> {
    let end = pos
        .checked_add(width)
        .ok_or_else(|| Error::codec("integer read overflowed buffer length"))?;
    if end > buf.len() {
        return Err(Error::codec("truncated bplist buffer"));
    }
    let mut value: u64 = 0;
    for &b in &buf[pos..end] {
        value = (value << 8) | b as u64;
    }
    Ok(value)
}

fn valid_width(width: usize) -> bool {
    matches!(width, 1 | 2 | 4 | 8)
}

fn parse_trailer(buf: &[u8]) -> Result<Trailer> {
    if buf.len() < 8 + TRAILER_SIZE {
        return Err(Error::codec("buffer too short to contain a bplist trailer"));
    }
    if &buf[0..6] != HEADER_MAGIC || &buf[6..8] != b"00" {
        return Err(Error::codec("invalid bplist magic"));
    }
    let trailer = &buf[buf.len() - TRAILER_SIZE..];
    let offset_size = trailer[6] as usize;
    let ref_size = trailer[7] as usize;
    if !valid_width(offset_size) || !valid_width(ref_size) {
        return Err(Error::codec("bad trailer: offset/ref size not in {1,2,4,8}"));
    }
    let num_objects = read_uint(trailer, 8, 8)? as usize;
    let top_object = read_uint(trailer, 16, 8)? as usize;
    let offset_table_offset = read_uint(trailer, 24, 8)? as usize;
    if top_object >= num_objects {
        return Err(Error::codec("top_object_id out of range"));
    }
    if offset_table_offset >= buf.len() {
        return Err(Error::codec("offset table offset out of range"));
    }
    Ok(Trailer {
        offset_size,
        ref_size,
        num_objects,
        top_object,
        offset_table_offset,
    })
}

struct Decoder<'a> {
    buf: &'a [u8],
    offsets: Vec<usize>,
    ref_size: usize,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8], trailer: &Trailer) -> Result<Self> {
        let mut offsets = Vec::with_capacity(trailer.num_objects);
        for i in 0..trailer.num_objects {
            let pos = trailer
                .offset_table_offset
                .checked_add(i * trailer.offset_size)
                .ok_or_else(|| Error::codec("offset table index overflow"))?;
            let offset = read_uint(buf, pos, trailer.offset_size)? as usize;
            if offset >= trailer.offset_table_offset {
                return Err(Error::codec("object offset overlaps offset table"));
            }
            offsets.push(offset);
        }
        Ok(Decoder {
            buf,
            offsets,
            ref_size: trailer.ref_size,
        })
    }

    fn read_ref(&self, pos: usize) -> Result<usize> {
        Ok(read_uint(self.buf, pos, self.ref_size)? as usize)
    }

    fn object_offset(&self, id: usize) -> Result<usize> {
        self.offsets
            .get(id)
            .copied()
            .ok_or_else(|| Error::codec("reference to out-of-range object id"))
    }

    /// Reads the `(marker_low_nibble, length)` pair used by data/string/
    /// array/dict records, returning the length and how many extra bytes
    /// (beyond the one marker byte) were consumed encoding it.
    fn read_count(&self, pos: usize, low_nibble: u8) -> Result<(usize, usize)> {
        if low_nibble != 0x0F {
            return Ok((low_nibble as usize, 0));
        }
        if pos >= self.buf.len() {
            return Err(Error::codec("truncated extended-length header"));
        }
        let int_tag = self.buf[pos];
        if int_tag & 0xF0 != 0x10 {
            return Err(Error::codec("extended length header is not an int"));
        }
        let width = 1usize << (int_tag & 0x0F);
        if !valid_width(width) {
            return Err(Error::codec("extended length header has invalid width"));
        }
        let value = read_uint(self.buf, pos + 1, width)?;
        Ok((value as usize, 1 + width))
    }

    fn materialize(&self, id: usize, ancestors: &mut HashSet<usize>) -> Result<PlistValue> {
        if !ancestors.insert(id) {
            return Err(Error::codec("cyclic object reference"));
        }
        let result = self.materialize_inner(id, ancestors);
        ancestors.remove(&id);
        result
    }

    fn materialize_inner(&self, id: usize, ancestors: &mut HashSet<usize>) -> Result<PlistValue> {
        let offset = self.object_offset(id)?;
        if offset >= self.buf.len() {
            return Err(Error::codec("object record offset out of bounds"));
        }
        let marker = self.buf[offset];
        let high = marker >> 4;
        let low = marker & 0x0F;
        match high {
            0x0 => match marker {
                0x00 => Ok(PlistValue::Null),
                0x08 => Ok(PlistValue::Bool(false)),
                0x09 => Ok(PlistValue::Bool(true)),
                _ => Err(Error::codec("unsupported singleton marker")),
            },
            0x1 => {
                let width = 1usize << low;
                if !valid_width(width) {
                    return Err(Error::codec("invalid int width"));
                }
                let bytes = read_uint(self.buf, offset + 1, width)?;
                let value = match width {
                    1 => (bytes as u8) as i8 as i64,
                    2 => (bytes as u16) as i16 as i64,
                    4 => (bytes as u32) as i32 as i64,
                    8 => bytes as i64,
                    _ => unreachable!(),
                };
                Ok(PlistValue::Int(value))
            }
            0x2 => {
                let width = 1usize << low;
                let bits = read_uint(self.buf, offset + 1, width)?;
                match width {
                    4 => Ok(PlistValue::Real(f32::from_bits(bits as u32) as f64)),
                    8 => Ok(PlistValue::Real(f64::from_bits(bits))),
                    _ => Err(Error::codec("invalid real width")),
                }
            }
            0x3 => {
                if low != 0x3 {
                    return Err(Error::codec("invalid date marker"));
                }
                let bits = read_uint(self.buf, offset + 1, 8)?;
                Ok(PlistValue::Date(f64::from_bits(bits)))
            }
            0x4 => {
                let (len, extra) = self.read_count(offset + 1, low)?;
                let start = offset + 1 + extra;
                let end = start
                    .checked_add(len)
                    .ok_or_else(|| Error::codec("data length overflow"))?;
                if end > self.buf.len() {
                    return Err(Error::codec("truncated data object"));
                }
                Ok(PlistValue::Data(self.buf[start..end].to_vec()))
            }
            0x5 => {
                let (len, extra) = self.read_count(offset + 1, low)?;
                let start = offset + 1 + extra;
                let end = start
                    .checked_add(len)
                    .ok_or_else(|| Error::codec("string length overflow"))?;
                if end > self.buf.len() {
                    return Err(Error::codec("truncated ascii string"));
                }
                let s = std::str::from_utf8(&self.buf[start..end])
                    .map_err(|_| Error::codec("ascii string is not valid utf-8"))?;
                Ok(PlistValue::String(s.to_owned()))
            }
            0x6 => {
                let (units, extra) = self.read_count(offset + 1, low)?;
                let start = offset + 1 + extra;
                let byte_len = units
                    .checked_mul(2)
                    .ok_or_else(|| Error::codec("utf16 length overflow"))?;
                let end = start
                    .checked_add(byte_len)
                    .ok_or_else(|| Error::codec("utf16 length overflow"))?;
                if end > self.buf.len() {
                    return Err(Error::codec("truncated utf16 string"));
                }
                let code_units: Vec<u16> = self.buf[start..end]
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                let s = String::from_utf16(&code_units)
                    .map_err(|_| Error::codec("invalid utf-16 string"))?;
                Ok(PlistValue::String(s))
            }
            0xA => {
                let (len, extra) = self.read_count(offset + 1, low)?;
                let mut pos = offset + 1 + extra;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    let child_id = self.read_ref(pos)?;
                    items.push(self.materialize(child_id, ancestors)?);
                    pos += self.ref_size;
                }
                Ok(PlistValue::Array(items))
            }
            0xD => {
                let (len, extra) = self.read_count(offset + 1, low)?;
                let mut pos = offset + 1 + extra;
                let mut key_ids = Vec::with_capacity(len);
                for _ in 0..len {
                    key_ids.push(self.read_ref(pos)?);
                    pos += self.ref_size;
                }
                let mut dict = IndexMap::with_capacity(len);
                for key_id in key_ids {
                    let value_id = self.read_ref(pos)?;
                    pos += self.ref_size;
                    let key = match self.materialize(key_id, ancestors)? {
                        PlistValue::String(s) => s,
                        _ => return Err(Error::codec("dict key is not a string")),
                    };
                    let value = self.materialize(value_id, ancestors)?;
                    dict.insert(key, value);
                }
                Ok(PlistValue::Dict(dict))
            }
            _ => Err(Error::codec("unknown object marker")),
        }
    }
}

/// Decodes a `bplist00` document into a [`PlistValue`].
pub fn decode(buf: &[u8]) -> Result<PlistValue> {
    let trailer = parse_trailer(buf)?;
    let decoder = Decoder::new(buf, &trailer)?;
    let mut ancestors = HashSet::new();
    decoder.materialize(trailer.top_object, &mut ancestors)
}

// ---------------------------------------------------------------------
// serde support
//
// `PlistValue` is self-describing the same way `serde_json::Value` is,
// which lets the XML dialect round-trip through the `plist` crate's
// generic `to_writer_xml`/`from_reader` entry points exactly the way
// `peertalk::protocol::Command` already does, instead of hand-matching
// `plist::Value`'s own variants.
// ---------------------------------------------------------------------

impl Serialize for PlistValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            PlistValue::Null => serializer.serialize_none(),
            PlistValue::Bool(b) => serializer.serialize_bool(*b),
            PlistValue::Int(i) => serializer.serialize_i64(*i),
            PlistValue::Real(r) => serializer.serialize_f64(*r),
            PlistValue::Date(seconds) => serializer.serialize_f64(*seconds),
            PlistValue::Data(d) => serializer.serialize_bytes(d),
            PlistValue::String(s) => serializer.serialize_str(s),
            PlistValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            PlistValue::Dict(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

struct PlistValueVisitor;

impl<'de> Visitor<'de> for PlistValueVisitor {
    type Value = PlistValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a property list value")
    }

    fn visit_bool<E>(self, v: bool) -> std::result::Result<Self::Value, E> {
        Ok(PlistValue::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> std::result::Result<Self::Value, E> {
        Ok(PlistValue::Int(v))
    }

    fn visit_u64<E>(self, v: u64) -> std::result::Result<Self::Value, E> {
        Ok(PlistValue::Int(v as i64))
    }

    fn visit_f64<E>(self, v: f64) -> std::result::Result<Self::Value, E> {
        Ok(PlistValue::Real(v))
    }

    fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E> {
        Ok(PlistValue::String(v.to_owned()))
    }

    fn visit_string<E>(self, v: String) -> std::result::Result<Self::Value, E> {
        Ok(PlistValue::String(v))
    }

    fn visit_bytes<E>(self, v: &[u8]) -> std::result::Result<Self::Value, E> {
        Ok(PlistValue::Data(v.to_vec()))
    }

    fn visit_byte_buf<E>(self, v: Vec<u8>) -> std::result::Result<Self::Value, E> {
        Ok(PlistValue::Data(v))
    }

    fn visit_unit<E>(self) -> std::result::Result<Self::Value, E> {
        Ok(PlistValue::Null)
    }

    fn visit_none<E>(self) -> std::result::Result<Self::Value, E> {
        Ok(PlistValue::Null)
    }

    fn visit_some<D>(self, deserializer: D) -> std::result::Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        PlistValue::deserialize(deserializer)
    }

    fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(PlistValue::Array(items))
    }

    fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut entries = IndexMap::new();
        while let Some((k, v)) = map.next_entry::<String, PlistValue>()? {
            entries.insert(k, v);
        }
        Ok(PlistValue::Dict(entries))
    }
}

impl<'de> Deserialize<'de> for PlistValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(PlistValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_and_version_are_exact() {
        let v = PlistValue::dict([("a".to_owned(), PlistValue::Int(1))]);
        let buf = encode(&v);
        assert_eq!(&buf[..8], b"bplist00");
    }

    #[test]
    fn round_trips_the_scenario_from_the_spec() {
        let v = PlistValue::dict([
            ("a".to_owned(), PlistValue::Int(1)),
            (
                "b".to_owned(),
                PlistValue::Array(vec![PlistValue::Bool(true), PlistValue::Null]),
            ),
        ]);
        let buf = encode(&v);
        let decoded = decode(&buf).unwrap();
        assert_eq!(decoded, v);

        let trailer_offset_size = buf[buf.len() - 26];
        let trailer_ref_size = buf[buf.len() - 25];
        assert_eq!(trailer_offset_size, 1);
        assert_eq!(trailer_ref_size, 1);
        let num_objects = read_uint(&buf, buf.len() - 24, 8).unwrap();
        let top = read_uint(&buf, buf.len() - 16, 8).unwrap();
        assert_eq!(top, 0);
        // dict, "a", 1, "b", array, true, null: 7 distinct object records
        // under our canonical-atom scheme (null and true each consume one
        // id the first time they're seen).
        assert_eq!(num_objects, 7);
    }

    #[test]
    fn round_trips_every_primitive_shape() {
        let v = PlistValue::Array(vec![
            PlistValue::Null,
            PlistValue::Bool(true),
            PlistValue::Bool(false),
            PlistValue::Int(-1),
            PlistValue::Int(200),
            PlistValue::Int(70_000),
            PlistValue::Int(5_000_000_000),
            PlistValue::Real(3.5),
            PlistValue::Date(12345.5),
            PlistValue::Data(vec![1, 2, 3, 4, 5]),
            PlistValue::String("ascii".into()),
            PlistValue::String("héllo wörld".into()),
        ]);
        let buf = encode(&v);
        assert!(is_bplist(&buf));
        let decoded = decode(&buf).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn encodes_utf16_big_endian_not_little_endian() {
        let v = PlistValue::String("é".into());
        let buf = encode(&v);
        // tag 0x61 (utf16 string, length 1 code unit), then 'é' = U+00E9
        // big-endian: 0x00 0xE9. A little-endian bug would write E9 00.
        let tag_pos = buf.iter().position(|&b| b == 0x61).unwrap();
        assert_eq!(&buf[tag_pos + 1..tag_pos + 3], &[0x00, 0xE9]);
    }

    #[test]
    fn rejects_cyclic_references() {
        // Hand-build a 1-object array whose single reference points back
        // to itself.
        let mut buf = Vec::new();
        buf.extend_from_slice(b"bplist00");
        let self_offset = buf.len() as u64;
        buf.push(0xA1); // array, length 1
        buf.push(0x00); // ref to object id 0 (itself)
        let offset_table_offset = buf.len() as u64;
        buf.push(self_offset as u8);
        buf.extend_from_slice(&[0u8; 6]);
        buf.push(1); // offset_size
        buf.push(1); // ref_size
        buf.extend_from_slice(&1u64.to_be_bytes()); // num_objects
        buf.extend_from_slice(&0u64.to_be_bytes()); // top_object_id
        buf.extend_from_slice(&offset_table_offset.to_be_bytes());

        let err = decode(&buf).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn rejects_references_past_num_objects() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"bplist00");
        buf.push(0xA1); // array, length 1
        buf.push(0x05); // ref to object id 5, but only 1 object exists
        let offset_table_offset = buf.len() as u64;
        buf.push(8u8);
        buf.extend_from_slice(&[0u8; 6]);
        buf.push(1);
        buf.push(1);
        buf.extend_from_slice(&1u64.to_be_bytes());
        buf.extend_from_slice(&0u64.to_be_bytes());
        buf.extend_from_slice(&offset_table_offset.to_be_bytes());

        assert!(decode(&buf).is_err());
    }

    #[test]
    fn is_bplist_checks_prefix_only() {
        assert!(is_bplist(b"bplist00garbage"));
        assert!(!is_bplist(b"<?xml version"));
        assert!(!is_bplist(b"bpl"));
    }
}
