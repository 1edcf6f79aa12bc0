//! XML-dialect plist glue.
//!
//! The XML encoding is only ever an external collaborator here: we hand
//! `PlistValue` straight to the `plist` crate's generic, serde-driven
//! entry points, the same way `peertalk::protocol::Command` round-trips
//! through `plist::to_writer_xml`/`plist::from_reader` today.

use crate::bplist::PlistValue;
use crate::error::{Error, Result};

/// Encodes `value` as an XML-dialect plist document.
pub fn encode(value: &PlistValue) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    plist::to_writer_xml(&mut buf, value).map_err(Error::from)?;
    Ok(buf)
}

/// Parses an XML-dialect plist document.
pub fn decode(buf: &[u8]) -> Result<PlistValue> {
    plist::from_reader(buf).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn round_trips_through_the_xml_dialect() {
        let mut dict = IndexMap::new();
        dict.insert("MessageType".to_owned(), PlistValue::String("ReadBUID".to_owned()));
        dict.insert("Count".to_owned(), PlistValue::Int(3));
        dict.insert("Flag".to_owned(), PlistValue::Bool(true));
        let value = PlistValue::Dict(dict);

        let xml = encode(&value).unwrap();
        assert!(xml.starts_with(b"<?xml"));
        let decoded = decode(&xml).unwrap();
        assert_eq!(decoded, value);
    }
}
