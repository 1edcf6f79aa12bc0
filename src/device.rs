//! `Device`: an entry from the muxer's device list.
//!
//! Grounded on `peertalk::protocol::DeviceAttachedInfo`/`ProductType`,
//! which parsed the same property bag from the muxer's `Attached`
//! event; here it's the `DeviceList` response instead.

use crate::bplist::PlistValue;
use crate::error::{Error, Result};

/// The `Properties` sub-dictionary of a `DeviceList` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperties {
    /// The device's UDID, also used as its `ReadPairRecord` key.
    pub serial_number: String,
    /// How the device is attached, e.g. `"USB"`.
    pub connection_type: String,
    /// USB product id.
    pub product_id: u32,
    /// USB location id, host-controller-specific.
    pub location_id: u32,
    /// USB serial number string, usually identical to `serial_number`.
    pub usb_serial_number: String,
    /// Negotiated USB link speed in bits per second.
    pub connection_speed: u32,
}

/// One entry from the muxer's `DeviceList` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// The muxer's own id for this device, used by `MuxClient::connect`.
    pub device_id: u32,
    /// The device's property bag.
    pub properties: DeviceProperties,
}

impl Device {
    /// Parses one `DeviceList` entry.
    pub fn from_plist(value: &PlistValue) -> Result<Self> {
        let dict = value
            .as_dict()
            .ok_or_else(|| Error::protocol("device list entry is not a dict"))?;

        let device_id = dict
            .get("DeviceID")
            .and_then(PlistValue::as_int)
            .ok_or_else(|| Error::protocol("device entry missing DeviceID"))? as u32;

        let props = dict
            .get("Properties")
            .and_then(PlistValue::as_dict)
            .ok_or_else(|| Error::protocol("device entry missing Properties"))?;

        let string_field = |name: &str| -> Result<String> {
            props
                .get(name)
                .and_then(PlistValue::as_str)
                .map(str::to_owned)
                .ok_or_else(|| Error::protocol(format!("device properties missing {name}")))
        };
        let int_field = |name: &str| -> Result<u32> {
            props
                .get(name)
                .and_then(PlistValue::as_int)
                .map(|i| i as u32)
                .ok_or_else(|| Error::protocol(format!("device properties missing {name}")))
        };

        Ok(Device {
            device_id,
            properties: DeviceProperties {
                serial_number: string_field("SerialNumber")?,
                connection_type: string_field("ConnectionType")?,
                product_id: int_field("ProductID")?,
                location_id: int_field("LocationID")?,
                usb_serial_number: string_field("USBSerialNumber")?,
                connection_speed: int_field("ConnectionSpeed")?,
            },
        })
    }

    /// Parses the `DeviceList` payload's `DeviceList` array.
    pub fn list_from_plist(value: &PlistValue) -> Result<Vec<Device>> {
        let dict = value
            .as_dict()
            .ok_or_else(|| Error::protocol("ListDevices response is not a dict"))?;
        let entries = dict
            .get("DeviceList")
            .and_then(PlistValue::as_array)
            .ok_or_else(|| Error::protocol("ListDevices response missing DeviceList"))?;
        entries.iter().map(Device::from_plist).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn sample_entry() -> PlistValue {
        let mut props = IndexMap::new();
        props.insert("SerialNumber".to_owned(), PlistValue::String("abc123".into()));
        props.insert("ConnectionType".to_owned(), PlistValue::String("USB".into()));
        props.insert("ProductID".to_owned(), PlistValue::Int(4776));
        props.insert("LocationID".to_owned(), PlistValue::Int(0));
        props.insert("USBSerialNumber".to_owned(), PlistValue::String("abc123".into()));
        props.insert("ConnectionSpeed".to_owned(), PlistValue::Int(480_000_000));

        let mut entry = IndexMap::new();
        entry.insert("DeviceID".to_owned(), PlistValue::Int(7));
        entry.insert("Properties".to_owned(), PlistValue::Dict(props));
        PlistValue::Dict(entry)
    }

    #[test]
    fn parses_a_device_list_response() {
        let mut list_dict = IndexMap::new();
        list_dict.insert(
            "DeviceList".to_owned(),
            PlistValue::Array(vec![sample_entry()]),
        );
        let devices = Device::list_from_plist(&PlistValue::Dict(list_dict)).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_id, 7);
        assert_eq!(devices[0].properties.serial_number, "abc123");
    }

    #[test]
    fn rejects_payload_missing_device_list() {
        let err = Device::list_from_plist(&PlistValue::Dict(IndexMap::new())).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
