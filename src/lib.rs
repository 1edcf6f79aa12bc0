//! Library for mediating USB communication with an iOS device by
//! speaking the host side of Apple's `usbmuxd` protocol, the on-device
//! lockdown daemon, and the HTTP/2 + XPC stack `CoreDeviceProxy`
//! services ride on top of.
//!
//! The modules mirror the protocol layers, bottom to top:
//!
//! * [`bplist`] / [`xml_plist`] — the two plist wire dialects.
//! * [`framing`] — the length-prefixed frame demuxer both the muxer
//!   and lockdown dialects are instances of.
//! * [`transport`] — a length-framed, plist-speaking socket that can
//!   upgrade to TLS in place.
//! * [`pairing`] / [`device`] — the data model the muxer and lockdown
//!   traffic carries.
//! * [`config`] — muxer discovery and the crate's tunable defaults.
//! * [`mux`] — the host muxer client.
//! * [`lockdown`] — the on-device lockdown session state machine.
//! * [`http2`] / [`xpc`] — the RemoteXPC carrier and wire codec.
//!
//! See [`error::Error`] for the failure taxonomy shared across all of
//! them.
#![forbid(missing_docs)]

pub mod bplist;
pub mod config;
pub mod device;
pub mod error;
pub mod framing;
pub mod http2;
pub mod lockdown;
pub mod mux;
pub mod pairing;
pub mod transport;
pub mod xml_plist;
pub mod xpc;

pub use error::{Error, Result};
