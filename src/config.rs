//! Crate-wide configuration: muxer socket discovery, default timeouts,
//! and the `LengthSplitter` frame-size ceiling.
//!
//! Purely additive ambient plumbing — the protocol design never says
//! these knobs are unconfigurable, it just documents the default
//! resolution order (§4.4/§6), which `Config` encodes as a constructor
//! plus an environment-driven override, mirroring how `peertalk`'s
//! examples read connection parameters from their own constants.

use std::env;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default muxer socket path on platforms that have a Unix domain
/// socket for `usbmuxd`.
pub const DEFAULT_UNIX_SOCKET: &str = "/var/run/usbmuxd";
/// Loopback fallback used on platforms without a Unix socket (or when
/// none is found), per §4.4's discovery order.
pub const DEFAULT_LOOPBACK_ADDR: &str = "127.0.0.1:27015";
/// The device-side lockdown TCP port, reached via `MuxClient::connect`.
pub const LOCKDOWN_PORT: u16 = 62078;
/// Environment variable consulted before falling back to well-known
/// socket locations.
pub const SOCKET_ENV_VAR: &str = "USBMUXD_SOCKET_ADDRESS";

/// Where to find the muxer socket, already resolved from either an
/// explicit override or the `USBMUXD_SOCKET_ADDRESS` environment
/// variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxerAddress {
    /// A Unix domain socket path.
    Unix(String),
    /// A `host:port` TCP address.
    Tcp(String),
}

/// Muxer discovery settings and the crate's tunable defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Explicit muxer address; if set, takes priority over everything
    /// else in the discovery order.
    pub muxer_address: Option<MuxerAddress>,
    /// Default deadline for a single request/response round trip.
    pub default_timeout: Duration,
    /// Upper bound `LengthSplitter` enforces on a declared frame length.
    pub max_frame: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            muxer_address: None,
            default_timeout: Duration::from_secs(5),
            max_frame: 1 << 20,
        }
    }
}

impl Config {
    /// Builds a `Config` whose muxer address comes from
    /// `USBMUXD_SOCKET_ADDRESS`, if set, parsed the way §6 describes:
    /// a `unix:PATH` prefix, a `HOST:PORT` pair, or a plain filesystem
    /// path (implying a Unix socket).
    pub fn from_env() -> Self {
        let muxer_address = env::var(SOCKET_ENV_VAR).ok().map(|raw| parse_socket_address(&raw));
        Config {
            muxer_address,
            ..Config::default()
        }
    }

    /// Resolves the muxer address to actually dial, following §4.4's
    /// order: explicit argument, then this config's (environment- or
    /// caller-supplied) address, then `/var/run/usbmuxd`, then loopback
    /// TCP on platforms where a Unix socket isn't the native transport
    /// (Windows, WSL1). On a Unix platform where `/var/run/usbmuxd`
    /// doesn't exist, there is no well-known socket left to fall back
    /// to, so this returns `SocketUnavailable` rather than guessing at
    /// loopback.
    pub fn resolve_muxer_address(&self, explicit: Option<MuxerAddress>) -> Result<MuxerAddress> {
        if let Some(addr) = explicit {
            return Ok(addr);
        }
        if let Some(addr) = &self.muxer_address {
            return Ok(addr.clone());
        }
        if cfg!(unix) {
            return if std::path::Path::new(DEFAULT_UNIX_SOCKET).exists() {
                Ok(MuxerAddress::Unix(DEFAULT_UNIX_SOCKET.to_owned()))
            } else {
                Err(Error::SocketUnavailable)
            };
        }
        Ok(MuxerAddress::Tcp(DEFAULT_LOOPBACK_ADDR.to_owned()))
    }
}

fn parse_socket_address(raw: &str) -> MuxerAddress {
    if let Some(path) = raw.strip_prefix("unix:") {
        return MuxerAddress::Unix(path.to_owned());
    }
    if raw.contains(':') && raw.parse::<std::net::SocketAddr>().is_ok() {
        return MuxerAddress::Tcp(raw.to_owned());
    }
    // A bare "HOST:PORT" that doesn't parse as a SocketAddr (e.g. a
    // hostname rather than an IP) is still meant as TCP, per §6.
    if raw.rsplit_once(':').map(|(_, p)| p.parse::<u16>().is_ok()).unwrap_or(false) {
        return MuxerAddress::Tcp(raw.to_owned());
    }
    MuxerAddress::Unix(raw.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix_prefixed_addresses() {
        assert_eq!(
            parse_socket_address("unix:/tmp/usbmuxd.sock"),
            MuxerAddress::Unix("/tmp/usbmuxd.sock".to_owned())
        );
    }

    #[test]
    fn parses_host_port_addresses() {
        assert_eq!(
            parse_socket_address("127.0.0.1:27015"),
            MuxerAddress::Tcp("127.0.0.1:27015".to_owned())
        );
    }

    #[test]
    fn parses_bare_paths_as_unix() {
        assert_eq!(
            parse_socket_address("/var/run/usbmuxd"),
            MuxerAddress::Unix("/var/run/usbmuxd".to_owned())
        );
    }

    #[test]
    fn explicit_argument_wins_over_everything() {
        let config = Config {
            muxer_address: Some(MuxerAddress::Unix("/from/env".into())),
            ..Config::default()
        };
        let resolved = config.resolve_muxer_address(Some(MuxerAddress::Tcp("1.2.3.4:9".into()))).unwrap();
        assert_eq!(resolved, MuxerAddress::Tcp("1.2.3.4:9".into()));
    }

    #[test]
    fn config_address_wins_over_platform_defaults() {
        let config = Config {
            muxer_address: Some(MuxerAddress::Tcp("10.0.0.1:27015".into())),
            ..Config::default()
        };
        let resolved = config.resolve_muxer_address(None).unwrap();
        assert_eq!(resolved, MuxerAddress::Tcp("10.0.0.1:27015".into()));
    }
}
