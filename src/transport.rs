//! `PlistTransport`: a length-prefixed socket that speaks plists.
//!
//! Wraps a raw byte stream with a [`LengthSplitter`] and a plist codec,
//! and knows how to swap the underlying socket for a TLS session
//! mid-flight. Used directly by `LockdownClient`; `MuxClient` builds a
//! thinner, tag-aware layer of its own directly on `LengthSplitter`
//! since its envelope carries extra fixed header fields the generic
//! transport here doesn't know about.
//!
//! Grounded on `peertalk::protocol::Packet::{write_into, from_reader}`
//! for the read/write-loop shape, generalized to support a pluggable
//! underlying socket (plain TCP, Unix socket, or TLS) the way
//! `jkcoxson/idevice`'s `Idevice` wraps `Box<dyn ReadWrite>`.

use std::io::{self, Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::trace;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};

use crate::bplist::{self, PlistValue};
use crate::error::{Error, Result};
use crate::framing::{LengthSplitter, SplitterConfig};
use crate::xml_plist;

/// A raw duplex byte stream that also supports a read deadline.
///
/// Implemented for every concrete socket type this crate hands a
/// `PlistTransport`, including TLS streams, so `upgrade_tls` can swap
/// the concrete type without changing the transport's public API.
pub trait Socket: Read + Write + Send {
    /// Sets the deadline for the next `read` call; `None` blocks forever.
    fn set_read_timeout(&mut self, dur: Option<Duration>) -> io::Result<()>;
}

impl Socket for TcpStream {
    fn set_read_timeout(&mut self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, dur)
    }
}

#[cfg(unix)]
impl Socket for UnixStream {
    fn set_read_timeout(&mut self, dur: Option<Duration>) -> io::Result<()> {
        UnixStream::set_read_timeout(self, dur)
    }
}

impl Socket for StreamOwned<ClientConnection, Box<dyn Socket>> {
    fn set_read_timeout(&mut self, dur: Option<Duration>) -> io::Result<()> {
        self.sock.set_read_timeout(dur)
    }
}

/// Which plist dialect to use when *encoding* outbound messages.
/// Inbound messages are always dialect-sniffed per §9 (probe the
/// `"bplist"` prefix, fall through to XML).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlistFormat {
    /// Binary property list (`bplist00`), used by the muxer dialect.
    Binary,
    /// XML property list, used by the lockdown dialect.
    Xml,
}

fn decode_either(buf: &[u8]) -> Result<PlistValue> {
    if bplist::is_bplist(buf) {
        bplist::decode(buf)
    } else {
        xml_plist::decode(buf)
    }
}

/// Wraps a boxed [`Socket`] with framing and codec logic.
pub struct PlistTransport {
    stream: Box<dyn Socket>,
    splitter: LengthSplitter,
    send_format: PlistFormat,
}

impl PlistTransport {
    /// Wraps `stream` with a splitter built from `splitter_config`,
    /// encoding outbound messages in `send_format`.
    pub fn new(stream: Box<dyn Socket>, splitter_config: SplitterConfig, send_format: PlistFormat) -> Self {
        PlistTransport {
            stream,
            splitter: LengthSplitter::new(splitter_config),
            send_format,
        }
    }

    /// Encodes `value` with the configured outbound dialect and writes
    /// it, length-prefixed, in one call. The byte order in which
    /// concurrent callers invoke `send` is exactly the byte order
    /// written to the peer; callers sharing one transport across
    /// threads must serialize access themselves (§5) — this type does
    /// not take an internal lock.
    pub fn send(&mut self, value: &PlistValue) -> Result<()> {
        let body = match self.send_format {
            PlistFormat::Binary => bplist::encode(value),
            PlistFormat::Xml => xml_plist::encode(value)?,
        };
        self.send_raw(&body)
    }

    /// Writes `body` length-prefixed per the transport's splitter
    /// configuration, without interpreting `body` as a plist. Used by
    /// `MuxClient`, whose envelope carries extra fixed header fields
    /// (version/type/tag) ahead of the plist payload that this
    /// transport has no opinion about.
    pub fn send_raw(&mut self, body: &[u8]) -> Result<()> {
        let cfg = self.splitter.config();
        let frame_len = body.len() as i64 - cfg.adjust;
        if frame_len < 0 {
            return Err(Error::framing("encoded body shorter than splitter header implies"));
        }
        let mut out = vec![0u8; cfg.length_offset];
        write_uint(&mut out, frame_len as u64, cfg.length_width, cfg.endian);
        out.extend_from_slice(body);
        trace!("transport: sending {}-byte frame ({} byte body)", out.len(), body.len());
        self.stream.write_all(&out)?;
        Ok(())
    }

    /// Blocks until one complete frame has arrived, or `timeout` elapses.
    pub fn receive(&mut self, timeout: Duration) -> Result<PlistValue> {
        let frame = self.receive_raw(timeout)?;
        trace!("transport: decoding a {}-byte plist frame", frame.len());
        decode_either(&frame)
    }

    /// Like [`PlistTransport::receive`] but returns the raw frame bytes
    /// without decoding, for callers (like `MuxClient`) whose envelope
    /// carries extra header fields ahead of the plist body.
    pub fn receive_raw(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.splitter.try_take_frame()? {
                return Ok(frame);
            }
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(Error::Timeout { tag: 0 })?;
            self.stream.set_read_timeout(Some(remaining))?;
            let mut buf = [0u8; 4096];
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    return Err(Error::Transport(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed the connection",
                    )))
                }
                Ok(n) => self.splitter.feed(&buf[..n]),
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Err(Error::Timeout { tag: 0 })
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Strict request/response round trip: send, then await the next
    /// frame. Not safe to call concurrently on a shared transport.
    pub fn send_and_receive(&mut self, value: &PlistValue, timeout: Duration) -> Result<PlistValue> {
        self.send(value)?;
        self.receive(timeout)
    }

    /// Hands back the raw stream and the splitter's leftover buffered
    /// bytes, shutting the splitter down. Used by `MuxClient::connect`
    /// to release ownership of a freshly-opened device stream.
    pub fn into_raw_parts(mut self) -> (Box<dyn Socket>, Vec<u8>) {
        let leftover = self.splitter.shutdown();
        (self.stream, leftover)
    }

    /// Upgrades the underlying socket to TLS in place. Per §4.3, the
    /// splitter's buffer MUST be empty at this point — anything left
    /// over is a protocol error, not bytes to carry across.
    ///
    /// `trust_anchors` mirrors `upgrade_tls(identity, trust_anchors?)`:
    /// when absent, server certificate verification is disabled (the
    /// default, since the device presents a self-signed cert); when
    /// present, normal verification against those anchors applies.
    pub fn upgrade_tls(
        &mut self,
        client_cert_chain: Vec<rustls::pki_types::CertificateDer<'static>>,
        client_key: rustls::pki_types::PrivateKeyDer<'static>,
        trust_anchors: Option<RootCertStore>,
        new_splitter_config: SplitterConfig,
    ) -> Result<()> {
        let leftover = self.splitter.shutdown();
        if !leftover.is_empty() {
            return Err(Error::framing(
                "splitter had buffered bytes past the last complete frame at TLS upgrade",
            ));
        }

        let builder = ClientConfig::builder();
        let config = if let Some(roots) = trust_anchors {
            builder
                .with_root_certificates(roots)
                .with_client_auth_cert(client_cert_chain, client_key)
                .map_err(|e| Error::Protocol(format!("invalid client identity: {e}")))?
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoServerVerification))
                .with_client_auth_cert(client_cert_chain, client_key)
                .map_err(|e| Error::Protocol(format!("invalid client identity: {e}")))?
        };

        let server_name = rustls::pki_types::ServerName::try_from("localhost")
            .expect("\"localhost\" is always a valid SNI name")
            .to_owned();
        let conn = ClientConnection::new(Arc::new(config), server_name)?;

        let old_stream = std::mem::replace(&mut self.stream, Box::new(NullSocket));
        let tls_stream = StreamOwned::new(conn, old_stream);
        self.stream = Box::new(tls_stream);
        self.splitter = LengthSplitter::new(new_splitter_config);
        Ok(())
    }
}

fn write_uint(out: &mut Vec<u8>, value: u64, width: usize, endian: crate::framing::Endian) {
    let bytes = value.to_be_bytes();
    let be = &bytes[8 - width..];
    match endian {
        crate::framing::Endian::Big => out.extend_from_slice(be),
        crate::framing::Endian::Little => out.extend(be.iter().rev()),
    }
}

/// Placeholder occupying `self.stream` for the instant between taking
/// ownership of the old socket and installing the TLS-wrapped one.
struct NullSocket;
impl Read for NullSocket {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::NotConnected, "transport mid-upgrade"))
    }
}
impl Write for NullSocket {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::NotConnected, "transport mid-upgrade"))
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
impl Socket for NullSocket {
    fn set_read_timeout(&mut self, _dur: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

/// Disables server certificate verification, matching §6: "Server
/// certificate verification is disabled by default (device presents a
/// self-signed cert)".
#[derive(Debug)]
struct NoServerVerification;

impl rustls::client::danger::ServerCertVerifier for NoServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
