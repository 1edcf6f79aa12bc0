//! Crate-wide error type.
//!
//! Every public operation returns [`Result`], which wraps the failure
//! taxonomy described by the protocol design: transport, framing, codec,
//! protocol, muxer, timeout, and state errors. Lower-level modules may use
//! narrower error enums internally; they convert into [`Error`] at the
//! module boundary via `From`.

use std::io;

/// Result type used throughout the crate.
pub type Result<T> = ::std::result::Result<T, Error>;

/// Errors that can occur while talking to the USB mux, lockdown, or a
/// CoreDeviceProxy RemoteXPC channel.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A socket-level I/O failure, or a TLS handshake failure.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// A `LengthSplitter` invariant was violated: a declared frame length
    /// exceeded `max_frame`, or the transport's buffer was non-empty at a
    /// TLS upgrade boundary.
    #[error("framing error: {0}")]
    Framing(String),

    /// A bplist, XPC, or HTTP/2 buffer failed to decode.
    #[error("codec error: {0}")]
    Codec(String),

    /// An XML-dialect plist failed to parse via the `plist` crate.
    #[error("xml plist error: {0}")]
    XmlPlist(#[from] plist::Error),

    /// A PEM-encoded certificate or private key in a pair record failed to
    /// parse.
    #[error("PEM parse error: {0}")]
    Pem(String),

    /// TLS session error raised by the TLS implementation once a handshake
    /// is underway.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The peer sent a well-formed but unexpected message: wrong message
    /// type, a missing required field, or an out-of-sequence lockdown
    /// reply.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The host muxer reported a non-zero result code.
    #[error("muxer error: {0:?}")]
    Muxer(MuxerError),

    /// A request's deadline elapsed before a response arrived. The
    /// transport itself remains usable; the caller may retry with a fresh
    /// tag.
    #[error("request with tag {tag} timed out")]
    Timeout {
        /// The tag (or channel/id pair, packed into the low 32 bits) of
        /// the request that timed out.
        tag: u32,
    },

    /// An operation was invoked while the connection was in the wrong
    /// state, e.g. `start_service` before a successful `start_session`.
    #[error("invalid state: expected {expected}, was {actual}")]
    State {
        /// The state the operation required.
        expected: &'static str,
        /// The state the connection was actually in.
        actual: &'static str,
    },

    /// No usbmuxd socket could be found by any discovery strategy.
    #[error("no usbmuxd socket available")]
    SocketUnavailable,
}

/// The non-zero result codes the host muxer can return for a `Connect` or
/// `Listen` request, per `peertalk`'s `ReplyCode` plus the generic
/// catch-all the spec requires (`MuxError(code)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxerError {
    /// `BadCommand` (1): the muxer didn't recognize the request.
    BadCommand,
    /// `BadDevice` (2): the requested device id is not attached.
    BadDevice,
    /// `ConnectionRefused` (3): the device refused the port connection.
    ConnectionRefused,
    /// `BadVersion` (6): the muxer doesn't support the protocol version sent.
    BadVersion,
    /// Any other non-zero result code.
    Other(i64),
}

impl From<i64> for MuxerError {
    fn from(code: i64) -> Self {
        match code {
            1 => MuxerError::BadCommand,
            2 => MuxerError::BadDevice,
            3 => MuxerError::ConnectionRefused,
            6 => MuxerError::BadVersion,
            c => MuxerError::Other(c),
        }
    }
}

impl Error {
    pub(crate) fn framing(msg: impl Into<String>) -> Self {
        Error::Framing(msg.into())
    }

    pub(crate) fn codec(msg: impl Into<String>) -> Self {
        Error::Codec(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub(crate) fn muxer(code: i64) -> Self {
        Error::Muxer(MuxerError::from(code))
    }
}
