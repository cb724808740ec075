//! Error types for the RMAP engine.

use std::io;
use thiserror::Error;

use crate::config::ConfigError;

/// Result type for RMAP operations.
pub type Result<T> = std::result::Result<T, RmapError>;

/// Errors that can occur while driving the SSDTP2 transport, the RMAP codec
/// or the transaction engine.
///
/// Timeouts are deliberately *not* a variant here: per the source protocol's
/// contract, a socket `read`/`write` that exhausts its retry budget returns a
/// sentinel value (`None` / `-1`) rather than an error, so existing callers
/// keep working unmodified.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RmapError {
    /// A send or receive was attempted on a transport that is not open.
    #[error("transport is not open")]
    TransportClosed,

    /// A non-recoverable I/O failure on the underlying TCP socket.
    #[error("transport I/O error: {0}")]
    TransportIo(#[from] io::Error),

    /// An SSDTP2 frame carried an unrecognised flag byte, or an RMAP reply
    /// carried a protocol ID other than `0x01`.
    #[error("malformed frame: {0}")]
    FrameMalformed(String),

    /// CRC verification was requested and the computed checksum did not
    /// match the checksum carried on the wire.
    #[error("CRC mismatch")]
    CrcMismatch,

    /// A destination or `packetize` call specified a word width outside
    /// `{1, 2, 4}`.
    #[error("unsupported word width: {0}")]
    UnsupportedWordWidth(u8),

    /// An operation was attempted on an engine that has not been started,
    /// or has already been stopped.
    #[error("engine is not running")]
    EngineNotRunning,

    /// The engine's configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RmapError {
    /// Whether this error, observed on a `send`, is the "broken pipe"
    /// condition that auto-reconnect should treat as recoverable.
    #[must_use]
    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, RmapError::TransportIo(e) if e.kind() == io::ErrorKind::BrokenPipe)
    }

    /// Whether this error, observed on a `receive`, is the "connection reset
    /// by peer" condition that auto-reconnect should treat as recoverable.
    #[must_use]
    pub fn is_connection_reset(&self) -> bool {
        matches!(self, RmapError::TransportIo(e) if e.kind() == io::ErrorKind::ConnectionReset)
    }
}
