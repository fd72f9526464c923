//! Error types for coreflash.

use std::io;
use thiserror::Error;

/// Result type for coreflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for coreflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Malformed Intel-HEX input.
    #[error("Hex parse error: {0}")]
    Parse(String),

    /// Registration key is not 32 hex characters.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Version string is malformed, out of range, or all-zero.
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// Invalid argument caught before any device contact.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Bootloader protocol step failed (NACK, desync, short read).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Unrecoverable protocol mismatch or explicit abort from the device.
    #[error("Fatal protocol error: {0}")]
    ProtocolFatal(String),

    /// A registration header already occupies the requested slot.
    #[error("Already registered")]
    AlreadyRegistered,

    /// The identity header is neither clear nor valid.
    #[error("Identity header is corrupt")]
    HeaderCorrupt,

    /// Device carries no identity header yet.
    #[error("Device is unregistered, register it first")]
    NotRegistered,

    /// No embedded bootloader payload matches the device.
    #[error("Bootloader not found: {0}")]
    BootloaderNotFound(String),

    /// Unsupported board variant or operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Operation interrupted by the user.
    #[error("Cancelled by user")]
    Cancelled,
}

impl Error {
    /// Whether the surrounding session restart policy may retry after this
    /// error. Transport-level and per-step protocol failures are retryable
    /// by re-handshaking; input, format, and logical-refusal errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() != io::ErrorKind::NotFound,
            Error::Serial(_) | Error::Timeout(_) | Error::Protocol(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        assert!(Error::Timeout("no ack".into()).is_retryable());
        assert!(Error::Protocol("NACK".into()).is_retryable());
        assert!(Error::Io(io::Error::new(io::ErrorKind::TimedOut, "t")).is_retryable());
    }

    #[test]
    fn input_and_refusal_errors_are_fatal() {
        assert!(!Error::Parse("bad record".into()).is_retryable());
        assert!(!Error::InvalidKey("short".into()).is_retryable());
        assert!(!Error::AlreadyRegistered.is_retryable());
        assert!(!Error::HeaderCorrupt.is_retryable());
        assert!(!Error::ProtocolFatal("abort".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }
}
