//! Error types for protocol operations.

use busflash_core::port::ExchangeFault;
use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// No complete reply arrived within the response timeout.
    #[error("communication timeout")]
    Timeout,

    /// Reply checksum did not match.
    #[error("checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    Crc {
        /// Checksum computed over the received frame.
        expected: u16,
        /// Checksum carried by the frame.
        actual: u16,
    },

    /// Reply could not be decoded.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Device answered with a protocol exception code.
    #[error("device exception {0:#04x}")]
    Exception(u8),

    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtoError>;

impl From<std::io::Error> for ProtoError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => ProtoError::Timeout,
            _ => ProtoError::Io(e.to_string()),
        }
    }
}

impl From<ProtoError> for ExchangeFault {
    fn from(err: ProtoError) -> Self {
        match err {
            ProtoError::Timeout => ExchangeFault::NoResponse,
            ProtoError::Crc { .. } => ExchangeFault::Crc,
            ProtoError::Malformed(detail) => ExchangeFault::Malformed(detail),
            ProtoError::Exception(code) => ExchangeFault::Exception(code),
            ProtoError::Serial(e) => ExchangeFault::Io(e.to_string()),
            ProtoError::Io(detail) => ExchangeFault::Io(detail),
        }
    }
}
