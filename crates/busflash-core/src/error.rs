//! Error types for the update engine.

use crate::device::BusAddress;
use semver::Version;
use thiserror::Error;

/// Result alias using the core [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while updating or recovering a device.
///
/// Transport-level silence (`NoResponse`) is the only retryable kind; it is
/// retried per [`crate::RetryPolicy`] and escalated only after exhaustion.
/// All other kinds propagate immediately to the calling layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Device stayed silent through all retries and settings candidates.
    #[error("no response from device {address}")]
    NoResponse {
        /// Address that did not answer.
        address: BusAddress,
    },

    /// Something answered, but the reply was malformed, failed its checksum
    /// or carried a device-reported exception. Never blindly retried:
    /// guessing the wrong operating mode again is unsafe.
    #[error("protocol fault talking to {address}: {detail}")]
    ProtocolFault {
        /// Address of the faulting exchange.
        address: BusAddress,
        /// Decoded fault description.
        detail: String,
    },

    /// Device generation predates self-update support; proceeding could
    /// brick it, so it is rejected before any bootloader transition.
    #[error("device {address} is too old to support firmware updates")]
    TooOldDevice {
        /// Address of the rejected device.
        address: BusAddress,
    },

    /// Firmware signature could not be determined (bootloader cannot report
    /// it and the identity cache has no entry).
    #[error("unknown firmware signature for device {address}")]
    UnknownSignature {
        /// Address with no usable identity.
        address: BusAddress,
    },

    /// The catalog has no released artifact for this signature.
    #[error("no released firmware for signature \"{signature}\"")]
    NoReleasedFirmware {
        /// Signature that was looked up.
        signature: String,
    },

    /// Target version is older than the installed one and downgrading was
    /// not (or may never be, for bootloaders) allowed.
    #[error("downgrade rejected: v{installed} -> v{requested}")]
    DowngradeRejected {
        /// Version currently running on the device.
        installed: Version,
        /// Version that was requested.
        requested: Version,
    },

    /// Remote firmware storage could not be reached.
    #[error("firmware storage unreachable: {0}")]
    DownloadUnavailable(String),

    /// Image transfer aborted, or the device failed verification or did not
    /// reappear after flashing. `offset` names the failing image byte offset
    /// when a chunk write exhausted its retries (it is repeated in `reason`
    /// for the operator-facing message).
    #[error("flash failed: {reason}")]
    FlashFailure {
        /// Byte offset of the failing chunk, if the failure was a write.
        offset: Option<usize>,
        /// Human-readable failure description.
        reason: String,
    },

    /// Operator declined an irreversible step.
    #[error("cancelled: {0}")]
    UserDeclined(String),

    /// The external device-list configuration is unusable.
    #[error("device list config error: {0}")]
    ConfigParsing(String),

    /// Slave id outside 1..=247; rejected before any bus I/O.
    #[error("invalid slave id {0} (expected 1..=247)")]
    InvalidSlaveId(u16),

    /// Firmware artifact file is not in the expected format.
    #[error("bad firmware image: {0}")]
    BadImage(String),

    /// Serial port could not be opened or reconfigured.
    #[error("serial port error: {0}")]
    Port(String),

    /// Version string from a device register or the catalog did not parse.
    #[error("invalid version string \"{0}\"")]
    BadVersion(String),

    /// UART settings string did not parse (expected e.g. "9600N2").
    #[error("invalid settings string \"{0}\" (expected like 9600N2)")]
    BadSettings(String),
}

/// Coarse error classification recorded in batch outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// See [`Error::NoResponse`].
    NoResponse,
    /// See [`Error::ProtocolFault`].
    ProtocolFault,
    /// See [`Error::TooOldDevice`].
    TooOldDevice,
    /// See [`Error::UnknownSignature`].
    UnknownSignature,
    /// See [`Error::NoReleasedFirmware`].
    NoReleasedFirmware,
    /// See [`Error::DowngradeRejected`].
    DowngradeRejected,
    /// See [`Error::DownloadUnavailable`].
    DownloadUnavailable,
    /// See [`Error::FlashFailure`].
    FlashFailure,
    /// See [`Error::UserDeclined`].
    UserDeclined,
    /// See [`Error::ConfigParsing`].
    ConfigParsing,
    /// Anything else (bad input, port trouble).
    Other,
}

impl Error {
    /// Classify this error for outcome records.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoResponse { .. } => ErrorKind::NoResponse,
            Error::ProtocolFault { .. } => ErrorKind::ProtocolFault,
            Error::TooOldDevice { .. } => ErrorKind::TooOldDevice,
            Error::UnknownSignature { .. } => ErrorKind::UnknownSignature,
            Error::NoReleasedFirmware { .. } => ErrorKind::NoReleasedFirmware,
            Error::DowngradeRejected { .. } => ErrorKind::DowngradeRejected,
            Error::DownloadUnavailable(_) => ErrorKind::DownloadUnavailable,
            Error::FlashFailure { .. } => ErrorKind::FlashFailure,
            Error::UserDeclined(_) => ErrorKind::UserDeclined,
            Error::ConfigParsing(_) => ErrorKind::ConfigParsing,
            _ => ErrorKind::Other,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NoResponse => "no response",
            ErrorKind::ProtocolFault => "protocol fault",
            ErrorKind::TooOldDevice => "too old device",
            ErrorKind::UnknownSignature => "unknown signature",
            ErrorKind::NoReleasedFirmware => "no released firmware",
            ErrorKind::DowngradeRejected => "downgrade rejected",
            ErrorKind::DownloadUnavailable => "download unavailable",
            ErrorKind::FlashFailure => "flash failure",
            ErrorKind::UserDeclined => "user declined",
            ErrorKind::ConfigParsing => "config parsing",
            ErrorKind::Other => "error",
        };
        f.write_str(name)
    }
}
