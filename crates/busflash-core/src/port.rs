//! The capability seam between the engine and the wire protocol.
//!
//! Everything the engine needs from a transport is "exchange one register
//! command, tell me whether the device answered, answered badly, or stayed
//! silent". Direct serial and RPC-mediated remote ports both implement
//! [`BusPort`]; the engine never branches on which one it has.

use crate::error::{Error, Result};
use crate::settings::ConnectionSettings;
use std::fmt;
use std::time::Duration;

/// Device-reported exception: request register/function not supported.
/// Older firmware answers this for registers it predates.
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;
/// Device-reported exception: register address not implemented.
pub const EXCEPTION_ILLEGAL_ADDRESS: u8 = 0x02;
/// Device-reported exception: value rejected.
pub const EXCEPTION_ILLEGAL_VALUE: u8 = 0x03;
/// Device-reported exception: device busy / internal failure. Bootloaders
/// answer this to application-mode traffic, which is how they are detected.
pub const EXCEPTION_DEVICE_FAILURE: u8 = 0x04;

/// Outcome classification for a single request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeFault {
    /// Nothing came back within the response timeout. Retryable.
    NoResponse,
    /// A frame arrived but its checksum did not match.
    Crc,
    /// A frame arrived but could not be decoded.
    Malformed(String),
    /// The device answered with a protocol exception code.
    Exception(u8),
    /// The underlying port failed (unplugged adapter, bad fd).
    Io(String),
}

impl ExchangeFault {
    /// Only transport-level silence is safe to retry blindly.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExchangeFault::NoResponse)
    }

    /// True when the device explicitly rejected the request as unsupported;
    /// this is how too-old firmware and bootloaders without an identity
    /// register announce themselves.
    pub fn is_illegal_request(&self) -> bool {
        matches!(
            self,
            ExchangeFault::Exception(
                EXCEPTION_ILLEGAL_FUNCTION | EXCEPTION_ILLEGAL_ADDRESS | EXCEPTION_ILLEGAL_VALUE
            )
        )
    }
}

impl fmt::Display for ExchangeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeFault::NoResponse => write!(f, "no response"),
            ExchangeFault::Crc => write!(f, "checksum mismatch"),
            ExchangeFault::Malformed(detail) => write!(f, "malformed frame: {detail}"),
            ExchangeFault::Exception(code) => write!(f, "device exception {code:#04x}"),
            ExchangeFault::Io(detail) => write!(f, "port I/O error: {detail}"),
        }
    }
}

/// One physical (or proxied) serial bus, exchanging register commands with
/// addressable devices.
///
/// Implementations own the framing; the engine owns retries, mode handling
/// and everything above. All calls block for at most the configured response
/// timeout; none are cancellable mid-exchange, since interrupting a
/// partially sent command can desynchronise the device's frame parser.
pub trait BusPort {
    /// Apply new UART parameters to the port.
    fn configure(&mut self, settings: &ConnectionSettings) -> Result<()>;

    /// Parameters currently applied.
    fn settings(&self) -> ConnectionSettings;

    /// Set the per-exchange response timeout.
    fn set_response_timeout(&mut self, timeout: Duration);

    /// Current per-exchange response timeout.
    fn response_timeout(&self) -> Duration;

    /// Read `count` consecutive holding registers starting at `addr`.
    fn read_registers(
        &mut self,
        slave_id: u8,
        addr: u16,
        count: u16,
    ) -> std::result::Result<Vec<u16>, ExchangeFault>;

    /// Write a single holding register.
    fn write_register(
        &mut self,
        slave_id: u8,
        addr: u16,
        value: u16,
    ) -> std::result::Result<(), ExchangeFault>;

    /// Write a row of consecutive holding registers in one command.
    fn write_registers(
        &mut self,
        slave_id: u8,
        addr: u16,
        values: &[u16],
    ) -> std::result::Result<(), ExchangeFault>;
}

/// Opens [`BusPort`]s by system path; injected into the batch orchestrator
/// so tests can substitute scripted ports.
pub trait BusPortFactory {
    /// Open `port` with initial `settings` and `timeout`.
    fn open(
        &mut self,
        port: &str,
        settings: &ConnectionSettings,
        timeout: Duration,
    ) -> Result<Box<dyn BusPort>>;
}

/// Map a fault on `address` into the engine error space.
pub(crate) fn fault_to_error(address: &crate::device::BusAddress, fault: ExchangeFault) -> Error {
    match fault {
        ExchangeFault::NoResponse => Error::NoResponse {
            address: address.clone(),
        },
        ExchangeFault::Io(detail) => Error::Port(detail),
        other => Error::ProtocolFault {
            address: address.clone(),
            detail: other.to_string(),
        },
    }
}
