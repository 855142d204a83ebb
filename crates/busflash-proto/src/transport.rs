//! Transport layer abstraction for bus communication.
//!
//! The framing client is transport-agnostic: a direct serial port and a
//! TCP-proxied remote port (a serial server in front of the physical bus)
//! are interchangeable behind [`Transport`], selected at configuration
//! time from the port string.

use crate::error::{ProtoError, Result};
use busflash_core::settings::ConnectionSettings;
use std::time::Duration;

/// Byte-level access to the bus.
pub trait Transport {
    /// Write bytes to the transport.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read exactly `buf.len()` bytes, waiting up to the configured
    /// timeout. A short read surfaces as [`ProtoError::Timeout`].
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Set the read timeout for subsequent reads.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Apply new UART parameters to the underlying port.
    fn apply_settings(&mut self, settings: &ConnectionSettings) -> Result<()>;

    /// Discard any stale bytes waiting in the receive path.
    fn drain_input(&mut self) -> Result<()>;

    /// Flush any buffered outgoing data.
    fn flush(&mut self) -> Result<()>;
}

pub mod serial {
    //! Serial port transport implementation.

    use super::*;
    use busflash_core::settings::{Parity, StopBits};
    use serialport::{ClearBuffer, DataBits, FlowControl, SerialPort};
    use std::io::{Read, Write};

    fn map_parity(parity: Parity) -> serialport::Parity {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }

    fn map_stop_bits(stop_bits: StopBits) -> serialport::StopBits {
        match stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }

    fn map_data_bits(data_bits: u8) -> DataBits {
        match data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        }
    }

    /// Serial port transport.
    pub struct SerialTransport {
        port: Box<dyn SerialPort>,
    }

    impl SerialTransport {
        /// Open `device` with `settings` and an initial read timeout.
        pub fn open(
            device: &str,
            settings: &ConnectionSettings,
            timeout: Duration,
        ) -> Result<Self> {
            let port = serialport::new(device, settings.baud_rate)
                .data_bits(map_data_bits(settings.data_bits))
                .parity(map_parity(settings.parity))
                .stop_bits(map_stop_bits(settings.stop_bits))
                .flow_control(FlowControl::None)
                .timeout(timeout)
                .open()?;
            log::info!("opened serial port {device} at {settings}");
            Ok(Self { port })
        }
    }

    impl Transport for SerialTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.port.write_all(data)?;
            Ok(())
        }

        fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
            self.port.read_exact(buf)?;
            Ok(())
        }

        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.port.set_timeout(timeout)?;
            Ok(())
        }

        fn apply_settings(&mut self, settings: &ConnectionSettings) -> Result<()> {
            self.port.set_baud_rate(settings.baud_rate)?;
            self.port.set_parity(map_parity(settings.parity))?;
            self.port.set_stop_bits(map_stop_bits(settings.stop_bits))?;
            self.port.set_data_bits(map_data_bits(settings.data_bits))?;
            Ok(())
        }

        fn drain_input(&mut self) -> Result<()> {
            self.port.clear(ClearBuffer::Input)?;
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            self.port.flush()?;
            Ok(())
        }
    }
}

pub mod tcp {
    //! TCP transport to a remote serial server.
    //!
    //! The remote end owns the physical UART; parameter changes are applied
    //! on its side of the wire, so `apply_settings` is a no-op here.

    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;

    /// TCP socket transport.
    pub struct TcpTransport {
        stream: TcpStream,
        addr: String,
    }

    impl TcpTransport {
        /// Connect to a serial server at `host:port`.
        pub fn connect(addr: &str, timeout: Duration) -> Result<Self> {
            log::info!("connecting to serial server at {addr}");
            let stream = TcpStream::connect(addr)
                .map_err(|e| ProtoError::Io(format!("connect {addr}: {e}")))?;
            stream
                .set_nodelay(true)
                .map_err(|e| ProtoError::Io(format!("set TCP_NODELAY: {e}")))?;
            stream.set_read_timeout(Some(timeout))?;
            stream.set_write_timeout(Some(timeout))?;
            Ok(Self {
                stream,
                addr: addr.to_string(),
            })
        }
    }

    impl Transport for TcpTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.stream.write_all(data)?;
            Ok(())
        }

        fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
            self.stream.read_exact(buf)?;
            Ok(())
        }

        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.stream.set_read_timeout(Some(timeout))?;
            Ok(())
        }

        fn apply_settings(&mut self, settings: &ConnectionSettings) -> Result<()> {
            log::debug!(
                "serial server {} owns the UART; {settings} assumed on the remote side",
                self.addr
            );
            Ok(())
        }

        fn drain_input(&mut self) -> Result<()> {
            self.stream
                .set_nonblocking(true)
                .map_err(|e| ProtoError::Io(e.to_string()))?;
            let mut scratch = [0u8; 256];
            loop {
                match self.stream.read(&mut scratch) {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        let _ = self.stream.set_nonblocking(false);
                        return Err(ProtoError::Io(e.to_string()));
                    }
                }
            }
            self.stream
                .set_nonblocking(false)
                .map_err(|e| ProtoError::Io(e.to_string()))?;
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            self.stream.flush()?;
            Ok(())
        }
    }
}
