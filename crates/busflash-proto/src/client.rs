//! Register read/write client implementing the engine's port trait.

use crate::error::{ProtoError, Result};
use crate::frame;
use crate::transport::serial::SerialTransport;
use crate::transport::tcp::TcpTransport;
use crate::transport::Transport;
use busflash_core::port::{BusPort, BusPortFactory, ExchangeFault};
use busflash_core::settings::ConnectionSettings;
use busflash_core::Error as CoreError;
use std::time::{Duration, Instant};

/// One register command exchange client over any [`Transport`].
///
/// The client owns RTU pacing: stale input is drained before each request
/// and consecutive frames are separated by the 3.5-character inter-frame
/// gap at the current baud rate.
pub struct BusClient<T: Transport> {
    transport: T,
    settings: ConnectionSettings,
    timeout: Duration,
    last_exchange: Option<Instant>,
}

impl<T: Transport> BusClient<T> {
    /// Wrap `transport`, assumed configured with `settings` and `timeout`.
    pub fn new(transport: T, settings: ConnectionSettings, timeout: Duration) -> Self {
        Self {
            transport,
            settings,
            timeout,
            last_exchange: None,
        }
    }

    /// Minimum quiet time between frames: 3.5 character times (11 bits per
    /// character on the wire), floored at the fixed 1.75 ms used for fast
    /// baud rates.
    fn inter_frame_gap(&self) -> Duration {
        let micros = 11 * 3_500_000u64 / u64::from(self.settings.baud_rate.max(1));
        Duration::from_micros(micros.max(1_750))
    }

    fn pace(&mut self) {
        if let Some(last) = self.last_exchange {
            let gap = self.inter_frame_gap();
            let elapsed = last.elapsed();
            if elapsed < gap {
                std::thread::sleep(gap - elapsed);
            }
        }
    }

    fn transact(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        self.transport.drain_input()?;
        self.pace();
        self.transport.write(request)?;
        self.transport.flush()?;
        let outcome = self.receive(request[0]);
        self.last_exchange = Some(Instant::now());
        outcome
    }

    fn receive(&mut self, expected_slave: u8) -> Result<Vec<u8>> {
        let mut head = [0u8; 3];
        self.transport.read_exact(&mut head)?;
        let remaining = frame::remaining_after_head(&head)?;
        let mut reply = head.to_vec();
        reply.resize(3 + remaining, 0);
        self.transport.read_exact(&mut reply[3..])?;
        frame::verify_crc(&reply)?;
        if reply[0] != expected_slave {
            return Err(ProtoError::Malformed(format!(
                "reply from slave {} while talking to {expected_slave}",
                reply[0]
            )));
        }
        if reply[1] & frame::EXCEPTION_BIT != 0 {
            return Err(ProtoError::Exception(reply[2]));
        }
        Ok(reply)
    }
}

impl<T: Transport> BusPort for BusClient<T> {
    fn configure(&mut self, settings: &ConnectionSettings) -> busflash_core::Result<()> {
        self.transport
            .apply_settings(settings)
            .map_err(|e| CoreError::Port(e.to_string()))?;
        self.settings = *settings;
        self.last_exchange = None;
        Ok(())
    }

    fn settings(&self) -> ConnectionSettings {
        self.settings
    }

    fn set_response_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
        if let Err(e) = self.transport.set_timeout(timeout) {
            log::warn!("could not apply response timeout: {e}");
        }
    }

    fn response_timeout(&self) -> Duration {
        self.timeout
    }

    fn read_registers(
        &mut self,
        slave_id: u8,
        addr: u16,
        count: u16,
    ) -> std::result::Result<Vec<u16>, ExchangeFault> {
        let request = frame::build_read(slave_id, addr, count);
        let reply = self.transact(&request)?;
        Ok(frame::parse_read_reply(&reply, count)?)
    }

    fn write_register(
        &mut self,
        slave_id: u8,
        addr: u16,
        value: u16,
    ) -> std::result::Result<(), ExchangeFault> {
        let request = frame::build_write_single(slave_id, addr, value);
        self.transact(&request)?;
        Ok(())
    }

    fn write_registers(
        &mut self,
        slave_id: u8,
        addr: u16,
        values: &[u16],
    ) -> std::result::Result<(), ExchangeFault> {
        let request = frame::build_write_multiple(slave_id, addr, values);
        self.transact(&request)?;
        Ok(())
    }
}

/// Prefix selecting the TCP transport in a port string.
const TCP_PREFIX: &str = "tcp://";

/// Opens real ports: `/dev/...` paths directly, `tcp://host:port` through
/// a remote serial server.
pub struct PortFactory;

impl BusPortFactory for PortFactory {
    fn open(
        &mut self,
        port: &str,
        settings: &ConnectionSettings,
        timeout: Duration,
    ) -> busflash_core::Result<Box<dyn BusPort>> {
        if let Some(addr) = port.strip_prefix(TCP_PREFIX) {
            let transport = TcpTransport::connect(addr, timeout)
                .map_err(|e| CoreError::Port(e.to_string()))?;
            Ok(Box::new(BusClient::new(transport, *settings, timeout)))
        } else {
            let transport = SerialTransport::open(port, settings, timeout)
                .map_err(|e| CoreError::Port(e.to_string()))?;
            Ok(Box::new(BusClient::new(transport, *settings, timeout)))
        }
    }
}
