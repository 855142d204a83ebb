//! Device addressing and the per-operation device handle.

use crate::error::{Error, Result};
use crate::port::{BusPort, ExchangeFault, EXCEPTION_DEVICE_FAILURE};
use crate::retry::{retry_exchange, RetryPolicy};
use crate::settings::ConnectionSettings;
use std::fmt;
use std::time::Duration;

/// Register map shared by all supported devices.
///
/// Application firmware serves the identity block; the bootloader serves
/// only the transfer and erase registers.
pub mod regs {
    /// Seconds since last MCU reboot (u32, two registers).
    pub const UPTIME: u16 = 104;
    /// Reboot command register; writing 1 restarts the application.
    pub const REBOOT: u16 = 120;
    /// Echo of the device's own slave id; the cheapest identity probe.
    pub const SLAVE_ID: u16 = 128;
    /// Writing 1 reboots into the bootloader.
    pub const REBOOT_TO_BOOTLOADER: u16 = 129;
    /// Device model string.
    pub const DEVICE_MODEL: u16 = 200;
    /// Length of the model string in registers.
    pub const DEVICE_MODEL_LEN: u16 = 6;
    /// Firmware version string.
    pub const FW_VERSION: u16 = 250;
    /// Length of the firmware version string in registers.
    pub const FW_VERSION_LEN: u16 = 16;
    /// Serial number (u32, two registers).
    pub const SERIAL_NUMBER: u16 = 270;
    /// Firmware signature string; the stable identity key.
    pub const FW_SIGNATURE: u16 = 290;
    /// Length of the signature string in registers.
    pub const FW_SIGNATURE_LEN: u16 = 12;
    /// Bootloader version string.
    pub const BOOTLOADER_VERSION: u16 = 330;
    /// Length of the bootloader version string in registers.
    pub const BOOTLOADER_VERSION_LEN: u16 = 7;

    /// Bootloader-only: start of the image info block.
    pub const INFO_BLOCK: u16 = 0x1000;
    /// Bootloader-only: start of the image data window.
    pub const DATA_BLOCK: u16 = 0x2000;
    /// Bootloader-only: writing 1 resets UART parameters to defaults.
    pub const UART_RESET: u16 = 1000;
    /// Bootloader-only: writing 1 erases every persisted device setting.
    pub const SETTINGS_ERASE: u16 = 1001;
}

/// Identity of one device on one physical bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BusAddress {
    /// Serial port path, e.g. `/dev/ttyRS485-1`.
    pub port: String,
    /// Bus slave id, always within 1..=247.
    pub slave_id: u8,
}

impl BusAddress {
    /// Validate and build an address. Slave ids outside 1..=247 are rejected
    /// before any I/O can happen.
    pub fn new(port: impl Into<String>, slave_id: u16) -> Result<Self> {
        if !(1..=247).contains(&slave_id) {
            return Err(Error::InvalidSlaveId(slave_id));
        }
        Ok(Self {
            port: port.into(),
            slave_id: slave_id as u8,
        })
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.port, self.slave_id)
    }
}

/// Operating mode of a device as far as this operation knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Not yet probed.
    Unknown,
    /// Application firmware is running.
    Alive,
    /// Minimal flashing firmware is running.
    InBootloader,
}

/// What a bootloader probe observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootloaderProbe {
    /// A bootloader acknowledged the probe.
    Answered,
    /// Nothing answered.
    Silent,
}

/// A device bound to a port for the duration of one operation.
///
/// Created per operation and dropped at its end; never persisted. Owns the
/// operating-mode tag and runs every typed register operation through the
/// retry policy.
pub struct DeviceHandle<'a> {
    port: &'a mut dyn BusPort,
    address: BusAddress,
    mode: Mode,
    retry: RetryPolicy,
}

impl<'a> DeviceHandle<'a> {
    /// Bind `address` to `port` for one operation.
    pub fn new(port: &'a mut dyn BusPort, address: BusAddress, retry: RetryPolicy) -> Self {
        Self {
            port,
            address,
            mode: Mode::Unknown,
            retry,
        }
    }

    /// Address this handle talks to.
    pub fn address(&self) -> &BusAddress {
        &self.address
    }

    /// Last observed operating mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Record the observed operating mode.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Retry policy in effect for this operation.
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Connection settings currently applied to the port.
    pub fn settings(&self) -> ConnectionSettings {
        self.port.settings()
    }

    /// Reconfigure the underlying port.
    pub fn configure(&mut self, settings: &ConnectionSettings) -> Result<()> {
        self.port.configure(settings)
    }

    /// Direct access to the port, for negotiation.
    pub fn port_mut(&mut self) -> &mut dyn BusPort {
        self.port
    }

    fn escalate(&self, fault: ExchangeFault) -> Error {
        crate::port::fault_to_error(&self.address, fault)
    }

    /// Read registers with per-command retries.
    pub fn read_regs(&mut self, addr: u16, count: u16) -> Result<Vec<u16>> {
        let slave = self.address.slave_id;
        let port = &mut *self.port;
        retry_exchange(self.retry.command_attempts, || {
            port.read_registers(slave, addr, count)
        })
        .map_err(|fault| self.escalate(fault))
    }

    /// Write one register with per-command retries.
    pub fn write_reg(&mut self, addr: u16, value: u16) -> Result<()> {
        let slave = self.address.slave_id;
        let port = &mut *self.port;
        retry_exchange(self.retry.command_attempts, || {
            port.write_register(slave, addr, value)
        })
        .map_err(|fault| self.escalate(fault))
    }

    /// Cheapest alive-mode identity probe: one read of the slave-id echo
    /// register, no retries (the caller owns probe retry counts).
    pub fn read_slave_id_once(&mut self) -> std::result::Result<u16, ExchangeFault> {
        self.port
            .read_registers(self.address.slave_id, regs::SLAVE_ID, 1)
            .map(|regs| regs.first().copied().unwrap_or_default())
    }

    /// Decode a register row holding one character per register.
    ///
    /// Devices pad string registers with 0x00 or 0xFF placeholders; both are
    /// stripped along with surrounding whitespace.
    fn decode_string(regs: &[u16]) -> String {
        regs.iter()
            .map(|&r| (r & 0xFF) as u8)
            .filter(|&b| b != 0x00 && b != 0xFF)
            .map(char::from)
            .collect::<String>()
            .trim()
            .to_string()
    }

    fn read_string(&mut self, addr: u16, len: u16) -> Result<String> {
        let regs = self.read_regs(addr, len)?;
        Ok(Self::decode_string(&regs))
    }

    /// Firmware signature: the stable hardware/firmware family key.
    ///
    /// Old firmware generations predate this register and reject the read,
    /// which is surfaced as [`Error::TooOldDevice`] - such hardware must
    /// never be driven into the bootloader.
    pub fn read_fw_signature(&mut self) -> Result<String> {
        let slave = self.address.slave_id;
        let port = &mut *self.port;
        let outcome = retry_exchange(self.retry.command_attempts, || {
            port.read_registers(slave, regs::FW_SIGNATURE, regs::FW_SIGNATURE_LEN)
        });
        match outcome {
            Ok(regs) => {
                let signature = Self::decode_string(&regs);
                if signature.is_empty() {
                    Err(Error::TooOldDevice {
                        address: self.address.clone(),
                    })
                } else {
                    Ok(signature)
                }
            }
            Err(fault) if fault.is_illegal_request() => Err(Error::TooOldDevice {
                address: self.address.clone(),
            }),
            Err(fault) => Err(self.escalate(fault)),
        }
    }

    /// Firmware version string from the identity block.
    pub fn read_fw_version(&mut self) -> Result<String> {
        self.read_string(regs::FW_VERSION, regs::FW_VERSION_LEN)
    }

    /// Bootloader version string from the identity block.
    pub fn read_bootloader_version(&mut self) -> Result<String> {
        self.read_string(regs::BOOTLOADER_VERSION, regs::BOOTLOADER_VERSION_LEN)
    }

    /// Device model string.
    pub fn read_device_model(&mut self) -> Result<String> {
        self.read_string(regs::DEVICE_MODEL, regs::DEVICE_MODEL_LEN)
    }

    /// Serial number, stored big-endian across two registers.
    pub fn read_serial_number(&mut self) -> Result<u32> {
        let regs = self.read_regs(regs::SERIAL_NUMBER, 2)?;
        Ok(((regs[0] as u32) << 16) | regs[1] as u32)
    }

    /// Command the device to reboot into the bootloader.
    ///
    /// The device restarts before it can acknowledge, so a lost reply is
    /// expected and tolerated; only a decoded fault is an error. The settle
    /// delay gives the MCU time to land in the bootloader.
    pub fn reboot_to_bootloader(&mut self) -> Result<()> {
        // Confirm the device is still there before the one-way command.
        self.read_regs(regs::SLAVE_ID, 1)?;
        match self
            .port
            .write_register(self.address.slave_id, regs::REBOOT_TO_BOOTLOADER, 1)
        {
            Ok(()) | Err(ExchangeFault::NoResponse) => {}
            Err(fault) => return Err(self.escalate(fault)),
        }
        std::thread::sleep(self.retry.reboot_settle);
        self.mode = Mode::Unknown;
        Ok(())
    }

    /// Command the bootloader to start the application.
    pub fn reboot_to_application(&mut self) -> Result<()> {
        match self
            .port
            .write_register(self.address.slave_id, regs::REBOOT, 1)
        {
            Ok(()) | Err(ExchangeFault::NoResponse) => {}
            Err(fault) => return Err(self.escalate(fault)),
        }
        self.mode = Mode::Unknown;
        Ok(())
    }

    /// Non-destructive bootloader presence probe.
    ///
    /// A bootloader rejects an all-zero info block with a device-failure
    /// exception; that rejection is the positive signal. Silence means no
    /// bootloader is listening; anything else decoded means *something*
    /// answered under the wrong assumptions and is surfaced as a fault.
    pub fn probe_bootloader(&mut self) -> Result<BootloaderProbe> {
        let dummy = [0u16; 16];
        let slave = self.address.slave_id;
        let saved_timeout = self.port.response_timeout();
        self.port.set_response_timeout(self.retry.bootloader_timeout);
        let port = &mut *self.port;
        let outcome = retry_exchange(self.retry.bootloader_attempts, || {
            port.write_registers(slave, regs::INFO_BLOCK, &dummy)
        });
        self.port.set_response_timeout(saved_timeout);
        match outcome {
            // Current bootloaders ack the dummy block outright.
            Ok(()) => Ok(BootloaderProbe::Answered),
            Err(ExchangeFault::Exception(EXCEPTION_DEVICE_FAILURE)) => {
                Ok(BootloaderProbe::Answered)
            }
            Err(ExchangeFault::NoResponse) => Ok(BootloaderProbe::Silent),
            Err(fault) => Err(self.escalate(fault)),
        }
    }

    /// Write the image info block, with the extended bootloader timeout.
    pub fn write_info_block(&mut self, info: &[u16]) -> Result<()> {
        let slave = self.address.slave_id;
        let saved_timeout = self.port.response_timeout();
        self.port
            .set_response_timeout(saved_timeout + self.retry.info_block_extra);
        let outcome = self.port.write_registers(slave, regs::INFO_BLOCK, info);
        self.port.set_response_timeout(saved_timeout);
        outcome.map_err(|fault| {
            if fault.is_illegal_request() {
                Error::FlashFailure {
                    offset: None,
                    reason: format!(
                        "device {} rejected the image info block (not in bootloader mode?)",
                        self.address
                    ),
                }
            } else {
                self.escalate(fault)
            }
        })
    }

    /// Write one data chunk into the bootloader transfer window. Raw fault
    /// result: the flash executor owns chunk retry accounting.
    pub fn write_chunk(&mut self, chunk: &[u16]) -> std::result::Result<(), ExchangeFault> {
        self.port
            .write_registers(self.address.slave_id, regs::DATA_BLOCK, chunk)
    }

    /// Execute a bootloader command register (settings erase, uart reset).
    pub fn bootloader_command(&mut self, reg: u16) -> Result<()> {
        self.write_reg(reg, 1)
    }

    /// Poll until the device answers in application mode again, up to the
    /// reappearance grace period. At least two attempts are always made so a
    /// single unlucky timeout right at the deadline cannot misclassify a
    /// healthy device.
    pub fn wait_for_reappear(&mut self) -> bool {
        let deadline = std::time::Instant::now() + self.retry.reappear_grace;
        let mut tries = 0u32;
        loop {
            tries += 1;
            if self.read_slave_id_once().is_ok() {
                self.mode = Mode::Alive;
                return true;
            }
            if std::time::Instant::now() >= deadline && tries >= 2 {
                log::error!(
                    "device {} did not reappear after {} tries",
                    self.address,
                    tries
                );
                return false;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }
}
