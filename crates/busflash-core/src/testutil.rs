//! Scripted fakes shared across the engine tests: a state-machine device
//! behind [`BusPort`], an in-memory firmware catalog and an in-memory
//! identity cache.

use crate::device::{regs, BusAddress};
use crate::image::{CHUNK_REGS, INFO_BLOCK_REGS};
use crate::port::{
    BusPort, ExchangeFault, EXCEPTION_DEVICE_FAILURE, EXCEPTION_ILLEGAL_ADDRESS,
};
use crate::resolve::{DownloadError, Downloader, IdentityStore, ImageKind};
use crate::retry::RetryPolicy;
use crate::settings::{ConnectionSettings, BOOTLOADER_SETTINGS};
use semver::Version;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Retry policy with near-zero delays so tests never sleep noticeably.
pub(crate) fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        command_attempts: 2,
        response_timeout: Duration::from_millis(1),
        probe_attempts: 1,
        bootloader_attempts: 1,
        bootloader_timeout: Duration::from_millis(1),
        chunk_attempts: 2,
        info_block_extra: Duration::ZERO,
        reboot_settle: Duration::ZERO,
        reappear_grace: Duration::from_millis(20),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Dead,
    Alive,
    InBootloader,
}

/// A device simulated down to its register map and mode transitions.
///
/// It answers only for its own slave id and only when the port settings
/// match what it currently listens on: alive devices listen on their
/// configured UART parameters, bootloaders on the fixed defaults.
pub(crate) struct FakeDevice {
    state: State,
    slave_id: u8,
    alive_settings: ConnectionSettings,
    current: ConnectionSettings,
    timeout: Duration,
    configured: Vec<ConnectionSettings>,

    pub fw_version: String,
    pub fw_signature: Option<String>,
    pub bootloader_version: String,
    pub model: String,
    pub serial: u32,
    /// Whether the bootloader serves the signature register (newer ones do).
    pub bootloader_reports_signature: bool,
    /// Signature the bootloader validates info blocks against; mismatching
    /// blocks are rejected the way real signed metadata is.
    pub expected_signature: Option<String>,
    /// Version the device reports after a completed flash cycle.
    pub pending_fw_version: Option<String>,
    /// Chunk index (by successful-write count) that never acknowledges.
    pub fail_chunk: Option<usize>,

    pub info_blocks: Vec<Vec<u16>>,
    pub chunks_written: Vec<Vec<u16>>,
    pub settings_erased: bool,
    flashed: bool,
}

impl FakeDevice {
    fn base(state: State, slave_id: u8, settings: ConnectionSettings) -> Self {
        Self {
            state,
            slave_id,
            alive_settings: settings,
            current: settings,
            timeout: Duration::from_millis(1),
            configured: Vec::new(),
            fw_version: "2.3.0".to_string(),
            fw_signature: Some("msw3".to_string()),
            bootloader_version: "1.2.0".to_string(),
            model: "MSW3".to_string(),
            serial: 0x0001_0002,
            bootloader_reports_signature: false,
            expected_signature: None,
            pending_fw_version: None,
            fail_chunk: None,
            info_blocks: Vec::new(),
            chunks_written: Vec::new(),
            settings_erased: false,
            flashed: false,
        }
    }

    /// An application-mode device listening on `settings`.
    pub fn alive(slave_id: u8, settings: ConnectionSettings) -> Self {
        Self::base(State::Alive, slave_id, settings)
    }

    /// A device stuck in its bootloader, listening on the defaults.
    pub fn in_bootloader(slave_id: u8) -> Self {
        let mut dev = Self::base(State::InBootloader, slave_id, BOOTLOADER_SETTINGS);
        dev.fw_signature = None;
        dev
    }

    /// Nothing on the bus at all.
    pub fn unreachable() -> Self {
        Self::base(State::Dead, 0, BOOTLOADER_SETTINGS)
    }

    /// Every settings set applied to the port, in order.
    pub fn configured_settings(&self) -> &[ConnectionSettings] {
        &self.configured
    }

    pub fn is_alive(&self) -> bool {
        self.state == State::Alive
    }

    fn listening(&self, slave_id: u8) -> bool {
        if slave_id != self.slave_id {
            return false;
        }
        match self.state {
            State::Dead => false,
            State::Alive => self.current == self.alive_settings,
            State::InBootloader => self.current == BOOTLOADER_SETTINGS,
        }
    }

    fn string_regs(s: &str, count: u16) -> Vec<u16> {
        let mut out: Vec<u16> = s.bytes().map(u16::from).collect();
        out.resize(count as usize, 0);
        out.truncate(count as usize);
        out
    }

    fn info_block_matches(&self, values: &[u16]) -> bool {
        match &self.expected_signature {
            None => true,
            Some(sig) => values == encode_info_block(sig).as_slice(),
        }
    }
}

/// The info-block encoding [`FakeCatalog`] artifacts use: the signature's
/// bytes, one per register, zero padded.
pub(crate) fn encode_info_block(signature: &str) -> Vec<u16> {
    FakeDevice::string_regs(signature, INFO_BLOCK_REGS as u16)
}

impl BusPort for FakeDevice {
    fn configure(&mut self, settings: &ConnectionSettings) -> crate::error::Result<()> {
        self.current = *settings;
        self.configured.push(*settings);
        Ok(())
    }

    fn settings(&self) -> ConnectionSettings {
        self.current
    }

    fn set_response_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn response_timeout(&self) -> Duration {
        self.timeout
    }

    fn read_registers(
        &mut self,
        slave_id: u8,
        addr: u16,
        count: u16,
    ) -> Result<Vec<u16>, ExchangeFault> {
        if !self.listening(slave_id) {
            return Err(ExchangeFault::NoResponse);
        }
        if self.state == State::InBootloader {
            return if addr == regs::FW_SIGNATURE && self.bootloader_reports_signature {
                match &self.fw_signature {
                    Some(sig) => Ok(Self::string_regs(sig, count)),
                    None => Err(ExchangeFault::Exception(EXCEPTION_DEVICE_FAILURE)),
                }
            } else {
                Err(ExchangeFault::Exception(EXCEPTION_DEVICE_FAILURE))
            };
        }
        match addr {
            regs::SLAVE_ID => Ok(vec![u16::from(self.slave_id)]),
            regs::FW_VERSION => Ok(Self::string_regs(&self.fw_version, count)),
            regs::FW_SIGNATURE => match &self.fw_signature {
                Some(sig) => Ok(Self::string_regs(sig, count)),
                None => Err(ExchangeFault::Exception(EXCEPTION_ILLEGAL_ADDRESS)),
            },
            regs::BOOTLOADER_VERSION => Ok(Self::string_regs(&self.bootloader_version, count)),
            regs::DEVICE_MODEL => Ok(Self::string_regs(&self.model, count)),
            regs::SERIAL_NUMBER => Ok(vec![(self.serial >> 16) as u16, self.serial as u16]),
            regs::UPTIME => Ok(vec![0, 1]),
            _ => Err(ExchangeFault::Exception(EXCEPTION_ILLEGAL_ADDRESS)),
        }
    }

    fn write_register(
        &mut self,
        slave_id: u8,
        addr: u16,
        _value: u16,
    ) -> Result<(), ExchangeFault> {
        if !self.listening(slave_id) {
            return Err(ExchangeFault::NoResponse);
        }
        match (self.state, addr) {
            (State::Alive, regs::REBOOT_TO_BOOTLOADER) => {
                self.state = State::InBootloader;
                // The MCU restarts before the ack goes out.
                Err(ExchangeFault::NoResponse)
            }
            (State::Alive, regs::REBOOT) => Ok(()),
            (State::InBootloader, regs::SETTINGS_ERASE) => {
                self.settings_erased = true;
                // Persisted UART parameters are gone with the rest.
                self.alive_settings = BOOTLOADER_SETTINGS;
                Ok(())
            }
            (State::InBootloader, regs::UART_RESET) => {
                self.alive_settings = BOOTLOADER_SETTINGS;
                Ok(())
            }
            (State::InBootloader, regs::REBOOT) => {
                self.state = State::Alive;
                if self.flashed {
                    if let Some(version) = self.pending_fw_version.take() {
                        self.fw_version = version;
                    }
                }
                Ok(())
            }
            _ => Err(ExchangeFault::Exception(EXCEPTION_ILLEGAL_ADDRESS)),
        }
    }

    fn write_registers(
        &mut self,
        slave_id: u8,
        addr: u16,
        values: &[u16],
    ) -> Result<(), ExchangeFault> {
        if !self.listening(slave_id) {
            return Err(ExchangeFault::NoResponse);
        }
        if self.state == State::Alive {
            return Err(ExchangeFault::Exception(EXCEPTION_ILLEGAL_ADDRESS));
        }
        match addr {
            regs::INFO_BLOCK => {
                if values.iter().all(|&v| v == 0) {
                    // Probe block: reject without arming a transfer.
                    return Err(ExchangeFault::Exception(EXCEPTION_DEVICE_FAILURE));
                }
                if !self.info_block_matches(values) {
                    return Err(ExchangeFault::Exception(EXCEPTION_DEVICE_FAILURE));
                }
                self.info_blocks.push(values.to_vec());
                Ok(())
            }
            regs::DATA_BLOCK => {
                if values.len() > CHUNK_REGS {
                    return Err(ExchangeFault::Exception(EXCEPTION_ILLEGAL_ADDRESS));
                }
                if self.fail_chunk == Some(self.chunks_written.len()) {
                    return Err(ExchangeFault::NoResponse);
                }
                self.chunks_written.push(values.to_vec());
                self.flashed = true;
                Ok(())
            }
            _ => Err(ExchangeFault::Exception(EXCEPTION_ILLEGAL_ADDRESS)),
        }
    }
}

/// In-memory firmware catalog writing real artifact files to a temp dir.
pub(crate) struct FakeCatalog {
    releases: Vec<(String, ImageKind, Version)>,
    offline: bool,
    fetches: usize,
    dir: tempfile::TempDir,
}

impl FakeCatalog {
    fn empty() -> Self {
        Self {
            releases: Vec::new(),
            offline: false,
            fetches: 0,
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn with_release(signature: &str, version: &str) -> Self {
        let mut catalog = Self::empty();
        catalog.add(signature, ImageKind::Firmware, version);
        catalog
    }

    pub fn with_bootloader(signature: &str, version: &str) -> Self {
        let mut catalog = Self::empty();
        catalog.add(signature, ImageKind::Bootloader, version);
        catalog
    }

    pub fn offline() -> Self {
        let mut catalog = Self::empty();
        catalog.offline = true;
        catalog
    }

    pub fn add(&mut self, signature: &str, kind: ImageKind, version: &str) {
        self.releases.push((
            signature.to_string(),
            kind,
            Version::parse(version).expect("test version"),
        ));
    }

    /// Number of artifacts actually downloaded.
    pub fn fetches(&self) -> usize {
        self.fetches
    }

    /// Artifact bytes for `signature`: the encoded info block plus one data
    /// chunk, matching what [`FakeDevice`] validates.
    fn artifact_bytes(signature: &str) -> Vec<u8> {
        let mut regs = encode_info_block(signature);
        regs.extend((0..CHUNK_REGS as u16).map(|i| i.wrapping_mul(3)));
        regs.iter().flat_map(|r| r.to_be_bytes()).collect()
    }
}

impl Downloader for FakeCatalog {
    fn latest_version(
        &mut self,
        signature: &str,
        kind: ImageKind,
        _branch: Option<&str>,
    ) -> Result<Version, DownloadError> {
        if self.offline {
            return Err(DownloadError::Unreachable("offline".to_string()));
        }
        self.releases
            .iter()
            .filter(|(sig, k, _)| sig == signature && *k == kind)
            .map(|(_, _, v)| v.clone())
            .max()
            .ok_or_else(|| DownloadError::NotFound {
                signature: signature.to_string(),
                version: "latest".to_string(),
            })
    }

    fn fetch_release(
        &mut self,
        signature: &str,
        kind: ImageKind,
        _branch: Option<&str>,
        version: &Version,
    ) -> Result<PathBuf, DownloadError> {
        if self.offline {
            return Err(DownloadError::Unreachable("offline".to_string()));
        }
        let released = self
            .releases
            .iter()
            .any(|(sig, k, v)| sig == signature && *k == kind && v == version);
        if !released {
            return Err(DownloadError::NotFound {
                signature: signature.to_string(),
                version: version.to_string(),
            });
        }
        let path = self.dir.path().join(format!("{signature}-{version}.img"));
        std::fs::write(&path, Self::artifact_bytes(signature)).expect("write artifact");
        self.fetches += 1;
        Ok(path)
    }

    fn known_signatures(&mut self) -> Result<Vec<String>, DownloadError> {
        if self.offline {
            return Err(DownloadError::Unreachable("offline".to_string()));
        }
        let mut sigs: Vec<String> = Vec::new();
        for (sig, _, _) in &self.releases {
            if !sigs.contains(sig) {
                sigs.push(sig.clone());
            }
        }
        Ok(sigs)
    }
}

/// Identity cache backed by a plain map, counting flushes.
#[derive(Default)]
pub(crate) struct MemoryStore {
    entries: HashMap<BusAddress, String>,
    pub flushes: usize,
}

impl MemoryStore {
    pub fn preloaded(address: &BusAddress, signature: &str) -> Self {
        let mut store = Self::default();
        store
            .entries
            .insert(address.clone(), signature.to_string());
        store
    }
}

impl IdentityStore for MemoryStore {
    fn get(&mut self, address: &BusAddress) -> Option<String> {
        self.entries.get(address).cloned()
    }

    fn put(&mut self, address: &BusAddress, signature: &str) {
        self.entries.insert(address.clone(), signature.to_string());
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }
}
