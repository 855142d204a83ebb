//! Device list from the externally-owned driver config.
//!
//! The poll driver's JSON config is the source of truth for which devices
//! hang off which port. Only the fields relevant here are deserialised;
//! everything else in the file is ignored. Disabled ports and devices are
//! skipped. A config that cannot be read or parsed aborts the batch before
//! any bus traffic.

use busflash_core::batch::{DeviceEntry, DeviceListProvider};
use busflash_core::device::BusAddress;
use busflash_core::error::{Error, Result};
use busflash_core::settings::ConnectionSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_enabled() -> bool {
    true
}

fn default_baud() -> u32 {
    9600
}

fn default_parity() -> String {
    "N".to_string()
}

fn default_stop_bits() -> u8 {
    2
}

#[derive(Debug, Deserialize)]
struct DriverConfig {
    #[serde(default)]
    ports: Vec<PortConfig>,
}

#[derive(Debug, Deserialize)]
struct PortConfig {
    path: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default = "default_baud")]
    baud_rate: u32,
    #[serde(default = "default_parity")]
    parity: String,
    #[serde(default = "default_stop_bits")]
    stop_bits: u8,
    #[serde(default)]
    response_timeout_ms: Option<u64>,
    #[serde(default)]
    devices: Vec<DeviceConfig>,
}

#[derive(Debug, Deserialize)]
struct DeviceConfig {
    slave_id: u16,
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    response_timeout_ms: Option<u64>,
}

pub struct DriverConfigProvider {
    path: PathBuf,
}

impl DriverConfigProvider {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

fn port_settings(port: &PortConfig) -> Result<ConnectionSettings> {
    let compact = format!("{}{}{}", port.baud_rate, port.parity, port.stop_bits);
    ConnectionSettings::parse(&compact)
        .map_err(|_| Error::ConfigParsing(format!("port {}: bad uart params {compact:?}", port.path)))
}

impl DeviceListProvider for DriverConfigProvider {
    fn devices(&mut self) -> Result<Vec<DeviceEntry>> {
        let bytes = std::fs::read(&self.path)
            .map_err(|e| Error::ConfigParsing(format!("{}: {e}", self.path.display())))?;
        let config: DriverConfig = serde_json::from_slice(&bytes)
            .map_err(|e| Error::ConfigParsing(format!("{}: {e}", self.path.display())))?;

        let mut entries = Vec::new();
        for port in &config.ports {
            if !port.enabled {
                log::debug!("skipping disabled port {}", port.path);
                continue;
            }
            let settings = port_settings(port)?;
            for device in &port.devices {
                if !device.enabled {
                    log::debug!("skipping disabled device {}:{}", port.path, device.slave_id);
                    continue;
                }
                let address = BusAddress::new(&port.path, device.slave_id)?;
                let label = device
                    .name
                    .clone()
                    .unwrap_or_else(|| address.to_string());
                // The larger of the port-wide and per-device timeouts; slow
                // devices must not time out because their port is fast.
                let response_timeout = match (port.response_timeout_ms, device.response_timeout_ms)
                {
                    (None, None) => None,
                    (a, b) => Some(Duration::from_millis(
                        a.unwrap_or(0).max(b.unwrap_or(0)),
                    )),
                };
                entries.push(DeviceEntry {
                    label,
                    address,
                    settings: Some(settings),
                    response_timeout,
                });
            }
        }
        log::info!(
            "driver config lists {} device(s) on {} port(s)",
            entries.len(),
            config.ports.iter().filter(|p| p.enabled).count()
        );
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_for(json: &str) -> (tempfile::TempDir, DriverConfigProvider) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver.conf");
        std::fs::write(&path, json).unwrap();
        (dir, DriverConfigProvider::new(&path))
    }

    #[test]
    fn parses_ports_and_devices() {
        let (_dir, mut provider) = provider_for(
            r#"{
                "ports": [
                    {
                        "path": "/dev/ttyRS485-1",
                        "baud_rate": 115200,
                        "response_timeout_ms": 100,
                        "devices": [
                            { "slave_id": 10, "name": "relay" },
                            { "slave_id": 11, "response_timeout_ms": 500 }
                        ]
                    }
                ]
            }"#,
        );
        let devices = provider.devices().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].label, "relay");
        assert_eq!(devices[0].address.to_string(), "/dev/ttyRS485-1:10");
        assert_eq!(
            devices[0].settings.unwrap().to_string(),
            "115200N2"
        );
        assert_eq!(devices[0].response_timeout, Some(Duration::from_millis(100)));
        // Per-device override beats the port-wide value when larger.
        assert_eq!(devices[1].label, "/dev/ttyRS485-1:11");
        assert_eq!(devices[1].response_timeout, Some(Duration::from_millis(500)));
    }

    #[test]
    fn skips_disabled_entries() {
        let (_dir, mut provider) = provider_for(
            r#"{
                "ports": [
                    {
                        "path": "/dev/ttyRS485-1",
                        "devices": [
                            { "slave_id": 1 },
                            { "slave_id": 2, "enabled": false }
                        ]
                    },
                    {
                        "path": "/dev/ttyRS485-2",
                        "enabled": false,
                        "devices": [ { "slave_id": 3 } ]
                    }
                ]
            }"#,
        );
        let devices = provider.devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].address.to_string(), "/dev/ttyRS485-1:1");
    }

    #[test]
    fn malformed_config_is_a_parsing_error() {
        let (_dir, mut provider) = provider_for("{ not json");
        assert!(matches!(
            provider.devices().unwrap_err(),
            Error::ConfigParsing(_)
        ));
    }

    #[test]
    fn missing_file_is_a_parsing_error() {
        let mut provider = DriverConfigProvider::new(Path::new("/nonexistent/driver.conf"));
        assert!(matches!(
            provider.devices().unwrap_err(),
            Error::ConfigParsing(_)
        ));
    }

    #[test]
    fn bad_slave_id_is_rejected() {
        let (_dir, mut provider) = provider_for(
            r#"{ "ports": [ { "path": "/dev/p1", "devices": [ { "slave_id": 300 } ] } ] }"#,
        );
        assert!(provider.devices().is_err());
    }
}
