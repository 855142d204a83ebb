//! CLI command implementations
//!
//! Each submodule owns one subcommand family. The shared helpers here turn
//! the parsed command line into an open port and an engine request; the
//! subcommands wire the downloader, identity cache, prompt and progress bar
//! together and hand off to `busflash_core`.

pub mod batch;
pub mod flash_file;
pub mod recover;
pub mod update;

use crate::cli::{DeviceArgs, UpdateArgs};
use busflash_core::port::{BusPort, BusPortFactory};
use busflash_core::resolve::{ImageKind, VersionSelector};
use busflash_core::settings::{ConnectionSettings, BOOTLOADER_SETTINGS};
use busflash_core::update::UpdateRequest;
use busflash_core::version::parse_version;
use busflash_core::{BusAddress, RetryPolicy};
use busflash_proto::PortFactory;
use std::time::Duration;

pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// One opened single-device connection.
pub(crate) struct Connection {
    pub port: Box<dyn BusPort>,
    pub address: BusAddress,
    pub retry: RetryPolicy,
    pub hint: Option<ConnectionSettings>,
}

/// Open the port named on the command line and prepare retry parameters.
/// The initial UART configuration is a placeholder; negotiation settles
/// the real one before any register traffic.
pub(crate) fn connect(device: &DeviceArgs) -> Result<Connection, Box<dyn std::error::Error>> {
    let hint = match &device.uart_settings {
        Some(s) => Some(ConnectionSettings::parse(s)?),
        None => None,
    };
    let mut retry = RetryPolicy::default();
    if let Some(ms) = device.timeout {
        retry = retry.with_response_timeout(Duration::from_millis(ms));
    }
    let address = BusAddress::new(&device.port, device.slave_id)?;
    let mut factory = PortFactory;
    let port = factory.open(
        &device.port,
        &hint.unwrap_or(BOOTLOADER_SETTINGS),
        retry.response_timeout,
    )?;
    Ok(Connection {
        port,
        address,
        retry,
        hint,
    })
}

/// Translate the shared update flags into an engine request.
pub(crate) fn build_request(
    kind: ImageKind,
    args: &UpdateArgs,
    hint: Option<ConnectionSettings>,
) -> Result<UpdateRequest, Box<dyn std::error::Error>> {
    let selector = if args.fw_version.eq_ignore_ascii_case("latest") {
        VersionSelector::Latest
    } else {
        VersionSelector::Exact(parse_version(&args.fw_version)?)
    };
    Ok(UpdateRequest {
        kind,
        selector,
        branch: args.branch.clone(),
        force: args.force,
        allow_downgrade: args.allow_downgrade,
        erase_settings: args.erase_settings,
        known_settings: hint,
    })
}
