//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "busflash")]
#[command(
    author,
    version,
    about = "Firmware update and recovery for serial-bus MCU devices",
    long_about = None
)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Firmware catalog root URL
    #[arg(long, global = true, default_value = "https://fw-releases.example.com")]
    pub url: String,

    /// Driver config file holding the device list
    #[arg(long, global = true, default_value = "/etc/bus-driver.conf")]
    pub config: PathBuf,

    /// Identity cache database file
    #[arg(long, global = true, default_value = "/var/lib/busflash/identities.json")]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

/// Single-device addressing, shared by the non-batch commands.
#[derive(clap::Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Serial port path, or tcp://host:port for a remote serial server
    pub port: String,

    /// Device slave id (1..=247)
    #[arg(short = 'a', long)]
    pub slave_id: u16,

    /// Response timeout override in milliseconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// UART parameters to try first, e.g. 9600N2
    #[arg(long)]
    pub uart_settings: Option<String>,
}

/// Update behavior switches shared by the update/recover commands.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct UpdateArgs {
    /// Skip confirmations; re-flash even when already current
    #[arg(long)]
    pub force: bool,

    /// Release branch to install from (default: the main release line)
    #[arg(long)]
    pub branch: Option<String>,

    /// Version to install
    #[arg(long, default_value = "latest")]
    pub fw_version: String,

    /// Erase all persisted device settings while flashing
    #[arg(long)]
    pub erase_settings: bool,

    /// Allow installing an older firmware version
    #[arg(long)]
    pub allow_downgrade: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Update the firmware of one device
    UpdateFw {
        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        update: UpdateArgs,
    },

    /// Update the bootloader of one device
    UpdateBl {
        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        update: UpdateArgs,
    },

    /// Recover a device stuck in its bootloader
    Recover {
        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        update: UpdateArgs,

        /// Firmware signature to assume instead of asking the device
        #[arg(long)]
        fw_sig: Option<String>,
    },

    /// Update the firmware of every device in the driver config
    UpdateAll {
        #[command(flatten)]
        update: UpdateArgs,
    },

    /// Probe every configured device and recover the ones stuck in
    /// bootloader mode
    RecoverAll {
        #[command(flatten)]
        update: UpdateArgs,
    },

    /// Flash a local firmware image file into one device
    FlashFile {
        #[command(flatten)]
        device: DeviceArgs,

        /// Firmware image file
        #[arg(short, long)]
        input: PathBuf,

        /// Skip confirmations
        #[arg(long)]
        force: bool,

        /// Erase all persisted device settings while flashing
        #[arg(long)]
        erase_settings: bool,
    },
}
