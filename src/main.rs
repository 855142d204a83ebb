//! busflash - firmware update and recovery for serial-bus MCU devices
//!
//! The binary is thin: parse arguments, build the external collaborators
//! (catalog client, identity cache, driver config, consumer control,
//! prompt, progress bar) and hand off to `busflash-core`, which owns the
//! negotiation, resolution and flashing logic behind trait seams.

mod cli;
mod commands;
mod downloader;
mod driver_config;
mod identity_db;
mod port_clients;
mod progress;

use busflash_core::resolve::ImageKind;
use clap::Parser;
use cli::{Cli, Commands};

/// Default log filter for a verbosity count; `RUST_LOG` still overrides.
fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize logger, verbosity raising the default filter
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_filter(cli.verbose)),
    )
    .init();

    let result = match &cli.command {
        Commands::UpdateFw { device, update } => {
            commands::update::run(&cli, device, update, ImageKind::Firmware)
        }
        Commands::UpdateBl { device, update } => {
            commands::update::run(&cli, device, update, ImageKind::Bootloader)
        }
        Commands::Recover {
            device,
            update,
            fw_sig,
        } => commands::recover::run(&cli, device, update, fw_sig.as_deref()),
        Commands::UpdateAll { update } => commands::batch::run_update_all(&cli, update),
        Commands::RecoverAll { update } => commands::batch::run_recover_all(&cli, update),
        Commands::FlashFile {
            device,
            input,
            force,
            erase_settings,
        } => commands::flash_file::run(device, input, *force, *erase_settings),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
