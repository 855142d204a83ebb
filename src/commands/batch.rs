//! Whole-bus batch commands driven by the driver config.

use super::{build_request, CmdResult};
use crate::cli::{Cli, UpdateArgs};
use crate::downloader::{default_cache_dir, HttpDownloader};
use crate::driver_config::DriverConfigProvider;
use crate::identity_db::JsonIdentityStore;
use crate::port_clients::FuserConsumerControl;
use crate::progress::{IndicatifFlashProgress, StdinPrompt};
use busflash_core::batch::{run_batch, DeviceListProvider};
use busflash_core::device::Mode;
use busflash_core::probe::probe_state;
use busflash_core::resolve::{IdentityStore, ImageKind};
use busflash_core::update::{recover_device, update_device, UpdateContext, UpdateStatus};
use busflash_core::RetryPolicy;
use busflash_proto::PortFactory;

#[derive(Clone, Copy)]
enum BatchMode {
    Update,
    Recover,
}

pub fn run_update_all(cli: &Cli, update: &UpdateArgs) -> CmdResult {
    run_all(cli, update, BatchMode::Update)
}

pub fn run_recover_all(cli: &Cli, update: &UpdateArgs) -> CmdResult {
    run_all(cli, update, BatchMode::Recover)
}

fn run_all(cli: &Cli, update: &UpdateArgs, mode: BatchMode) -> CmdResult {
    // A broken config aborts before any bus traffic.
    let devices = DriverConfigProvider::new(&cli.config).devices()?;
    if devices.is_empty() {
        println!("no enabled devices in {}", cli.config.display());
        return Ok(());
    }

    let mut factory = PortFactory;
    let mut consumers = FuserConsumerControl::new(update.force);
    let mut downloader =
        HttpDownloader::new(&cli.url, default_cache_dir()).map_err(|e| e.to_string())?;
    let mut store = JsonIdentityStore::open(&cli.db);
    let mut prompt = StdinPrompt {
        assume_yes: update.force,
    };
    let mut progress = IndicatifFlashProgress::new();
    let base = build_request(ImageKind::Firmware, update, None)?;
    let retry = RetryPolicy::default();

    let report = run_batch(
        &devices,
        &mut factory,
        &mut consumers,
        &retry,
        |handle, entry| {
            let mut req = base.clone();
            req.known_settings = entry.settings;
            let mut ctx = UpdateContext {
                downloader: &mut downloader,
                store: &mut store,
                prompt: &mut prompt,
                progress: &mut progress,
            };
            match mode {
                BatchMode::Update => match update_device(handle, &mut ctx, &req)? {
                    UpdateStatus::Updated(version) => {
                        log::info!("{}: updated to v{version}", entry.label);
                        Ok(())
                    }
                    UpdateStatus::AlreadyCurrent(version) => {
                        log::info!("{}: v{version} already current", entry.label);
                        Ok(())
                    }
                },
                BatchMode::Recover => match probe_state(handle)? {
                    Mode::InBootloader => {
                        let version = recover_device(handle, &mut ctx, &req, None)?;
                        log::info!("{}: recovered with v{version}", entry.label);
                        Ok(())
                    }
                    _ => {
                        log::info!("{}: alive, no recovery needed", entry.label);
                        Ok(())
                    }
                },
            }
        },
    );
    store.flush();

    println!("{report}");
    if report.all_ok() {
        Ok(())
    } else {
        Err(format!("{} device(s) failed", report.failures().count()).into())
    }
}
