//! Single-device recovery from bootloader mode.

use super::{build_request, connect, CmdResult};
use crate::cli::{Cli, DeviceArgs, UpdateArgs};
use crate::downloader::{default_cache_dir, HttpDownloader};
use crate::identity_db::JsonIdentityStore;
use crate::progress::{IndicatifFlashProgress, StdinPrompt};
use busflash_core::device::DeviceHandle;
use busflash_core::resolve::{IdentityStore, ImageKind};
use busflash_core::update::{recover_device, UpdateContext};

pub fn run(
    cli: &Cli,
    device: &DeviceArgs,
    update: &UpdateArgs,
    fw_sig: Option<&str>,
) -> CmdResult {
    let mut conn = connect(device)?;
    let mut handle = DeviceHandle::new(conn.port.as_mut(), conn.address, conn.retry);

    let mut downloader =
        HttpDownloader::new(&cli.url, default_cache_dir()).map_err(|e| e.to_string())?;
    let mut store = JsonIdentityStore::open(&cli.db);
    let mut prompt = StdinPrompt {
        assume_yes: update.force,
    };
    let mut progress = IndicatifFlashProgress::new();
    let req = build_request(ImageKind::Firmware, update, conn.hint)?;

    let result = {
        let mut ctx = UpdateContext {
            downloader: &mut downloader,
            store: &mut store,
            prompt: &mut prompt,
            progress: &mut progress,
        };
        recover_device(&mut handle, &mut ctx, &req, fw_sig)
    };
    store.flush();

    let version = result?;
    println!("{}: recovered with firmware v{version}", handle.address());
    Ok(())
}
