//! Single-device firmware and bootloader updates.

use super::{build_request, connect, CmdResult};
use crate::cli::{Cli, DeviceArgs, UpdateArgs};
use crate::downloader::{default_cache_dir, HttpDownloader};
use crate::identity_db::JsonIdentityStore;
use crate::progress::{IndicatifFlashProgress, StdinPrompt};
use busflash_core::device::DeviceHandle;
use busflash_core::resolve::{IdentityStore, ImageKind};
use busflash_core::update::{update_device, UpdateContext, UpdateStatus};

pub fn run(cli: &Cli, device: &DeviceArgs, update: &UpdateArgs, kind: ImageKind) -> CmdResult {
    let mut conn = connect(device)?;
    let mut handle = DeviceHandle::new(conn.port.as_mut(), conn.address, conn.retry);

    let mut downloader =
        HttpDownloader::new(&cli.url, default_cache_dir()).map_err(|e| e.to_string())?;
    let mut store = JsonIdentityStore::open(&cli.db);
    let mut prompt = StdinPrompt {
        assume_yes: update.force,
    };
    let mut progress = IndicatifFlashProgress::new();
    let req = build_request(kind, update, conn.hint)?;

    let result = {
        let mut ctx = UpdateContext {
            downloader: &mut downloader,
            store: &mut store,
            prompt: &mut prompt,
            progress: &mut progress,
        };
        update_device(&mut handle, &mut ctx, &req)
    };
    // Persist whatever identity was learned, even on failure.
    store.flush();

    match result? {
        UpdateStatus::Updated(version) => {
            println!("{}: {kind} updated to v{version}", handle.address());
        }
        UpdateStatus::AlreadyCurrent(version) => {
            println!(
                "{}: {kind} v{version} is already current, nothing to do",
                handle.address()
            );
        }
    }
    Ok(())
}
