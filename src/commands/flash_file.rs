//! Flash a local image file, bypassing the catalog entirely.

use super::{connect, CmdResult};
use crate::cli::DeviceArgs;
use crate::progress::{IndicatifFlashProgress, StdinPrompt};
use busflash_core::device::DeviceHandle;
use busflash_core::flash::{flash_image, FlashOptions};
use busflash_core::image::FirmwareImage;
use std::path::Path;

pub fn run(device: &DeviceArgs, input: &Path, force: bool, erase_settings: bool) -> CmdResult {
    let image = FirmwareImage::load(input)?;
    log::info!(
        "loaded {} ({} chunks)",
        input.display(),
        image.chunks().len()
    );

    let mut conn = connect(device)?;
    let mut handle = DeviceHandle::new(conn.port.as_mut(), conn.address, conn.retry);
    let mut prompt = StdinPrompt { assume_yes: force };
    let mut progress = IndicatifFlashProgress::new();
    flash_image(
        &mut handle,
        &image,
        &FlashOptions {
            erase_settings,
            force,
        },
        &mut prompt,
        &mut progress,
    )?;
    println!("{}: image written, device is back up", handle.address());
    Ok(())
}
