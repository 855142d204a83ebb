//! Flash execution: bootloader transition, chunked transfer, return to
//! service.
//!
//! The executor is deliberately conservative about classification. Once the
//! info block is accepted the device's old firmware is gone, so any failure
//! after that point is a [`Error::FlashFailure`] naming what is known about
//! the position, and the device is left in whatever mode it actually is in
//! (usually the bootloader, ready for another attempt).

use crate::device::{regs, DeviceHandle, Mode};
use crate::error::{Error, Result};
use crate::image::FirmwareImage;
use crate::negotiate::{negotiate, ModeTarget};
use crate::probe::probe_state;
use crate::retry::retry_exchange;
use crate::Prompt;

/// Transfer progress sink. The CLI hangs a progress bar on it; everything
/// else uses [`NoProgress`].
pub trait FlashProgress {
    /// Transfer is starting with `total_chunks` data chunks.
    fn begin(&mut self, total_chunks: usize);
    /// Chunk `index` was acknowledged.
    fn chunk_done(&mut self, index: usize);
    /// Transfer completed and the device was commanded to restart.
    fn finish(&mut self);
}

/// Progress sink that ignores everything.
pub struct NoProgress;

impl FlashProgress for NoProgress {
    fn begin(&mut self, _total_chunks: usize) {}
    fn chunk_done(&mut self, _index: usize) {}
    fn finish(&mut self) {}
}

/// Per-flash behavior switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlashOptions {
    /// Erase every persisted device setting before writing the image.
    pub erase_settings: bool,
    /// Skip interactive confirmations.
    pub force: bool,
}

/// Drive one complete flash cycle on `handle`.
///
/// Accepts a device in alive, bootloader or unknown mode; alive devices are
/// rebooted into the bootloader first. On success the device is back in
/// application mode under working settings.
pub fn flash_image(
    handle: &mut DeviceHandle<'_>,
    image: &FirmwareImage,
    options: &FlashOptions,
    prompt: &mut dyn Prompt,
    progress: &mut dyn FlashProgress,
) -> Result<()> {
    // Where to look for the device once it restarts. For a device already
    // stuck in its bootloader there is nothing better than the fallbacks.
    let prior_settings = handle.settings();

    if handle.mode() == Mode::Unknown {
        probe_state(handle)?;
    }
    if handle.mode() == Mode::Alive {
        log::info!("rebooting {} into its bootloader", handle.address());
        handle.reboot_to_bootloader()?;
        negotiate(handle, ModeTarget::Bootloader, &[], None)?;
    }

    if options.erase_settings {
        let message = format!(
            "erase all persisted settings on {}? This cannot be undone",
            handle.address()
        );
        if !options.force && !prompt.confirm(&message) {
            return Err(Error::UserDeclined(
                "settings erase not confirmed".to_string(),
            ));
        }
        log::warn!("erasing persisted settings on {}", handle.address());
        handle.bootloader_command(regs::SETTINGS_ERASE)?;
    }

    handle.write_info_block(image.info())?;

    let retry = *handle.retry();
    progress.begin(image.chunks().len());
    for (index, chunk) in image.chunks().iter().enumerate() {
        let outcome = retry_exchange(retry.chunk_attempts, || handle.write_chunk(chunk));
        if let Err(fault) = outcome {
            let offset = image.chunk_offset(index);
            log::error!(
                "chunk {index} failed at byte offset {offset} on {}: {fault}",
                handle.address()
            );
            return Err(Error::FlashFailure {
                offset: Some(offset),
                reason: format!("chunk write failed at byte offset {offset}: {fault}"),
            });
        }
        progress.chunk_done(index);
    }
    progress.finish();

    log::info!("image transferred; restarting {}", handle.address());
    handle.reboot_to_application()?;
    std::thread::sleep(retry.reboot_settle);

    return_to_service(handle, prior_settings)
}

/// Wait for the freshly flashed device to answer in application mode.
///
/// The previous settings are tried first; when they stay silent (a settings
/// erase resets UART parameters) negotiation runs again from scratch. A
/// device that never reappears is a flash failure, never a silent success.
fn return_to_service(
    handle: &mut DeviceHandle<'_>,
    prior_settings: crate::settings::ConnectionSettings,
) -> Result<()> {
    handle.configure(&prior_settings)?;
    if handle.wait_for_reappear() {
        return Ok(());
    }
    match negotiate(handle, ModeTarget::Alive, &[prior_settings], None) {
        Ok(settings) => {
            log::info!(
                "device {} reappeared under {} after flashing",
                handle.address(),
                settings
            );
            Ok(())
        }
        Err(_) => Err(Error::FlashFailure {
            offset: None,
            reason: format!(
                "device {} did not reappear in application mode after flashing",
                handle.address()
            ),
        }),
    }
}
