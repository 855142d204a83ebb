//! Top-level device operations: update an alive device, recover one stuck
//! in its bootloader.
//!
//! These functions tie the layers together in a fixed order: negotiate,
//! identify, resolve, flash, verify. Each one takes the external
//! collaborators through [`UpdateContext`] so the whole flow runs against
//! scripted fakes in tests.

use crate::device::{DeviceHandle, Mode};
use crate::error::{Error, Result};
use crate::flash::{flash_image, FlashOptions, FlashProgress};
use crate::image::FirmwareImage;
use crate::negotiate::{negotiate, ModeTarget};
use crate::resolve::{
    DownloadError, Downloader, IdentityStore, ImageKind, Resolution, ResolveRequest, Resolver,
    VersionSelector,
};
use crate::settings::ConnectionSettings;
use crate::version::parse_version;
use crate::Prompt;
use semver::Version;

/// External collaborators for one run, injected by the binary.
pub struct UpdateContext<'a> {
    /// Firmware catalog access.
    pub downloader: &'a mut dyn Downloader,
    /// Persistent address-to-signature cache.
    pub store: &'a mut dyn IdentityStore,
    /// Operator confirmation hook.
    pub prompt: &'a mut dyn Prompt,
    /// Transfer progress sink.
    pub progress: &'a mut dyn FlashProgress,
}

/// What to update and how.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    /// Artifact family.
    pub kind: ImageKind,
    /// Requested version.
    pub selector: VersionSelector,
    /// Source branch, `None` for main.
    pub branch: Option<String>,
    /// Non-interactive mode: skip confirmations, re-flash when current.
    pub force: bool,
    /// Permit firmware downgrades.
    pub allow_downgrade: bool,
    /// Erase persisted device settings while in the bootloader.
    pub erase_settings: bool,
    /// UART parameters the config declares for this device.
    pub known_settings: Option<ConnectionSettings>,
}

impl UpdateRequest {
    /// Latest main-branch firmware with everything else at defaults.
    pub fn latest_firmware() -> Self {
        Self {
            kind: ImageKind::Firmware,
            selector: VersionSelector::Latest,
            branch: None,
            force: false,
            allow_downgrade: false,
            erase_settings: false,
            known_settings: None,
        }
    }
}

/// How an update request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    /// The device now runs `Version`.
    Updated(Version),
    /// Nothing was written; the installed version already matched.
    AlreadyCurrent(Version),
}

/// Update the firmware or bootloader of an alive device.
///
/// The device must answer in application mode under some candidate
/// settings; a device stuck in its bootloader is the recovery path's
/// business. Returns without any bus write when the device is already
/// current and `force` is off.
pub fn update_device(
    handle: &mut DeviceHandle<'_>,
    ctx: &mut UpdateContext<'_>,
    req: &UpdateRequest,
) -> Result<UpdateStatus> {
    let hints: Vec<ConnectionSettings> = req.known_settings.into_iter().collect();
    if handle.mode() != Mode::Alive {
        negotiate(handle, ModeTarget::Alive, &hints, None)?;
    }

    let mut resolver = Resolver::new(&mut *ctx.downloader, &mut *ctx.store);
    let signature = resolver.signature_for_alive(handle)?;

    let raw_installed = match req.kind {
        ImageKind::Firmware => handle.read_fw_version()?,
        ImageKind::Bootloader => handle.read_bootloader_version()?,
    };
    let installed = match parse_version(&raw_installed) {
        Ok(version) => Some(version),
        Err(_) => {
            log::warn!(
                "device {} reports unparseable {} version \"{raw_installed}\"; updating anyway",
                handle.address(),
                req.kind
            );
            None
        }
    };

    let release = match resolver.resolve(&ResolveRequest {
        signature: &signature,
        kind: req.kind,
        branch: req.branch.as_deref(),
        selector: req.selector.clone(),
        installed: installed.clone(),
        force: req.force,
        allow_downgrade: req.allow_downgrade,
    })? {
        Resolution::UpToDate { installed } => {
            return Ok(UpdateStatus::AlreadyCurrent(installed));
        }
        Resolution::Update(release) => release,
    };

    if let Some(installed) = &installed {
        if release.version.major > installed.major && !req.force {
            let message = format!(
                "updating {} v{installed} -> v{} crosses a major version and may change behavior; continue?",
                req.kind, release.version
            );
            if !ctx.prompt.confirm(&message) {
                return Err(Error::UserDeclined(
                    "major version jump not confirmed".to_string(),
                ));
            }
        }
    }

    let image = FirmwareImage::load(&release.artifact_path)?;
    log::info!(
        "flashing {} v{} (\"{}\") onto {}",
        release.kind,
        release.version,
        release.signature,
        handle.address()
    );
    flash_image(
        handle,
        &image,
        &FlashOptions {
            erase_settings: req.erase_settings,
            force: req.force,
        },
        ctx.prompt,
        ctx.progress,
    )?;

    if req.kind == ImageKind::Firmware {
        match handle.read_fw_version() {
            Ok(now) => log::info!("device {} now reports firmware {now}", handle.address()),
            Err(err) => log::warn!(
                "device {} is back but its version read failed: {err}",
                handle.address()
            ),
        }
    }
    Ok(UpdateStatus::Updated(release.version))
}

/// Recover a device stuck in its bootloader by flashing firmware into it.
///
/// Identity comes from (in order) the explicit override, the bootloader
/// itself, the identity cache. With no identity at all, every signature the
/// catalog knows is tried until the bootloader accepts one.
pub fn recover_device(
    handle: &mut DeviceHandle<'_>,
    ctx: &mut UpdateContext<'_>,
    req: &UpdateRequest,
    signature_override: Option<&str>,
) -> Result<Version> {
    let hints: Vec<ConnectionSettings> = req.known_settings.into_iter().collect();
    if handle.mode() != Mode::InBootloader {
        negotiate(handle, ModeTarget::Bootloader, &hints, None)?;
    }

    let mut resolver = Resolver::new(&mut *ctx.downloader, &mut *ctx.store);
    let signature = match resolver.signature_for_bootloader(handle, signature_override) {
        Ok(signature) => signature,
        Err(Error::UnknownSignature { .. }) => return recover_blind(handle, ctx, req),
        Err(err) => return Err(err),
    };

    let release = match resolver.resolve(&ResolveRequest {
        signature: &signature,
        kind: ImageKind::Firmware,
        branch: req.branch.as_deref(),
        selector: req.selector.clone(),
        installed: None,
        force: req.force,
        allow_downgrade: req.allow_downgrade,
    })? {
        Resolution::UpToDate { installed } => return Ok(installed),
        Resolution::Update(release) => release,
    };

    let image = FirmwareImage::load(&release.artifact_path)?;
    log::info!(
        "recovering {} with firmware v{} (\"{signature}\")",
        handle.address(),
        release.version
    );
    flash_image(
        handle,
        &image,
        &FlashOptions {
            erase_settings: req.erase_settings,
            force: req.force,
        },
        ctx.prompt,
        ctx.progress,
    )?;
    Ok(release.version)
}

/// Last-resort recovery: try the latest firmware of every known signature
/// until the bootloader accepts one. The bootloader validates the image
/// metadata, so a wrong guess is rejected before any data is written.
fn recover_blind(
    handle: &mut DeviceHandle<'_>,
    ctx: &mut UpdateContext<'_>,
    req: &UpdateRequest,
) -> Result<Version> {
    let signatures = ctx.downloader.known_signatures().map_err(|err| match err {
        DownloadError::Unreachable(detail) => Error::DownloadUnavailable(detail),
        DownloadError::NotFound { .. } => Error::DownloadUnavailable("empty catalog".to_string()),
    })?;
    log::warn!(
        "no identity for {}; trying all {} known signatures",
        handle.address(),
        signatures.len()
    );
    for signature in &signatures {
        let mut resolver = Resolver::new(&mut *ctx.downloader, &mut *ctx.store);
        let release = match resolver.resolve(&ResolveRequest {
            signature,
            kind: ImageKind::Firmware,
            branch: req.branch.as_deref(),
            selector: VersionSelector::Latest,
            installed: None,
            force: true,
            allow_downgrade: false,
        }) {
            Ok(Resolution::Update(release)) => release,
            Ok(Resolution::UpToDate { .. }) => continue,
            Err(err) => {
                log::debug!("skipping \"{signature}\": {err}");
                continue;
            }
        };
        let image = match FirmwareImage::load(&release.artifact_path) {
            Ok(image) => image,
            Err(err) => {
                log::warn!("unusable artifact for \"{signature}\": {err}");
                continue;
            }
        };
        match flash_image(
            handle,
            &image,
            &FlashOptions {
                erase_settings: req.erase_settings,
                force: true,
            },
            ctx.prompt,
            ctx.progress,
        ) {
            Ok(()) => {
                // This identity demonstrably fits the hardware; remember it.
                ctx.store.put(handle.address(), signature);
                return Ok(release.version);
            }
            Err(err) => {
                log::debug!("device rejected \"{signature}\": {err}");
                if handle.mode() != Mode::InBootloader {
                    negotiate(handle, ModeTarget::Bootloader, &[], None)?;
                }
            }
        }
    }
    Err(Error::FlashFailure {
        offset: None,
        reason: format!(
            "no known firmware was accepted by device {}",
            handle.address()
        ),
    })
}
