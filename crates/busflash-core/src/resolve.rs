//! Release resolution: from a device identity to a concrete artifact.
//!
//! The resolver combines three inputs: the device itself (signature and
//! installed version registers), the identity cache (signatures remembered
//! from earlier runs, for devices stuck in the bootloader) and the firmware
//! catalog. Both external collaborators are traits so the whole decision
//! tree runs in tests without network or disk.

use crate::device::{BusAddress, DeviceHandle};
use crate::error::{Error, Result};
use semver::Version;
use std::fmt;
use std::path::PathBuf;

/// Which artifact family a lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Application firmware.
    Firmware,
    /// Bootloader image. Bootloader downgrades are never allowed.
    Bootloader,
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImageKind::Firmware => "firmware",
            ImageKind::Bootloader => "bootloader",
        })
    }
}

/// Which version of an artifact a lookup targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    /// Newest released version on the selected branch.
    Latest,
    /// One specific version.
    Exact(Version),
}

/// Failure modes of catalog access, kept separate from the engine error
/// space so callers can distinguish "no such release" from "network down".
#[derive(Debug)]
pub enum DownloadError {
    /// The catalog has no artifact for this signature/version.
    NotFound {
        /// Signature that was looked up.
        signature: String,
        /// Requested version, or "latest".
        version: String,
    },
    /// The catalog could not be reached at all.
    Unreachable(String),
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadError::NotFound { signature, version } => {
                write!(f, "no artifact for \"{signature}\" version {version}")
            }
            DownloadError::Unreachable(detail) => write!(f, "storage unreachable: {detail}"),
        }
    }
}

/// Read access to the firmware catalog.
pub trait Downloader {
    /// Newest released version for `signature` on `branch` (main when
    /// `None`).
    fn latest_version(
        &mut self,
        signature: &str,
        kind: ImageKind,
        branch: Option<&str>,
    ) -> std::result::Result<Version, DownloadError>;

    /// Fetch the artifact for `signature`/`version`, returning a local file
    /// path.
    fn fetch_release(
        &mut self,
        signature: &str,
        kind: ImageKind,
        branch: Option<&str>,
        version: &Version,
    ) -> std::result::Result<PathBuf, DownloadError>;

    /// Every signature the catalog has firmware for. Used by blind recovery
    /// when a device's identity cannot be determined.
    fn known_signatures(&mut self) -> std::result::Result<Vec<String>, DownloadError>;
}

/// Persistent slave-id to signature cache, written while devices are alive
/// and read back when one is found stuck in the bootloader.
pub trait IdentityStore {
    /// Look up the remembered signature for `address`.
    fn get(&mut self, address: &BusAddress) -> Option<String>;

    /// Remember `signature` for `address`, superseding earlier entries.
    fn put(&mut self, address: &BusAddress, signature: &str);

    /// Persist pending entries. Called once per run; failures are logged by
    /// the implementation, never fatal to the update itself.
    fn flush(&mut self);
}

/// A concrete release chosen for a device.
#[derive(Debug, Clone)]
pub struct FirmwareRelease {
    /// Signature the artifact is built for.
    pub signature: String,
    /// Released version.
    pub version: Version,
    /// Source branch, `None` for the main release line.
    pub branch: Option<String>,
    /// Local path of the downloaded artifact.
    pub artifact_path: PathBuf,
    /// Artifact family.
    pub kind: ImageKind,
}

/// Outcome of version resolution.
#[derive(Debug)]
pub enum Resolution {
    /// Installed version already matches the target; nothing to write.
    UpToDate {
        /// The version confirmed current.
        installed: Version,
    },
    /// An artifact should be flashed.
    Update(FirmwareRelease),
}

/// Inputs to one resolution decision.
#[derive(Debug)]
pub struct ResolveRequest<'s> {
    /// Device firmware signature.
    pub signature: &'s str,
    /// Artifact family to look up.
    pub kind: ImageKind,
    /// Source branch, `None` for main.
    pub branch: Option<&'s str>,
    /// Requested version.
    pub selector: VersionSelector,
    /// Version currently installed, when it could be read and parsed.
    /// `None` skips the up-to-date and downgrade checks entirely.
    pub installed: Option<Version>,
    /// Re-flash even when already current.
    pub force: bool,
    /// Permit firmware downgrades. Never applies to bootloaders.
    pub allow_downgrade: bool,
}

/// Ties the catalog and the identity cache together for one run.
pub struct Resolver<'a> {
    downloader: &'a mut dyn Downloader,
    store: &'a mut dyn IdentityStore,
}

impl<'a> Resolver<'a> {
    pub fn new(downloader: &'a mut dyn Downloader, store: &'a mut dyn IdentityStore) -> Self {
        Self { downloader, store }
    }

    /// Signature of an alive device: read it from the identity block and
    /// refresh the cache entry while we can.
    pub fn signature_for_alive(&mut self, handle: &mut DeviceHandle<'_>) -> Result<String> {
        let signature = handle.read_fw_signature()?;
        self.store.put(handle.address(), &signature);
        Ok(signature)
    }

    /// Signature of a device sitting in its bootloader.
    ///
    /// An explicit override wins. Newer bootloaders still serve the
    /// signature register, so the device is asked first; failing that, the
    /// cache is the last resort before giving up with `UnknownSignature`.
    pub fn signature_for_bootloader(
        &mut self,
        handle: &mut DeviceHandle<'_>,
        explicit: Option<&str>,
    ) -> Result<String> {
        if let Some(signature) = explicit {
            return Ok(signature.to_string());
        }
        match handle.read_fw_signature() {
            Ok(signature) => {
                self.store.put(handle.address(), &signature);
                Ok(signature)
            }
            Err(err) => {
                log::debug!(
                    "bootloader at {} did not report a signature ({err}); trying the cache",
                    handle.address()
                );
                self.store
                    .get(handle.address())
                    .ok_or_else(|| Error::UnknownSignature {
                        address: handle.address().clone(),
                    })
            }
        }
    }

    /// Decide whether an update is needed and fetch the artifact if so.
    pub fn resolve(&mut self, req: &ResolveRequest<'_>) -> Result<Resolution> {
        let target = match &req.selector {
            VersionSelector::Exact(version) => version.clone(),
            VersionSelector::Latest => self
                .downloader
                .latest_version(req.signature, req.kind, req.branch)
                .map_err(|e| catalog_error(req.signature, e))?,
        };
        if let Some(installed) = &req.installed {
            if *installed == target && !req.force {
                log::info!(
                    "{} v{installed} already current for \"{}\"",
                    req.kind,
                    req.signature
                );
                return Ok(Resolution::UpToDate {
                    installed: installed.clone(),
                });
            }
            if target < *installed {
                let downgrade_ok = req.kind == ImageKind::Firmware && req.allow_downgrade;
                if !downgrade_ok {
                    return Err(Error::DowngradeRejected {
                        installed: installed.clone(),
                        requested: target,
                    });
                }
                log::warn!(
                    "downgrading {} v{installed} -> v{target} for \"{}\"",
                    req.kind,
                    req.signature
                );
            }
        }
        let artifact_path = self
            .downloader
            .fetch_release(req.signature, req.kind, req.branch, &target)
            .map_err(|e| catalog_error(req.signature, e))?;
        Ok(Resolution::Update(FirmwareRelease {
            signature: req.signature.to_string(),
            version: target,
            branch: req.branch.map(str::to_string),
            artifact_path,
            kind: req.kind,
        }))
    }
}

fn catalog_error(signature: &str, err: DownloadError) -> Error {
    match err {
        DownloadError::NotFound { .. } => Error::NoReleasedFirmware {
            signature: signature.to_string(),
        },
        DownloadError::Unreachable(detail) => Error::DownloadUnavailable(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeCatalog, MemoryStore};

    fn request<'s>(installed: Option<&str>) -> ResolveRequest<'s> {
        ResolveRequest {
            signature: "msw3",
            kind: ImageKind::Firmware,
            branch: None,
            selector: VersionSelector::Latest,
            installed: installed.map(|v| Version::parse(v).unwrap()),
            force: false,
            allow_downgrade: false,
        }
    }

    #[test]
    fn matching_version_is_up_to_date() {
        let mut catalog = FakeCatalog::with_release("msw3", "2.4.0");
        let mut store = MemoryStore::default();
        let mut resolver = Resolver::new(&mut catalog, &mut store);
        let outcome = resolver.resolve(&request(Some("2.4.0"))).unwrap();
        assert!(matches!(outcome, Resolution::UpToDate { .. }));
        assert_eq!(catalog.fetches(), 0);
    }

    #[test]
    fn force_reflashes_a_current_device() {
        let mut catalog = FakeCatalog::with_release("msw3", "2.4.0");
        let mut store = MemoryStore::default();
        let mut resolver = Resolver::new(&mut catalog, &mut store);
        let mut req = request(Some("2.4.0"));
        req.force = true;
        let outcome = resolver.resolve(&req).unwrap();
        assert!(matches!(outcome, Resolution::Update(_)));
    }

    #[test]
    fn prerelease_orders_before_release() {
        // A device on the release candidate must still be offered the final.
        let mut catalog = FakeCatalog::with_release("msw3", "2.4.0");
        let mut store = MemoryStore::default();
        let mut resolver = Resolver::new(&mut catalog, &mut store);
        let outcome = resolver.resolve(&request(Some("2.4.0-rc1"))).unwrap();
        match outcome {
            Resolution::Update(release) => {
                assert_eq!(release.version, Version::parse("2.4.0").unwrap())
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn downgrade_needs_explicit_permission() {
        let mut catalog = FakeCatalog::with_release("msw3", "2.4.0");
        let mut store = MemoryStore::default();
        let mut resolver = Resolver::new(&mut catalog, &mut store);
        let mut req = request(Some("3.0.0"));
        let err = resolver.resolve(&req).unwrap_err();
        assert!(matches!(err, Error::DowngradeRejected { .. }));
        req.allow_downgrade = true;
        assert!(matches!(
            resolver.resolve(&req).unwrap(),
            Resolution::Update(_)
        ));
    }

    #[test]
    fn bootloader_downgrade_is_always_rejected() {
        let mut catalog = FakeCatalog::with_bootloader("msw3", "1.2.0");
        let mut store = MemoryStore::default();
        let mut resolver = Resolver::new(&mut catalog, &mut store);
        let mut req = request(Some("1.3.0"));
        req.kind = ImageKind::Bootloader;
        req.allow_downgrade = true;
        let err = resolver.resolve(&req).unwrap_err();
        assert!(matches!(err, Error::DowngradeRejected { .. }));
    }

    #[test]
    fn unknown_installed_version_still_updates() {
        // A catalog that never saw the running version (or an unparseable
        // register) must not block the update path.
        let mut catalog = FakeCatalog::with_release("msw3", "2.4.0");
        let mut store = MemoryStore::default();
        let mut resolver = Resolver::new(&mut catalog, &mut store);
        let outcome = resolver.resolve(&request(None)).unwrap();
        assert!(matches!(outcome, Resolution::Update(_)));
    }

    #[test]
    fn missing_release_and_dead_storage_are_distinct() {
        let mut store = MemoryStore::default();
        let mut catalog = FakeCatalog::with_release("other-sig", "1.0.0");
        let mut resolver = Resolver::new(&mut catalog, &mut store);
        let err = resolver.resolve(&request(None)).unwrap_err();
        assert!(matches!(err, Error::NoReleasedFirmware { .. }));

        let mut catalog = FakeCatalog::offline();
        let mut resolver = Resolver::new(&mut catalog, &mut store);
        let err = resolver.resolve(&request(None)).unwrap_err();
        assert!(matches!(err, Error::DownloadUnavailable(_)));
    }
}
