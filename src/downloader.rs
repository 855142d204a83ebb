//! HTTP firmware catalog client.
//!
//! Catalog layout, relative to the configured root:
//!
//! ```text
//! <root>/<kind>/by-signature/<signature>/<source>/latest.txt
//! <root>/<kind>/by-signature/<signature>/<source>/<version>.img
//! <root>/fw/by-signature/index.txt
//! ```
//!
//! where `<kind>` is `fw` or `bootloader` and `<source>` is `main` or
//! `unstable/<branch>`. Fetched artifacts are cached on disk so repeated
//! batch runs do not re-download the same image per device.

use busflash_core::resolve::{DownloadError, Downloader, ImageKind};
use busflash_core::version::parse_version;
use semver::Version;
use std::path::PathBuf;
use std::time::Duration;

const HTTP_ATTEMPTS: u32 = 3;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpDownloader {
    client: reqwest::blocking::Client,
    root: String,
    cache_dir: PathBuf,
}

enum FetchError {
    NotFound,
    Unreachable(String),
}

impl HttpDownloader {
    pub fn new(root: &str, cache_dir: PathBuf) -> Result<Self, DownloadError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| DownloadError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            root: root.trim_end_matches('/').to_string(),
            cache_dir,
        })
    }

    fn kind_dir(kind: ImageKind) -> &'static str {
        match kind {
            ImageKind::Firmware => "fw",
            ImageKind::Bootloader => "bootloader",
        }
    }

    fn source(branch: Option<&str>) -> String {
        match branch {
            None => "main".to_string(),
            Some(branch) => format!("unstable/{branch}"),
        }
    }

    /// GET `url` with bounded retries on transport errors. A definitive 404
    /// is never retried.
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut last = String::new();
        for attempt in 1..=HTTP_ATTEMPTS {
            match self.client.get(url).send() {
                Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                    return Err(FetchError::NotFound);
                }
                Ok(response) => match response.error_for_status() {
                    Ok(response) => match response.bytes() {
                        Ok(bytes) => return Ok(bytes.to_vec()),
                        Err(e) => last = e.to_string(),
                    },
                    Err(e) => last = e.to_string(),
                },
                Err(e) => last = e.to_string(),
            }
            log::debug!("GET {url} attempt {attempt}/{HTTP_ATTEMPTS} failed: {last}");
            std::thread::sleep(Duration::from_millis(200));
        }
        Err(FetchError::Unreachable(last))
    }

    fn cache_path(
        &self,
        signature: &str,
        kind: ImageKind,
        branch: Option<&str>,
        version: &Version,
    ) -> PathBuf {
        let source = Self::source(branch).replace('/', "_");
        self.cache_dir
            .join(Self::kind_dir(kind))
            .join(signature)
            .join(source)
            .join(format!("{version}.img"))
    }
}

fn map_fetch(signature: &str, version: &str, err: FetchError) -> DownloadError {
    match err {
        FetchError::NotFound => DownloadError::NotFound {
            signature: signature.to_string(),
            version: version.to_string(),
        },
        FetchError::Unreachable(detail) => DownloadError::Unreachable(detail),
    }
}

impl Downloader for HttpDownloader {
    fn latest_version(
        &mut self,
        signature: &str,
        kind: ImageKind,
        branch: Option<&str>,
    ) -> Result<Version, DownloadError> {
        let url = format!(
            "{}/{}/by-signature/{signature}/{}/latest.txt",
            self.root,
            Self::kind_dir(kind),
            Self::source(branch)
        );
        let body = self
            .fetch(&url)
            .map_err(|e| map_fetch(signature, "latest", e))?;
        let text = String::from_utf8_lossy(&body);
        parse_version(text.trim())
            .map_err(|_| DownloadError::Unreachable(format!("bad latest.txt at {url}: {text:?}")))
    }

    fn fetch_release(
        &mut self,
        signature: &str,
        kind: ImageKind,
        branch: Option<&str>,
        version: &Version,
    ) -> Result<PathBuf, DownloadError> {
        let cached = self.cache_path(signature, kind, branch, version);
        if cached.is_file() {
            log::debug!("using cached artifact {}", cached.display());
            return Ok(cached);
        }
        let url = format!(
            "{}/{}/by-signature/{signature}/{}/{version}.img",
            self.root,
            Self::kind_dir(kind),
            Self::source(branch)
        );
        log::info!("downloading {url}");
        let bytes = self
            .fetch(&url)
            .map_err(|e| map_fetch(signature, &version.to_string(), e))?;
        if let Some(parent) = cached.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DownloadError::Unreachable(e.to_string()))?;
        }
        std::fs::write(&cached, &bytes).map_err(|e| DownloadError::Unreachable(e.to_string()))?;
        Ok(cached)
    }

    fn known_signatures(&mut self) -> Result<Vec<String>, DownloadError> {
        let url = format!("{}/fw/by-signature/index.txt", self.root);
        let body = self.fetch(&url).map_err(|e| match e {
            FetchError::NotFound => DownloadError::Unreachable(format!("missing index at {url}")),
            FetchError::Unreachable(detail) => DownloadError::Unreachable(detail),
        })?;
        Ok(String::from_utf8_lossy(&body)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Default on-disk cache location for downloaded artifacts.
pub fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("busflash-cache")
}
