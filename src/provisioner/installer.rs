//! Pinned engine binary resolution.
//!
//! A binary is usable only when its `version` output reports the pinned
//! version. Missing binaries are downloaded from a release server, checked
//! against the published SHA-256 sums and unpacked into the install
//! directory.

use async_trait::async_trait;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{ProvisionError, Result};

/// Default release server.
pub const DEFAULT_RELEASE_URL: &str = "https://releases.hashicorp.com";

/// Download timeout in seconds.
const DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// An engine product distributed as release archives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    /// Product and binary name.
    pub name: String,
}

impl Product {
    /// Creates a product.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Returns the binary file name on this platform.
    #[must_use]
    pub fn binary_name(&self) -> String {
        format!("{}{}", self.name, std::env::consts::EXE_SUFFIX)
    }

    /// Returns the archive name for a version on this platform.
    #[must_use]
    pub fn archive_name(&self, version: &str) -> String {
        format!(
            "{}_{version}_{}_{}.zip",
            self.name,
            release_os(std::env::consts::OS),
            release_arch(std::env::consts::ARCH)
        )
    }

    /// Returns the checksum file name for a version.
    #[must_use]
    pub fn checksums_name(&self, version: &str) -> String {
        format!("{}_{version}_SHA256SUMS", self.name)
    }
}

/// Maps a Rust OS name to the release naming.
#[must_use]
pub fn release_os(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

/// Maps a Rust architecture name to the release naming.
#[must_use]
pub fn release_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    }
}

/// Finds or installs pinned engine binaries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BinaryInstaller: Send + Sync {
    /// Looks for a binary of `version` in `search_paths`, then in `PATH`.
    ///
    /// # Errors
    ///
    /// Returns an error if no matching binary exists.
    async fn find(&self, version: &str, search_paths: &[PathBuf]) -> Result<PathBuf>;

    /// Installs `version` into `dir` and returns the binary path.
    ///
    /// # Errors
    ///
    /// Returns an error if the download, verification or unpacking fails.
    async fn install(&self, version: &str, dir: &Path) -> Result<PathBuf>;
}

/// Installs binaries from a release server.
#[derive(Debug, Clone)]
pub struct ReleaseInstaller {
    product: Product,
    base_url: String,
    client: Client,
}

impl ReleaseInstaller {
    /// Creates an installer for a product using the default release server.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(product: Product) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                ProvisionError::binary(&product.name, "-", format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            product,
            base_url: DEFAULT_RELEASE_URL.to_string(),
            client,
        })
    }

    /// Overrides the release server.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Returns the product.
    #[must_use]
    pub const fn product(&self) -> &Product {
        &self.product
    }

    fn error(&self, version: &str, message: impl Into<String>) -> ProvisionError {
        ProvisionError::binary(&self.product.name, version, message)
    }

    async fn download(&self, version: &str, file: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{}/{version}/{file}", self.base_url, self.product.name);
        debug!("Downloading {url}");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.error(version, format!("Download of {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(self
                .error(version, format!("Download of {url} returned {}", response.status()))
                .into());
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.error(version, format!("Reading {url} failed: {e}")))?;
        Ok(bytes.to_vec())
    }

    /// Checks whether `path` is the binary of `version`.
    async fn matches_version(path: &Path, version: &str) -> bool {
        let Ok(output) = Command::new(path).arg("version").output().await else {
            return false;
        };
        reports_version(&String::from_utf8_lossy(&output.stdout), version)
    }
}

/// Returns true if the first line of a `version` output names exactly `version`.
///
/// The line reads like `Terraform v1.5.7`; a suffix such as `-rc1` or a
/// longer patch number is another version.
#[must_use]
pub fn reports_version(output: &str, version: &str) -> bool {
    output
        .lines()
        .next()
        .is_some_and(|line| line.split_whitespace().any(|token| token.strip_prefix('v') == Some(version)))
}

/// Returns the expected checksum of `file` from a SHA256SUMS listing.
#[must_use]
pub fn expected_checksum<'a>(sums: &'a str, file: &str) -> Option<&'a str> {
    sums.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let sum = parts.next()?;
        let name = parts.next()?;
        (name == file).then_some(sum)
    })
}

/// Extracts a single binary from a zip archive.
///
/// # Errors
///
/// Returns an error message if the archive is unreadable or lacks the binary.
pub fn extract_binary(data: &[u8], binary_name: &str) -> std::result::Result<Vec<u8>, String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(data)).map_err(|e| format!("Invalid archive: {e}"))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| format!("Invalid archive entry: {e}"))?;
        let is_match = Path::new(file.name())
            .file_name()
            .is_some_and(|n| n == binary_name);

        if is_match && !file.is_dir() {
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)
                .map_err(|e| format!("Failed to read {binary_name}: {e}"))?;
            return Ok(contents);
        }
    }

    Err(format!("Binary '{binary_name}' not found in archive"))
}

#[async_trait]
impl BinaryInstaller for ReleaseInstaller {
    async fn find(&self, version: &str, search_paths: &[PathBuf]) -> Result<PathBuf> {
        let binary = self.product.binary_name();
        let mut candidates: Vec<PathBuf> = search_paths.iter().map(|dir| dir.join(&binary)).collect();
        if let Ok(found) = which::which_all(&binary) {
            candidates.extend(found);
        }

        for candidate in candidates.into_iter().filter(|c| c.is_file()) {
            if Self::matches_version(&candidate, version).await {
                debug!("Found {} {version} at {}", self.product.name, candidate.display());
                return Ok(candidate);
            }
            debug!("Skipping {}: not version {version}", candidate.display());
        }

        Err(self
            .error(version, "no matching binary in search paths or PATH")
            .into())
    }

    async fn install(&self, version: &str, dir: &Path) -> Result<PathBuf> {
        info!("Installing {} {version} into {}", self.product.name, dir.display());

        let archive_name = self.product.archive_name(version);
        let sums = self.download(version, &self.product.checksums_name(version)).await?;
        let sums = String::from_utf8_lossy(&sums);
        let expected = expected_checksum(&sums, &archive_name)
            .ok_or_else(|| self.error(version, format!("No checksum listed for {archive_name}")))?
            .to_lowercase();

        let archive = self.download(version, &archive_name).await?;
        let actual = hex::encode(Sha256::digest(&archive));
        if actual != expected {
            return Err(self
                .error(
                    version,
                    format!("Checksum mismatch for {archive_name}: expected {expected}, got {actual}"),
                )
                .into());
        }

        let binary_name = self.product.binary_name();
        let contents = extract_binary(&archive, &binary_name).map_err(|e| self.error(version, e))?;

        tokio::fs::create_dir_all(dir).await?;
        let binary_path = dir.join(&binary_name);
        tokio::fs::write(&binary_path, &contents).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o755);
            tokio::fs::set_permissions(&binary_path, perms).await?;
        }

        info!("Installed {}", binary_path.display());
        Ok(binary_path)
    }
}
