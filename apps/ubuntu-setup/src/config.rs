//! Release and policy settings.
//!
//! Defaults live here as constants. The mirror can be overridden with
//! `UBUNTU_SETUP_MIRROR`; the install root is handled by
//! [`InstallPaths`](crate::rootfs::InstallPaths).

use std::time::Duration;

use crate::rootfs::Architecture;

/// Environment variable overriding the release mirror.
pub const MIRROR_ENV: &str = "UBUNTU_SETUP_MIRROR";

/// Ubuntu release codename installed by this tool.
pub const CODENAME: &str = "jammy";

/// Point release matching [`CODENAME`], used in archive names.
pub const RELEASE_VERSION: &str = "22.04.5";

/// Default mirror hosting the Ubuntu base archives.
pub const DEFAULT_MIRROR: &str = "https://cdimage.ubuntu.com/ubuntu-base/releases";

/// Smallest plausible size of a rootfs archive.
pub const MIN_ARCHIVE_SIZE: u64 = 10 * 1024 * 1024;

/// Free space required on the install filesystem.
pub const MIN_FREE_SPACE: u64 = 1024 * 1024 * 1024;

/// Download retry policy.
#[derive(Debug, Clone)]
pub struct DownloadPolicy {
    /// Maximum number of attempts, including the first.
    pub attempts: u32,
    /// Fixed wait between attempts.
    pub retry_delay: Duration,
    /// Whole-request timeout for a single attempt.
    pub request_timeout: Duration,
    /// Connection timeout for a single attempt.
    pub connect_timeout: Duration,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Settings for one installer run.
#[derive(Debug, Clone)]
pub struct SetupConfig {
    /// Release codename.
    pub codename: &'static str,
    /// Release version string.
    pub version: &'static str,
    /// Mirror base URL without trailing slash.
    pub mirror: String,
    /// Download retry policy.
    pub download: DownloadPolicy,
    /// Minimum accepted archive size in bytes.
    pub min_archive_size: u64,
    /// Minimum free space in bytes.
    pub min_free_space: u64,
}

impl SetupConfig {
    /// Builds the configuration from defaults and environment overrides.
    #[must_use]
    pub fn from_env() -> Self {
        let mirror = std::env::var(MIRROR_ENV)
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MIRROR.to_string());
        Self::with_mirror(mirror)
    }

    /// Builds the default configuration against the given mirror.
    #[must_use]
    pub fn with_mirror(mirror: impl Into<String>) -> Self {
        Self {
            codename: CODENAME,
            version: RELEASE_VERSION,
            mirror: mirror.into().trim_end_matches('/').to_string(),
            download: DownloadPolicy::default(),
            min_archive_size: MIN_ARCHIVE_SIZE,
            min_free_space: MIN_FREE_SPACE,
        }
    }

    /// Directory on the mirror holding the release files.
    fn release_dir(&self) -> String {
        format!("{}/{}/release", self.mirror, self.codename)
    }

    /// File name of the rootfs archive for `arch`.
    #[must_use]
    pub fn archive_name(&self, arch: Architecture) -> String {
        format!("ubuntu-base-{}-base-{}.tar.gz", self.version, arch.as_str())
    }

    /// Download URL of the rootfs archive for `arch`.
    #[must_use]
    pub fn archive_url(&self, arch: Architecture) -> String {
        format!("{}/{}", self.release_dir(), self.archive_name(arch))
    }

    /// URL of the release checksum list.
    #[must_use]
    pub fn checksums_url(&self) -> String {
        format!("{}/SHA256SUMS", self.release_dir())
    }
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self::with_mirror(DEFAULT_MIRROR)
    }
}
