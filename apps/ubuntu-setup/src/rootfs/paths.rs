//! Path management for an installation.
//!
//! Everything the installer creates lives under a single install root. The
//! root defaults to the current working directory and can be overridden with
//! the `UBUNTU_SETUP_HOME` environment variable.
//!
//! ## Directory Structure
//!
//! ```text
//! <root>/
//!   ubuntu-rootfs.tar.gz        # Verified archive (transient)
//!   ubuntu-rootfs.tar.gz.part   # In-flight download (transient)
//!   ubuntu-fs/                  # Extracted rootfs
//!   start-ubuntu.sh             # Launcher
//!   .ubuntu-extract.log         # Extraction log (transient)
//!   .ubuntu-setup.json          # Install record
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Environment variable to override the install root.
pub const SETUP_HOME_ENV: &str = "UBUNTU_SETUP_HOME";

const ARCHIVE_FILE: &str = "ubuntu-rootfs.tar.gz";
const PARTIAL_SUFFIX: &str = "part";
const ROOTFS_DIR: &str = "ubuntu-fs";
const LAUNCHER_FILE: &str = "start-ubuntu.sh";
const EXTRACT_LOG_FILE: &str = ".ubuntu-extract.log";
const RECORD_FILE: &str = ".ubuntu-setup.json";

/// Locations of every artifact produced by an installation.
#[derive(Debug, Clone)]
pub struct InstallPaths {
    /// Install root.
    pub root: PathBuf,
}

impl InstallPaths {
    /// Resolves the install root from the environment or the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let root = match std::env::var_os(SETUP_HOME_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => std::env::current_dir().context("Failed to determine current directory")?,
        };
        Ok(Self::with_root(root))
    }

    /// Uses `root` as the install root.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Verified rootfs archive.
    #[must_use]
    pub fn archive(&self) -> PathBuf {
        self.root.join(ARCHIVE_FILE)
    }

    /// Download target while a transfer is in progress.
    #[must_use]
    pub fn partial_archive(&self) -> PathBuf {
        partial_path(&self.archive())
    }

    /// Extracted rootfs directory.
    #[must_use]
    pub fn rootfs(&self) -> PathBuf {
        self.root.join(ROOTFS_DIR)
    }

    /// Name of the rootfs directory relative to the root.
    #[must_use]
    pub fn rootfs_name(&self) -> &'static str {
        ROOTFS_DIR
    }

    /// Launcher script.
    #[must_use]
    pub fn launcher(&self) -> PathBuf {
        self.root.join(LAUNCHER_FILE)
    }

    /// Captured output of the extraction step.
    #[must_use]
    pub fn extract_log(&self) -> PathBuf {
        self.root.join(EXTRACT_LOG_FILE)
    }

    /// Install record.
    #[must_use]
    pub fn record(&self) -> PathBuf {
        self.root.join(RECORD_FILE)
    }

    /// Every artifact the installer creates, in removal order.
    ///
    /// The record comes before the rootfs so a failed removal never leaves
    /// a record describing a damaged tree.
    #[must_use]
    pub fn artifacts(&self) -> Vec<PathBuf> {
        vec![
            self.partial_archive(),
            self.archive(),
            self.extract_log(),
            self.launcher(),
            self.record(),
            self.rootfs(),
        ]
    }
}

/// Returns `path` with the in-flight download suffix appended.
#[must_use]
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifacts_live_under_root() {
        let paths = InstallPaths::with_root("/data/home");
        for artifact in paths.artifacts() {
            assert!(artifact.starts_with("/data/home"), "{}", artifact.display());
        }
    }

    #[test]
    fn partial_archive_appends_suffix() {
        let paths = InstallPaths::with_root("/r");
        assert_eq!(
            paths.partial_archive(),
            PathBuf::from("/r/ubuntu-rootfs.tar.gz.part")
        );
    }

    #[test]
    fn record_is_removed_before_rootfs() {
        let paths = InstallPaths::with_root("/r");
        let artifacts = paths.artifacts();
        let record = artifacts.iter().position(|p| *p == paths.record()).unwrap();
        let rootfs = artifacts.iter().position(|p| *p == paths.rootfs()).unwrap();
        assert!(record < rootfs);
    }

    #[test]
    fn rootfs_name_matches_rootfs_dir() {
        let paths = InstallPaths::with_root("/r");
        assert_eq!(paths.rootfs(), Path::new("/r").join(paths.rootfs_name()));
    }

    #[test]
    #[serial_test::serial]
    fn setup_home_env_overrides_current_dir() {
        // SAFETY: serialized with every other test touching this variable.
        unsafe {
            std::env::set_var(SETUP_HOME_ENV, "/data/ubuntu");
        }
        let paths = InstallPaths::new().unwrap();
        // SAFETY: restores the state changed above.
        unsafe {
            std::env::remove_var(SETUP_HOME_ENV);
        }

        assert_eq!(paths.root, PathBuf::from("/data/ubuntu"));
    }

    #[test]
    #[serial_test::serial]
    fn empty_setup_home_falls_back_to_current_dir() {
        // SAFETY: serialized with every other test touching this variable.
        unsafe {
            std::env::set_var(SETUP_HOME_ENV, "");
        }
        let paths = InstallPaths::new().unwrap();
        // SAFETY: restores the state changed above.
        unsafe {
            std::env::remove_var(SETUP_HOME_ENV);
        }

        assert_eq!(paths.root, std::env::current_dir().unwrap());
    }
}
