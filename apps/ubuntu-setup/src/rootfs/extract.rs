//! Rootfs extraction under proot.
//!
//! `tar` runs inside `proot --link2symlink -0` so hard links become symlinks
//! and ownership changes appear to succeed without root. proot routinely
//! makes tar exit non-zero over harmless hard-link warnings, so the exit
//! status alone is not trusted. The captured log is scanned for fatal
//! markers and the tree is checked for a fixed set of paths instead.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, warn};

use super::InstallPaths;
use crate::errors::SetupError;

/// Log fragments that mean the extracted tree cannot be trusted.
pub const FATAL_MARKERS: &[&str] = &[
    "Cannot open",
    "Error is not recoverable",
    "Unexpected EOF",
    "No space left on device",
    "invalid compressed data",
    "not in gzip format",
];

/// Paths, relative to the rootfs, every usable installation contains.
pub const EXPECTED_PATHS: &[&str] = &[
    "bin",
    "etc/os-release",
    "etc/passwd",
    "usr/bin/bash",
    "usr/bin/env",
    "usr/lib",
];

/// Extracts the verified archive into the rootfs directory.
///
/// # Errors
///
/// Returns an error if proot cannot be started, the log contains a fatal
/// marker ([`SetupError::Extraction`]) or expected paths are missing
/// ([`SetupError::MissingRootfsFiles`]).
pub async fn extract_rootfs(paths: &InstallPaths) -> Result<()> {
    let rootfs = paths.rootfs();
    std::fs::create_dir_all(&rootfs)
        .with_context(|| format!("Failed to create directory: {}", rootfs.display()))?;

    let log_path = paths.extract_log();
    let log = std::fs::File::create(&log_path)
        .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;
    let log_err = log
        .try_clone()
        .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;

    let args = extract_args(&paths.archive(), &rootfs);
    debug!(?args, "running proot");

    let status = Command::new("proot")
        .args(&args)
        .env_remove("LD_PRELOAD")
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .kill_on_drop(true)
        .status()
        .await
        .context("Failed to run proot")?;

    if !status.success() {
        warn!(%status, "tar exited unsuccessfully under proot, checking log");
    }

    // tar logs file names verbatim, which need not be UTF-8.
    let raw = std::fs::read(&log_path)
        .with_context(|| format!("Failed to read extraction log: {}", log_path.display()))?;
    let output = String::from_utf8_lossy(&raw);
    if let Some(line) = find_fatal_line(&output) {
        return Err(SetupError::extraction(line.trim()).into());
    }

    let missing = missing_paths(&rootfs);
    if !missing.is_empty() {
        return Err(SetupError::MissingRootfsFiles { missing }.into());
    }

    Ok(())
}

/// Arguments passed to `proot` for the extraction.
#[must_use]
pub fn extract_args(archive: &Path, rootfs: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "--link2symlink",
        "-0",
        "tar",
        "--warning=no-unknown-keyword",
        "--delay-directory-restore",
        "--preserve-permissions",
        "-xzf",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(archive.as_os_str().to_owned());
    args.push("-C".into());
    args.push(rootfs.as_os_str().to_owned());
    args.push("--exclude=dev".into());
    args
}

/// Returns the first log line carrying a fatal marker.
#[must_use]
pub fn find_fatal_line(log: &str) -> Option<&str> {
    log.lines()
        .find(|line| FATAL_MARKERS.iter().any(|marker| line.contains(marker)))
}

/// Lists the expected paths absent from `rootfs`.
///
/// Symlinks count as present even when dangling on the host: `bin` is a
/// relative link into `usr/bin` that only resolves inside the guest.
#[must_use]
pub fn missing_paths(rootfs: &Path) -> Vec<PathBuf> {
    EXPECTED_PATHS
        .iter()
        .map(PathBuf::from)
        .filter(|relative| std::fs::symlink_metadata(rootfs.join(relative)).is_err())
        .collect()
}
