//! Environment precondition checks.
//!
//! Every check produces a [`Check`] with an `[OK]`, `[WARN]` or `[FAIL]`
//! status. The `--check` flag prints all of them; an installation runs them
//! in order through [`enforce`] and stops at the first failure, before any
//! network traffic.
//!
//! ## Checks Performed
//!
//! - Termux host
//! - Write permission on the install root
//! - Filesystem type of the install root
//! - Free space on the install root
//! - Required tools (`proot`, `tar`) on `PATH`

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use super::InstallPaths;
use crate::config::SetupConfig;
use crate::errors::SetupError;

/// Filesystems that cannot hold a rootfs (no symlinks or Unix permissions).
pub const DISALLOWED_FILESYSTEMS: &[&str] = &["vfat", "exfat", "fuseblk", "fuse"];

/// External tools the installation shells out to.
pub const REQUIRED_TOOLS: &[&str] = &["proot", "tar"];

const MOUNTS_FILE: &str = "/proc/mounts";

/// Status of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// Check passed.
    Ok,
    /// Check passed with warnings.
    Warning,
    /// Check failed.
    Error,
}

/// Result of a single check.
#[derive(Debug, Clone)]
pub struct Check {
    /// Name of the check.
    pub name: String,
    /// Status of the check.
    pub status: CheckStatus,
    /// Descriptive message.
    pub message: String,
}

impl Check {
    /// Creates a new check with Ok status.
    #[must_use]
    pub fn ok(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            message: message.into(),
        }
    }

    /// Creates a new check with Warning status.
    #[must_use]
    pub fn warning(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warning,
            message: message.into(),
        }
    }

    /// Creates a new check with Error status.
    #[must_use]
    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            message: message.into(),
        }
    }

    /// Returns the CLI prefix for this check status.
    #[must_use]
    pub fn prefix(&self) -> &'static str {
        match self.status {
            CheckStatus::Ok => "[OK]",
            CheckStatus::Warning => "[WARN]",
            CheckStatus::Error => "[FAIL]",
        }
    }
}

type CheckFn = fn(&InstallPaths, &SetupConfig) -> Check;

/// Checks in the order an installation runs them.
const CHECKS: &[CheckFn] = &[
    run_termux,
    run_writable,
    run_filesystem,
    run_free_space,
    run_tools,
];

fn run_termux(_: &InstallPaths, _: &SetupConfig) -> Check {
    check_termux()
}

fn run_writable(paths: &InstallPaths, _: &SetupConfig) -> Check {
    check_writable(&paths.root)
}

fn run_filesystem(paths: &InstallPaths, _: &SetupConfig) -> Check {
    check_filesystem(&paths.root)
}

fn run_free_space(paths: &InstallPaths, config: &SetupConfig) -> Check {
    check_free_space(&paths.root, config.min_free_space)
}

fn run_tools(_: &InstallPaths, _: &SetupConfig) -> Check {
    check_tools()
}

/// Runs every check and returns all results.
#[must_use]
pub fn run_all(paths: &InstallPaths, config: &SetupConfig) -> Vec<Check> {
    CHECKS.iter().map(|check| check(paths, config)).collect()
}

/// Runs the checks in order, stopping at the first failure.
///
/// Warnings are printed to stderr and do not stop the run.
///
/// # Errors
///
/// Returns [`SetupError::Preflight`] describing the first failed check.
pub fn enforce(paths: &InstallPaths, config: &SetupConfig) -> Result<(), SetupError> {
    for run in CHECKS {
        let check = run(paths, config);
        debug!(check = %check.name, status = ?check.status, "{}", check.message);
        match check.status {
            CheckStatus::Ok => {}
            CheckStatus::Warning => eprintln!("Warning: {}: {}", check.name, check.message),
            CheckStatus::Error => return Err(SetupError::preflight(check.name, check.message)),
        }
    }
    Ok(())
}

/// Checks that the process runs inside Termux.
#[must_use]
pub fn check_termux() -> Check {
    let version = std::env::var("TERMUX_VERSION").ok();
    let prefix = std::env::var("PREFIX").ok();
    termux_check(version.as_deref(), prefix.as_deref())
}

fn termux_check(version: Option<&str>, prefix: Option<&str>) -> Check {
    if let Some(version) = version.filter(|v| !v.is_empty()) {
        return Check::ok("Termux", format!("Running in Termux {version}"));
    }
    if let Some(prefix) = prefix.filter(|p| p.contains("com.termux")) {
        return Check::ok("Termux", format!("Termux prefix at {prefix}"));
    }
    Check::error(
        "Termux",
        "Not running inside Termux. This installer targets the Termux app on Android.",
    )
}

/// Checks that files can be created in the install root.
#[must_use]
pub fn check_writable(root: &Path) -> Check {
    if !root.is_dir() {
        return Check::error(
            "Write permission",
            format!("Install directory {} does not exist", root.display()),
        );
    }

    let probe = root.join(format!(".ubuntu-setup-probe-{}", std::process::id()));
    match std::fs::write(&probe, b"") {
        Ok(()) => {
            std::fs::remove_file(&probe).ok();
            Check::ok("Write permission", format!("{} is writable", root.display()))
        }
        Err(e) => Check::error(
            "Write permission",
            format!("Cannot write to {}: {e}", root.display()),
        ),
    }
}

/// Checks that the install root is on a filesystem able to hold a rootfs.
#[must_use]
pub fn check_filesystem(root: &Path) -> Check {
    let mounts = match std::fs::read_to_string(MOUNTS_FILE) {
        Ok(m) => m,
        Err(e) => {
            return Check::warning("Filesystem", format!("Cannot read {MOUNTS_FILE}: {e}"));
        }
    };
    let target = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    classify_filesystem(filesystem_type(&mounts, &target).as_deref())
}

/// Turns a filesystem type into a check result.
#[must_use]
pub fn classify_filesystem(fstype: Option<&str>) -> Check {
    let Some(fstype) = fstype else {
        return Check::warning("Filesystem", "Could not determine filesystem type");
    };

    let disallowed = DISALLOWED_FILESYSTEMS.contains(&fstype) || fstype.starts_with("fuse.");
    if disallowed {
        Check::error(
            "Filesystem",
            format!(
                "{fstype} does not support symlinks and permissions. \
                 Install from the Termux home directory instead of shared storage."
            ),
        )
    } else {
        Check::ok("Filesystem", format!("Type {fstype}"))
    }
}

/// Finds the filesystem type of the mount covering `path`.
///
/// `mounts` uses the `/proc/mounts` format; the longest matching mount point
/// wins.
#[must_use]
pub fn filesystem_type(mounts: &str, path: &Path) -> Option<String> {
    mounts
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _device = fields.next()?;
            let mount_point = PathBuf::from(unescape_mount_field(fields.next()?));
            let fstype = fields.next()?;
            Some((mount_point, fstype))
        })
        .filter(|(mount_point, _)| path.starts_with(mount_point))
        .max_by_key(|(mount_point, _)| mount_point.components().count())
        .map(|(_, fstype)| fstype.to_string())
}

/// Decodes the octal escapes (`\040` etc.) used in `/proc/mounts` fields.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap_or_default();
            if let Ok(value) = u8::from_str_radix(digits, 8) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Checks that the install root has at least `min_bytes` available.
#[must_use]
pub fn check_free_space(root: &Path, min_bytes: u64) -> Check {
    let output = match Command::new("df").arg("-Pk").arg(root).output() {
        Ok(o) if o.status.success() => o,
        Ok(o) => return Check::warning("Free space", format!("'df' exited with {}", o.status)),
        Err(e) => return Check::warning("Free space", format!("Cannot run 'df': {e}")),
    };

    match parse_df_available(&String::from_utf8_lossy(&output.stdout)) {
        Some(available) => classify_free_space(available, min_bytes),
        None => Check::warning("Free space", "Could not parse 'df' output"),
    }
}

/// Turns an available byte count into a check result.
#[must_use]
pub fn classify_free_space(available: u64, min_bytes: u64) -> Check {
    if available < min_bytes {
        Check::error(
            "Free space",
            format!(
                "{} available, at least {} required",
                format_mib(available),
                format_mib(min_bytes)
            ),
        )
    } else {
        Check::ok("Free space", format!("{} available", format_mib(available)))
    }
}

/// Extracts the available byte count from `df -Pk` output.
#[must_use]
pub fn parse_df_available(output: &str) -> Option<u64> {
    let line = output.lines().nth(1)?;
    let kib: u64 = line.split_whitespace().nth(3)?.parse().ok()?;
    kib.checked_mul(1024)
}

fn format_mib(bytes: u64) -> String {
    format!("{} MiB", bytes / (1024 * 1024))
}

/// Checks that every required tool resolves on `PATH`.
#[must_use]
pub fn check_tools() -> Check {
    let missing: Vec<&str> = REQUIRED_TOOLS
        .iter()
        .copied()
        .filter(|tool| which::which(tool).is_err())
        .collect();
    classify_tools(&missing)
}

fn classify_tools(missing: &[&str]) -> Check {
    if missing.is_empty() {
        Check::ok("Required tools", REQUIRED_TOOLS.join(", "))
    } else {
        Check::error(
            "Required tools",
            format!(
                "Missing {}. Run 'pkg install {}' first.",
                missing.join(", "),
                missing.join(" ")
            ),
        )
    }
}
