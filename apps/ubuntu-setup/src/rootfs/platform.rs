//! CPU architecture detection.
//!
//! The kernel machine type (`uname -m`) is mapped onto the architecture
//! names Ubuntu uses for its base archives.
//!
//! ## Supported Architectures
//!
//! - `arm64` (`aarch64`, `arm64`, `armv8b`)
//! - `armhf` (`armv7l`, `armv8l`, `armv7a`, `arm`)
//! - `amd64` (`x86_64`, `amd64`)
//!
//! `armv8l` is what a 64-bit kernel reports to a 32-bit userspace, so it maps
//! to `armhf` rather than `arm64`.

use std::fmt;
use std::process::Command;

use anyhow::{Context, Result, bail};

use crate::errors::SetupError;

/// Architecture of a published Ubuntu base archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    /// 64-bit ARM.
    Arm64,
    /// 32-bit ARM with hardware float.
    Armhf,
    /// 64-bit x86.
    Amd64,
}

impl Architecture {
    /// Maps a kernel machine string to an archive architecture.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::UnsupportedArchitecture`] for any machine type
    /// without a published archive.
    pub fn from_machine(machine: &str) -> Result<Self, SetupError> {
        match machine.trim() {
            "aarch64" | "arm64" | "armv8b" => Ok(Self::Arm64),
            "armv7l" | "armv8l" | "armv7a" | "arm" => Ok(Self::Armhf),
            "x86_64" | "amd64" => Ok(Self::Amd64),
            other => Err(SetupError::UnsupportedArchitecture {
                machine: other.to_string(),
            }),
        }
    }

    /// Detects the architecture of the running kernel.
    ///
    /// # Errors
    ///
    /// Returns an error if `uname` cannot be run or reports an unsupported
    /// machine type.
    pub fn detect() -> Result<Self> {
        let machine = kernel_machine()?;
        tracing::debug!(machine = %machine, "kernel machine type");
        Ok(Self::from_machine(&machine)?)
    }

    /// Returns the architecture name used in archive file names.
    #[must_use = "returns the architecture string without side effects"]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Arm64 => "arm64",
            Self::Armhf => "armhf",
            Self::Amd64 => "amd64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runs `uname -m` and returns its trimmed output.
fn kernel_machine() -> Result<String> {
    let output = Command::new("uname")
        .arg("-m")
        .output()
        .context("Failed to run 'uname -m'")?;

    if !output.status.success() {
        bail!("'uname -m' exited with {}", output.status);
    }

    let machine = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if machine.is_empty() {
        bail!("'uname -m' returned no machine type");
    }
    Ok(machine)
}
