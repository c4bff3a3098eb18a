//! Error types for ubuntu-setup.
//!
//! Most plumbing returns `anyhow::Result` with context attached. The variants
//! here mark the terminal conditions the installer reports to the user, and
//! decide the process exit code.

use std::path::PathBuf;
use thiserror::Error;

/// Exit code used when the run is interrupted by the user.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Exit code for every other failure.
pub const EXIT_FAILURE: i32 = 1;

/// Terminal failure conditions of an installation.
#[derive(Debug, Error)]
pub enum SetupError {
    /// An environment precondition failed.
    #[error("{check}: {message}")]
    Preflight {
        /// Name of the failing check.
        check: String,
        /// What was wrong and how to fix it.
        message: String,
    },

    /// The kernel reported a machine type with no published rootfs.
    #[error("unsupported architecture: {machine} (supported: arm64, armhf, amd64)")]
    UnsupportedArchitecture {
        /// Machine string as reported by `uname -m`.
        machine: String,
    },

    /// Every download attempt failed transfer or verification.
    #[error("download failed after {attempts} attempts: {last_error}")]
    DownloadFailed {
        /// Number of attempts made.
        attempts: u32,
        /// Description of the final failure.
        last_error: String,
    },

    /// The downloaded archive failed an integrity check.
    #[error("archive verification failed ({check}): {message}")]
    Verification {
        /// Name of the failing check.
        check: &'static str,
        /// Details.
        message: String,
    },

    /// The extraction log contained a fatal error.
    #[error("extraction failed: {message}")]
    Extraction {
        /// The offending log line or a description.
        message: String,
    },

    /// Expected paths are absent from the extracted rootfs.
    #[error("rootfs is incomplete, missing: {}", format_paths(missing))]
    MissingRootfsFiles {
        /// Paths relative to the rootfs directory.
        missing: Vec<PathBuf>,
    },

    /// The user interrupted the run.
    #[error("interrupted")]
    Interrupted,
}

impl SetupError {
    /// Creates a new `Preflight` error.
    #[must_use]
    pub fn preflight(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Preflight {
            check: check.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Verification` error.
    #[must_use]
    pub fn verification(check: &'static str, message: impl Into<String>) -> Self {
        Self::Verification {
            check,
            message: message.into(),
        }
    }

    /// Creates a new `Extraction` error.
    #[must_use]
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction {
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Interrupted => EXIT_INTERRUPTED,
            _ => EXIT_FAILURE,
        }
    }
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
