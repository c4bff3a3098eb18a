//! Rootfs provisioning for ubuntu-setup.
//!
//! ## Module Structure
//!
//! - [`platform`] - Kernel architecture detection
//! - [`paths`] - Install root and artifact locations
//! - [`preflight`] - Environment precondition checks
//! - [`download`] - HTTP download with bounded retry
//! - [`verify`] - Archive integrity checks
//! - [`extract`] - Extraction under proot
//! - [`generate`] - resolv.conf, compatibility stub and launcher
//! - [`record`] - Install record
//! - [`cleanup`] - Artifact removal

pub mod cleanup;
pub mod download;
pub mod extract;
pub mod generate;
pub mod paths;
pub mod platform;
pub mod preflight;
pub mod record;
pub mod verify;

pub use download::{download_verified, fetch_text};
pub use extract::extract_rootfs;
pub use paths::InstallPaths;
pub use platform::Architecture;
pub use record::InstallRecord;
pub use verify::{ArchiveExpectations, verify_archive};
