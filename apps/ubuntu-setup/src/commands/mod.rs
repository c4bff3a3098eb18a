//! Command implementations for ubuntu-setup.
//!
//! - [`install`] - Download, extract and configure the rootfs
//! - [`clean`] - Remove everything the installer created
//! - [`check`] - Report environment checks without changing anything

pub mod check;
pub mod clean;
pub mod install;
