//! Removal of an installation.
//!
//! Deletes the archive, its partial download, the rootfs, the launcher,
//! the extraction log and the install record. Missing files are skipped, so
//! cleaning an empty directory succeeds.

use anyhow::Result;

use crate::rootfs::{InstallPaths, cleanup};

/// Executes the clean command.
///
/// # Errors
///
/// Returns an error if an existing artifact cannot be removed.
pub fn execute() -> Result<()> {
    let paths = InstallPaths::new()?;
    let removed = cleanup::remove_all(&paths.artifacts())?;

    if removed.is_empty() {
        println!("Nothing to clean in {}.", paths.root.display());
        return Ok(());
    }

    for path in &removed {
        println!("Removed {}", path.display());
    }
    println!("Cleanup complete.");
    Ok(())
}
