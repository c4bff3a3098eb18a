//! Removal of installation artifacts.
//!
//! Extracted trees can contain directories without the owner write bit
//! (proot fakes root, so tar restores modes like 0555). Write permission is
//! restored on every directory before the tree is removed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// Removes every path in `targets` that exists, files and directories alike.
///
/// Returns the paths actually removed. Missing paths are skipped.
///
/// # Errors
///
/// Returns an error if an existing path cannot be removed.
pub fn remove_all(targets: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for target in targets {
        if remove_path(target)? {
            removed.push(target.clone());
        }
    }
    Ok(removed)
}

/// Best-effort variant of [`remove_all`] for failure paths: errors are
/// logged instead of returned.
pub fn remove_all_quietly(targets: &[PathBuf]) {
    for target in targets {
        if let Err(e) = remove_path(target) {
            eprintln!("Warning: could not remove {}: {e:#}", target.display());
        }
    }
}

/// Removes one path. Returns `false` if it did not exist.
fn remove_path(path: &Path) -> Result<bool> {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return Ok(false);
    };

    if meta.is_dir() {
        make_tree_writable(path);
        std::fs::remove_dir_all(path)
            .with_context(|| format!("Failed to remove directory: {}", path.display()))?;
    } else {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove file: {}", path.display()))?;
    }
    debug!(path = %path.display(), "removed");
    Ok(true)
}

#[cfg(unix)]
fn make_tree_writable(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let Ok(meta) = std::fs::symlink_metadata(dir) else {
        return;
    };
    if !meta.is_dir() {
        return;
    }

    let mode = meta.permissions().mode();
    if mode & 0o700 != 0o700 {
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(mode | 0o700)).ok();
    }

    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            make_tree_writable(&entry.path());
        }
    }
}

#[cfg(not(unix))]
fn make_tree_writable(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn removes_files_and_directories() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("archive.tar.gz").write_str("x").unwrap();
        temp.child("fs/etc/passwd").write_str("root").unwrap();

        let targets = vec![temp.path().join("archive.tar.gz"), temp.path().join("fs")];
        let removed = remove_all(&targets).unwrap();

        assert_eq!(removed, targets);
        assert!(!temp.path().join("archive.tar.gz").exists());
        assert!(!temp.path().join("fs").exists());
    }

    #[test]
    fn missing_paths_are_skipped() {
        let temp = assert_fs::TempDir::new().unwrap();
        let removed = remove_all(&[temp.path().join("nothing-here")]).unwrap();
        assert!(removed.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn read_only_directories_are_removed() {
        use std::os::unix::fs::PermissionsExt;

        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("fs/usr/share/file").write_str("x").unwrap();
        let locked = temp.path().join("fs/usr/share");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();

        remove_all(&[temp.path().join("fs")]).unwrap();
        assert!(!temp.path().join("fs").exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_removed_not_followed() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("target/keep").write_str("x").unwrap();
        std::os::unix::fs::symlink(temp.path().join("target"), temp.path().join("link")).unwrap();

        remove_all(&[temp.path().join("link")]).unwrap();

        assert!(temp.path().join("target/keep").exists());
        assert!(std::fs::symlink_metadata(temp.path().join("link")).is_err());
    }
}
