//! Static files written after extraction.
//!
//! - `etc/resolv.conf` with fixed public nameservers (the base image links
//!   it to a systemd-resolved stub that never runs under proot)
//! - `usr/sbin/policy-rc.d`, which makes package maintainer scripts skip
//!   service starts
//! - `root/.hushlogin`
//! - the launcher script next to the rootfs

use std::path::Path;

use anyhow::{Context, Result};

use super::InstallPaths;

/// Nameservers written to the guest `resolv.conf`.
pub const NAMESERVERS: &[&str] = &["8.8.8.8", "8.8.4.4", "1.1.1.1"];

/// Bind mounts of the launcher, as `proot -b` values.
pub const BIND_MOUNTS: &[&str] = &["/dev", "/proc", "/sys"];

/// `PATH` inside the guest.
pub const GUEST_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Termux prefix used when `PREFIX` is unset.
const DEFAULT_TERMUX_PREFIX: &str = "/data/data/com.termux/files/usr";

const POLICY_RC_D: &str = "#!/bin/sh\n# Services cannot be started under proot.\nexit 101\n";

/// Writes every generated file into the installation.
///
/// # Errors
///
/// Returns an error if any file cannot be written.
pub fn write_all(paths: &InstallPaths) -> Result<()> {
    let rootfs = paths.rootfs();

    write_resolv_conf(&rootfs)?;
    write_executable(&rootfs.join("usr/sbin/policy-rc.d"), POLICY_RC_D)?;
    write_file(&rootfs.join("root/.hushlogin"), "")?;

    let shm = rootfs.join("tmp");
    std::fs::create_dir_all(&shm)
        .with_context(|| format!("Failed to create directory: {}", shm.display()))?;

    let prefix = std::env::var("PREFIX")
        .ok()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_TERMUX_PREFIX.to_string());
    write_executable(
        &paths.launcher(),
        &launcher_script(paths.rootfs_name(), &prefix),
    )
}

/// Replaces the guest `resolv.conf`, including a dangling symlink.
///
/// # Errors
///
/// Returns an error if the old entry cannot be removed or the new file
/// cannot be written.
pub fn write_resolv_conf(rootfs: &Path) -> Result<()> {
    let path = rootfs.join("etc/resolv.conf");
    if std::fs::symlink_metadata(&path).is_ok() {
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    write_file(&path, &resolv_conf())
}

/// Contents of the guest `resolv.conf`.
#[must_use]
pub fn resolv_conf() -> String {
    NAMESERVERS
        .iter()
        .map(|ns| format!("nameserver {ns}\n"))
        .collect()
}

/// Contents of the launcher script.
///
/// The script changes to its own directory, so the install root can be
/// moved as a whole.
#[must_use]
pub fn launcher_script(rootfs_name: &str, termux_prefix: &str) -> String {
    let mut script = format!(
        "#!{termux_prefix}/bin/bash\n\
         # Enter the Ubuntu rootfs installed by ubuntu-setup.\n\
         cd \"$(dirname \"$0\")\" || exit 1\n\
         unset LD_PRELOAD\n\
         exec proot \\\n    \
         --link2symlink \\\n    \
         -0 \\\n    \
         -r {rootfs_name} \\\n"
    );
    for mount in BIND_MOUNTS {
        script.push_str(&format!("    -b {mount} \\\n"));
    }
    script.push_str(&format!(
        "    -b {rootfs_name}/tmp:/dev/shm \\\n    \
         -w /root \\\n    \
         /usr/bin/env -i \\\n    \
         HOME=/root \\\n    \
         PATH={GUEST_PATH} \\\n    \
         TERM=\"${{TERM:-xterm-256color}}\" \\\n    \
         LANG=C.UTF-8 \\\n    \
         /bin/bash --login\n"
    ));
    script
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

fn write_executable(path: &Path, contents: &str) -> Result<()> {
    write_file(path, contents)?;
    set_executable(path)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .with_context(|| format!("Failed to set permissions: {}", path.display()))
}

/// Sets executable permissions (no-op on Windows).
#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}
