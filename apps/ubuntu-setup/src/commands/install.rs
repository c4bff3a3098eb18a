//! Installation of the Ubuntu rootfs.
//!
//! ## Process
//!
//! 1. Check the environment (Termux, permissions, filesystem, space, tools)
//! 2. Detect the CPU architecture
//! 3. Download and verify the archive, retrying on failure
//! 4. Extract it under proot and check the result
//! 5. Write resolv.conf, the compatibility stub and the launcher
//! 6. Record the installation and remove transient files
//!
//! Any failure aborts the run and removes what was created so far. Ctrl-C
//! does the same and exits with code 130.

use std::cell::Cell;
use std::fmt;
use std::io::{BufRead, Write};

use anyhow::Result;
use tracing::{info, warn};

use crate::config::SetupConfig;
use crate::errors::{EXIT_FAILURE, SetupError};
use crate::rootfs::verify::compute_sha256;
use crate::rootfs::{
    Architecture, ArchiveExpectations, InstallPaths, InstallRecord, cleanup, download_verified,
    extract, extract_rootfs, fetch_text, generate, preflight, verify, verify_archive,
};

/// Step of the installation, reported when it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Environment checks.
    Preflight,
    /// Architecture detection.
    Architecture,
    /// Download and verification.
    Download,
    /// Extraction under proot.
    Extract,
    /// Generated files.
    Configure,
    /// Install record and cleanup.
    Finalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preflight => "preflight",
            Self::Architecture => "architecture detection",
            Self::Download => "download",
            Self::Extract => "extraction",
            Self::Configure => "configuration",
            Self::Finalize => "finalization",
        };
        f.write_str(name)
    }
}

/// Executes the installation.
///
/// Without `assume_yes` the user is asked to confirm on stdin first.
///
/// # Errors
///
/// Returns the first failure, wrapped with the stage it occurred in.
pub async fn execute(assume_yes: bool) -> Result<()> {
    let paths = InstallPaths::new()?;
    let config = SetupConfig::from_env();

    if let Some(record) = existing_installation(&paths) {
        println!(
            "Ubuntu {} ({}) is already installed in {}.",
            record.version,
            record.codename,
            paths.rootfs().display()
        );
        println!("Start it with ./{}", file_name(&paths.launcher()));
        println!("Run with --clean to remove it first.");
        return Ok(());
    }

    if !assume_yes && !confirm(&paths, &config)? {
        println!("Installation cancelled.");
        return Ok(());
    }

    // Not installed: a record found here belongs to a broken install.
    let leftovers = cleanup::remove_all(&paths.artifacts())?;
    if !leftovers.is_empty() {
        println!("Removed leftovers from a previous attempt.");
    }

    let stage = Cell::new(Stage::Preflight);
    let record = supervise(&paths, &stage, run(&paths, &config, &stage), interrupted()).await?;

    info!(architecture = %record.architecture, "installation complete");
    println!();
    println!("Ubuntu {} ({}) installed successfully.", record.version, record.codename);
    println!("Start it with ./{}", file_name(&paths.launcher()));
    Ok(())
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Drives `pipeline` until it finishes or `interrupt` fires.
///
/// On any failure, interruption included, every artifact is removed and the
/// error is wrapped with the stage that was running.
async fn supervise<T>(
    paths: &InstallPaths,
    stage: &Cell<Stage>,
    pipeline: impl Future<Output = Result<T>>,
    interrupt: impl Future<Output = ()>,
) -> Result<T> {
    let result = tokio::select! {
        result = pipeline => result,
        () = interrupt => Err(SetupError::Interrupted.into()),
    };

    result.map_err(|e| {
        let setup_error = e.downcast_ref::<SetupError>();
        let code = setup_error.map_or(EXIT_FAILURE, SetupError::exit_code);
        if matches!(setup_error, Some(SetupError::Interrupted)) {
            eprintln!();
            eprintln!("Interrupted.");
        }
        eprintln!("Removing partial installation...");
        cleanup::remove_all_quietly(&paths.artifacts());
        e.context(format!("{} failed (exit code {code})", stage.get()))
    })
}

/// The installation pipeline proper. `stage` tracks the step in progress.
async fn run(paths: &InstallPaths, config: &SetupConfig, stage: &Cell<Stage>) -> Result<InstallRecord> {
    stage.set(Stage::Preflight);
    println!("Checking environment...");
    preflight::enforce(paths, config)?;

    stage.set(Stage::Architecture);
    let arch = Architecture::detect()?;
    println!("Detected architecture: {arch}");

    stage.set(Stage::Download);
    let url = config.archive_url(arch);
    let expected_sha256 = expected_checksum(config, arch).await;
    let expectations = ArchiveExpectations {
        min_size: config.min_archive_size,
        sha256: expected_sha256.clone(),
    };
    println!("Downloading {url}");
    download_verified(&url, &paths.archive(), &config.download, move |path| {
        verify_archive(path, &expectations)
    })
    .await?;
    println!("Archive verified.");

    stage.set(Stage::Extract);
    println!("Extracting rootfs, this can take several minutes...");
    extract_rootfs(paths).await?;

    stage.set(Stage::Configure);
    println!("Writing configuration...");
    generate::write_all(paths)?;

    stage.set(Stage::Finalize);
    let sha256 = match expected_sha256 {
        Some(digest) => digest,
        None => compute_sha256(&paths.archive())?,
    };
    let record = InstallRecord::now(config.codename, config.version, arch, &url, &sha256);
    record.save(&paths.record())?;
    cleanup::remove_all(&[paths.archive(), paths.extract_log()])?;

    Ok(record)
}

/// Looks up the published digest of the archive for `arch`.
///
/// The checksum list is optional: when it cannot be fetched or lacks the
/// archive, verification falls back to the structural checks alone.
async fn expected_checksum(config: &SetupConfig, arch: Architecture) -> Option<String> {
    let url = config.checksums_url();
    let name = config.archive_name(arch);

    match fetch_text(&url, &config.download).await {
        Ok(listing) => {
            let digest = verify::find_checksum(&listing, &name);
            if digest.is_none() {
                warn!(%url, archive = %name, "archive not listed in checksum file");
            }
            digest
        }
        Err(e) => {
            warn!(%url, error = %format!("{e:#}"), "checksum list unavailable");
            eprintln!("Warning: checksum list unavailable, skipping SHA-256 check");
            None
        }
    }
}

/// Returns the install record when a complete installation is present.
fn existing_installation(paths: &InstallPaths) -> Option<InstallRecord> {
    let record = InstallRecord::load(&paths.record()).ok().flatten()?;
    extract::missing_paths(&paths.rootfs())
        .is_empty()
        .then_some(record)
}

/// Describes the installation and asks for confirmation on stdin.
fn confirm(paths: &InstallPaths, config: &SetupConfig) -> Result<bool> {
    println!(
        "This will install Ubuntu {} ({}) into {}.",
        config.version,
        config.codename,
        paths.rootfs().display()
    );
    println!(
        "It downloads the base image from {} and needs at least {} MiB of free space.",
        config.mirror,
        config.min_free_space / (1024 * 1024)
    );
    print!("Continue? [y/N] ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(is_affirmative(&answer))
}

/// Whether a prompt answer means yes. Empty input means no.
fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn only_yes_answers_confirm() {
        assert!(is_affirmative("y\n"));
        assert!(is_affirmative("YES"));
        assert!(is_affirmative("  Yes  "));
        assert!(!is_affirmative(""));
        assert!(!is_affirmative("\n"));
        assert!(!is_affirmative("n"));
        assert!(!is_affirmative("yep"));
    }

    #[test]
    fn stage_names_are_readable() {
        assert_eq!(Stage::Preflight.to_string(), "preflight");
        assert_eq!(Stage::Download.to_string(), "download");
        assert_eq!(Stage::Extract.to_string(), "extraction");
    }

    #[test]
    fn record_without_rootfs_is_not_an_installation() {
        let temp = assert_fs::TempDir::new().unwrap();
        let paths = InstallPaths::with_root(temp.path());
        InstallRecord::now("jammy", "22.04.5", Architecture::Arm64, "u", "d")
            .save(&paths.record())
            .unwrap();

        assert!(existing_installation(&paths).is_none());
    }

    #[test]
    fn complete_rootfs_with_record_is_an_installation() {
        let temp = assert_fs::TempDir::new().unwrap();
        let paths = InstallPaths::with_root(temp.path());
        for path in extract::EXPECTED_PATHS {
            temp.child(format!("ubuntu-fs/{path}")).touch().unwrap();
        }
        InstallRecord::now("jammy", "22.04.5", Architecture::Arm64, "u", "d")
            .save(&paths.record())
            .unwrap();

        let record = existing_installation(&paths).unwrap();
        assert_eq!(record.codename, "jammy");
    }

    /// Creates the files a run interrupted mid-extraction leaves behind.
    fn leave_partial_state(paths: &InstallPaths) {
        std::fs::write(paths.archive(), b"archive").unwrap();
        std::fs::create_dir_all(paths.rootfs().join("etc")).unwrap();
        std::fs::write(paths.extract_log(), b"tar: ./etc").unwrap();
    }

    #[tokio::test]
    async fn interrupt_removes_partial_state() {
        let temp = assert_fs::TempDir::new().unwrap();
        let paths = InstallPaths::with_root(temp.path());
        let stage = Cell::new(Stage::Preflight);

        let pipeline = async {
            stage.set(Stage::Extract);
            leave_partial_state(&paths);
            std::future::pending::<Result<()>>().await
        };
        let interrupt = tokio::time::sleep(std::time::Duration::from_millis(50));

        let err = supervise(&paths, &stage, pipeline, interrupt)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<SetupError>(),
            Some(SetupError::Interrupted)
        ));
        assert!(err.to_string().contains("extraction failed (exit code 130)"));
        for artifact in paths.artifacts() {
            assert!(!artifact.exists(), "{} survived", artifact.display());
        }
    }

    #[tokio::test]
    async fn pipeline_failure_removes_partial_state() {
        let temp = assert_fs::TempDir::new().unwrap();
        let paths = InstallPaths::with_root(temp.path());
        let stage = Cell::new(Stage::Preflight);

        let pipeline = async {
            stage.set(Stage::Extract);
            leave_partial_state(&paths);
            Err::<(), anyhow::Error>(SetupError::extraction("tar: Unexpected EOF in archive").into())
        };

        let err = supervise(&paths, &stage, pipeline, std::future::pending())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("extraction failed (exit code 1)"));
        temp.child("ubuntu-fs").assert(predicates::path::missing());
        temp.child("ubuntu-rootfs.tar.gz")
            .assert(predicates::path::missing());
    }

    #[tokio::test]
    async fn successful_pipeline_keeps_its_files() {
        let temp = assert_fs::TempDir::new().unwrap();
        let paths = InstallPaths::with_root(temp.path());
        let stage = Cell::new(Stage::Preflight);

        let pipeline = async {
            leave_partial_state(&paths);
            Ok::<_, anyhow::Error>(7)
        };

        let value = supervise(&paths, &stage, pipeline, std::future::pending())
            .await
            .unwrap();

        assert_eq!(value, 7);
        temp.child("ubuntu-fs/etc").assert(predicates::path::is_dir());
    }
}
