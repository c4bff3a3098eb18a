//! Environment report.
//!
//! Runs every preflight check plus architecture detection and prints the
//! results. Unlike installation, failed checks do not stop the report and
//! do not change the exit code.

use anyhow::Result;

use crate::config::SetupConfig;
use crate::rootfs::preflight::{self, Check, CheckStatus};
use crate::rootfs::{Architecture, InstallPaths, InstallRecord, extract};

/// Executes the check command.
///
/// # Errors
///
/// Returns an error if the install root cannot be determined.
pub fn execute() -> Result<()> {
    let paths = InstallPaths::new()?;
    let config = SetupConfig::from_env();

    println!(
        "Checking environment for Ubuntu {} ({}) in {}...",
        config.version,
        config.codename,
        paths.root.display()
    );
    println!();

    let mut checks = preflight::run_all(&paths, &config);
    checks.push(architecture_check(&config));
    checks.push(installation_check(&paths));

    for check in &checks {
        println!("  {} {}: {}", check.prefix(), check.name, check.message);
    }
    println!();

    if checks.iter().any(|c| c.status == CheckStatus::Error) {
        println!("Some checks failed. Installation would abort.");
    } else if checks.iter().any(|c| c.status == CheckStatus::Warning) {
        println!("Some warnings were found. Installation may still succeed.");
    } else {
        println!("All checks passed.");
    }

    Ok(())
}

fn architecture_check(config: &SetupConfig) -> Check {
    match Architecture::detect() {
        Ok(arch) => Check::ok(
            "Architecture",
            format!("{arch} ({})", config.archive_name(arch)),
        ),
        Err(e) => Check::error("Architecture", format!("{e:#}")),
    }
}

fn installation_check(paths: &InstallPaths) -> Check {
    match InstallRecord::load(&paths.record()) {
        Ok(Some(record)) => {
            let missing = extract::missing_paths(&paths.rootfs());
            if !missing.is_empty() {
                return Check::warning(
                    "Installation",
                    format!(
                        "record for Ubuntu {} found but {} rootfs paths are missing, run --clean",
                        record.version,
                        missing.len()
                    ),
                );
            }
            Check::ok(
                "Installation",
                format!(
                    "Ubuntu {} {} installed {}",
                    record.version,
                    record.architecture,
                    record.installed_at.format("%Y-%m-%d %H:%M UTC")
                ),
            )
        }
        Ok(None) => Check::ok("Installation", "not installed"),
        Err(e) => Check::warning("Installation", format!("{e:#}")),
    }
}
