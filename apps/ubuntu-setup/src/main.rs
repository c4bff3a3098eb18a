#![warn(clippy::pedantic)]

//! # ubuntu-setup
//!
//! Installs an Ubuntu base rootfs inside Termux and writes a launcher that
//! enters it through proot, without root access.
//!
//! ## Usage Modes
//!
//! - no flags: describe the installation and ask for confirmation
//! - `--yes`: install without asking
//! - `--clean`: remove everything a previous run created
//! - `--check`: report the environment checks and exit
//!
//! ## Exit Codes
//!
//! - `0` success, nothing to do, or installation cancelled at the prompt
//! - `1` any failure
//! - `130` interrupted with Ctrl-C

mod commands;
mod config;
mod errors;
mod rootfs;

use anyhow::Result;
use clap::Parser;
use commands::{check, clean, install};
use errors::{EXIT_FAILURE, SetupError};
use tracing_subscriber::EnvFilter;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("UBUNTU_SETUP_GIT_COMMIT"),
    ")"
);

/// Ubuntu rootfs installer for Termux.
#[derive(Parser)]
#[command(
    name = "ubuntu-setup",
    version = VERSION,
    about = "Install Ubuntu in Termux using proot",
    long_about = "Downloads the Ubuntu base image for this device, extracts it under proot and \
    writes a start-ubuntu.sh launcher next to it. Runs without root access.",
    after_help = "\
ENVIRONMENT VARIABLES:
    UBUNTU_SETUP_HOME       Install directory (default: current directory)
    UBUNTU_SETUP_MIRROR     Release mirror (default: https://cdimage.ubuntu.com/ubuntu-base/releases)
    RUST_LOG                Diagnostic log filter (default: warn)"
)]
pub struct Cli {
    /// Install without asking for confirmation.
    #[arg(short = 'y', long = "yes", action = clap::ArgAction::SetTrue)]
    pub yes: bool,

    /// Remove the rootfs, launcher and all downloaded files.
    #[arg(short = 'c', long = "clean", action = clap::ArgAction::SetTrue, conflicts_with_all = ["yes", "check"])]
    pub clean: bool,

    /// Run the environment checks only.
    #[arg(long = "check", action = clap::ArgAction::SetTrue, conflicts_with = "yes")]
    pub check: bool,

    /// Print diagnostic logs to stderr.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        let exit_code = handle_error(&e);
        std::process::exit(exit_code);
    }
}

/// Prints an error and returns the matching exit code.
///
/// Errors that carry a [`SetupError`] anywhere in their chain map to its
/// exit code; everything else exits with 1.
fn handle_error(e: &anyhow::Error) -> i32 {
    eprintln!("Error: {e:?}");
    e.downcast_ref::<SetupError>()
        .map_or(EXIT_FAILURE, SetupError::exit_code)
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.clean {
        clean::execute()
    } else if cli.check {
        check::execute()
    } else {
        install::execute(cli.yes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn clean_conflicts_with_yes() {
        assert!(Cli::try_parse_from(["ubuntu-setup", "--clean", "--yes"]).is_err());
    }

    #[test]
    fn short_flags_parse() {
        let cli = Cli::try_parse_from(["ubuntu-setup", "-y", "-v"]).unwrap();
        assert!(cli.yes);
        assert!(cli.verbose);
        assert!(!cli.clean);
    }

    #[test]
    fn interruption_maps_to_130() {
        let err = anyhow::Error::from(SetupError::Interrupted).context("download failed");
        assert_eq!(handle_error(&err), 130);
    }

    #[test]
    fn plain_errors_map_to_1() {
        assert_eq!(handle_error(&anyhow::anyhow!("boom")), 1);
    }
}
