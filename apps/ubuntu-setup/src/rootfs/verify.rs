//! Integrity checks for a downloaded rootfs archive.
//!
//! Checks run cheapest first, so an undersized archive is rejected before
//! any decompression:
//!
//! 1. the file is non-empty
//! 2. the file is at least the configured minimum size
//! 3. the gzip stream decodes to the end
//! 4. the tar listing can be walked and holds at least one entry
//! 5. the SHA-256 matches the release checksum list, when one is available

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use sha2::{Digest, Sha256};
use tar::Archive;

use crate::errors::SetupError;

/// Expectations a downloaded archive must meet.
#[derive(Debug, Clone, Default)]
pub struct ArchiveExpectations {
    /// Minimum size in bytes.
    pub min_size: u64,
    /// Expected SHA-256 as a hex string, if known.
    pub sha256: Option<String>,
}

/// Runs every integrity check against the archive at `path`.
///
/// # Errors
///
/// Returns [`SetupError::Verification`] naming the first failed check.
pub fn verify_archive(path: &Path, expected: &ArchiveExpectations) -> Result<(), SetupError> {
    check_size(path, expected.min_size)?;
    check_gzip_stream(path)?;
    let entries = check_tar_listing(path)?;
    tracing::debug!(entries, "tar listing verified");

    if let Some(sha256) = &expected.sha256 {
        check_sha256(path, sha256)?;
    }
    Ok(())
}

/// Rejects empty and undersized files.
///
/// # Errors
///
/// Returns a `size` verification error.
pub fn check_size(path: &Path, min_size: u64) -> Result<u64, SetupError> {
    let len = std::fs::metadata(path)
        .map_err(|e| SetupError::verification("size", format!("{}: {e}", path.display())))?
        .len();

    if len == 0 {
        return Err(SetupError::verification("size", "archive is empty"));
    }
    if len < min_size {
        return Err(SetupError::verification(
            "size",
            format!("archive is {len} bytes, expected at least {min_size}"),
        ));
    }
    Ok(len)
}

/// Decodes the whole gzip stream, discarding the output.
///
/// # Errors
///
/// Returns a `gzip` verification error if the stream is truncated or corrupt.
pub fn check_gzip_stream(path: &Path) -> Result<(), SetupError> {
    let mut decoder = MultiGzDecoder::new(open(path, "gzip")?);
    std::io::copy(&mut decoder, &mut std::io::sink())
        .map(|_| ())
        .map_err(|e| SetupError::verification("gzip", e.to_string()))
}

/// Walks every entry header of the archive.
///
/// # Errors
///
/// Returns a `tar` verification error if an entry cannot be read or the
/// archive holds no entries.
pub fn check_tar_listing(path: &Path) -> Result<usize, SetupError> {
    let tar_error = |e: std::io::Error| SetupError::verification("tar", e.to_string());

    let mut archive = Archive::new(MultiGzDecoder::new(open(path, "tar")?));
    let mut count = 0;
    for entry in archive.entries().map_err(tar_error)? {
        let entry = entry.map_err(tar_error)?;
        entry.path().map_err(tar_error)?;
        count += 1;
    }

    if count == 0 {
        return Err(SetupError::verification("tar", "archive has no entries"));
    }
    Ok(count)
}

/// Compares the archive digest to `expected`.
///
/// # Errors
///
/// Returns a `sha256` verification error on mismatch or read failure.
pub fn check_sha256(path: &Path, expected: &str) -> Result<(), SetupError> {
    let computed =
        compute_sha256(path).map_err(|e| SetupError::verification("sha256", format!("{e:#}")))?;

    if computed != expected.to_lowercase() {
        return Err(SetupError::verification(
            "sha256",
            format!("expected {expected}, got {computed}"),
        ));
    }
    Ok(())
}

/// Computes the SHA-256 of a file as a lowercase hex string.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn compute_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("Failed to open file for checksum: {}", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .with_context(|| format!("Failed to read file for checksum: {}", path.display()))?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Finds the digest of `file_name` in a `SHA256SUMS` listing.
///
/// Lines have the form `<hex> *<name>` (binary mode) or `<hex>  <name>`.
#[must_use]
pub fn find_checksum(listing: &str, file_name: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let (digest, name) = line.trim().split_once(char::is_whitespace)?;
        let name = name.trim_start().trim_start_matches('*');
        (name == file_name && digest.len() == 64).then(|| digest.to_lowercase())
    })
}

fn open(path: &Path, check: &'static str) -> Result<BufReader<File>, SetupError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| SetupError::verification(check, format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    const HELLO_SHA256: &str = "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447";

    /// Builds a small gzip-compressed tar holding a couple of rootfs files.
    fn sample_archive() -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let files: [(&str, &[u8]); 2] = [
            ("etc/os-release", b"NAME=Ubuntu\n"),
            ("etc/passwd", b"root:x:0:0::/root:/bin/bash\n"),
        ];
        for (name, body) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, body).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn valid_archive_passes_all_checks() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("rootfs.tar.gz");
        file.write_binary(&sample_archive()).unwrap();

        let expected = ArchiveExpectations {
            min_size: 16,
            sha256: None,
        };
        verify_archive(file.path(), &expected).unwrap();
        assert_eq!(check_tar_listing(file.path()).unwrap(), 2);
    }

    #[test]
    fn empty_archive_is_rejected() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("rootfs.tar.gz");
        file.touch().unwrap();

        let err = check_size(file.path(), 0).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn undersized_archive_is_rejected_before_decompression() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("rootfs.tar.gz");
        // Not gzip at all: only the size check may run.
        file.write_str("<html>503 Service Unavailable</html>").unwrap();

        let expected = ArchiveExpectations {
            min_size: 10 * 1024 * 1024,
            sha256: None,
        };
        let err = verify_archive(file.path(), &expected).unwrap_err();
        assert!(matches!(
            err,
            SetupError::Verification { check: "size", .. }
        ));
    }

    #[test]
    fn truncated_gzip_is_rejected() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("rootfs.tar.gz");
        let archive = sample_archive();
        file.write_binary(&archive[..archive.len() / 2]).unwrap();

        let err = check_gzip_stream(file.path()).unwrap_err();
        assert!(matches!(err, SetupError::Verification { check: "gzip", .. }));
    }

    #[test]
    fn gzip_of_non_tar_fails_listing() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("rootfs.tar.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        std::io::Write::write_all(&mut encoder, &[0x42; 700]).unwrap();
        file.write_binary(&encoder.finish().unwrap()).unwrap();

        check_gzip_stream(file.path()).unwrap();
        let err = check_tar_listing(file.path()).unwrap_err();
        assert!(matches!(err, SetupError::Verification { check: "tar", .. }));
    }

    #[test]
    fn sha256_mismatch_is_rejected() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("hello.txt");
        file.write_str("hello world\n").unwrap();

        check_sha256(file.path(), HELLO_SHA256).unwrap();
        check_sha256(file.path(), &HELLO_SHA256.to_uppercase()).unwrap();
        let err = check_sha256(file.path(), "00").unwrap_err();
        assert!(err.to_string().contains("expected 00"));
    }

    #[test]
    fn compute_sha256_fails_for_nonexistent_file() {
        assert!(compute_sha256(Path::new("/nonexistent/file/path")).is_err());
    }

    #[test]
    fn find_checksum_matches_binary_and_text_mode_lines() {
        let listing = format!(
            "{HELLO_SHA256} *ubuntu-base-22.04.5-base-arm64.tar.gz\n\
             {} ubuntu-base-22.04.5-base-amd64.tar.gz\n",
            "B".repeat(64)
        );
        assert_eq!(
            find_checksum(&listing, "ubuntu-base-22.04.5-base-arm64.tar.gz").as_deref(),
            Some(HELLO_SHA256)
        );
        assert_eq!(
            find_checksum(&listing, "ubuntu-base-22.04.5-base-amd64.tar.gz"),
            Some("b".repeat(64))
        );
        assert_eq!(find_checksum(&listing, "ubuntu-base-22.04.5-base-armhf.tar.gz"), None);
    }
}
