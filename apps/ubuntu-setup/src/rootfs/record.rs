//! Install record written after a successful installation.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Architecture;

/// What was installed, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRecord {
    /// Release codename.
    pub codename: String,
    /// Release version.
    pub version: String,
    /// Archive architecture.
    pub architecture: String,
    /// URL the archive was downloaded from.
    pub url: String,
    /// SHA-256 of the archive.
    pub sha256: String,
    /// Completion time.
    pub installed_at: DateTime<Utc>,
}

impl InstallRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn now(
        codename: &str,
        version: &str,
        architecture: Architecture,
        url: &str,
        sha256: &str,
    ) -> Self {
        Self {
            codename: codename.to_string(),
            version: version.to_string(),
            architecture: architecture.as_str().to_string(),
            url: url.to_string(),
            sha256: sha256.to_string(),
            installed_at: Utc::now(),
        }
    }

    /// Writes the record as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize install record")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write install record: {}", path.display()))
    }

    /// Reads a record, returning `None` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read install record: {}", path.display()));
            }
        };
        serde_json::from_str(&contents)
            .map(Some)
            .with_context(|| format!("Invalid install record: {}", path.display()))
    }
}
