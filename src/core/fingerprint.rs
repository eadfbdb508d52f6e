//! Content fingerprints and change detection
//!
//! A fingerprint is the SHA-256 of a document's exact bytes. It is used only to
//! notice that a document changed, never to authenticate it. No normalization
//! happens before hashing, so reordering or whitespace edits count as changes.
//!
//! The last applied pair is stored as a single line:
//!
//! ```text
//! <ports sha256 hex> <blocklist sha256 hex>
//! ```

use crate::core::error::Result;
use crate::core::fetch::FetchedDocuments;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lowercase hex SHA-256 of a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hex length of a SHA-256 digest
    pub const HEX_LEN: usize = 64;

    /// Computes the fingerprint of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Parses a stored hex string, rejecting anything that is not 64 hex digits.
    pub fn parse(hex: &str) -> Option<Self> {
        let valid = hex.len() == Self::HEX_LEN && hex.chars().all(|c| c.is_ascii_hexdigit());
        valid.then(|| Self(hex.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprints of the ports document and the blocklist document
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FingerprintPair {
    pub ports: Fingerprint,
    pub blocklist: Fingerprint,
}

impl FingerprintPair {
    pub fn of(docs: &FetchedDocuments) -> Self {
        Self {
            ports: Fingerprint::of(&docs.ports),
            blocklist: Fingerprint::of(&docs.blocklist),
        }
    }

    fn to_line(&self) -> String {
        format!("{} {}\n", self.ports, self.blocklist)
    }

    fn from_line(content: &str) -> Option<Self> {
        let mut parts = content.split_whitespace();
        let ports = Fingerprint::parse(parts.next()?)?;
        let blocklist = Fingerprint::parse(parts.next()?)?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self { ports, blocklist })
    }
}

/// Outcome of comparing fresh fingerprints with the stored pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeStatus {
    Changed,
    Unchanged,
}

/// Compares `current` with the previously applied pair.
///
/// No previous pair (first run, or an unreadable record) counts as changed.
pub fn detect_change(current: &FingerprintPair, previous: Option<&FingerprintPair>) -> ChangeStatus {
    match previous {
        Some(prev) if prev == current => ChangeStatus::Unchanged,
        _ => ChangeStatus::Changed,
    }
}

/// File-backed record of the last applied [`FingerprintPair`]
#[derive(Debug, Clone)]
pub struct FingerprintStore {
    path: PathBuf,
}

impl FingerprintStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the stored pair.
    ///
    /// Returns `Ok(None)` when nothing has been stored yet. A file whose content
    /// cannot be parsed (including non-UTF-8 bytes) is also reported as `None`,
    /// which forces a full replay.
    ///
    /// # Errors
    ///
    /// Returns `Error::Persistence` if the file exists but cannot be read.
    pub async fn load(&self) -> Result<Option<FingerprintPair>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No fingerprint record at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let pair = std::str::from_utf8(&bytes)
            .ok()
            .and_then(FingerprintPair::from_line);
        if pair.is_none() {
            warn!(
                "Fingerprint record {} is malformed, treating configuration as changed",
                self.path.display()
            );
        }
        Ok(pair)
    }

    /// Overwrites the stored pair atomically.
    ///
    /// # Errors
    ///
    /// Returns `Error::Persistence` if the record cannot be written.
    pub async fn save(&self, pair: &FingerprintPair) -> Result<()> {
        crate::utils::ensure_parent(&self.path)?;
        crate::config::write_atomic(&self.path, pair.to_line().as_bytes()).await?;
        debug!(
            ports = pair.ports.short(),
            blocklist = pair.blocklist.short(),
            "Stored fingerprints"
        );
        Ok(())
    }
}
