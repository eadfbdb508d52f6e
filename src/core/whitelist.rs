//! Operator-maintained list of addresses always allowed inbound
//!
//! One address per line, in the order they were added. Entries are replayed
//! last during a sync, after the remote rule set.

use crate::core::error::{Error, Result};
use crate::validators::validate_ipv4_or_cidr;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct WhitelistStore {
    path: PathBuf,
    validate: bool,
}

impl WhitelistStore {
    /// Opens the store at `path`. With `validate` set, `append` rejects
    /// anything that is not an IPv4 address or CIDR block.
    pub fn new(path: impl Into<PathBuf>, validate: bool) -> Self {
        Self {
            path: path.into(),
            validate,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry. Duplicates are kept.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidAddress` if validation is enabled and the entry is not IPv4/CIDR
    ///   (or in any mode, if it is empty or spans several lines)
    /// - `Error::Persistence` if the file cannot be written
    pub async fn append(&self, address: &str) -> Result<()> {
        let address = address.trim();

        if address.is_empty() || address.contains(['\n', '\r']) {
            return Err(Error::InvalidAddress(address.to_string()));
        }

        if self.validate {
            validate_ipv4_or_cidr(address).map_err(|reason| {
                warn!("Rejected whitelist entry '{address}': {reason}");
                Error::InvalidAddress(address.to_string())
            })?;
        }

        crate::utils::ensure_parent(&self.path)?;

        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&self.path).await?;
        file.write_all(format!("{address}\n").as_bytes()).await?;
        file.sync_all().await?;

        info!("Whitelisted {address}");
        Ok(())
    }

    /// Returns every entry in insertion order; empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns `Error::Persistence` if the file exists but cannot be read.
    pub async fn read_all(&self) -> Result<Vec<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(parse_entries(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes every line equal to `address`, returning how many were dropped.
    ///
    /// The file is rewritten through a temporary file in the same directory and
    /// renamed over the original, so a crash leaves either the old or new list.
    ///
    /// # Errors
    ///
    /// Returns `Error::Persistence` if the list cannot be read or rewritten.
    pub async fn remove(&self, address: &str) -> Result<usize> {
        let address = address.trim();
        let entries = self.read_all().await?;
        let before = entries.len();
        let kept: Vec<String> = entries.into_iter().filter(|e| e != address).collect();
        let removed = before - kept.len();

        if removed == 0 {
            return Ok(0);
        }

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || rewrite(&path, &kept))
            .await
            .map_err(|e| Error::Internal(format!("Whitelist rewrite task failed: {e}")))??;

        info!(removed, "Removed {address} from whitelist");
        Ok(removed)
    }
}

fn parse_entries(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

fn rewrite(path: &Path, entries: &[String]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    // NamedTempFile is created 0o600 on unix
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    for entry in entries {
        writeln!(temp, "{entry}")?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
