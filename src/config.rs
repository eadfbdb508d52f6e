use crate::core::error::{Error, Result};
use crate::utils::{get_data_dir, get_state_dir};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fallback location when no XDG directory can be determined (e.g. `HOME` unset under cron)
const FALLBACK_DIR: &str = "/var/lib/ufwsync";

/// What to do when ufw rejects an individual rule during replay
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and continue with the next rule
    #[default]
    BestEffort,
    /// Stop the replay at the first rejected rule
    AbortOnFirstError,
}

/// Complete sync configuration, persisted as JSON
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    /// Document with one inbound port token per line
    #[serde(default)]
    pub ports_url: String,
    /// Document with one outbound IPv4/CIDR per line
    #[serde(default)]
    pub blocklist_url: String,
    #[serde(default = "default_whitelist_path")]
    pub whitelist_path: PathBuf,
    #[serde(default = "default_fingerprint_path")]
    pub fingerprint_path: PathBuf,
    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,
    /// Per-document fetch timeout (clamped to 1..=600)
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Record the new fingerprints even when some rules were rejected.
    ///
    /// When false, a partially applied run is retried on the next cycle.
    #[serde(default = "default_true")]
    pub persist_on_partial: bool,
    /// Reject whitelist entries that are not IPv4/CIDR
    #[serde(default = "default_true")]
    pub validate_whitelist: bool,
    #[serde(default = "default_ufw_command")]
    pub ufw_command: String,
    #[serde(default = "default_interval_hours")]
    pub schedule_interval_hours: u8,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ports_url: String::new(),
            blocklist_url: String::new(),
            whitelist_path: default_whitelist_path(),
            fingerprint_path: default_fingerprint_path(),
            lock_path: default_lock_path(),
            fetch_timeout_secs: default_fetch_timeout(),
            failure_policy: FailurePolicy::default(),
            persist_on_partial: true,
            validate_whitelist: true,
            ufw_command: default_ufw_command(),
            schedule_interval_hours: default_interval_hours(),
        }
    }
}

impl SyncConfig {
    /// Fetch timeout as a `Duration`, clamped to a sane range.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.clamp(1, 600))
    }

    /// Checks that both document sources are configured.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first missing source.
    pub fn require_sources(&self) -> Result<()> {
        if self.ports_url.trim().is_empty() {
            return Err(Error::Config(
                "ports_url is not set (ufwsync config set --ports-url <URL>)".to_string(),
            ));
        }
        if self.blocklist_url.trim().is_empty() {
            return Err(Error::Config(
                "blocklist_url is not set (ufwsync config set --blocklist-url <URL>)".to_string(),
            ));
        }
        Ok(())
    }
}

fn data_file(name: &str) -> PathBuf {
    get_data_dir()
        .unwrap_or_else(|| PathBuf::from(FALLBACK_DIR))
        .join(name)
}

fn default_whitelist_path() -> PathBuf {
    data_file("whitelist.txt")
}

fn default_fingerprint_path() -> PathBuf {
    data_file("fingerprints")
}

fn default_lock_path() -> PathBuf {
    get_state_dir()
        .unwrap_or_else(|| PathBuf::from(FALLBACK_DIR))
        .join("sync.lock")
}

fn default_true() -> bool {
    true
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_ufw_command() -> String {
    "ufw".to_string()
}

fn default_interval_hours() -> u8 {
    3
}

/// Default config file location (`<data dir>/config.json`).
pub fn default_config_path() -> PathBuf {
    data_file("config.json")
}

/// Saves the config to disk using an atomic write pattern.
/// 1. Writes to a temporary file.
/// 2. Sets restrictive permissions (0o600).
/// 3. Atomically renames to the target path.
pub async fn save_config(config: &SyncConfig, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    crate::utils::ensure_parent(path)?;
    write_atomic(path, json.as_bytes()).await?;
    Ok(())
}

/// Loads the config from disk, or returns the default if the file does not exist.
///
/// # Errors
///
/// Returns `Err` if the file exists but cannot be read or parsed. Silently
/// falling back to defaults would turn a typo into "no sources configured".
pub async fn load_config(path: &Path) -> Result<SyncConfig> {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => Ok(serde_json::from_str::<SyncConfig>(&json)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SyncConfig::default()),
        Err(e) => Err(e.into()),
    }
}

/// Writes `bytes` to `path` via a sibling temp file and rename.
///
/// The temp file is created 0o600 before any data is written.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    #[cfg(unix)]
    {
        use tokio::fs::OpenOptions;
        use tokio::io::AsyncWriteExt;

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o600)
            .open(&temp_path)
            .await?;

        file.write_all(bytes).await?;
        file.sync_all().await?;
    }

    #[cfg(not(unix))]
    {
        tokio::fs::write(&temp_path, bytes).await?;
    }

    tokio::fs::rename(&temp_path, path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::StorageFull {
            std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                format!("Disk full: cannot write {}", path.display()),
            )
        } else {
            e
        }
    })
}
