//! Periodic sync via cron
//!
//! The entry lives in the invoking user's crontab (root's, in practice) and is
//! tagged with a marker comment on the line above it, so install replaces it
//! and remove finds it without touching the operator's other entries.

use crate::core::error::{Error, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Marker comment placed above the managed entry
pub const MARKER: &str = "# ufwsync: periodic firewall sync (managed entry)";

/// Environment override for the crontab program path
pub const CRONTAB_COMMAND_ENV: &str = "UFWSYNC_CRONTAB_COMMAND";

/// Builds the cron line that runs `binary sync` every `interval_hours`.
///
/// Intervals are clamped to 1..=24; 24 means once a day at midnight.
pub fn cron_line(binary: &Path, interval_hours: u8, config: Option<&Path>) -> String {
    let hours = match interval_hours.clamp(1, 24) {
        1 => "*".to_string(),
        24 => "0".to_string(),
        n => format!("*/{n}"),
    };
    let mut command = format!("{} sync", cron_quote(binary));
    if let Some(config) = config {
        command.push_str(&format!(" --config {}", cron_quote(config)));
    }
    format!("0 {hours} * * * {command}")
}

/// Quotes a path for the shell cron hands the command to.
///
/// Plain paths are left as is. Anything else is single-quoted, and `%` is
/// escaped because cron turns a bare `%` into a newline.
fn cron_quote(path: &Path) -> String {
    let text = path.to_string_lossy();
    let plain = !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+,:@".contains(c));
    if plain {
        return text.into_owned();
    }
    format!("'{}'", text.replace('\'', r"'\''")).replace('%', r"\%")
}

/// Returns `crontab` with any managed entry replaced by `entry`.
pub fn with_entry(crontab: &str, entry: &str) -> String {
    let (mut out, _) = without_entry(crontab);
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(MARKER);
    out.push('\n');
    out.push_str(entry);
    out.push('\n');
    out
}

/// Returns `crontab` without the managed entry, and whether one was present.
pub fn without_entry(crontab: &str) -> (String, bool) {
    let mut out = String::with_capacity(crontab.len());
    let mut found = false;
    let mut lines = crontab.lines();

    while let Some(line) = lines.next() {
        if line.trim() == MARKER {
            found = true;
            // The managed command is the line right after the marker
            lines.next();
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }

    (out, found)
}

/// Thin wrapper over the `crontab` binary
#[derive(Debug, Clone)]
pub struct Crontab {
    program: String,
}

impl Default for Crontab {
    fn default() -> Self {
        let program = std::env::var(CRONTAB_COMMAND_ENV)
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "crontab".to_string());
        Self { program }
    }
}

impl Crontab {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Current crontab; empty if the user has none.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schedule` if crontab cannot be run or fails for another reason.
    pub async fn read(&self) -> Result<String> {
        let output = tokio::process::Command::new(&self.program)
            .arg("-l")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::Schedule(format!("failed to run {}: {e}", self.program)))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.to_lowercase().contains("no crontab") {
            Ok(String::new())
        } else {
            Err(Error::Schedule(stderr.trim().to_string()))
        }
    }

    /// Replaces the crontab with `content`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schedule` if crontab rejects the content.
    pub async fn write(&self, content: &str) -> Result<()> {
        let mut child = tokio::process::Command::new(&self.program)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Schedule(format!("failed to run {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(content.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Schedule(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    /// Installs (or replaces) the managed entry.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schedule` if the crontab cannot be read or written.
    pub async fn install(&self, entry: &str) -> Result<()> {
        let current = self.read().await?;
        self.write(&with_entry(&current, entry)).await?;
        info!("Installed cron entry: {entry}");
        Ok(())
    }

    /// Removes the managed entry. Returns `false` if there was none.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schedule` if the crontab cannot be read or written.
    pub async fn remove(&self) -> Result<bool> {
        let current = self.read().await?;
        let (updated, found) = without_entry(&current);
        if found {
            self.write(&updated).await?;
            info!("Removed cron entry");
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_cron_line_default_interval() {
        let line = cron_line(Path::new("/usr/local/bin/ufwsync"), 3, None);
        assert_eq!(line, "0 */3 * * * /usr/local/bin/ufwsync sync");
    }

    #[test]
    fn test_cron_line_edges() {
        let bin = PathBuf::from("/usr/bin/ufwsync");
        assert!(cron_line(&bin, 0, None).starts_with("0 * * * *"));
        assert!(cron_line(&bin, 1, None).starts_with("0 * * * *"));
        assert!(cron_line(&bin, 24, None).starts_with("0 0 * * *"));
        assert!(cron_line(&bin, 200, None).starts_with("0 0 * * *"));
    }

    #[test]
    fn test_cron_line_with_config() {
        let line = cron_line(
            Path::new("/usr/bin/ufwsync"),
            6,
            Some(Path::new("/etc/ufwsync.json")),
        );
        assert!(line.ends_with("sync --config /etc/ufwsync.json"));
    }

    #[test]
    fn test_cron_line_quotes_unusual_paths() {
        let line = cron_line(
            Path::new("/opt/ufw sync/bin/ufwsync"),
            3,
            Some(Path::new("/etc/ufwsync/50%.json")),
        );
        assert_eq!(
            line,
            r"0 */3 * * * '/opt/ufw sync/bin/ufwsync' sync --config '/etc/ufwsync/50\%.json'"
        );
    }

    #[test]
    fn test_cron_quote_single_quote() {
        assert_eq!(cron_quote(Path::new("/tmp/it's")), r"'/tmp/it'\''s'");
    }

    #[test]
    fn test_with_entry_keeps_other_lines() {
        let existing = "MAILTO=ops@example.com\n15 2 * * * /usr/bin/backup\n";
        let updated = with_entry(existing, "0 */3 * * * /usr/bin/ufwsync sync");
        assert!(updated.starts_with(existing));
        assert!(updated.ends_with(&format!("{MARKER}\n0 */3 * * * /usr/bin/ufwsync sync\n")));
    }

    #[test]
    fn test_with_entry_replaces_previous() {
        let first = with_entry("", "0 */3 * * * /usr/bin/ufwsync sync");
        let second = with_entry(&first, "0 */6 * * * /usr/bin/ufwsync sync");
        assert_eq!(second.matches(MARKER).count(), 1);
        assert!(!second.contains("*/3"));
        assert!(second.contains("*/6"));
    }

    #[test]
    fn test_with_entry_missing_trailing_newline() {
        let updated = with_entry("15 2 * * * /usr/bin/backup", "0 * * * * x sync");
        assert!(updated.starts_with("15 2 * * * /usr/bin/backup\n# ufwsync"));
    }

    #[test]
    fn test_without_entry() {
        let installed = with_entry("15 2 * * * /usr/bin/backup\n", "0 */3 * * * x sync");
        let (removed, found) = without_entry(&installed);
        assert!(found);
        assert_eq!(removed, "15 2 * * * /usr/bin/backup\n");

        let (unchanged, found) = without_entry(&removed);
        assert!(!found);
        assert_eq!(unchanged, removed);
    }

    #[tokio::test]
    async fn test_install_and_remove_through_crontab_binary() {
        use crate::core::test_helpers::write_script;

        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("tab");
        // Minimal crontab stand-in: -l prints the stored tab, - replaces it
        let script = write_script(
            dir.path(),
            "crontab",
            &format!(
                "#!/bin/sh\nT='{}'\nif [ \"$1\" = \"-l\" ]; then\n  [ -f \"$T\" ] || {{ echo 'no crontab for root' >&2; exit 1; }}\n  cat \"$T\"\nelse\n  cat > \"$T\"\nfi\n",
                store.display()
            ),
        );

        let crontab = Crontab::new(script.to_str().unwrap());
        assert_eq!(crontab.read().await.unwrap(), "");

        crontab.install("0 */3 * * * /usr/bin/ufwsync sync").await.unwrap();
        let tab = std::fs::read_to_string(&store).unwrap();
        assert!(tab.contains(MARKER));

        assert!(crontab.remove().await.unwrap());
        assert!(!std::fs::read_to_string(&store).unwrap().contains("ufwsync"));
        assert!(!crontab.remove().await.unwrap());
    }
}
