/// Audit logging for firewall-changing operations
///
/// Every sync outcome and every manual rule change is appended as one JSON
/// object per line, independent of the tracing output level.
use crate::core::reconcile::ReconcileResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Types of auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Sync,
    ResetRules,
    DeleteRule,
    WhitelistAdd,
    WhitelistRemove,
    ScheduleInstall,
    ScheduleRemove,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    pub event_type: EventType,

    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }
}

/// Audit log writer
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Opens the audit log in the state directory.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: path.into(),
        }
    }

    /// Appends an event to the audit log as one JSON line.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file cannot be opened or written
    pub async fn log(&self, event: &AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(event)?;
        crate::utils::ensure_parent(&self.log_path)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Reads up to `count` of the most recent events, newest first.
    ///
    /// Lines that fail to parse are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file cannot be read
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = match tokio::fs::read_to_string(&self.log_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

/// Records `event` in the default audit log; failures only produce a warning.
pub async fn record(event: AuditEvent) {
    match AuditLog::new() {
        Ok(audit) => {
            if let Err(e) = audit.log(&event).await {
                tracing::warn!("Failed to write audit log: {}", e);
            }
        }
        Err(e) => tracing::warn!("Audit log unavailable: {}", e),
    }
}

/// Builds the audit event for a sync attempt
pub fn sync_event(result: &crate::Result<ReconcileResult>, forced: bool) -> AuditEvent {
    match result {
        Ok(ReconcileResult::NoChange { fingerprints }) => AuditEvent::new(
            EventType::Sync,
            true,
            serde_json::json!({
                "forced": forced,
                "outcome": "no_change",
                "fingerprints": fingerprints,
            }),
            None,
        ),
        Ok(ReconcileResult::Applied(summary)) => AuditEvent::new(
            EventType::Sync,
            !summary.is_partial(),
            serde_json::json!({
                "forced": forced,
                "outcome": "applied",
                "ports_applied": summary.ports_applied,
                "blocks_applied": summary.blocks_applied,
                "whitelist_applied": summary.whitelist_applied,
                "finding_count": summary.findings.len(),
                "fingerprint_persisted": summary.fingerprint_persisted,
            }),
            summary
                .is_partial()
                .then(|| "some rules were rejected by ufw".to_string()),
        ),
        Err(e) => AuditEvent::new(
            EventType::Sync,
            false,
            serde_json::json!({ "forced": forced }),
            Some(e.to_string()),
        ),
    }
}

/// Builds the audit event for a manual operation
pub fn operation_event<T>(
    event_type: EventType,
    details: serde_json::Value,
    result: &crate::Result<T>,
) -> AuditEvent {
    AuditEvent::new(
        event_type,
        result.is_ok(),
        details,
        result.as_ref().err().map(ToString::to_string),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;

    #[test]
    fn test_audit_event_creation() {
        let event = AuditEvent::new(
            EventType::WhitelistAdd,
            true,
            serde_json::json!({"address": "203.0.113.9"}),
            None,
        );

        assert!(event.success);
        assert!(event.error.is_none());
        assert_eq!(event.details["address"], "203.0.113.9");
    }

    #[test]
    fn test_event_serialization() {
        let event = AuditEvent::new(
            EventType::ScheduleInstall,
            false,
            serde_json::json!({}),
            Some("crontab missing".to_string()),
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("schedule_install"));
        assert!(json.contains("crontab missing"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"timestamp":"2024-01-01T00:00:00Z","event_type":"sync","success":true,"details":{},"error":null}"#;
        let event: AuditEvent = serde_json::from_str(json).unwrap();

        assert!(event.success);
        assert_eq!(event.event_type, EventType::Sync);
    }

    #[test]
    fn test_sync_event_for_fetch_failure() {
        let result: crate::Result<ReconcileResult> = Err(Error::Fetch {
            source_url: "https://example.com/ports.txt".into(),
            message: "timed out".into(),
        });
        let event = sync_event(&result, false);
        assert!(!event.success);
        assert!(event.error.unwrap().contains("example.com"));
    }

    #[tokio::test]
    async fn test_log_and_read_recent() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::at(dir.path().join("state").join("audit.log"));

        for address in ["198.51.100.7", "203.0.113.9"] {
            let event = operation_event(
                EventType::WhitelistAdd,
                serde_json::json!({ "address": address }),
                &Ok::<(), Error>(()),
            );
            audit.log(&event).await.unwrap();
        }

        let recent = audit.read_recent(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].details["address"], "203.0.113.9");
    }

    #[tokio::test]
    async fn test_read_recent_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::at(dir.path().join("audit.log"));
        assert!(audit.read_recent(5).await.unwrap().is_empty());
    }
}
