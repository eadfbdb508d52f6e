//! Change detection and rule replay
//!
//! A sync fetches both documents, compares their fingerprints with the last
//! applied pair and, when something changed (or the caller forces it), rebuilds
//! the whole ufw rule table in a fixed order:
//!
//! 1. reset all rules
//! 2. allow inbound, one per line of the ports document
//! 3. deny outbound, one per valid line of the blocklist document
//! 4. allow inbound from each whitelist entry
//! 5. enable the firewall
//! 6. record the new fingerprints
//!
//! There is no single-rule update path. Whitelist entries go last so they are
//! the most recently added rules.
//!
//! Fingerprints are written only after step 5. A crash in between leaves the
//! old record, so the next run replays again.

use crate::config::{FailurePolicy, SyncConfig};
use crate::core::error::{Error, Result};
use crate::core::fetch::{FetchedDocuments, Fetcher, fetch_documents};
use crate::core::fingerprint::{ChangeStatus, FingerprintPair, FingerprintStore, detect_change};
use crate::core::lock::{DEFAULT_LOCK_WAIT, SyncLock};
use crate::core::ufw::Firewall;
use crate::core::whitelist::WhitelistStore;
use crate::validators::validate_ipv4_or_cidr;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Which remote document a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Document {
    Ports,
    Blocklist,
}

/// Replay stage a firewall call belonged to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Step {
    AllowPort,
    DenyOutbound,
    AllowWhitelisted,
}

/// A non-fatal problem met while replaying rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// A blocklist line is not IPv4/CIDR (blank lines included) and was skipped
    InvalidAddressFormat {
        document: Document,
        line_number: usize,
        line: String,
    },
    /// An empty line in the ports document; nothing was sent to ufw
    BlankLine {
        document: Document,
        line_number: usize,
    },
    /// ufw rejected one rule
    FirewallCommand {
        step: Step,
        argument: String,
        message: String,
    },
}

/// Details of a run that rebuilt the rule table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    pub forced: bool,
    /// Whether the fingerprints differed from the stored pair
    pub change: ChangeStatus,
    pub ports_applied: usize,
    pub blocks_applied: usize,
    pub whitelist_applied: usize,
    pub findings: Vec<Finding>,
    pub fingerprints: FingerprintPair,
    pub fingerprint_persisted: bool,
}

impl ApplySummary {
    pub fn rules_applied(&self) -> usize {
        self.ports_applied + self.blocks_applied + self.whitelist_applied
    }

    /// True when ufw rejected at least one rule
    pub fn is_partial(&self) -> bool {
        self.findings
            .iter()
            .any(|f| matches!(f, Finding::FirewallCommand { .. }))
    }
}

/// Machine-readable outcome of [`RuleReconciler::reconcile`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileResult {
    /// Documents match the last applied pair; the firewall was not touched
    NoChange { fingerprints: FingerprintPair },
    /// The rule table was reset and replayed
    Applied(ApplySummary),
}

/// Settings that shape a run, taken from [`SyncConfig`]
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub ports_source: String,
    pub blocklist_source: String,
    pub failure_policy: FailurePolicy,
    pub persist_on_partial: bool,
    pub lock_path: PathBuf,
    pub lock_wait: Duration,
}

impl ReconcileSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            ports_source: config.ports_url.trim().to_string(),
            blocklist_source: config.blocklist_url.trim().to_string(),
            failure_policy: config.failure_policy,
            persist_on_partial: config.persist_on_partial,
            lock_path: config.lock_path.clone(),
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }
}

/// Drives fetch → compare → reset-and-replay → record
pub struct RuleReconciler<F, W> {
    fetcher: F,
    firewall: W,
    whitelist: WhitelistStore,
    fingerprints: FingerprintStore,
    settings: ReconcileSettings,
    running: Mutex<()>,
}

impl<F: Fetcher, W: Firewall> RuleReconciler<F, W> {
    pub fn new(
        settings: ReconcileSettings,
        fetcher: F,
        firewall: W,
        whitelist: WhitelistStore,
        fingerprints: FingerprintStore,
    ) -> Self {
        Self {
            fetcher,
            firewall,
            whitelist,
            fingerprints,
            settings,
            running: Mutex::new(()),
        }
    }

    /// Builds a reconciler whose stores and policies come from `config`.
    pub fn from_config(config: &SyncConfig, fetcher: F, firewall: W) -> Self {
        Self::new(
            ReconcileSettings::from_config(config),
            fetcher,
            firewall,
            WhitelistStore::new(&config.whitelist_path, config.validate_whitelist),
            FingerprintStore::new(&config.fingerprint_path),
        )
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn firewall(&self) -> &W {
        &self.firewall
    }

    pub fn fingerprint_store(&self) -> &FingerprintStore {
        &self.fingerprints
    }

    /// Runs one sync.
    ///
    /// With `force_update` the rule table is rebuilt even if nothing changed.
    /// Concurrent calls on the same reconciler run one after another; another
    /// process holding the lock file is waited for up to the configured limit.
    ///
    /// # Errors
    ///
    /// - `Error::Busy` if another process keeps the lock
    /// - `Error::Fetch` if either document cannot be retrieved (firewall untouched)
    /// - `Error::Persistence` if fingerprints or the whitelist cannot be read/written
    /// - `Error::Firewall` if reset or enable fails, or any rule fails under
    ///   [`FailurePolicy::AbortOnFirstError`]
    pub async fn reconcile(&self, force_update: bool) -> Result<ReconcileResult> {
        let _running = self.running.lock().await;
        let _lock = SyncLock::acquire(&self.settings.lock_path, self.settings.lock_wait).await?;

        info!(force = force_update, "Starting sync");

        let docs = fetch_documents(
            &self.fetcher,
            &self.settings.ports_source,
            &self.settings.blocklist_source,
        )
        .await?;

        let current = FingerprintPair::of(&docs);
        let previous = self.fingerprints.load().await?;
        let change = detect_change(&current, previous.as_ref());

        info!(
            ports = current.ports.short(),
            blocklist = current.blocklist.short(),
            %change,
            "Compared fingerprints"
        );

        if change == ChangeStatus::Unchanged && !force_update {
            info!("Configuration unchanged, firewall left as is");
            return Ok(ReconcileResult::NoChange {
                fingerprints: current,
            });
        }

        let mut summary = self.replay(&docs, change, force_update, current).await?;

        if summary.is_partial() && !self.settings.persist_on_partial {
            warn!("Some rules were rejected; fingerprints not recorded so the next run retries");
        } else {
            self.fingerprints.save(&summary.fingerprints).await?;
            summary.fingerprint_persisted = true;
        }

        info!(
            ports = summary.ports_applied,
            blocks = summary.blocks_applied,
            whitelist = summary.whitelist_applied,
            findings = summary.findings.len(),
            "Sync applied"
        );

        Ok(ReconcileResult::Applied(summary))
    }

    async fn replay(
        &self,
        docs: &FetchedDocuments,
        change: ChangeStatus,
        forced: bool,
        fingerprints: FingerprintPair,
    ) -> Result<ApplySummary> {
        // Read before reset so a broken whitelist file cannot leave the table empty
        let whitelist = self.whitelist.read_all().await?;

        let mut summary = ApplySummary {
            forced,
            change,
            ports_applied: 0,
            blocks_applied: 0,
            whitelist_applied: 0,
            findings: Vec::new(),
            fingerprints,
            fingerprint_persisted: false,
        };

        self.firewall.reset().await.inspect_err(|e| {
            error!("Failed to reset firewall rules: {e}");
        })?;
        info!("Reset all firewall rules");

        for (line_number, port) in document_lines(&docs.ports) {
            if port.is_empty() {
                warn!(line_number, "Skipping blank line in ports document");
                summary.findings.push(Finding::BlankLine {
                    document: Document::Ports,
                    line_number,
                });
                continue;
            }
            let outcome = self.firewall.allow_port(&port).await;
            if self.record(outcome, Step::AllowPort, &port, &mut summary)? {
                summary.ports_applied += 1;
            }
        }

        for (line_number, line) in document_lines(&docs.blocklist) {
            if let Err(reason) = validate_ipv4_or_cidr(&line) {
                warn!(line_number, "Skipping blocklist entry '{line}': {reason}");
                summary.findings.push(Finding::InvalidAddressFormat {
                    document: Document::Blocklist,
                    line_number,
                    line,
                });
                continue;
            }
            let outcome = self.firewall.deny_outbound(&line).await;
            if self.record(outcome, Step::DenyOutbound, &line, &mut summary)? {
                summary.blocks_applied += 1;
            }
        }

        for entry in whitelist {
            let outcome = self.firewall.allow_from(&entry).await;
            if self.record(outcome, Step::AllowWhitelisted, &entry, &mut summary)? {
                summary.whitelist_applied += 1;
            }
        }

        self.firewall.enable().await.inspect_err(|e| {
            error!("Failed to enable firewall: {e}");
        })?;
        info!("Firewall enabled");

        Ok(summary)
    }

    /// Returns `Ok(true)` if the rule went in, `Ok(false)` if it became a finding.
    fn record(
        &self,
        outcome: Result<()>,
        step: Step,
        argument: &str,
        summary: &mut ApplySummary,
    ) -> Result<bool> {
        match outcome {
            Ok(()) => {
                debug!(%step, "Applied {argument}");
                Ok(true)
            }
            Err(e) => {
                error!(%step, "ufw rejected '{argument}': {e}");
                if self.settings.failure_policy == FailurePolicy::AbortOnFirstError {
                    return Err(e);
                }
                let message = match &e {
                    Error::Firewall { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                summary.findings.push(Finding::FirewallCommand {
                    step,
                    argument: argument.to_string(),
                    message,
                });
                Ok(false)
            }
        }
    }
}

/// Splits a document into `(line number, text)` pairs.
///
/// Every line is data: lines are trimmed but blank ones are kept, so the
/// caller can report them against the remote file's numbering. A single
/// trailing newline does not produce an extra line. Invalid UTF-8 is replaced
/// rather than rejected; such a line will fail validation or be refused by ufw.
pub fn document_lines(bytes: &[u8]) -> Vec<(usize, String)> {
    String::from_utf8_lossy(bytes)
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim().to_string()))
        .collect()
}
