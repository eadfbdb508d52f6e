//! Shared test utilities for core module tests
//!
//! Provides in-memory stand-ins for the fetcher and firewall so reconciliation
//! can be exercised without network or root. This module is only compiled in test mode.

use crate::core::error::{Error, Result};
use crate::core::fetch::Fetcher;
use crate::core::ufw::Firewall;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Mutex for tests that need exclusive access to environment variables.
///
/// # Example
///
/// ```ignore
/// let _guard = ENV_VAR_MUTEX.lock().unwrap();
/// unsafe {
///     std::env::set_var("UFWSYNC_ELEVATION_METHOD", "sudo");
/// }
/// // ... test with custom env state ...
/// unsafe {
///     std::env::remove_var("UFWSYNC_ELEVATION_METHOD");
/// }
/// ```
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

/// Writes an executable shell script into `dir` and returns its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// One call made against [`RecordingFirewall`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirewallCall {
    Reset,
    AllowPort(String),
    DenyOutbound(String),
    AllowFrom(String),
    Enable,
}

/// Firewall that records every call and fails on request
#[derive(Debug, Default)]
pub struct RecordingFirewall {
    calls: Mutex<Vec<FirewallCall>>,
    failing_arguments: HashSet<String>,
    fail_reset: bool,
    fail_enable: bool,
}

impl RecordingFirewall {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any call whose argument equals `argument` will fail.
    pub fn failing_on(mut self, argument: &str) -> Self {
        self.failing_arguments.insert(argument.to_string());
        self
    }

    pub fn failing_reset(mut self) -> Self {
        self.fail_reset = true;
        self
    }

    pub fn failing_enable(mut self) -> Self {
        self.fail_enable = true;
        self
    }

    pub fn calls(&self) -> Vec<FirewallCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: FirewallCall, argument: Option<&str>, forced_failure: bool) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        let rejected = forced_failure
            || argument.is_some_and(|arg| self.failing_arguments.contains(arg));
        if rejected {
            Err(Error::firewall("ERROR: rejected by test firewall", Some(1)))
        } else {
            Ok(())
        }
    }
}

impl Firewall for RecordingFirewall {
    async fn reset(&self) -> Result<()> {
        self.record(FirewallCall::Reset, None, self.fail_reset)
    }

    async fn allow_port(&self, port: &str) -> Result<()> {
        self.record(FirewallCall::AllowPort(port.to_string()), Some(port), false)
    }

    async fn deny_outbound(&self, address: &str) -> Result<()> {
        self.record(
            FirewallCall::DenyOutbound(address.to_string()),
            Some(address),
            false,
        )
    }

    async fn allow_from(&self, address: &str) -> Result<()> {
        self.record(
            FirewallCall::AllowFrom(address.to_string()),
            Some(address),
            false,
        )
    }

    async fn enable(&self) -> Result<()> {
        self.record(FirewallCall::Enable, None, self.fail_enable)
    }
}

/// Fetcher serving documents from memory; unknown sources fail
#[derive(Debug, Default)]
pub struct StaticFetcher {
    documents: Mutex<HashMap<String, Vec<u8>>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, source: &str, body: impl Into<Vec<u8>>) {
        self.documents
            .lock()
            .unwrap()
            .insert(source.to_string(), body.into());
    }

    pub fn unset(&self, source: &str) {
        self.documents.lock().unwrap().remove(source);
    }
}

impl Fetcher for StaticFetcher {
    async fn fetch(&self, source: &str) -> Result<Vec<u8>> {
        self.documents
            .lock()
            .unwrap()
            .get(source)
            .cloned()
            .ok_or_else(|| Error::Fetch {
                source_url: source.to_string(),
                message: "connection refused".to_string(),
            })
    }
}
