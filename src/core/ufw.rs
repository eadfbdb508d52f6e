//! ufw backend
//!
//! Every rule change is one `ufw` invocation with arguments passed directly
//! (no shell). Destructive commands use `--force` so they never prompt.
//!
//! The `UFWSYNC_UFW_COMMAND` environment variable overrides the program path;
//! tests point it at a mock script.

use crate::config::SyncConfig;
use crate::core::error::{Error, Result};
use std::future::Future;
use std::process::Stdio;
use tracing::{debug, error};

/// Environment override for the ufw program path
pub const UFW_COMMAND_ENV: &str = "UFWSYNC_UFW_COMMAND";

/// The firewall operations a sync depends on.
///
/// Each call is fallible on its own; the reconciler decides whether a failure
/// ends the run or becomes a finding.
pub trait Firewall {
    /// Removes every rule and returns the firewall to its default policy.
    fn reset(&self) -> impl Future<Output = Result<()>> + Send;

    /// Allows inbound traffic on a port token (`22`, `443/tcp`, `6000:6007/udp`).
    fn allow_port(&self, port: &str) -> impl Future<Output = Result<()>> + Send;

    /// Denies outbound traffic to an address or CIDR block.
    fn deny_outbound(&self, address: &str) -> impl Future<Output = Result<()>> + Send;

    /// Allows all inbound traffic from an address or CIDR block.
    fn allow_from(&self, address: &str) -> impl Future<Output = Result<()>> + Send;

    /// Enables the firewall. Idempotent.
    fn enable(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Runs the real `ufw` binary
#[derive(Debug, Clone)]
pub struct Ufw {
    program: String,
}

impl Ufw {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Uses `UFWSYNC_UFW_COMMAND` if set, otherwise the configured program.
    pub fn from_config(config: &SyncConfig) -> Self {
        let program = std::env::var(UFW_COMMAND_ENV)
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| config.ufw_command.clone());
        Self::new(program)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the numbered rule listing (`ufw status numbered`).
    ///
    /// # Errors
    ///
    /// Returns `Error::Firewall` if ufw fails.
    pub async fn status(&self) -> Result<String> {
        self.run(&["status", "numbered"]).await
    }

    /// Deletes a rule by the number shown in [`Ufw::status`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Firewall` if ufw rejects the number.
    pub async fn delete_rule(&self, number: u32) -> Result<()> {
        if number == 0 {
            return Err(Error::Config("Rule numbers start at 1".to_string()));
        }
        let number = number.to_string();
        self.run(&["--force", "delete", &number]).await.map(drop)
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!("Running {} {}", self.program, args.join(" "));

        let output = crate::elevation::create_elevated_command(&self.program, args)?
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                error!("Failed to spawn {}: {e}", self.program);
                Error::Firewall {
                    message: format!("failed to run {}: {e}", self.program),
                    stderr: None,
                    exit_code: None,
                }
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        if output.status.success() {
            Ok(stdout)
        } else {
            // ufw reports some errors on stdout
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                stdout.as_str()
            } else {
                stderr.as_ref()
            };
            Err(Error::firewall(detail, output.status.code()))
        }
    }
}

impl Firewall for Ufw {
    async fn reset(&self) -> Result<()> {
        self.run(&["--force", "reset"]).await.map(drop)
    }

    async fn allow_port(&self, port: &str) -> Result<()> {
        self.run(&["allow", port]).await.map(drop)
    }

    async fn deny_outbound(&self, address: &str) -> Result<()> {
        self.run(&["deny", "out", "to", address]).await.map(drop)
    }

    async fn allow_from(&self, address: &str) -> Result<()> {
        self.run(&["allow", "from", address]).await.map(drop)
    }

    async fn enable(&self) -> Result<()> {
        self.run(&["--force", "enable"]).await.map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::{ENV_VAR_MUTEX, write_script};

    #[tokio::test]
    async fn test_missing_binary_is_firewall_error() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        unsafe {
            std::env::set_var("UFWSYNC_TEST_NO_ELEVATION", "1");
        }

        let ufw = Ufw::new("/nonexistent/ufwsync-test/ufw");
        let err = ufw.enable().await.unwrap_err();
        assert!(matches!(err, Error::Firewall { exit_code: None, .. }));
    }

    #[tokio::test]
    async fn test_arguments_reach_ufw_unmodified() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        unsafe {
            std::env::set_var("UFWSYNC_TEST_NO_ELEVATION", "1");
        }

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.log");
        let script = write_script(
            dir.path(),
            "ufw",
            &format!("#!/bin/sh\necho \"$*\" >> '{}'\n", log.display()),
        );

        let ufw = Ufw::new(script.to_str().unwrap());
        ufw.reset().await.unwrap();
        ufw.allow_port("443/tcp").await.unwrap();
        ufw.deny_outbound("10.0.0.5/24").await.unwrap();
        ufw.allow_from("203.0.113.9").await.unwrap();
        ufw.enable().await.unwrap();
        ufw.delete_rule(3).await.unwrap();

        let calls = std::fs::read_to_string(&log).unwrap();
        let calls: Vec<&str> = calls.lines().collect();
        assert_eq!(
            calls,
            vec![
                "--force reset",
                "allow 443/tcp",
                "deny out to 10.0.0.5/24",
                "allow from 203.0.113.9",
                "--force enable",
                "--force delete 3",
            ]
        );
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        unsafe {
            std::env::set_var("UFWSYNC_TEST_NO_ELEVATION", "1");
        }

        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "ufw",
            "#!/bin/sh\necho 'ERROR: Bad port' >&2\nexit 1\n",
        );

        let err = Ufw::new(script.to_str().unwrap())
            .allow_port("99999")
            .await
            .unwrap_err();
        match err {
            Error::Firewall {
                message, exit_code, ..
            } => {
                assert_eq!(message, "ERROR: Bad port");
                assert_eq!(exit_code, Some(1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_status_returns_stdout() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        unsafe {
            std::env::set_var("UFWSYNC_TEST_NO_ELEVATION", "1");
        }

        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "ufw",
            "#!/bin/sh\necho 'Status: active'\necho '[ 1] 22 ALLOW IN Anywhere'\n",
        );

        let status = Ufw::new(script.to_str().unwrap()).status().await.unwrap();
        assert!(status.contains("Status: active"));
        assert!(status.contains("[ 1] 22"));
    }

    #[tokio::test]
    async fn test_delete_rule_zero_rejected() {
        let ufw = Ufw::new("ufw");
        assert!(matches!(ufw.delete_rule(0).await, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_config_env_override() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        let config = SyncConfig {
            ufw_command: "/usr/sbin/ufw".into(),
            ..SyncConfig::default()
        };

        unsafe {
            std::env::remove_var(UFW_COMMAND_ENV);
        }
        assert_eq!(Ufw::from_config(&config).program(), "/usr/sbin/ufw");

        unsafe {
            std::env::set_var(UFW_COMMAND_ENV, "/tmp/mock_ufw.sh");
        }
        assert_eq!(Ufw::from_config(&config).program(), "/tmp/mock_ufw.sh");

        unsafe {
            std::env::remove_var(UFW_COMMAND_ENV);
        }
    }
}
