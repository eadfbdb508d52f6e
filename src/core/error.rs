use std::path::PathBuf;
use thiserror::Error;

/// Core error types for ufwsync
#[derive(Debug, Error)]
pub enum Error {
    /// A remote document could not be retrieved; no rules were touched
    #[error("Failed to fetch {source_url}: {message}")]
    Fetch { source_url: String, message: String },

    /// Operator-supplied address is not IPv4/CIDR
    #[error("Invalid address '{0}': expected IPv4 address or CIDR block")]
    InvalidAddress(String),

    /// ufw command execution failed
    #[error("ufw error: {message}")]
    Firewall {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    /// Fingerprint, whitelist or config file could not be read or written
    #[error("Persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Privilege escalation failed
    #[error("Elevation error: {0}")]
    Elevation(#[from] crate::elevation::ElevationError),

    /// Another reconciliation holds the lock
    #[error("Another sync is already running (lock held on {})", .0.display())]
    Busy(PathBuf),

    /// crontab could not be read or written
    #[error("Scheduling error: {0}")]
    Schedule(String),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Builds a [`Error::Firewall`] from a failed process's stderr and exit code.
    pub fn firewall(stderr: &str, exit_code: Option<i32>) -> Self {
        let trimmed = stderr.trim();
        let message = if trimmed.is_empty() {
            format!(
                "ufw exited with status {}",
                exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
            )
        } else {
            trimmed.lines().next().unwrap_or(trimmed).to_string()
        };
        Self::Firewall {
            message,
            stderr: Some(stderr.to_string()),
            exit_code,
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Database of ufw error patterns and their translations
pub struct UfwErrorPattern;

impl UfwErrorPattern {
    /// Matches an error message against known patterns and returns an operator-facing translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        if lower.contains("you need to be root")
            || lower.contains("permission denied")
            || lower.contains("operation not permitted")
        {
            return ErrorTranslation::new("Insufficient permissions to modify firewall rules")
                .with_suggestion("Run ufwsync as root (cron entries are installed for root)")
                .with_suggestion("Or set UFWSYNC_ELEVATION_METHOD=sudo with a NOPASSWD sudoers rule");
        }

        if lower.contains("no such file") || lower.contains("command not found") {
            return ErrorTranslation::new("ufw is not installed or not found in PATH")
                .with_suggestion("Install ufw: sudo apt install ufw  (Debian/Ubuntu)")
                .with_suggestion("Or: sudo dnf install ufw  (Fedora)")
                .with_suggestion("Or point ufw_command in the config at the binary");
        }

        if lower.contains("bad port") || lower.contains("invalid port") {
            return ErrorTranslation::new("The ports document contains a token ufw rejects")
                .with_suggestion("Ports must be 1-65535, optionally with /tcp or /udp")
                .with_suggestion("Ranges use a colon and need a protocol: 6000:6007/udp");
        }

        if lower.contains("bad source address")
            || lower.contains("bad destination address")
            || lower.contains("invalid address")
        {
            return ErrorTranslation::new("ufw rejected an address")
                .with_suggestion("Use IPv4 dotted-quad or CIDR form: 203.0.113.9 or 10.0.0.0/8");
        }

        if lower.contains("could not load logging rules")
            || lower.contains("problem running")
            || lower.contains("iptables")
        {
            return ErrorTranslation::new("ufw could not program the kernel packet filter")
                .with_suggestion("Check that iptables/nftables modules are available: lsmod")
                .with_suggestion("Inspect: sudo ufw status verbose");
        }

        if lower.contains("timeout") || lower.contains("timed out") {
            return ErrorTranslation::new("Operation timed out")
                .with_suggestion("Check network reachability of the document URLs")
                .with_suggestion("Raise fetch_timeout_secs in the config if the host is slow");
        }

        ErrorTranslation::new(format!("Firewall error: {msg}"))
            .with_suggestion("Check the detailed error message for more information")
            .with_suggestion("Verify ufw is working: sudo ufw status numbered")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
