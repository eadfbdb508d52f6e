//! ufwsync - keeps a UFW rule set in line with two remote documents
//!
//! A list of inbound ports to allow and a list of outbound IPv4 ranges to deny
//! are fetched, fingerprinted, and, when either changed, replayed onto a freshly
//! reset ufw together with a local whitelist of always-allowed addresses.
//!
//! # Architecture
//!
//! - [`core`] - Fetching, change detection, rule replay, ufw backend
//! - [`audit`] - JSON-lines log of every sync and manual rule change
//! - [`validators`] - IPv4/CIDR validation
//! - [`config`] - Configuration persistence
//! - [`elevation`] - Running ufw with root privileges
//! - [`utils`] - XDG directories and small helpers

#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod elevation;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use config::{FailurePolicy, SyncConfig};
pub use core::error::{Error, Result};
pub use core::reconcile::{ApplySummary, Finding, ReconcileResult, RuleReconciler};
