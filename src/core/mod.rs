//! Core sync functionality
//!
//! - [`fetch`]: Retrieval of the ports and blocklist documents
//! - [`fingerprint`]: Content fingerprints, change detection and their on-disk record
//! - [`reconcile`]: The reset-and-replay sync procedure
//! - [`whitelist`]: Operator-maintained always-allowed addresses
//! - [`ufw`]: The firewall backend
//! - [`lock`]: Cross-process exclusion between sync runs
//! - [`schedule`]: cron entry management
//! - [`error`]: Error types

pub mod error;
pub mod fetch;
pub mod fingerprint;
pub mod lock;
pub mod reconcile;
pub mod schedule;
pub mod ufw;
pub mod whitelist;

#[cfg(test)]
pub mod test_helpers;
