// PAKER - Package Acquisition and Integrity Core
// Version History - Module Exports

//! # Version History and Rollback
//!
//! Every cache mutation appends a history entry; mutations that replace
//! an existing version first snapshot the prior tree as a compressed
//! archive. Rollback restores a recorded version, checked against the
//! current constraint set unless forced.
//!
//! - `manager`: the append-only history log and its document
//! - `snapshot`: tar.gz snapshot creation, verification, restore
//! - `rollback`: the four rollback strategies and their safety checks

pub mod manager;
pub mod rollback;
pub mod snapshot;

pub use manager::{HistoryManager, HistoryStats};
pub use rollback::{RollbackEngine, RollbackOptions, RollbackResult, RollbackStrategy};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// History and rollback errors
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The history document or a snapshot could not be read or written.
    #[error("I/O failure: {0}")]
    Io(String),

    /// A named package, version, or snapshot does not exist in history.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A snapshot failed its integrity check.
    #[error("Integrity failure: {0}")]
    Integrity(String),

    /// Writing would overwrite an existing document without `force`.
    #[error("Already present: {0}")]
    AlreadyPresent(String),

    /// A rollback violates the current constraint set.
    #[error("Rollback of {package} to {version} violates constraints: {detail}")]
    ConstraintViolation {
        /// Package being rolled back
        package: String,
        /// Target version
        version: String,
        /// What would break
        detail: String,
    },

    /// The cache store refused an operation during rollback.
    #[error(transparent)]
    Cache(#[from] crate::cache::CacheError),
}

impl From<std::io::Error> for HistoryError {
    fn from(e: std::io::Error) -> Self {
        HistoryError::Io(e.to_string())
    }
}

/// Result type for history operations
pub type HistoryResult<T> = Result<T, HistoryError>;

pub(crate) mod history_timestamp {
    //! The history document renders timestamps as
    //! `YYYY-MM-DD HH:MM:SS`.

    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        let naive =
            NaiveDateTime::parse_from_str(&text, FORMAT).map_err(serde::de::Error::custom)?;
        Ok(naive.and_utc())
    }
}

/// One recorded version change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    /// Package whose version changed
    pub package_name: String,
    /// Version before the change (`"current"` for rollbacks of the
    /// active tree)
    pub old_version: String,
    /// Version after the change
    pub new_version: String,
    /// Where the new bytes came from
    pub repository_url: String,
    /// Operator-supplied reason text
    pub reason: String,
    /// The user who performed the change
    pub user: String,
    /// Commit identifier of the package tree, when known
    pub commit_hash: String,
    /// Whether this entry records a rollback
    pub is_rollback: bool,
    /// Archival snapshot of the replaced tree, empty when none exists
    pub backup_path: PathBuf,
    /// Size of the snapshot archive in bytes
    pub backup_size_bytes: u64,
    /// Files captured in the snapshot
    pub affected_files: Vec<String>,
    /// When the change happened
    #[serde(with = "history_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// Whether the entry references a snapshot archive.
    pub fn has_snapshot(&self) -> bool {
        !self.backup_path.as_os_str().is_empty()
    }
}

/// The consulted user-identity environment variable.
pub(crate) fn current_user() -> String {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_document_format() {
        let entry = HistoryEntry {
            package_name: "fmt".into(),
            old_version: "8.1.1".into(),
            new_version: "9.1.0".into(),
            repository_url: "https://example.com/fmt.git".into(),
            reason: "upgrade".into(),
            user: "dev".into(),
            commit_hash: "abc12345".into(),
            is_rollback: false,
            backup_path: PathBuf::new(),
            backup_size_bytes: 0,
            affected_files: vec![],
            timestamp: DateTime::parse_from_rfc3339("2024-03-01T10:20:30Z")
                .unwrap()
                .with_timezone(&Utc),
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["timestamp"], "2024-03-01 10:20:30");

        let back: HistoryEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_has_snapshot() {
        let mut entry = HistoryEntry {
            package_name: "fmt".into(),
            old_version: "".into(),
            new_version: "9.1.0".into(),
            repository_url: "".into(),
            reason: "".into(),
            user: "dev".into(),
            commit_hash: "".into(),
            is_rollback: false,
            backup_path: PathBuf::new(),
            backup_size_bytes: 0,
            affected_files: vec![],
            timestamp: Utc::now(),
        };
        assert!(!entry.has_snapshot());
        entry.backup_path = PathBuf::from("/backups/fmt_8.1.1.tar.gz");
        assert!(entry.has_snapshot());
    }
}
