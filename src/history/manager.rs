// PAKER - Package Acquisition and Integrity Core
// Version History - History Manager

//! The append-only version history log.
//!
//! The log persists as one JSON document under the project's `.paker`
//! directory. Appends happen under a single lock; reads take a
//! snapshot. Compaction removes the oldest entries (and their snapshot
//! archives) once the configured cap is exceeded.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::snapshot;
use super::{current_user, HistoryEntry, HistoryError, HistoryResult};
use crate::io::IoEngine;

/// Default cap on retained history entries.
const DEFAULT_MAX_ENTRIES: usize = 100;

#[derive(Debug, Serialize, Deserialize)]
struct HistoryDocument {
    version: String,
    last_updated: String,
    history: Vec<HistoryEntry>,
}

/// History statistics
#[derive(Debug, Clone, Default)]
pub struct HistoryStats {
    /// Entries currently retained
    pub total_entries: usize,
    /// Distinct packages touched
    pub total_packages: usize,
    /// Entries recording rollbacks
    pub total_rollbacks: usize,
    /// Timestamp of the oldest retained entry
    pub first_entry: Option<DateTime<Utc>>,
    /// Timestamp of the newest entry
    pub last_entry: Option<DateTime<Utc>>,
    /// Bytes across all snapshot archives
    pub total_backup_size_bytes: u64,
}

/// Owns the history log and its snapshot directory.
pub struct HistoryManager {
    history_path: PathBuf,
    backup_dir: PathBuf,
    entries: RwLock<Vec<HistoryEntry>>,
    max_entries: usize,
    engine: Arc<IoEngine>,
}

impl HistoryManager {
    /// Open (or initialise) the history log for a project.
    pub fn open(project_root: &Path, engine: Arc<IoEngine>) -> HistoryResult<Self> {
        Self::open_with_capacity(project_root, engine, DEFAULT_MAX_ENTRIES)
    }

    /// Open with an explicit entry cap.
    pub fn open_with_capacity(
        project_root: &Path,
        engine: Arc<IoEngine>,
        max_entries: usize,
    ) -> HistoryResult<Self> {
        let paker_dir = project_root.join(".paker");
        std::fs::create_dir_all(&paker_dir)?;
        let history_path = paker_dir.join("version_history.json");
        let backup_dir = paker_dir.join("backups");
        std::fs::create_dir_all(&backup_dir)?;

        let entries = if history_path.is_file() {
            let json = std::fs::read_to_string(&history_path)?;
            let document: HistoryDocument = serde_json::from_str(&json)
                .map_err(|e| HistoryError::Io(format!("parse history document: {}", e)))?;
            document.history
        } else {
            Vec::new()
        };

        log::info!(
            "history opened with {} entries at {}",
            entries.len(),
            history_path.display()
        );

        Ok(Self {
            history_path,
            backup_dir,
            entries: RwLock::new(entries),
            max_entries: max_entries.max(1),
            engine,
        })
    }

    /// The directory snapshot archives live in.
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    async fn save(&self, entries: &[HistoryEntry]) -> HistoryResult<()> {
        let document = HistoryDocument {
            version: "1.0".to_string(),
            last_updated: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            history: entries.to_vec(),
        };
        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| HistoryError::Io(format!("serialise history: {}", e)))?;
        let result = self
            .engine
            .write_file(self.history_path.clone(), json)
            .join()
            .await;
        if let Some(error) = result.error {
            return Err(HistoryError::Io(error.to_string()));
        }
        Ok(())
    }

    fn snapshot_path(&self, package: &str, version: &str) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        self.backup_dir
            .join(format!("{}_{}_{}.tar.gz", package, version, stamp))
    }

    /// Record one version change.
    ///
    /// When `prior_tree` names the directory being replaced, a snapshot
    /// of it is archived first and referenced by the entry.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_version_change(
        &self,
        package: &str,
        old_version: &str,
        new_version: &str,
        repository_url: &str,
        reason: &str,
        is_rollback: bool,
        prior_tree: Option<&Path>,
    ) -> HistoryResult<HistoryEntry> {
        let (backup_path, backup_size_bytes, affected_files) = match prior_tree {
            Some(tree) if tree.is_dir() && !old_version.is_empty() => {
                let archive = self.snapshot_path(package, old_version);
                let tree = tree.to_path_buf();
                let archive_clone = archive.clone();
                let (size, files) =
                    tokio::task::spawn_blocking(move || {
                        snapshot::create_snapshot(&tree, &archive_clone)
                    })
                    .await
                    .map_err(|e| HistoryError::Io(e.to_string()))??;
                (archive, size, files)
            }
            _ => (PathBuf::new(), 0, Vec::new()),
        };

        let commit_hash = prior_tree
            .map(commit_of_tree)
            .unwrap_or_default();

        let entry = HistoryEntry {
            package_name: package.to_string(),
            old_version: old_version.to_string(),
            new_version: new_version.to_string(),
            repository_url: repository_url.to_string(),
            reason: reason.to_string(),
            user: current_user(),
            commit_hash,
            is_rollback,
            backup_path,
            backup_size_bytes,
            affected_files,
            timestamp: Utc::now(),
        };

        let snapshot_entries = {
            let mut entries = self.entries.write();
            entries.push(entry.clone());
            self.compact_locked(&mut entries);
            entries.clone()
        };
        self.save(&snapshot_entries).await?;

        log::info!(
            "recorded {} {} -> {}{}",
            package,
            if old_version.is_empty() {
                "(new)"
            } else {
                old_version
            },
            new_version,
            if is_rollback { " (rollback)" } else { "" }
        );
        Ok(entry)
    }

    fn compact_locked(&self, entries: &mut Vec<HistoryEntry>) {
        while entries.len() > self.max_entries {
            let removed = entries.remove(0);
            if removed.has_snapshot() {
                if let Err(e) = std::fs::remove_file(&removed.backup_path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        log::warn!(
                            "failed to remove compacted snapshot {}: {}",
                            removed.backup_path.display(),
                            e
                        );
                    }
                }
            }
            log::debug!(
                "compacted history entry {}@{}",
                removed.package_name,
                removed.new_version
            );
        }
    }

    /// Remove the oldest entries beyond `keep`, with their snapshots.
    pub async fn cleanup_old_history(&self, keep: usize) -> HistoryResult<usize> {
        let (removed, snapshot_entries) = {
            let mut entries = self.entries.write();
            let before = entries.len();
            while entries.len() > keep.max(1) {
                let removed = entries.remove(0);
                if removed.has_snapshot() {
                    let _ = std::fs::remove_file(&removed.backup_path);
                }
            }
            (before - entries.len(), entries.clone())
        };
        if removed > 0 {
            self.save(&snapshot_entries).await?;
        }
        Ok(removed)
    }

    /// All entries, oldest first.
    pub fn all_entries(&self) -> Vec<HistoryEntry> {
        self.entries.read().clone()
    }

    /// Entries for one package, oldest first.
    pub fn package_history(&self, package: &str) -> Vec<HistoryEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.package_name == package)
            .cloned()
            .collect()
    }

    /// The most recent `count` entries, newest first.
    pub fn recent_history(&self, count: usize) -> Vec<HistoryEntry> {
        let entries = self.entries.read();
        entries.iter().rev().take(count).cloned().collect()
    }

    /// Versions of a package that appear in history and can be rolled
    /// back to.
    pub fn rollbackable_versions(&self, package: &str) -> Vec<String> {
        let mut versions = Vec::new();
        for entry in self.entries.read().iter() {
            for version in [&entry.old_version, &entry.new_version] {
                if !version.is_empty()
                    && version.as_str() != "current"
                    && entry.package_name == package
                    && !versions.contains(version)
                {
                    versions.push(version.clone());
                }
            }
        }
        versions
    }

    /// The last recorded entry for a package.
    pub fn last_entry_for(&self, package: &str) -> Option<HistoryEntry> {
        self.entries
            .read()
            .iter()
            .rev()
            .find(|e| e.package_name == package)
            .cloned()
    }

    /// The most recent entry whose replaced version matches `version`
    /// and which carries a snapshot.
    pub fn snapshot_entry_for(&self, package: &str, version: &str) -> Option<HistoryEntry> {
        self.entries
            .read()
            .iter()
            .rev()
            .find(|e| {
                e.package_name == package && e.old_version == version && e.has_snapshot()
            })
            .cloned()
    }

    /// Export the entire history as a single document.
    pub async fn export_history(&self, path: &Path, overwrite: bool) -> HistoryResult<usize> {
        if path.exists() && !overwrite {
            return Err(HistoryError::AlreadyPresent(path.display().to_string()));
        }
        let entries = self.all_entries();
        let document = HistoryDocument {
            version: "1.0".to_string(),
            last_updated: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            history: entries.clone(),
        };
        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| HistoryError::Io(e.to_string()))?;
        let result = self.engine.write_file(path.to_path_buf(), json).join().await;
        if let Some(error) = result.error {
            return Err(HistoryError::Io(error.to_string()));
        }
        Ok(entries.len())
    }

    /// Import entries from an exported document. Imports append; they
    /// never overwrite existing entries.
    pub async fn import_history(&self, path: &Path) -> HistoryResult<usize> {
        let result = self.engine.read_file(path.to_path_buf(), true).join().await;
        if let Some(error) = result.error {
            return Err(HistoryError::Io(error.to_string()));
        }
        let text = result.text.unwrap_or_default();
        let document: HistoryDocument = serde_json::from_str(&text)
            .map_err(|e| HistoryError::Io(format!("parse import: {}", e)))?;

        let (imported, snapshot_entries) = {
            let mut entries = self.entries.write();
            let mut imported = 0;
            for entry in document.history {
                if !entries.contains(&entry) {
                    entries.push(entry);
                    imported += 1;
                }
            }
            entries.sort_by_key(|e| e.timestamp);
            (imported, entries.clone())
        };
        if imported > 0 {
            self.save(&snapshot_entries).await?;
        }
        log::info!("imported {} history entries from {}", imported, path.display());
        Ok(imported)
    }

    /// History statistics.
    pub fn statistics(&self) -> HistoryStats {
        let entries = self.entries.read();
        let mut packages: Vec<&str> = entries.iter().map(|e| e.package_name.as_str()).collect();
        packages.sort_unstable();
        packages.dedup();

        HistoryStats {
            total_entries: entries.len(),
            total_packages: packages.len(),
            total_rollbacks: entries.iter().filter(|e| e.is_rollback).count(),
            first_entry: entries.first().map(|e| e.timestamp),
            last_entry: entries.last().map(|e| e.timestamp),
            total_backup_size_bytes: entries.iter().map(|e| e.backup_size_bytes).sum(),
        }
    }

    /// Verify every snapshot still referenced by the log.
    ///
    /// Returns the entries whose snapshot failed verification.
    pub fn validate_history_integrity(&self) -> Vec<HistoryEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.has_snapshot() && snapshot::verify_snapshot(&e.backup_path).is_err())
            .cloned()
            .collect()
    }
}

/// Read the commit identifier of a package tree from `.git/HEAD`.
fn commit_of_tree(tree: &Path) -> String {
    let head = tree.join(".git/HEAD");
    match std::fs::read_to_string(&head) {
        Ok(contents) => {
            let line = contents.lines().next().unwrap_or("").trim();
            if let Some(reference) = line.strip_prefix("ref:") {
                reference.trim().rsplit('/').next().unwrap_or("").to_string()
            } else {
                line.chars().take(8).collect()
            }
        }
        Err(_) => String::new(),
    }
}
