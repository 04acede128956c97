// PAKER - Package Acquisition and Integrity Core
// Version History - Rollback Strategies

//! Rollback execution over the history log and the cache store.
//!
//! Four strategies: single package, all packages mutated since a
//! cutoff, dependency-aware (refuses when dependents' constraints would
//! break), and selective (operator-named set). Every rollback passes a
//! four-point safety check unless forced: the target exists in history,
//! it satisfies the current constraint set, any referenced snapshot
//! verifies, and no dependent's constraint is violated.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use super::manager::HistoryManager;
use super::snapshot;
use super::{HistoryError, HistoryResult};
use crate::cache::CacheStore;
use crate::dependency::graph::DependencyGraph;
use crate::dependency::version::parse_version;

/// How a rollback selects its targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RollbackStrategy {
    /// Restore one package
    #[default]
    SinglePackage,
    /// Restore every package mutated since a cutoff
    AllPackages,
    /// Restore one package after checking its dependents transitively
    DependencyAware,
    /// Restore an operator-named set
    Selective,
}

/// Rollback options
#[derive(Debug, Clone)]
pub struct RollbackOptions {
    /// Selected strategy (informational; the entry points imply it)
    pub strategy: RollbackStrategy,
    /// Snapshot the current tree before restoring
    pub create_backup: bool,
    /// Check dependent constraints before restoring
    pub validate_dependencies: bool,
    /// Operator-supplied reason recorded in history
    pub reason: String,
    /// Skip every safety check
    pub force: bool,
}

impl Default for RollbackOptions {
    fn default() -> Self {
        Self {
            strategy: RollbackStrategy::SinglePackage,
            create_backup: true,
            validate_dependencies: true,
            reason: String::new(),
            force: false,
        }
    }
}

/// Aggregated outcome of a rollback
#[derive(Debug, Default)]
pub struct RollbackResult {
    /// Whether every step succeeded
    pub success: bool,
    /// Operator-facing summary
    pub message: String,
    /// Packages restored
    pub rolled_back_packages: Vec<String>,
    /// Packages that failed, with the per-step failure
    pub failed_packages: Vec<(String, String)>,
    /// Snapshot taken of the pre-rollback tree, when one was made
    pub backup_location: Option<PathBuf>,
    /// Files captured by that snapshot
    pub total_files_affected: usize,
    /// Wall-clock duration of the whole operation
    pub duration: Duration,
}

impl RollbackResult {
    fn finish(mut self, started: Instant) -> Self {
        self.duration = started.elapsed();
        self.success = self.failed_packages.is_empty() && !self.rolled_back_packages.is_empty();
        if self.message.is_empty() {
            self.message = format!(
                "{} package(s) rolled back, {} failed",
                self.rolled_back_packages.len(),
                self.failed_packages.len()
            );
        }
        self
    }
}

/// Executes rollbacks against a history log and cache store.
pub struct RollbackEngine<'a> {
    history: &'a HistoryManager,
    store: &'a CacheStore,
    project_root: PathBuf,
}

impl<'a> RollbackEngine<'a> {
    /// Create a rollback engine for one project.
    pub fn new(history: &'a HistoryManager, store: &'a CacheStore, project_root: PathBuf) -> Self {
        Self {
            history,
            store,
            project_root,
        }
    }

    /// The four-point safety check.
    async fn safety_check(
        &self,
        package: &str,
        target_version: &str,
        graph: Option<&DependencyGraph>,
        options: &RollbackOptions,
    ) -> HistoryResult<()> {
        // (i) the target version exists in history
        let known = self.history.rollbackable_versions(package);
        if !known.iter().any(|v| v == target_version) {
            return Err(HistoryError::NotFound(format!(
                "{}@{} does not appear in history",
                package, target_version
            )));
        }

        // (ii) + (iv) the target satisfies the current constraint set
        if options.validate_dependencies {
            if let (Some(graph), Ok(version)) = (graph, parse_version(target_version)) {
                for dependent in graph.dependents_of(package) {
                    let Some(node) = graph.node(&dependent) else {
                        continue;
                    };
                    if let Some(constraint) = node.constraints.get(package) {
                        if !constraint.satisfies(&version) {
                            return Err(HistoryError::ConstraintViolation {
                                package: package.to_string(),
                                version: target_version.to_string(),
                                detail: format!("{} requires {}", dependent, constraint),
                            });
                        }
                    }
                }
            }
        }

        // (iii) any referenced snapshot passes its integrity check
        if let Some(entry) = self.history.snapshot_entry_for(package, target_version) {
            let archive = entry.backup_path.clone();
            tokio::task::spawn_blocking(move || snapshot::verify_snapshot(&archive))
                .await
                .map_err(|e| HistoryError::Io(e.to_string()))??;
        }

        Ok(())
    }

    /// Make the target version's tree present in the cache.
    async fn materialise(&self, package: &str, target_version: &str) -> HistoryResult<()> {
        if self.store.is_cached(package, Some(target_version)).await {
            return Ok(());
        }

        // Prefer the archival snapshot of that version.
        if let Some(entry) = self.history.snapshot_entry_for(package, target_version) {
            let staging = tempfile::tempdir().map_err(|e| HistoryError::Io(e.to_string()))?;
            let restored = staging.path().join("restored");
            let archive = entry.backup_path.clone();
            let restored_clone = restored.clone();
            tokio::task::spawn_blocking(move || {
                snapshot::restore_snapshot(&archive, &restored_clone)
            })
            .await
            .map_err(|e| HistoryError::Io(e.to_string()))??;

            self.store
                .install(package, target_version, &restored.to_string_lossy())
                .await?;
            return Ok(());
        }

        // Fall back to reinstalling the recorded prior version.
        let url = self
            .history
            .package_history(package)
            .iter()
            .rev()
            .find(|e| e.new_version == target_version && !e.repository_url.is_empty())
            .map(|e| e.repository_url.clone());
        match url {
            Some(url) => {
                self.store.install(package, target_version, &url).await?;
                Ok(())
            }
            None => Err(HistoryError::NotFound(format!(
                "no snapshot or repository URL for {}@{}",
                package, target_version
            ))),
        }
    }

    async fn rollback_one(
        &self,
        package: &str,
        target_version: &str,
        graph: Option<&DependencyGraph>,
        options: &RollbackOptions,
    ) -> HistoryResult<super::HistoryEntry> {
        if !options.force {
            self.safety_check(package, target_version, graph, options)
                .await?;
        } else {
            log::warn!(
                "forced rollback of {} to {}: safety checks skipped",
                package,
                target_version
            );
        }

        let prior_tree = self.store.cached_path(package, None).await;

        self.materialise(package, target_version).await?;

        let repository_url = self
            .store
            .package_list()
            .await
            .iter()
            .find(|e| e.package_name == package && e.version == target_version)
            .map(|e| e.repository_url.clone())
            .unwrap_or_default();

        // Point the project at the restored version.
        self.store
            .link_into_project(package, target_version, &self.project_root)
            .await?;

        let entry = self
            .history
            .record_version_change(
                package,
                "current",
                target_version,
                &repository_url,
                &options.reason,
                true,
                options
                    .create_backup
                    .then_some(prior_tree.as_deref())
                    .flatten(),
            )
            .await?;

        log::info!("rolled back {} to {}", package, target_version);
        Ok(entry)
    }

    /// Roll one package back to a recorded version.
    pub async fn rollback_to_version(
        &self,
        package: &str,
        target_version: &str,
        graph: Option<&DependencyGraph>,
        options: &RollbackOptions,
    ) -> RollbackResult {
        let started = Instant::now();
        let mut result = RollbackResult::default();

        match self
            .rollback_one(package, target_version, graph, options)
            .await
        {
            Ok(entry) => {
                result.rolled_back_packages.push(package.to_string());
                if entry.has_snapshot() {
                    result.backup_location = Some(entry.backup_path.clone());
                    result.total_files_affected = entry.affected_files.len();
                }
            }
            Err(e) => result.failed_packages.push((package.to_string(), e.to_string())),
        }

        result.finish(started)
    }

    /// Roll one package back to the version before its last change.
    pub async fn rollback_to_previous(
        &self,
        package: &str,
        graph: Option<&DependencyGraph>,
        options: &RollbackOptions,
    ) -> RollbackResult {
        let started = Instant::now();
        let previous = self
            .history
            .package_history(package)
            .iter()
            .rev()
            .map(|e| e.old_version.clone())
            .find(|v| !v.is_empty() && v != "current");

        match previous {
            Some(version) => {
                self.rollback_to_version(package, &version, graph, options)
                    .await
            }
            None => {
                let mut result = RollbackResult::default();
                result.failed_packages.push((
                    package.to_string(),
                    format!("no previous version recorded for {}", package),
                ));
                result.finish(started)
            }
        }
    }

    /// Roll back every package mutated at or after `cutoff`.
    pub async fn rollback_all(
        &self,
        cutoff: DateTime<Utc>,
        graph: Option<&DependencyGraph>,
        options: &RollbackOptions,
    ) -> RollbackResult {
        let started = Instant::now();
        let mut result = RollbackResult::default();

        // The version active at the cutoff is the replaced version of
        // the earliest later entry.
        let mut seen = HashSet::new();
        let targets: Vec<(String, String)> = self
            .history
            .all_entries()
            .into_iter()
            .filter(|e| e.timestamp >= cutoff)
            .filter(|e| seen.insert(e.package_name.clone()))
            .filter(|e| !e.old_version.is_empty() && e.old_version != "current")
            .map(|e| (e.package_name.clone(), e.old_version.clone()))
            .collect();

        for (package, version) in targets {
            match self.rollback_one(&package, &version, graph, options).await {
                Ok(_) => result.rolled_back_packages.push(package),
                Err(e) => result.failed_packages.push((package, e.to_string())),
            }
        }

        result.finish(started)
    }

    /// Roll back to the state at a timestamp.
    pub async fn rollback_to_timestamp(
        &self,
        timestamp: DateTime<Utc>,
        graph: Option<&DependencyGraph>,
        options: &RollbackOptions,
    ) -> RollbackResult {
        self.rollback_all(timestamp, graph, options).await
    }

    /// Dependency-aware rollback: refuse when the transitive dependent
    /// set would see its constraints violated.
    pub async fn rollback_dependency_aware(
        &self,
        package: &str,
        target_version: &str,
        graph: &DependencyGraph,
        options: &RollbackOptions,
    ) -> RollbackResult {
        let started = Instant::now();
        let mut result = RollbackResult::default();

        let affected = transitive_dependents(graph, package);
        if let Ok(version) = parse_version(target_version) {
            for dependent in &affected {
                let Some(node) = graph.node(dependent) else {
                    continue;
                };
                if let Some(constraint) = node.constraints.get(package) {
                    if !constraint.satisfies(&version) && !options.force {
                        result.failed_packages.push((
                            package.to_string(),
                            format!(
                                "dependent {} requires {} {}",
                                dependent, package, constraint
                            ),
                        ));
                        result.message = format!(
                            "rollback refused: {} dependent package(s) would break",
                            result.failed_packages.len()
                        );
                        return result.finish(started);
                    }
                }
            }
        }
        if !affected.is_empty() {
            log::info!(
                "rollback of {} affects {} dependent package(s): {:?}",
                package,
                affected.len(),
                affected
            );
        }

        match self
            .rollback_one(package, target_version, Some(graph), options)
            .await
        {
            Ok(entry) => {
                result.rolled_back_packages.push(package.to_string());
                if entry.has_snapshot() {
                    result.backup_location = Some(entry.backup_path.clone());
                    result.total_files_affected = entry.affected_files.len();
                }
            }
            Err(e) => result.failed_packages.push((package.to_string(), e.to_string())),
        }

        result.finish(started)
    }

    /// Roll back an operator-named set of `(package, version)` pairs.
    pub async fn rollback_selective(
        &self,
        selections: &[(String, String)],
        graph: Option<&DependencyGraph>,
        options: &RollbackOptions,
    ) -> RollbackResult {
        let started = Instant::now();
        let mut result = RollbackResult::default();

        for (package, version) in selections {
            match self.rollback_one(package, version, graph, options).await {
                Ok(_) => result.rolled_back_packages.push(package.clone()),
                Err(e) => result.failed_packages.push((package.clone(), e.to_string())),
            }
        }

        result.finish(started)
    }

    /// Forced rollback that skips every safety check.
    pub async fn emergency_rollback(&self, package: &str, target_version: &str) -> RollbackResult {
        log::warn!("emergency rollback of {} to {}", package, target_version);
        let options = RollbackOptions {
            force: true,
            validate_dependencies: false,
            reason: "emergency rollback".to_string(),
            ..Default::default()
        };
        self.rollback_to_version(package, target_version, None, &options)
            .await
    }
}

/// Every package that transitively depends on `package`.
fn transitive_dependents(graph: &DependencyGraph, package: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut queue = vec![package.to_string()];
    while let Some(current) = queue.pop() {
        for dependent in graph.dependents_of(&current) {
            if seen.insert(dependent.clone()) {
                queue.push(dependent);
            }
        }
    }
    let mut result: Vec<String> = seen.into_iter().collect();
    result.sort();
    result
}
