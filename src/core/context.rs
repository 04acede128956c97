// PAKER - Package Acquisition and Integrity Core
// Core - Services Context

//! The owned services context.
//!
//! One `PakerServices` value wires the subsystems together: the async
//! engine moves bytes, the cache store owns package trees and the
//! index, the resolver populates the dependency graph, and the history
//! manager makes every mutation reversible. Callers own the context;
//! `shutdown` tears it down deterministically.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::config::PakerConfig;
use super::PakerResult;
use crate::cache::CacheStore;
use crate::dependency::DependencyResolver;
use crate::history::rollback::{RollbackEngine, RollbackOptions, RollbackResult};
use crate::history::HistoryManager;
use crate::io::IoEngine;

/// The single value owning every Paker subsystem.
pub struct PakerServices {
    config: PakerConfig,
    engine: Arc<IoEngine>,
    cache: Arc<CacheStore>,
    history: Arc<HistoryManager>,
    resolver: Mutex<DependencyResolver>,
}

impl PakerServices {
    /// Construct every subsystem in dependency order.
    pub async fn init(config: PakerConfig) -> PakerResult<Self> {
        let engine = Arc::new(IoEngine::new(config.io.clone()));

        let cache = Arc::new(CacheStore::open(config.cache.clone(), Arc::clone(&engine)).await?);

        let history = Arc::new(HistoryManager::open_with_capacity(
            &config.project_root,
            Arc::clone(&engine),
            config.max_history_entries,
        )?);

        let resolver = DependencyResolver::new(&config.project_root, config.resolver.clone());
        if let Err(e) = resolver.parser().load_cache() {
            log::warn!("parse cache load failed: {}", e);
        }
        // Resolution may also find packages directly in cache roots.
        resolver.add_search_root(cache.path_resolver().root(crate::cache::CacheLocation::UserCache));

        log::info!(
            "paker services initialised for {}",
            config.project_root.display()
        );

        Ok(Self {
            config,
            engine,
            cache,
            history,
            resolver: Mutex::new(resolver),
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &PakerConfig {
        &self.config
    }

    /// The async I/O engine.
    pub fn engine(&self) -> &Arc<IoEngine> {
        &self.engine
    }

    /// The cache store.
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// The history manager.
    pub fn history(&self) -> &Arc<HistoryManager> {
        &self.history
    }

    /// The dependency resolver, behind its serialising lock.
    pub fn resolver(&self) -> &Mutex<DependencyResolver> {
        &self.resolver
    }

    /// Install a package into the cache, link it into the project, and
    /// record the change.
    ///
    /// The source URL comes from the resolver's repository map when not
    /// given explicitly.
    pub async fn install_package(
        &self,
        name: &str,
        version: &str,
        source_url: Option<&str>,
    ) -> PakerResult<()> {
        let url = match source_url {
            Some(url) => url.to_string(),
            None => {
                let resolver = self.resolver.lock().await;
                resolver
                    .repository_url(name)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        crate::dependency::ResolveError::NotFound(name.to_string())
                    })?
            }
        };

        // The version being replaced, if any, gets snapshotted.
        let prior = self.cache.cached_path(name, None).await;
        let prior_version = match &prior {
            Some(path) => path
                .file_name()
                .map(|v| v.to_string_lossy().into_owned())
                .unwrap_or_default(),
            None => String::new(),
        };

        self.cache.install(name, version, &url).await?;
        self.cache
            .link_into_project(name, version, &self.config.project_root)
            .await?;

        if prior_version != version {
            self.history
                .record_version_change(
                    name,
                    &prior_version,
                    version,
                    &url,
                    "install",
                    false,
                    prior.as_deref(),
                )
                .await?;
        }
        Ok(())
    }

    /// Roll a package back to a recorded version, dependency-checked
    /// against the current graph.
    pub async fn rollback_package(
        &self,
        name: &str,
        target_version: &str,
        options: &RollbackOptions,
    ) -> RollbackResult {
        let resolver = self.resolver.lock().await;
        let engine = RollbackEngine::new(
            &self.history,
            &self.cache,
            self.config.project_root.clone(),
        );
        engine
            .rollback_to_version(name, target_version, Some(resolver.graph()), options)
            .await
    }

    /// Resolve the project manifest into the dependency graph.
    pub async fn resolve_project(&self) -> PakerResult<()> {
        let mut resolver = self.resolver.lock().await;
        resolver.resolve_project().await?;
        Ok(())
    }

    /// The project root this context operates on.
    pub fn project_root(&self) -> &Path {
        &self.config.project_root
    }

    /// Tear the context down: persist the parse cache and stop the
    /// engine's workers.
    pub async fn shutdown(self) {
        {
            let resolver = self.resolver.lock().await;
            if let Err(e) = resolver.parser().save_cache() {
                log::warn!("parse cache save failed: {}", e);
            }
        }
        self.engine.shutdown().await;
        log::info!("paker services shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;

    async fn services() -> (tempfile::TempDir, PakerServices) {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        std::fs::create_dir_all(&project).unwrap();

        let mut config = PakerConfig::for_project(&project);
        config.cache = CacheConfig {
            user_cache_root: Some(dir.path().join("user-cache")),
            global_cache_root: Some(dir.path().join("global-cache")),
            project_root: project,
            ..Default::default()
        };

        let services = PakerServices::init(config).await.unwrap();
        (dir, services)
    }

    #[tokio::test]
    async fn test_init_and_shutdown() {
        let (_dir, services) = services().await;
        assert!(services.cache().package_list().await.is_empty());
        services.shutdown().await;
    }

    #[tokio::test]
    async fn test_install_records_history_and_links() {
        let (dir, services) = services().await;

        let source = dir.path().join("src-fmt");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("fmt.h"), "// fmt").unwrap();

        services
            .install_package("fmt", "8.1.1", Some(&source.to_string_lossy()))
            .await
            .unwrap();

        assert!(services.cache().is_cached("fmt", Some("8.1.1")).await);
        let entry = services.history().last_entry_for("fmt").unwrap();
        assert_eq!(entry.new_version, "8.1.1");
        assert_eq!(entry.old_version, "");
        assert!(services
            .cache()
            .project_package_path("fmt", services.project_root())
            .await
            .is_some());

        services.shutdown().await;
    }

    #[tokio::test]
    async fn test_upgrade_snapshots_prior_version() {
        let (dir, services) = services().await;

        let source = dir.path().join("src-fmt");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("fmt.h"), "// fmt v8").unwrap();
        services
            .install_package("fmt", "8.1.1", Some(&source.to_string_lossy()))
            .await
            .unwrap();

        std::fs::write(source.join("fmt.h"), "// fmt v9").unwrap();
        services
            .install_package("fmt", "9.1.0", Some(&source.to_string_lossy()))
            .await
            .unwrap();

        let entry = services.history().last_entry_for("fmt").unwrap();
        assert_eq!(entry.old_version, "8.1.1");
        assert_eq!(entry.new_version, "9.1.0");
        assert!(entry.has_snapshot());
        assert!(entry.backup_path.is_file());

        services.shutdown().await;
    }

    #[tokio::test]
    async fn test_install_unknown_name_without_url_fails() {
        let (_dir, services) = services().await;
        let result = services
            .install_package("absolutely-unknown", "1.0.0", None)
            .await;
        assert!(result.is_err());
        services.shutdown().await;
    }
}
