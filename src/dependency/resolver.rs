// PAKER - Package Acquisition and Integrity Core
// Dependency Management - Dependency Resolver

//! The dependency resolver: seeds the graph from an explicit request or
//! the project manifest, drives the incremental parser over unresolved
//! nodes, and selects versions satisfying the accumulated constraints.
//!
//! Repository lookup is a name-to-URL map seeded from built-in
//! defaults, extended by the project manifest's `remotes` list, and
//! mutable at runtime.

use once_cell::sync::Lazy;
use semver::Version;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::graph::{DependencyGraph, DependencyNode, GraphError};
use super::parser::{IncrementalParser, ParseConfig, ParseError, ParseStrategy};
use super::version::{latest_satisfying, VersionConstraint};
use crate::conflict::Conflict;

/// Resolver errors
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A new install was requested for a name with no repository URL.
    #[error("No repository found for package: {0}")]
    NotFound(String),

    /// The resolver surfaced unresolved version conflicts.
    #[error("{} version conflict(s) detected", .0.len())]
    Conflict(Vec<Conflict>),

    /// No known version satisfies the accumulated constraints.
    #[error("No version of {package} satisfies: {constraints}")]
    ConstraintUnsatisfiable {
        /// The package whose constraints cannot be met
        package: String,
        /// Rendered constraint list
        constraints: String,
    },

    /// Manifest parsing failed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A graph operation failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The project manifest could not be read or written.
    #[error("Project manifest error: {0}")]
    Manifest(String),
}

/// Result type for resolver operations
pub type ResolveResult<T> = Result<T, ResolveError>;

/// Resolver configuration
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Route parsing through the incremental cache
    pub incremental: bool,
    /// Parser configuration
    pub parse: ParseConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            incremental: true,
            parse: ParseConfig::default(),
        }
    }
}

static BUILTIN_REPOSITORIES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("fmt", "https://github.com/fmtlib/fmt.git"),
        ("spdlog", "https://github.com/gabime/spdlog.git"),
        ("nlohmann-json", "https://github.com/nlohmann/json.git"),
        ("catch2", "https://github.com/catchorg/Catch2.git"),
        ("googletest", "https://github.com/google/googletest.git"),
        ("benchmark", "https://github.com/google/benchmark.git"),
        ("zlib", "https://github.com/madler/zlib.git"),
        ("boost", "https://github.com/boostorg/boost.git"),
    ])
});

/// One remote entry of the project manifest
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remote {
    /// Package name
    pub name: String,
    /// Repository URL
    pub url: String,
}

/// The dependency resolver.
pub struct DependencyResolver {
    graph: DependencyGraph,
    parser: IncrementalParser,
    repositories: HashMap<String, String>,
    known_versions: HashMap<String, Vec<Version>>,
    incremental: bool,
    project_root: PathBuf,
}

impl DependencyResolver {
    /// Create a resolver rooted at a project directory.
    pub fn new(project_root: impl Into<PathBuf>, config: ResolverConfig) -> Self {
        let project_root = project_root.into();
        let parser = IncrementalParser::new(config.parse, project_root.join(".paker/cache"));
        parser.add_search_root(project_root.join(".paker/links"));
        parser.add_search_root(project_root.join("packages"));

        let repositories = BUILTIN_REPOSITORIES
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Self {
            graph: DependencyGraph::new(),
            parser,
            repositories,
            known_versions: HashMap::new(),
            incremental: config.incremental,
            project_root,
        }
    }

    /// The resolver's project root.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// The dependency graph.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Mutable access to the dependency graph.
    pub fn graph_mut(&mut self) -> &mut DependencyGraph {
        &mut self.graph
    }

    /// The incremental parser.
    pub fn parser(&self) -> &IncrementalParser {
        &self.parser
    }

    /// Add a directory under which package trees are searched.
    pub fn add_search_root(&self, root: impl Into<PathBuf>) {
        self.parser.add_search_root(root);
    }

    /// Toggle routing through the parse cache.
    pub fn set_incremental(&mut self, enabled: bool) {
        self.incremental = enabled;
        log::info!(
            "incremental parsing {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    /// Whether resolution routes through the parse cache.
    pub fn is_incremental(&self) -> bool {
        self.incremental
    }

    /// Register or replace a repository URL.
    pub fn add_repository(&mut self, name: impl Into<String>, url: impl Into<String>) {
        self.repositories.insert(name.into(), url.into());
    }

    /// Replace the whole repository map.
    pub fn set_repositories(&mut self, repositories: HashMap<String, String>) {
        self.repositories = repositories;
    }

    /// The repository URL for a package, if any.
    pub fn repository_url(&self, name: &str) -> Option<&str> {
        self.repositories.get(name).map(String::as_str)
    }

    /// Record versions known to exist for a package.
    pub fn add_known_versions(&mut self, name: impl Into<String>, versions: Vec<Version>) {
        let slot = self.known_versions.entry(name.into()).or_default();
        for version in versions {
            if !slot.contains(&version) {
                slot.push(version);
            }
        }
        slot.sort();
    }

    /// Versions known to exist for a package.
    pub fn known_versions(&self, name: &str) -> &[Version] {
        self.known_versions
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Resolve one package and its transitive dependencies into the
    /// graph.
    ///
    /// A name with no repository URL fails with `NotFound` unless the
    /// package is already present on disk.
    pub async fn resolve_package(
        &mut self,
        name: &str,
        constraint: Option<&str>,
    ) -> ResolveResult<()> {
        log::info!(
            "resolving package {}{}",
            name,
            constraint.map(|c| format!(" ({})", c)).unwrap_or_default()
        );

        let installed = self.parser.locate_package(name, None).is_some();
        let repository = self.repositories.get(name).cloned();
        if repository.is_none() && !installed {
            return Err(ResolveError::NotFound(name.to_string()));
        }

        if !self.graph.has_node(name) {
            let mut node = DependencyNode::new(name);
            node.repository = repository;
            self.graph.add_node(node);
        }
        if let Some(text) = constraint {
            // The seed's requirement participates in version selection.
            if let Ok(parsed) = VersionConstraint::parse(text) {
                if let Some(version) = parsed.version.clone() {
                    self.add_known_versions(name, vec![version]);
                }
            }
        }

        self.resolve_pending().await?;
        self.surface_conflicts()?;
        Ok(())
    }

    /// Resolve the project's top-level manifest (`paker.json`).
    pub async fn resolve_project(&mut self) -> ResolveResult<()> {
        let manifest_path = self.project_root.join("paker.json");
        let bytes = std::fs::read(&manifest_path).map_err(|e| {
            ResolveError::Manifest(format!("read {}: {}", manifest_path.display(), e))
        })?;
        let document: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| ResolveError::Manifest(e.to_string()))?;

        if let Some(remotes) = document.get("remotes").and_then(|r| r.as_array()) {
            for remote in remotes {
                if let Ok(remote) = serde_json::from_value::<Remote>(remote.clone()) {
                    self.add_repository(remote.name, remote.url);
                }
            }
        }

        if let Some(dependencies) = document.get("dependencies").and_then(|d| d.as_object()) {
            let requested: Vec<(String, String)> = dependencies
                .iter()
                .map(|(name, value)| {
                    (
                        name.clone(),
                        value.as_str().unwrap_or("*").to_string(),
                    )
                })
                .collect();
            for (name, constraint) in requested {
                self.resolve_package(&name, Some(&constraint)).await?;
            }
        }

        Ok(())
    }

    /// Drive the parser over every unparsed node with an on-disk tree
    /// until none remain.
    async fn resolve_pending(&mut self) -> ResolveResult<()> {
        let mut attempted: HashSet<String> = HashSet::new();

        loop {
            let pending: Vec<String> = self
                .graph
                .nodes()
                .filter(|n| !n.is_parsed() && !attempted.contains(&n.name))
                .map(|n| n.name.clone())
                .filter(|name| self.parser.locate_package(name, None).is_some())
                .collect();

            if pending.is_empty() {
                break;
            }

            for name in &pending {
                attempted.insert(name.clone());
                if self.incremental {
                    self.parser
                        .parse_package(&mut self.graph, name, None)
                        .await?;
                } else {
                    self.parser
                        .parse_package_with_strategy(
                            &mut self.graph,
                            name,
                            None,
                            ParseStrategy::FullParse,
                        )
                        .await?;
                }
            }
        }

        // Backfill repository URLs for nodes discovered during parsing.
        let names = self.graph.node_names();
        for name in names {
            if let Some(url) = self.repositories.get(&name).cloned() {
                if let Some(node) = self.graph.node_mut(&name) {
                    if node.repository.is_none() {
                        node.repository = Some(url);
                    }
                }
            }
        }

        Ok(())
    }

    fn surface_conflicts(&self) -> ResolveResult<()> {
        let detector = crate::conflict::ConflictDetector::new(&self.graph);
        let conflicts = detector.detect_version_conflicts(&self.known_versions);
        if !conflicts.is_empty() {
            return Err(ResolveError::Conflict(conflicts));
        }
        Ok(())
    }

    /// Every constraint targeting `name`, with the requiring package.
    pub fn constraints_on(&self, name: &str) -> Vec<(String, VersionConstraint)> {
        self.graph
            .nodes()
            .filter_map(|node| {
                node.constraints
                    .get(name)
                    .map(|c| (node.name.clone(), c.clone()))
            })
            .collect()
    }

    /// Pick the highest known version of `name` satisfying every
    /// constraint in the graph.
    pub fn select_version(&self, name: &str) -> ResolveResult<Version> {
        let constraints: Vec<VersionConstraint> = self
            .constraints_on(name)
            .into_iter()
            .map(|(_, c)| c)
            .collect();

        let candidates = self.known_versions(name);
        match latest_satisfying(candidates.iter(), &constraints) {
            Some(version) => Ok(version),
            None => Err(ResolveError::ConstraintUnsatisfiable {
                package: name.to_string(),
                constraints: constraints
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    /// Check the resolved graph: acyclic, with every dependency either
    /// present or fetchable.
    pub fn validate(&self) -> ResolveResult<()> {
        let cycles = self.graph.detect_cycles();
        if !cycles.is_empty() {
            log::error!("circular dependencies detected: {:?}", cycles);
            return Err(ResolveError::Graph(GraphError::CycleDetected(
                cycles.iter().map(|c| c.len()).sum(),
            )));
        }

        for node in self.graph.nodes() {
            for dep in &node.dependencies {
                let present = self
                    .graph
                    .node(dep)
                    .map(|n| n.installed)
                    .unwrap_or(false);
                if !present && !self.repositories.contains_key(dep) {
                    log::warn!("dependency {} of {} has no repository", dep, node.name);
                }
            }
        }
        Ok(())
    }

    /// Write the resolved dependency set and remotes back to a project
    /// manifest document.
    pub fn save_manifest(&self, path: &Path) -> ResolveResult<()> {
        let mut dependencies = serde_json::Map::new();
        for node in self.graph.nodes() {
            let version = node
                .version
                .as_ref()
                .map(|v| format!("={}", v))
                .unwrap_or_else(|| "*".to_string());
            dependencies.insert(node.name.clone(), serde_json::Value::String(version));
        }

        let remotes: Vec<serde_json::Value> = self
            .repositories
            .iter()
            .map(|(name, url)| {
                serde_json::json!({ "name": name, "url": url })
            })
            .collect();

        let document = serde_json::json!({
            "dependencies": serde_json::Value::Object(dependencies),
            "remotes": remotes,
        });

        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| ResolveError::Manifest(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| ResolveError::Manifest(format!("write {}: {}", path.display(), e)))?;
        log::info!("saved project manifest to {}", path.display());
        Ok(())
    }
}
