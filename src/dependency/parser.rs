// PAKER - Package Acquisition and Integrity Core
// Dependency Management - Incremental Parser

//! Incremental manifest parsing with a content-hash cache.
//!
//! Each package's manifest scan is cached keyed by package and version;
//! a strategy selector decides per package whether to re-read the
//! manifest, compare hashes, or serve the cached result outright. The
//! cache persists to disk under the project's `.paker/cache` directory.

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;

use super::graph::{DependencyGraph, DependencyNode, GraphError};
use super::manifest::{self, ManifestError, ManifestScan, ParsedDependency};
use super::version::parse_version;

/// Parser errors
#[derive(Debug, Error)]
pub enum ParseError {
    /// The package directory could not be located under any search root.
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    /// Manifest reading failed.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Applying the parse to the graph failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The parse cache could not be loaded or saved.
    #[error("Parse cache error: {0}")]
    Cache(String),
}

/// Result type for parser operations
pub type ParseResult<T> = Result<T, ParseError>;

/// Parsing strategy chosen per package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    /// Read the manifest, hash, extract, store
    FullParse,
    /// Re-hash and reuse the cache on a match
    Incremental,
    /// Serve the cached dependency set without touching the filesystem
    Predictive,
    /// Serve from cache even if stale (diagnostics)
    CachedOnly,
}

/// One cached parse result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseCacheEntry {
    /// Package name
    pub package_name: String,
    /// Requested version tag, `"*"` when unpinned
    pub version: String,
    /// Content hash of the manifest bytes the reader consumed
    pub content_hash: String,
    /// Extracted dependency list
    pub dependencies: Vec<ParsedDependency>,
    /// When the manifest was last actually parsed
    pub last_parsed: chrono::DateTime<chrono::Utc>,
    /// When this entry was last served
    pub last_accessed: chrono::DateTime<chrono::Utc>,
    /// Times this entry has been served
    pub access_count: u64,
    /// Cleared by explicit invalidation
    pub is_valid: bool,
}

/// Parser configuration
#[derive(Debug, Clone)]
pub struct ParseConfig {
    /// Serve results from the cache at all
    pub enable_caching: bool,
    /// Allow hash-compare reuse
    pub enable_incremental: bool,
    /// Allow serving without touching the filesystem
    pub enable_prediction: bool,
    /// Parse cache entry cap (LRU beyond this)
    pub max_cache_entries: usize,
    /// Concurrent manifest scans in `parse_packages`
    pub max_parallel_tasks: usize,
    /// Entries older than this are re-parsed
    pub cache_ttl: Duration,
    /// Window for the predictive and 30-minute staleness rules
    pub prediction_window: Duration,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            enable_caching: true,
            enable_incremental: true,
            enable_prediction: true,
            max_cache_entries: 1000,
            max_parallel_tasks: 4,
            cache_ttl: Duration::from_secs(60 * 60),
            prediction_window: Duration::from_secs(30 * 60),
        }
    }
}

/// Parser statistics
#[derive(Debug, Clone, Default)]
pub struct ParseStats {
    /// Packages run through the parser
    pub total_packages_parsed: u64,
    /// Results served from the cache
    pub cache_hits: u64,
    /// Results that required reading the manifest
    pub cache_misses: u64,
    /// Hash mismatches that triggered a re-parse
    pub incremental_updates: u64,
    /// Full manifest parses performed
    pub full_parses: u64,
    /// Total time spent parsing, in milliseconds
    pub total_parse_time_ms: u64,
    /// Mean time per parse, in milliseconds
    pub avg_parse_time_ms: f64,
    /// Time spent loading the cache from disk
    pub cache_load_time_ms: u64,
    /// Time spent saving the cache to disk
    pub cache_save_time_ms: u64,
}

/// Outcome of parsing one package
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    /// Extracted dependencies
    pub dependencies: Vec<ParsedDependency>,
    /// Whether the result came from the cache
    pub cache_hit: bool,
    /// Strategy that produced the result
    pub strategy: ParseStrategy,
}

#[derive(Debug, Default)]
struct SelectorState {
    // Decayed use counts, squashed to (0, 1) for the thresholds.
    decayed_uses: HashMap<String, f64>,
    last_used: HashMap<String, Instant>,
}

impl SelectorState {
    fn frequency(&self, package: &str, now: Instant) -> f64 {
        let Some(&uses) = self.decayed_uses.get(package) else {
            return 0.0;
        };
        let decayed = match self.last_used.get(package) {
            Some(&at) => uses * (-(now.duration_since(at).as_secs_f64()) / 3600.0).exp(),
            None => uses,
        };
        decayed / (decayed + 1.0)
    }

    fn record_use(&mut self, package: &str, now: Instant) {
        let decayed = match (
            self.decayed_uses.get(package),
            self.last_used.get(package),
        ) {
            (Some(&uses), Some(&at)) => {
                uses * (-(now.duration_since(at).as_secs_f64()) / 3600.0).exp()
            }
            _ => 0.0,
        };
        self.decayed_uses.insert(package.to_string(), decayed + 1.0);
        self.last_used.insert(package.to_string(), now);
    }
}

/// High-frequency packages are served predictively.
const PREDICTIVE_FREQUENCY: f64 = 0.8;

/// Mid-frequency packages get incremental hash-compare parses.
const INCREMENTAL_FREQUENCY: f64 = 0.3;

/// The incremental manifest parser.
pub struct IncrementalParser {
    config: ParseConfig,
    cache: Mutex<LruCache<String, ParseCacheEntry>>,
    cache_path: PathBuf,
    search_roots: RwLock<Vec<PathBuf>>,
    selector: Mutex<SelectorState>,
    stats: Mutex<ParseStats>,
}

fn cache_key(name: &str, version: Option<&str>) -> String {
    format!("{}@{}", name, version.unwrap_or("*"))
}

impl IncrementalParser {
    /// Create a parser persisting its cache under `cache_dir`.
    pub fn new(config: ParseConfig, cache_dir: impl Into<PathBuf>) -> Self {
        let capacity =
            NonZeroUsize::new(config.max_cache_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            cache: Mutex::new(LruCache::new(capacity)),
            cache_path: cache_dir.into().join("parse_cache.json"),
            search_roots: RwLock::new(Vec::new()),
            selector: Mutex::new(SelectorState::default()),
            stats: Mutex::new(ParseStats::default()),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &ParseConfig {
        &self.config
    }

    /// Add a directory under which package trees are searched.
    pub fn add_search_root(&self, root: impl Into<PathBuf>) {
        self.search_roots.write().push(root.into());
    }

    /// Locate the on-disk tree for a package, preferring an exact
    /// version subdirectory.
    pub fn locate_package(&self, name: &str, version: Option<&str>) -> Option<PathBuf> {
        let roots = self.search_roots.read();
        for root in roots.iter() {
            if let Some(version) = version {
                let versioned = root.join(name).join(version);
                if versioned.is_dir() {
                    return Some(versioned);
                }
            }
            let flat = root.join(name);
            if flat.is_dir() {
                // A bare package dir, or a single-version layout.
                if let Some(only_version) = single_subdir(&flat) {
                    return Some(only_version);
                }
                return Some(flat);
            }
        }
        None
    }

    fn select_strategy(&self, name: &str, has_valid_entry: bool) -> ParseStrategy {
        if !self.config.enable_caching || !has_valid_entry {
            return ParseStrategy::FullParse;
        }

        let now = Instant::now();
        let selector = self.selector.lock();

        if let Some(&at) = selector.last_used.get(name) {
            if now.duration_since(at) > self.config.prediction_window {
                return ParseStrategy::FullParse;
            }
        } else {
            return ParseStrategy::FullParse;
        }

        let frequency = selector.frequency(name, now);
        if self.config.enable_prediction && frequency > PREDICTIVE_FREQUENCY {
            ParseStrategy::Predictive
        } else if self.config.enable_incremental && frequency > INCREMENTAL_FREQUENCY {
            ParseStrategy::Incremental
        } else {
            ParseStrategy::FullParse
        }
    }

    fn entry_is_fresh(&self, entry: &ParseCacheEntry) -> bool {
        if !entry.is_valid {
            return false;
        }
        let age = chrono::Utc::now().signed_duration_since(entry.last_parsed);
        age.num_seconds() >= 0 && (age.num_seconds() as u64) < self.config.cache_ttl.as_secs()
    }

    /// Parse one package and populate the graph with its node and
    /// edges.
    pub async fn parse_package(
        &self,
        graph: &mut DependencyGraph,
        name: &str,
        version: Option<&str>,
    ) -> ParseResult<ParseOutcome> {
        self.integrate(graph, name, version, None).await
    }

    /// Parse one package forcing a specific strategy (diagnostics).
    pub async fn parse_package_with_strategy(
        &self,
        graph: &mut DependencyGraph,
        name: &str,
        version: Option<&str>,
        strategy: ParseStrategy,
    ) -> ParseResult<ParseOutcome> {
        self.integrate_with(graph, name, version, None, Some(strategy))
            .await
    }

    /// Parse a batch of packages, scanning manifests in parallel up to
    /// the configured limit, then applying results to the graph.
    pub async fn parse_packages(
        &self,
        graph: &mut DependencyGraph,
        names: &[String],
    ) -> Vec<(String, ParseResult<ParseOutcome>)> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_tasks.max(1)));
        let mut tasks = Vec::new();

        for name in names {
            let Some(dir) = self.locate_package(name, None) else {
                continue;
            };
            let semaphore = Arc::clone(&semaphore);
            let name = name.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let scan = tokio::task::spawn_blocking(move || manifest::scan_package_dir(&dir))
                    .await
                    .map_err(|e| ManifestError::Io(e.to_string()))
                    .and_then(|r| r);
                (name, scan)
            }));
        }

        let mut scans: HashMap<String, ManifestScan> = HashMap::new();
        for outcome in futures::future::join_all(tasks).await {
            if let Ok((name, Ok(scan))) = outcome {
                scans.insert(name, scan);
            }
        }

        let mut results = Vec::with_capacity(names.len());
        for name in names {
            let scan = scans.remove(name);
            let outcome = self.integrate(graph, name, None, scan).await;
            results.push((name.clone(), outcome));
        }
        results
    }

    async fn integrate(
        &self,
        graph: &mut DependencyGraph,
        name: &str,
        version: Option<&str>,
        pre_scan: Option<ManifestScan>,
    ) -> ParseResult<ParseOutcome> {
        self.integrate_with(graph, name, version, pre_scan, None)
            .await
    }

    async fn integrate_with(
        &self,
        graph: &mut DependencyGraph,
        name: &str,
        version: Option<&str>,
        pre_scan: Option<ManifestScan>,
        forced: Option<ParseStrategy>,
    ) -> ParseResult<ParseOutcome> {
        let started = Instant::now();
        let key = cache_key(name, version);

        let cached_entry = {
            let mut cache = self.cache.lock();
            cache.get(&key).cloned()
        };
        let has_valid_entry = cached_entry
            .as_ref()
            .map(|e| self.entry_is_fresh(e))
            .unwrap_or(false);

        let strategy = forced.unwrap_or_else(|| self.select_strategy(name, has_valid_entry));

        let outcome = match strategy {
            ParseStrategy::CachedOnly => match cached_entry {
                Some(entry) => {
                    self.serve_cached(&key);
                    ParseOutcome {
                        dependencies: entry.dependencies,
                        cache_hit: true,
                        strategy,
                    }
                }
                None => self.full_parse(name, version, &key, pre_scan).await?,
            },
            ParseStrategy::Predictive => match cached_entry {
                Some(entry) if has_valid_entry => {
                    self.serve_cached(&key);
                    ParseOutcome {
                        dependencies: entry.dependencies,
                        cache_hit: true,
                        strategy,
                    }
                }
                _ => self.full_parse(name, version, &key, pre_scan).await?,
            },
            ParseStrategy::Incremental => {
                let scan = self.obtain_scan(name, version, pre_scan).await?;
                match cached_entry {
                    Some(entry)
                        if has_valid_entry && entry.content_hash == scan.content_hash =>
                    {
                        self.serve_cached(&key);
                        ParseOutcome {
                            dependencies: entry.dependencies,
                            cache_hit: true,
                            strategy,
                        }
                    }
                    _ => {
                        self.stats.lock().incremental_updates += 1;
                        self.store_scan(name, version, &key, &scan);
                        ParseOutcome {
                            dependencies: scan.dependencies,
                            cache_hit: false,
                            strategy,
                        }
                    }
                }
            }
            ParseStrategy::FullParse => self.full_parse(name, version, &key, pre_scan).await?,
        };

        self.apply_to_graph(graph, name, version, &outcome)?;

        {
            let mut selector = self.selector.lock();
            selector.record_use(name, Instant::now());
        }
        {
            let elapsed = started.elapsed().as_millis() as u64;
            let mut stats = self.stats.lock();
            stats.total_packages_parsed += 1;
            stats.total_parse_time_ms += elapsed;
            stats.avg_parse_time_ms =
                stats.total_parse_time_ms as f64 / stats.total_packages_parsed as f64;
        }

        Ok(outcome)
    }

    async fn obtain_scan(
        &self,
        name: &str,
        version: Option<&str>,
        pre_scan: Option<ManifestScan>,
    ) -> ParseResult<ManifestScan> {
        if let Some(scan) = pre_scan {
            return Ok(scan);
        }
        let dir = self
            .locate_package(name, version)
            .ok_or_else(|| ParseError::PackageNotFound(name.to_string()))?;
        let scan = tokio::task::spawn_blocking(move || manifest::scan_package_dir(&dir))
            .await
            .map_err(|e| ParseError::Cache(e.to_string()))??;
        Ok(scan)
    }

    async fn full_parse(
        &self,
        name: &str,
        version: Option<&str>,
        key: &str,
        pre_scan: Option<ManifestScan>,
    ) -> ParseResult<ParseOutcome> {
        let scan = self.obtain_scan(name, version, pre_scan).await?;
        {
            let mut stats = self.stats.lock();
            stats.cache_misses += 1;
            stats.full_parses += 1;
        }
        self.store_scan(name, version, key, &scan);
        Ok(ParseOutcome {
            dependencies: scan.dependencies,
            cache_hit: false,
            strategy: ParseStrategy::FullParse,
        })
    }

    fn serve_cached(&self, key: &str) {
        let mut cache = self.cache.lock();
        if let Some(entry) = cache.get_mut(key) {
            entry.access_count += 1;
            entry.last_accessed = chrono::Utc::now();
        }
        self.stats.lock().cache_hits += 1;
    }

    fn store_scan(&self, name: &str, version: Option<&str>, key: &str, scan: &ManifestScan) {
        if !self.config.enable_caching {
            return;
        }
        let now = chrono::Utc::now();
        let entry = ParseCacheEntry {
            package_name: name.to_string(),
            version: version.unwrap_or("*").to_string(),
            content_hash: scan.content_hash.clone(),
            dependencies: scan.dependencies.clone(),
            last_parsed: now,
            last_accessed: now,
            access_count: 1,
            is_valid: true,
        };
        self.cache.lock().put(key.to_string(), entry);
    }

    fn apply_to_graph(
        &self,
        graph: &mut DependencyGraph,
        name: &str,
        version: Option<&str>,
        outcome: &ParseOutcome,
    ) -> ParseResult<()> {
        let install_path = self.locate_package(name, version);

        let mut node = match graph.node(name) {
            Some(existing) => existing.clone(),
            None => DependencyNode::new(name),
        };
        let previous_deps = node.dependencies.clone();
        if node.version.is_none() {
            if let Some(v) = version.filter(|v| *v != "*") {
                node.version = parse_version(v).ok();
            }
        }
        if let Some(path) = install_path {
            node.installed = true;
            node.install_path = Some(path);
        }
        node.dependencies = outcome
            .dependencies
            .iter()
            .map(|d| d.name.clone())
            .collect();
        node.constraints = outcome
            .dependencies
            .iter()
            .map(|d| (d.name.clone(), d.constraint.clone()))
            .collect();
        node.inferred = outcome
            .dependencies
            .iter()
            .filter(|d| d.inferred)
            .map(|d| d.name.clone())
            .collect();
        node.parse_hash = Some(self.latest_hash_for(name, version));
        graph.add_node(node);

        for dep in &outcome.dependencies {
            if dep.name == name {
                log::warn!("{} declares a dependency on itself; skipping", name);
                continue;
            }
            if !graph.has_node(&dep.name) {
                graph.add_node(DependencyNode::new(&dep.name));
            }
            graph.add_edge(name, &dep.name)?;
        }

        // Drop edges to dependencies the manifest no longer declares.
        for stale in previous_deps {
            if !outcome.dependencies.iter().any(|d| d.name == stale) {
                graph.remove_edge(name, &stale);
            }
        }
        Ok(())
    }

    fn latest_hash_for(&self, name: &str, version: Option<&str>) -> String {
        let key = cache_key(name, version);
        self.cache
            .lock()
            .peek(&key)
            .map(|e| e.content_hash.clone())
            .unwrap_or_default()
    }

    /// Invalidate every cached parse for a package.
    pub fn invalidate_package(&self, name: &str) {
        let mut cache = self.cache.lock();
        let keys: Vec<String> = cache
            .iter()
            .filter(|(k, _)| k.starts_with(&format!("{}@", name)))
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            if let Some(entry) = cache.get_mut(&key) {
                entry.is_valid = false;
            }
        }
    }

    /// Drop every cached parse.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Number of entries currently cached.
    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Drop entries past their TTL.
    pub fn evict_expired(&self) -> usize {
        let mut cache = self.cache.lock();
        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, e)| {
                let age = chrono::Utc::now().signed_duration_since(e.last_parsed);
                age.num_seconds() < 0
                    || (age.num_seconds() as u64) >= self.config.cache_ttl.as_secs()
            })
            .map(|(k, _)| k.clone())
            .collect();
        let count = expired.len();
        for key in expired {
            cache.pop(&key);
        }
        count
    }

    /// Every cached entry has a non-empty hash and dependency names.
    pub fn validate_cache_integrity(&self) -> bool {
        let cache = self.cache.lock();
        cache.iter().all(|(_, e)| {
            !e.content_hash.is_empty() && e.dependencies.iter().all(|d| !d.name.is_empty())
        })
    }

    /// Load the persisted cache from disk, pruning invalid entries.
    pub fn load_cache(&self) -> ParseResult<usize> {
        let started = Instant::now();
        if !self.cache_path.is_file() {
            return Ok(0);
        }
        let bytes = std::fs::read(&self.cache_path)
            .map_err(|e| ParseError::Cache(format!("read {}: {}", self.cache_path.display(), e)))?;
        let entries: Vec<ParseCacheEntry> = serde_json::from_slice(&bytes)
            .map_err(|e| ParseError::Cache(format!("parse cache document: {}", e)))?;

        let mut cache = self.cache.lock();
        let mut loaded = 0;
        for entry in entries {
            if !entry.is_valid {
                continue;
            }
            let key = cache_key(&entry.package_name, Some(entry.version.as_str()));
            cache.put(key, entry);
            loaded += 1;
        }
        self.stats.lock().cache_load_time_ms += started.elapsed().as_millis() as u64;
        Ok(loaded)
    }

    /// Persist the cache to disk.
    pub fn save_cache(&self) -> ParseResult<()> {
        let started = Instant::now();
        let entries: Vec<ParseCacheEntry> = {
            let cache = self.cache.lock();
            cache.iter().map(|(_, e)| e.clone()).collect()
        };
        if let Some(parent) = self.cache_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ParseError::Cache(format!("create {}: {}", parent.display(), e)))?;
        }
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| ParseError::Cache(e.to_string()))?;
        std::fs::write(&self.cache_path, json)
            .map_err(|e| ParseError::Cache(format!("write {}: {}", self.cache_path.display(), e)))?;
        self.stats.lock().cache_save_time_ms += started.elapsed().as_millis() as u64;
        Ok(())
    }

    /// Snapshot the parser statistics.
    pub fn stats(&self) -> ParseStats {
        self.stats.lock().clone()
    }

    /// Zero the statistics counters.
    pub fn reset_stats(&self) {
        *self.stats.lock() = ParseStats::default();
    }
}

fn single_subdir(dir: &Path) -> Option<PathBuf> {
    let mut dirs = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path());
    let first = dirs.next()?;
    // Only unambiguous single-version layouts resolve this way.
    if dirs.next().is_some() {
        return None;
    }
    // A version-shaped directory name, not a source tree subdirectory.
    let name = first.file_name()?.to_string_lossy().into_owned();
    name.chars().next().filter(|c| c.is_ascii_digit())?;
    Some(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn project() -> (tempfile::TempDir, IncrementalParser) {
        let dir = tempfile::tempdir().unwrap();
        let parser = IncrementalParser::new(ParseConfig::default(), dir.path().join(".paker/cache"));
        parser.add_search_root(dir.path().join("packages"));
        (dir, parser)
    }

    fn write_package(root: &Path, name: &str, manifest: &str) {
        let dir = root.join("packages").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("paker.json"), manifest).unwrap();
    }

    #[tokio::test]
    async fn test_full_parse_then_cache_hit() {
        let (dir, parser) = project();
        write_package(
            dir.path(),
            "app",
            r#"{"dependencies": {"fmt": "=8.1.1", "spdlog": ">=1.9.0"}}"#,
        );

        let mut graph = DependencyGraph::new();
        let first = parser.parse_package(&mut graph, "app", None).await.unwrap();
        assert!(!first.cache_hit);
        assert_eq!(first.dependencies.len(), 2);

        // Build frequency so the selector allows cache reuse.
        for _ in 0..4 {
            parser.parse_package(&mut graph, "app", None).await.unwrap();
        }
        let again = parser.parse_package(&mut graph, "app", None).await.unwrap();
        assert!(again.cache_hit);
        assert_eq!(again.dependencies, first.dependencies);

        let stats = parser.stats();
        assert_eq!(stats.full_parses, 1);
        assert!(stats.cache_hits >= 1);
    }

    #[tokio::test]
    async fn test_graph_population() {
        let (dir, parser) = project();
        write_package(dir.path(), "app", r#"{"dependencies": {"fmt": "*"}}"#);

        let mut graph = DependencyGraph::new();
        parser.parse_package(&mut graph, "app", None).await.unwrap();

        assert!(graph.has_node("app"));
        assert!(graph.has_node("fmt"));
        assert_eq!(graph.dependencies_of("app"), vec!["fmt"]);
        let app = graph.node("app").unwrap();
        assert!(app.installed);
        assert!(app.is_parsed());
    }

    #[tokio::test]
    async fn test_manifest_change_invalidates_cache() {
        let (dir, parser) = project();
        write_package(dir.path(), "app", r#"{"dependencies": {"fmt": "*"}}"#);

        let mut graph = DependencyGraph::new();
        parser.parse_package(&mut graph, "app", None).await.unwrap();
        for _ in 0..2 {
            parser.parse_package(&mut graph, "app", None).await.unwrap();
        }

        // Rewrite the manifest; the incremental hash compare must
        // notice and re-parse.
        write_package(
            dir.path(),
            "app",
            r#"{"dependencies": {"fmt": "*", "zlib": "*"}}"#,
        );
        let after = parser
            .parse_package_with_strategy(
                &mut graph,
                "app",
                None,
                ParseStrategy::Incremental,
            )
            .await
            .unwrap();
        assert!(!after.cache_hit);
        assert_eq!(after.dependencies.len(), 2);
        assert!(parser.stats().incremental_updates >= 1);
    }

    #[tokio::test]
    async fn test_parse_packages_batch() {
        let (dir, parser) = project();
        write_package(dir.path(), "a", r#"{"dependencies": {"c": "*"}}"#);
        write_package(dir.path(), "b", r#"{"dependencies": {"c": "*"}}"#);

        let mut graph = DependencyGraph::new();
        let results = parser
            .parse_packages(&mut graph, &["a".to_string(), "b".to_string()])
            .await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(graph.dependents_of("c").len(), 2);
    }

    #[tokio::test]
    async fn test_missing_package_errors() {
        let (_dir, parser) = project();
        let mut graph = DependencyGraph::new();
        let result = parser.parse_package(&mut graph, "ghost", None).await;
        assert!(matches!(result, Err(ParseError::PackageNotFound(_))));
    }

    #[tokio::test]
    async fn test_cache_persistence_roundtrip() {
        let (dir, parser) = project();
        write_package(dir.path(), "app", r#"{"dependencies": {"fmt": "*"}}"#);

        let mut graph = DependencyGraph::new();
        parser.parse_package(&mut graph, "app", None).await.unwrap();
        parser.save_cache().unwrap();

        let fresh =
            IncrementalParser::new(ParseConfig::default(), dir.path().join(".paker/cache"));
        let loaded = fresh.load_cache().unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(fresh.cache_len(), 1);
        assert!(fresh.validate_cache_integrity());
    }

    #[tokio::test]
    async fn test_invalidate_package() {
        let (dir, parser) = project();
        write_package(dir.path(), "app", r#"{"dependencies": {"fmt": "*"}}"#);

        let mut graph = DependencyGraph::new();
        parser.parse_package(&mut graph, "app", None).await.unwrap();
        parser.invalidate_package("app");

        // Invalidated entries force a full parse.
        let outcome = parser.parse_package(&mut graph, "app", None).await.unwrap();
        assert!(!outcome.cache_hit);
        assert_eq!(parser.stats().full_parses, 2);
    }
}
