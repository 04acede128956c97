// PAKER - Package Acquisition and Integrity Core
// Cache Store - Module Exports

//! # Package Cache
//!
//! Content-addressed package storage with coexisting versions:
//!
//! - `index`: the persisted `(name, version) -> entry` mapping
//! - `store`: installation, removal, project links, eviction
//! - `resolver`: scored selection among cache locations
//!
//! Projects never own package bytes; they hold symbolic links into the
//! cache under `<project>/.paker/links/`.

pub mod index;
pub mod resolver;
pub mod store;

pub use index::{CacheEntry, CacheIndex};
pub use resolver::{CacheLocation, PathResolver, PathStats};
pub use store::{CacheStatistics, CacheStore};

use std::path::PathBuf;
use thiserror::Error;

use crate::io::IoEngineError;

/// Cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// A filesystem operation did not complete.
    #[error("I/O failure: {0}")]
    Io(String),

    /// The named package, version, or location does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// No cache location is writable for this request.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A cache entry failed verification.
    #[error("Integrity failure: {0}")]
    Integrity(String),

    /// Fetching package bytes failed.
    #[error("Fetch failed for {url}: {message}")]
    Fetch {
        /// Source URL
        url: String,
        /// Failure detail
        message: String,
    },

    /// The async engine reported a failure.
    #[error(transparent)]
    Engine(#[from] IoEngineError),
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => CacheError::NotFound(e.to_string()),
            std::io::ErrorKind::PermissionDenied => CacheError::PermissionDenied(e.to_string()),
            _ => CacheError::Io(e.to_string()),
        }
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// How package bytes are stored per version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageStrategy {
    /// `git clone --depth 1` plus checkout of the requested ref
    #[default]
    ShallowClone,
    /// Shallow clone with version-control metadata stripped
    ArchiveOnly,
    /// Install to a staging path, repack as one compressed archive
    Compressed,
}

/// Which cache root receives new installs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlacementStrategy {
    /// Only the per-user cache root
    UserOnly,
    /// Only the system-wide cache root (requires privilege)
    GlobalOnly,
    /// Prefer user, fall back to global
    #[default]
    Hybrid,
    /// The project's own `.paker/cache` (legacy layout)
    ProjectLocal,
}

/// Cache store configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Storage strategy for new installs
    pub storage: StorageStrategy,
    /// Placement strategy for new installs
    pub placement: PlacementStrategy,
    /// Total size cap for size-based eviction
    pub max_cache_size_bytes: u64,
    /// Versions kept per package before old-version eviction
    pub max_versions_per_package: usize,
    /// Days without access before an entry counts as unused
    pub unused_age_days: i64,
    /// Access count below which an unused-age entry is evicted
    pub unused_access_threshold: u64,
    /// Override for the per-user cache root (defaults to `$HOME/.paker/cache`)
    pub user_cache_root: Option<PathBuf>,
    /// Override for the system-wide cache root
    pub global_cache_root: Option<PathBuf>,
    /// The project directory
    pub project_root: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            storage: StorageStrategy::default(),
            placement: PlacementStrategy::default(),
            max_cache_size_bytes: 10 * 1024 * 1024 * 1024,
            max_versions_per_package: 3,
            unused_age_days: 30,
            unused_access_threshold: 5,
            user_cache_root: None,
            global_cache_root: None,
            project_root: PathBuf::from("."),
        }
    }
}

/// The default per-user cache root: `$HOME/.paker/cache`, falling back
/// to the working directory when no home is known.
pub fn default_user_cache_root() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home).join(".paker/cache"),
        _ => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".paker/cache"),
    }
}

/// The default system-wide cache root.
pub fn default_global_cache_root() -> PathBuf {
    PathBuf::from("/usr/local/share/paker/cache")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.storage, StorageStrategy::ShallowClone);
        assert_eq!(config.placement, PlacementStrategy::Hybrid);
        assert_eq!(config.max_versions_per_package, 3);
    }

    #[test]
    fn test_user_cache_root_honours_home() {
        let root = default_user_cache_root();
        assert!(root.ends_with(".paker/cache"));
    }
}
