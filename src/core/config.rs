// PAKER - Package Acquisition and Integrity Core
// Core - Aggregate Configuration

//! The aggregate configuration handed to [`crate::core::PakerServices`].

use std::path::PathBuf;

use crate::cache::CacheConfig;
use crate::dependency::resolver::ResolverConfig;
use crate::io::IoEngineConfig;

/// Configuration for a whole Paker services context
#[derive(Debug, Clone)]
pub struct PakerConfig {
    /// The project directory operations act on
    pub project_root: PathBuf,
    /// Async engine parameters
    pub io: IoEngineConfig,
    /// Cache store parameters
    pub cache: CacheConfig,
    /// Resolver and parser parameters
    pub resolver: ResolverConfig,
    /// History entries retained before compaction
    pub max_history_entries: usize,
}

impl Default for PakerConfig {
    fn default() -> Self {
        Self::for_project(".")
    }
}

impl PakerConfig {
    /// A default configuration rooted at `project_root`.
    pub fn for_project(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let cache = CacheConfig {
            project_root: project_root.clone(),
            ..Default::default()
        };
        Self {
            project_root,
            io: IoEngineConfig::default(),
            cache,
            resolver: ResolverConfig::default(),
            max_history_entries: 100,
        }
    }
}
