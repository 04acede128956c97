// PAKER - Package Acquisition and Integrity Core
// Cache Store - Persisted Index

//! The persisted cache index: `name -> version -> entry`.
//!
//! The on-disk document is one JSON object per package name mapping
//! version strings to entry objects; timestamps are seconds since the
//! epoch. Loading prunes entries whose cache directory is missing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One cached `(name, version)` pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Package name
    #[serde(skip)]
    pub package_name: String,
    /// Version string
    #[serde(skip)]
    pub version: String,
    /// Absolute directory holding the package bytes
    pub cache_path: PathBuf,
    /// Where the bytes came from
    pub repository_url: String,
    /// Total bytes under `cache_path`
    pub size_bytes: u64,
    /// Times the entry has been served
    pub access_count: u64,
    /// Cleared when the entry is scheduled for removal
    pub is_active: bool,
    /// When the entry was installed
    #[serde(with = "chrono::serde::ts_seconds")]
    pub install_time: DateTime<Utc>,
    /// When the entry was last served
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_access: DateTime<Utc>,
}

impl CacheEntry {
    /// Create a fresh entry installed now.
    pub fn new(
        package_name: impl Into<String>,
        version: impl Into<String>,
        cache_path: PathBuf,
        repository_url: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            package_name: package_name.into(),
            version: version.into(),
            cache_path,
            repository_url: repository_url.into(),
            size_bytes,
            access_count: 1,
            is_active: true,
            install_time: now,
            last_access: now,
        }
    }

    /// Note one more access.
    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_access = Utc::now();
    }

    /// Days since the entry was last served.
    pub fn days_since_access(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.last_access)
            .num_days()
    }
}

/// In-memory form of the persisted index.
#[derive(Debug, Default)]
pub struct CacheIndex {
    entries: BTreeMap<String, BTreeMap<String, CacheEntry>>,
}

impl CacheIndex {
    /// An empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `(name, version)` entries.
    pub fn len(&self) -> usize {
        self.entries.values().map(|v| v.len()).sum()
    }

    /// Whether the index has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, entry: CacheEntry) {
        self.entries
            .entry(entry.package_name.clone())
            .or_default()
            .insert(entry.version.clone(), entry);
    }

    /// Look up one entry.
    pub fn get(&self, name: &str, version: &str) -> Option<&CacheEntry> {
        self.entries.get(name)?.get(version)
    }

    /// Look up one entry mutably.
    pub fn get_mut(&mut self, name: &str, version: &str) -> Option<&mut CacheEntry> {
        self.entries.get_mut(name)?.get_mut(version)
    }

    /// Whether any version of `name` is present.
    pub fn contains_package(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .map(|v| !v.is_empty())
            .unwrap_or(false)
    }

    /// All versions of one package.
    pub fn versions_of(&self, name: &str) -> Vec<&CacheEntry> {
        self.entries
            .get(name)
            .map(|v| v.values().collect())
            .unwrap_or_default()
    }

    /// The newest entry of a package by install time.
    pub fn latest_by_install_time(&self, name: &str) -> Option<&CacheEntry> {
        self.entries
            .get(name)?
            .values()
            .max_by_key(|e| e.install_time)
    }

    /// Remove one version; returns the removed entry.
    pub fn remove(&mut self, name: &str, version: &str) -> Option<CacheEntry> {
        let versions = self.entries.get_mut(name)?;
        let removed = versions.remove(version);
        if versions.is_empty() {
            self.entries.remove(name);
        }
        removed
    }

    /// Remove every version of a package; returns the removed entries.
    pub fn remove_package(&mut self, name: &str) -> Vec<CacheEntry> {
        self.entries
            .remove(name)
            .map(|v| v.into_values().collect())
            .unwrap_or_default()
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values().flat_map(|v| v.values())
    }

    /// Iterate mutably over all entries.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut CacheEntry> {
        self.entries.values_mut().flat_map(|v| v.values_mut())
    }

    /// Total bytes across all entries.
    pub fn total_size_bytes(&self) -> u64 {
        self.iter().map(|e| e.size_bytes).sum()
    }

    /// Serialise to the on-disk document.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let document: BTreeMap<&String, BTreeMap<&String, &CacheEntry>> = self
            .entries
            .iter()
            .map(|(name, versions)| (name, versions.iter().collect()))
            .collect();
        serde_json::to_string_pretty(&document)
    }

    /// Parse the on-disk document, restoring the key fields.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let document: BTreeMap<String, BTreeMap<String, CacheEntry>> = serde_json::from_str(json)?;
        let mut index = CacheIndex::new();
        for (name, versions) in document {
            for (version, mut entry) in versions {
                entry.package_name = name.clone();
                entry.version = version;
                index.insert(entry);
            }
        }
        Ok(index)
    }

    /// Parse the document at `path`, dropping entries whose cache
    /// directory no longer exists.
    pub fn load_pruned(path: &Path) -> std::io::Result<(Self, usize)> {
        if !path.is_file() {
            return Ok((CacheIndex::new(), 0));
        }
        let json = std::fs::read_to_string(path)?;
        let full = CacheIndex::from_json(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut pruned = CacheIndex::new();
        let mut dropped = 0;
        for entry in full.iter() {
            if entry.cache_path.exists() {
                pruned.insert(entry.clone());
            } else {
                log::warn!(
                    "pruning index entry {}@{}: {} is gone",
                    entry.package_name,
                    entry.version,
                    entry.cache_path.display()
                );
                dropped += 1;
            }
        }
        Ok((pruned, dropped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, version: &str, path: &Path) -> CacheEntry {
        CacheEntry::new(name, version, path.to_path_buf(), "https://example.com", 42)
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut index = CacheIndex::new();
        index.insert(entry("fmt", "8.1.1", Path::new("/cache/fmt/8.1.1")));
        index.insert(entry("fmt", "9.1.0", Path::new("/cache/fmt/9.1.0")));

        assert_eq!(index.len(), 2);
        assert!(index.contains_package("fmt"));
        assert!(index.get("fmt", "8.1.1").is_some());
        assert_eq!(index.versions_of("fmt").len(), 2);
    }

    #[test]
    fn test_latest_by_install_time() {
        let mut index = CacheIndex::new();
        let mut old = entry("fmt", "9.1.0", Path::new("/cache/fmt/9.1.0"));
        old.install_time = Utc::now() - chrono::Duration::hours(2);
        index.insert(old);
        index.insert(entry("fmt", "8.1.1", Path::new("/cache/fmt/8.1.1")));

        // 8.1.1 was installed later, so it wins despite the lower
        // version number.
        let latest = index.latest_by_install_time("fmt").unwrap();
        assert_eq!(latest.version, "8.1.1");
    }

    #[test]
    fn test_remove_cleans_empty_packages() {
        let mut index = CacheIndex::new();
        index.insert(entry("fmt", "8.1.1", Path::new("/cache/fmt/8.1.1")));

        assert!(index.remove("fmt", "8.1.1").is_some());
        assert!(!index.contains_package("fmt"));
        assert!(index.is_empty());
    }

    #[test]
    fn test_json_roundtrip() {
        let mut index = CacheIndex::new();
        index.insert(entry("fmt", "8.1.1", Path::new("/cache/fmt/8.1.1")));
        index.insert(entry("spdlog", "1.12.0", Path::new("/cache/spdlog/1.12.0")));

        let json = index.to_json().unwrap();
        // Document shape: one object per package name.
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["fmt"]["8.1.1"]["cache_path"].is_string());
        assert!(value["fmt"]["8.1.1"]["install_time"].is_number());

        let restored = CacheIndex::from_json(&json).unwrap();
        assert_eq!(restored.len(), 2);
        let entry = restored.get("fmt", "8.1.1").unwrap();
        assert_eq!(entry.package_name, "fmt");
        assert_eq!(entry.version, "8.1.1");
        assert_eq!(entry.size_bytes, 42);
    }

    #[test]
    fn test_load_prunes_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("fmt/8.1.1");
        std::fs::create_dir_all(&existing).unwrap();

        let mut index = CacheIndex::new();
        index.insert(entry("fmt", "8.1.1", &existing));
        index.insert(entry("ghost", "1.0.0", &dir.path().join("ghost/1.0.0")));

        let index_path = dir.path().join("cache_index.json");
        std::fs::write(&index_path, index.to_json().unwrap()).unwrap();

        let (loaded, dropped) = CacheIndex::load_pruned(&index_path).unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(loaded.len(), 1);
        assert!(loaded.get("fmt", "8.1.1").is_some());
        assert!(loaded.get("ghost", "1.0.0").is_none());
    }
}
