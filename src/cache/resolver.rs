// PAKER - Package Acquisition and Integrity Core
// Cache Store - Path Resolution

//! Scored selection among cache locations.
//!
//! A location already holding the requested package wins outright.
//! Otherwise each candidate scores
//! `base_priority + min(50, available_GB) + 20*is_user_home +
//! 30*package_exists_there`, and a location that fails its writability
//! probe is disqualified.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{CacheError, CacheResult};

/// The cache locations, in base-priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheLocation {
    /// The per-user cache root
    UserCache,
    /// The system-wide cache root
    GlobalCache,
    /// The project's own cache directory
    ProjectCache,
    /// The project's links directory
    ProjectLinks,
}

impl CacheLocation {
    /// All locations, highest base priority first.
    pub const ALL: [CacheLocation; 4] = [
        CacheLocation::UserCache,
        CacheLocation::GlobalCache,
        CacheLocation::ProjectCache,
        CacheLocation::ProjectLinks,
    ];

    /// The location's base score.
    pub fn base_priority(self) -> f64 {
        match self {
            CacheLocation::UserCache => 100.0,
            CacheLocation::GlobalCache => 80.0,
            CacheLocation::ProjectCache => 60.0,
            CacheLocation::ProjectLinks => 40.0,
        }
    }
}

/// Statistics for one cache location
#[derive(Debug, Clone, Default)]
pub struct PathStats {
    /// Packages stored at the location
    pub total_packages: usize,
    /// Bytes stored at the location
    pub total_size_bytes: u64,
    /// Free bytes on the backing filesystem
    pub available_bytes: u64,
    /// Last time eviction ran against the location
    pub last_cleanup: Option<DateTime<Utc>>,
}

/// Selects the best cache location for installs and lookups.
#[derive(Debug)]
pub struct PathResolver {
    roots: BTreeMap<CacheLocation, PathBuf>,
    last_cleanup: BTreeMap<CacheLocation, DateTime<Utc>>,
}

impl PathResolver {
    /// Create a resolver over the four conventional roots.
    pub fn new(user_root: PathBuf, global_root: PathBuf, project_root: &Path) -> Self {
        let roots = BTreeMap::from([
            (CacheLocation::UserCache, user_root),
            (CacheLocation::GlobalCache, global_root),
            (
                CacheLocation::ProjectCache,
                project_root.join(".paker/cache"),
            ),
            (
                CacheLocation::ProjectLinks,
                project_root.join(".paker/links"),
            ),
        ]);
        Self {
            roots,
            last_cleanup: BTreeMap::new(),
        }
    }

    /// The directory backing a location.
    pub fn root(&self, location: CacheLocation) -> &Path {
        &self.roots[&location]
    }

    /// The directory a `(name, version)` pair lives in at a location.
    pub fn package_path(&self, location: CacheLocation, name: &str, version: &str) -> PathBuf {
        self.root(location).join(name).join(version)
    }

    /// Locations holding the given package version, in priority order.
    pub fn existing_locations(&self, name: &str, version: &str) -> Vec<(CacheLocation, PathBuf)> {
        CacheLocation::ALL
            .iter()
            .map(|&loc| (loc, self.package_path(loc, name, version)))
            .filter(|(_, path)| path.is_dir())
            .collect()
    }

    /// Pick the best location for a new install of `(name, version)`.
    ///
    /// A location already holding the package is returned immediately;
    /// otherwise the scoring formula decides. Every location failing
    /// its writability probe yields `PermissionDenied`.
    pub fn select_for_install(
        &self,
        name: &str,
        version: &str,
        candidates: &[CacheLocation],
    ) -> CacheResult<(CacheLocation, PathBuf)> {
        for &location in candidates {
            let path = self.package_path(location, name, version);
            if path.is_dir() {
                return Ok((location, path));
            }
        }

        let mut best: Option<(f64, CacheLocation)> = None;
        for &location in candidates {
            let Some(score) = self.score(location, name) else {
                continue;
            };
            if best.map(|(s, _)| score > s).unwrap_or(true) {
                best = Some((score, location));
            }
        }

        match best {
            Some((_, location)) => {
                Ok((location, self.package_path(location, name, version)))
            }
            None => Err(CacheError::PermissionDenied(format!(
                "no writable cache location for {}@{}",
                name, version
            ))),
        }
    }

    /// Score one location for one package; `None` when unwritable.
    fn score(&self, location: CacheLocation, name: &str) -> Option<f64> {
        let root = self.root(location);
        if !self.is_writable(root) {
            return None;
        }

        let available_gb = available_bytes(root) as f64 / (1024.0 * 1024.0 * 1024.0);
        let mut score = location.base_priority();
        score += available_gb.min(50.0);
        if is_under_home(root) {
            score += 20.0;
        }
        if root.join(name).is_dir() {
            score += 30.0;
        }
        Some(score)
    }

    /// Probe a root for writability by creating it and touching a file.
    pub fn is_writable(&self, root: &Path) -> bool {
        if std::fs::create_dir_all(root).is_err() {
            return false;
        }
        let probe = root.join(".paker-probe");
        match std::fs::write(&probe, b"probe") {
            Ok(()) => {
                let _ = std::fs::remove_file(&probe);
                true
            }
            Err(_) => false,
        }
    }

    /// Record that eviction ran against a location.
    pub fn note_cleanup(&mut self, location: CacheLocation) {
        self.last_cleanup.insert(location, Utc::now());
    }

    /// Statistics for one location.
    pub fn stats(&self, location: CacheLocation) -> PathStats {
        let root = self.root(location);
        let mut stats = PathStats {
            available_bytes: available_bytes(root),
            last_cleanup: self.last_cleanup.get(&location).copied(),
            ..Default::default()
        };

        if let Ok(packages) = std::fs::read_dir(root) {
            for package in packages.filter_map(|e| e.ok()) {
                if !package.path().is_dir() {
                    continue;
                }
                stats.total_packages += 1;
                stats.total_size_bytes += directory_size(&package.path());
            }
        }
        stats
    }

    /// Locations whose backing filesystem is nearly full.
    pub fn recommended_cleanup_paths(&self) -> Vec<PathBuf> {
        CacheLocation::ALL
            .iter()
            .map(|&loc| self.root(loc))
            .filter(|root| root.exists())
            .filter(|root| {
                let available = available_bytes(root);
                available > 0 && available < 1024 * 1024 * 1024
            })
            .map(Path::to_path_buf)
            .collect()
    }
}

/// Total bytes of regular files under `path`.
pub fn directory_size(path: &Path) -> u64 {
    let mut total = 0;
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            total += directory_size(&entry.path());
        } else if file_type.is_file() {
            total += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    total
}

fn is_under_home(path: &Path) -> bool {
    dirs::home_dir()
        .map(|home| path.starts_with(home))
        .unwrap_or(false)
}

/// Free bytes on the filesystem backing `path`.
#[cfg(unix)]
pub fn available_bytes(path: &Path) -> u64 {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let probe = if path.exists() {
        path
    } else {
        path.ancestors().find(|p| p.exists()).unwrap_or(Path::new("/"))
    };
    let Ok(cpath) = CString::new(probe.as_os_str().as_bytes()) else {
        return 0;
    };
    // statvfs is the portable unix way to ask for free space.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(cpath.as_ptr(), &mut stat) };
    if rc != 0 {
        return 0;
    }
    stat.f_bavail as u64 * stat.f_frsize as u64
}

/// Free bytes on the filesystem backing `path` (unsupported platform).
#[cfg(not(unix))]
pub fn available_bytes(_path: &Path) -> u64 {
    0
}
