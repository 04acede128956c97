// PAKER - Package Acquisition and Integrity Core
// Dependency Management - Manifest Readers

//! Format-specific manifest readers with typed output.
//!
//! Each recognised format gets its own small parser: a JSON manifest
//! (`dependencies` object), CMake lists, pkg-config files, a free-text
//! requirements list, and an autotools configure script. Unrecognised
//! packages fall back to a structural scan of conventional third-party
//! directories; dependencies found that way are marked inferred so the
//! conflict engine can deprioritise them.
//!
//! The content hash covers exactly the bytes the winning reader
//! consumed, so touching an unrelated file never invalidates a cached
//! parse.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::version::VersionConstraint;
use serde::{Deserialize, Serialize};

/// Manifest reading errors
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The package directory or a manifest file could not be read.
    #[error("I/O failure reading manifest: {0}")]
    Io(String),

    /// No manifest and no conventional third-party layout was found.
    #[error("No manifest found under {0}")]
    NoManifest(String),

    /// A manifest existed but could not be interpreted.
    #[error("Malformed manifest {0}: {1}")]
    Malformed(String, String),
}

impl From<std::io::Error> for ManifestError {
    fn from(e: std::io::Error) -> Self {
        ManifestError::Io(e.to_string())
    }
}

/// Result type for manifest operations
pub type ManifestResult<T> = Result<T, ManifestError>;

/// The manifest formats the parser recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManifestFormat {
    /// A JSON document with a `dependencies` object
    Json,
    /// `CMakeLists.txt` (`find_package`, `pkg_check_modules`)
    CMake,
    /// A pkg-config `.pc` file (`Requires:`)
    PkgConfig,
    /// A free-text requirements list
    Requirements,
    /// `configure.ac` (`PKG_CHECK_MODULES`, `AC_CHECK_LIB`)
    Autotools,
    /// Structural inference from third-party directories
    Inferred,
}

/// One dependency extracted from a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedDependency {
    /// Dependency package name
    pub name: String,
    /// Declared version constraint
    pub constraint: VersionConstraint,
    /// Discovered by the structural fallback rather than a manifest
    pub inferred: bool,
}

impl ParsedDependency {
    fn declared(name: impl Into<String>, constraint: VersionConstraint) -> Self {
        Self {
            name: name.into(),
            constraint,
            inferred: false,
        }
    }

    fn inferred(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: VersionConstraint::any(),
            inferred: true,
        }
    }
}

/// Result of scanning one package directory
#[derive(Debug, Clone)]
pub struct ManifestScan {
    /// Format of the winning reader
    pub format: ManifestFormat,
    /// The manifest file read, absent for structural inference
    pub manifest_path: Option<PathBuf>,
    /// Extracted dependencies
    pub dependencies: Vec<ParsedDependency>,
    /// SHA-256 over the bytes the reader consumed
    pub content_hash: String,
}

/// JSON manifests probed, in order.
const JSON_MANIFESTS: [&str; 3] = ["paker.json", "package.json", "dependencies.json"];

/// Requirements lists probed, in order.
const REQUIREMENT_LISTS: [&str; 2] = ["requirements.txt", "dependencies.txt"];

/// Conventional vendored-dependency directories.
const THIRD_PARTY_DIRS: [&str; 4] = ["third_party", "external", "deps", "vendor"];

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Scan a package directory for its direct dependencies.
///
/// Readers are tried from most to least structured; the first one that
/// finds a manifest wins, whether or not it extracted any dependencies.
pub fn scan_package_dir(dir: &Path) -> ManifestResult<ManifestScan> {
    for name in JSON_MANIFESTS {
        let path = dir.join(name);
        if path.is_file() {
            return read_json_manifest(&path);
        }
    }

    let cmake = dir.join("CMakeLists.txt");
    if cmake.is_file() {
        return read_cmake_manifest(&cmake);
    }

    if let Some(pc) = find_pkg_config_file(dir)? {
        return read_pkg_config_manifest(&pc);
    }

    let autoconf = dir.join("configure.ac");
    if autoconf.is_file() {
        return read_autotools_manifest(&autoconf);
    }

    for name in REQUIREMENT_LISTS {
        let path = dir.join(name);
        if path.is_file() {
            return read_requirements_manifest(&path);
        }
    }

    infer_from_structure(dir)
}

fn read_json_manifest(path: &Path) -> ManifestResult<ManifestScan> {
    let bytes = fs::read(path)?;
    let document: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| ManifestError::Malformed(path.display().to_string(), e.to_string()))?;

    let mut dependencies = Vec::new();
    if let Some(map) = document.get("dependencies").and_then(|d| d.as_object()) {
        for (name, value) in map {
            let text = value.as_str().unwrap_or("*");
            let constraint =
                VersionConstraint::parse(text).unwrap_or_else(|_| VersionConstraint::any());
            dependencies.push(ParsedDependency::declared(name, constraint));
        }
    }

    Ok(ManifestScan {
        format: ManifestFormat::Json,
        manifest_path: Some(path.to_path_buf()),
        dependencies,
        content_hash: hash_bytes(&bytes),
    })
}

static FIND_PACKAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*find_package\s*\(\s*([A-Za-z0-9_.+-]+)(?:\s+([0-9][0-9.]*))?").unwrap()
});
static PKG_CHECK_MODULES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)pkg_check_modules\s*\(\s*[A-Za-z0-9_]+\s+(?:REQUIRED\s+)?([^)]+)\)").unwrap()
});
static MODULE_SPEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9_.+-]+?)\s*(>=|<=|!=|=|>|<)\s*([0-9][^\s]*)$").unwrap()
});

fn parse_module_spec(spec: &str) -> Option<ParsedDependency> {
    let spec = spec.trim();
    if spec.is_empty() || spec.starts_with('#') || spec.starts_with('$') {
        return None;
    }
    if let Some(caps) = MODULE_SPEC.captures(spec) {
        let text = format!("{}{}", &caps[2], &caps[3]);
        let constraint =
            VersionConstraint::parse(&text).unwrap_or_else(|_| VersionConstraint::any());
        return Some(ParsedDependency::declared(&caps[1], constraint));
    }
    if spec
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "_.+-".contains(c))
    {
        return Some(ParsedDependency::declared(spec, VersionConstraint::any()));
    }
    None
}

fn read_cmake_manifest(path: &Path) -> ManifestResult<ManifestScan> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);

    let mut seen = BTreeSet::new();
    let mut dependencies = Vec::new();

    for caps in FIND_PACKAGE.captures_iter(&text) {
        let name = caps[1].to_string();
        let constraint = match caps.get(2) {
            // find_package(fmt 8.1) means "8.1 or newer"
            Some(version) => VersionConstraint::parse(&format!(">={}", version.as_str()))
                .unwrap_or_else(|_| VersionConstraint::any()),
            None => VersionConstraint::any(),
        };
        if seen.insert(name.clone()) {
            dependencies.push(ParsedDependency::declared(name, constraint));
        }
    }

    for caps in PKG_CHECK_MODULES.captures_iter(&text) {
        for spec in caps[1].split_whitespace() {
            if let Some(dep) = parse_module_spec(spec) {
                if seen.insert(dep.name.clone()) {
                    dependencies.push(dep);
                }
            }
        }
    }

    Ok(ManifestScan {
        format: ManifestFormat::CMake,
        manifest_path: Some(path.to_path_buf()),
        dependencies,
        content_hash: hash_bytes(&bytes),
    })
}

fn find_pkg_config_file(dir: &Path) -> ManifestResult<Option<PathBuf>> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().map(|e| e == "pc").unwrap_or(false))
        .collect();
    candidates.sort();
    Ok(candidates.into_iter().next())
}

fn read_pkg_config_manifest(path: &Path) -> ManifestResult<ManifestScan> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);

    let mut dependencies = Vec::new();
    let mut seen = BTreeSet::new();
    for line in text.lines() {
        let Some(requires) = line
            .strip_prefix("Requires:")
            .or_else(|| line.strip_prefix("Requires.private:"))
        else {
            continue;
        };
        // Entries separated by commas or whitespace: "fmt >= 8.0, spdlog"
        for entry in requires.split(',') {
            let tokens: Vec<&str> = entry.split_whitespace().collect();
            match tokens.as_slice() {
                [] => {}
                [name] => {
                    if let Some(dep) = parse_module_spec(name) {
                        if seen.insert(dep.name.clone()) {
                            dependencies.push(dep);
                        }
                    }
                }
                [name, op, version, ..] => {
                    let constraint = VersionConstraint::parse(&format!("{}{}", op, version))
                        .unwrap_or_else(|_| VersionConstraint::any());
                    if seen.insert(name.to_string()) {
                        dependencies.push(ParsedDependency::declared(*name, constraint));
                    }
                }
                [name, _] => {
                    if seen.insert(name.to_string()) {
                        dependencies
                            .push(ParsedDependency::declared(*name, VersionConstraint::any()));
                    }
                }
            }
        }
    }

    Ok(ManifestScan {
        format: ManifestFormat::PkgConfig,
        manifest_path: Some(path.to_path_buf()),
        dependencies,
        content_hash: hash_bytes(&bytes),
    })
}

static AC_PKG_CHECK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"PKG_CHECK_MODULES\(\s*\[?[A-Za-z0-9_]+\]?\s*,\s*\[?([^\]\),]+)").unwrap()
});
static AC_CHECK_LIB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"AC_CHECK_LIB\(\s*\[?([A-Za-z0-9_.+-]+)\]?").unwrap());

fn read_autotools_manifest(path: &Path) -> ManifestResult<ManifestScan> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);

    let mut seen = BTreeSet::new();
    let mut dependencies = Vec::new();

    for caps in AC_PKG_CHECK.captures_iter(&text) {
        for spec in caps[1].split_whitespace() {
            if let Some(dep) = parse_module_spec(spec) {
                if seen.insert(dep.name.clone()) {
                    dependencies.push(dep);
                }
            }
        }
    }
    for caps in AC_CHECK_LIB.captures_iter(&text) {
        let name = caps[1].to_string();
        if seen.insert(name.clone()) {
            dependencies.push(ParsedDependency::declared(name, VersionConstraint::any()));
        }
    }

    Ok(ManifestScan {
        format: ManifestFormat::Autotools,
        manifest_path: Some(path.to_path_buf()),
        dependencies,
        content_hash: hash_bytes(&bytes),
    })
}

fn read_requirements_manifest(path: &Path) -> ManifestResult<ManifestScan> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);

    let mut seen = BTreeSet::new();
    let mut dependencies = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        // "name >= 1.2" with optional spacing around the operator
        let compact: String = line.split_whitespace().collect::<Vec<_>>().join("");
        if let Some(dep) = parse_module_spec(&compact) {
            if seen.insert(dep.name.clone()) {
                dependencies.push(dep);
            }
        }
    }

    Ok(ManifestScan {
        format: ManifestFormat::Requirements,
        manifest_path: Some(path.to_path_buf()),
        dependencies,
        content_hash: hash_bytes(&bytes),
    })
}

fn infer_from_structure(dir: &Path) -> ManifestResult<ManifestScan> {
    let mut names = BTreeSet::new();

    for sub in THIRD_PARTY_DIRS {
        let third_party = dir.join(sub);
        if !third_party.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&third_party)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.insert(entry.file_name().to_string_lossy().into_owned());
            }
        }
    }

    if names.is_empty() {
        return Err(ManifestError::NoManifest(dir.display().to_string()));
    }

    // Hash the observed directory names, not the tree contents.
    let digest_input = names.iter().cloned().collect::<Vec<_>>().join("\n");
    let dependencies = names.into_iter().map(ParsedDependency::inferred).collect();

    Ok(ManifestScan {
        format: ManifestFormat::Inferred,
        manifest_path: None,
        dependencies,
        content_hash: hash_bytes(digest_input.as_bytes()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::version::ConstraintOp;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_json_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "paker.json",
            r#"{"dependencies": {"fmt": "=8.1.1", "spdlog": ">=1.9.0", "zlib": "*"}}"#,
        );

        let scan = scan_package_dir(dir.path()).unwrap();
        assert_eq!(scan.format, ManifestFormat::Json);
        assert_eq!(scan.dependencies.len(), 3);
        let fmt = scan.dependencies.iter().find(|d| d.name == "fmt").unwrap();
        assert_eq!(fmt.constraint.op, ConstraintOp::Eq);
        assert!(!fmt.inferred);
    }

    #[test]
    fn test_cmake_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "CMakeLists.txt",
            "cmake_minimum_required(VERSION 3.20)\n\
             project(demo)\n\
             find_package(fmt 8.1 REQUIRED)\n\
             find_package(Threads)\n\
             pkg_check_modules(DEPS REQUIRED spdlog>=1.9 zlib)\n",
        );

        let scan = scan_package_dir(dir.path()).unwrap();
        assert_eq!(scan.format, ManifestFormat::CMake);

        let names: Vec<&str> = scan.dependencies.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"fmt"));
        assert!(names.contains(&"Threads"));
        assert!(names.contains(&"spdlog"));
        assert!(names.contains(&"zlib"));

        let fmt = scan.dependencies.iter().find(|d| d.name == "fmt").unwrap();
        assert_eq!(fmt.constraint.op, ConstraintOp::Ge);
        let spdlog = scan
            .dependencies
            .iter()
            .find(|d| d.name == "spdlog")
            .unwrap();
        assert_eq!(spdlog.constraint.op, ConstraintOp::Ge);
    }

    #[test]
    fn test_pkg_config_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "demo.pc",
            "prefix=/usr\nName: demo\nVersion: 1.0\nRequires: fmt >= 8.0, spdlog\n",
        );

        let scan = scan_package_dir(dir.path()).unwrap();
        assert_eq!(scan.format, ManifestFormat::PkgConfig);
        assert_eq!(scan.dependencies.len(), 2);
        let fmt = scan.dependencies.iter().find(|d| d.name == "fmt").unwrap();
        assert_eq!(fmt.constraint.op, ConstraintOp::Ge);
    }

    #[test]
    fn test_autotools_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "configure.ac",
            "AC_INIT([demo], [1.0])\n\
             PKG_CHECK_MODULES([FMT], [fmt >= 8.0])\n\
             AC_CHECK_LIB([z], [deflate])\n",
        );

        let scan = scan_package_dir(dir.path()).unwrap();
        assert_eq!(scan.format, ManifestFormat::Autotools);
        let names: Vec<&str> = scan.dependencies.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"fmt"));
        assert!(names.contains(&"z"));
    }

    #[test]
    fn test_requirements_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "requirements.txt",
            "# build deps\nfmt >= 8.0.0\nspdlog\n\nzlib == 1.3.0\n",
        );

        let scan = scan_package_dir(dir.path()).unwrap();
        assert_eq!(scan.format, ManifestFormat::Requirements);
        assert_eq!(scan.dependencies.len(), 3);
        let zlib = scan.dependencies.iter().find(|d| d.name == "zlib").unwrap();
        assert_eq!(zlib.constraint.op, ConstraintOp::Eq);
    }

    #[test]
    fn test_structural_inference_marks_inferred() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("third_party/fmt")).unwrap();
        fs::create_dir_all(dir.path().join("third_party/spdlog")).unwrap();

        let scan = scan_package_dir(dir.path()).unwrap();
        assert_eq!(scan.format, ManifestFormat::Inferred);
        assert_eq!(scan.dependencies.len(), 2);
        assert!(scan.dependencies.iter().all(|d| d.inferred));
    }

    #[test]
    fn test_no_manifest_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            scan_package_dir(dir.path()),
            Err(ManifestError::NoManifest(_))
        ));
    }

    #[test]
    fn test_hash_covers_manifest_bytes_only() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "paker.json", r#"{"dependencies": {"fmt": "*"}}"#);

        let first = scan_package_dir(dir.path()).unwrap();
        // Touching an unrelated file must not change the hash.
        write(dir.path(), "README.md", "hello");
        let second = scan_package_dir(dir.path()).unwrap();
        assert_eq!(first.content_hash, second.content_hash);

        // Changing the manifest must.
        write(dir.path(), "paker.json", r#"{"dependencies": {"fmt": "=9.0.0"}}"#);
        let third = scan_package_dir(dir.path()).unwrap();
        assert_ne!(first.content_hash, third.content_hash);
    }
}
