// PAKER - Package Acquisition and Integrity Core
// Version History - Archival Snapshots

//! Compressed snapshots of package directories.
//!
//! A snapshot is one `.tar.gz` of the package tree taken immediately
//! before a mutation. Integrity means the archive lists successfully
//! and is non-empty. These helpers are blocking; callers run them on a
//! blocking task.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::path::Path;

use super::{HistoryError, HistoryResult};

/// Create a snapshot of `source_dir` at `archive_path`.
///
/// Returns the archive size in bytes and the files captured.
pub fn create_snapshot(source_dir: &Path, archive_path: &Path) -> HistoryResult<(u64, Vec<String>)> {
    if !source_dir.is_dir() {
        return Err(HistoryError::NotFound(format!(
            "snapshot source {} is not a directory",
            source_dir.display()
        )));
    }
    if let Some(parent) = archive_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let files = collect_files(source_dir, source_dir)?;

    let file = File::create(archive_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder
        .append_dir_all(".", source_dir)
        .map_err(|e| HistoryError::Io(format!("pack {}: {}", source_dir.display(), e)))?;
    builder
        .into_inner()
        .and_then(|gz| gz.finish())
        .map_err(|e| HistoryError::Io(format!("finish {}: {}", archive_path.display(), e)))?;

    let size = std::fs::metadata(archive_path)?.len();
    log::info!(
        "snapshot of {} written to {} ({} bytes, {} files)",
        source_dir.display(),
        archive_path.display(),
        size,
        files.len()
    );
    Ok((size, files))
}

/// Restore a snapshot into `target_dir`, replacing its contents.
pub fn restore_snapshot(archive_path: &Path, target_dir: &Path) -> HistoryResult<()> {
    verify_snapshot(archive_path)?;

    if target_dir.exists() {
        std::fs::remove_dir_all(target_dir)?;
    }
    std::fs::create_dir_all(target_dir)?;

    let file = File::open(archive_path)?;
    let decoder = GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    archive
        .unpack(target_dir)
        .map_err(|e| HistoryError::Io(format!("unpack {}: {}", archive_path.display(), e)))?;

    log::info!(
        "restored {} into {}",
        archive_path.display(),
        target_dir.display()
    );
    Ok(())
}

/// Verify a snapshot: non-zero size and a listable archive.
pub fn verify_snapshot(archive_path: &Path) -> HistoryResult<()> {
    let metadata = std::fs::metadata(archive_path).map_err(|_| {
        HistoryError::NotFound(format!("snapshot {} missing", archive_path.display()))
    })?;
    if metadata.len() == 0 {
        return Err(HistoryError::Integrity(format!(
            "snapshot {} is empty",
            archive_path.display()
        )));
    }
    list_snapshot(archive_path).map(|_| ())
}

/// List the entries of a snapshot archive.
pub fn list_snapshot(archive_path: &Path) -> HistoryResult<Vec<String>> {
    let file = File::open(archive_path)?;
    let decoder = GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);

    let mut names = Vec::new();
    let entries = archive
        .entries()
        .map_err(|e| HistoryError::Integrity(format!("{}: {}", archive_path.display(), e)))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| HistoryError::Integrity(format!("{}: {}", archive_path.display(), e)))?;
        let path = entry
            .path()
            .map_err(|e| HistoryError::Integrity(format!("{}: {}", archive_path.display(), e)))?;
        let name = path.to_string_lossy().into_owned();
        if name != "./" {
            names.push(name);
        }
    }
    Ok(names)
}

fn collect_files(root: &Path, dir: &Path) -> HistoryResult<Vec<String>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            files.extend(collect_files(root, &path)?);
        } else {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            files.push(relative.to_string_lossy().into_owned());
        }
    }
    files.sort();
    Ok(files)
}
