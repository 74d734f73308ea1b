//! Raw ROOT file discovery
//!
//! Recursive `*.root` listing under a stage output directory, plus the per-run
//! [`DirectoryListingCache`] that freezes each directory's listing on first read.

use dashmap::DashMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// File scanner errors
#[derive(Debug, Error)]
pub enum ScanError {
    /// Specified path does not exist
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Path exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// ROOT file scanner
pub struct FileScanner {
    extension: String,
}

impl FileScanner {
    pub fn new() -> Self {
        Self {
            extension: "root".to_string(),
        }
    }

    /// Recursively list files with the `.root` extension, sorted by path
    ///
    /// Sorting keeps the merge tool's input order stable between runs.
    pub fn scan(&self, root_path: &Path) -> Result<Vec<PathBuf>, ScanError> {
        if !root_path.exists() {
            return Err(ScanError::PathNotFound(root_path.to_path_buf()));
        }

        if !root_path.is_dir() {
            return Err(ScanError::NotADirectory(root_path.to_path_buf()));
        }

        let mut files = Vec::new();
        let mut symlink_visited = HashSet::new();

        let walker = WalkDir::new(root_path)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| Self::should_process_entry(e, &mut symlink_visited));

        for entry in walker {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() && self.has_extension(entry.path()) {
                        files.push(entry.path().to_path_buf());
                    }
                }
                Err(e) => {
                    // Continue scanning, don't abort
                    tracing::warn!("Error accessing entry: {}", e);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    fn should_process_entry(entry: &DirEntry, symlink_visited: &mut HashSet<PathBuf>) -> bool {
        if entry.path_is_symlink() {
            if let Ok(canonical) = entry.path().canonicalize() {
                if !symlink_visited.insert(canonical) {
                    tracing::warn!("Symlink loop detected: {}", entry.path().display());
                    return false;
                }
            }
        }
        true
    }

    fn has_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(&self.extension))
            .unwrap_or(false)
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Directory → file-list memo scoped to one pipeline run
///
/// The first listing of a directory is frozen for the lifetime of the cache; inputs
/// are not expected to change mid-run.
#[derive(Default)]
pub struct DirectoryListingCache {
    scanner: FileScanner,
    entries: DashMap<PathBuf, Arc<Vec<PathBuf>>>,
}

impl DirectoryListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached listing of `dir`; a missing or unreadable directory lists as empty
    pub fn list(&self, dir: &Path) -> Arc<Vec<PathBuf>> {
        if let Some(cached) = self.entries.get(dir) {
            return Arc::clone(cached.value());
        }

        let files = match self.scanner.scan(dir) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!("Cannot list ROOT files: {}", e);
                Vec::new()
            }
        };

        Arc::clone(
            self.entries
                .entry(dir.to_path_buf())
                .or_insert_with(|| Arc::new(files))
                .value(),
        )
    }

    /// Number of directories listed so far
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
