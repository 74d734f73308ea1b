//! POT accumulation
//!
//! Sums the per-subrun `pot` column of `nuselection/SubRun` across files. Merged
//! artifacts go through a bounded worker pool backed by an mtime-keyed cache; raw
//! source files (no merged artifact yet) are streamed in size-bounded chunks.

use crate::services::event_file::{EventFileError, EventFileReader};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

pub const POT_TREE: &str = "nuselection/SubRun";
pub const POT_BRANCH: &str = "pot";

/// Upper bound on the on-disk size of one streaming chunk
pub const STREAM_CHUNK_BYTES: u64 = 50 * 1024 * 1024;

/// Per-file POT memo keyed by (path, modification time)
///
/// A rewritten file gets a new mtime and therefore a new key; stale entries are
/// never consulted again.
#[derive(Debug, Default)]
pub struct PotCache {
    entries: DashMap<(PathBuf, SystemTime), f64>,
}

impl PotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value for `key`, computing and storing it on a miss
    ///
    /// Failed computations are not cached.
    pub fn get_or_compute<F>(&self, key: (PathBuf, SystemTime), compute: F) -> Result<f64, EventFileError>
    where
        F: FnOnce() -> Result<f64, EventFileError>,
    {
        if let Some(value) = self.entries.get(&key) {
            return Ok(*value);
        }
        let value = compute()?;
        self.entries.insert(key, value);
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// POT summation over event files
#[derive(Clone)]
pub struct PotAccumulator {
    reader: Arc<dyn EventFileReader>,
    cache: Arc<PotCache>,
}

impl PotAccumulator {
    pub fn new(reader: Arc<dyn EventFileReader>, cache: Arc<PotCache>) -> Self {
        Self { reader, cache }
    }

    /// Same reader, different cache
    pub fn with_cache(self, cache: Arc<PotCache>) -> Self {
        Self { cache, ..self }
    }

    /// POT recorded in one file; unreadable files contribute 0.0
    pub fn file_pot(&self, path: &Path) -> f64 {
        if !path.is_file() {
            return 0.0;
        }

        let mtime = std::fs::metadata(path).and_then(|m| m.modified());
        let result = match mtime {
            Ok(mtime) => self
                .cache
                .get_or_compute((path.to_path_buf(), mtime), || self.read_pot(path)),
            Err(_) => self.read_pot(path),
        };

        match result {
            Ok(pot) => pot,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Could not read POT: {}", e);
                0.0
            }
        }
    }

    /// Sum over `files` with at most `min(files.len(), jobs)` concurrent reads
    ///
    /// Contributions are added in input order so repeated runs give identical totals.
    pub async fn sum_parallel(&self, files: &[PathBuf], jobs: usize) -> f64 {
        if files.is_empty() {
            return 0.0;
        }
        let workers = files.len().min(jobs.max(1));

        let contributions: Vec<f64> = stream::iter(files.to_vec())
            .map(|path| {
                let accumulator = self.clone();
                async move {
                    let shown = path.display().to_string();
                    match tokio::task::spawn_blocking(move || accumulator.file_pot(&path)).await {
                        Ok(pot) => pot,
                        Err(e) => {
                            tracing::warn!(path = %shown, "POT worker failed: {}", e);
                            0.0
                        }
                    }
                }
            })
            .buffered(workers)
            .collect()
            .await;

        contributions.iter().sum()
    }

    /// Sum over raw source files, holding at most one chunk of branch data at a time
    pub async fn sum_streaming(&self, files: &[PathBuf]) -> f64 {
        if files.is_empty() {
            return 0.0;
        }
        let accumulator = self.clone();
        let files = files.to_vec();
        match tokio::task::spawn_blocking(move || accumulator.stream_sum(&files)).await {
            Ok(pot) => pot,
            Err(e) => {
                tracing::warn!("Streaming POT sum failed: {}", e);
                0.0
            }
        }
    }

    fn stream_sum(&self, files: &[PathBuf]) -> f64 {
        let mut total = 0.0;
        for chunk in size_bounded_chunks(files, STREAM_CHUNK_BYTES) {
            let mut values: Vec<f64> = Vec::new();
            for path in chunk {
                match self.reader.open(path).and_then(|mut f| f.read_floats(POT_TREE, POT_BRANCH)) {
                    Ok(mut column) => values.append(&mut column),
                    Err(e) => tracing::warn!(path = %path.display(), "Could not read POT: {}", e),
                }
            }
            total += values.iter().sum::<f64>();
        }
        total
    }

    fn read_pot(&self, path: &Path) -> Result<f64, EventFileError> {
        let mut file = self.reader.open(path)?;
        let column = file.read_floats(POT_TREE, POT_BRANCH)?;
        Ok(column.iter().sum())
    }
}

/// Split `files` into consecutive groups whose combined size stays under `limit`
///
/// A single file larger than `limit` forms its own group.
fn size_bounded_chunks(files: &[PathBuf], limit: u64) -> Vec<&[PathBuf]> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut bytes = 0u64;

    for (i, path) in files.iter().enumerate() {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if i > start && bytes + size > limit {
            chunks.push(&files[start..i]);
            start = i;
            bytes = 0;
        }
        bytes += size;
    }
    if start < files.len() {
        chunks.push(&files[start..]);
    }
    chunks
}
