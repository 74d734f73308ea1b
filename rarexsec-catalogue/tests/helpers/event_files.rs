//! In-memory stand-ins for ROOT files and `hadd`
//!
//! A test "event file" is a JSON document `{tree: {branch: [numbers...]}}` on disk.
//! [`JsonEventReader`] reads it through the `EventFileReader` seam and
//! [`ConcatMerger`] merges inputs by concatenating same-named branches, which is what
//! `hadd` does for flat trees.

use async_trait::async_trait;
use rarexsec_catalogue::services::{
    EventFile, EventFileError, EventFileReader, FileMerger, MergeError, MergeReport,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type Trees = BTreeMap<String, BTreeMap<String, Vec<f64>>>;

/// Write a JSON event file
pub fn write_event_file(path: &Path, trees: Value) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, serde_json::to_vec(&trees).unwrap()).unwrap();
}

/// `nuselection/SubRun` tree with run/subrun columns and a constant per-subrun POT
pub fn subrun_tree(pairs: &[(i64, i64)], pot_per_subrun: f64) -> Value {
    let runs: Vec<i64> = pairs.iter().map(|p| p.0).collect();
    let subruns: Vec<i64> = pairs.iter().map(|p| p.1).collect();
    let pot: Vec<f64> = pairs.iter().map(|_| pot_per_subrun).collect();
    json!({
        "nuselection/SubRun": {"run": runs, "subRun": subruns, "pot": pot}
    })
}

fn read_trees(path: &Path) -> Result<Trees, EventFileError> {
    let bytes = std::fs::read(path).map_err(|e| EventFileError::Open(path.to_path_buf(), e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| EventFileError::Open(path.to_path_buf(), e.to_string()))
}

/// Reads JSON event files; counts opens
#[derive(Default)]
pub struct JsonEventReader {
    pub opens: AtomicUsize,
}

impl JsonEventReader {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

struct JsonEventFile {
    trees: Trees,
}

impl JsonEventFile {
    fn branch(&self, tree: &str, branch: &str) -> Result<&Vec<f64>, EventFileError> {
        self.trees
            .get(tree)
            .ok_or_else(|| EventFileError::TreeNotFound(tree.to_string()))?
            .get(branch)
            .ok_or_else(|| EventFileError::BranchNotFound {
                tree: tree.to_string(),
                branch: branch.to_string(),
            })
    }
}

impl EventFile for JsonEventFile {
    fn branch_names(&mut self, tree: &str) -> Option<Vec<String>> {
        self.trees.get(tree).map(|b| b.keys().cloned().collect())
    }

    fn read_integers(&mut self, tree: &str, branch: &str) -> Result<Vec<i64>, EventFileError> {
        Ok(self.branch(tree, branch)?.iter().map(|v| *v as i64).collect())
    }

    fn read_floats(&mut self, tree: &str, branch: &str) -> Result<Vec<f64>, EventFileError> {
        Ok(self.branch(tree, branch)?.clone())
    }

    fn tree_paths(&mut self) -> Result<Vec<String>, EventFileError> {
        Ok(self.trees.keys().cloned().collect())
    }
}

impl EventFileReader for JsonEventReader {
    fn open(&self, path: &Path) -> Result<Box<dyn EventFile>, EventFileError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(JsonEventFile {
            trees: read_trees(path)?,
        }))
    }
}

/// Merger that concatenates branches of JSON event files
#[derive(Default)]
pub struct ConcatMerger {
    pub calls: Mutex<Vec<(PathBuf, Vec<PathBuf>)>>,
    /// Exit with a failure for outputs whose file name contains this text
    pub fail_on: Option<String>,
    /// Record calls without writing anything, like `hadd` in dry-run mode
    pub dry_run: bool,
}

impl ConcatMerger {
    pub fn failing_on(pattern: &str) -> Self {
        Self {
            fail_on: Some(pattern.to_string()),
            ..Self::default()
        }
    }

    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl FileMerger for ConcatMerger {
    async fn merge(&self, output: &Path, inputs: &[PathBuf]) -> Result<MergeReport, MergeError> {
        self.calls
            .lock()
            .unwrap()
            .push((output.to_path_buf(), inputs.to_vec()));

        let name = output.file_name().unwrap().to_string_lossy().to_string();
        if let Some(pattern) = &self.fail_on {
            if name.contains(pattern.as_str()) {
                return Err(MergeError::ExitStatus(Some(1)));
            }
        }

        if self.dry_run {
            return Ok(MergeReport { executed: false });
        }

        let mut merged: Trees = BTreeMap::new();
        for input in inputs {
            let trees = read_trees(input).map_err(|e| MergeError::Spawn(e.to_string()))?;
            for (tree, branches) in trees {
                let target = merged.entry(tree).or_default();
                for (branch, values) in branches {
                    target.entry(branch).or_default().extend(values);
                }
            }
        }

        let value: Map<String, Value> = merged
            .into_iter()
            .map(|(tree, branches)| (tree, serde_json::to_value(branches).unwrap()))
            .collect();
        write_event_file(output, Value::Object(value));

        Ok(MergeReport { executed: true })
    }
}
