//! (run, subrun) identifier extraction
//!
//! Looks for run/subrun columns in a prioritized list of tree locations; when none of
//! them yields pairs, scans every tree in the file and unions what it finds (the
//! columns can be split unpredictably across trees). Unreadable files contribute an
//! empty set and a warning; extraction never fails the caller.

use crate::services::event_file::{EventFile, EventFileReader};
use rarexsec_common::RunSubrun;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Tree locations tried in order before the full scan
pub const CANDIDATE_TREES: [&str; 8] = [
    "nuselection/SubRun",
    "nuselection/SubRuns",
    "SubRun",
    "SubRuns",
    "subrun",
    "subruns",
    "nuselection/Events",
    "Events",
];

/// Extracts the distinct (run, subrun) pairs present in event files
#[derive(Clone)]
pub struct IdentifierExtractor {
    reader: Arc<dyn EventFileReader>,
}

impl IdentifierExtractor {
    pub fn new(reader: Arc<dyn EventFileReader>) -> Self {
        Self { reader }
    }

    /// Union of per-file pairs across `files`
    pub fn extract_files(&self, files: &[PathBuf]) -> BTreeSet<RunSubrun> {
        let mut pairs = BTreeSet::new();
        for file in files {
            pairs.extend(self.extract_file(file));
        }
        pairs
    }

    /// Pairs present in a single file
    pub fn extract_file(&self, path: &Path) -> BTreeSet<RunSubrun> {
        let mut file = match self.reader.open(path) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed extracting (run,subrun): {}", e);
                return BTreeSet::new();
            }
        };

        for tree in CANDIDATE_TREES {
            let pairs = read_pairs(file.as_mut(), tree);
            if !pairs.is_empty() {
                tracing::debug!(path = %path.display(), tree, count = pairs.len(), "Found (run,subrun) pairs");
                return pairs;
            }
        }

        let trees = match file.tree_paths() {
            Ok(trees) => trees,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Schema scan failed: {}", e);
                return BTreeSet::new();
            }
        };

        let mut pairs = BTreeSet::new();
        for tree in &trees {
            pairs.extend(read_pairs(file.as_mut(), tree));
        }

        if pairs.is_empty() {
            tracing::debug!(path = %path.display(), trees = trees.len(), "No run/subrun columns found");
        }
        pairs
    }
}

/// Pairs from one tree, matching `run`/`subrun` branch names case-insensitively
fn read_pairs(file: &mut dyn EventFile, tree: &str) -> BTreeSet<RunSubrun> {
    let Some(branches) = file.branch_names(tree) else {
        return BTreeSet::new();
    };

    let by_lower: HashMap<String, String> = branches
        .into_iter()
        .map(|name| (name.to_lowercase(), name))
        .collect();

    let (Some(run_branch), Some(subrun_branch)) = (by_lower.get("run"), by_lower.get("subrun"))
    else {
        return BTreeSet::new();
    };

    let runs = match file.read_integers(tree, run_branch) {
        Ok(values) => values,
        Err(e) => {
            tracing::debug!(tree, "Skipping tree: {}", e);
            return BTreeSet::new();
        }
    };
    let subruns = match file.read_integers(tree, subrun_branch) {
        Ok(values) => values,
        Err(e) => {
            tracing::debug!(tree, "Skipping tree: {}", e);
            return BTreeSet::new();
        }
    };

    runs.into_iter()
        .zip(subruns)
        .map(|(run, subrun)| RunSubrun(run, subrun))
        .collect()
}
