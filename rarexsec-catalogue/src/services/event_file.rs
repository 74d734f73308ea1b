//! Event-file access
//!
//! The pipeline reads two kinds of things out of ROOT files: branch listings (to find
//! the tree carrying run/subrun columns) and whole numeric branches. Both go through
//! [`EventFileReader`] / [`EventFile`] so the readers above never touch the on-disk
//! format directly; [`RootFileReader`] is the production implementation.

use crate::services::root_layout::{KeyRecord, RootLayout};
use std::collections::hash_map::{Entry, HashMap};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Event-file access errors
#[derive(Debug, Error)]
pub enum EventFileError {
    /// File could not be opened or is not a ROOT file
    #[error("Cannot open {0}: {1}")]
    Open(PathBuf, String),

    /// Requested tree does not exist in the file
    #[error("Tree not found: {0}")]
    TreeNotFound(String),

    /// Requested branch does not exist in the tree
    #[error("Branch '{branch}' not found in tree '{tree}'")]
    BranchNotFound { tree: String, branch: String },

    /// The object decoder rejected a stored object
    #[error("Cannot decode '{object}': {reason}")]
    Decode { object: String, reason: String },

    /// Branch exists but its contents could not be decoded
    #[error("Cannot read branch '{branch}' of tree '{tree}': {reason}")]
    Read {
        tree: String,
        branch: String,
        reason: String,
    },
}

/// An opened event file
pub trait EventFile {
    /// Branch names of `tree`, or `None` when no such tree exists
    fn branch_names(&mut self, tree: &str) -> Option<Vec<String>>;

    /// Read an integer-valued branch (floating columns are truncated)
    fn read_integers(&mut self, tree: &str, branch: &str) -> Result<Vec<i64>, EventFileError>;

    /// Read a numeric branch as `f64`
    fn read_floats(&mut self, tree: &str, branch: &str) -> Result<Vec<f64>, EventFileError>;

    /// Paths of every tree in the file, sub-directories included (`dir/tree`)
    fn tree_paths(&mut self) -> Result<Vec<String>, EventFileError>;
}

/// Opens event files; shared across worker threads
pub trait EventFileReader: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn EventFile>, EventFileError>;
}

/// ROOT-backed reader
///
/// Trees are located through [`RootLayout`] first, so only keys of class `TTree`
/// ever reach the object decoder. Trees below a sub-directory are read through a
/// directory view: a scratch copy of the file whose top directory is re-pointed at
/// that sub-directory's key list. Views live under the system temp dir (`TMPDIR`).
#[derive(Debug, Clone, Copy, Default)]
pub struct RootFileReader;

impl EventFileReader for RootFileReader {
    fn open(&self, path: &Path) -> Result<Box<dyn EventFile>, EventFileError> {
        let open_error = |reason: String| EventFileError::Open(path.to_path_buf(), reason);

        let layout = RootLayout::read(path).map_err(|e| open_error(e.to_string()))?;
        let file = guarded(|| oxyroot::RootFile::open(path))
            .map_err(open_error)?
            .map_err(|e| open_error(e.to_string()))?;

        Ok(Box::new(RootEventFile {
            path: path.to_path_buf(),
            layout,
            file,
            views: HashMap::new(),
        }))
    }
}

struct RootEventFile {
    path: PathBuf,
    layout: RootLayout,
    file: oxyroot::RootFile,
    views: HashMap<String, DirectoryView>,
}

/// Scratch copy opened with a sub-directory as its top directory
///
/// TODO: drop the copy once oxyroot can open sub-directory key lists itself.
struct DirectoryView {
    file: oxyroot::RootFile,
    // Dropped after `file`; removes the copy
    _scratch: tempfile::TempDir,
}

impl DirectoryView {
    fn create(source: &Path, layout: &RootLayout, dir: &str) -> Result<Self, EventFileError> {
        let open_error = |reason: String| EventFileError::Open(source.to_path_buf(), reason);

        let scratch = tempfile::Builder::new()
            .prefix("rarexsec-view")
            .tempdir()
            .map_err(|e| open_error(e.to_string()))?;
        let copy = scratch.path().join("view.root");
        let mut handle = std::fs::File::open(source)
            .and_then(|mut original| {
                let mut handle = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&copy)?;
                std::io::copy(&mut original, &mut handle)?;
                Ok(handle)
            })
            .map_err(|e| open_error(e.to_string()))?;
        layout
            .retarget_top(&mut handle, dir)
            .map_err(|e| open_error(e.to_string()))?;
        drop(handle);

        let file = guarded(|| oxyroot::RootFile::open(&copy))
            .map_err(open_error)?
            .map_err(|e| open_error(e.to_string()))?;
        tracing::debug!(source = %source.display(), directory = dir, "Opened directory view");

        Ok(Self {
            file,
            _scratch: scratch,
        })
    }
}

impl RootEventFile {
    fn tree(&mut self, path: &str) -> Result<oxyroot::ReaderTree, EventFileError> {
        let not_found = || EventFileError::TreeNotFound(path.to_string());
        if !self.layout.key(path).is_some_and(KeyRecord::is_tree) {
            return Err(not_found());
        }

        let (dir, name) = path.rsplit_once('/').unwrap_or(("", path));
        let file = if dir.is_empty() {
            &mut self.file
        } else {
            match self.views.entry(dir.to_string()) {
                Entry::Occupied(view) => &mut view.into_mut().file,
                Entry::Vacant(slot) => {
                    let view = DirectoryView::create(&self.path, &self.layout, dir)?;
                    &mut slot.insert(view).file
                }
            }
        };

        guarded(|| file.get_tree(name))
            .map_err(|reason| EventFileError::Decode {
                object: path.to_string(),
                reason,
            })?
            .map_err(|_| not_found())
    }

    fn read_branch<T>(
        &mut self,
        tree_name: &str,
        branch_name: &str,
        decode: fn(&oxyroot::Branch) -> Option<Vec<T>>,
    ) -> Result<Vec<T>, EventFileError> {
        let tree = self.tree(tree_name)?;
        let branch = tree.branch(branch_name).ok_or_else(|| EventFileError::BranchNotFound {
            tree: tree_name.to_string(),
            branch: branch_name.to_string(),
        })?;

        match guarded(|| decode(branch)) {
            Ok(Some(values)) => Ok(values),
            Ok(None) => Err(read_error(
                tree_name,
                branch_name,
                &format!("unsupported leaf type {}", branch.item_type_name()),
            )),
            Err(reason) => Err(read_error(tree_name, branch_name, &reason)),
        }
    }
}

/// Run an oxyroot call, turning a panic inside the decoder into an error message
fn guarded<T>(call: impl FnOnce() -> T) -> Result<T, String> {
    std::panic::catch_unwind(AssertUnwindSafe(call)).map_err(|payload| {
        payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "decoder panicked".to_string())
    })
}

fn read_error(tree: &str, branch: &str, reason: &str) -> EventFileError {
    EventFileError::Read {
        tree: tree.to_string(),
        branch: branch.to_string(),
        reason: reason.to_string(),
    }
}

// Leaf types vary between ntuple productions
fn decode_integers(branch: &oxyroot::Branch) -> Option<Vec<i64>> {
    if let Ok(values) = branch.as_iter::<i32>() {
        return Some(values.map(i64::from).collect());
    }
    if let Ok(values) = branch.as_iter::<u32>() {
        return Some(values.map(i64::from).collect());
    }
    if let Ok(values) = branch.as_iter::<i64>() {
        return Some(values.collect());
    }
    if let Ok(values) = branch.as_iter::<f64>() {
        return Some(values.map(|v| v as i64).collect());
    }
    if let Ok(values) = branch.as_iter::<f32>() {
        return Some(values.map(|v| v as i64).collect());
    }
    None
}

fn decode_floats(branch: &oxyroot::Branch) -> Option<Vec<f64>> {
    if let Ok(values) = branch.as_iter::<f64>() {
        return Some(values.collect());
    }
    if let Ok(values) = branch.as_iter::<f32>() {
        return Some(values.map(f64::from).collect());
    }
    if let Ok(values) = branch.as_iter::<i32>() {
        return Some(values.map(f64::from).collect());
    }
    if let Ok(values) = branch.as_iter::<i64>() {
        return Some(values.map(|v| v as f64).collect());
    }
    None
}

impl EventFile for RootEventFile {
    fn branch_names(&mut self, tree: &str) -> Option<Vec<String>> {
        let tree = self.tree(tree).ok()?;
        Some(tree.branches().map(|b| b.name().to_string()).collect())
    }

    fn read_integers(&mut self, tree_name: &str, branch_name: &str) -> Result<Vec<i64>, EventFileError> {
        self.read_branch(tree_name, branch_name, decode_integers)
    }

    fn read_floats(&mut self, tree_name: &str, branch_name: &str) -> Result<Vec<f64>, EventFileError> {
        self.read_branch(tree_name, branch_name, decode_floats)
    }

    fn tree_paths(&mut self) -> Result<Vec<String>, EventFileError> {
        Ok(self.layout.tree_paths().map(str::to_string).collect())
    }
}
