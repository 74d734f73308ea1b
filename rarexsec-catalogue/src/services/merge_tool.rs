//! Merge tool invocation
//!
//! Wraps ROOT's `hadd`. Parallel mode (`-j <jobs> -d <scratch>`) is used only when
//! more than one job is allowed and the scratch area has enough free space.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Merge tool errors
#[derive(Debug, Error)]
pub enum MergeError {
    /// Merge binary not found in PATH
    #[error("'{0}' not found in PATH (set up ROOT first, e.g. `setup root`)")]
    BinaryNotFound(String),

    /// Failed to start the merge process
    #[error("Failed to execute merge tool: {0}")]
    Spawn(String),

    /// Merge process exited unsuccessfully
    #[error("Merge tool exited with status {0:?}")]
    ExitStatus(Option<i32>),

    /// Blocking task failed
    #[error("Task join error: {0}")]
    Join(String),
}

/// Outcome of a successful merge call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    /// False in dry-run mode (nothing was written)
    pub executed: bool,
}

/// Merges input event files into one output artifact
#[async_trait]
pub trait FileMerger: Send + Sync {
    async fn merge(&self, output: &Path, inputs: &[PathBuf]) -> Result<MergeReport, MergeError>;
}

/// `hadd`-backed merger
#[derive(Debug, Clone)]
pub struct HaddMerger {
    binary: String,
    jobs: usize,
    scratch_dir: PathBuf,
    min_free_gb: f64,
    dry_run: bool,
}

impl HaddMerger {
    pub fn new(jobs: usize, scratch_dir: PathBuf, min_free_gb: f64, dry_run: bool) -> Self {
        Self {
            binary: "hadd".to_string(),
            jobs,
            scratch_dir,
            min_free_gb,
            dry_run,
        }
    }

    /// Override the merge binary (name looked up on PATH, or a path)
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Whether the scratch area allows a parallel merge
    pub fn parallel_allowed(&self) -> bool {
        if self.jobs <= 1 {
            return false;
        }

        let free_gb = match std::fs::create_dir_all(&self.scratch_dir)
            .and_then(|_| fs2::available_space(&self.scratch_dir))
        {
            Ok(bytes) => bytes as f64 / GIB,
            Err(e) => {
                tracing::warn!(
                    scratch = %self.scratch_dir.display(),
                    "Could not evaluate free space: {}. Falling back to single-process merge",
                    e
                );
                return false;
            }
        };

        if free_gb < self.min_free_gb {
            tracing::info!(
                scratch = %self.scratch_dir.display(),
                "Only {:.1} GB free. Falling back to single-process merge",
                free_gb
            );
            return false;
        }
        true
    }

    /// Full argument list, binary first
    pub fn build_command(&self, output: &Path, inputs: &[PathBuf], parallel: bool) -> Vec<String> {
        let mut cmd = vec![self.binary.clone(), "-f".to_string()];
        if parallel {
            cmd.push("-j".to_string());
            cmd.push(self.jobs.to_string());
            cmd.push("-d".to_string());
            cmd.push(self.scratch_dir.display().to_string());
        }
        cmd.push(output.display().to_string());
        cmd.extend(inputs.iter().map(|p| p.display().to_string()));
        cmd
    }
}

#[async_trait]
impl FileMerger for HaddMerger {
    async fn merge(&self, output: &Path, inputs: &[PathBuf]) -> Result<MergeReport, MergeError> {
        let parallel = self.parallel_allowed();
        let cmd = self.build_command(output, inputs, parallel);

        tracing::info!(command = %cmd.join(" "), "Merge command");

        if self.dry_run {
            tracing::info!("Dry run mode. Merge command not executed");
            return Ok(MergeReport { executed: false });
        }

        if find_in_path(&self.binary).is_none() {
            return Err(MergeError::BinaryNotFound(self.binary.clone()));
        }

        let status = tokio::task::spawn_blocking(move || {
            Command::new(&cmd[0]).args(&cmd[1..]).status()
        })
        .await
        .map_err(|e| MergeError::Join(e.to_string()))?
        .map_err(|e| MergeError::Spawn(e.to_string()))?;

        if !status.success() {
            return Err(MergeError::ExitStatus(status.code()));
        }

        tracing::info!(output = %output.display(), "Merge execution successful");
        Ok(MergeReport { executed: true })
    }
}

/// Resolve a binary name against PATH; names containing a separator are taken as-is
fn find_in_path(binary: &str) -> Option<PathBuf> {
    let candidate = Path::new(binary);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(binary))
        .find(|p| p.is_file())
}
