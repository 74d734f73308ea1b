//! Command-line interface
//!
//! Every option except `--recipe` and `--dry-run` can also come from a
//! `RAREXSEC_*` environment variable; clap applies CLI > ENV before the TOML and
//! compiled-default layers are consulted.

use clap::Parser;
use rarexsec_common::config::CliOverrides;
use std::path::PathBuf;

/// Command-line arguments for rarexsec-catalogue
#[derive(Parser, Debug)]
#[command(name = "rarexsec-catalogue")]
#[command(about = "Aggregate ROOT samples from a recipe into a catalogue with EXT POT-equivalent scaling")]
#[command(version)]
pub struct Args {
    /// Recipe JSON (instance)
    #[arg(long)]
    pub recipe: PathBuf,

    /// Trigger-count store (run.db, `runinfo` table)
    #[arg(long, env = "RAREXSEC_RUN_DB")]
    pub run_db: Option<PathBuf>,

    /// Beam-monitor store (NuMI DB, `numi` table)
    #[arg(long, env = "RAREXSEC_NUMI_DB")]
    pub numi_db: Option<PathBuf>,

    /// Parallel jobs for merging and file scans
    #[arg(long, env = "RAREXSEC_JOBS")]
    pub jobs: Option<usize>,

    /// Project XML file(s) mapping stage names to output directories
    #[arg(long = "xml", env = "RAREXSEC_XML", value_delimiter = ',')]
    pub xml_files: Vec<PathBuf>,

    /// Base URL of the prescale lookup service
    #[arg(long, env = "RAREXSEC_PRESCALE_URL")]
    pub prescale_url: Option<String>,

    /// Scratch directory for parallel merges
    #[arg(long, env = "RAREXSEC_SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Directory receiving samples.json
    #[arg(long = "output-dir", env = "RAREXSEC_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, env = "RAREXSEC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log merge commands without executing them
    #[arg(long)]
    pub dry_run: bool,
}

impl Args {
    pub fn to_overrides(&self) -> CliOverrides {
        CliOverrides {
            run_db: self.run_db.clone(),
            numi_db: self.numi_db.clone(),
            jobs: self.jobs,
            xml_files: self.xml_files.clone(),
            prescale_url: self.prescale_url.clone(),
            scratch_dir: self.scratch_dir.clone(),
            catalogue_dir: self.output_dir.clone(),
        }
    }
}
