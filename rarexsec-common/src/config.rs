//! Configuration loading and settings resolution
//!
//! Every setting resolves in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! Command-line arguments and environment variables arrive already merged in
//! [`CliOverrides`] (clap reads both); this module layers TOML and defaults below them.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Config file name looked up in the user and system config directories
pub const CONFIG_FILE_NAME: &str = "rarexsec.toml";

/// Name of the catalogue file written into the catalogue directory
pub const CATALOGUE_FILE_NAME: &str = "samples.json";

/// Logging section of the TOML file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default tracing level; `RUST_LOG` still wins at runtime
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Contents of `rarexsec.toml`; every field is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    pub run_db: Option<PathBuf>,
    pub numi_db: Option<PathBuf>,
    pub jobs: Option<usize>,
    #[serde(default)]
    pub xml_files: Vec<PathBuf>,
    pub prescale_url: Option<String>,
    pub scratch_dir: Option<PathBuf>,
    pub min_free_gb: Option<f64>,
    pub catalogue_dir: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TomlConfig {
    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }
}

/// Values supplied on the command line (or through their environment variables)
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub run_db: Option<PathBuf>,
    pub numi_db: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub xml_files: Vec<PathBuf>,
    pub prescale_url: Option<String>,
    pub scratch_dir: Option<PathBuf>,
    pub catalogue_dir: Option<PathBuf>,
}

/// Compiled defaults used when nothing else provides a value
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub run_db: PathBuf,
    pub numi_db: PathBuf,
    pub jobs: usize,
    pub scratch_dir: PathBuf,
    pub min_free_gb: f64,
    pub catalogue_dir: PathBuf,
    pub log_level: String,
}

impl Default for CompiledDefaults {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            run_db: PathBuf::from("/exp/uboone/data/uboonebeam/beamdb/run.db"),
            // v3 beam-quality cut DB carries the EA9CNT_wcut / tortgt_wcut columns
            numi_db: PathBuf::from("/exp/uboone/data/uboonebeam/beamdb/numi_v3.db"),
            jobs: cpus.min(8),
            scratch_dir: PathBuf::from("/pnfs/uboone/scratch/users/nlane/tmp/"),
            min_free_gb: 5.0,
            catalogue_dir: PathBuf::from("data").join("catalogues"),
            log_level: default_log_level(),
        }
    }
}

/// Fully resolved settings for one run of the tool
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub run_db: PathBuf,
    pub numi_db: PathBuf,
    pub jobs: usize,
    pub xml_files: Vec<PathBuf>,
    pub prescale_url: Option<String>,
    pub scratch_dir: PathBuf,
    pub min_free_gb: f64,
    pub catalogue_dir: PathBuf,
    pub log_level: String,
}

impl Settings {
    /// Path of the catalogue file this run writes
    pub fn catalogue_path(&self) -> PathBuf {
        self.catalogue_dir.join(CATALOGUE_FILE_NAME)
    }
}

/// Resolve each setting through the CLI > ENV > TOML > default chain
pub fn resolve_settings(
    cli: CliOverrides,
    toml_config: TomlConfig,
    defaults: CompiledDefaults,
) -> Settings {
    let jobs = cli
        .jobs
        .or(toml_config.jobs)
        .unwrap_or(defaults.jobs)
        .max(1);

    let xml_files = if !cli.xml_files.is_empty() {
        cli.xml_files
    } else {
        toml_config.xml_files
    };

    let prescale_url = cli
        .prescale_url
        .or(toml_config.prescale_url)
        .filter(|url| !url.trim().is_empty());

    Settings {
        run_db: cli.run_db.or(toml_config.run_db).unwrap_or(defaults.run_db),
        numi_db: cli.numi_db.or(toml_config.numi_db).unwrap_or(defaults.numi_db),
        jobs,
        xml_files,
        prescale_url,
        scratch_dir: cli
            .scratch_dir
            .or(toml_config.scratch_dir)
            .unwrap_or(defaults.scratch_dir),
        min_free_gb: toml_config.min_free_gb.unwrap_or(defaults.min_free_gb),
        catalogue_dir: cli
            .catalogue_dir
            .or(toml_config.catalogue_dir)
            .unwrap_or(defaults.catalogue_dir),
        log_level: toml_config.logging.level,
    }
}

/// Locate the TOML config file
///
/// An explicit path wins; otherwise `~/.config/rarexsec/rarexsec.toml`, then
/// `/etc/rarexsec/rarexsec.toml`.
pub fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let user_config = dirs::config_dir().map(|d| d.join("rarexsec").join(CONFIG_FILE_NAME));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/rarexsec").join(CONFIG_FILE_NAME);
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Load the TOML config, degrading to defaults on any problem
///
/// A missing, unreadable or malformed file logs a warning and yields
/// `TomlConfig::default()`; configuration files never abort the run.
pub fn load_toml_config(explicit: Option<&Path>) -> TomlConfig {
    let Some(path) = find_config_file(explicit) else {
        debug!("No config file found, using compiled defaults");
        return TomlConfig::default();
    };

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Config file {} not readable ({}), using defaults", path.display(), e);
            return TomlConfig::default();
        }
    };

    match TomlConfig::from_toml_str(&content) {
        Ok(config) => {
            info!("Loaded config file: {}", path.display());
            config
        }
        Err(e) => {
            warn!("Config file {} ignored: {}", path.display(), e);
            TomlConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_parses_partial_file() {
        let config = TomlConfig::from_toml_str(
            r#"
            jobs = 3
            prescale_url = "http://localhost:8080"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.jobs, Some(3));
        assert_eq!(config.prescale_url.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.logging.level, "debug");
        assert!(config.run_db.is_none());
        assert!(config.xml_files.is_empty());
    }

    #[test]
    fn test_toml_rejects_wrong_types() {
        assert!(TomlConfig::from_toml_str("jobs = \"many\"").is_err());
    }

    #[test]
    fn test_jobs_never_zero() {
        let cli = CliOverrides {
            jobs: Some(0),
            ..Default::default()
        };
        let settings = resolve_settings(cli, TomlConfig::default(), CompiledDefaults::default());
        assert_eq!(settings.jobs, 1);
    }

    #[test]
    fn test_blank_prescale_url_means_no_service() {
        let toml_config = TomlConfig {
            prescale_url: Some("  ".to_string()),
            ..Default::default()
        };
        let settings =
            resolve_settings(CliOverrides::default(), toml_config, CompiledDefaults::default());
        assert!(settings.prescale_url.is_none());
    }
}
