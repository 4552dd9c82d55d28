use crate::dataset::cloud::StorageOptions;
use crate::error::{EtlError, Result};
use crate::pipeline::{Interpreter, RunOptions, RunPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Named run policies selectable from the config file and the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PolicyPreset {
    /// CSV source first, CSV sink last
    Interactive,
    /// No gate
    Headless,
    /// Any source first, any sink last
    SourceToSink,
}

impl PolicyPreset {
    pub fn policy(self) -> RunPolicy {
        match self {
            Self::Interactive => RunPolicy::interactive(),
            Self::Headless => RunPolicy::headless(),
            Self::SourceToSink => RunPolicy::source_to_sink(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EtlConfig {
    /// Policy for CLI runs; each entry point has its own default when unset
    pub policy: Option<PolicyPreset>,
    /// Options for the object-store builder (credentials, region, endpoint)
    pub storage_options: StorageOptions,
    pub db_connect_timeout_secs: u64,
    /// Parquet row group size (default: adaptive to column count)
    pub parquet_row_group_size: Option<usize>,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            policy: None,
            storage_options: StorageOptions::new(),
            db_connect_timeout_secs: 10,
            parquet_row_group_size: None,
        }
    }
}

impl EtlConfig {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            storage_options: self.storage_options.clone(),
            db_connect_timeout: Duration::from_secs(self.db_connect_timeout_secs),
            parquet_row_group_size: self.parquet_row_group_size,
        }
    }

    pub fn interpreter(&self) -> Interpreter {
        Interpreter::new(self.run_options())
    }
}

/// `<config_dir>/geoetl/config.json`
pub fn get_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("geoetl").join("config.json"))
}

/// Load the config at `path`; a missing file yields the defaults.
///
/// # Errors
///
/// Fails if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<EtlConfig> {
    if !path.exists() {
        tracing::debug!("No config at {}, using defaults", path.display());
        return Ok(EtlConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| EtlError::Config(format!("Failed to read {}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| EtlError::Config(format!("Failed to parse {}: {e}", path.display())))
}

/// Load the config from the platform config directory.
///
/// # Errors
///
/// Fails if the file exists but cannot be read or parsed.
pub fn load_default_config() -> Result<EtlConfig> {
    match get_config_path() {
        Some(path) => load_config(&path),
        None => Ok(EtlConfig::default()),
    }
}

/// Write `config` as pretty JSON, creating parent directories.
///
/// # Errors
///
/// Fails if the file cannot be written.
pub fn save_config(config: &EtlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
