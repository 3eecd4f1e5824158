//! Run configuration, threaded explicitly into every entry point.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub munge: MungeConfig,
    pub annotate: AnnotateConfig,
    pub reference: ReferenceConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MungeConfig {
    /// P-value below which a row counts as significant in the run report.
    pub significance_threshold: f64,
    /// Compress and range-index the canonical table after writing it.
    pub build_index: bool,
    /// Field separator of the raw input; detected from the first line when unset.
    pub separator: Option<char>,
    pub skip_rows: usize,
    /// Lines starting with this character are skipped.
    pub comment: Option<char>,
    /// Force gzip decoding on or off; sniffed from the file when unset.
    pub gzipped: Option<bool>,
}

impl Default for MungeConfig {
    fn default() -> Self {
        Self {
            significance_threshold: 5e-8,
            build_index: true,
            separator: None,
            skip_rows: 0,
            comment: None,
            gzipped: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AnnotateConfig {
    /// Width of one range query, in (synthetic) base pairs.
    pub window: u64,
    /// Number of input rows held in memory at once.
    pub read_chunk_rows: usize,
    pub overwrite: bool,
    pub remove_failed: bool,
}

impl Default for AnnotateConfig {
    fn default() -> Self {
        Self {
            window: 2_000_000,
            read_chunk_rows: 100_000,
            overwrite: false,
            remove_failed: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ReferenceConfig {
    pub release: String,
    pub out_dir: PathBuf,
    pub compress: bool,
    /// Extra contig name → chromosome label mappings. Labels outside 1..22, X, Y
    /// are ignored.
    pub contig_aliases: BTreeMap<String, String>,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            release: "b156".to_string(),
            out_dir: PathBuf::from("."),
            compress: true,
            contig_aliases: BTreeMap::new(),
        }
    }
}

impl RunConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.munge.significance_threshold;
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "munge.significance_threshold must lie in (0, 1), got {threshold}"
            )));
        }
        if self.annotate.window == 0 {
            return Err(ConfigError::Invalid(
                "annotate.window must be positive".to_string(),
            ));
        }
        if self.annotate.read_chunk_rows == 0 {
            return Err(ConfigError::Invalid(
                "annotate.read_chunk_rows must be positive".to_string(),
            ));
        }
        if self.reference.release.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "reference.release must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
