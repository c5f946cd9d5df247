//! Vault configuration — storage root, history start, instrument universe
//! and pacing knobs, stored as TOML.
//!
//! Instruments can be listed flat under `universe`, grouped under
//! `[sectors]`, or both; [`VaultConfig::instruments`] flattens them.

use crate::data::gaps::DEFAULT_MAX_GAP_DAYS;
use crate::data::ingest::PacingConfig;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// `[pacing]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingSection {
    pub max_batch_size: usize,
    pub base_delay_ms: u64,
    pub max_retries: u32,
}

impl Default for PacingSection {
    fn default() -> Self {
        let p = PacingConfig::default();
        Self {
            max_batch_size: p.max_batch_size,
            base_delay_ms: p.base_delay.as_millis() as u64,
            max_retries: p.max_retries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub root: PathBuf,
    pub start_date: NaiveDate,
    pub universe: Vec<String>,
    pub max_gap_days: i64,
    pub sectors: BTreeMap<String, Vec<String>>,
    pub pacing: PacingSection,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/prices"),
            start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or(NaiveDate::MIN),
            universe: ["AAPL", "MSFT", "GOOGL", "AMZN", "META"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_gap_days: DEFAULT_MAX_GAP_DAYS,
            sectors: BTreeMap::new(),
            pacing: PacingSection::default(),
        }
    }
}

impl VaultConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate. Missing keys take their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_gap_days < 0 {
            return Err(ConfigError::Invalid(format!(
                "max_gap_days must be >= 0, got {}",
                self.max_gap_days
            )));
        }
        if let Some(bad) = self.instruments().iter().find(|id| id.contains(',')) {
            return Err(ConfigError::Invalid(format!("instrument id {bad:?} contains a comma")));
        }
        Ok(())
    }

    /// `universe` followed by sector members, trimmed, blanks and
    /// duplicates dropped, first occurrence wins.
    pub fn instruments(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.universe
            .iter()
            .chain(self.sectors.values().flatten())
            .map(|id| id.trim())
            .filter(|id| !id.is_empty() && seen.insert(id.to_string()))
            .map(String::from)
            .collect()
    }

    pub fn pacing_config(&self) -> PacingConfig {
        PacingConfig {
            max_batch_size: self.pacing.max_batch_size.max(1),
            base_delay: Duration::from_millis(self.pacing.base_delay_ms),
            max_retries: self.pacing.max_retries.max(1),
            ..PacingConfig::default()
        }
    }
}
