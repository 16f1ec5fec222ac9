//! Run configuration.
//!
//! `RunConfig` is the only runtime surface: where the SQLite database and the
//! SQL template live, which monthly snapshots to materialise, and where the
//! model bundle goes. It loads from TOML and can be overridden flag by flag.
//! Training constants (seed, split fraction, folds) live in `TrainingConfig`.

use chrono::{Datelike, NaiveDate};
use salesabt_core::AbtSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{field} must fall on the first day of a month, got {date}")]
    NotMonthStart { field: &'static str, date: NaiveDate },

    #[error("first_snapshot {first} is after last_snapshot {last}")]
    SnapshotOrder { first: NaiveDate, last: NaiveDate },

    #[error("invalid training config: {0}")]
    Training(String),
}

/// Unique identifier for a run configuration (content hash).
pub type RunId = String;

/// Runtime options of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// SQLite database holding the source tables and the ABT.
    pub data_path: PathBuf,
    /// SQL template with a `{data_ref}` placeholder for the snapshot date.
    pub query_path: PathBuf,
    /// First snapshot to materialise (inclusive).
    pub first_snapshot: NaiveDate,
    /// Last snapshot to materialise (inclusive).
    pub last_snapshot: NaiveDate,
    /// Directory receiving the model bundle.
    pub model_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        let snapshot = NaiveDate::from_ymd_opt(2018, 5, 1).unwrap_or_default();
        Self {
            data_path: PathBuf::from("data/olist_dsa.db"),
            query_path: PathBuf::from("sql/Script_ABT_olist_dtref_safra_20200818.sql"),
            first_snapshot: snapshot,
            last_snapshot: snapshot,
            model_dir: PathBuf::from("models"),
        }
    }
}

impl RunConfig {
    /// Load a config from a TOML file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, date) in [
            ("first_snapshot", self.first_snapshot),
            ("last_snapshot", self.last_snapshot),
        ] {
            if date.day() != 1 {
                return Err(ConfigError::NotMonthStart { field, date });
            }
        }
        if self.first_snapshot > self.last_snapshot {
            return Err(ConfigError::SnapshotOrder {
                first: self.first_snapshot,
                last: self.last_snapshot,
            });
        }
        Ok(())
    }

    /// Deterministic hash of this configuration.
    pub fn run_id(&self) -> RunId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.data_path.to_string_lossy().as_bytes());
        hasher.update(&[0]);
        hasher.update(self.query_path.to_string_lossy().as_bytes());
        hasher.update(&[0]);
        hasher.update(self.first_snapshot.to_string().as_bytes());
        hasher.update(self.last_snapshot.to_string().as_bytes());
        hasher.update(self.model_dir.to_string_lossy().as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

// ─── Training constants ──────────────────────────────────────────────

/// How candidates score their grid points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringPolicy {
    /// ROC AUC for the logistic candidate, negative RMSE for the tree families.
    #[default]
    Observed,
    /// ROC AUC for every candidate.
    Unified,
}

/// Code-level training settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub schema: AbtSchema,
    /// Master seed for the train/test shuffle and seeded estimators.
    pub seed: u64,
    pub test_fraction: f64,
    pub cv_folds: usize,
    /// Run grid-point × fold units on the rayon pool.
    pub parallel: bool,
    pub scoring_policy: ScoringPolicy,
    /// Importances reported and exported.
    pub top_importances: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            schema: AbtSchema::default(),
            seed: 1992,
            test_fraction: 0.25,
            cv_folds: 3,
            parallel: true,
            scoring_policy: ScoringPolicy::Observed,
            top_importances: 20,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(ConfigError::Training(format!(
                "test_fraction must be in (0, 1), got {}",
                self.test_fraction
            )));
        }
        if self.cv_folds < 2 {
            return Err(ConfigError::Training(format!(
                "cv_folds must be at least 2, got {}",
                self.cv_folds
            )));
        }
        self.schema
            .validate()
            .map_err(|e| ConfigError::Training(e.to_string()))
    }
}
