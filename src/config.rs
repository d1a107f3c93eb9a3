// Pipeline configuration - every tunable the core logic reads

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// All knobs of the pipeline. Loadable from a JSON file; absent fields fall
/// back to the defaults below, so a config file only needs the overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Trailing-window length in days, inclusive of the reference date.
    pub window_days: i64,

    /// Reference date for the trailing window. None = latest date seen in
    /// the cleaned data.
    pub reference_date: Option<NaiveDate>,

    /// Winsorization percentile bounds, in [0, 100].
    pub winsor_lower_pct: f64,
    pub winsor_upper_pct: f64,

    /// Risk-score weights for the revenue / transactions / AOV z-scores.
    pub risk_weight_revenue: f64,
    pub risk_weight_transactions: f64,
    pub risk_weight_aov: f64,

    /// z-scores are clamped to [-z_clamp, +z_clamp] before weighting.
    pub z_clamp: f64,

    /// Watchlist thresholds: risk_score >= risk threshold (first branch),
    /// unclamped z < z threshold for both tx and AOV (second branch).
    pub watchlist_risk_threshold: f64,
    pub watchlist_z_threshold: f64,

    /// Inner lifecycle-bucket cutoffs in days, ascending. Zero always
    /// separates pre-open.
    pub age_bucket_days: [i64; 3],

    /// Entry count for top/bottom boards and per-region leader boards.
    pub board_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            window_days: 90,
            reference_date: None,
            winsor_lower_pct: 1.0,
            winsor_upper_pct: 99.0,
            risk_weight_revenue: 0.5,
            risk_weight_transactions: 0.3,
            risk_weight_aov: 0.2,
            z_clamp: 3.0,
            watchlist_risk_threshold: 70.0,
            watchlist_z_threshold: -0.5,
            age_bucket_days: [180, 365, 730],
            board_size: 10,
        }
    }
}

impl PipelineConfig {
    /// Load overrides from a JSON file on top of the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PipelineConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_days < 1 {
            return Err(ConfigError::Invalid(format!(
                "window_days must be >= 1, got {}",
                self.window_days
            )));
        }
        if !(0.0..=100.0).contains(&self.winsor_lower_pct)
            || !(0.0..=100.0).contains(&self.winsor_upper_pct)
            || self.winsor_lower_pct >= self.winsor_upper_pct
        {
            return Err(ConfigError::Invalid(format!(
                "winsorization bounds must satisfy 0 <= lower < upper <= 100, got {}/{}",
                self.winsor_lower_pct, self.winsor_upper_pct
            )));
        }
        for w in [
            self.risk_weight_revenue,
            self.risk_weight_transactions,
            self.risk_weight_aov,
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "risk weights must be finite and non-negative, got {}",
                    w
                )));
            }
        }
        if !self.z_clamp.is_finite() || self.z_clamp <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "z_clamp must be positive, got {}",
                self.z_clamp
            )));
        }
        if !(self.age_bucket_days[0] > 0
            && self.age_bucket_days[0] < self.age_bucket_days[1]
            && self.age_bucket_days[1] < self.age_bucket_days[2])
        {
            return Err(ConfigError::Invalid(format!(
                "age_bucket_days must be positive and ascending, got {:?}",
                self.age_bucket_days
            )));
        }
        if self.board_size == 0 {
            return Err(ConfigError::Invalid(
                "board_size must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}
