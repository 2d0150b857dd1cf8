//! Training hyperparameters and service settings
//!
//! [`TrainingConfig`] is the immutable per-run value built from a validated
//! [`TrainingRequest`]. [`Settings`] holds service-wide choices read once at
//! start-up from an optional JSON file, with environment variables layered on
//! top.

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

pub const WINDOW_SIZE_RANGE: RangeInclusive<usize> = 5..=20;
pub const VALIDATION_SPLIT_RANGE: RangeInclusive<f64> = 0.05..=0.5;
pub const EPOCHS_RANGE: RangeInclusive<usize> = 1..=1000;
pub const BATCH_SIZE_RANGE: RangeInclusive<usize> = 1..=256;
pub const LEARNING_RATE_RANGE: RangeInclusive<f64> = 0.0001..=0.1;

/// Hyperparameters of one training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    window_size: usize,
    validation_split: f64,
    epochs: usize,
    batch_size: usize,
    learning_rate: f64,
}

impl TrainingConfig {
    /// Build a config, rejecting out-of-range values
    pub fn new(
        window_size: usize,
        validation_split: f64,
        epochs: usize,
        batch_size: usize,
        learning_rate: f64,
    ) -> Result<Self> {
        check_range("window_size", window_size, &WINDOW_SIZE_RANGE)?;
        check_range("validation_split", validation_split, &VALIDATION_SPLIT_RANGE)?;
        check_range("epochs", epochs, &EPOCHS_RANGE)?;
        check_range("batch_size", batch_size, &BATCH_SIZE_RANGE)?;
        check_range("learning_rate", learning_rate, &LEARNING_RATE_RANGE)?;

        Ok(Self {
            window_size,
            validation_split,
            epochs,
            batch_size,
            learning_rate,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn validation_split(&self) -> f64 {
        self.validation_split
    }

    pub fn epochs(&self) -> usize {
        self.epochs
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            validation_split: 0.2,
            epochs: 100,
            batch_size: 1,
            learning_rate: 0.001,
        }
    }
}

fn check_range<T>(name: &str, value: T, range: &RangeInclusive<T>) -> Result<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ForecastError::Validation(format!(
            "{} must be between {} and {}, got {}",
            name,
            range.start(),
            range.end(),
            value
        )))
    }
}

/// Training request payload; missing fields take their defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingRequest {
    pub window_size: Option<usize>,
    pub validation_split: Option<f64>,
    pub epochs: Option<usize>,
    pub batch_size: Option<usize>,
    pub learning_rate: Option<f64>,
}

impl TrainingRequest {
    /// Apply defaults and range checks
    pub fn validate(&self) -> Result<TrainingConfig> {
        let defaults = TrainingConfig::default();
        TrainingConfig::new(
            self.window_size.unwrap_or(defaults.window_size),
            self.validation_split.unwrap_or(defaults.validation_split),
            self.epochs.unwrap_or(defaults.epochs),
            self.batch_size.unwrap_or(defaults.batch_size),
            self.learning_rate.unwrap_or(defaults.learning_rate),
        )
    }
}

/// How a trained model decides whether it replaces the committed one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicyKind {
    Always,
    CompareMetrics,
}

/// Where prediction takes its normalization from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    /// Reuse the scalers stored with the artifact
    Persisted,
    /// Refit the scalers on the recent history at prediction time
    RefitOnRecent,
}

/// Which rows the training scalers are fitted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerFit {
    /// Only rows the training windows touch
    TrainPartition,
    /// Every row, validation period included
    FullHistory,
}

/// Service-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding committed, backup and temp artifacts
    pub model_dir: PathBuf,
    /// Seed for all randomness during fitting
    pub seed: u64,
    /// Early stopping patience in epochs
    pub patience: usize,
    /// Hidden layer width of the default regressor
    pub hidden_units: usize,
    pub commit_policy: CommitPolicyKind,
    pub scaling: ScalingMode,
    pub scaler_fit: ScalerFit,
    /// Relative half-width of the prediction band
    pub interval_band: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("./ml-models"),
            seed: 42,
            patience: 5,
            hidden_units: 64,
            commit_policy: CommitPolicyKind::Always,
            scaling: ScalingMode::Persisted,
            scaler_fit: ScalerFit::TrainPartition,
            interval_band: 0.1,
        }
    }
}

impl Settings {
    /// Read settings from `path` if given, then apply `DENGUECAST_*`
    /// environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let file = File::open(path)?;
                serde_json::from_reader(BufReader::new(file))?
            }
            None => Settings::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply overrides from a key lookup (the process environment in `load`)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("DENGUECAST_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(seed) = lookup("DENGUECAST_SEED") {
            self.seed = seed.trim().parse().map_err(|_| {
                ForecastError::Validation(format!("DENGUECAST_SEED is not an integer: {}", seed))
            })?;
        }
        Ok(())
    }

    /// Reject settings no pipeline run could work with
    pub fn validate(&self) -> Result<()> {
        if self.patience == 0 {
            return Err(ForecastError::Validation(
                "patience must be at least 1".to_string(),
            ));
        }
        if self.hidden_units == 0 {
            return Err(ForecastError::Validation(
                "hidden_units must be at least 1".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.interval_band) {
            return Err(ForecastError::Validation(format!(
                "interval_band must be within [0, 1), got {}",
                self.interval_band
            )));
        }
        Ok(())
    }
}
