//! Sequence regressors
//!
//! The pipeline treats the model as an opaque fit/predict capability. A
//! [`SequenceRegressor`] fits on windowed samples and produces a
//! [`FittedRegressor`] that maps one window to one normalized value and can
//! be saved to and loaded from an artifact file.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use series_math::Sample;
use std::fmt::Debug;

pub mod network;

pub use network::{FittedNetwork, WindowedNetwork};

/// Knobs that drive one fit
#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    /// Upper bound on training epochs
    pub epochs: usize,
    /// Samples per gradient step
    pub batch_size: usize,
    /// Optimizer step size
    pub learning_rate: f64,
    /// Epochs without validation improvement before stopping
    pub patience: usize,
    /// Seed for every source of randomness in the fit
    pub seed: u64,
}

/// Loss curves recorded while fitting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    /// Mean training loss per epoch
    pub train_loss: Vec<f64>,
    /// Validation loss per epoch
    pub val_loss: Vec<f64>,
    /// Zero-based epoch whose weights were kept
    pub best_epoch: usize,
    /// Whether early stopping ended the fit
    pub stopped_early: bool,
}

impl TrainingHistory {
    /// Number of epochs actually run
    pub fn epochs_completed(&self) -> usize {
        self.train_loss.len()
    }

    /// Lowest validation loss seen
    pub fn best_val_loss(&self) -> Option<f64> {
        self.val_loss.get(self.best_epoch).copied()
    }
}

/// A trained model that can score windows
pub trait FittedRegressor: Debug + Serialize + DeserializeOwned + Send + Sync {
    /// Predict the normalized target following `window` (rows oldest first)
    fn predict_one(&self, window: &[Vec<f64>]) -> Result<f64>;

    /// Predict every sample's target
    fn predict(&self, samples: &[Sample]) -> Result<Vec<f64>> {
        samples.iter().map(|s| self.predict_one(&s.input)).collect()
    }

    /// Window width the model was fitted on
    fn window_size(&self) -> usize;
}

/// A model that can be fitted on windowed samples
pub trait SequenceRegressor: Debug + Clone + Send + Sync {
    /// The type of trained model produced
    type Fitted: FittedRegressor;

    /// Fit on `train`, monitoring `validation` for early stopping
    fn fit(
        &self,
        train: &[Sample],
        validation: &[Sample],
        options: &FitOptions,
    ) -> Result<(Self::Fitted, TrainingHistory)>;

    /// Get the name of the model
    fn name(&self) -> &str;
}
