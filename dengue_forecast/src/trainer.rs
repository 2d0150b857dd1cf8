//! Training pipeline
//!
//! Turns an ordered weekly series into a fitted regressor plus the metadata
//! that describes it. Scaling, windowing and splitting happen here; the
//! regressor itself only ever sees normalized windows.

use crate::artifacts::{new_artifact_id, FeatureScaling, ModelMetadata};
use crate::config::{ScalerFit, TrainingConfig};
use crate::data::WeeklyObservation;
use crate::error::{insufficient, ForecastError, Result};
use crate::location::LocationKey;
use crate::models::{FitOptions, FittedRegressor, SequenceRegressor, TrainingHistory};
use chrono::Local;
use series_math::{make_windows, train_validation_split, RegressionMetrics};

/// Settings of the trainer that do not vary per request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainerOptions {
    pub seed: u64,
    pub patience: usize,
    pub scaler_fit: ScalerFit,
}

impl Default for TrainerOptions {
    fn default() -> Self {
        Self {
            seed: 42,
            patience: 5,
            scaler_fit: ScalerFit::TrainPartition,
        }
    }
}

/// A fitted model that has not been written anywhere yet
#[derive(Debug, Clone)]
pub struct TrainingOutcome<M> {
    pub model: M,
    pub metadata: ModelMetadata,
    pub history: TrainingHistory,
}

/// Fits a [`SequenceRegressor`] on weekly observations
#[derive(Debug, Clone)]
pub struct Trainer<R> {
    regressor: R,
    options: TrainerOptions,
}

impl<R: SequenceRegressor> Trainer<R> {
    pub fn new(regressor: R, options: TrainerOptions) -> Self {
        Self { regressor, options }
    }

    pub fn options(&self) -> &TrainerOptions {
        &self.options
    }

    /// Train and validation sample counts for a series of
    /// `observation_count` weeks, or `InsufficientData` if it is too short
    pub fn check_sufficient(
        &self,
        observation_count: usize,
        config: &TrainingConfig,
    ) -> Result<(usize, usize)> {
        let w = config.window_size();
        if observation_count <= w {
            return Err(ForecastError::InsufficientData(format!(
                "Need more than {} weekly observations for a window of {}, got {}",
                w, w, observation_count
            )));
        }
        train_validation_split(observation_count - w, config.validation_split()).map_err(insufficient)
    }

    /// Train on `observations` (ascending by week) for `key`.
    ///
    /// Nothing is written to disk; the caller stages and commits the outcome.
    pub fn train(
        &self,
        key: &LocationKey,
        observations: &[WeeklyObservation],
        config: &TrainingConfig,
    ) -> Result<TrainingOutcome<R::Fitted>> {
        let w = config.window_size();
        let (n_train, n_val) = self.check_sufficient(observations.len(), config)?;

        // Training windows and their labels only touch rows [0, w + n_train)
        let fit_rows = match self.options.scaler_fit {
            ScalerFit::TrainPartition => &observations[..w + n_train],
            ScalerFit::FullHistory => observations,
        };
        let scaling = FeatureScaling::fit(fit_rows)?;

        let rows = scaling.model_rows(observations)?;
        let targets: Vec<f64> = rows.iter().map(|r| r[r.len() - 1]).collect();
        let mut samples = make_windows(&rows, &targets, w).map_err(insufficient)?;
        let validation = samples.split_off(n_train);
        let train = samples;

        log::info!(
            "Training {} for '{}': {} observations, {} train / {} validation samples",
            self.regressor.name(),
            key,
            observations.len(),
            train.len(),
            validation.len()
        );

        let fit_options = FitOptions {
            epochs: config.epochs(),
            batch_size: config.batch_size(),
            learning_rate: config.learning_rate(),
            patience: self.options.patience,
            seed: self.options.seed,
        };
        let (model, history) = self.regressor.fit(&train, &validation, &fit_options)?;

        let predicted = model
            .predict(&validation)?
            .into_iter()
            .map(|v| scaling.inverse_target(v))
            .collect::<Result<Vec<f64>>>()?;
        let actual: Vec<f64> = observations[w + n_train..]
            .iter()
            .map(|o| f64::from(o.case_count))
            .collect();
        debug_assert_eq!(actual.len(), n_val);

        let metrics = RegressionMetrics::evaluate(&actual, &predicted).map_err(|e| {
            ForecastError::Fitting {
                stage: "evaluate",
                message: e.to_string(),
            }
        })?;

        let epochs_completed = history.epochs_completed().min(config.epochs());
        log::info!(
            "Finished training for '{}' after {} epochs: rmse={:.4} r2={:.4}",
            key,
            epochs_completed,
            metrics.rmse,
            metrics.r2
        );

        let metadata = ModelMetadata {
            artifact_id: new_artifact_id(key),
            location_key: key.to_string(),
            regressor: self.regressor.name().to_string(),
            window_size: w,
            trained_at: Local::now().naive_local(),
            dataset_size: observations.len(),
            metrics,
            epochs_completed,
            normalization: Some(scaling),
        };

        Ok(TrainingOutcome {
            model,
            metadata,
            history,
        })
    }
}
