mod common;

use dengue_forecast::models::{FitOptions, TrainingHistory};
use dengue_forecast::{
    FittedRegressor, ForecastError, LocationKey, ScalerFit, SequenceRegressor, Trainer,
    TrainerOptions, TrainingConfig, WindowedNetwork,
};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use series_math::Sample;

/// Predicts the previous week's normalized case count and remembers the
/// partition sizes it was fitted on
#[derive(Debug, Clone)]
struct Persistence;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FittedPersistence {
    window_size: usize,
    train_len: usize,
    validation_len: usize,
}

impl FittedRegressor for FittedPersistence {
    fn predict_one(&self, window: &[Vec<f64>]) -> dengue_forecast::Result<f64> {
        Ok(window.last().map(|row| row[row.len() - 1]).unwrap_or(0.0))
    }

    fn window_size(&self) -> usize {
        self.window_size
    }
}

impl SequenceRegressor for Persistence {
    type Fitted = FittedPersistence;

    fn fit(
        &self,
        train: &[Sample],
        validation: &[Sample],
        options: &FitOptions,
    ) -> dengue_forecast::Result<(FittedPersistence, TrainingHistory)> {
        let history = TrainingHistory {
            train_loss: vec![0.0; options.epochs.min(3)],
            val_loss: vec![0.0; options.epochs.min(3)],
            best_epoch: 0,
            stopped_early: options.epochs > 3,
        };
        Ok((
            FittedPersistence {
                window_size: train[0].input.len(),
                train_len: train.len(),
                validation_len: validation.len(),
            },
            history,
        ))
    }

    fn name(&self) -> &str {
        "persistence"
    }
}

fn key() -> LocationKey {
    LocationKey::from_name(common::REGION).unwrap()
}

fn network_trainer() -> Trainer<WindowedNetwork> {
    Trainer::new(WindowedNetwork::new(8).unwrap(), TrainerOptions::default())
}

#[test]
fn test_twelve_weeks_split_five_and_two() {
    let observations = common::weekly_series(12);
    let config = TrainingConfig::new(5, 0.2, 10, 1, 0.001).unwrap();
    let trainer = Trainer::new(Persistence, TrainerOptions::default());

    let outcome = trainer.train(&key(), &observations, &config).unwrap();

    assert_eq!(outcome.model.train_len, 5);
    assert_eq!(outcome.model.validation_len, 2);
    assert_eq!(outcome.model.window_size, 5);
    assert_eq!(outcome.metadata.dataset_size, 12);
    assert_eq!(outcome.metadata.window_size, 5);
    assert_eq!(outcome.metadata.regressor, "persistence");
    assert_eq!(outcome.metadata.location_key, "region_x");
}

#[test]
fn test_metrics_are_on_case_scale() {
    let observations = common::weekly_series(12);
    let config = TrainingConfig::new(5, 0.2, 10, 1, 0.001).unwrap();
    let trainer = Trainer::new(
        Persistence,
        TrainerOptions {
            scaler_fit: ScalerFit::FullHistory,
            ..TrainerOptions::default()
        },
    );

    let outcome = trainer.train(&key(), &observations, &config).unwrap();

    // Persistence predicts last week's count for weeks 10 and 11
    let errors: Vec<f64> = (10..12)
        .map(|i| f64::from(observations[i].case_count) - f64::from(observations[i - 1].case_count))
        .collect();
    let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / 2.0;
    approx::assert_relative_eq!(outcome.metadata.metrics.mae, mae, epsilon = 1e-9);
}

#[test]
fn test_scalers_fit_on_training_rows_only() {
    let mut observations = common::weekly_series(12);
    observations[11].case_count = 500;
    let config = TrainingConfig::new(5, 0.2, 10, 1, 0.001).unwrap();
    let trainer = Trainer::new(Persistence, TrainerOptions::default());

    let outcome = trainer.train(&key(), &observations, &config).unwrap();
    let scaling = outcome.metadata.normalization.unwrap();

    // Training windows and labels cover rows 0..10
    let train_max = observations[..10].iter().map(|o| o.case_count).max().unwrap();
    assert_eq!(scaling.target.max, vec![f64::from(train_max)]);
    assert!(scaling.target.max[0] < 500.0);
}

#[test]
fn test_full_history_scaling_sees_validation_rows() {
    let mut observations = common::weekly_series(12);
    observations[11].case_count = 500;
    let config = TrainingConfig::new(5, 0.2, 10, 1, 0.001).unwrap();
    let trainer = Trainer::new(
        Persistence,
        TrainerOptions {
            scaler_fit: ScalerFit::FullHistory,
            ..TrainerOptions::default()
        },
    );

    let outcome = trainer.train(&key(), &observations, &config).unwrap();

    assert_eq!(outcome.metadata.normalization.unwrap().target.max, vec![500.0]);
}

#[test]
fn test_series_not_longer_than_window_is_insufficient() {
    let config = TrainingConfig::new(5, 0.2, 10, 1, 0.001).unwrap();
    let trainer = Trainer::new(Persistence, TrainerOptions::default());

    for len in [0, 3, 5] {
        let result = trainer.train(&key(), &common::weekly_series(len), &config);
        assert!(
            matches!(result, Err(ForecastError::InsufficientData(_))),
            "length {}",
            len
        );
    }
}

#[test]
fn test_check_sufficient_matches_training_split() {
    let config = TrainingConfig::new(5, 0.2, 10, 1, 0.001).unwrap();
    let trainer = Trainer::new(Persistence, TrainerOptions::default());

    assert_eq!(trainer.check_sufficient(12, &config).unwrap(), (5, 2));
    assert!(matches!(
        trainer.check_sufficient(5, &config),
        Err(ForecastError::InsufficientData(_))
    ));
    assert!(matches!(
        trainer.check_sufficient(6, &config),
        Err(ForecastError::InsufficientData(_))
    ));
}

#[test]
fn test_single_sample_cannot_be_split() {
    let config = TrainingConfig::new(5, 0.2, 10, 1, 0.001).unwrap();
    let trainer = Trainer::new(Persistence, TrainerOptions::default());

    let result = trainer.train(&key(), &common::weekly_series(6), &config);

    assert!(matches!(result, Err(ForecastError::InsufficientData(_))));
}

#[test]
fn test_training_is_deterministic() {
    let observations = common::weekly_series(40);
    let config = TrainingConfig::new(6, 0.2, 30, 4, 0.01).unwrap();
    let trainer = network_trainer();

    let first = trainer.train(&key(), &observations, &config).unwrap();
    let second = trainer.train(&key(), &observations, &config).unwrap();

    assert_eq!(first.metadata.metrics, second.metadata.metrics);
    assert_eq!(first.metadata.epochs_completed, second.metadata.epochs_completed);
    assert_eq!(first.model, second.model);
    assert_eq!(first.history, second.history);
}

#[test]
fn test_network_respects_epoch_bound() {
    let observations = common::weekly_series(30);
    let config = TrainingConfig::new(5, 0.2, 7, 2, 0.005).unwrap();

    let outcome = network_trainer().train(&key(), &observations, &config).unwrap();

    assert!(outcome.metadata.epochs_completed >= 1);
    assert!(outcome.metadata.epochs_completed <= 7);
    assert_eq!(outcome.history.epochs_completed(), outcome.metadata.epochs_completed);
    assert!(outcome.metadata.metrics.rmse.is_finite());
    assert!(outcome.metadata.normalization.is_some());
}

#[test]
fn test_different_seeds_give_different_models() {
    let observations = common::weekly_series(30);
    let config = TrainingConfig::new(5, 0.2, 5, 2, 0.005).unwrap();
    let other = Trainer::new(
        WindowedNetwork::new(8).unwrap(),
        TrainerOptions {
            seed: 7,
            ..TrainerOptions::default()
        },
    );

    let a = network_trainer().train(&key(), &observations, &config).unwrap();
    let b = other.train(&key(), &observations, &config).unwrap();

    assert_ne!(a.model, b.model);
}
