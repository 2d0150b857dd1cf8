//! Request-level orchestration
//!
//! [`ForecastService`] is what a host (the CLI, an HTTP handler) talks to.
//! Each call resolves the caller's scope into a fresh [`LocationContext`]
//! and threads it through the pipeline stages; the service itself holds no
//! per-request state and can be shared across threads.

use crate::artifacts::{ArtifactStore, BackupInfo, BackupPair};
use crate::config::{Settings, TrainingConfig, TrainingRequest};
use crate::data::{CaseCounter, FutureWeather, SeriesAssembler, WeatherRepository, WeeklyObservation};
use crate::error::{ForecastError, Result};
use crate::location::{HierarchyResolver, LocationContext, LocationResolver, OrganizationalUnit};
use crate::locks::LocationLocks;
use crate::models::{SequenceRegressor, WindowedNetwork};
use crate::policy::{self, CommitPolicy};
use crate::predictor::{PredictionResult, Predictor};
use crate::trainer::{Trainer, TrainerOptions};
use chrono::Local;
use serde::{Deserialize, Serialize};
use series_math::RegressionMetrics;

const GENERATED_AT_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Result of a training request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingResponse {
    pub success: bool,
    pub message: String,
    pub location_key: String,
    pub metrics: RegressionMetrics,
    pub dataset_size: usize,
    pub window_size: usize,
    pub epochs_completed: usize,
    pub training_completed: bool,
    pub model_committed: bool,
    pub commit_reason: String,
    pub backup_info: Option<BackupInfo>,
    pub previous_model_metrics: Option<RegressionMetrics>,
}

/// Prediction request payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub future_weather: Vec<FutureWeather>,
}

impl PredictionRequest {
    /// Reject empty horizons and non-numeric weather
    pub fn validate(&self) -> Result<()> {
        if self.future_weather.is_empty() {
            return Err(ForecastError::Validation(
                "future_weather must contain at least one week".to_string(),
            ));
        }
        for (i, week) in self.future_weather.iter().enumerate() {
            if !week.features().iter().all(|v| v.is_finite()) {
                return Err(ForecastError::Validation(format!(
                    "future_weather[{}] contains a non-finite value",
                    i
                )));
            }
        }
        Ok(())
    }
}

/// Context returned alongside predictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionMetadata {
    pub window_size: usize,
    pub prediction_generated_at: String,
}

/// Result of a prediction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub success: bool,
    pub predictions: Vec<PredictionResult>,
    pub metadata: PredictionMetadata,
}

/// Entry point for training, prediction and rollback requests
pub struct ForecastService<W, C, R = WindowedNetwork> {
    weather: W,
    cases: C,
    resolver: Box<dyn LocationResolver>,
    store: ArtifactStore,
    trainer: Trainer<R>,
    predictor: Predictor,
    policy: Box<dyn CommitPolicy>,
    locks: LocationLocks,
}

impl<W, C> ForecastService<W, C, WindowedNetwork>
where
    W: WeatherRepository,
    C: CaseCounter,
{
    /// Service with the default windowed network
    pub fn new(settings: &Settings, weather: W, cases: C) -> Result<Self> {
        let regressor = WindowedNetwork::new(settings.hidden_units)?;
        Self::with_regressor(settings, weather, cases, regressor)
    }
}

impl<W, C, R> ForecastService<W, C, R>
where
    W: WeatherRepository,
    C: CaseCounter,
    R: SequenceRegressor,
{
    /// Service fitting `regressor` instead of the default network
    pub fn with_regressor(settings: &Settings, weather: W, cases: C, regressor: R) -> Result<Self> {
        settings.validate()?;
        let options = TrainerOptions {
            seed: settings.seed,
            patience: settings.patience,
            scaler_fit: settings.scaler_fit,
        };

        Ok(Self {
            weather,
            cases,
            resolver: Box::new(HierarchyResolver),
            store: ArtifactStore::open(&settings.model_dir)?,
            trainer: Trainer::new(regressor, options),
            predictor: Predictor::new(settings.scaling, settings.interval_band),
            policy: policy::from_kind(settings.commit_policy),
            locks: LocationLocks::new(),
        })
    }

    /// Replace the commit policy
    pub fn with_policy<P: CommitPolicy + 'static>(mut self, policy: P) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Replace the location resolver
    pub fn with_resolver<L: LocationResolver + 'static>(mut self, resolver: L) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn locks(&self) -> &LocationLocks {
        &self.locks
    }

    /// Resolve the caller's scope
    pub fn resolve(&self, unit: &OrganizationalUnit) -> Result<LocationContext> {
        self.resolver.resolve(unit)
    }

    /// Weekly series of the resolved scope
    pub fn assemble(&self, ctx: &LocationContext) -> Result<Vec<WeeklyObservation>> {
        SeriesAssembler::new(&self.weather, &self.cases).assemble(ctx)
    }

    /// Train, then commit or discard according to the commit policy
    pub fn train(&self, unit: &OrganizationalUnit, request: &TrainingRequest) -> Result<TrainingResponse> {
        let config = request.validate()?;
        let ctx = self.resolve(unit)?;
        self.train_context(&ctx, &config)
    }

    /// Training for an already resolved scope
    pub fn train_context(&self, ctx: &LocationContext, config: &TrainingConfig) -> Result<TrainingResponse> {
        let key = &ctx.location_key;
        let observations = self.assemble(ctx)?;
        // Fail before the backup so a doomed request leaves no files behind
        self.trainer.check_sufficient(observations.len(), config)?;

        let _guard = self.locks.acquire(key);
        self.store.repair(key)?;

        let previous_model_metrics = self.store.previous_metrics(key);
        let backup = self.store.backup_existing(key)?;

        let outcome = self.trainer.train(key, &observations, config)?;
        let temp = self.store.stage(key, &outcome.model, &outcome.metadata)?;

        let decision = self
            .policy
            .decide(&outcome.metadata.metrics, previous_model_metrics.as_ref());
        if decision.commit {
            self.store.commit(temp)?;
        } else {
            log::info!("Keeping existing model for '{}': {}", key, decision.reason);
            self.store.discard(temp)?;
        }

        let metadata = outcome.metadata;
        Ok(TrainingResponse {
            success: true,
            message: format!("Model trained for '{}'", key),
            location_key: key.to_string(),
            metrics: metadata.metrics,
            dataset_size: metadata.dataset_size,
            window_size: metadata.window_size,
            epochs_completed: metadata.epochs_completed,
            training_completed: true,
            model_committed: decision.commit,
            commit_reason: decision.reason,
            backup_info: backup.model_backed_up.then_some(backup),
            previous_model_metrics,
        })
    }

    /// Forecast the weeks described by `request.future_weather`
    pub fn predict(
        &self,
        unit: &OrganizationalUnit,
        request: &PredictionRequest,
    ) -> Result<PredictionResponse> {
        request.validate()?;
        let ctx = self.resolve(unit)?;
        self.predict_context(&ctx, request)
    }

    /// Prediction for an already resolved scope
    pub fn predict_context(
        &self,
        ctx: &LocationContext,
        request: &PredictionRequest,
    ) -> Result<PredictionResponse> {
        let key = &ctx.location_key;
        let artifact = match self.store.load::<R::Fitted>(key) {
            Err(ForecastError::InconsistentArtifact { .. }) => {
                // Waits out any commit in flight before touching the files
                let _guard = self.locks.acquire(key);
                self.store.repair(key)?;
                self.store.load::<R::Fitted>(key)?
            }
            loaded => loaded?,
        };
        let recent = self.assemble(ctx)?;
        let predictions = self
            .predictor
            .predict(&artifact, &recent, &request.future_weather)?;

        Ok(PredictionResponse {
            success: true,
            predictions,
            metadata: PredictionMetadata {
                window_size: artifact.metadata.window_size,
                prediction_generated_at: Local::now().format(GENERATED_AT_FORMAT).to_string(),
            },
        })
    }

    /// Backups of the caller's scope, newest first
    pub fn list_backups(&self, unit: &OrganizationalUnit) -> Result<Vec<BackupPair>> {
        let ctx = self.resolve(unit)?;
        self.store.list_backups(&ctx.location_key)
    }

    /// Restore the backup taken at `timestamp`, or the newest one.
    ///
    /// The model being replaced is backed up first, so a rollback can
    /// itself be rolled back.
    pub fn rollback(&self, unit: &OrganizationalUnit, timestamp: Option<&str>) -> Result<BackupPair> {
        let ctx = self.resolve(unit)?;
        let key = &ctx.location_key;
        let _guard = self.locks.acquire(key);
        self.store.repair(key)?;

        let backups = self.store.list_backups(key)?;
        let chosen = match timestamp {
            Some(ts) => backups.into_iter().find(|b| b.timestamp == ts),
            None => backups.into_iter().next(),
        }
        .ok_or_else(|| {
            ForecastError::ModelNotFound(format!(
                "{} (backup {})",
                key,
                timestamp.unwrap_or("latest")
            ))
        })?;

        self.store.backup_existing(key)?;
        self.store.restore_backup(key, &chosen)?;
        Ok(chosen)
    }
}
