//! Autoregressive multi-week prediction
//!
//! The model only ever predicts one week ahead. Longer horizons are produced
//! by feeding each normalized prediction back in as the newest row of the
//! input window, together with the caller's weather for that week.

use crate::artifacts::{FeatureScaling, ModelArtifact};
use crate::config::ScalingMode;
use crate::data::{FutureWeather, WeeklyObservation};
use crate::error::{insufficient, ForecastError, Result};
use crate::models::FittedRegressor;
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use series_math::SlidingWindow;
use std::borrow::Cow;

/// Band around a prediction, in whole cases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: u32,
    pub upper: u32,
}

/// Forecast for one future week
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Week of year, 1 to 52
    #[serde(rename = "week")]
    pub week_index: u32,
    pub predicted_cases: u32,
    pub confidence_interval: ConfidenceInterval,
    /// Start of the forecast week
    pub date: NaiveDate,
}

/// Rolls a fitted model forward over caller-supplied weather
#[derive(Debug, Clone, Copy)]
pub struct Predictor {
    scaling: ScalingMode,
    interval_band: f64,
}

impl Default for Predictor {
    fn default() -> Self {
        Self {
            scaling: ScalingMode::Persisted,
            interval_band: 0.1,
        }
    }
}

impl Predictor {
    pub fn new(scaling: ScalingMode, interval_band: f64) -> Self {
        Self {
            scaling,
            interval_band,
        }
    }

    /// Forecast one week per entry of `future_weather`.
    ///
    /// `recent` is the location's history, ascending by week; its last
    /// `window_size` rows seed the input window. Neither the artifact nor
    /// the history is modified.
    pub fn predict<M: FittedRegressor>(
        &self,
        artifact: &ModelArtifact<M>,
        recent: &[WeeklyObservation],
        future_weather: &[FutureWeather],
    ) -> Result<Vec<PredictionResult>> {
        if future_weather.is_empty() {
            return Err(ForecastError::Validation(
                "future_weather must contain at least one week".to_string(),
            ));
        }

        let w = artifact.metadata.window_size;
        if artifact.model.window_size() != w {
            return Err(ForecastError::InconsistentArtifact {
                location_key: artifact.location_key.to_string(),
                message: format!(
                    "model expects windows of {}, metadata says {}",
                    artifact.model.window_size(),
                    w
                ),
            });
        }

        let last = match recent.last() {
            Some(last) if recent.len() >= w => last,
            _ => {
                return Err(ForecastError::InsufficientData(format!(
                    "Need at least {} recent weekly observations, got {}",
                    w,
                    recent.len()
                )))
            }
        };

        let scaling = self.scaling_for(artifact, recent)?;
        let history = scaling.model_rows(recent)?;
        let mut window = SlidingWindow::from_tail(&history, w).map_err(insufficient)?;

        let last_week = last.week_start.iso_week().week();
        let mut predictions = Vec::with_capacity(future_weather.len());

        for (k, weather) in (1u32..).zip(future_weather) {
            let normalized = artifact.model.predict_one(&window.rows())?;
            let cases = scaling.inverse_target(normalized)?;
            if !cases.is_finite() {
                return Err(ForecastError::Fitting {
                    stage: "predict",
                    message: format!("model produced a non-finite estimate for week {} of the horizon", k),
                });
            }

            let mut row = scaling.feature_row(&weather.features())?;
            row.push(normalized);
            window.push(row);

            predictions.push(PredictionResult {
                week_index: ((last_week + k - 1) % 52) + 1,
                predicted_cases: ceil_cases(cases),
                confidence_interval: ConfidenceInterval {
                    lower: ceil_cases(cases * (1.0 - self.interval_band)),
                    upper: ceil_cases(cases * (1.0 + self.interval_band)),
                },
                date: last.week_start + Duration::weeks(i64::from(k)),
            });
        }

        log::debug!(
            "Predicted {} weeks for '{}'",
            predictions.len(),
            artifact.location_key
        );
        Ok(predictions)
    }

    fn scaling_for<'a, M>(
        &self,
        artifact: &'a ModelArtifact<M>,
        recent: &[WeeklyObservation],
    ) -> Result<Cow<'a, FeatureScaling>> {
        match self.scaling {
            ScalingMode::Persisted => artifact
                .metadata
                .normalization
                .as_ref()
                .map(Cow::Borrowed)
                .ok_or_else(|| ForecastError::InconsistentArtifact {
                    location_key: artifact.location_key.to_string(),
                    message: "metadata carries no normalization state; retrain or refit on recent history"
                        .to_string(),
                }),
            ScalingMode::RefitOnRecent => {
                log::debug!("Refitting scalers on {} recent weeks", recent.len());
                Ok(Cow::Owned(FeatureScaling::fit(recent)?))
            }
        }
    }
}

/// Round a case estimate up to a whole count; float noise just above an
/// integer does not bump it, negative estimates become zero
pub fn ceil_cases(value: f64) -> u32 {
    (value - 1e-9).ceil().max(0.0) as u32
}
