//! # Dengue Forecast
//!
//! A Rust library for weekly dengue case forecasting from weather history.
//!
//! ## Features
//!
//! - Weekly series assembly from weather records and case consultations
//! - Min-max scaling and fixed-width windowing (via `series_math`)
//! - A seeded, early-stopped windowed regressor
//! - Versioned on-disk artifacts with backups, staged commits and rollback
//! - Autoregressive multi-week prediction with a confidence band
//!
//! ## Pipeline
//!
//! A request is resolved into a [`LocationContext`] first. Training then
//! assembles the location's weekly series, fits a model and stages it next
//! to the committed one; a [`CommitPolicy`] decides whether the staged model
//! replaces it. Prediction loads the committed model and rolls it forward
//! one week per entry of caller-supplied future weather.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dengue_forecast::{
//!     ForecastService, InMemoryCases, InMemoryWeather, OrganizationalUnit, PredictionRequest,
//!     Settings, TrainingRequest, UnitType,
//! };
//!
//! # fn main() -> dengue_forecast::Result<()> {
//! let weather = InMemoryWeather::from_csv("weather.csv", "Region IV-A")?;
//! let cases = InMemoryCases::from_csv("cases.csv")?;
//! let service = ForecastService::new(&Settings::load(None)?, weather, cases)?;
//!
//! let unit = OrganizationalUnit {
//!     unit_type: UnitType::Resu,
//!     region: "Region IV-A".to_string(),
//!     surveillance_unit: String::new(),
//!     province: String::new(),
//!     city: String::new(),
//! };
//!
//! let trained = service.train(&unit, &TrainingRequest::default())?;
//! println!("rmse = {:.2}", trained.metrics.rmse);
//!
//! let request: PredictionRequest = serde_json::from_str(
//!     r#"{"future_weather": [{"rainfall": 12.0, "max_temperature": 31.5, "humidity": 78.0}]}"#,
//! )?;
//! let forecast = service.predict(&unit, &request)?;
//! println!("{:?}", forecast.predictions);
//! # Ok(())
//! # }
//! ```

pub mod artifacts;
pub mod config;
pub mod data;
pub mod error;
pub mod location;
pub mod locks;
pub mod models;
pub mod policy;
pub mod predictor;
pub mod service;
pub mod trainer;

// Re-export commonly used types
pub use crate::artifacts::{ArtifactStore, BackupInfo, BackupPair, ModelArtifact, ModelMetadata};
pub use crate::config::{ScalerFit, ScalingMode, Settings, TrainingConfig, TrainingRequest};
pub use crate::data::{
    CaseCounter, CaseFilter, CaseRecord, FutureWeather, InMemoryCases, InMemoryWeather,
    SeriesAssembler, WeatherFilter, WeatherRepository, WeatherWeek, WeeklyObservation,
};
pub use crate::error::{ForecastError, Result};
pub use crate::location::{
    HierarchyResolver, LocationContext, LocationKey, LocationResolver, OrganizationalUnit, UnitType,
};
pub use crate::locks::LocationLocks;
pub use crate::models::{FittedRegressor, SequenceRegressor, WindowedNetwork};
pub use crate::policy::{AlwaysCommit, CommitDecision, CommitPolicy, CompareMetrics};
pub use crate::predictor::{PredictionResult, Predictor};
pub use crate::service::{ForecastService, PredictionRequest, PredictionResponse, TrainingResponse};
pub use crate::trainer::{Trainer, TrainerOptions, TrainingOutcome};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
