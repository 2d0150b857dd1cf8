//! # Series Math
//!
//! Numeric building blocks for weekly surveillance forecasting.
//! This crate provides min-max normalization, fixed-width sequence
//! windowing and regression accuracy metrics. Nothing here touches
//! the filesystem.

use thiserror::Error;

pub mod metrics;
pub mod scaling;
pub mod windowing;

pub use metrics::RegressionMetrics;
pub use scaling::{MinMaxScaler, NormalizationState};
pub use windowing::{make_windows, train_validation_split, Sample, SlidingWindow};

/// Errors that can occur in series calculations
#[derive(Error, Debug)]
pub enum MathError {
    #[error("Insufficient data for calculation: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),
}

/// Result type for series math operations
pub type Result<T> = std::result::Result<T, MathError>;
