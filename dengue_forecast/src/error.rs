//! Error types for the dengue_forecast crate

use series_math::MathError;
use std::path::PathBuf;
use thiserror::Error;

/// Custom error types for the dengue_forecast crate
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Out-of-range hyperparameters or a malformed request payload
    #[error("Validation error: {0}")]
    Validation(String),

    /// No weekly weather exists for the location
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    /// Too few weekly observations for the requested window
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// No committed model file for the location
    #[error("Model not found for '{0}'. Please train the model first.")]
    ModelNotFound(String),

    /// A committed model exists but its metadata file does not
    #[error("Model metadata not found for '{0}'. Please train the model first.")]
    MetadataNotFound(String),

    /// Filesystem failure while reading or writing artifacts
    #[error("Artifact IO error during {stage} ({}): {source}", path.display())]
    ArtifactIo {
        stage: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Artifact files disagree with each other
    #[error("Inconsistent artifact for '{location_key}': {message}")]
    InconsistentArtifact {
        location_key: String,
        message: String,
    },

    /// Numeric failure while fitting or evaluating the regressor
    #[error("Fitting error during {stage}: {message}")]
    Fitting {
        stage: &'static str,
        message: String,
    },

    /// The organizational scope cannot own a model
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Error from series calculations
    #[error("Math error: {0}")]
    Math(#[from] MathError),

    /// Error from JSON encoding or decoding
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error from CSV import
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Error from IO operations outside the artifact store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, ForecastError>;

impl ForecastError {
    /// Wrap an IO error with the artifact stage and path it happened at
    pub fn artifact_io(stage: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ForecastError::ArtifactIo {
            stage,
            path: path.into(),
            source,
        }
    }

    /// Stable tag for machine-readable error responses
    pub fn kind(&self) -> &'static str {
        match self {
            ForecastError::Validation(_) => "validation_error",
            ForecastError::DataUnavailable(_) => "data_unavailable",
            ForecastError::InsufficientData(_) => "insufficient_data",
            ForecastError::ModelNotFound(_) => "model_not_found",
            ForecastError::MetadataNotFound(_) => "metadata_not_found",
            ForecastError::ArtifactIo { .. } => "artifact_io_error",
            ForecastError::InconsistentArtifact { .. } => "artifact_io_error",
            ForecastError::Fitting { .. } => "fitting_error",
            ForecastError::Unsupported(_) => "unsupported",
            ForecastError::Math(MathError::InsufficientData(_)) => "insufficient_data",
            ForecastError::Math(_) => "math_error",
            ForecastError::Serialization(_) => "serialization_error",
            ForecastError::Csv(_) => "csv_error",
            ForecastError::Io(_) => "io_error",
        }
    }

    /// True when the caller should train a model before predicting
    pub fn requires_training(&self) -> bool {
        matches!(
            self,
            ForecastError::ModelNotFound(_) | ForecastError::MetadataNotFound(_)
        )
    }

    /// Message suitable for showing to the requesting user
    pub fn user_message(&self) -> String {
        if self.requires_training() {
            "No trained model is available for your location. Please train the model first."
                .to_string()
        } else {
            self.to_string()
        }
    }

    /// JSON body for an error response
    pub fn to_response(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": self.kind(),
            "message": self.user_message(),
        })
    }
}

/// Lift window and split shortfalls from the math crate into the
/// pipeline's own `InsufficientData` variant
pub(crate) fn insufficient(err: MathError) -> ForecastError {
    match err {
        MathError::InsufficientData(msg) => ForecastError::InsufficientData(msg),
        other => ForecastError::Math(other),
    }
}
