//! Regression accuracy metrics

use crate::{MathError, Result};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Accuracy of predictions against observed values, on the original scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    /// Mean Squared Error
    pub mse: f64,
    /// Root Mean Squared Error
    pub rmse: f64,
    /// Mean Absolute Error
    pub mae: f64,
    /// Coefficient of determination
    pub r2: f64,
}

impl RegressionMetrics {
    /// Compare `predicted` against `actual`
    pub fn evaluate(actual: &[f64], predicted: &[f64]) -> Result<Self> {
        if actual.len() != predicted.len() || actual.is_empty() {
            return Err(MathError::InvalidInput(
                "Actual and predicted values must have the same non-zero length".to_string(),
            ));
        }

        let n = actual.len() as f64;
        let errors: Vec<f64> = actual
            .iter()
            .zip(predicted.iter())
            .map(|(&a, &p)| a - p)
            .collect();

        let mse = errors.iter().map(|e| e.powi(2)).sum::<f64>() / n;
        let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;

        let metrics = Self {
            mse,
            rmse: mse.sqrt(),
            mae,
            r2: r_squared(actual, &errors),
        };

        if !(metrics.mse.is_finite() && metrics.mae.is_finite()) {
            return Err(MathError::CalculationError(
                "Metrics are not finite".to_string(),
            ));
        }

        Ok(metrics)
    }
}

/// R² with the usual convention for a constant series: 1 for a perfect
/// fit, 0 otherwise
fn r_squared(actual: &[f64], errors: &[f64]) -> f64 {
    let mean = actual.iter().mean();
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    let ss_res: f64 = errors.iter().map(|e| e.powi(2)).sum();

    if ss_tot == 0.0 {
        if ss_res == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    }
}

impl std::fmt::Display for RegressionMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Validation Metrics:")?;
        writeln!(f, "  MSE:   {:.4}", self.mse)?;
        writeln!(f, "  RMSE:  {:.4}", self.rmse)?;
        writeln!(f, "  MAE:   {:.4}", self.mae)?;
        writeln!(f, "  R2:    {:.4}", self.r2)?;
        Ok(())
    }
}
