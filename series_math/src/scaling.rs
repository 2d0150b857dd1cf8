//! Min-max normalization
//!
//! Each column is mapped onto [0, 1] using the minimum and maximum
//! observed in that column at fit time. The fitted bounds are kept in a
//! [`NormalizationState`] so the same mapping can be replayed on new rows
//! and undone on model outputs.

use crate::{MathError, Result};
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Fitted per-column bounds of a min-max scaler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationState {
    /// Column minimums observed at fit time
    pub min: Vec<f64>,
    /// Column maximums observed at fit time
    pub max: Vec<f64>,
}

impl NormalizationState {
    /// Fit bounds over a matrix given as rows of equal width
    pub fn fit<R: AsRef<[f64]>>(rows: &[R]) -> Result<Self> {
        let width = match rows.first() {
            Some(row) => row.as_ref().len(),
            None => {
                return Err(MathError::InsufficientData(
                    "Cannot fit a scaler on an empty matrix".to_string(),
                ))
            }
        };
        if width == 0 {
            return Err(MathError::InvalidInput(
                "Rows must have at least one column".to_string(),
            ));
        }

        let mut min = vec![f64::INFINITY; width];
        let mut max = vec![f64::NEG_INFINITY; width];

        for (i, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != width {
                return Err(MathError::InvalidInput(format!(
                    "Row {} has {} columns, expected {}",
                    i,
                    row.len(),
                    width
                )));
            }
            for (col, &value) in row.iter().enumerate() {
                if !value.is_finite() {
                    return Err(MathError::InvalidInput(format!(
                        "Non-finite value in row {}, column {}",
                        i, col
                    )));
                }
                min[col] = min[col].min(value);
                max[col] = max[col].max(value);
            }
        }

        Ok(Self { min, max })
    }

    /// Fit bounds over a single column of numeric values
    pub fn fit_column<T: ToPrimitive + Copy>(values: &[T]) -> Result<Self> {
        let rows = to_column_rows(values)?;
        Self::fit(&rows)
    }

    /// Number of columns this state was fitted on
    pub fn columns(&self) -> usize {
        self.min.len()
    }

    /// Scale one row with the fitted bounds
    pub fn transform_row(&self, row: &[f64]) -> Result<Vec<f64>> {
        if row.len() != self.columns() {
            return Err(MathError::InvalidInput(format!(
                "Row has {} columns, scaler was fitted on {}",
                row.len(),
                self.columns()
            )));
        }

        Ok(row
            .iter()
            .enumerate()
            .map(|(col, &value)| self.scale(col, value))
            .collect())
    }

    /// Scale every row with the fitted bounds
    pub fn transform<R: AsRef<[f64]>>(&self, rows: &[R]) -> Result<Vec<Vec<f64>>> {
        rows.iter().map(|row| self.transform_row(row.as_ref())).collect()
    }

    /// Scale a single-column series
    pub fn transform_column<T: ToPrimitive + Copy>(&self, values: &[T]) -> Result<Vec<f64>> {
        let rows = to_column_rows(values)?;
        Ok(self.transform(&rows)?.into_iter().map(|row| row[0]).collect())
    }

    /// Map a normalized value of `column` back to the original scale
    pub fn inverse_value(&self, column: usize, value: f64) -> Result<f64> {
        if column >= self.columns() {
            return Err(MathError::InvalidInput(format!(
                "Column {} out of range for a {}-column scaler",
                column,
                self.columns()
            )));
        }

        let range = self.max[column] - self.min[column];
        if range == 0.0 {
            // Degenerate column: every normalized value came from `min`
            return Ok(self.min[column]);
        }
        Ok(value * range + self.min[column])
    }

    /// Map a normalized row back to the original scale
    pub fn inverse_row(&self, row: &[f64]) -> Result<Vec<f64>> {
        row.iter()
            .enumerate()
            .map(|(col, &value)| self.inverse_value(col, value))
            .collect()
    }

    fn scale(&self, column: usize, value: f64) -> f64 {
        let range = self.max[column] - self.min[column];
        if range == 0.0 {
            0.0
        } else {
            (value - self.min[column]) / range
        }
    }
}

/// Stateless entry point mirroring the usual fit/transform pairing
#[derive(Debug, Clone, Copy, Default)]
pub struct MinMaxScaler;

impl MinMaxScaler {
    /// Fit on `rows` and return the normalized matrix with its state
    pub fn fit_transform<R: AsRef<[f64]>>(
        rows: &[R],
    ) -> Result<(Vec<Vec<f64>>, NormalizationState)> {
        let state = NormalizationState::fit(rows)?;
        let normalized = state.transform(rows)?;
        Ok((normalized, state))
    }

    /// Fit on a single column and return the normalized values with the state
    pub fn fit_transform_column<T: ToPrimitive + Copy>(
        values: &[T],
    ) -> Result<(Vec<f64>, NormalizationState)> {
        let state = NormalizationState::fit_column(values)?;
        let normalized = state.transform_column(values)?;
        Ok((normalized, state))
    }

    /// Undo the mapping of a single-column state
    pub fn inverse_transform(state: &NormalizationState, value: f64) -> Result<f64> {
        state.inverse_value(0, value)
    }
}

fn to_column_rows<T: ToPrimitive + Copy>(values: &[T]) -> Result<Vec<[f64; 1]>> {
    values
        .iter()
        .map(|v| {
            v.to_f64().map(|x| [x]).ok_or_else(|| {
                MathError::InvalidInput("Value cannot be represented as f64".to_string())
            })
        })
        .collect()
}
