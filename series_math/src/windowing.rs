//! Fixed-width sequence windows for supervised training
//!
//! A series of `L` rows and a window of width `w` yields `L - w` samples.
//! Sample `i` (counting from `w`) takes rows `[i - w, i)` as input and the
//! target at row `i` as label. No shuffling happens anywhere in this module.

use crate::{MathError, Result};
use std::collections::VecDeque;

/// One supervised example: a window of rows and the value that follows it
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// `window_size` consecutive rows, oldest first
    pub input: Vec<Vec<f64>>,
    /// Target value of the row right after the window
    pub label: f64,
}

impl Sample {
    /// Flatten the window row-major into a single feature vector
    pub fn flattened(&self) -> Vec<f64> {
        self.input.iter().flatten().copied().collect()
    }
}

/// Slide a window of `window_size` over `rows` and pair it with `targets`
pub fn make_windows(rows: &[Vec<f64>], targets: &[f64], window_size: usize) -> Result<Vec<Sample>> {
    if window_size == 0 {
        return Err(MathError::InvalidInput(
            "Window size must be positive".to_string(),
        ));
    }
    if rows.len() != targets.len() {
        return Err(MathError::InvalidInput(format!(
            "Series has {} rows but {} targets",
            rows.len(),
            targets.len()
        )));
    }
    if rows.len() <= window_size {
        return Err(MathError::InsufficientData(format!(
            "Need more than {} weekly rows for a window of {}, got {}",
            window_size,
            window_size,
            rows.len()
        )));
    }

    Ok((window_size..rows.len())
        .map(|i| Sample {
            input: rows[i - window_size..i].to_vec(),
            label: targets[i],
        })
        .collect())
}

/// Split `n` ordered samples into `(train, validation)` counts.
///
/// The validation partition takes `ceil(n * validation_split)` samples from
/// the end of the series. Both partitions must end up non-empty.
pub fn train_validation_split(n: usize, validation_split: f64) -> Result<(usize, usize)> {
    if !(validation_split > 0.0 && validation_split < 1.0) {
        return Err(MathError::InvalidInput(format!(
            "Validation split must be within (0, 1), got {}",
            validation_split
        )));
    }

    // Guard against 0.1 * 10 style products landing a hair above an integer
    let validation = ((n as f64 * validation_split) - 1e-9).ceil().max(0.0) as usize;
    let train = n.saturating_sub(validation);

    if train == 0 || validation == 0 {
        return Err(MathError::InsufficientData(format!(
            "{} samples cannot be split into non-empty train and validation sets (split {})",
            n, validation_split
        )));
    }

    Ok((train, validation))
}

/// Fixed-width window that drops its oldest row on every push
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    width: usize,
    rows: VecDeque<Vec<f64>>,
}

impl SlidingWindow {
    /// Seed the window with the last `width` rows of `history`
    pub fn from_tail(history: &[Vec<f64>], width: usize) -> Result<Self> {
        if width == 0 {
            return Err(MathError::InvalidInput(
                "Window size must be positive".to_string(),
            ));
        }
        if history.len() < width {
            return Err(MathError::InsufficientData(format!(
                "Need at least {} rows to seed the window, got {}",
                width,
                history.len()
            )));
        }

        Ok(Self {
            width,
            rows: history[history.len() - width..].iter().cloned().collect(),
        })
    }

    /// Append `row` as the newest entry and drop the oldest one
    pub fn push(&mut self, row: Vec<f64>) {
        self.rows.push_back(row);
        if self.rows.len() > self.width {
            self.rows.pop_front();
        }
    }

    /// Width of the window
    pub fn width(&self) -> usize {
        self.width
    }

    /// Current rows, oldest first
    pub fn rows(&self) -> Vec<Vec<f64>> {
        self.rows.iter().cloned().collect()
    }

    /// Current rows flattened row-major
    pub fn flattened(&self) -> Vec<f64> {
        self.rows.iter().flatten().copied().collect()
    }
}
