//! Windowed feed-forward regressor
//!
//! The window is flattened row-major into one input vector, passed through a
//! single ReLU hidden layer and a linear output unit. Weights start from a
//! Glorot-uniform draw and are fitted with mini-batch Adam on squared error.
//! Every random choice (initial weights, per-epoch sample order) comes from
//! one `StdRng` seeded from [`FitOptions::seed`], so identical inputs give
//! identical weights.

use crate::error::{ForecastError, Result};
use crate::models::{FitOptions, FittedRegressor, SequenceRegressor, TrainingHistory};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use series_math::Sample;

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-7;

/// Untrained network description
#[derive(Debug, Clone)]
pub struct WindowedNetwork {
    /// Name of the model
    name: String,
    /// Width of the hidden layer
    hidden_units: usize,
}

impl WindowedNetwork {
    /// Create a network with `hidden_units` ReLU units
    pub fn new(hidden_units: usize) -> Result<Self> {
        if hidden_units == 0 {
            return Err(ForecastError::Validation(
                "Hidden layer must have at least one unit".to_string(),
            ));
        }

        Ok(Self {
            name: format!("Windowed Network (hidden={})", hidden_units),
            hidden_units,
        })
    }

    pub fn hidden_units(&self) -> usize {
        self.hidden_units
    }
}

/// Trained network weights plus the shape they were fitted for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedNetwork {
    window_size: usize,
    row_width: usize,
    hidden_units: usize,
    weights: Vec<f64>,
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    inputs: usize,
    hidden: usize,
}

impl Layout {
    fn b1(&self) -> usize {
        self.inputs * self.hidden
    }

    fn w2(&self) -> usize {
        self.b1() + self.hidden
    }

    fn b2(&self) -> usize {
        self.w2() + self.hidden
    }

    fn len(&self) -> usize {
        self.b2() + 1
    }

    /// Output for `x`; hidden pre-activations are left in `z`
    fn forward(&self, weights: &[f64], x: &[f64], z: &mut [f64]) -> f64 {
        let mut y = weights[self.b2()];
        for j in 0..self.hidden {
            let row = &weights[j * self.inputs..(j + 1) * self.inputs];
            let s = weights[self.b1() + j] + row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>();
            z[j] = s;
            if s > 0.0 {
                y += weights[self.w2() + j] * s;
            }
        }
        y
    }

    /// Add the gradient of one sample to `grad`, given `dy = dLoss/dOutput`
    fn backward(&self, weights: &[f64], x: &[f64], z: &[f64], dy: f64, grad: &mut [f64]) {
        for j in 0..self.hidden {
            if z[j] <= 0.0 {
                continue;
            }
            grad[self.w2() + j] += dy * z[j];
            let dz = dy * weights[self.w2() + j];
            grad[self.b1() + j] += dz;
            for (g, v) in grad[j * self.inputs..(j + 1) * self.inputs].iter_mut().zip(x) {
                *g += dz * v;
            }
        }
        grad[self.b2()] += dy;
    }

    fn glorot_init(&self, rng: &mut StdRng) -> Vec<f64> {
        let mut weights = vec![0.0; self.len()];

        let hidden_limit = (6.0 / (self.inputs + self.hidden) as f64).sqrt();
        let hidden_dist = Uniform::new_inclusive(-hidden_limit, hidden_limit);
        for w in weights[..self.b1()].iter_mut() {
            *w = hidden_dist.sample(rng);
        }

        let output_limit = (6.0 / (self.hidden + 1) as f64).sqrt();
        let output_dist = Uniform::new_inclusive(-output_limit, output_limit);
        let (w2, b2) = (self.w2(), self.b2());
        for w in weights[w2..b2].iter_mut() {
            *w = output_dist.sample(rng);
        }

        weights
    }
}

struct Adam {
    learning_rate: f64,
    m: Vec<f64>,
    v: Vec<f64>,
    t: i32,
}

impl Adam {
    fn new(learning_rate: f64, len: usize) -> Self {
        Self {
            learning_rate,
            m: vec![0.0; len],
            v: vec![0.0; len],
            t: 0,
        }
    }

    fn step(&mut self, weights: &mut [f64], grad: &[f64]) {
        self.t += 1;
        let lr_t = self.learning_rate * (1.0 - BETA2.powi(self.t)).sqrt() / (1.0 - BETA1.powi(self.t));
        for i in 0..weights.len() {
            self.m[i] = BETA1 * self.m[i] + (1.0 - BETA1) * grad[i];
            self.v[i] = BETA2 * self.v[i] + (1.0 - BETA2) * grad[i] * grad[i];
            weights[i] -= lr_t * self.m[i] / (self.v[i].sqrt() + EPSILON);
        }
    }
}

/// Shape of the samples, checked for consistency
fn sample_shape(train: &[Sample], validation: &[Sample]) -> Result<(usize, usize)> {
    let first = train.first().ok_or_else(|| {
        ForecastError::InsufficientData("No training samples to fit on".to_string())
    })?;
    if validation.is_empty() {
        return Err(ForecastError::InsufficientData(
            "No validation samples to monitor".to_string(),
        ));
    }

    let window_size = first.input.len();
    let row_width = first.input.first().map(|r| r.len()).unwrap_or(0);
    if window_size == 0 || row_width == 0 {
        return Err(ForecastError::Validation("Samples must not be empty".to_string()));
    }

    let consistent = train.iter().chain(validation).all(|s| {
        s.input.len() == window_size && s.input.iter().all(|r| r.len() == row_width)
    });
    if !consistent {
        return Err(ForecastError::Validation(
            "All samples must share one window shape".to_string(),
        ));
    }

    Ok((window_size, row_width))
}

fn mean_squared_error(layout: &Layout, weights: &[f64], inputs: &[Vec<f64>], labels: &[f64]) -> f64 {
    let mut z = vec![0.0; layout.hidden];
    let total: f64 = inputs
        .iter()
        .zip(labels)
        .map(|(x, &t)| (layout.forward(weights, x, &mut z) - t).powi(2))
        .sum();
    total / inputs.len() as f64
}

impl SequenceRegressor for WindowedNetwork {
    type Fitted = FittedNetwork;

    fn fit(
        &self,
        train: &[Sample],
        validation: &[Sample],
        options: &FitOptions,
    ) -> Result<(Self::Fitted, TrainingHistory)> {
        if options.epochs == 0 || options.batch_size == 0 {
            return Err(ForecastError::Validation(
                "Epochs and batch size must be positive".to_string(),
            ));
        }

        let (window_size, row_width) = sample_shape(train, validation)?;
        let layout = Layout {
            inputs: window_size * row_width,
            hidden: self.hidden_units,
        };

        let train_x: Vec<Vec<f64>> = train.iter().map(Sample::flattened).collect();
        let train_y: Vec<f64> = train.iter().map(|s| s.label).collect();
        let val_x: Vec<Vec<f64>> = validation.iter().map(Sample::flattened).collect();
        let val_y: Vec<f64> = validation.iter().map(|s| s.label).collect();

        let mut rng = StdRng::seed_from_u64(options.seed);
        let mut weights = layout.glorot_init(&mut rng);
        let mut adam = Adam::new(options.learning_rate, layout.len());
        let mut grad = vec![0.0; layout.len()];
        let mut z = vec![0.0; layout.hidden];
        let mut order: Vec<usize> = (0..train_x.len()).collect();

        let mut history = TrainingHistory::default();
        let mut best_weights = weights.clone();
        let mut best_loss = f64::INFINITY;
        let mut wait = 0;

        for epoch in 0..options.epochs {
            order.shuffle(&mut rng);

            let mut epoch_loss = 0.0;
            for batch in order.chunks(options.batch_size) {
                grad.iter_mut().for_each(|g| *g = 0.0);
                for &idx in batch {
                    let y = layout.forward(&weights, &train_x[idx], &mut z);
                    let err = y - train_y[idx];
                    epoch_loss += err * err;
                    let dy = 2.0 * err / batch.len() as f64;
                    layout.backward(&weights, &train_x[idx], &z, dy, &mut grad);
                }
                adam.step(&mut weights, &grad);
            }

            let train_loss = epoch_loss / train_x.len() as f64;
            let val_loss = mean_squared_error(&layout, &weights, &val_x, &val_y);
            if !train_loss.is_finite() || !val_loss.is_finite() {
                return Err(ForecastError::Fitting {
                    stage: "fit",
                    message: format!("loss diverged at epoch {}", epoch + 1),
                });
            }

            log::debug!(
                "Epoch {}: loss={:.6} val_loss={:.6}",
                epoch + 1,
                train_loss,
                val_loss
            );
            history.train_loss.push(train_loss);
            history.val_loss.push(val_loss);

            if val_loss < best_loss {
                best_loss = val_loss;
                best_weights.copy_from_slice(&weights);
                history.best_epoch = epoch;
                wait = 0;
            } else {
                wait += 1;
                if wait >= options.patience {
                    log::info!(
                        "Early stopping at epoch {} (no improvement for {} epochs)",
                        epoch + 1,
                        options.patience
                    );
                    history.stopped_early = true;
                    break;
                }
            }
        }

        Ok((
            FittedNetwork {
                window_size,
                row_width,
                hidden_units: self.hidden_units,
                weights: best_weights,
            },
            history,
        ))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl FittedNetwork {
    fn layout(&self) -> Layout {
        Layout {
            inputs: self.window_size * self.row_width,
            hidden: self.hidden_units,
        }
    }
}

impl FittedRegressor for FittedNetwork {
    fn predict_one(&self, window: &[Vec<f64>]) -> Result<f64> {
        if window.len() != self.window_size || window.iter().any(|r| r.len() != self.row_width) {
            return Err(ForecastError::Validation(format!(
                "Expected a {}x{} window",
                self.window_size, self.row_width
            )));
        }

        let layout = self.layout();
        if self.weights.len() != layout.len() {
            return Err(ForecastError::Fitting {
                stage: "predict",
                message: format!(
                    "model has {} weights, shape needs {}",
                    self.weights.len(),
                    layout.len()
                ),
            });
        }

        let x: Vec<f64> = window.iter().flatten().copied().collect();
        let mut z = vec![0.0; layout.hidden];
        let y = layout.forward(&self.weights, &x, &mut z);
        if !y.is_finite() {
            return Err(ForecastError::Fitting {
                stage: "predict",
                message: "prediction is not finite".to_string(),
            });
        }
        Ok(y)
    }

    fn window_size(&self) -> usize {
        self.window_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn samples(range: std::ops::Range<usize>) -> Vec<Sample> {
        range
            .map(|i| {
                let x = i as f64 / 40.0;
                Sample {
                    input: vec![vec![x, 1.0 - x], vec![x * 0.5, 0.2]],
                    label: 0.8 * x + 0.1,
                }
            })
            .collect()
    }

    fn options(epochs: usize) -> FitOptions {
        FitOptions {
            epochs,
            batch_size: 4,
            learning_rate: 0.01,
            patience: 3,
            seed: 42,
        }
    }

    #[test]
    fn test_best_weights_are_restored() {
        let network = WindowedNetwork::new(6).unwrap();
        let (train, validation) = (samples(0..30), samples(30..40));

        let (fitted, history) = network.fit(&train, &validation, &options(60)).unwrap();

        let predicted = fitted.predict(&validation).unwrap();
        let mse = predicted
            .iter()
            .zip(&validation)
            .map(|(p, s)| (p - s.label).powi(2))
            .sum::<f64>()
            / validation.len() as f64;
        assert_relative_eq!(mse, history.best_val_loss().unwrap(), epsilon = 1e-12);
        assert!(history.epochs_completed() <= 60);
        assert!(history.best_epoch < history.epochs_completed());
    }

    #[test]
    fn test_loss_goes_down() {
        let network = WindowedNetwork::new(6).unwrap();

        let (_, history) = network
            .fit(&samples(0..30), &samples(30..40), &options(40))
            .unwrap();

        assert!(history.best_val_loss().unwrap() < history.val_loss[0]);
    }

    #[test]
    fn test_rejects_wrong_window_shape() {
        let network = WindowedNetwork::new(4).unwrap();
        let (fitted, _) = network
            .fit(&samples(0..10), &samples(10..14), &options(2))
            .unwrap();

        assert_eq!(fitted.window_size(), 2);
        assert!(fitted.predict_one(&[vec![0.1, 0.2]]).is_err());
        assert!(fitted.predict_one(&[vec![0.1], vec![0.2]]).is_err());
    }

    #[test]
    fn test_needs_both_partitions() {
        let network = WindowedNetwork::new(4).unwrap();

        assert!(matches!(
            network.fit(&[], &samples(0..4), &options(2)),
            Err(ForecastError::InsufficientData(_))
        ));
        assert!(matches!(
            network.fit(&samples(0..4), &[], &options(2)),
            Err(ForecastError::InsufficientData(_))
        ));
        assert!(WindowedNetwork::new(0).is_err());
    }
}
