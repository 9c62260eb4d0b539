//! Mini-batch training with Adam
//!
//! Fixed epoch count, no early stopping. The held-out set is evaluated after
//! every epoch for monitoring only.

use super::{DenseGrad, FatigueNet};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use ndarray::{Array1, Array2, Axis, Zip};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// Mean squared and mean absolute error of a prediction set
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub mse: f64,
    pub mae: f64,
}

impl RegressionMetrics {
    pub fn evaluate(predictions: &Array1<f32>, targets: &Array1<f32>) -> Self {
        let n = targets.len();
        if n == 0 {
            return Self::default();
        }
        let (se, ae) = predictions
            .iter()
            .zip(targets)
            .fold((0.0f64, 0.0f64), |(se, ae), (p, t)| {
                let e = (*p - *t) as f64;
                (se + e * e, ae + e.abs())
            });
        Self {
            mse: se / n as f64,
            mae: ae / n as f64,
        }
    }
}

impl fmt::Display for RegressionMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mse={:.4} mae={:.4}", self.mse, self.mae)
    }
}

/// Metrics recorded after one epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    /// Running average over the epoch's training batches (dropout active)
    pub train: RegressionMetrics,
    /// Held-out metrics after the epoch (dropout off)
    pub validation: RegressionMetrics,
}

/// Per-epoch training record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }
}

/// Adam optimizer state for a [`FatigueNet`]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    step: i32,
    m: Vec<DenseGrad>,
    v: Vec<DenseGrad>,
}

impl Adam {
    pub fn new(net: &FatigueNet, learning_rate: f32) -> Self {
        let zeros = || -> Vec<DenseGrad> {
            net.layers
                .iter()
                .map(|l| DenseGrad {
                    weights: Array2::zeros(l.weights.raw_dim()),
                    bias: Array1::zeros(l.bias.raw_dim()),
                })
                .collect()
        };
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
            m: zeros(),
            v: zeros(),
        }
    }

    pub(crate) fn apply(&mut self, net: &mut FatigueNet, grads: &[DenseGrad]) {
        self.step += 1;
        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);
        let lr_t = self.learning_rate * (1.0 - b2.powi(self.step)).sqrt() / (1.0 - b1.powi(self.step));

        let update = |p: &mut f32, m: &mut f32, v: &mut f32, g: &f32| {
            *m = b1 * *m + (1.0 - b1) * g;
            *v = b2 * *v + (1.0 - b2) * g * g;
            *p -= lr_t * *m / (v.sqrt() + eps);
        };

        for (((layer, g), m), v) in net
            .layers
            .iter_mut()
            .zip(grads)
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
        {
            Zip::from(&mut layer.weights)
                .and(&mut m.weights)
                .and(&mut v.weights)
                .and(&g.weights)
                .for_each(update);
            Zip::from(&mut layer.bias)
                .and(&mut m.bias)
                .and(&mut v.bias)
                .and(&g.bias)
                .for_each(update);
        }
    }
}

/// Fits a [`FatigueNet`] for a fixed number of epochs
pub struct Trainer {
    epochs: usize,
    batch_size: usize,
    learning_rate: f32,
    seed: u64,
}

impl Trainer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            epochs: config.epochs,
            batch_size: config.batch_size,
            learning_rate: config.learning_rate,
            seed: config.seed,
        }
    }

    /// Train `net` on `(train_x, train_y)`, reporting held-out metrics on
    /// `(test_x, test_y)` after every epoch.
    pub fn fit(
        &self,
        net: &mut FatigueNet,
        train_x: &Array2<f32>,
        train_y: &Array1<f32>,
        test_x: &Array2<f32>,
        test_y: &Array1<f32>,
    ) -> Result<TrainingHistory, PipelineError> {
        if train_x.nrows() == 0 {
            return Err(PipelineError::InsufficientData(
                "no training rows".to_string(),
            ));
        }
        if train_x.ncols() != net.input_dim() {
            return Err(PipelineError::ShapeMismatch {
                expected: net.input_dim(),
                actual: train_x.ncols(),
            });
        }

        let mut optimizer = Adam::new(net, self.learning_rate);
        let mut dropout_rng = ChaCha8Rng::seed_from_u64(self.seed ^ 0x5eed_d209);
        let mut indices: Vec<usize> = (0..train_x.nrows()).collect();
        let mut history = TrainingHistory::default();

        info!(
            epochs = self.epochs,
            batch_size = self.batch_size,
            learning_rate = self.learning_rate,
            train_rows = train_x.nrows(),
            test_rows = test_x.nrows(),
            parameters = net.parameter_count(),
            "training started"
        );

        for epoch in 0..self.epochs {
            let mut shuffle_rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
            indices.shuffle(&mut shuffle_rng);

            let (mut loss_sum, mut mae_sum) = (0.0f64, 0.0f64);
            for batch in indices.chunks(self.batch_size) {
                let x = train_x.select(Axis(0), batch);
                let y = train_y.select(Axis(0), batch);

                let cache = net.forward_train(&x, &mut dropout_rng);
                let (loss, mae, grads) = net.backward(&cache, &y);
                optimizer.apply(net, &grads);

                loss_sum += loss as f64 * batch.len() as f64;
                mae_sum += mae as f64 * batch.len() as f64;
            }

            let n = indices.len() as f64;
            let train = RegressionMetrics {
                mse: loss_sum / n,
                mae: mae_sum / n,
            };
            let validation = RegressionMetrics::evaluate(&net.predict(test_x), test_y);

            info!(
                epoch = epoch + 1,
                loss = train.mse,
                mae = train.mae,
                val_loss = validation.mse,
                val_mae = validation.mae,
                "epoch complete"
            );

            history.epochs.push(EpochMetrics {
                epoch: epoch + 1,
                train,
                validation,
            });
        }

        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn linear_data(n: usize, seed: u64) -> (Array2<f32>, Array1<f32>) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let x = Array2::from_shape_fn((n, 7), |_| rng.gen_range(-1.0f32..1.0));
        let y = x.map_axis(Axis(1), |row| 2.0 * row[0] - row[3] + 0.5 * row[6] + 1.0);
        (x, y)
    }

    #[test]
    fn test_metrics() {
        let p = Array1::from(vec![1.0f32, 2.0, 3.0]);
        let t = Array1::from(vec![1.0f32, 4.0, 2.0]);
        let m = RegressionMetrics::evaluate(&p, &t);
        assert!((m.mse - 5.0 / 3.0).abs() < 1e-9);
        assert!((m.mae - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_training_reduces_loss() {
        let config = PipelineConfig {
            epochs: 30,
            dropout: 0.0,
            learning_rate: 1e-2,
            ..Default::default()
        };
        let (x, y) = linear_data(256, 1);
        let (tx, ty) = linear_data(64, 2);

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut net = FatigueNet::new(7, config.hidden_units, config.dropout, &mut rng);
        let before = RegressionMetrics::evaluate(&net.predict(&tx), &ty);

        let history = Trainer::new(&config).fit(&mut net, &x, &y, &tx, &ty).unwrap();

        assert_eq!(history.epochs.len(), 30);
        let after = history.last().unwrap().validation;
        assert!(after.mse < before.mse * 0.5, "before {before}, after {after}");
        assert!(history.epochs[29].train.mse < history.epochs[0].train.mse);
    }

    #[test]
    fn test_training_is_deterministic() {
        let config = PipelineConfig {
            epochs: 3,
            ..Default::default()
        };
        let (x, y) = linear_data(64, 5);

        let run = || {
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
            let mut net = FatigueNet::new(7, config.hidden_units, config.dropout, &mut rng);
            let history = Trainer::new(&config).fit(&mut net, &x, &y, &x, &y).unwrap();
            (net, history)
        };

        let (net_a, hist_a) = run();
        let (net_b, hist_b) = run();
        assert_eq!(net_a, net_b);
        assert_eq!(hist_a, hist_b);
    }

    #[test]
    fn test_fit_rejects_wrong_width() {
        let config = PipelineConfig::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut net = FatigueNet::new(7, [8, 4], 0.0, &mut rng);
        let x = Array2::<f32>::zeros((4, 5));
        let y = Array1::<f32>::zeros(4);
        assert!(matches!(
            Trainer::new(&config).fit(&mut net, &x, &y, &x, &y),
            Err(PipelineError::ShapeMismatch { expected: 7, actual: 5 })
        ));
    }
}
