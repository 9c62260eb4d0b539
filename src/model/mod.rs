//! Feed-forward regression network
//!
//! `FatigueNet` maps a standardized feature vector to a scalar fatigue score:
//! dense 64 relu → dropout → dense 32 relu → dense 1 linear. Weights are kept
//! in `f32`, the precision the quantizer calibrates against.

mod trainer;

pub use trainer::{Adam, EpochMetrics, RegressionMetrics, Trainer, TrainingHistory};

use ndarray::{Array1, Array2, Axis};
use rand::distributions::Uniform;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Layer activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Tanh,
    Linear,
}

impl Activation {
    fn apply(self, z: &Array2<f32>) -> Array2<f32> {
        match self {
            Activation::Relu => z.mapv(|v| v.max(0.0)),
            Activation::Tanh => z.mapv(f32::tanh),
            Activation::Linear => z.clone(),
        }
    }

    fn derivative(self, z: &Array2<f32>) -> Array2<f32> {
        match self {
            Activation::Relu => z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Tanh => z.mapv(|v| 1.0 - v.tanh().powi(2)),
            Activation::Linear => Array2::ones(z.raw_dim()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Activation::Relu => "relu",
            Activation::Tanh => "tanh",
            Activation::Linear => "linear",
        }
    }
}

/// Fully connected layer, `y = act(x W + b)`
#[derive(Debug, Clone, PartialEq)]
pub struct Dense {
    /// `inputs x units`
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
    pub activation: Activation,
}

impl Dense {
    /// Glorot-uniform weights, zero bias
    pub fn glorot<R: Rng>(inputs: usize, units: usize, activation: Activation, rng: &mut R) -> Self {
        let limit = (6.0 / (inputs + units) as f32).sqrt();
        let dist = Uniform::new_inclusive(-limit, limit);
        Self {
            weights: Array2::from_shape_fn((inputs, units), |_| rng.sample(dist)),
            bias: Array1::zeros(units),
            activation,
        }
    }

    pub fn inputs(&self) -> usize {
        self.weights.nrows()
    }

    pub fn units(&self) -> usize {
        self.weights.ncols()
    }

    fn pre_activation(&self, x: &Array2<f32>) -> Array2<f32> {
        x.dot(&self.weights) + &self.bias
    }
}

/// Intermediate values of a training forward pass
pub(crate) struct ForwardCache {
    /// Input to each layer
    inputs: Vec<Array2<f32>>,
    /// Pre-activation of each layer
    pre_activations: Vec<Array2<f32>>,
    /// Inverted-dropout mask applied to a layer's output, if any
    masks: Vec<Option<Array2<f32>>>,
    /// Network output, `batch x 1`
    output: Array2<f32>,
}

/// Gradients for one layer
pub(crate) struct DenseGrad {
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
}

/// Fatigue score regression network
#[derive(Debug, Clone, PartialEq)]
pub struct FatigueNet {
    pub layers: Vec<Dense>,
    /// Dropout rate applied to the first hidden layer's output during training
    pub dropout: f32,
}

impl FatigueNet {
    pub fn new<R: Rng>(inputs: usize, hidden: [usize; 2], dropout: f32, rng: &mut R) -> Self {
        let layers = vec![
            Dense::glorot(inputs, hidden[0], Activation::Relu, rng),
            Dense::glorot(hidden[0], hidden[1], Activation::Relu, rng),
            Dense::glorot(hidden[1], 1, Activation::Linear, rng),
        ];
        Self { layers, dropout }
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map_or(0, Dense::inputs)
    }

    pub fn parameter_count(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.weights.len() + l.bias.len())
            .sum()
    }

    /// Inference pass (dropout off); one score per row
    pub fn predict(&self, x: &Array2<f32>) -> Array1<f32> {
        let out = self.forward_layers(x);
        out.column(0).to_owned()
    }

    /// Outputs of every layer for an inference pass
    pub fn layer_outputs(&self, x: &Array2<f32>) -> Vec<Array2<f32>> {
        let mut outputs = Vec::with_capacity(self.layers.len());
        let mut current = x.clone();
        for layer in &self.layers {
            current = layer.activation.apply(&layer.pre_activation(&current));
            outputs.push(current.clone());
        }
        outputs
    }

    fn forward_layers(&self, x: &Array2<f32>) -> Array2<f32> {
        self.layers.iter().fold(x.clone(), |acc, layer| {
            layer.activation.apply(&layer.pre_activation(&acc))
        })
    }

    /// Training pass with dropout, keeping what backpropagation needs
    pub(crate) fn forward_train<R: Rng>(&self, x: &Array2<f32>, rng: &mut R) -> ForwardCache {
        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut pre_activations = Vec::with_capacity(self.layers.len());
        let mut masks = Vec::with_capacity(self.layers.len());
        let mut current = x.clone();

        for (i, layer) in self.layers.iter().enumerate() {
            let z = layer.pre_activation(&current);
            let mut a = layer.activation.apply(&z);

            let mask = if i == 0 && self.dropout > 0.0 {
                let keep = 1.0 - self.dropout;
                let m = Array2::from_shape_fn(a.raw_dim(), |_| {
                    if rng.gen::<f32>() < keep {
                        1.0 / keep
                    } else {
                        0.0
                    }
                });
                a = &a * &m;
                Some(m)
            } else {
                None
            };

            inputs.push(std::mem::replace(&mut current, a));
            pre_activations.push(z);
            masks.push(mask);
        }

        ForwardCache {
            inputs,
            pre_activations,
            masks,
            output: current,
        }
    }

    /// Mean-squared-error gradients for a batch. Returns the batch loss, the
    /// batch mean absolute error, and per-layer gradients.
    pub(crate) fn backward(
        &self,
        cache: &ForwardCache,
        targets: &Array1<f32>,
    ) -> (f32, f32, Vec<DenseGrad>) {
        let batch = targets.len().max(1) as f32;
        let error = &cache.output.column(0) - targets;
        let loss = error.mapv(|e| e * e).sum() / batch;
        let mae = error.mapv(f32::abs).sum() / batch;

        let mut grad = error.mapv(|e| 2.0 * e / batch).insert_axis(Axis(1));
        let mut grads = Vec::with_capacity(self.layers.len());

        for (i, layer) in self.layers.iter().enumerate().rev() {
            if let Some(mask) = &cache.masks[i] {
                grad = &grad * mask;
            }
            let dz = &grad * &layer.activation.derivative(&cache.pre_activations[i]);
            grads.push(DenseGrad {
                weights: cache.inputs[i].t().dot(&dz),
                bias: dz.sum_axis(Axis(0)),
            });
            grad = dz.dot(&layer.weights.t());
        }

        grads.reverse();
        (loss, mae, grads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn net(dropout: f32) -> FatigueNet {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        FatigueNet::new(7, [64, 32], dropout, &mut rng)
    }

    #[test]
    fn test_topology() {
        let net = net(0.3);
        let shapes: Vec<(usize, usize, Activation)> = net
            .layers
            .iter()
            .map(|l| (l.inputs(), l.units(), l.activation))
            .collect();
        assert_eq!(
            shapes,
            vec![
                (7, 64, Activation::Relu),
                (64, 32, Activation::Relu),
                (32, 1, Activation::Linear)
            ]
        );
        assert_eq!(net.parameter_count(), 7 * 64 + 64 + 64 * 32 + 32 + 32 + 1);
    }

    #[test]
    fn test_glorot_bounds() {
        let net = net(0.0);
        let limit = (6.0f32 / (7 + 64) as f32).sqrt();
        assert!(net.layers[0].weights.iter().all(|w| w.abs() <= limit));
        assert!(net.layers[0].bias.iter().all(|b| *b == 0.0));
    }

    #[test]
    fn test_predict_shape() {
        let net = net(0.3);
        let x = Array2::from_elem((5, 7), 0.5f32);
        assert_eq!(net.predict(&x).len(), 5);
    }

    #[test]
    fn test_training_pass_without_dropout_matches_inference() {
        let net = net(0.0);
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let x = Array2::from_shape_fn((4, 7), |(i, j)| (i as f32 - j as f32) * 0.1);
        let cache = net.forward_train(&x, &mut rng);
        let predicted = net.predict(&x);
        for (a, b) in cache.output.column(0).iter().zip(predicted.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let mut net = net(0.0);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let x = Array2::from_shape_fn((6, 7), |(i, j)| ((i * 7 + j) as f32 * 0.37).sin());
        let y = Array1::from_shape_fn(6, |i| i as f32 * 0.5);

        let cache = net.forward_train(&x, &mut rng);
        let (_, _, grads) = net.backward(&cache, &y);

        let loss = |n: &FatigueNet| -> f32 {
            let p = n.predict(&x);
            (&p - &y).mapv(|e| e * e).sum() / 6.0
        };

        let eps = 1e-2f32;
        for &(layer, r, c) in &[(2usize, 3usize, 0usize), (1, 5, 7), (0, 2, 10)] {
            let original = net.layers[layer].weights[[r, c]];
            net.layers[layer].weights[[r, c]] = original + eps;
            let up = loss(&net);
            net.layers[layer].weights[[r, c]] = original - eps;
            let down = loss(&net);
            net.layers[layer].weights[[r, c]] = original;

            let numeric = (up - down) / (2.0 * eps);
            let analytic = grads[layer].weights[[r, c]];
            assert!(
                (numeric - analytic).abs() < 1e-2 * (1.0 + analytic.abs()),
                "layer {layer} [{r},{c}]: numeric {numeric} analytic {analytic}"
            );
        }
    }
}
