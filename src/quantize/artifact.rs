//! Quantized model artifact
//!
//! Binary layout (little-endian):
//! - magic `FTQ1`, `u16` format version
//! - `u32` length + JSON [`ModelMetadata`]
//! - `u32` layer count, then per layer: shape, activation, quantization
//!   parameters, per-channel weight scales, int8 weights (output-major),
//!   int32 biases, requantization multipliers and shifts

use super::{multiply_by_quantized_multiplier, QuantParams};
use crate::error::PipelineError;
use crate::model::Activation;
use crate::normalizer::StandardScaler;
use crate::types::FeatureVector;
use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Utc};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

pub const ARTIFACT_MAGIC: &[u8; 4] = b"FTQ1";
pub const FORMAT_VERSION: u16 = 1;

/// Element type of an I/O tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    UInt8,
}

/// Name, type, shape and quantization of a model input or output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    pub dtype: DataType,
    pub shape: Vec<usize>,
    pub quantization: QuantParams,
}

/// Descriptive header stored ahead of the layer data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub producer: String,
    pub version: String,
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub feature_names: Vec<String>,
    /// Standardization the input tensor expects to have been applied
    pub scaler: StandardScaler,
    pub calibration_samples: usize,
    pub input: TensorSpec,
    pub output: TensorSpec,
}

/// Integer fully connected layer
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedLayer {
    pub inputs: usize,
    pub units: usize,
    pub activation: Activation,
    pub input: QuantParams,
    pub output: QuantParams,
    pub weight_scales: Vec<f32>,
    /// `units x inputs`, row `o` holds the weights of output channel `o`
    pub weights: Vec<i8>,
    pub bias: Vec<i32>,
    pub multipliers: Vec<i32>,
    pub shifts: Vec<i32>,
    pub activation_min: i32,
    pub activation_max: i32,
}

impl QuantizedLayer {
    fn check(&self) -> Result<(), PipelineError> {
        let units = self.units;
        if self.weights.len() != units * self.inputs
            || self.weight_scales.len() != units
            || self.bias.len() != units
            || self.multipliers.len() != units
            || self.shifts.len() != units
        {
            return Err(PipelineError::InvalidArtifact(format!(
                "layer {}x{} has inconsistent parameter lengths",
                self.inputs, self.units
            )));
        }
        if self.activation_min > self.activation_max {
            return Err(PipelineError::InvalidArtifact(
                "activation clamp range is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// int8 in, int8 out
    fn forward(&self, x: &[i8]) -> Vec<i8> {
        let zp_in = self.input.zero_point;
        let zp_out = self.output.zero_point;

        (0..self.units)
            .map(|o| {
                let row = &self.weights[o * self.inputs..(o + 1) * self.inputs];
                let acc = row
                    .iter()
                    .zip(x)
                    .fold(self.bias[o], |acc, (&w, &v)| {
                        acc.saturating_add(w as i32 * (v as i32 - zp_in))
                    });
                let scaled = multiply_by_quantized_multiplier(acc, self.multipliers[o], self.shifts[o]);
                (scaled.saturating_add(zp_out))
                    .clamp(self.activation_min, self.activation_max) as i8
            })
            .collect()
    }
}

/// Integer-only fatigue model
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedModel {
    pub metadata: ModelMetadata,
    pub layers: Vec<QuantizedLayer>,
}

impl QuantizedModel {
    /// Assemble a model, checking that layer shapes chain from the declared
    /// input to a single output.
    pub fn new(metadata: ModelMetadata, layers: Vec<QuantizedLayer>) -> Result<Self, PipelineError> {
        let first = layers
            .first()
            .ok_or_else(|| PipelineError::InvalidArtifact("model has no layers".to_string()))?;

        let declared = metadata.input.shape.last().copied().unwrap_or(0);
        if first.inputs != declared {
            return Err(PipelineError::InvalidArtifact(format!(
                "input tensor has {declared} values, first layer expects {}",
                first.inputs
            )));
        }
        if metadata.scaler.n_features() != declared {
            return Err(PipelineError::InvalidArtifact(format!(
                "scaler covers {} features, input tensor has {declared}",
                metadata.scaler.n_features()
            )));
        }

        for layer in &layers {
            layer.check()?;
            if layer.activation == Activation::Tanh {
                return Err(PipelineError::UnsupportedOp(
                    "tanh has no int8 kernel".to_string(),
                ));
            }
        }
        for pair in layers.windows(2) {
            if pair[0].units != pair[1].inputs {
                return Err(PipelineError::InvalidArtifact(format!(
                    "layer with {} units feeds layer expecting {} inputs",
                    pair[0].units, pair[1].inputs
                )));
            }
        }
        if layers.last().map(|l| l.units) != Some(1) {
            return Err(PipelineError::InvalidArtifact(
                "final layer must produce one value".to_string(),
            ));
        }

        Ok(Self { metadata, layers })
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map_or(0, |l| l.inputs)
    }

    /// Run the integer graph on one uint8 input vector
    pub fn invoke(&self, input: &[u8]) -> Result<Vec<u8>, PipelineError> {
        if input.len() != self.input_dim() {
            return Err(PipelineError::ShapeMismatch {
                expected: self.input_dim(),
                actual: input.len(),
            });
        }

        let mut x: Vec<i8> = input.iter().map(|&u| (u as i32 - 128) as i8).collect();
        for layer in &self.layers {
            x = layer.forward(&x);
        }
        Ok(x.into_iter().map(|v| (v as i32 + 128) as u8).collect())
    }

    /// Quantize a standardized feature vector into the uint8 input tensor
    pub fn quantize_input(&self, standardized: &[f32]) -> Vec<u8> {
        let params = self.metadata.input.quantization;
        standardized
            .iter()
            .map(|&v| params.quantize(v, 0, 255) as u8)
            .collect()
    }

    pub fn dequantize_output(&self, output: u8) -> f32 {
        self.metadata.output.quantization.dequantize(output as i32)
    }

    /// Score an already standardized feature vector
    pub fn predict_standardized(&self, standardized: &[f32]) -> Result<f32, PipelineError> {
        let output = self.invoke(&self.quantize_input(standardized))?;
        let first = output
            .first()
            .copied()
            .ok_or_else(|| PipelineError::InvalidArtifact("model produced no output".to_string()))?;
        Ok(self.dequantize_output(first))
    }

    /// Standardize with the embedded scaler, then score
    pub fn predict_features(&self, features: &FeatureVector) -> Result<f32, PipelineError> {
        let raw = Array1::from(features.to_array().to_vec());
        let standardized: Vec<f32> = self
            .metadata
            .scaler
            .transform_row(raw.view())?
            .iter()
            .map(|&v| v as f32)
            .collect();
        self.predict_standardized(&standardized)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PipelineError> {
        let metadata = serde_json::to_vec(&self.metadata)?;
        let mut buf = BytesMut::with_capacity(metadata.len() + 64 + self.weight_bytes());

        buf.put_slice(ARTIFACT_MAGIC);
        buf.put_u16_le(FORMAT_VERSION);
        buf.put_u32_le(metadata.len() as u32);
        buf.put_slice(&metadata);
        buf.put_u32_le(self.layers.len() as u32);

        for layer in &self.layers {
            buf.put_u32_le(layer.inputs as u32);
            buf.put_u32_le(layer.units as u32);
            buf.put_u8(activation_code(layer.activation));
            put_params(&mut buf, layer.input);
            put_params(&mut buf, layer.output);
            buf.put_i32_le(layer.activation_min);
            buf.put_i32_le(layer.activation_max);
            layer.weight_scales.iter().for_each(|&s| buf.put_f32_le(s));
            layer.weights.iter().for_each(|&w| buf.put_i8(w));
            layer.bias.iter().for_each(|&b| buf.put_i32_le(b));
            layer.multipliers.iter().for_each(|&m| buf.put_i32_le(m));
            layer.shifts.iter().for_each(|&s| buf.put_i32_le(s));
        }

        Ok(buf.to_vec())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, PipelineError> {
        let mut buf = data;

        need(&buf, 6, "header")?;
        if &buf[..4] != ARTIFACT_MAGIC {
            return Err(PipelineError::InvalidArtifact("bad magic".to_string()));
        }
        buf.advance(4);
        let version = buf.get_u16_le();
        if version != FORMAT_VERSION {
            return Err(PipelineError::InvalidArtifact(format!(
                "unsupported format version {version}"
            )));
        }

        need(&buf, 4, "metadata length")?;
        let len = buf.get_u32_le() as usize;
        need(&buf, len, "metadata")?;
        let metadata: ModelMetadata = serde_json::from_slice(&buf[..len])?;
        buf.advance(len);

        need(&buf, 4, "layer count")?;
        let count = buf.get_u32_le() as usize;
        let mut layers = Vec::with_capacity(count.min(16));

        for _ in 0..count {
            need(&buf, 4 + 4 + 1 + 8 + 8 + 8, "layer header")?;
            let inputs = buf.get_u32_le() as usize;
            let units = buf.get_u32_le() as usize;
            let activation = activation_from_code(buf.get_u8())?;
            let input = get_params(&mut buf);
            let output = get_params(&mut buf);
            let activation_min = buf.get_i32_le();
            let activation_max = buf.get_i32_le();

            let body = units
                .checked_mul(inputs)
                .and_then(|w| w.checked_add(units * 16))
                .ok_or_else(|| PipelineError::InvalidArtifact("layer too large".to_string()))?;
            need(&buf, body, "layer parameters")?;

            let weight_scales = (0..units).map(|_| buf.get_f32_le()).collect();
            let weights = (0..units * inputs).map(|_| buf.get_i8()).collect();
            let bias = (0..units).map(|_| buf.get_i32_le()).collect();
            let multipliers = (0..units).map(|_| buf.get_i32_le()).collect();
            let shifts = (0..units).map(|_| buf.get_i32_le()).collect();

            layers.push(QuantizedLayer {
                inputs,
                units,
                activation,
                input,
                output,
                weight_scales,
                weights,
                bias,
                multipliers,
                shifts,
                activation_min,
                activation_max,
            });
        }

        if buf.has_remaining() {
            return Err(PipelineError::InvalidArtifact(format!(
                "{} trailing bytes",
                buf.remaining()
            )));
        }

        Self::new(metadata, layers)
    }

    /// Write the artifact, replacing any existing file
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, &bytes)?;
        info!(path = %path.display(), bytes = bytes.len(), "model artifact written");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    fn weight_bytes(&self) -> usize {
        self.layers
            .iter()
            .map(|l| 41 + l.weights.len() + l.units * 16)
            .sum()
    }
}

fn need(buf: &&[u8], n: usize, what: &str) -> Result<(), PipelineError> {
    if buf.remaining() < n {
        return Err(PipelineError::InvalidArtifact(format!(
            "truncated {what}: need {n} bytes, {} left",
            buf.remaining()
        )));
    }
    Ok(())
}

fn put_params(buf: &mut BytesMut, p: QuantParams) {
    buf.put_f32_le(p.scale);
    buf.put_i32_le(p.zero_point);
}

fn get_params(buf: &mut &[u8]) -> QuantParams {
    QuantParams {
        scale: buf.get_f32_le(),
        zero_point: buf.get_i32_le(),
    }
}

fn activation_code(activation: Activation) -> u8 {
    match activation {
        Activation::Linear => 0,
        Activation::Relu => 1,
        Activation::Tanh => 2,
    }
}

fn activation_from_code(code: u8) -> Result<Activation, PipelineError> {
    match code {
        0 => Ok(Activation::Linear),
        1 => Ok(Activation::Relu),
        2 => Ok(Activation::Tanh),
        other => Err(PipelineError::InvalidArtifact(format!(
            "unknown activation code {other}"
        ))),
    }
}
