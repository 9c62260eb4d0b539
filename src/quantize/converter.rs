//! Calibration and float-to-integer conversion

use super::artifact::{DataType, ModelMetadata, QuantizedLayer, QuantizedModel, TensorSpec};
use super::{quantize_multiplier, QuantParams};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::model::{Activation, FatigueNet};
use crate::normalizer::StandardScaler;
use crate::types::FEATURE_NAMES;
use crate::{PRODUCER_NAME, VERSION};
use chrono::Utc;
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// Observed value ranges of the input and each layer output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub samples: usize,
    pub input: (f32, f32),
    pub layers: Vec<(f32, f32)>,
}

/// Post-training quantizer
pub struct Quantizer {
    calibration_samples: usize,
}

impl Quantizer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            calibration_samples: config.calibration_samples,
        }
    }

    /// Run the first `calibration_samples` rows through the float network and
    /// record per-tensor min/max.
    pub fn calibrate(
        &self,
        net: &FatigueNet,
        train_x: &Array2<f32>,
    ) -> Result<Calibration, PipelineError> {
        let samples = self.calibration_samples.min(train_x.nrows());
        if samples == 0 {
            return Err(PipelineError::InsufficientData(
                "no rows available for calibration".to_string(),
            ));
        }

        let batch = train_x.slice(s![..samples, ..]).to_owned();
        let outputs = net.layer_outputs(&batch);

        Ok(Calibration {
            samples,
            input: min_max(&batch),
            layers: outputs.iter().map(min_max).collect(),
        })
    }

    /// Calibrate and convert `net` into an integer-only model carrying `scaler`
    pub fn convert(
        &self,
        net: &FatigueNet,
        train_x: &Array2<f32>,
        scaler: &StandardScaler,
    ) -> Result<QuantizedModel, PipelineError> {
        if let Some(layer) = net
            .layers
            .iter()
            .find(|l| !matches!(l.activation, Activation::Relu | Activation::Linear))
        {
            return Err(PipelineError::UnsupportedOp(format!(
                "no int8 kernel for fully connected layer with {} activation",
                layer.activation.as_str()
            )));
        }

        let calibration = self.calibrate(net, train_x)?;
        let input_params = QuantParams::from_range(calibration.input.0, calibration.input.1);

        let mut layers = Vec::with_capacity(net.layers.len());
        let mut current_input = input_params;

        for (layer, &(lo, hi)) in net.layers.iter().zip(&calibration.layers) {
            let output_params = QuantParams::from_range(lo, hi);
            let quantized = quantize_layer(layer, current_input, output_params);
            debug!(
                inputs = quantized.inputs,
                units = quantized.units,
                input_scale = current_input.scale,
                output_scale = output_params.scale,
                output_zero_point = output_params.zero_point,
                "quantized layer"
            );
            layers.push(quantized);
            current_input = output_params;
        }

        let output_params = current_input;
        let metadata = ModelMetadata {
            producer: PRODUCER_NAME.to_string(),
            version: VERSION.to_string(),
            run_id: Uuid::new_v4(),
            created_at: Utc::now(),
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            scaler: scaler.clone(),
            calibration_samples: calibration.samples,
            input: TensorSpec {
                name: "features".to_string(),
                dtype: DataType::UInt8,
                shape: vec![1, net.input_dim()],
                quantization: input_params.to_uint8(),
            },
            output: TensorSpec {
                name: "fatigue_score".to_string(),
                dtype: DataType::UInt8,
                shape: vec![1, 1],
                quantization: output_params.to_uint8(),
            },
        };

        info!(
            layers = layers.len(),
            calibration_samples = calibration.samples,
            input_scale = input_params.scale,
            output_scale = output_params.scale,
            "converted network to int8"
        );

        QuantizedModel::new(metadata, layers)
    }
}

fn min_max(x: &Array2<f32>) -> (f32, f32) {
    x.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    })
}

fn quantize_layer(
    layer: &crate::model::Dense,
    input: QuantParams,
    output: QuantParams,
) -> QuantizedLayer {
    let inputs = layer.inputs();
    let units = layer.units();

    let mut weight_scales = Vec::with_capacity(units);
    let mut weights = Vec::with_capacity(units * inputs);
    let mut bias = Vec::with_capacity(units);
    let mut multipliers = Vec::with_capacity(units);
    let mut shifts = Vec::with_capacity(units);

    for unit in 0..units {
        let column = layer.weights.column(unit);
        let max_abs = column.iter().fold(0.0f32, |m, w| m.max(w.abs()));
        let scale = if max_abs > 0.0 { max_abs / 127.0 } else { 1.0 };
        weight_scales.push(scale);

        weights.extend(
            column
                .iter()
                .map(|w| (w / scale).round().clamp(-127.0, 127.0) as i8),
        );

        let bias_scale = input.scale as f64 * scale as f64;
        let q_bias = (layer.bias[unit] as f64 / bias_scale)
            .round()
            .clamp(i32::MIN as f64, i32::MAX as f64) as i32;
        bias.push(q_bias);

        let (multiplier, shift) = quantize_multiplier(bias_scale / output.scale as f64);
        multipliers.push(multiplier);
        shifts.push(shift);
    }

    let (activation_min, activation_max) = match layer.activation {
        Activation::Relu => (output.zero_point.max(-128), 127),
        _ => (-128, 127),
    };

    QuantizedLayer {
        inputs,
        units,
        activation: layer.activation,
        input,
        output,
        weight_scales,
        weights,
        bias,
        multipliers,
        shifts,
        activation_min,
        activation_max,
    }
}
