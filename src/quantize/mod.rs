//! Full-integer post-training quantization
//!
//! Converts a trained [`FatigueNet`](crate::model::FatigueNet) into an int8
//! model with uint8 input and output tensors, the layout mobile inference
//! runtimes execute with integer-only kernels:
//! - Activations: asymmetric int8, ranges calibrated on training vectors
//! - Weights: symmetric int8 per output channel
//! - Biases: int32 at `input_scale * weight_scale`
//! - Requantization: fixed-point int32 multiplier and shift

mod artifact;
mod converter;

pub use artifact::{
    DataType, ModelMetadata, QuantizedLayer, QuantizedModel, TensorSpec, ARTIFACT_MAGIC,
    FORMAT_VERSION,
};
pub use converter::{Calibration, Quantizer};

use serde::{Deserialize, Serialize};

/// Affine mapping `real = scale * (q - zero_point)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantParams {
    pub scale: f32,
    pub zero_point: i32,
}

impl QuantParams {
    /// Asymmetric int8 parameters covering `[min, max]`, widened to include 0
    pub fn from_range(min: f32, max: f32) -> Self {
        let min = min.min(0.0);
        let max = max.max(0.0);
        let range = (max - min).max(1e-6);
        let scale = range / 255.0;
        let zero_point = (-128.0 - min / scale).round().clamp(-128.0, 127.0) as i32;
        Self { scale, zero_point }
    }

    /// Same scale, zero point moved into the unsigned 8-bit domain
    pub fn to_uint8(self) -> Self {
        Self {
            scale: self.scale,
            zero_point: self.zero_point + 128,
        }
    }

    pub fn quantize(&self, value: f32, qmin: i32, qmax: i32) -> i32 {
        let q = (value / self.scale).round() as i64 + self.zero_point as i64;
        q.clamp(qmin as i64, qmax as i64) as i32
    }

    pub fn dequantize(&self, q: i32) -> f32 {
        self.scale * (q - self.zero_point) as f32
    }
}

/// Decompose a positive real multiplier into a Q31 mantissa and a power-of-two
/// exponent so that `m ≈ mantissa * 2^(shift - 31)`.
pub fn quantize_multiplier(m: f64) -> (i32, i32) {
    if m <= 0.0 || !m.is_finite() {
        return (0, 0);
    }

    let mut shift = m.log2().floor() as i32 + 1;
    let mut q = m / 2f64.powi(shift);
    while q >= 1.0 {
        q /= 2.0;
        shift += 1;
    }
    while q < 0.5 {
        q *= 2.0;
        shift -= 1;
    }

    let mut q_fixed = (q * (1i64 << 31) as f64).round() as i64;
    if q_fixed == 1i64 << 31 {
        q_fixed /= 2;
        shift += 1;
    }
    if shift < -31 {
        return (0, 0);
    }
    if shift > 30 {
        return (i32::MAX, 30);
    }
    (q_fixed as i32, shift)
}

/// High 32 bits of `2 * a * b` with round-to-nearest
fn saturating_rounding_doubling_high_mul(a: i32, b: i32) -> i32 {
    if a == i32::MIN && b == i32::MIN {
        return i32::MAX;
    }
    let ab = a as i64 * b as i64;
    let nudge: i64 = if ab >= 0 { 1 << 30 } else { 1 - (1 << 30) };
    ((ab + nudge) / (1i64 << 31)) as i32
}

/// Arithmetic right shift with round-half-away-from-zero
fn rounding_divide_by_pot(x: i32, exponent: i32) -> i32 {
    if exponent <= 0 {
        return x;
    }
    // widened so that a shift of 31 still has a representable mask
    let exponent = exponent.min(62);
    let x = i64::from(x);
    let mask = (1i64 << exponent) - 1;
    let remainder = x & mask;
    let threshold = (mask >> 1) + i64::from(x < 0);
    ((x >> exponent) + i64::from(remainder > threshold)) as i32
}

/// `x * multiplier` for a multiplier produced by [`quantize_multiplier`]
pub fn multiply_by_quantized_multiplier(x: i32, multiplier: i32, shift: i32) -> i32 {
    let left_shift = shift.max(0);
    let right_shift = (-shift).max(0);
    rounding_divide_by_pot(
        saturating_rounding_doubling_high_mul(x.saturating_mul(1 << left_shift), multiplier),
        right_shift,
    )
}
