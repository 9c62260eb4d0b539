//! Pipeline configuration
//!
//! Every tunable of the training run lives in [`PipelineConfig`]. The defaults
//! are the constants the pipeline was calibrated with; a JSON file or CLI flags
//! may override individual fields.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default input CSV path
pub const DEFAULT_CSV_PATH: &str = "your_dataset.csv";

/// Default artifact path
pub const DEFAULT_OUTPUT_PATH: &str = "fatigue_model.tflite";

/// Default label column
pub const DEFAULT_LABEL_COLUMN: &str = "fatigue_label";

/// Open interval bounds `(low, high)` for a validity check
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub low: f64,
    pub high: f64,
}

impl Range {
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Strict containment: `low < value < high`
    pub fn contains(&self, value: f64) -> bool {
        value > self.low && value < self.high
    }
}

/// Low-pass cutoffs (Hz) for the filtered channels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cutoffs {
    pub heart_rate_hz: f64,
    pub gsr_hz: f64,
    pub skin_temp_hz: f64,
}

impl Default for Cutoffs {
    fn default() -> Self {
        Self {
            heart_rate_hz: 0.4,
            gsr_hz: 0.4,
            skin_temp_hz: 0.2,
        }
    }
}

/// Configuration for a full training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Input CSV path
    pub csv_path: PathBuf,
    /// Artifact output path
    pub output_path: PathBuf,
    /// Name of the label column
    pub label_column: String,
    /// Device logging frequency (Hz)
    pub sampling_hz: f64,
    /// Valid SpO2 range (exclusive)
    pub spo2_range: Range,
    /// Valid heart rate range (exclusive, bpm)
    pub heart_rate_range: Range,
    /// Heart-rate change between kept rows at or above which a row is rejected
    pub hr_jump_threshold: f64,
    /// Longest run of missing values interpolation will close
    pub max_gap: usize,
    /// Butterworth order
    pub filter_order: usize,
    pub cutoffs: Cutoffs,
    /// Window length in seconds
    pub window_seconds: f64,
    /// Fraction of windows held out for monitoring
    pub test_ratio: f64,
    /// Seed for split, weight init, shuffling, and dropout
    pub seed: u64,
    /// Units of the two hidden layers
    pub hidden_units: [usize; 2],
    pub dropout: f32,
    pub learning_rate: f32,
    pub epochs: usize,
    pub batch_size: usize,
    /// Number of training vectors used to calibrate quantization ranges
    pub calibration_samples: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from(DEFAULT_CSV_PATH),
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            label_column: DEFAULT_LABEL_COLUMN.to_string(),
            sampling_hz: 1.0,
            spo2_range: Range::new(80.0, 100.0),
            heart_rate_range: Range::new(40.0, 180.0),
            hr_jump_threshold: 20.0,
            max_gap: 5,
            filter_order: 4,
            cutoffs: Cutoffs::default(),
            window_seconds: 10.0,
            test_ratio: 0.2,
            seed: 42,
            hidden_units: [64, 32],
            dropout: 0.3,
            learning_rate: 1e-3,
            epochs: 20,
            batch_size: 32,
            calibration_samples: 100,
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file. Absent fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, PipelineError> {
        let contents = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Number of samples per window
    pub fn window_size(&self) -> usize {
        (self.sampling_hz * self.window_seconds).round() as usize
    }

    /// Reject configurations no stage can run with
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.sampling_hz > 0.0) {
            return Err(PipelineError::Config(format!(
                "sampling_hz must be positive, got {}",
                self.sampling_hz
            )));
        }
        if self.spo2_range.low >= self.spo2_range.high {
            return Err(PipelineError::Config("spo2_range is empty".to_string()));
        }
        if self.heart_rate_range.low >= self.heart_rate_range.high {
            return Err(PipelineError::Config(
                "heart_rate_range is empty".to_string(),
            ));
        }
        if !(self.hr_jump_threshold > 0.0) {
            return Err(PipelineError::Config(
                "hr_jump_threshold must be positive".to_string(),
            ));
        }
        if self.filter_order == 0 {
            return Err(PipelineError::Config(
                "filter_order must be positive".to_string(),
            ));
        }
        if self.window_size() < 2 {
            return Err(PipelineError::Config(format!(
                "window must span at least 2 samples, got {}",
                self.window_size()
            )));
        }
        if !(self.test_ratio > 0.0 && self.test_ratio < 1.0) {
            return Err(PipelineError::Config(format!(
                "test_ratio must lie in (0, 1), got {}",
                self.test_ratio
            )));
        }
        if self.hidden_units.iter().any(|&u| u == 0) {
            return Err(PipelineError::Config(
                "hidden layers need at least one unit".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(PipelineError::Config(format!(
                "dropout must lie in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.epochs == 0 || self.batch_size == 0 {
            return Err(PipelineError::Config(
                "epochs and batch_size must be positive".to_string(),
            ));
        }
        if self.calibration_samples == 0 {
            return Err(PipelineError::Config(
                "calibration_samples must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
