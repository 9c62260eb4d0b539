//! Kavlo Fatigue - Offline fatigue-score training for wearable biosignals
//!
//! Fatigue turns a CSV of wearable sensor samples into an int8 model small
//! enough for on-device inference, through a deterministic pipeline:
//! loading → artifact filtering → zero-phase low-pass filtering → windowed
//! feature extraction → standardization → split → training → quantization.
//!
//! ## Modules
//!
//! - **Signal preparation**: `loader`, `cleaner`, `filter`, `features`
//! - **Learning**: `normalizer`, `split`, `model`
//! - **Export**: `quantize` produces the uint8-in/uint8-out model artifact

pub mod cleaner;
pub mod config;
pub mod error;
pub mod features;
pub mod filter;
pub mod loader;
pub mod model;
pub mod normalizer;
pub mod pipeline;
pub mod quantize;
pub mod split;
pub mod types;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use pipeline::{export, predict_from_csv, train_from_csv, FatigueTrainer, TrainingRun};
pub use quantize::QuantizedModel;

/// Version embedded in every exported artifact
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for exported artifacts
pub const PRODUCER_NAME: &str = "kavlo-fatigue";
