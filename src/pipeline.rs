//! Pipeline orchestration
//!
//! This module provides the public API for Kavlo Fatigue.
//! It runs the full pipeline from a sensor CSV to a quantized model artifact.

use crate::cleaner::ArtifactFilter;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::features::Windows;
use crate::filter::SignalFilter;
use crate::loader::CsvLoader;
use crate::model::{FatigueNet, RegressionMetrics, Trainer, TrainingHistory};
use crate::normalizer::StandardScaler;
use crate::quantize::{QuantizedModel, Quantizer};
use crate::split::train_test_split;
use crate::types::{CleaningReport, LabeledWindow, RawRecord, SensorRecord, FEATURE_COUNT};
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Run every stage on the CSV at `path` and write the artifact to
/// `config.output_path`.
///
/// # Example
/// ```ignore
/// let config = PipelineConfig::default();
/// let run = train_from_csv(Path::new("your_dataset.csv"), &config)?;
/// println!("test mae {}", run.quantized_test.mae);
/// ```
pub fn train_from_csv(path: &Path, config: &PipelineConfig) -> Result<TrainingRun, PipelineError> {
    let trainer = FatigueTrainer::new(config.clone())?;
    let run = trainer.run(trainer.load(path)?)?;
    trainer.export(&run, &config.output_path)?;
    Ok(run)
}

/// Write the artifact to `path` and the scaler to its sidecar file
pub fn export(run: &TrainingRun, path: &Path) -> Result<(), PipelineError> {
    run.model.save(path)?;

    let metadata = &run.model.metadata;
    let sidecar = json!({
        "feature_names": metadata.feature_names,
        "mean": metadata.scaler.mean,
        "scale": metadata.scaler.scale,
    });
    let sidecar_path = scaler_sidecar_path(path);
    std::fs::write(&sidecar_path, serde_json::to_string_pretty(&sidecar)?)?;
    info!(path = %sidecar_path.display(), "scaler sidecar written");
    Ok(())
}

/// `<artifact>.scaler.json`
pub fn scaler_sidecar_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_owned();
    name.push(".scaler.json");
    PathBuf::from(name)
}

/// Score every window of the CSV at `path` with a quantized model.
///
/// The label column is optional here; windows of an unlabeled file carry
/// no label.
pub fn predict_from_csv(
    path: &Path,
    model: &QuantizedModel,
    config: &PipelineConfig,
) -> Result<Vec<WindowPrediction>, PipelineError> {
    let trainer = FatigueTrainer::new(config.clone())?;
    let raw = CsvLoader::new(config.label_column.clone())
        .label_optional()
        .load_path(path)?;
    let (mut records, _) = trainer.clean(raw);
    trainer.filter_signals(&mut records)?;

    trainer
        .extract(&records)
        .into_iter()
        .enumerate()
        .map(|(window, labeled)| {
            Ok(WindowPrediction {
                window,
                label: Some(labeled.label).filter(|l| !l.is_nan()),
                score: model.predict_features(&labeled.features)?,
            })
        })
        .collect()
}

/// Quantized score for one window
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowPrediction {
    pub window: usize,
    /// Majority label of the window's rows, if the file had labels
    pub label: Option<f64>,
    pub score: f32,
}

/// Result of a training run
#[derive(Debug, Clone)]
pub struct TrainingRun {
    pub cleaning: CleaningReport,
    pub windows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub history: TrainingHistory,
    /// Float network on the held-out windows
    pub float_test: RegressionMetrics,
    /// Integer model on the held-out windows
    pub quantized_test: RegressionMetrics,
    pub model: QuantizedModel,
}

/// Serializable overview of a [`TrainingRun`]
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub cleaning: CleaningReport,
    pub windows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub epochs: usize,
    pub final_train: Option<RegressionMetrics>,
    pub float_test: RegressionMetrics,
    pub quantized_test: RegressionMetrics,
}

impl TrainingRun {
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.model.metadata.run_id,
            cleaning: self.cleaning.clone(),
            windows: self.windows,
            train_rows: self.train_rows,
            test_rows: self.test_rows,
            epochs: self.history.epochs.len(),
            final_train: self.history.last().map(|e| e.train),
            float_test: self.float_test,
            quantized_test: self.quantized_test,
        }
    }
}

/// Stage-by-stage trainer for callers who want intermediate results.
pub struct FatigueTrainer {
    config: PipelineConfig,
    artifact_filter: ArtifactFilter,
    signal_filter: SignalFilter,
}

impl FatigueTrainer {
    /// Create a trainer, validating the configuration and designing filters
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            artifact_filter: ArtifactFilter::new(&config),
            signal_filter: SignalFilter::new(&config)?,
            config,
        })
    }

    pub fn load(&self, path: &Path) -> Result<Vec<RawRecord>, PipelineError> {
        CsvLoader::new(self.config.label_column.clone()).load_path(path)
    }

    pub fn clean(&self, records: Vec<RawRecord>) -> (Vec<SensorRecord>, CleaningReport) {
        self.artifact_filter.clean(records)
    }

    pub fn filter_signals(&self, records: &mut [SensorRecord]) -> Result<(), PipelineError> {
        self.signal_filter.apply(records)
    }

    pub fn extract(&self, records: &[SensorRecord]) -> Vec<LabeledWindow> {
        let windows: Vec<LabeledWindow> = Windows::new(records, self.config.window_size()).collect();
        info!(
            rows = records.len(),
            window_size = self.config.window_size(),
            windows = windows.len(),
            "extracted windows"
        );
        windows
    }

    /// Clean, filter, window, and train on already loaded records
    pub fn run(&self, records: Vec<RawRecord>) -> Result<TrainingRun, PipelineError> {
        let (mut cleaned, report) = self.clean(records);
        if report.out_of_range + report.hr_jumps + report.unfilled_rows > report.input_rows / 2 {
            warn!(
                input_rows = report.input_rows,
                kept_rows = report.kept_rows,
                "more than half of the rows were dropped"
            );
        }
        self.filter_signals(&mut cleaned)?;
        let windows = self.extract(&cleaned);
        self.train(report, &windows)
    }

    /// Standardize, split, fit, and quantize
    pub fn train(
        &self,
        cleaning: CleaningReport,
        windows: &[LabeledWindow],
    ) -> Result<TrainingRun, PipelineError> {
        let (features, labels) = windows_to_matrix(windows);
        let (scaler, scaled) = StandardScaler::fit_transform(&features)?;
        let split = train_test_split(&scaled, &labels, self.config.test_ratio, self.config.seed)?;

        let train_x = split.train_features.mapv(|v| v as f32);
        let train_y = split.train_labels.mapv(|v| v as f32);
        let test_x = split.test_features.mapv(|v| v as f32);
        let test_y = split.test_labels.mapv(|v| v as f32);

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut net = FatigueNet::new(
            FEATURE_COUNT,
            self.config.hidden_units,
            self.config.dropout,
            &mut rng,
        );
        let history = Trainer::new(&self.config).fit(&mut net, &train_x, &train_y, &test_x, &test_y)?;
        let float_test = RegressionMetrics::evaluate(&net.predict(&test_x), &test_y);

        let model = Quantizer::new(&self.config).convert(&net, &train_x, &scaler)?;
        let quantized = test_x
            .rows()
            .into_iter()
            .map(|row| model.predict_standardized(&row.to_vec()))
            .collect::<Result<Vec<f32>, _>>()?;
        let quantized_test = RegressionMetrics::evaluate(&Array1::from(quantized), &test_y);

        info!(
            windows = windows.len(),
            float_mse = float_test.mse,
            quantized_mse = quantized_test.mse,
            quantized_mae = quantized_test.mae,
            "training run complete"
        );

        Ok(TrainingRun {
            cleaning,
            windows: windows.len(),
            train_rows: split.train_labels.len(),
            test_rows: split.test_labels.len(),
            history,
            float_test,
            quantized_test,
            model,
        })
    }

    /// Write the artifact and scaler sidecar
    pub fn export(&self, run: &TrainingRun, path: &Path) -> Result<(), PipelineError> {
        export(run, path)
    }
}

fn windows_to_matrix(windows: &[LabeledWindow]) -> (Array2<f64>, Array1<f64>) {
    let features = Array2::from_shape_fn((windows.len(), FEATURE_COUNT), |(i, j)| {
        windows[i].features.to_array()[j]
    });
    let labels = windows.iter().map(|w| w.label).collect();
    (features, labels)
}
