//! Fatigue CLI - Command-line interface for Kavlo Fatigue
//!
//! Commands:
//! - train: Run the full pipeline and write the quantized model
//! - inspect: Print an artifact's metadata and tensor specs
//! - predict: Score every window of a CSV with a quantized model
//! - schema: Print the required CSV columns

use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use kavlo_fatigue::config::{DEFAULT_CSV_PATH, DEFAULT_LABEL_COLUMN, DEFAULT_OUTPUT_PATH};
use kavlo_fatigue::pipeline::{predict_from_csv, scaler_sidecar_path, train_from_csv};
use kavlo_fatigue::types::{FEATURE_NAMES, SENSOR_COLUMNS};
use kavlo_fatigue::{PipelineConfig, PipelineError, QuantizedModel, PRODUCER_NAME, VERSION};

/// Fatigue - Train and quantize fatigue-score models from wearable sensor data
#[derive(Parser)]
#[command(name = "fatigue")]
#[command(author = "Kavlo")]
#[command(version = VERSION)]
#[command(about = "Train int8 fatigue-score models from wearable CSV data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Flags that override single configuration fields
#[derive(clap::Args)]
struct ConfigArgs {
    /// JSON configuration file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Name of the label column
    #[arg(long)]
    label_column: Option<String>,

    /// Sampling frequency in Hz
    #[arg(long)]
    sampling_hz: Option<f64>,

    /// Window length in seconds
    #[arg(long)]
    window_seconds: Option<f64>,

    /// Seed for split, initialization, and shuffling
    #[arg(long)]
    seed: Option<u64>,

    /// Training epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Mini-batch size
    #[arg(long)]
    batch_size: Option<usize>,

    /// Held-out fraction of windows
    #[arg(long)]
    test_ratio: Option<f64>,
}

impl ConfigArgs {
    fn resolve(&self) -> Result<PipelineConfig, FatigueCliError> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(label) = &self.label_column {
            config.label_column = label.clone();
        }
        if let Some(v) = self.sampling_hz {
            config.sampling_hz = v;
        }
        if let Some(v) = self.window_seconds {
            config.window_seconds = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.epochs {
            config.epochs = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.test_ratio {
            config.test_ratio = v;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write the quantized model
    Train {
        /// Input CSV path
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output artifact path
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        config: ConfigArgs,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print an artifact's metadata and tensor specs
    Inspect {
        /// Artifact path
        #[arg(default_value = DEFAULT_OUTPUT_PATH)]
        model: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Score every window of a CSV, one JSON object per line
    Predict {
        /// Input CSV path
        #[arg(short, long)]
        input: PathBuf,

        /// Artifact path
        #[arg(short, long, default_value = DEFAULT_OUTPUT_PATH)]
        model: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Print the required CSV columns
    Schema {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();
}

fn run(cli: Cli) -> Result<(), FatigueCliError> {
    match cli.command {
        Commands::Train {
            input,
            output,
            config,
            json,
        } => cmd_train(input, output, &config, json),
        Commands::Inspect { model, json } => cmd_inspect(&model, json),
        Commands::Predict {
            input,
            model,
            output,
            config,
        } => cmd_predict(&input, &model, &output, &config),
        Commands::Schema { json } => cmd_schema(json),
    }
}

fn cmd_train(
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    args: &ConfigArgs,
    json: bool,
) -> Result<(), FatigueCliError> {
    let mut config = args.resolve()?;
    if let Some(input) = input {
        config.csv_path = input;
    }
    if let Some(output) = output {
        config.output_path = output;
    }

    let run = train_from_csv(&config.csv_path, &config)?;
    let summary = run.summary();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Fatigue Training Report");
        println!("=======================");
        println!("Run:        {}", summary.run_id);
        println!(
            "Rows:       {} read, {} kept ({} out of range, {} heart-rate jumps, {} unfilled)",
            summary.cleaning.input_rows,
            summary.cleaning.kept_rows,
            summary.cleaning.out_of_range,
            summary.cleaning.hr_jumps,
            summary.cleaning.unfilled_rows
        );
        println!(
            "Windows:    {} ({} train, {} test)",
            summary.windows, summary.train_rows, summary.test_rows
        );
        println!("Epochs:     {}", summary.epochs);
        println!("Float:      {}", summary.float_test);
        println!("Quantized:  {}", summary.quantized_test);
        println!("\nModel written to {}", config.output_path.display());
        println!(
            "Scaler written to {}",
            scaler_sidecar_path(&config.output_path).display()
        );
    }
    Ok(())
}

fn cmd_inspect(path: &Path, json: bool) -> Result<(), FatigueCliError> {
    let model = QuantizedModel::load(path)?;
    let metadata = &model.metadata;

    if json {
        println!("{}", serde_json::to_string_pretty(metadata)?);
        return Ok(());
    }

    println!("Fatigue Model");
    println!("=============");
    println!("Producer:   {} {}", metadata.producer, metadata.version);
    println!("Run:        {}", metadata.run_id);
    println!("Created:    {}", metadata.created_at.to_rfc3339());
    println!("Calibrated: {} samples", metadata.calibration_samples);
    for (label, tensor) in [("Input", &metadata.input), ("Output", &metadata.output)] {
        println!(
            "{label}:{:pad$}{} {:?} {:?} scale={} zero_point={}",
            "",
            tensor.name,
            tensor.dtype,
            tensor.shape,
            tensor.quantization.scale,
            tensor.quantization.zero_point,
            pad = 11 - label.len()
        );
    }
    println!("\nLayers:");
    for (i, layer) in model.layers.iter().enumerate() {
        println!(
            "  {i}: fully_connected {}x{} {}",
            layer.inputs,
            layer.units,
            layer.activation.as_str()
        );
    }
    println!("\nFeatures:");
    for ((name, mean), scale) in metadata
        .feature_names
        .iter()
        .zip(&metadata.scaler.mean)
        .zip(&metadata.scaler.scale)
    {
        println!("  {name}: mean={mean:.4} scale={scale:.4}");
    }
    Ok(())
}

fn cmd_predict(
    input: &Path,
    model_path: &Path,
    output: &Path,
    args: &ConfigArgs,
) -> Result<(), FatigueCliError> {
    let config = args.resolve()?;
    let model = QuantizedModel::load(model_path)?;
    let predictions = predict_from_csv(input, &model, &config)?;

    let mut lines = String::new();
    for prediction in &predictions {
        lines.push_str(&serde_json::to_string(prediction)?);
        lines.push('\n');
    }

    if output.to_string_lossy() == "-" {
        let mut stdout = io::stdout().lock();
        stdout.write_all(lines.as_bytes())?;
        stdout.flush()?;
    } else {
        fs::write(output, lines)?;
    }
    Ok(())
}

fn cmd_schema(json: bool) -> Result<(), FatigueCliError> {
    if json {
        let schema = serde_json::json!({
            "producer": PRODUCER_NAME,
            "version": VERSION,
            "sensor_columns": SENSOR_COLUMNS,
            "label_column": DEFAULT_LABEL_COLUMN,
            "features": FEATURE_NAMES,
            "default_input": DEFAULT_CSV_PATH,
        });
        println!("{}", serde_json::to_string_pretty(&schema)?);
    } else {
        println!("Required CSV columns (headed, any order, extra columns ignored):");
        for column in SENSOR_COLUMNS {
            println!("  {column}");
        }
        println!("  {DEFAULT_LABEL_COLUMN} (override with --label-column)");
        println!("\nEmpty, nan, NA, and null cells are treated as missing.");
    }
    Ok(())
}

// Error handling

#[derive(Debug)]
enum FatigueCliError {
    Io(io::Error),
    Pipeline(PipelineError),
    Json(serde_json::Error),
}

impl From<io::Error> for FatigueCliError {
    fn from(e: io::Error) -> Self {
        FatigueCliError::Io(e)
    }
}

impl From<PipelineError> for FatigueCliError {
    fn from(e: PipelineError) -> Self {
        FatigueCliError::Pipeline(e)
    }
}

impl From<serde_json::Error> for FatigueCliError {
    fn from(e: serde_json::Error) -> Self {
        FatigueCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(code: &str, message: String, hint: &str) -> Self {
        CliError {
            code: code.to_string(),
            message,
            hint: Some(hint.to_string()),
        }
    }
}

impl From<FatigueCliError> for CliError {
    fn from(e: FatigueCliError) -> Self {
        match e {
            FatigueCliError::Io(e) => {
                CliError::new("IO_ERROR", e.to_string(), "Check file paths and permissions")
            }
            FatigueCliError::Json(e) => CliError::new("JSON_ERROR", e.to_string(), "Check JSON syntax"),
            FatigueCliError::Pipeline(e) => {
                let message = e.to_string();
                match e {
                    PipelineError::Io(_) => {
                        CliError::new("IO_ERROR", message, "Check file paths and permissions")
                    }
                    PipelineError::Csv(_) | PipelineError::Parse { .. } => {
                        CliError::new("PARSE_ERROR", message, "Ensure every sensor cell is numeric or empty")
                    }
                    PipelineError::MissingColumn(_) => {
                        CliError::new("MISSING_COLUMN", message, "Run 'fatigue schema' for the required columns")
                    }
                    PipelineError::JsonError(_) => {
                        CliError::new("JSON_ERROR", message, "Check the configuration file's JSON syntax")
                    }
                    PipelineError::Config(_) | PipelineError::InvalidCutoff(_) => {
                        CliError::new("CONFIG_ERROR", message, "Review configuration values and flags")
                    }
                    PipelineError::SignalTooShort { .. } | PipelineError::InsufficientData(_) => {
                        CliError::new("INSUFFICIENT_DATA", message, "Provide a longer recording or check how many rows were dropped")
                    }
                    PipelineError::ShapeMismatch { .. } => {
                        CliError::new("SHAPE_MISMATCH", message, "Ensure the model was trained on the same feature set")
                    }
                    PipelineError::UnsupportedOp(_) => {
                        CliError::new("UNSUPPORTED_OP", message, "Use relu or linear activations for int8 export")
                    }
                    PipelineError::InvalidArtifact(_) => {
                        CliError::new("INVALID_ARTIFACT", message, "Re-export the model with 'fatigue train'")
                    }
                }
            }
        }
    }
}
