//! Core types for the Kavlo Fatigue pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: raw CSV records, cleaned records, per-window feature vectors, and
//! the labeled windows that feed training.

use serde::{Deserialize, Serialize};

/// Sensor columns every input CSV must provide
pub const SENSOR_COLUMNS: [&str; 10] = [
    "heart_rate",
    "spo2",
    "gsr",
    "skin_temp",
    "acc_x",
    "acc_y",
    "acc_z",
    "gyro_x",
    "gyro_y",
    "gyro_z",
];

/// Names of the derived features, in feature-vector order
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "hr_mean",
    "hr_std",
    "spo2_mean",
    "gsr_mean",
    "temp_mean",
    "acc_mag",
    "gyro_mag",
];

/// Number of features per window
pub const FEATURE_COUNT: usize = 7;

/// Index of each column in a record's value array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    HeartRate,
    Spo2,
    Gsr,
    SkinTemp,
    AccX,
    AccY,
    AccZ,
    GyroX,
    GyroY,
    GyroZ,
    Label,
}

impl Channel {
    pub const ALL: [Channel; 11] = [
        Channel::HeartRate,
        Channel::Spo2,
        Channel::Gsr,
        Channel::SkinTemp,
        Channel::AccX,
        Channel::AccY,
        Channel::AccZ,
        Channel::GyroX,
        Channel::GyroY,
        Channel::GyroZ,
        Channel::Label,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Label => "label",
            other => SENSOR_COLUMNS[other.index()],
        }
    }
}

/// One row of the input CSV. Missing cells are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RawRecord {
    pub values: [Option<f64>; 11],
}

impl RawRecord {
    pub fn get(&self, channel: Channel) -> Option<f64> {
        self.values[channel.index()]
    }

    pub fn set(&mut self, channel: Channel, value: Option<f64>) {
        self.values[channel.index()] = value;
    }

    /// Convert to a complete record, or `None` if any value is missing
    pub fn complete(&self) -> Option<SensorRecord> {
        let v = &self.values;
        Some(SensorRecord {
            heart_rate: v[0]?,
            spo2: v[1]?,
            gsr: v[2]?,
            skin_temp: v[3]?,
            acc: [v[4]?, v[5]?, v[6]?],
            gyro: [v[7]?, v[8]?, v[9]?],
            fatigue_label: v[10]?,
        })
    }
}

impl From<SensorRecord> for RawRecord {
    fn from(r: SensorRecord) -> Self {
        RawRecord {
            values: [
                Some(r.heart_rate),
                Some(r.spo2),
                Some(r.gsr),
                Some(r.skin_temp),
                Some(r.acc[0]),
                Some(r.acc[1]),
                Some(r.acc[2]),
                Some(r.gyro[0]),
                Some(r.gyro[1]),
                Some(r.gyro[2]),
                Some(r.fatigue_label),
            ],
        }
    }
}

/// A cleaned sensor reading with every field present
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    /// Heart rate (bpm)
    pub heart_rate: f64,
    /// Blood oxygen saturation (percentage)
    pub spo2: f64,
    /// Galvanic skin response
    pub gsr: f64,
    /// Skin temperature (celsius)
    pub skin_temp: f64,
    /// Accelerometer x/y/z
    pub acc: [f64; 3],
    /// Gyroscope x/y/z
    pub gyro: [f64; 3],
    /// Fatigue score label
    pub fatigue_label: f64,
}

/// Summary statistics of one window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub hr_mean: f64,
    pub hr_std: f64,
    pub spo2_mean: f64,
    pub gsr_mean: f64,
    pub temp_mean: f64,
    /// RMS magnitude of the accelerometer vector
    pub acc_mag: f64,
    /// RMS magnitude of the gyroscope vector
    pub gyro_mag: f64,
}

impl FeatureVector {
    /// Values in [`FEATURE_NAMES`] order
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.hr_mean,
            self.hr_std,
            self.spo2_mean,
            self.gsr_mean,
            self.temp_mean,
            self.acc_mag,
            self.gyro_mag,
        ]
    }
}

/// A feature vector paired with the window's majority label
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledWindow {
    pub features: FeatureVector,
    pub label: f64,
}

/// Row accounting for the artifact filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningReport {
    /// Rows read from the input
    pub input_rows: usize,
    /// Rows dropped by the SpO2 / heart-rate range checks
    pub out_of_range: usize,
    /// Rows dropped by the heart-rate jump check
    pub hr_jumps: usize,
    /// Cells filled by interpolation
    pub interpolated_cells: usize,
    /// Rows dropped because a gap was too long to fill
    pub unfilled_rows: usize,
    /// Rows handed to the signal filter
    pub kept_rows: usize,
}
