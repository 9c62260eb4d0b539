//! CSV loading
//!
//! Reads a headed CSV, selects the ten sensor columns plus the label column,
//! and maps each row to a [`RawRecord`]. Extra columns are ignored and column
//! order does not matter; a missing required column fails the load. Scoring
//! loads may omit the label column, in which case every label reads as NaN.

use crate::error::PipelineError;
use crate::types::{Channel, RawRecord, SENSOR_COLUMNS};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// Cell spellings treated as a missing value
const MISSING_MARKERS: [&str; 5] = ["", "nan", "NaN", "NA", "null"];

/// Loader for wearable sensor CSV exports
pub struct CsvLoader {
    label_column: String,
    label_required: bool,
}

impl CsvLoader {
    pub fn new(label_column: impl Into<String>) -> Self {
        Self {
            label_column: label_column.into(),
            label_required: true,
        }
    }

    /// Accept files without the label column
    pub fn label_optional(mut self) -> Self {
        self.label_required = false;
        self
    }

    /// Load records from a CSV file on disk
    pub fn load_path(&self, path: &Path) -> Result<Vec<RawRecord>, PipelineError> {
        let file = std::fs::File::open(path)?;
        let records = self.load_reader(file)?;
        info!(path = %path.display(), rows = records.len(), "loaded sensor CSV");
        Ok(records)
    }

    /// Load records from any reader producing CSV text
    pub fn load_reader<R: Read>(&self, reader: R) -> Result<Vec<RawRecord>, PipelineError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let column_index = |name: &str| -> Result<usize, PipelineError> {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))
        };

        let mut indices = [None; 11];
        for (slot, name) in SENSOR_COLUMNS.iter().enumerate() {
            indices[slot] = Some(column_index(name)?);
        }
        indices[Channel::Label.index()] = match column_index(&self.label_column) {
            Ok(index) => Some(index),
            Err(_) if !self.label_required => {
                debug!(column = %self.label_column, "label column absent, loading unlabeled");
                None
            }
            Err(e) => return Err(e),
        };
        debug!(?indices, "resolved CSV columns");

        let mut records = Vec::new();
        for (row, result) in csv_reader.records().enumerate() {
            let line = result?;
            let mut record = RawRecord::default();
            for channel in Channel::ALL {
                let Some(index) = indices[channel.index()] else {
                    record.set(channel, Some(f64::NAN));
                    continue;
                };
                let cell = line.get(index).unwrap_or("");
                let value = parse_cell(cell).map_err(|_| PipelineError::Parse {
                    row,
                    column: self.column_name(channel).to_string(),
                    value: cell.to_string(),
                })?;
                record.set(channel, value);
            }
            records.push(record);
        }

        Ok(records)
    }

    fn column_name(&self, channel: Channel) -> &str {
        match channel {
            Channel::Label => &self.label_column,
            other => other.as_str(),
        }
    }
}

fn parse_cell(cell: &str) -> Result<Option<f64>, std::num::ParseFloatError> {
    if MISSING_MARKERS.contains(&cell) {
        return Ok(None);
    }
    let value: f64 = cell.parse()?;
    Ok(if value.is_nan() { None } else { Some(value) })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "timestamp,heart_rate,spo2,gsr,skin_temp,acc_x,acc_y,acc_z,gyro_x,gyro_y,gyro_z,fatigue_label";

    #[test]
    fn test_load_selects_columns() {
        let csv = format!(
            "{HEADER}\n1,72,97,1.5,33.1,0.1,0.2,9.8,0.01,0.02,0.03,40\n2,74,96,,33.0,0.1,0.2,9.7,0.01,0.02,0.03,NaN\n"
        );
        let records = CsvLoader::new("fatigue_label")
            .load_reader(csv.as_bytes())
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get(Channel::HeartRate), Some(72.0));
        assert_eq!(records[0].get(Channel::Label), Some(40.0));
        assert_eq!(records[1].get(Channel::Gsr), None);
        assert_eq!(records[1].get(Channel::Label), None);
    }

    #[test]
    fn test_column_order_is_free() {
        let csv = "fatigue_label,gyro_z,gyro_y,gyro_x,acc_z,acc_y,acc_x,skin_temp,gsr,spo2,heart_rate\n\
                   55,3,2,1,9,8,7,34,1.1,95,80\n";
        let records = CsvLoader::new("fatigue_label")
            .load_reader(csv.as_bytes())
            .unwrap();

        assert_eq!(records[0].get(Channel::HeartRate), Some(80.0));
        assert_eq!(records[0].get(Channel::AccX), Some(7.0));
        assert_eq!(records[0].get(Channel::Label), Some(55.0));
    }

    #[test]
    fn test_missing_column() {
        let csv = "heart_rate,spo2\n70,98\n";
        let result = CsvLoader::new("fatigue_label").load_reader(csv.as_bytes());
        assert!(matches!(result, Err(PipelineError::MissingColumn(c)) if c == "gsr"));
    }

    #[test]
    fn test_custom_label_column() {
        let csv = format!("{HEADER}\n1,72,97,1.5,33.1,0.1,0.2,9.8,0.01,0.02,0.03,40\n");
        let result = CsvLoader::new("stress").load_reader(csv.as_bytes());
        assert!(matches!(result, Err(PipelineError::MissingColumn(c)) if c == "stress"));
    }

    #[test]
    fn test_optional_label_column() {
        let csv = "heart_rate,spo2,gsr,skin_temp,acc_x,acc_y,acc_z,gyro_x,gyro_y,gyro_z\n\
                   72,97,1.5,33.1,0.1,0.2,9.8,0.01,0.02,0.03\n";
        let records = CsvLoader::new("fatigue_label")
            .label_optional()
            .load_reader(csv.as_bytes())
            .unwrap();

        assert_eq!(records[0].get(Channel::HeartRate), Some(72.0));
        assert!(records[0].get(Channel::Label).is_some_and(f64::is_nan));
        assert!(records[0].complete().is_some());

        let result = CsvLoader::new("fatigue_label").load_reader(csv.as_bytes());
        assert!(matches!(result, Err(PipelineError::MissingColumn(c)) if c == "fatigue_label"));
    }

    #[test]
    fn test_optional_label_still_read_when_present() {
        let csv = format!("{HEADER}\n1,72,97,1.5,33.1,0.1,0.2,9.8,0.01,0.02,0.03,40\n");
        let records = CsvLoader::new("fatigue_label")
            .label_optional()
            .load_reader(csv.as_bytes())
            .unwrap();
        assert_eq!(records[0].get(Channel::Label), Some(40.0));
    }

    #[test]
    fn test_non_numeric_cell() {
        let csv = format!("{HEADER}\n1,fast,97,1.5,33.1,0.1,0.2,9.8,0.01,0.02,0.03,40\n");
        let result = CsvLoader::new("fatigue_label").load_reader(csv.as_bytes());
        match result {
            Err(PipelineError::Parse { row, column, value }) => {
                assert_eq!(row, 0);
                assert_eq!(column, "heart_rate");
                assert_eq!(value, "fast");
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
