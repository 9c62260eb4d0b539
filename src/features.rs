//! Feature derivation
//!
//! This module reduces cleaned records to per-window features:
//! - Non-overlapping windows of a fixed size, trailing remainder discarded
//! - Heart-rate mean and sample standard deviation
//! - SpO2, GSR, and skin-temperature means
//! - RMS magnitude of the accelerometer and gyroscope vectors
//! - Majority-vote label

use crate::types::{FeatureVector, LabeledWindow, SensorRecord};

/// Lazy iterator of labeled windows over a slice of cleaned records
pub struct Windows<'a> {
    chunks: std::slice::ChunksExact<'a, SensorRecord>,
}

impl<'a> Windows<'a> {
    /// # Panics
    /// Panics if `window_size` is zero.
    pub fn new(records: &'a [SensorRecord], window_size: usize) -> Self {
        Self {
            chunks: records.chunks_exact(window_size),
        }
    }
}

impl Iterator for Windows<'_> {
    type Item = LabeledWindow;

    fn next(&mut self) -> Option<Self::Item> {
        self.chunks.next().map(|window| LabeledWindow {
            features: FeatureExtractor::extract(window),
            label: majority_label(window),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for Windows<'_> {}

/// Feature extractor for a single window
pub struct FeatureExtractor;

impl FeatureExtractor {
    /// Compute summary statistics of a non-empty window
    pub fn extract(window: &[SensorRecord]) -> FeatureVector {
        let hr: Vec<f64> = window.iter().map(|r| r.heart_rate).collect();

        FeatureVector {
            hr_mean: mean(&hr),
            hr_std: sample_std(&hr),
            spo2_mean: mean_of(window, |r| r.spo2),
            gsr_mean: mean_of(window, |r| r.gsr),
            temp_mean: mean_of(window, |r| r.skin_temp),
            acc_mag: mean_of(window, |r| squared_norm(&r.acc)).sqrt(),
            gyro_mag: mean_of(window, |r| squared_norm(&r.gyro)).sqrt(),
        }
    }
}

/// Most frequent label in the window; ties go to the value seen first
pub fn majority_label(window: &[SensorRecord]) -> f64 {
    let mut counts: Vec<(f64, usize)> = Vec::new();
    for record in window {
        match counts.iter_mut().find(|(v, _)| *v == record.fatigue_label) {
            Some((_, n)) => *n += 1,
            None => counts.push((record.fatigue_label, 1)),
        }
    }

    let mut best: Option<(f64, usize)> = None;
    for (value, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((value, count));
        }
    }
    best.map(|(v, _)| v).unwrap_or(f64::NAN)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn mean_of(window: &[SensorRecord], f: impl Fn(&SensorRecord) -> f64) -> f64 {
    window.iter().map(f).sum::<f64>() / window.len() as f64
}

/// Standard deviation with Bessel's correction (n - 1)
fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

fn squared_norm(v: &[f64; 3]) -> f64 {
    v.iter().map(|x| x * x).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hr: f64, label: f64) -> SensorRecord {
        SensorRecord {
            heart_rate: hr,
            spo2: 96.0,
            gsr: 2.0,
            skin_temp: 34.0,
            acc: [3.0, 4.0, 0.0],
            gyro: [-1.0, -2.0, 2.0],
            fatigue_label: label,
        }
    }

    #[test]
    fn test_window_count_discards_remainder() {
        let records: Vec<SensorRecord> = (0..25).map(|i| record(70.0 + i as f64, 1.0)).collect();
        let windows = Windows::new(&records, 10);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows.count(), 2);

        let exact: Vec<SensorRecord> = records[..20].to_vec();
        assert_eq!(Windows::new(&exact, 10).count(), 2);
        assert_eq!(Windows::new(&records[..9], 10).count(), 0);
    }

    #[test]
    fn test_feature_values() {
        let window: Vec<SensorRecord> = [70.0, 72.0, 74.0, 76.0]
            .iter()
            .map(|&hr| record(hr, 10.0))
            .collect();
        let f = FeatureExtractor::extract(&window);

        assert!((f.hr_mean - 73.0).abs() < 1e-12);
        // sample std of 70,72,74,76 = sqrt(20/3)
        assert!((f.hr_std - (20.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(f.spo2_mean, 96.0);
        assert_eq!(f.gsr_mean, 2.0);
        assert_eq!(f.temp_mean, 34.0);
        assert!((f.acc_mag - 5.0).abs() < 1e-12);
        assert!((f.gyro_mag - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_magnitudes_are_non_negative() {
        let window: Vec<SensorRecord> = (0..10)
            .map(|i| {
                let mut r = record(70.0, 1.0);
                r.acc = [-(i as f64), -2.0, -0.5];
                r.gyro = [-0.1 * i as f64, 0.0, -3.0];
                r
            })
            .collect();
        let f = FeatureExtractor::extract(&window);
        assert!(f.acc_mag >= 0.0);
        assert!(f.gyro_mag >= 0.0);
    }

    #[test]
    fn test_majority_label() {
        let window: Vec<SensorRecord> = [3.0, 5.0, 5.0, 3.0, 5.0]
            .iter()
            .map(|&l| record(70.0, l))
            .collect();
        assert_eq!(majority_label(&window), 5.0);
    }

    #[test]
    fn test_majority_label_tie_goes_to_first_seen() {
        let window: Vec<SensorRecord> = [7.0, 2.0, 2.0, 7.0]
            .iter()
            .map(|&l| record(70.0, l))
            .collect();
        assert_eq!(majority_label(&window), 7.0);
    }

    #[test]
    fn test_windows_are_non_overlapping() {
        let records: Vec<SensorRecord> = (0..30)
            .map(|i| record(60.0 + i as f64, (i / 10) as f64))
            .collect();
        let windows: Vec<LabeledWindow> = Windows::new(&records, 10).collect();

        assert_eq!(windows.len(), 3);
        assert!((windows[0].features.hr_mean - 64.5).abs() < 1e-12);
        assert!((windows[1].features.hr_mean - 74.5).abs() < 1e-12);
        assert_eq!(windows[2].label, 2.0);
    }
}
