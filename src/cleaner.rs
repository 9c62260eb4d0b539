//! Artifact reduction
//!
//! Removes physiologically invalid rows and closes short gaps:
//! - SpO2 and heart-rate range checks (strict bounds)
//! - Heart-rate jump rejection against the previous kept row
//! - Linear interpolation of interior gaps up to `max_gap` values per column
//!
//! Rows that still miss a value afterwards are dropped, since a single missing
//! sample would spread through the zero-phase filter.

use crate::config::{PipelineConfig, Range};
use crate::types::{Channel, CleaningReport, RawRecord, SensorRecord};
use tracing::{debug, info};

/// Artifact filter for raw sensor rows
#[derive(Debug, Clone)]
pub struct ArtifactFilter {
    spo2_range: Range,
    heart_rate_range: Range,
    hr_jump_threshold: f64,
    max_gap: usize,
}

impl ArtifactFilter {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            spo2_range: config.spo2_range,
            heart_rate_range: config.heart_rate_range,
            hr_jump_threshold: config.hr_jump_threshold,
            max_gap: config.max_gap,
        }
    }

    /// Run range checks, jump rejection, interpolation, and completeness checks
    pub fn clean(&self, records: Vec<RawRecord>) -> (Vec<SensorRecord>, CleaningReport) {
        let mut report = CleaningReport {
            input_rows: records.len(),
            ..Default::default()
        };

        let in_range = self.drop_out_of_range(records);
        report.out_of_range = report.input_rows - in_range.len();

        let before_jumps = in_range.len();
        let mut kept = self.drop_hr_jumps(in_range);
        report.hr_jumps = before_jumps - kept.len();

        report.interpolated_cells = interpolate_gaps(&mut kept, self.max_gap);

        let complete: Vec<SensorRecord> = kept.iter().filter_map(RawRecord::complete).collect();
        report.unfilled_rows = kept.len() - complete.len();

        // Dropping unfilled rows joins rows that were never compared.
        let before_rejoin = complete.len();
        let cleaned = retain_steady_heart_rate(complete, self.hr_jump_threshold, |r| {
            Some(r.heart_rate)
        });
        report.hr_jumps += before_rejoin - cleaned.len();
        report.kept_rows = cleaned.len();

        info!(
            input_rows = report.input_rows,
            out_of_range = report.out_of_range,
            hr_jumps = report.hr_jumps,
            interpolated_cells = report.interpolated_cells,
            unfilled_rows = report.unfilled_rows,
            kept_rows = report.kept_rows,
            "artifact filter complete"
        );

        (cleaned, report)
    }

    /// Keep rows whose SpO2 and heart rate are present and inside their ranges
    pub fn drop_out_of_range(&self, records: Vec<RawRecord>) -> Vec<RawRecord> {
        records
            .into_iter()
            .filter(|r| {
                let spo2_ok = r
                    .get(Channel::Spo2)
                    .is_some_and(|v| self.spo2_range.contains(v));
                let hr_ok = r
                    .get(Channel::HeartRate)
                    .is_some_and(|v| self.heart_rate_range.contains(v));
                spo2_ok && hr_ok
            })
            .collect()
    }

    /// Drop rows whose heart rate moved by at least the jump threshold since
    /// the previous kept row. The first row has nothing to compare against and
    /// is kept.
    pub fn drop_hr_jumps(&self, records: Vec<RawRecord>) -> Vec<RawRecord> {
        retain_steady_heart_rate(records, self.hr_jump_threshold, |r| {
            r.get(Channel::HeartRate)
        })
    }
}

/// Keep rows whose heart rate differs from the previous kept row by less than
/// `threshold`. Rows without a heart rate are dropped.
fn retain_steady_heart_rate<T>(
    records: Vec<T>,
    threshold: f64,
    heart_rate: impl Fn(&T) -> Option<f64>,
) -> Vec<T> {
    let mut kept: Vec<T> = Vec::with_capacity(records.len());
    let mut previous_hr: Option<f64> = None;

    for record in records {
        let Some(hr) = heart_rate(&record) else {
            continue;
        };
        match previous_hr {
            Some(prev) if (hr - prev).abs() >= threshold => {
                debug!(prev, hr, "rejected heart-rate jump");
            }
            _ => {
                previous_hr = Some(hr);
                kept.push(record);
            }
        }
    }

    kept
}

/// Linearly interpolate interior runs of missing values no longer than
/// `max_gap`, per column. Returns the number of cells filled.
pub fn interpolate_gaps(records: &mut [RawRecord], max_gap: usize) -> usize {
    let mut filled = 0;

    for channel in Channel::ALL {
        let mut last_known: Option<usize> = None;
        let mut i = 0;

        while i < records.len() {
            if records[i].get(channel).is_some() {
                last_known = Some(i);
                i += 1;
                continue;
            }

            let gap_start = i;
            while i < records.len() && records[i].get(channel).is_none() {
                i += 1;
            }
            let gap_len = i - gap_start;

            // Leading or trailing gaps stay missing.
            let (Some(left), true) = (last_known, i < records.len()) else {
                continue;
            };
            if gap_len > max_gap {
                continue;
            }

            let (Some(y0), Some(y1)) = (records[left].get(channel), records[i].get(channel))
            else {
                continue;
            };
            let span = (i - left) as f64;
            for k in gap_start..i {
                let t = (k - left) as f64 / span;
                records[k].set(channel, Some(y0 + (y1 - y0) * t));
                filled += 1;
            }
        }
    }

    filled
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(hr: f64, spo2: f64) -> RawRecord {
        let mut r = RawRecord::default();
        for channel in Channel::ALL {
            r.set(channel, Some(1.0));
        }
        r.set(Channel::HeartRate, Some(hr));
        r.set(Channel::Spo2, Some(spo2));
        r
    }

    fn filter() -> ArtifactFilter {
        ArtifactFilter::new(&PipelineConfig::default())
    }

    #[test]
    fn test_range_bounds_are_strict() {
        let records = vec![
            row(40.0, 95.0),
            row(41.0, 95.0),
            row(180.0, 95.0),
            row(70.0, 80.0),
            row(70.0, 100.0),
            row(70.0, 99.9),
        ];
        let kept = filter().drop_out_of_range(records);

        let hrs: Vec<f64> = kept.iter().map(|r| r.get(Channel::HeartRate).unwrap()).collect();
        assert_eq!(hrs, vec![41.0, 70.0]);
        for r in &kept {
            let spo2 = r.get(Channel::Spo2).unwrap();
            assert!(spo2 > 80.0 && spo2 < 100.0);
        }
    }

    #[test]
    fn test_missing_vitals_are_dropped() {
        let mut r = row(70.0, 95.0);
        r.set(Channel::Spo2, None);
        assert!(filter().drop_out_of_range(vec![r]).is_empty());
    }

    #[test]
    fn test_jump_compares_against_last_kept_row() {
        // 85 jumps from 60 and is dropped; 84 is then compared with 60, not 85.
        let records = vec![row(60.0, 95.0), row(85.0, 95.0), row(84.0, 95.0), row(70.0, 95.0)];
        let kept = filter().drop_hr_jumps(records);

        let hrs: Vec<f64> = kept.iter().map(|r| r.get(Channel::HeartRate).unwrap()).collect();
        assert_eq!(hrs, vec![60.0, 70.0]);
    }

    #[test]
    fn test_jump_threshold_is_inclusive() {
        let kept = filter().drop_hr_jumps(vec![row(60.0, 95.0), row(80.0, 95.0), row(79.9, 95.0)]);
        let hrs: Vec<f64> = kept.iter().map(|r| r.get(Channel::HeartRate).unwrap()).collect();
        assert_eq!(hrs, vec![60.0, 79.9]);
    }

    #[test]
    fn test_consecutive_kept_rows_stay_under_threshold() {
        let hrs = [70.0, 95.0, 72.0, 50.0, 68.0, 90.0, 87.0, 120.0, 100.0, 101.0];
        let records = hrs.iter().map(|&hr| row(hr, 95.0)).collect();
        let kept = filter().drop_hr_jumps(records);

        for pair in kept.windows(2) {
            let a = pair[0].get(Channel::HeartRate).unwrap();
            let b = pair[1].get(Channel::HeartRate).unwrap();
            assert!((b - a).abs() < 20.0);
        }
    }

    #[test]
    fn test_interpolates_short_gap() {
        let mut records: Vec<RawRecord> = (0..5).map(|_| row(70.0, 95.0)).collect();
        records[0].set(Channel::Gsr, Some(1.0));
        records[1].set(Channel::Gsr, None);
        records[2].set(Channel::Gsr, None);
        records[3].set(Channel::Gsr, None);
        records[4].set(Channel::Gsr, Some(5.0));

        let filled = interpolate_gaps(&mut records, 5);

        assert_eq!(filled, 3);
        let gsr: Vec<f64> = records.iter().map(|r| r.get(Channel::Gsr).unwrap()).collect();
        assert_eq!(gsr, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_long_gap_stays_missing() {
        let mut records: Vec<RawRecord> = (0..8).map(|_| row(70.0, 95.0)).collect();
        for r in records.iter_mut().take(7).skip(1) {
            r.set(Channel::SkinTemp, None);
        }

        let filled = interpolate_gaps(&mut records, 5);

        assert_eq!(filled, 0);
        for r in &records[1..7] {
            assert_eq!(r.get(Channel::SkinTemp), None);
        }
    }

    #[test]
    fn test_edge_gaps_stay_missing() {
        let mut records: Vec<RawRecord> = (0..4).map(|_| row(70.0, 95.0)).collect();
        records[0].set(Channel::AccX, None);
        records[3].set(Channel::AccX, None);

        assert_eq!(interpolate_gaps(&mut records, 5), 0);
        assert_eq!(records[0].get(Channel::AccX), None);
        assert_eq!(records[3].get(Channel::AccX), None);
    }

    #[test]
    fn test_clean_report() {
        let mut records = vec![
            row(70.0, 95.0),
            row(30.0, 95.0),
            row(72.0, 95.0),
            row(100.0, 95.0),
            row(73.0, 95.0),
            row(74.0, 95.0),
        ];
        records[2].set(Channel::Gsr, None);
        records[5].set(Channel::Gsr, None);

        let (cleaned, report) = filter().clean(records);

        assert_eq!(
            report,
            CleaningReport {
                input_rows: 6,
                out_of_range: 1,
                hr_jumps: 1,
                interpolated_cells: 1,
                unfilled_rows: 1,
                kept_rows: 3,
            }
        );
        assert_eq!(cleaned.len(), 3);
        assert_eq!(cleaned[1].gsr, 1.0);
    }

    #[test]
    fn test_unfilled_gap_does_not_join_heart_rate_jump() {
        // HR climbs by 10 per row while GSR is missing on rows 1..=6, a gap too
        // long to fill; the surviving rows 70 and 140 must not end up adjacent.
        let mut records: Vec<RawRecord> = (0..8).map(|i| row(70.0 + 10.0 * i as f64, 95.0)).collect();
        for record in &mut records[1..7] {
            record.set(Channel::Gsr, None);
        }

        let (cleaned, report) = filter().clean(records);

        let hrs: Vec<f64> = cleaned.iter().map(|r| r.heart_rate).collect();
        assert_eq!(hrs, vec![70.0]);
        assert_eq!(report.unfilled_rows, 6);
        assert_eq!(report.hr_jumps, 1);
        assert_eq!(report.kept_rows, 1);
        for pair in cleaned.windows(2) {
            assert!((pair[1].heart_rate - pair[0].heart_rate).abs() < 20.0);
        }
    }
}
