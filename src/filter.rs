//! Zero-phase low-pass filtering
//!
//! Digital Butterworth design (bilinear transform with pre-warping) and
//! forward-backward filtering with odd-extension padding and steady-state
//! initial conditions. Filtering is non-causal: output sample `i` depends on
//! samples after `i`, so this is for offline batches only.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::types::SensorRecord;
use std::f64::consts::PI;
use tracing::debug;

/// Low-pass Butterworth filter in transfer-function form
#[derive(Debug, Clone, PartialEq)]
pub struct Butterworth {
    /// Numerator coefficients
    b: Vec<f64>,
    /// Denominator coefficients, `a[0] == 1`
    a: Vec<f64>,
}

impl Butterworth {
    /// Design a low-pass filter of `order` with cutoff `cutoff_hz` for a signal
    /// sampled at `sampling_hz`.
    pub fn lowpass(order: usize, cutoff_hz: f64, sampling_hz: f64) -> Result<Self, PipelineError> {
        let nyquist = 0.5 * sampling_hz;
        Self::lowpass_normalized(order, cutoff_hz / nyquist)
    }

    /// Design from a cutoff normalized to the Nyquist frequency, `0 < wn < 1`
    pub fn lowpass_normalized(order: usize, wn: f64) -> Result<Self, PipelineError> {
        if !(wn > 0.0 && wn < 1.0) {
            return Err(PipelineError::InvalidCutoff(wn));
        }
        if order == 0 {
            return Err(PipelineError::Config("filter order must be positive".to_string()));
        }

        // Pre-warped analog cutoff for the bilinear transform.
        let omega = (PI * wn / 2.0).tan();
        let omega_sq = omega * omega;

        let mut b = vec![1.0];
        let mut a = vec![1.0];

        for k in 0..order / 2 {
            // Damping of the k-th conjugate pole pair.
            let q = 2.0 * (PI * (2 * k + 1) as f64 / (2 * order) as f64).sin();
            let denom = 1.0 + q * omega + omega_sq;
            let gain = omega_sq / denom;
            b = convolve(&b, &[gain, 2.0 * gain, gain]);
            a = convolve(
                &a,
                &[1.0, 2.0 * (omega_sq - 1.0) / denom, (1.0 - q * omega + omega_sq) / denom],
            );
        }

        if order % 2 == 1 {
            let gain = omega / (1.0 + omega);
            b = convolve(&b, &[gain, gain]);
            a = convolve(&a, &[1.0, (omega - 1.0) / (omega + 1.0)]);
        }

        Ok(Self { b, a })
    }

    pub fn numerator(&self) -> &[f64] {
        &self.b
    }

    pub fn denominator(&self) -> &[f64] {
        &self.a
    }

    /// Number of samples mirrored onto each edge before filtering
    pub fn pad_len(&self) -> usize {
        3 * self.b.len().max(self.a.len())
    }

    /// Single-direction IIR filter (direct form II transposed)
    pub fn lfilter(&self, signal: &[f64], initial: Option<&[f64]>) -> Vec<f64> {
        let n = self.a.len();
        let mut state = match initial {
            Some(z) => z.to_vec(),
            None => vec![0.0; n - 1],
        };

        let mut out = Vec::with_capacity(signal.len());
        for &x in signal {
            let y = self.b[0] * x + state.first().copied().unwrap_or(0.0);
            for i in 0..n.saturating_sub(2) {
                state[i] = self.b[i + 1] * x + state[i + 1] - self.a[i + 1] * y;
            }
            if n >= 2 {
                state[n - 2] = self.b[n - 1] * x - self.a[n - 1] * y;
            }
            out.push(y);
        }
        out
    }

    /// Filter state after a unit step has settled
    pub fn steady_state(&self) -> Vec<f64> {
        let n = self.a.len();
        if n < 2 {
            return Vec::new();
        }
        let dc_gain = self.b.iter().sum::<f64>() / self.a.iter().sum::<f64>();

        let mut state = vec![0.0; n - 1];
        state[n - 2] = self.b[n - 1] - self.a[n - 1] * dc_gain;
        for i in (0..n - 2).rev() {
            state[i] = self.b[i + 1] - self.a[i + 1] * dc_gain + state[i + 1];
        }
        state
    }

    /// Forward-backward filtering with no phase shift
    pub fn filtfilt(&self, signal: &[f64]) -> Result<Vec<f64>, PipelineError> {
        let pad = self.pad_len();
        let len = signal.len();
        if len <= pad {
            return Err(PipelineError::SignalTooShort { len, min: pad });
        }

        let first = signal[0];
        let last = signal[len - 1];
        let mut extended = Vec::with_capacity(len + 2 * pad);
        extended.extend((1..=pad).rev().map(|k| 2.0 * first - signal[k]));
        extended.extend_from_slice(signal);
        extended.extend((1..=pad).map(|k| 2.0 * last - signal[len - 1 - k]));

        let zi = self.steady_state();

        let scaled = |x0: f64| -> Vec<f64> { zi.iter().map(|z| z * x0).collect() };

        let forward = self.lfilter(&extended, Some(&scaled(extended[0])));
        let mut reversed: Vec<f64> = forward.into_iter().rev().collect();
        let x0 = reversed[0];
        reversed = self.lfilter(&reversed, Some(&scaled(x0)));
        reversed.reverse();

        Ok(reversed[pad..pad + len].to_vec())
    }
}

fn convolve(p: &[f64], q: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; p.len() + q.len() - 1];
    for (i, &pi) in p.iter().enumerate() {
        for (j, &qj) in q.iter().enumerate() {
            out[i + j] += pi * qj;
        }
    }
    out
}

/// Applies the per-channel low-pass filters to cleaned records
#[derive(Debug, Clone)]
pub struct SignalFilter {
    heart_rate: Butterworth,
    gsr: Butterworth,
    skin_temp: Butterworth,
}

impl SignalFilter {
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let order = config.filter_order;
        let fs = config.sampling_hz;
        Ok(Self {
            heart_rate: Butterworth::lowpass(order, config.cutoffs.heart_rate_hz, fs)?,
            gsr: Butterworth::lowpass(order, config.cutoffs.gsr_hz, fs)?,
            skin_temp: Butterworth::lowpass(order, config.cutoffs.skin_temp_hz, fs)?,
        })
    }

    /// Replace heart rate, GSR, and skin temperature with their filtered series
    pub fn apply(&self, records: &mut [SensorRecord]) -> Result<(), PipelineError> {
        let column = |f: fn(&SensorRecord) -> f64| -> Vec<f64> { records.iter().map(f).collect() };

        let hr = self.heart_rate.filtfilt(&column(|r| r.heart_rate))?;
        let gsr = self.gsr.filtfilt(&column(|r| r.gsr))?;
        let temp = self.skin_temp.filtfilt(&column(|r| r.skin_temp))?;

        for (i, record) in records.iter_mut().enumerate() {
            record.heart_rate = hr[i];
            record.gsr = gsr[i];
            record.skin_temp = temp[i];
        }

        debug!(samples = records.len(), "applied zero-phase low-pass filters");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: &[f64], expected: &[f64], tol: f64) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < tol, "{a} != {e}");
        }
    }

    #[test]
    fn test_second_order_coefficients() {
        let filter = Butterworth::lowpass_normalized(2, 0.5).unwrap();
        assert_close(filter.numerator(), &[0.29289322, 0.58578644, 0.29289322], 1e-7);
        assert_close(filter.denominator(), &[1.0, 0.0, 0.17157288], 1e-7);
    }

    #[test]
    fn test_fourth_order_coefficients() {
        let filter = Butterworth::lowpass_normalized(4, 0.5).unwrap();
        assert_close(
            filter.numerator(),
            &[0.09398085, 0.37592341, 0.56388511, 0.37592341, 0.09398085],
            1e-6,
        );
        assert_close(filter.denominator(), &[1.0, 0.0, 0.48602882, 0.0, 0.0176648], 1e-6);
    }

    #[test]
    fn test_unity_dc_gain() {
        for (order, wn) in [(1, 0.3), (3, 0.6), (4, 0.8), (4, 0.4)] {
            let filter = Butterworth::lowpass_normalized(order, wn).unwrap();
            let gain: f64 =
                filter.numerator().iter().sum::<f64>() / filter.denominator().iter().sum::<f64>();
            assert!((gain - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_cutoff_from_sampling_rate() {
        // 0.4 Hz at 1 Hz sampling is 0.8 of Nyquist.
        let a = Butterworth::lowpass(4, 0.4, 1.0).unwrap();
        let b = Butterworth::lowpass_normalized(4, 0.8).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_cutoff() {
        assert!(matches!(
            Butterworth::lowpass(4, 0.6, 1.0),
            Err(PipelineError::InvalidCutoff(_))
        ));
        assert!(Butterworth::lowpass_normalized(4, 0.0).is_err());
    }

    #[test]
    fn test_constant_signal_passes_unchanged() {
        let filter = Butterworth::lowpass(4, 0.2, 1.0).unwrap();
        let signal = vec![36.5; 40];
        let out = filter.filtfilt(&signal).unwrap();
        assert_close(&out, &signal, 1e-9);
    }

    #[test]
    fn test_nyquist_tone_is_removed() {
        let filter = Butterworth::lowpass(4, 0.2, 1.0).unwrap();
        let signal: Vec<f64> = (0..200).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let out = filter.filtfilt(&signal).unwrap();
        for y in &out[50..150] {
            assert!(y.abs() < 0.05, "residual {y}");
        }
    }

    #[test]
    fn test_zero_phase_keeps_peak_position() {
        let filter = Butterworth::lowpass(4, 0.1, 1.0).unwrap();
        let signal: Vec<f64> = (0..101)
            .map(|i| {
                let t = (i as f64 - 50.0) / 8.0;
                (-t * t).exp()
            })
            .collect();
        let out = filter.filtfilt(&signal).unwrap();
        let peak = out
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 50);
    }

    #[test]
    fn test_short_signal_errors() {
        let filter = Butterworth::lowpass(4, 0.4, 1.0).unwrap();
        assert_eq!(filter.pad_len(), 15);
        let result = filter.filtfilt(&[70.0; 15]);
        assert!(matches!(result, Err(PipelineError::SignalTooShort { len: 15, min: 15 })));
        assert!(filter.filtfilt(&[70.0; 16]).is_ok());
    }

    #[test]
    fn test_signal_filter_touches_only_filtered_channels() {
        let config = PipelineConfig::default();
        let filter = SignalFilter::new(&config).unwrap();
        let mut records: Vec<SensorRecord> = (0..30)
            .map(|i| SensorRecord {
                heart_rate: 70.0 + if i % 2 == 0 { 1.0 } else { -1.0 },
                spo2: 97.0,
                gsr: 1.0,
                skin_temp: 33.0,
                acc: [0.0, 0.0, 9.8],
                gyro: [0.1, 0.1, 0.1],
                fatigue_label: 50.0,
            })
            .collect();

        filter.apply(&mut records).unwrap();

        for r in &records {
            assert_eq!(r.spo2, 97.0);
            assert_eq!(r.acc, [0.0, 0.0, 9.8]);
            assert!((r.gsr - 1.0).abs() < 1e-9);
            assert!((r.heart_rate - 70.0).abs() < 1.0);
        }
    }
}
