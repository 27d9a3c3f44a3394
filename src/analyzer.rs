//! Signal analysis over a finished capture.
//!
//! Everything here runs on the control path after the capture is frozen, so it
//! is free to take its time. Samples are normalized to `[-1, 1]`.

#![forbid(unsafe_code)]

use crate::invariant_ppt::{assert_invariant, ANALYSIS_COMPLETE};
use thiserror::Error;
use tracing::debug;

/// Below this RMS a capture is treated as silence.
pub const SILENCE_RMS_THRESHOLD: f64 = 0.01;
/// Above this absolute mean a capture is treated as DC-biased.
pub const DC_OFFSET_THRESHOLD: f64 = 0.1;

/// Estimate the frequency of a single clean tone by counting sign changes.
///
/// Zero counts as non-negative. Returns 0 for fewer than two samples or a
/// zero sample rate.
pub fn detect_frequency(samples: &[f32], sample_rate_hz: u32) -> f64 {
    if samples.len() < 2 || sample_rate_hz == 0 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
        .count();
    let duration_secs = samples.len() as f64 / f64::from(sample_rate_hz);
    (crossings as f64 / 2.0) / duration_secs
}

/// Number of samples before the first one whose magnitude reaches `threshold`.
///
/// A capture that starts before the output reaches the device begins with
/// silence, which would drag the crossing rate down. Returns `samples.len()`
/// when nothing reaches the threshold.
pub fn leading_silence(samples: &[f32], threshold: f64) -> usize {
    samples
        .iter()
        .position(|&s| f64::from(s).abs() >= threshold)
        .unwrap_or(samples.len())
}

/// Pass/fail limits for [`check_amplitude`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmplitudeThresholds {
    pub silence_rms: f64,
    pub dc_offset: f64,
}

impl Default for AmplitudeThresholds {
    fn default() -> Self {
        Self {
            silence_rms: SILENCE_RMS_THRESHOLD,
            dc_offset: DC_OFFSET_THRESHOLD,
        }
    }
}

/// RMS and mean of a capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmplitudeStats {
    pub rms: f64,
    pub mean: f64,
}

impl AmplitudeStats {
    /// Empty input gives zero for both.
    pub fn measure(samples: &[f32]) -> Self {
        if samples.is_empty() {
            return Self { rms: 0.0, mean: 0.0 };
        }
        let (sum, sum_sq) = samples.iter().fold((0.0f64, 0.0f64), |(s, sq), &x| {
            let x = f64::from(x);
            (s + x, sq + x * x)
        });
        let n = samples.len() as f64;
        Self {
            rms: (sum_sq / n).sqrt(),
            mean: sum / n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum AmplitudeError {
    #[error("signal is silent (RMS {rms:.4})")]
    Silent { rms: f64 },
    #[error("signal has a DC offset (mean {mean:.4})")]
    DcOffset { mean: f64 },
}

/// Measure the capture and apply `thresholds`. Silence is checked first.
pub fn check_amplitude(
    samples: &[f32],
    thresholds: &AmplitudeThresholds,
) -> Result<AmplitudeStats, AmplitudeError> {
    let stats = AmplitudeStats::measure(samples);
    if stats.rms < thresholds.silence_rms {
        return Err(AmplitudeError::Silent { rms: stats.rms });
    }
    if stats.mean.abs() > thresholds.dc_offset {
        return Err(AmplitudeError::DcOffset { mean: stats.mean });
    }
    Ok(stats)
}

/// Measured values for one capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisResult {
    pub rms: f64,
    pub mean_offset: f64,
    pub detected_frequency_hz: f64,
}

/// Runs both measurements over one capture.
#[derive(Debug, Clone, Default)]
pub struct SignalAnalyzer {
    thresholds: AmplitudeThresholds,
}

impl SignalAnalyzer {
    pub fn new(thresholds: AmplitudeThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &AmplitudeThresholds {
        &self.thresholds
    }

    /// Measure everything, independent of any verdict.
    pub fn analyze(&self, samples: &[f32], sample_rate_hz: u32) -> AnalysisResult {
        let stats = AmplitudeStats::measure(samples);
        let result = AnalysisResult {
            rms: stats.rms,
            mean_offset: stats.mean,
            detected_frequency_hz: detect_frequency(samples, sample_rate_hz),
        };
        debug!(
            "Analyzed {} samples @ {} Hz: rms={:.4} mean={:.4} freq={:.2} Hz",
            samples.len(),
            sample_rate_hz,
            result.rms,
            result.mean_offset,
            result.detected_frequency_hz
        );
        assert_invariant(
            ANALYSIS_COMPLETE,
            result.rms.is_finite()
                && result.mean_offset.is_finite()
                && result.detected_frequency_hz.is_finite(),
            "Analysis statistics are finite",
            Some("SignalAnalyzer::analyze"),
        );
        result
    }

    /// Apply the amplitude thresholds to an existing result.
    pub fn judge_amplitude(&self, result: &AnalysisResult) -> Result<(), AmplitudeError> {
        if result.rms < self.thresholds.silence_rms {
            return Err(AmplitudeError::Silent { rms: result.rms });
        }
        if result.mean_offset.abs() > self.thresholds.dc_offset {
            return Err(AmplitudeError::DcOffset {
                mean: result.mean_offset,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    fn tone(freq: f64, rate: u32, secs: f64, amp: f64, offset: f64) -> Vec<f32> {
        let n = (f64::from(rate) * secs) as usize;
        (0..n)
            .map(|i| (amp * (TAU * freq * i as f64 / f64::from(rate)).sin() + offset) as f32)
            .collect()
    }

    #[test]
    fn detects_440_within_tolerance() {
        let samples = tone(440.0, 48_000, 2.0, 0.5, 0.0);
        let f = detect_frequency(&samples, 48_000);
        assert!((f - 440.0).abs() <= 5.0, "detected {}", f);
    }

    #[test]
    fn zero_counts_as_non_negative() {
        // 0 → -1 is a crossing, -1 → 0 is a crossing, 0 → 1 is not.
        let f = detect_frequency(&[0.0, -1.0, 0.0, 1.0], 4);
        assert_eq!(f, 1.0);
    }

    #[test]
    fn leading_silence_stops_at_first_audible_sample() {
        assert_eq!(leading_silence(&[0.0, 0.001, -0.02, 0.5], 0.01), 2);
        assert_eq!(leading_silence(&[0.3, 0.0], 0.01), 0);
        assert_eq!(leading_silence(&[0.0; 8], 0.01), 8);
        assert_eq!(leading_silence(&[], 0.01), 0);
    }

    #[test]
    fn tiny_inputs_give_zero() {
        assert_eq!(detect_frequency(&[], 48_000), 0.0);
        assert_eq!(detect_frequency(&[0.5], 48_000), 0.0);
        assert_eq!(detect_frequency(&[0.5, -0.5], 0), 0.0);
    }

    #[test]
    fn silence_fails_amplitude() {
        let samples = vec![0.0f32; 4800];
        assert!(matches!(
            check_amplitude(&samples, &AmplitudeThresholds::default()),
            Err(AmplitudeError::Silent { .. })
        ));
        assert!(matches!(
            check_amplitude(&[], &AmplitudeThresholds::default()),
            Err(AmplitudeError::Silent { .. })
        ));
    }

    #[test]
    fn dc_offset_fails_amplitude() {
        let samples = tone(440.0, 48_000, 0.5, 0.3, 0.25);
        assert!(matches!(
            check_amplitude(&samples, &AmplitudeThresholds::default()),
            Err(AmplitudeError::DcOffset { .. })
        ));
    }

    #[test]
    fn sine_rms_is_amplitude_over_root_two() {
        let samples = tone(1000.0, 48_000, 1.0, 0.5, 0.0);
        let stats = check_amplitude(&samples, &AmplitudeThresholds::default()).unwrap();
        assert!((stats.rms - 0.5 / 2f64.sqrt()).abs() < 1e-3);
        assert!(stats.mean.abs() < 1e-3);
    }

    #[test]
    fn analyzer_agrees_with_free_functions() {
        let samples = tone(997.0, 44_100, 1.0, 0.8, 0.0);
        let analyzer = SignalAnalyzer::default();
        let result = analyzer.analyze(&samples, 44_100);
        assert_eq!(result.detected_frequency_hz, detect_frequency(&samples, 44_100));
        analyzer.judge_amplitude(&result).unwrap();
    }
}
