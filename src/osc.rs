//! Phase-accumulating sine oscillator.

#![forbid(unsafe_code)]

// IMPORTANT: runs at audio rate inside the render path. No logging, no allocation.

use std::f64::consts::TAU;

/// Stateful sine oscillator with a wrapped phase accumulator.
///
/// The phase is kept in `[0, 2π)` and carried across buffer boundaries, so
/// consecutive callbacks join without a click.
#[derive(Debug, Clone)]
pub struct PhaseOscillator {
    phase: f64,
    frequency_hz: f64,
    sample_rate_hz: f64,
    amplitude: f64,
    increment: f64,
}

impl PhaseOscillator {
    /// Create an oscillator starting at phase 0.
    pub fn new(frequency_hz: f64, sample_rate_hz: f64, amplitude: f64) -> Self {
        Self {
            phase: 0.0,
            frequency_hz,
            sample_rate_hz,
            amplitude,
            increment: phase_increment(frequency_hz, sample_rate_hz),
        }
    }

    /// Return `amplitude * sin(phase)` and advance by one sample.
    #[inline]
    pub fn next_sample(&mut self) -> f64 {
        let sample = self.amplitude * self.phase.sin();
        self.phase += self.increment;
        if self.phase >= TAU {
            self.phase -= TAU;
        }
        sample
    }

    /// Change frequency without touching the phase.
    pub fn set_frequency(&mut self, frequency_hz: f64) {
        self.frequency_hz = frequency_hz;
        self.increment = phase_increment(frequency_hz, self.sample_rate_hz);
    }

    /// Change amplitude without touching the phase.
    pub fn set_amplitude(&mut self, amplitude: f64) {
        self.amplitude = amplitude;
    }

    /// Rewind the phase to zero.
    pub fn reset(&mut self) {
        self.phase = 0.0;
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    pub fn amplitude(&self) -> f64 {
        self.amplitude
    }
}

/// Per-sample phase step, reduced into `[0, 2π)` so one subtraction always wraps.
fn phase_increment(frequency_hz: f64, sample_rate_hz: f64) -> f64 {
    if sample_rate_hz <= 0.0 || !frequency_hz.is_finite() {
        return 0.0;
    }
    (TAU * frequency_hz / sample_rate_hz).rem_euclid(TAU)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_is_zero() {
        let mut osc = PhaseOscillator::new(440.0, 48000.0, 0.5);
        assert!(osc.next_sample().abs() < 1e-12);
    }

    #[test]
    fn quarter_period_hits_peak() {
        // 48000 / (1200 * 4) = 10 samples per quarter period, exactly.
        let mut osc = PhaseOscillator::new(1200.0, 48000.0, 0.8);
        let samples: Vec<f64> = (0..11).map(|_| osc.next_sample()).collect();
        assert!((samples[10] - 0.8).abs() < 1e-9, "peak was {}", samples[10]);
    }

    #[test]
    fn phase_wraps_instead_of_resetting() {
        let mut osc = PhaseOscillator::new(440.0, 48000.0, 1.0);
        for _ in 0..48000 {
            osc.next_sample();
            assert!(osc.phase() >= 0.0 && osc.phase() < TAU);
        }
        // After one second of 440 Hz the phase is back near 0 (or near 2π).
        let p = osc.phase();
        assert!(p < 1e-6 || TAU - p < 1e-6, "phase drifted to {}", p);
    }

    #[test]
    fn set_frequency_keeps_phase() {
        let mut osc = PhaseOscillator::new(440.0, 48000.0, 0.5);
        for _ in 0..17 {
            osc.next_sample();
        }
        let before = osc.phase();
        osc.set_frequency(880.0);
        assert_eq!(osc.phase(), before);
        assert_eq!(osc.frequency_hz(), 880.0);
    }

    #[test]
    fn reset_rewinds_phase() {
        let mut osc = PhaseOscillator::new(440.0, 48000.0, 0.5);
        for _ in 0..100 {
            osc.next_sample();
        }
        osc.reset();
        assert_eq!(osc.phase(), 0.0);
        osc.set_amplitude(0.8);
        assert_eq!(osc.amplitude(), 0.8);
    }

    #[test]
    fn increment_above_sample_rate_still_wraps() {
        let mut osc = PhaseOscillator::new(20000.0, 8000.0, 1.0);
        for _ in 0..1000 {
            osc.next_sample();
            assert!(osc.phase() < TAU);
        }
    }
}
