use proptest::prelude::*;
use sinecard::PhaseOscillator;
use std::f64::consts::TAU;

proptest! {
    #[test]
    fn phase_stays_wrapped(
        freq in 0.0f64..200_000.0,
        rate in 8_000.0f64..192_000.0,
        steps in 1usize..5_000,
    ) {
        let mut osc = PhaseOscillator::new(freq, rate, 1.0);
        for _ in 0..steps {
            let s = osc.next_sample();
            prop_assert!((-1.0..=1.0).contains(&s));
            prop_assert!(osc.phase() >= 0.0 && osc.phase() < TAU);
        }
    }

    #[test]
    fn amplitude_bounds_output(amp in 0.0f64..=1.0, freq in 20.0f64..20_000.0) {
        let mut osc = PhaseOscillator::new(freq, 48_000.0, amp);
        for _ in 0..1_000 {
            prop_assert!(osc.next_sample().abs() <= amp + 1e-12);
        }
    }
}

#[test]
fn quarter_rate_tone_hits_the_peaks() {
    let mut osc = PhaseOscillator::new(12_000.0, 48_000.0, 0.5);
    let samples: Vec<f64> = (0..4).map(|_| osc.next_sample()).collect();
    let expected = [0.0, 0.5, 0.0, -0.5];
    for (got, want) in samples.iter().zip(expected) {
        assert!((got - want).abs() < 1e-9, "{:?}", samples);
    }
}

#[test]
fn phase_continues_across_blocks() {
    let mut whole = PhaseOscillator::new(440.0, 48_000.0, 0.5);
    let reference: Vec<f64> = (0..960).map(|_| whole.next_sample()).collect();

    let mut split = PhaseOscillator::new(440.0, 48_000.0, 0.5);
    let mut blocks = Vec::new();
    for _ in 0..2 {
        blocks.extend((0..480).map(|_| split.next_sample()));
    }
    assert_eq!(reference, blocks);
}

#[test]
fn retune_keeps_phase() {
    let mut osc = PhaseOscillator::new(440.0, 48_000.0, 0.5);
    for _ in 0..100 {
        osc.next_sample();
    }
    let phase = osc.phase();
    osc.set_frequency(880.0);
    osc.set_amplitude(0.25);
    assert_eq!(osc.phase(), phase);
    assert_eq!(osc.frequency_hz(), 880.0);
    osc.reset();
    assert_eq!(osc.phase(), 0.0);
}

#[test]
fn quarter_period_reaches_amplitude() {
    // sampleRate / (4f) = 12 samples for 1 kHz at 48 kHz.
    let mut osc = PhaseOscillator::new(1_000.0, 48_000.0, 0.8);
    let first = osc.next_sample();
    assert!(first.abs() < 1e-12);
    for _ in 1..12 {
        osc.next_sample();
    }
    assert!((osc.next_sample() - 0.8).abs() < 1e-9);
}
