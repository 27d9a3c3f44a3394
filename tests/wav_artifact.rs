use sinecard::config::{CaptureConfig, PlayDuration, ToneConfig};
use sinecard::format::FormatDescriptor;
use sinecard::{wav, Error, VerificationHarness};

fn tone(freq: f64) -> ToneConfig {
    ToneConfig {
        frequency_hz: freq,
        sample_rate_hz: 44_100,
        channel_count: 1,
        duration: PlayDuration::Seconds(1),
        ..Default::default()
    }
}

#[test]
fn written_tones_verify_after_reading_back() {
    let dir = tempfile::tempdir().unwrap();
    let tone = tone(1_000.0);
    let harness = VerificationHarness::new(CaptureConfig {
        expected_frequency_hz: 1_000.0,
        ..Default::default()
    })
    .unwrap();

    for (name, descriptor) in [
        ("f32.wav", FormatDescriptor::ieee_float(44_100, 1)),
        ("i16.wav", FormatDescriptor::pcm(44_100, 1, 16)),
        ("i24.wav", FormatDescriptor::pcm(44_100, 1, 24)),
        ("i32.wav", FormatDescriptor::pcm(44_100, 1, 32)),
    ] {
        let path = dir.path().join(name);
        assert_eq!(wav::write_tone(&path, &tone, &descriptor).unwrap(), 44_100);
        let (samples, rate) = wav::read_wav(&path).unwrap();
        assert_eq!(rate, 44_100);
        let report = harness.evaluate(&samples, rate);
        assert!(report.passed(), "{}: {}", name, report);
    }
}

#[test]
fn infinite_tones_cannot_be_written() {
    let dir = tempfile::tempdir().unwrap();
    let infinite = ToneConfig {
        duration: PlayDuration::Infinite,
        ..tone(440.0)
    };
    let err = wav::write_tone(
        &dir.path().join("never.wav"),
        &infinite,
        &FormatDescriptor::pcm(44_100, 1, 16),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[test]
fn missing_file_is_an_artifact_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = wav::read_wav(&dir.path().join("absent.wav")).unwrap_err();
    assert!(matches!(err, Error::Artifact(_)));
}

#[test]
fn saved_capture_reanalyzes_the_same() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.wav");
    let tone = tone(440.0);
    let harness = VerificationHarness::new(CaptureConfig::for_tone(&tone, 1)).unwrap();
    let report = harness
        .run_offline(&tone, &FormatDescriptor::pcm(44_100, 1, 16))
        .unwrap();
    wav::write_capture(&path, &report.capture, report.sample_rate_hz).unwrap();

    let (samples, rate) = wav::read_wav(&path).unwrap();
    assert_eq!(samples, report.capture);
    let again = harness.evaluate(&samples, rate);
    assert_eq!(again.analysis, report.analysis);
}
