//! Verification harness: generate → capture → analyze → verdict.
//!
//! The harness owns the capture accumulator and the expectations a run is
//! judged against. It works against any [`AudioBackend`], or entirely in
//! process with [`VerificationHarness::run_offline`].

use crate::analyzer::{leading_silence, AmplitudeError, AnalysisResult, SignalAnalyzer};
use crate::backend::{AudioBackend, InputStream, OutputStream, StreamRequest};
use crate::capture::{capture_channel, CaptureAccumulator, CapturePort};
use crate::config::{CaptureConfig, ToneConfig};
use crate::control::CONTROL_TICK;
use crate::error::Result;
use crate::format::{negotiate, FormatDescriptor, StreamFormat};
use crate::invariant_ppt::{assert_invariant, VERDICT_REPORTED};
use crate::render::{render_offline, RenderScheduler};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Frames per block when rendering offline.
const OFFLINE_BLOCK_FRAMES: usize = 480;
/// Extra time a live capture may take beyond its nominal length.
const CAPTURE_SLACK: Duration = Duration::from_secs(5);

/// What a capture is expected to contain.
#[derive(Debug, Clone, PartialEq)]
pub struct Expectation {
    pub frequency_hz: f64,
    pub tolerance_hz: f64,
}

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureReason {
    #[error("frequency {detected_hz:.2} Hz is outside {expected_hz:.2} ± {tolerance_hz:.2} Hz")]
    FrequencyOutOfTolerance {
        expected_hz: f64,
        detected_hz: f64,
        tolerance_hz: f64,
    },
    #[error("signal is silent (RMS {rms:.4})")]
    Silent { rms: f64 },
    #[error("signal has a DC offset (mean {mean:.4})")]
    DcOffset { mean: f64 },
    #[error("capture incomplete: {captured} of {expected} frames")]
    IncompleteCapture { captured: usize, expected: usize },
}

impl From<AmplitudeError> for FailureReason {
    fn from(err: AmplitudeError) -> Self {
        match err {
            AmplitudeError::Silent { rms } => FailureReason::Silent { rms },
            AmplitudeError::DcOffset { mean } => FailureReason::DcOffset { mean },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Passed,
    Failed(FailureReason),
}

impl Verdict {
    pub fn is_passed(&self) -> bool {
        matches!(self, Verdict::Passed)
    }
}

/// The outcome of one run, with everything that was measured.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationReport {
    pub verdict: Verdict,
    pub analysis: AnalysisResult,
    pub expectation: Expectation,
    pub sample_rate_hz: u32,
    pub frames_captured: usize,
    /// Human-readable name of the captured stream's format.
    pub format: Option<&'static str>,
    /// The render side wrote silence because its format was unusable.
    pub render_degraded: bool,
    /// Channel 0 of what was captured, for artifacts.
    pub capture: Vec<f32>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.verdict.is_passed()
    }

    /// Turn a failed verdict into an error.
    pub fn into_result(self) -> Result<Self> {
        match &self.verdict {
            Verdict::Passed => Ok(self),
            Verdict::Failed(reason) => Err(crate::Error::VerificationFailure(reason.clone())),
        }
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Captured: {} frames @ {} Hz{}",
            self.frames_captured,
            self.sample_rate_hz,
            self.format.map(|n| format!(" ({})", n)).unwrap_or_default()
        )?;
        writeln!(f, "RMS: {:.4}", self.analysis.rms)?;
        writeln!(f, "Mean offset: {:.4}", self.analysis.mean_offset)?;
        writeln!(
            f,
            "Detected frequency: {:.2} Hz (expected {:.2} ± {:.2} Hz)",
            self.analysis.detected_frequency_hz,
            self.expectation.frequency_hz,
            self.expectation.tolerance_hz
        )?;
        if self.render_degraded {
            writeln!(f, "Note: render side was degraded to silence")?;
        }
        match &self.verdict {
            Verdict::Passed => write!(f, "PASS"),
            Verdict::Failed(reason) => write!(f, "FAIL: {}", reason),
        }
    }
}

/// Drives runs and judges their captures.
#[derive(Debug, Clone)]
pub struct VerificationHarness {
    config: CaptureConfig,
    analyzer: SignalAnalyzer,
}

impl VerificationHarness {
    pub fn new(config: CaptureConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            analyzer: SignalAnalyzer::new(config.thresholds),
            config,
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn expectation(&self) -> Expectation {
        Expectation {
            frequency_hz: self.config.expected_frequency_hz,
            tolerance_hz: self.config.tolerance_hz,
        }
    }

    /// Analyze a finished capture and derive its verdict.
    ///
    /// Silence ahead of the first audible sample is output latency, not
    /// signal, and is left out of the analysis. Amplitude is judged before
    /// frequency; the first failure wins.
    pub fn evaluate(&self, samples: &[f32], sample_rate_hz: u32) -> VerificationReport {
        let lead = leading_silence(samples, self.analyzer.thresholds().silence_rms);
        if lead > 0 && lead < samples.len() {
            debug!(
                "Skipping {} leading silent samples ({:.1} ms)",
                lead,
                lead as f64 * 1000.0 / f64::from(sample_rate_hz.max(1))
            );
        }
        let analysis = self.analyzer.analyze(&samples[lead..], sample_rate_hz);
        let expectation = self.expectation();
        let verdict = match self.analyzer.judge_amplitude(&analysis) {
            Err(err) => Verdict::Failed(err.into()),
            Ok(()) => {
                let error = (analysis.detected_frequency_hz - expectation.frequency_hz).abs();
                if error <= expectation.tolerance_hz {
                    Verdict::Passed
                } else {
                    Verdict::Failed(FailureReason::FrequencyOutOfTolerance {
                        expected_hz: expectation.frequency_hz,
                        detected_hz: analysis.detected_frequency_hz,
                        tolerance_hz: expectation.tolerance_hz,
                    })
                }
            }
        };
        self.report(verdict, analysis, sample_rate_hz, samples.len())
    }

    /// Like [`evaluate`](Self::evaluate), but a capture short of its target
    /// fails as incomplete regardless of its content.
    pub fn evaluate_capture(
        &self,
        capture: &CaptureAccumulator,
        sample_rate_hz: u32,
    ) -> VerificationReport {
        if !capture.is_frozen() {
            let analysis = self.analyzer.analyze(capture.samples(), sample_rate_hz);
            let verdict = Verdict::Failed(FailureReason::IncompleteCapture {
                captured: capture.len(),
                expected: capture.target(),
            });
            let mut report = self.report(verdict, analysis, sample_rate_hz, capture.len());
            report.capture = capture.samples().to_vec();
            return report;
        }
        let mut report = self.evaluate(capture.samples(), sample_rate_hz);
        report.capture = capture.samples().to_vec();
        report
    }

    fn report(
        &self,
        verdict: Verdict,
        analysis: AnalysisResult,
        sample_rate_hz: u32,
        frames_captured: usize,
    ) -> VerificationReport {
        assert_invariant(
            VERDICT_REPORTED,
            analysis.detected_frequency_hz.is_finite(),
            "Verdict derived from finite measurements",
            Some("VerificationHarness::report"),
        );
        match &verdict {
            Verdict::Passed => info!(
                "PASS: {:.2} Hz, rms {:.4}",
                analysis.detected_frequency_hz, analysis.rms
            ),
            Verdict::Failed(reason) => warn!("FAIL: {}", reason),
        }
        VerificationReport {
            verdict,
            analysis,
            expectation: self.expectation(),
            sample_rate_hz,
            frames_captured,
            format: None,
            render_degraded: false,
            capture: Vec::new(),
        }
    }

    /// Render the tone in process, decode it back and judge it.
    ///
    /// No backend is involved; `descriptor` stands in for what a host would
    /// report.
    pub fn run_offline(
        &self,
        tone: &ToneConfig,
        descriptor: &FormatDescriptor,
    ) -> Result<VerificationReport> {
        tone.validate_finite()?;
        let format = negotiate(descriptor)?;
        let mut scheduler = RenderScheduler::new(tone, &format)?;
        let target = self.config.target_frames(format.sample_rate_hz);
        let (mut tap, collector) = capture_channel(target, &format)?;

        let frame_bytes = scheduler.frame_bytes();
        let bytes = render_offline(&mut scheduler, frame_bytes, target, OFFLINE_BLOCK_FRAMES);
        for block in bytes.chunks(OFFLINE_BLOCK_FRAMES * frame_bytes) {
            tap.deliver(block.len() / frame_bytes, block);
        }
        debug!("Offline run rendered {} frames", scheduler.frames_produced());

        let capture = collector.finish();
        let mut report = self.evaluate_capture(&capture, format.sample_rate_hz);
        report.format = Some(format.describe());
        Ok(report)
    }

    /// Play `tone` on `backend` and judge what comes back on its input.
    ///
    /// The output starts first so the capture opens on a live signal. The
    /// render is stopped once the capture is complete, so `tone` may be
    /// infinite.
    pub fn run_loopback<B: AudioBackend>(
        &self,
        backend: &B,
        tone: &ToneConfig,
    ) -> Result<VerificationReport> {
        tone.validate()?;
        let (mut input, format, collector_parts) = self.open_capture(backend)?;
        let (tap, collector) = collector_parts;

        let output_request = StreamRequest {
            device: tone.device.clone(),
            sample_rate_hz: tone.sample_rate_hz,
            channel_count: tone.channel_count,
        };
        let (mut output, out_descriptor) = backend.open_output_stream(&output_request)?;
        let mut scheduler = RenderScheduler::from_descriptor(tone, &out_descriptor);
        let mut control = scheduler.control();
        let degraded = scheduler.is_degraded();

        info!(
            "Loopback run on {}: {:.2} Hz for {} s",
            backend.name(),
            tone.frequency_hz,
            self.config.duration_secs
        );
        output.start(Box::new(scheduler))?;
        input.start(Box::new(tap))?;

        let capture = collector.collect(self.capture_timeout(), CONTROL_TICK);

        control.request_stop();
        control.wait_until_stopped(Some(Duration::from_secs(1)), &|| false);
        output.stop()?;
        input.stop()?;

        let mut report = self.evaluate_capture(&capture, format.sample_rate_hz);
        report.format = Some(format.describe());
        report.render_degraded = degraded;
        Ok(report)
    }

    /// Capture from `backend` and judge it, for an externally generated tone.
    pub fn capture<B: AudioBackend>(&self, backend: &B) -> Result<VerificationReport> {
        let (mut input, format, (tap, collector)) = self.open_capture(backend)?;
        info!(
            "Capturing {} s from {} expecting {:.2} Hz",
            self.config.duration_secs,
            backend.name(),
            self.config.expected_frequency_hz
        );
        input.start(Box::new(tap))?;
        let capture = collector.collect(self.capture_timeout(), CONTROL_TICK);
        input.stop()?;

        let mut report = self.evaluate_capture(&capture, format.sample_rate_hz);
        report.format = Some(format.describe());
        Ok(report)
    }

    #[allow(clippy::type_complexity)]
    fn open_capture<B: AudioBackend>(
        &self,
        backend: &B,
    ) -> Result<(
        B::Input,
        StreamFormat,
        (crate::capture::CaptureTap, crate::capture::CaptureCollector),
    )> {
        let request = StreamRequest {
            device: self.config.device.clone(),
            sample_rate_hz: self.config.sample_rate_hz,
            channel_count: self.config.channel_count,
        };
        let (input, descriptor) = backend.open_input_stream(&request)?;
        let format = negotiate(&descriptor)?;
        info!(
            "Capture format: {} {}-bit, {} ch @ {} Hz",
            format.describe(),
            format.bits_per_sample,
            format.channel_count,
            format.sample_rate_hz
        );
        let parts = capture_channel(self.config.target_frames(format.sample_rate_hz), &format)?;
        Ok((input, format, parts))
    }

    fn capture_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.config.duration_secs)) + CAPTURE_SLACK
    }
}
