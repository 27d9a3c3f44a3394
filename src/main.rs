//! sinecard - sine tone generator and loopback verifier
//!
//! # Commands
//!
//! - `sinecard play` - Play a tone on an output device
//! - `sinecard verify` - Play a tone and verify it on the paired input
//! - `sinecard selftest` - Render and verify in process for every encoding
//! - `sinecard wav` - Write a tone to a WAV file
//! - `sinecard analyze` - Verify the tone in an existing WAV file
//! - `sinecard devices` - List devices
//!
//! # Usage
//!
//! ```bash
//! sinecard play -f 1000 -t 10
//! sinecard --backend cpal verify -d "CABLE Input" --input "CABLE Output"
//! RUST_LOG=debug sinecard selftest
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};

use sinecard::backend::{AudioBackend, DeviceDirection, OutputStream, StreamRequest};
use sinecard::config::{
    CaptureConfig, PlayDuration, ToneConfig, DEFAULT_AMPLITUDE, DEFAULT_CAPTURE_SECS,
    DEFAULT_CHANNELS, DEFAULT_FREQUENCY_HZ, DEFAULT_PLAY_SECS, DEFAULT_SAMPLE_RATE_HZ,
    DEFAULT_TOLERANCE_HZ,
};
use sinecard::format::{negotiate, FormatDescriptor, SubFormatTag};
use sinecard::loopback::LoopbackBackend;
use sinecard::render::RenderScheduler;
use sinecard::{wav, DeviceSelector, VerificationHarness, VerificationReport};

/// Set by Ctrl-C; playback drains and stops at the next callback.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// sinecard - sine tone generator and loopback verifier
#[derive(Parser)]
#[command(name = "sinecard")]
#[command(about = "Generate a sine tone and verify it through a loopback path")]
#[command(version)]
struct Cli {
    /// Audio backend to use
    #[arg(long, short = 'b', value_enum, default_value = "loopback", global = true)]
    backend: BackendKind,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// In-memory virtual cable
    Loopback,
    /// System audio devices (needs the `cpal` feature)
    Cpal,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a tone on an output device
    Play(ToneArgs),

    /// Play a tone and verify it on the paired input
    Verify(VerifyArgs),

    /// Render and verify in process for every supported encoding
    Selftest(ToneArgs),

    /// Write a tone to a WAV file
    Wav(WavArgs),

    /// Verify the tone in an existing WAV file
    Analyze(AnalyzeArgs),

    /// List devices
    Devices,
}

#[derive(Args, Clone)]
struct ToneArgs {
    /// Tone frequency in Hz (0, 20000]
    #[arg(long, short = 'f', default_value_t = DEFAULT_FREQUENCY_HZ)]
    frequency: f64,

    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(long, short = 't', default_value_t = DEFAULT_PLAY_SECS)]
    duration: u32,

    /// Output device name (substring match)
    #[arg(long, short = 'd')]
    device: Option<String>,

    /// Sample rate in Hz [8000, 192000]
    #[arg(long, short = 'r', default_value_t = DEFAULT_SAMPLE_RATE_HZ)]
    rate: u32,

    /// Channel count [1, 32]
    #[arg(long, short = 'c', default_value_t = DEFAULT_CHANNELS)]
    channels: u16,

    /// Peak amplitude [0, 1]
    #[arg(long, short = 'a', default_value_t = DEFAULT_AMPLITUDE)]
    amplitude: f64,
}

impl ToneArgs {
    fn to_config(&self) -> ToneConfig {
        ToneConfig {
            frequency_hz: self.frequency,
            amplitude: self.amplitude,
            sample_rate_hz: self.rate,
            channel_count: self.channels,
            duration: PlayDuration::from_secs(self.duration),
            device: DeviceSelector::from_name(self.device.as_deref()),
        }
    }
}

#[derive(Args)]
struct VerifyArgs {
    #[command(flatten)]
    tone: ToneArgs,

    /// Seconds to capture
    #[arg(long, default_value_t = DEFAULT_CAPTURE_SECS)]
    capture: u32,

    /// Allowed frequency error in Hz
    #[arg(long, default_value_t = DEFAULT_TOLERANCE_HZ)]
    tolerance: f64,

    /// Input device name (substring match)
    #[arg(long)]
    input: Option<String>,

    /// Only capture; the tone comes from somewhere else
    #[arg(long)]
    capture_only: bool,

    /// Save the capture as a float WAV
    #[arg(long, value_name = "FILE")]
    save: Option<PathBuf>,
}

#[derive(Args)]
struct WavArgs {
    /// Output file
    path: PathBuf,

    #[command(flatten)]
    tone: ToneArgs,

    /// Bits per sample: 16, 24 or 32
    #[arg(long, default_value_t = 16)]
    bits: u16,

    /// Write 32-bit float instead of integer PCM
    #[arg(long)]
    float: bool,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// WAV file to analyze
    path: PathBuf,

    /// Expected frequency in Hz
    #[arg(long, short = 'f', default_value_t = DEFAULT_FREQUENCY_HZ)]
    frequency: f64,

    /// Allowed frequency error in Hz
    #[arg(long, default_value_t = DEFAULT_TOLERANCE_HZ)]
    tolerance: f64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        warn!("Ctrl-C handler not installed, stop with a signal instead: {}", e);
    }

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command succeeded.
fn run(cli: Cli) -> Result<bool> {
    match &cli.command {
        Commands::Selftest(args) => return selftest(args),
        Commands::Wav(args) => return write_wav(args),
        Commands::Analyze(args) => return analyze(args),
        _ => {}
    }

    match cli.backend {
        BackendKind::Loopback => {
            let (rate, channels) = match &cli.command {
                Commands::Play(t) => (t.rate, t.channels),
                Commands::Verify(v) => (v.tone.rate, v.tone.channels),
                _ => (DEFAULT_SAMPLE_RATE_HZ, DEFAULT_CHANNELS),
            };
            with_backend(&LoopbackBackend::virtual_cable(rate, channels), cli.command)
        }
        BackendKind::Cpal => run_cpal(cli.command),
    }
}

#[cfg(feature = "cpal")]
fn run_cpal(command: Commands) -> Result<bool> {
    with_backend(&sinecard::cpal_backend::CpalBackend::new(), command)
}

#[cfg(not(feature = "cpal"))]
fn run_cpal(_command: Commands) -> Result<bool> {
    Err(sinecard::BackendError::Unavailable("built without the `cpal` feature".into()).into())
}

fn with_backend<B: AudioBackend>(backend: &B, command: Commands) -> Result<bool> {
    match command {
        Commands::Play(args) => play(backend, &args.to_config()),
        Commands::Verify(args) => verify(backend, &args),
        Commands::Devices => list_devices(backend),
        Commands::Selftest(_) | Commands::Wav(_) | Commands::Analyze(_) => Ok(false),
    }
}

fn play<B: AudioBackend>(backend: &B, tone: &ToneConfig) -> Result<bool> {
    tone.validate()?;
    let request = StreamRequest {
        device: tone.device.clone(),
        sample_rate_hz: tone.sample_rate_hz,
        channel_count: tone.channel_count,
    };
    let (mut output, descriptor) = backend.open_output_stream(&request)?;
    match negotiate(&descriptor) {
        Ok(format) => info!(
            "Output format: {} {}-bit, {} ch @ {} Hz",
            format.describe(),
            format.bits_per_sample,
            format.channel_count,
            format.sample_rate_hz
        ),
        Err(e) => warn!("Output format unusable: {}", e),
    }

    let mut scheduler = RenderScheduler::from_descriptor(tone, &descriptor);
    let mut control = scheduler.control();
    let timeout = match tone.duration {
        PlayDuration::Seconds(s) => Some(std::time::Duration::from_secs(u64::from(s) + 5)),
        PlayDuration::Infinite => None,
    };
    info!(
        "Playing {:.2} Hz at amplitude {:.2} on {} ({})",
        tone.frequency_hz,
        tone.amplitude,
        backend.name(),
        tone.device
    );
    output.start(Box::new(scheduler))?;
    let state = control.wait_until_stopped(timeout, &|| INTERRUPTED.load(Ordering::SeqCst));
    output.stop()?;

    if control.is_degraded() {
        error!("Played silence: the device format could not be encoded");
        return Ok(false);
    }
    Ok(state.is_finished())
}

/// Tone and capture settings for `verify`.
///
/// The tone is infinite: the harness stops it once the capture is complete,
/// so any capture length the limits allow can be verified.
fn verify_settings(args: &VerifyArgs) -> (ToneConfig, CaptureConfig) {
    let tone = ToneConfig {
        duration: PlayDuration::Infinite,
        ..args.tone.to_config()
    };
    let config = CaptureConfig {
        expected_frequency_hz: tone.frequency_hz,
        tolerance_hz: args.tolerance,
        duration_secs: args.capture,
        sample_rate_hz: tone.sample_rate_hz,
        channel_count: tone.channel_count,
        device: DeviceSelector::from_name(args.input.as_deref()),
        ..Default::default()
    };
    (tone, config)
}

fn verify<B: AudioBackend>(backend: &B, args: &VerifyArgs) -> Result<bool> {
    let (tone, config) = verify_settings(args);
    let harness = VerificationHarness::new(config)?;
    let report = if args.capture_only {
        harness.capture(backend)?
    } else {
        harness.run_loopback(backend, &tone)?
    };
    if let Some(path) = &args.save {
        wav::write_capture(path, &report.capture, report.sample_rate_hz)
            .with_context(|| format!("saving capture to {}", path.display()))?;
    }
    print_report(&report);
    Ok(report.passed())
}

fn selftest(args: &ToneArgs) -> Result<bool> {
    let mut tone = args.to_config();
    let secs = match tone.duration {
        PlayDuration::Seconds(s) => s.min(DEFAULT_CAPTURE_SECS),
        PlayDuration::Infinite => {
            tone.duration = PlayDuration::Seconds(DEFAULT_CAPTURE_SECS);
            DEFAULT_CAPTURE_SECS
        }
    };
    let harness = VerificationHarness::new(CaptureConfig::for_tone(&tone, secs))?;
    let (rate, ch) = (tone.sample_rate_hz, tone.channel_count);
    let layouts = [
        ("float32", FormatDescriptor::ieee_float(rate, ch)),
        ("int16", FormatDescriptor::pcm(rate, ch, 16)),
        ("int24", FormatDescriptor::pcm(rate, ch, 24)),
        ("int32", FormatDescriptor::pcm(rate, ch, 32)),
        (
            "extensible int16",
            FormatDescriptor::extensible(rate, ch, 16, SubFormatTag::PCM),
        ),
        (
            "extensible float32",
            FormatDescriptor::extensible(rate, ch, 32, SubFormatTag::IEEE_FLOAT),
        ),
    ];

    let mut all_passed = true;
    for (name, descriptor) in layouts {
        let report = harness.run_offline(&tone, &descriptor)?;
        println!("== {} ==", name);
        print_report(&report);
        all_passed &= report.passed();
    }
    Ok(all_passed)
}

fn write_wav(args: &WavArgs) -> Result<bool> {
    let tone = args.tone.to_config();
    let (rate, ch) = (tone.sample_rate_hz, tone.channel_count);
    let descriptor = if args.float {
        FormatDescriptor::ieee_float(rate, ch)
    } else {
        FormatDescriptor::pcm(rate, ch, args.bits)
    };
    let frames = wav::write_tone(&args.path, &tone, &descriptor)
        .with_context(|| format!("writing {}", args.path.display()))?;
    println!("Wrote {} frames to {}", frames, args.path.display());
    Ok(true)
}

fn analyze(args: &AnalyzeArgs) -> Result<bool> {
    let (samples, rate) = wav::read_wav(&args.path)
        .with_context(|| format!("reading {}", args.path.display()))?;
    let harness = VerificationHarness::new(CaptureConfig {
        expected_frequency_hz: args.frequency,
        tolerance_hz: args.tolerance,
        ..Default::default()
    })?;
    let report = harness.evaluate(&samples, rate);
    print_report(&report);
    Ok(report.passed())
}

fn list_devices<B: AudioBackend>(backend: &B) -> Result<bool> {
    let devices = backend.devices()?;
    if devices.is_empty() {
        println!("No devices found on {}", backend.name());
        return Ok(true);
    }
    for d in devices {
        let kind = match d.direction {
            DeviceDirection::Output => "output",
            DeviceDirection::Input => "input",
        };
        let format = d
            .default_format
            .as_ref()
            .and_then(|f| negotiate(f).ok())
            .map(|f| {
                format!(
                    "{} {}-bit x{} @ {} Hz",
                    f.describe(),
                    f.bits_per_sample,
                    f.channel_count,
                    f.sample_rate_hz
                )
            })
            .unwrap_or_else(|| "unknown format".to_string());
        println!(
            "{} {:<6} {} ({})",
            if d.is_default { "*" } else { " " },
            kind,
            d.name,
            format
        );
    }
    Ok(true)
}

fn print_report(report: &VerificationReport) {
    println!("{}", report);
}

#[cfg(test)]
mod tests {
    use super::*;
    use sinecard::config::MAX_DURATION_SECS;

    fn verify_args(capture: u32) -> VerifyArgs {
        VerifyArgs {
            tone: ToneArgs {
                frequency: DEFAULT_FREQUENCY_HZ,
                duration: DEFAULT_PLAY_SECS,
                device: None,
                rate: DEFAULT_SAMPLE_RATE_HZ,
                channels: DEFAULT_CHANNELS,
                amplitude: DEFAULT_AMPLITUDE,
            },
            capture,
            tolerance: DEFAULT_TOLERANCE_HZ,
            input: None,
            capture_only: false,
            save: None,
        }
    }

    #[test]
    fn longest_capture_is_accepted() {
        let (tone, config) = verify_settings(&verify_args(MAX_DURATION_SECS));
        tone.validate().unwrap();
        assert_eq!(tone.duration, PlayDuration::Infinite);
        assert_eq!(config.duration_secs, MAX_DURATION_SECS);
        VerificationHarness::new(config).unwrap();
    }

    #[test]
    fn capture_beyond_the_limit_is_rejected() {
        let (_, config) = verify_settings(&verify_args(MAX_DURATION_SECS + 1));
        assert!(VerificationHarness::new(config).is_err());
    }

    #[test]
    fn verify_passes_on_the_loopback_cable() {
        let backend = LoopbackBackend::virtual_cable(DEFAULT_SAMPLE_RATE_HZ, DEFAULT_CHANNELS);
        assert!(verify(&backend, &verify_args(1)).unwrap());
    }
}
