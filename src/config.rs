//! Tone and capture configuration.
//!
//! Everything here is validated on the control path before any stream opens.
//! The render path trusts these values and never clamps at runtime.

use crate::analyzer::AmplitudeThresholds;
use crate::backend::DeviceSelector;
use crate::invariant_ppt::{assert_invariant, CONFIG_VALIDATED};
use thiserror::Error;

/// Default tone frequency in Hz.
pub const DEFAULT_FREQUENCY_HZ: f64 = 440.0;
/// Default peak amplitude (normalized).
pub const DEFAULT_AMPLITUDE: f64 = 0.5;
/// Default stream sample rate.
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 48_000;
/// Default channel count.
pub const DEFAULT_CHANNELS: u16 = 2;
/// Default playback length in seconds.
pub const DEFAULT_PLAY_SECS: u32 = 5;
/// Default capture length in seconds.
pub const DEFAULT_CAPTURE_SECS: u32 = 2;
/// Default allowed frequency error in Hz.
pub const DEFAULT_TOLERANCE_HZ: f64 = 5.0;

/// Highest tone frequency accepted.
pub const MAX_FREQUENCY_HZ: f64 = 20_000.0;
/// Longest finite duration accepted, in seconds.
pub const MAX_DURATION_SECS: u32 = 60;
/// Sample rate range accepted.
pub const MIN_SAMPLE_RATE_HZ: u32 = 8_000;
pub const MAX_SAMPLE_RATE_HZ: u32 = 192_000;
/// Channel count range accepted.
pub const MIN_CHANNELS: u16 = 1;
pub const MAX_CHANNELS: u16 = 32;

/// How long a tone plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayDuration {
    Seconds(u32),
    /// Runs until a stop is requested.
    Infinite,
}

impl PlayDuration {
    /// Parse the CLI form where `0` means infinite.
    pub fn from_secs(secs: u32) -> Self {
        if secs == 0 {
            PlayDuration::Infinite
        } else {
            PlayDuration::Seconds(secs)
        }
    }

    /// Frame target at `sample_rate_hz`; `None` for an infinite run.
    pub fn target_frames(self, sample_rate_hz: u32) -> Option<u64> {
        match self {
            PlayDuration::Seconds(s) => Some(u64::from(s) * u64::from(sample_rate_hz)),
            PlayDuration::Infinite => None,
        }
    }
}

/// Rejected settings. Raised before any stream is opened.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("frequency must be in (0, {max}] Hz, got {value}")]
    Frequency { value: f64, max: f64 },
    #[error("frequency {frequency_hz} Hz is at or above Nyquist for {sample_rate_hz} Hz")]
    AboveNyquist {
        frequency_hz: f64,
        sample_rate_hz: u32,
    },
    #[error("amplitude must be in [0, 1], got {0}")]
    Amplitude(f64),
    #[error("sample rate must be in [8000, 192000] Hz, got {0}")]
    SampleRate(u32),
    #[error("channel count must be in [1, 32], got {0}")]
    Channels(u16),
    #[error("duration must be in (0, 60] s, got {0}")]
    Duration(u32),
    #[error("this mode cannot run for an infinite duration")]
    InfiniteNotSupported,
    #[error("tolerance must be a positive number of Hz, got {0}")]
    Tolerance(f64),
}

/// Settings for one generated tone.
#[derive(Debug, Clone, PartialEq)]
pub struct ToneConfig {
    pub frequency_hz: f64,
    pub amplitude: f64,
    /// Requested rate. The negotiated stream rate wins if the host differs.
    pub sample_rate_hz: u32,
    pub channel_count: u16,
    pub duration: PlayDuration,
    pub device: DeviceSelector,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            amplitude: DEFAULT_AMPLITUDE,
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            channel_count: DEFAULT_CHANNELS,
            duration: PlayDuration::Seconds(DEFAULT_PLAY_SECS),
            device: DeviceSelector::Default,
        }
    }
}

impl ToneConfig {
    /// Range-check every field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_frequency(self.frequency_hz)?;
        if !(0.0..=1.0).contains(&self.amplitude) {
            return Err(ConfigError::Amplitude(self.amplitude));
        }
        validate_sample_rate(self.sample_rate_hz)?;
        validate_nyquist(self.frequency_hz, self.sample_rate_hz)?;
        if !(MIN_CHANNELS..=MAX_CHANNELS).contains(&self.channel_count) {
            return Err(ConfigError::Channels(self.channel_count));
        }
        if let PlayDuration::Seconds(s) = self.duration {
            validate_duration(s)?;
        }
        assert_invariant(
            CONFIG_VALIDATED,
            self.amplitude.is_finite() && self.frequency_hz.is_finite(),
            "Validated tone settings are finite",
            Some("ToneConfig::validate"),
        );
        Ok(())
    }

    /// Like [`validate`](Self::validate), but also rejects an infinite run.
    pub fn validate_finite(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.duration == PlayDuration::Infinite {
            return Err(ConfigError::InfiniteNotSupported);
        }
        Ok(())
    }
}

/// Settings for capturing and judging a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    pub expected_frequency_hz: f64,
    pub tolerance_hz: f64,
    pub duration_secs: u32,
    pub sample_rate_hz: u32,
    pub channel_count: u16,
    pub thresholds: AmplitudeThresholds,
    pub device: DeviceSelector,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            expected_frequency_hz: DEFAULT_FREQUENCY_HZ,
            tolerance_hz: DEFAULT_TOLERANCE_HZ,
            duration_secs: DEFAULT_CAPTURE_SECS,
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            channel_count: DEFAULT_CHANNELS,
            thresholds: AmplitudeThresholds::default(),
            device: DeviceSelector::Default,
        }
    }
}

impl CaptureConfig {
    /// Capture settings that judge the given tone.
    pub fn for_tone(tone: &ToneConfig, duration_secs: u32) -> Self {
        Self {
            expected_frequency_hz: tone.frequency_hz,
            duration_secs,
            sample_rate_hz: tone.sample_rate_hz,
            channel_count: tone.channel_count,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_frequency(self.expected_frequency_hz)?;
        if !(self.tolerance_hz.is_finite() && self.tolerance_hz > 0.0) {
            return Err(ConfigError::Tolerance(self.tolerance_hz));
        }
        validate_duration(self.duration_secs)?;
        validate_sample_rate(self.sample_rate_hz)?;
        if !(MIN_CHANNELS..=MAX_CHANNELS).contains(&self.channel_count) {
            return Err(ConfigError::Channels(self.channel_count));
        }
        assert_invariant(
            CONFIG_VALIDATED,
            self.duration_secs > 0,
            "Validated capture has a finite, non-zero length",
            Some("CaptureConfig::validate"),
        );
        Ok(())
    }

    /// Frames to capture at the negotiated rate.
    pub fn target_frames(&self, sample_rate_hz: u32) -> usize {
        self.duration_secs as usize * sample_rate_hz as usize
    }
}

fn validate_frequency(frequency_hz: f64) -> Result<(), ConfigError> {
    if frequency_hz.is_finite() && frequency_hz > 0.0 && frequency_hz <= MAX_FREQUENCY_HZ {
        Ok(())
    } else {
        Err(ConfigError::Frequency {
            value: frequency_hz,
            max: MAX_FREQUENCY_HZ,
        })
    }
}

fn validate_nyquist(frequency_hz: f64, sample_rate_hz: u32) -> Result<(), ConfigError> {
    if frequency_hz * 2.0 >= f64::from(sample_rate_hz) {
        return Err(ConfigError::AboveNyquist {
            frequency_hz,
            sample_rate_hz,
        });
    }
    Ok(())
}

fn validate_sample_rate(sample_rate_hz: u32) -> Result<(), ConfigError> {
    if (MIN_SAMPLE_RATE_HZ..=MAX_SAMPLE_RATE_HZ).contains(&sample_rate_hz) {
        Ok(())
    } else {
        Err(ConfigError::SampleRate(sample_rate_hz))
    }
}

fn validate_duration(secs: u32) -> Result<(), ConfigError> {
    if secs == 0 || secs > MAX_DURATION_SECS {
        return Err(ConfigError::Duration(secs));
    }
    Ok(())
}
