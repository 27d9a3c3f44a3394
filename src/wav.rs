//! WAV artifacts: rendered tones, captures, and analysis input.

use crate::config::ToneConfig;
use crate::encode::{Encoding, I16_SCALE, I24_SCALE, I32_SCALE};
use crate::error::Result;
use crate::format::{negotiate, FormatDescriptor, SampleKind};
use crate::invariant_ppt::{assert_invariant, ARTIFACT_CONSISTENT};
use crate::render::{render_offline, RenderScheduler};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;
use tracing::info;

const BLOCK_FRAMES: usize = 1024;

/// Render `tone` in the layout `descriptor` negotiates to and store it.
///
/// The file holds exactly the bytes the render path produced, so it doubles
/// as a check of the encoder. Returns the number of frames written.
pub fn write_tone(path: &Path, tone: &ToneConfig, descriptor: &FormatDescriptor) -> Result<u64> {
    tone.validate_finite()?;
    let format = negotiate(descriptor)?;
    let mut scheduler = RenderScheduler::new(tone, &format)?;
    let frames = scheduler.target_frames().unwrap_or(0) as usize;
    let frame_bytes = scheduler.frame_bytes();
    let bytes = render_offline(&mut scheduler, frame_bytes, frames, BLOCK_FRAMES);

    let encoding = Encoding::from_layout(format.kind, format.bits_per_sample)?;
    let spec = WavSpec {
        channels: format.channel_count,
        sample_rate: format.sample_rate_hz,
        bits_per_sample: format.bits_per_sample,
        sample_format: match format.kind {
            SampleKind::Float => SampleFormat::Float,
            SampleKind::SignedInt => SampleFormat::Int,
        },
    };
    let mut writer = WavWriter::create(path, spec)?;
    for raw in bytes.chunks_exact(encoding.bytes_per_sample()) {
        match encoding {
            Encoding::Float32 => {
                writer.write_sample(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))?
            }
            Encoding::Int16 => writer.write_sample(i16::from_le_bytes([raw[0], raw[1]]))?,
            Encoding::Int24 => {
                let value = i32::from_le_bytes([raw[0], raw[1], raw[2], 0]);
                writer.write_sample((value << 8) >> 8)?
            }
            Encoding::Int32 => {
                writer.write_sample(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))?
            }
        }
    }
    let written = writer.len() as u64 / u64::from(format.channel_count);
    writer.finalize()?;

    assert_invariant(
        ARTIFACT_CONSISTENT,
        written == frames as u64,
        "WAV holds every rendered frame",
        Some("write_tone"),
    );
    info!(
        "Wrote {} frames of {} {}-bit x{} to {}",
        written,
        format.describe(),
        format.bits_per_sample,
        format.channel_count,
        path.display()
    );
    Ok(written)
}

/// Store a capture as 32-bit float mono.
pub fn write_capture(path: &Path, samples: &[f32], sample_rate_hz: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: sample_rate_hz,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    info!("Wrote {} captured samples to {}", samples.len(), path.display());
    Ok(())
}

/// Load channel 0 of a WAV file, normalized to `[-1, 1]`.
///
/// Returns the samples and the file's sample rate.
pub fn read_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));
    let samples = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .step_by(channels)
            .collect::<std::result::Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let scale = match spec.bits_per_sample {
                16 => I16_SCALE,
                24 => I24_SCALE,
                32 => I32_SCALE,
                bits => f64::from((1u32 << (bits.clamp(1, 31) - 1)) - 1).max(1.0),
            };
            reader
                .samples::<i32>()
                .step_by(channels)
                .map(|s| s.map(|v| (f64::from(v) / scale) as f32))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };
    Ok((samples, spec.sample_rate))
}
