//! Sample encoding: normalized samples → interleaved wire bytes.

#![forbid(unsafe_code)]

// IMPORTANT: encode_frames runs inside the render path. The encoding match
// happens once per call, never per sample.

use crate::format::{SampleKind, StreamFormat};
use thiserror::Error;

/// Full-scale value for 16-bit signed PCM.
pub const I16_SCALE: f64 = 32767.0;
/// Full-scale value for packed 24-bit signed PCM.
pub const I24_SCALE: f64 = 8388607.0;
/// Full-scale value for 32-bit signed PCM.
pub const I32_SCALE: f64 = 2147483647.0;

/// Wire encodings the encoder can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Float32,
    Int16,
    /// Packed little-endian, 3 bytes per sample.
    Int24,
    Int32,
}

/// The stream layout has no matching encoding.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("unsupported format: {kind:?} at {bits_per_sample} bits per sample")]
    UnsupportedFormat {
        kind: SampleKind,
        bits_per_sample: u16,
    },
}

impl Encoding {
    /// Pick the encoding for a sample kind and bit depth.
    pub fn from_layout(kind: SampleKind, bits_per_sample: u16) -> Result<Self, EncodeError> {
        match (kind, bits_per_sample) {
            (SampleKind::Float, 32) => Ok(Encoding::Float32),
            (SampleKind::SignedInt, 16) => Ok(Encoding::Int16),
            (SampleKind::SignedInt, 24) => Ok(Encoding::Int24),
            (SampleKind::SignedInt, 32) => Ok(Encoding::Int32),
            _ => Err(EncodeError::UnsupportedFormat {
                kind,
                bits_per_sample,
            }),
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            Encoding::Int16 => 2,
            Encoding::Int24 => 3,
            Encoding::Float32 | Encoding::Int32 => 4,
        }
    }

    pub fn bits_per_sample(self) -> u16 {
        self.bytes_per_sample() as u16 * 8
    }

    /// Distance between adjacent representable values, in normalized units.
    pub fn quantization_step(self) -> f64 {
        match self {
            Encoding::Float32 => f64::from(f32::EPSILON),
            Encoding::Int16 => 1.0 / I16_SCALE,
            Encoding::Int24 => 1.0 / I24_SCALE,
            Encoding::Int32 => 1.0 / I32_SCALE,
        }
    }
}

#[inline]
pub fn quantize_i16(sample: f64) -> i16 {
    (sample * I16_SCALE).round() as i16
}

#[inline]
pub fn quantize_i24(sample: f64) -> i32 {
    ((sample * I24_SCALE).round() as i32).clamp(-8_388_608, 8_388_607)
}

#[inline]
pub fn quantize_i32(sample: f64) -> i32 {
    (sample * I32_SCALE).round() as i32
}

/// Writes mono samples into interleaved frames, one copy per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleEncoder {
    encoding: Encoding,
    channels: usize,
}

impl SampleEncoder {
    pub fn new(encoding: Encoding, channels: usize) -> Self {
        Self { encoding, channels }
    }

    /// Build the encoder a negotiated stream needs.
    pub fn for_format(format: &StreamFormat) -> Result<Self, EncodeError> {
        let encoding = Encoding::from_layout(format.kind, format.bits_per_sample)?;
        Ok(Self::new(encoding, usize::from(format.channel_count)))
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Bytes in one interleaved frame.
    pub fn frame_bytes(&self) -> usize {
        self.encoding.bytes_per_sample() * self.channels
    }

    /// Fill every whole frame of `dst` with samples pulled from `next`.
    ///
    /// Returns the number of frames written. A trailing partial frame is left
    /// untouched.
    pub fn encode_frames<F: FnMut() -> f64>(&self, dst: &mut [u8], next: F) -> usize {
        match self.encoding {
            Encoding::Float32 => {
                self.fill_with::<4, _, _>(dst, next, |s| (s as f32).to_le_bytes())
            }
            Encoding::Int16 => {
                self.fill_with::<2, _, _>(dst, next, |s| quantize_i16(s).to_le_bytes())
            }
            Encoding::Int24 => self.fill_with::<3, _, _>(dst, next, |s| {
                let b = quantize_i24(s).to_le_bytes();
                [b[0], b[1], b[2]]
            }),
            Encoding::Int32 => {
                self.fill_with::<4, _, _>(dst, next, |s| quantize_i32(s).to_le_bytes())
            }
        }
    }

    /// Encode a slice of mono samples; `dst` must hold `samples.len()` frames.
    pub fn encode_slice(&self, samples: &[f64], dst: &mut [u8]) -> usize {
        let mut iter = samples.iter().copied();
        let frames = samples.len().min(dst.len() / self.frame_bytes().max(1));
        self.encode_frames(&mut dst[..frames * self.frame_bytes()], || {
            iter.next().unwrap_or(0.0)
        })
    }

    fn fill_with<const N: usize, F, E>(&self, dst: &mut [u8], mut next: F, encode: E) -> usize
    where
        F: FnMut() -> f64,
        E: Fn(f64) -> [u8; N],
    {
        let frame_bytes = N * self.channels;
        if frame_bytes == 0 {
            return 0;
        }
        let mut frames = 0;
        for frame in dst.chunks_exact_mut(frame_bytes) {
            let bytes = encode(next());
            for slot in frame.chunks_exact_mut(N) {
                slot.copy_from_slice(&bytes);
            }
            frames += 1;
        }
        frames
    }
}

/// Zero bytes are silence for every supported encoding.
#[inline]
pub fn write_silence(dst: &mut [u8]) {
    dst.fill(0);
}

/// Decode one sample from its wire bytes back to a normalized value.
///
/// `bytes` must hold at least [`Encoding::bytes_per_sample`] bytes.
#[inline]
pub fn decode_sample(encoding: Encoding, bytes: &[u8]) -> f32 {
    match encoding {
        Encoding::Float32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        Encoding::Int16 => (f64::from(i16::from_le_bytes([bytes[0], bytes[1]])) / I16_SCALE) as f32,
        Encoding::Int24 => {
            // Sign-extend from bit 23.
            let raw = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]);
            let value = (raw << 8) >> 8;
            (f64::from(value) / I24_SCALE) as f32
        }
        Encoding::Int32 => {
            let value = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            (f64::from(value) / I32_SCALE) as f32
        }
    }
}
