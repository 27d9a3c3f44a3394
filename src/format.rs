//! Format negotiation: host descriptor → stream format.
//!
//! Hosts describe a stream either with a direct encoding tag or with the
//! extended sentinel tag, in which case the real encoding lives in a 16-byte
//! sub-format GUID. Several consumer loopback devices report the extended
//! form even for plain 16-bit PCM, so the sub-format is always consulted and
//! always wins over any guess from the bit width.

#![forbid(unsafe_code)]

use crate::invariant_ppt::{assert_invariant, FORMAT_NEGOTIATED};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Direct tag: integer PCM.
pub const WAVE_FORMAT_PCM: u16 = 0x0001;
/// Direct tag: IEEE 754 float.
pub const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
/// Sentinel tag: the encoding is carried in [`FormatDescriptor::sub_format`].
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// A 16-byte sub-format identifier, stored in its little-endian wire layout.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubFormatTag(pub [u8; 16]);

impl SubFormatTag {
    /// `KSDATAFORMAT_SUBTYPE_PCM`.
    pub const PCM: SubFormatTag = SubFormatTag::from_fields(
        0x0000_0001,
        0x0000,
        0x0010,
        [0x80, 0x00, 0x00, 0xaa, 0x00, 0x38, 0x9b, 0x71],
    );

    /// `KSDATAFORMAT_SUBTYPE_IEEE_FLOAT`.
    pub const IEEE_FLOAT: SubFormatTag = SubFormatTag::from_fields(
        0x0000_0003,
        0x0000,
        0x0010,
        [0x80, 0x00, 0x00, 0xaa, 0x00, 0x38, 0x9b, 0x71],
    );

    /// Build a tag from the usual `{data1, data2, data3, data4}` GUID fields.
    pub const fn from_fields(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        let a = data1.to_le_bytes();
        let b = data2.to_le_bytes();
        let c = data3.to_le_bytes();
        SubFormatTag([
            a[0], a[1], a[2], a[3], b[0], b[1], c[0], c[1], data4[0], data4[1], data4[2],
            data4[3], data4[4], data4[5], data4[6], data4[7],
        ])
    }
}

impl fmt::Display for SubFormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        let data1 = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        let data2 = u16::from_le_bytes([b[4], b[5]]);
        let data3 = u16::from_le_bytes([b[6], b[7]]);
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            data1, data2, data3, b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        )
    }
}

impl fmt::Debug for SubFormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubFormatTag({})", self)
    }
}

/// What the host backend reports for an opened stream.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatDescriptor {
    pub format_tag: u16,
    pub sample_rate_hz: u32,
    pub channel_count: u16,
    pub bits_per_sample: u16,
    /// Present only on extended descriptors.
    pub sub_format: Option<SubFormatTag>,
}

impl FormatDescriptor {
    /// Plain integer PCM descriptor.
    pub fn pcm(sample_rate_hz: u32, channel_count: u16, bits_per_sample: u16) -> Self {
        Self {
            format_tag: WAVE_FORMAT_PCM,
            sample_rate_hz,
            channel_count,
            bits_per_sample,
            sub_format: None,
        }
    }

    /// Plain 32-bit float descriptor.
    pub fn ieee_float(sample_rate_hz: u32, channel_count: u16) -> Self {
        Self {
            format_tag: WAVE_FORMAT_IEEE_FLOAT,
            sample_rate_hz,
            channel_count,
            bits_per_sample: 32,
            sub_format: None,
        }
    }

    /// Extended descriptor carrying a sub-format tag.
    pub fn extensible(
        sample_rate_hz: u32,
        channel_count: u16,
        bits_per_sample: u16,
        sub_format: SubFormatTag,
    ) -> Self {
        Self {
            format_tag: WAVE_FORMAT_EXTENSIBLE,
            sample_rate_hz,
            channel_count,
            bits_per_sample,
            sub_format: Some(sub_format),
        }
    }

    /// Bytes per interleaved frame as the host lays it out.
    pub fn block_align(&self) -> usize {
        usize::from(self.channel_count) * usize::from(self.bits_per_sample).div_ceil(8)
    }
}

/// Sample representation on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Float,
    SignedInt,
}

/// The negotiated, immutable format of one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFormat {
    pub sample_rate_hz: u32,
    pub channel_count: u16,
    pub bits_per_sample: u16,
    pub kind: SampleKind,
    pub sub_format: Option<SubFormatTag>,
}

impl StreamFormat {
    pub fn block_align(&self) -> usize {
        usize::from(self.channel_count) * usize::from(self.bits_per_sample).div_ceil(8)
    }

    pub fn byte_rate(&self) -> usize {
        self.sample_rate_hz as usize * self.block_align()
    }

    /// Human-readable name, e.g. `PCM (via EXTENSIBLE)`.
    pub fn describe(&self) -> &'static str {
        match (self.kind, self.sub_format.is_some()) {
            (SampleKind::Float, true) => "IEEE Float (via EXTENSIBLE)",
            (SampleKind::Float, false) => "IEEE Float",
            (SampleKind::SignedInt, true) => "PCM (via EXTENSIBLE)",
            (SampleKind::SignedInt, false) => "PCM",
        }
    }
}

/// Reasons a descriptor cannot be resolved.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormatError {
    /// Extended descriptor whose sub-format matches neither known tag.
    #[error("unknown extended sub-format {0}")]
    UnknownSubformat(SubFormatTag),
    /// Base tag is neither a direct encoding nor a usable extended descriptor.
    #[error("unrecognized format tag 0x{0:04X}")]
    UnrecognizedFormat(u16),
    /// Zero channels or zero sample rate.
    #[error("invalid stream layout: {channel_count} channels at {sample_rate_hz} Hz")]
    InvalidLayout {
        channel_count: u16,
        sample_rate_hz: u32,
    },
}

/// Resolve a host descriptor into a [`StreamFormat`].
pub fn negotiate(descriptor: &FormatDescriptor) -> Result<StreamFormat, FormatError> {
    if descriptor.channel_count == 0 || descriptor.sample_rate_hz == 0 {
        return Err(FormatError::InvalidLayout {
            channel_count: descriptor.channel_count,
            sample_rate_hz: descriptor.sample_rate_hz,
        });
    }

    let kind = match descriptor.format_tag {
        WAVE_FORMAT_IEEE_FLOAT => SampleKind::Float,
        WAVE_FORMAT_PCM => SampleKind::SignedInt,
        WAVE_FORMAT_EXTENSIBLE => match descriptor.sub_format {
            Some(tag) if tag == SubFormatTag::IEEE_FLOAT => SampleKind::Float,
            Some(tag) if tag == SubFormatTag::PCM => SampleKind::SignedInt,
            Some(tag) => return Err(FormatError::UnknownSubformat(tag)),
            None => return Err(FormatError::UnrecognizedFormat(descriptor.format_tag)),
        },
        other => return Err(FormatError::UnrecognizedFormat(other)),
    };

    let format = StreamFormat {
        sample_rate_hz: descriptor.sample_rate_hz,
        channel_count: descriptor.channel_count,
        bits_per_sample: descriptor.bits_per_sample,
        kind,
        sub_format: descriptor.sub_format,
    };

    debug!(
        "Negotiated {} {}-bit, {} ch @ {} Hz (tag 0x{:04X})",
        format.describe(),
        format.bits_per_sample,
        format.channel_count,
        format.sample_rate_hz,
        descriptor.format_tag
    );

    assert_invariant(
        FORMAT_NEGOTIATED,
        format.channel_count > 0 && format.sample_rate_hz > 0,
        "Negotiated format has a usable layout",
        Some("negotiate"),
    );

    Ok(format)
}
