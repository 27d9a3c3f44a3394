use sinecard::encode::{EncodeError, Encoding, SampleEncoder};
use sinecard::format::{
    negotiate, FormatDescriptor, FormatError, SampleKind, SubFormatTag, WAVE_FORMAT_EXTENSIBLE,
};

#[test]
fn every_supported_layout_gets_an_encoder() {
    let cases = [
        (FormatDescriptor::ieee_float(48_000, 2), Encoding::Float32),
        (FormatDescriptor::pcm(44_100, 2, 16), Encoding::Int16),
        (FormatDescriptor::pcm(96_000, 1, 24), Encoding::Int24),
        (FormatDescriptor::pcm(48_000, 6, 32), Encoding::Int32),
        (
            FormatDescriptor::extensible(48_000, 2, 32, SubFormatTag::IEEE_FLOAT),
            Encoding::Float32,
        ),
        (
            FormatDescriptor::extensible(48_000, 8, 24, SubFormatTag::PCM),
            Encoding::Int24,
        ),
    ];
    for (descriptor, expected) in cases {
        let format = negotiate(&descriptor).unwrap();
        let encoder = SampleEncoder::for_format(&format).unwrap();
        assert_eq!(encoder.encoding(), expected, "{:?}", descriptor);
        assert_eq!(encoder.frame_bytes(), descriptor.block_align());
    }
}

#[test]
fn extensible_resolves_through_the_subformat() {
    let d = FormatDescriptor::extensible(48_000, 2, 16, SubFormatTag::PCM);
    let format = negotiate(&d).unwrap();
    assert_eq!(format.kind, SampleKind::SignedInt);
    assert_eq!(format.sub_format, Some(SubFormatTag::PCM));

    let mut missing = FormatDescriptor::pcm(48_000, 2, 16);
    missing.format_tag = WAVE_FORMAT_EXTENSIBLE;
    assert!(matches!(
        negotiate(&missing),
        Err(FormatError::UnrecognizedFormat(WAVE_FORMAT_EXTENSIBLE))
    ));
}

#[test]
fn unknown_tags_are_rejected() {
    let unknown = SubFormatTag([0x42; 16]);
    let err = negotiate(&FormatDescriptor::extensible(48_000, 2, 16, unknown)).unwrap_err();
    assert_eq!(err, FormatError::UnknownSubformat(unknown));

    let mut alaw = FormatDescriptor::pcm(8_000, 1, 8);
    alaw.format_tag = 0x0006;
    assert_eq!(negotiate(&alaw).unwrap_err(), FormatError::UnrecognizedFormat(0x0006));
}

#[test]
fn unsupported_depths_negotiate_but_do_not_encode() {
    let format = negotiate(&FormatDescriptor::pcm(48_000, 2, 8)).unwrap();
    assert!(matches!(
        SampleEncoder::for_format(&format),
        Err(EncodeError::UnsupportedFormat { bits_per_sample: 8, .. })
    ));

    let d = FormatDescriptor::extensible(48_000, 2, 64, SubFormatTag::IEEE_FLOAT);
    let format = negotiate(&d).unwrap();
    assert!(SampleEncoder::for_format(&format).is_err());
}

#[test]
fn empty_layouts_are_invalid() {
    assert!(matches!(
        negotiate(&FormatDescriptor::pcm(48_000, 0, 16)),
        Err(FormatError::InvalidLayout { channel_count: 0, .. })
    ));
    assert!(matches!(
        negotiate(&FormatDescriptor::ieee_float(0, 2)),
        Err(FormatError::InvalidLayout { sample_rate_hz: 0, .. })
    ));
}
