use proptest::prelude::*;
use sinecard::config::{PlayDuration, ToneConfig};
use sinecard::format::{FormatDescriptor, SubFormatTag};
use sinecard::render::{RenderPort, RenderScheduler};
use sinecard::RenderState;

fn descriptor(choice: u8, rate: u32, channels: u16, bits: u16) -> FormatDescriptor {
    match choice % 4 {
        0 => FormatDescriptor::pcm(rate, channels, bits),
        1 => FormatDescriptor::ieee_float(rate, channels),
        2 => FormatDescriptor::extensible(rate, channels, bits, SubFormatTag::PCM),
        _ => FormatDescriptor::extensible(rate, channels, bits, SubFormatTag([7; 16])),
    }
}

proptest! {
    #[test]
    fn fill_never_panics(
        choice in 0u8..4,
        rate in 0u32..200_000,
        channels in 0u16..9,
        bits in prop::sample::select(vec![8u16, 16, 20, 24, 32, 64]),
        frames in 0usize..2048,
        buffer_len in 0usize..4096,
    ) {
        let tone = ToneConfig {
            duration: PlayDuration::Seconds(1),
            ..Default::default()
        };
        let host = descriptor(choice, rate, channels, bits);
        let mut scheduler = RenderScheduler::from_descriptor(&tone, &host);
        scheduler.start();
        let mut buffer = vec![0xAAu8; buffer_len];
        for _ in 0..4 {
            let written = scheduler.fill(frames, &mut buffer);
            prop_assert!(written <= frames);
        }
    }

    #[test]
    fn frames_never_exceed_target(
        secs in 1u32..3,
        block in 1usize..4096,
    ) {
        let tone = ToneConfig {
            sample_rate_hz: 8_000,
            duration: PlayDuration::Seconds(secs),
            ..Default::default()
        };
        let host = FormatDescriptor::pcm(8_000, 1, 16);
        let mut scheduler = RenderScheduler::from_descriptor(&tone, &host);
        let mut buffer = vec![0u8; block * 2];
        let target = u64::from(secs) * 8_000;
        while scheduler.state() != RenderState::Stopped {
            scheduler.fill(block, &mut buffer);
            prop_assert!(scheduler.frames_produced() <= target);
        }
        prop_assert_eq!(scheduler.frames_produced(), target);
    }
}
