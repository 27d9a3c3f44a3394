//! Contract tests: each flow must leave its invariants and RT events behind.

use sinecard::config::{CaptureConfig, PlayDuration, ToneConfig};
use sinecard::format::FormatDescriptor;
use sinecard::invariant_ppt::{
    contract_test, ANALYSIS_COMPLETE, CAPTURE_FROZEN, CONFIG_VALIDATED, FORMAT_NEGOTIATED,
    RENDER_COMPLETED, RENDER_TARGET_SET, VERDICT_REPORTED,
};
use sinecard::invariant_rt::{
    contract_test_rt, EV_BUFFER_FILLED, EV_DEGRADED_SILENCE, EV_DRAINED, EV_TAIL_ZERO_FILLED,
};
use sinecard::render::{RenderPort, RenderScheduler};
use sinecard::VerificationHarness;
use std::time::Duration;

fn short_tone() -> ToneConfig {
    ToneConfig {
        sample_rate_hz: 8_000,
        duration: PlayDuration::Seconds(1),
        ..Default::default()
    }
}

#[test]
fn offline_verification_contract() {
    let tone = short_tone();
    let harness = VerificationHarness::new(CaptureConfig::for_tone(&tone, 1)).unwrap();
    harness
        .run_offline(&tone, &FormatDescriptor::pcm(8_000, 1, 16))
        .unwrap();
    contract_test(
        "offline verification",
        &[
            CONFIG_VALIDATED,
            FORMAT_NEGOTIATED,
            RENDER_TARGET_SET,
            CAPTURE_FROZEN,
            ANALYSIS_COMPLETE,
            VERDICT_REPORTED,
        ],
    );
}

#[cfg(feature = "ppt")]
#[test]
fn render_lifecycle_contract() {
    let tone = short_tone();
    let descriptor = FormatDescriptor::pcm(8_000, 1, 16);
    let mut scheduler = RenderScheduler::from_descriptor(&tone, &descriptor);
    let mut control = scheduler.control();
    let mut buf = vec![0u8; 2 * 3_000];
    scheduler.start();
    for _ in 0..4 {
        scheduler.fill(3_000, &mut buf);
    }
    control.wait_until_stopped(Some(Duration::from_secs(1)), &|| false);

    contract_test("render lifecycle", &[RENDER_COMPLETED]);
    contract_test_rt(
        "render lifecycle",
        control.events(),
        &[EV_BUFFER_FILLED, EV_TAIL_ZERO_FILLED, EV_DRAINED],
    );
}

#[cfg(feature = "ppt")]
#[test]
fn degraded_render_contract() {
    let tone = short_tone();
    let descriptor = FormatDescriptor::pcm(8_000, 1, 12);
    let mut scheduler = RenderScheduler::from_descriptor(&tone, &descriptor);
    let mut control = scheduler.control();
    let mut buf = vec![0u8; 2 * 800];
    scheduler.start();
    scheduler.fill(800, &mut buf);
    control.poll_events();
    contract_test_rt("degraded render", control.events(), &[EV_DEGRADED_SILENCE]);
}

#[cfg(feature = "ppt")]
#[test]
#[should_panic(expected = "missing events")]
fn missing_rt_events_fail_the_contract() {
    contract_test_rt("nothing happened", &[], &[EV_DRAINED]);
}
