use criterion::{Criterion, black_box, criterion_group, criterion_main};
use sinecard::analyzer::detect_frequency;
use sinecard::config::{PlayDuration, ToneConfig};
use sinecard::format::{negotiate, FormatDescriptor};
use sinecard::render::{RenderPort, RenderScheduler};
use sinecard::{PhaseOscillator, SignalAnalyzer};

fn infinite_tone() -> ToneConfig {
    ToneConfig {
        duration: PlayDuration::Infinite,
        ..Default::default()
    }
}

fn bench_fill(c: &mut Criterion) {
    for (name, descriptor) in [
        ("fill_f32_stereo_480", FormatDescriptor::ieee_float(48_000, 2)),
        ("fill_i16_stereo_480", FormatDescriptor::pcm(48_000, 2, 16)),
        ("fill_i24_stereo_480", FormatDescriptor::pcm(48_000, 2, 24)),
    ] {
        let format = negotiate(&descriptor).unwrap();
        let mut scheduler = RenderScheduler::new(&infinite_tone(), &format).unwrap();
        let mut buffer = vec![0u8; 480 * scheduler.frame_bytes()];
        c.bench_function(name, |b| {
            b.iter(|| {
                scheduler.fill(480, black_box(&mut buffer));
                black_box(&buffer);
            })
        });
    }
}

fn bench_fill_wide(c: &mut Criterion) {
    // Worst case: many channels, large period
    let format = negotiate(&FormatDescriptor::pcm(192_000, 32, 32)).unwrap();
    let mut scheduler = RenderScheduler::new(&infinite_tone(), &format).unwrap();
    let mut buffer = vec![0u8; 4096 * scheduler.frame_bytes()];

    c.bench_function("fill_i32_32ch_4096", |b| {
        b.iter(|| {
            scheduler.fill(4096, black_box(&mut buffer));
            black_box(&buffer);
        })
    });
}

fn bench_analysis(c: &mut Criterion) {
    let mut osc = PhaseOscillator::new(440.0, 48_000.0, 0.5);
    let samples: Vec<f32> = (0..96_000).map(|_| osc.next_sample() as f32).collect();
    let analyzer = SignalAnalyzer::default();

    c.bench_function("detect_frequency_2s", |b| {
        b.iter(|| black_box(detect_frequency(black_box(&samples), 48_000)))
    });
    c.bench_function("analyze_2s", |b| {
        b.iter(|| black_box(analyzer.analyze(black_box(&samples), 48_000)))
    });
}

criterion_group!(benches, bench_fill, bench_fill_wide, bench_analysis);
criterion_main!(benches);
