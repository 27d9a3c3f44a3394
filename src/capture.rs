//! Capture path: host buffer → channel 0 samples → accumulator.
//!
//! The RT side ([`CaptureTap`]) decodes the first channel of each frame and
//! pushes it into a pre-sized SPSC ring. The control side
//! ([`CaptureCollector`]) drains the ring into a [`CaptureAccumulator`] that
//! freezes at its target length.

// IMPORTANT: CaptureTap::deliver runs in the RT context. No logging, locking or allocation.

use crate::backend::BackendError;
use crate::encode::{decode_sample, EncodeError, Encoding};
use crate::format::StreamFormat;
use crate::invariant_ppt::{assert_invariant, CAPTURE_FROZEN};
use crate::invariant_rt::{
    drain_events, log_events, new_event_queue, signal_event, EV_CALLBACK_PANIC,
    EV_CAPTURE_FROZEN, EV_CAPTURE_OVERFLOW,
};
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The host-facing capture callback.
pub trait CapturePort: Send {
    /// Called once when the host stream starts.
    fn start(&mut self) {}

    /// Accept `frame_count` interleaved frames from `data`.
    ///
    /// Returns the number of frames consumed.
    fn deliver(&mut self, frame_count: usize, data: &[u8]) -> usize;
}

/// Append-only sample store, pre-sized to its target and frozen once full.
#[derive(Debug, Clone)]
pub struct CaptureAccumulator {
    samples: Vec<f32>,
    target: usize,
}

impl CaptureAccumulator {
    pub fn with_target(target: usize) -> Self {
        Self {
            samples: Vec::with_capacity(target),
            target,
        }
    }

    /// Append up to the remaining capacity. Returns how many were taken.
    pub fn extend_from_slice(&mut self, samples: &[f32]) -> usize {
        let take = samples.len().min(self.remaining());
        self.samples.extend_from_slice(&samples[..take]);
        take
    }

    /// Append one sample unless frozen.
    #[inline]
    pub fn push(&mut self, sample: f32) -> bool {
        if self.is_frozen() {
            return false;
        }
        self.samples.push(sample);
        true
    }

    pub fn is_frozen(&self) -> bool {
        self.samples.len() >= self.target
    }

    pub fn remaining(&self) -> usize {
        self.target.saturating_sub(self.samples.len())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

/// Counters shared between a tap and its collector.
#[derive(Debug, Default)]
pub struct CaptureStatus {
    frames_seen: AtomicU64,
    frames_accepted: AtomicU64,
    dropped: AtomicU64,
    frozen: AtomicBool,
}

impl CaptureStatus {
    /// Frames delivered by the host, including those after freezing.
    pub fn frames_seen(&self) -> u64 {
        self.frames_seen.load(Ordering::Relaxed)
    }

    pub fn frames_accepted(&self) -> u64 {
        self.frames_accepted.load(Ordering::Acquire)
    }

    /// Samples lost because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }
}

/// RT half of a capture: decodes channel 0 into the transport ring.
pub struct CaptureTap {
    encoding: Encoding,
    frame_bytes: usize,
    target: u64,
    accepted: u64,
    tx: Producer<f32>,
    events: Producer<u8>,
    status: Arc<CaptureStatus>,
}

impl CaptureTap {
    fn deliver_inner(&mut self, frame_count: usize, data: &[u8]) -> usize {
        let frames = frame_count.min(data.len() / self.frame_bytes);
        self.status
            .frames_seen
            .fetch_add(frames as u64, Ordering::Relaxed);
        if self.accepted >= self.target {
            return frames;
        }

        let take = (frames as u64).min(self.target - self.accepted) as usize;
        let width = self.encoding.bytes_per_sample();
        let mut dropped = 0u64;
        for frame in data.chunks_exact(self.frame_bytes).take(take) {
            let sample = decode_sample(self.encoding, &frame[..width]);
            if self.tx.push(sample).is_err() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.status.dropped.fetch_add(dropped, Ordering::Relaxed);
            signal_event(&mut self.events, EV_CAPTURE_OVERFLOW);
        }

        self.accepted += take as u64;
        self.status
            .frames_accepted
            .store(self.accepted, Ordering::Release);
        if self.accepted >= self.target {
            self.status.frozen.store(true, Ordering::Release);
            signal_event(&mut self.events, EV_CAPTURE_FROZEN);
        }
        frames
    }
}

impl CapturePort for CaptureTap {
    fn deliver(&mut self, frame_count: usize, data: &[u8]) -> usize {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.deliver_inner(frame_count, data)
        }));
        match result {
            Ok(frames) => frames,
            Err(_) => {
                signal_event(&mut self.events, EV_CALLBACK_PANIC);
                frame_count
            }
        }
    }
}

/// Control half of a capture.
pub struct CaptureCollector {
    rx: Consumer<f32>,
    events: Consumer<u8>,
    accumulator: CaptureAccumulator,
    sample_rate_hz: u32,
    status: Arc<CaptureStatus>,
    last_log: Instant,
}

/// Create the two halves of a capture of `target_frames` frames of `format`.
pub fn capture_channel(
    target_frames: usize,
    format: &StreamFormat,
) -> Result<(CaptureTap, CaptureCollector), EncodeError> {
    let encoding = Encoding::from_layout(format.kind, format.bits_per_sample)?;
    let frame_bytes = encoding.bytes_per_sample() * usize::from(format.channel_count.max(1));
    let (tx, rx) = RingBuffer::new(target_frames.max(1));
    let (events_tx, events_rx) = new_event_queue();
    let status = Arc::new(CaptureStatus::default());

    debug!(
        "Capture channel: {} frames of {} {}-bit x{} @ {} Hz",
        target_frames,
        format.describe(),
        format.bits_per_sample,
        format.channel_count,
        format.sample_rate_hz
    );

    let tap = CaptureTap {
        encoding,
        frame_bytes,
        target: target_frames as u64,
        accepted: 0,
        tx,
        events: events_tx,
        status: Arc::clone(&status),
    };
    let collector = CaptureCollector {
        rx,
        events: events_rx,
        accumulator: CaptureAccumulator::with_target(target_frames),
        sample_rate_hz: format.sample_rate_hz,
        status,
        last_log: Instant::now(),
    };
    Ok((tap, collector))
}

impl CaptureCollector {
    pub fn status(&self) -> Arc<CaptureStatus> {
        Arc::clone(&self.status)
    }

    pub fn accumulator(&self) -> &CaptureAccumulator {
        &self.accumulator
    }

    /// Move everything pending from the ring into the accumulator.
    pub fn drain(&mut self) -> usize {
        let mut moved = 0;
        while let Ok(sample) = self.rx.pop() {
            if self.accumulator.push(sample) {
                moved += 1;
            }
        }
        let events = drain_events(&mut self.events);
        log_events(&events);
        moved
    }

    /// True once the accumulator holds its target.
    pub fn is_complete(&self) -> bool {
        self.accumulator.is_frozen()
    }

    /// Drain until complete or until `timeout` passes without completion.
    pub fn collect(mut self, timeout: Duration, poll_interval: Duration) -> CaptureAccumulator {
        let started = Instant::now();
        loop {
            self.drain();
            if self.is_complete() {
                break;
            }
            if started.elapsed() >= timeout {
                warn!(
                    "Capture timed out with {} of {} frames",
                    self.accumulator.len(),
                    self.accumulator.target()
                );
                break;
            }
            if self.last_log.elapsed() >= Duration::from_secs(1) {
                info!(
                    "Capturing: {:.1}s / {:.1}s",
                    self.accumulator.len() as f64 / f64::from(self.sample_rate_hz.max(1)),
                    self.accumulator.target() as f64 / f64::from(self.sample_rate_hz.max(1))
                );
                self.last_log = Instant::now();
            }
            std::thread::sleep(poll_interval);
        }
        self.finish()
    }

    /// Stop collecting and hand over what was captured.
    pub fn finish(mut self) -> CaptureAccumulator {
        self.drain();
        if self.status.dropped() > 0 {
            warn!("Capture dropped {} samples on a full ring", self.status.dropped());
        }
        if self.accumulator.is_frozen() {
            assert_invariant(
                CAPTURE_FROZEN,
                self.accumulator.len() == self.accumulator.target(),
                "Frozen capture holds exactly its target",
                Some("CaptureCollector::finish"),
            );
        }
        self.accumulator
    }
}

/// A host input stream that is read by polling.
pub trait PullSource {
    /// Frames ready to be read.
    fn available_frames(&mut self) -> Result<usize, BackendError>;
    /// Borrow up to `frame_count` captured frames.
    fn acquire_buffer(&mut self, frame_count: usize) -> Result<&[u8], BackendError>;
    /// Mark `frame_count` frames as consumed.
    fn release_buffer(&mut self, frame_count: usize) -> Result<(), BackendError>;
}

/// Poll `source` and hand its frames to `port` until `running` is cleared.
///
/// Returns the total frames delivered.
pub fn drive_capture_pull<S: PullSource + ?Sized>(
    source: &mut S,
    port: &mut dyn CapturePort,
    running: &AtomicBool,
    poll_interval: Duration,
) -> Result<u64, BackendError> {
    let mut delivered = 0u64;
    while running.load(Ordering::Acquire) {
        let available = source.available_frames()?;
        if available > 0 {
            let data = source.acquire_buffer(available)?;
            let consumed = port.deliver(available, data);
            source.release_buffer(available)?;
            delivered += consumed as u64;
        }
        std::thread::sleep(poll_interval);
    }
    Ok(delivered)
}
