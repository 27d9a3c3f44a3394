//! Render path: oscillator → encoder → host buffer.

// IMPORTANT: Do not call assert_invariant or any PPT logging in RT paths to avoid locks/allocs.
// `fill` only touches atomics, the event queue and the host buffer.

use crate::config::ToneConfig;
use crate::control::RenderControl;
use crate::encode::{write_silence, EncodeError, SampleEncoder};
use crate::format::{negotiate, FormatDescriptor, StreamFormat};
use crate::invariant_ppt::{assert_invariant, RENDER_TARGET_SET};
use crate::invariant_rt::{
    new_event_queue, signal_event, EV_BUFFER_FILLED, EV_CALLBACK_PANIC, EV_DEGRADED_SILENCE,
    EV_DRAINED, EV_TAIL_ZERO_FILLED,
};
use crate::backend::BackendError;
use crate::osc::PhaseOscillator;
use crate::states::RenderState;
use rtrb::{Consumer, Producer};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default sleep between polls of a pull-model stream.
pub const PULL_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The host-facing render callback.
pub trait RenderPort: Send {
    /// Called once when the host stream starts.
    fn start(&mut self) {}

    /// Write exactly `frame_count` interleaved frames into `buffer`.
    ///
    /// Returns the number of frames written. Frames past the end of a too
    /// small buffer are skipped; nothing else is ever left unwritten.
    fn fill(&mut self, frame_count: usize, buffer: &mut [u8]) -> usize;

    /// Status that host-reported xruns are recorded into, if the port keeps one.
    fn render_status(&self) -> Option<Arc<RenderStatus>> {
        None
    }
}

/// Progress shared between the render callback and the control context.
#[derive(Debug, Default)]
pub struct RenderStatus {
    frames_produced: AtomicU64,
    callbacks: AtomicU64,
    state: AtomicU8,
    stop_requested: AtomicBool,
    degraded: AtomicBool,
    xruns: AtomicU32,
}

impl RenderStatus {
    pub fn frames_produced(&self) -> u64 {
        self.frames_produced.load(Ordering::Acquire)
    }

    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> RenderState {
        RenderState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Takes effect at the next callback boundary.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Called by backends when the host reports an under- or overrun.
    pub fn record_xrun(&self) {
        self.xruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn xruns(&self) -> u32 {
        self.xruns.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: RenderState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Fills host buffers with a sine tone until a frame target is reached.
///
/// Lifecycle: `Idle → Priming` on [`RenderPort::start`], `Priming → Running`
/// at the first fill, `Running → Draining` once the target is reached or a
/// stop was requested, and `Draining → Stopped` after one all-silent fill.
/// A `Stopped` scheduler answers every request with silence.
pub struct RenderScheduler {
    osc: PhaseOscillator,
    /// `None` when the host format could not be encoded.
    encoder: Option<SampleEncoder>,
    frame_bytes: usize,
    sample_rate_hz: u32,
    target_frames: Option<u64>,
    frames_produced: u64,
    state: RenderState,
    status: Arc<RenderStatus>,
    events: Producer<u8>,
    events_rx: Option<Consumer<u8>>,
}

impl RenderScheduler {
    /// Build a scheduler for an already negotiated format.
    ///
    /// The oscillator runs at the negotiated rate, which wins over the
    /// requested one.
    pub fn new(tone: &ToneConfig, format: &StreamFormat) -> Result<Self, EncodeError> {
        let encoder = SampleEncoder::for_format(format)?;
        let target_frames = tone.duration.target_frames(format.sample_rate_hz);
        assert_invariant(
            RENDER_TARGET_SET,
            target_frames.map_or(true, |t| t > 0),
            "Finite render target is non-zero",
            Some("RenderScheduler::new"),
        );
        Ok(Self::build(
            tone,
            Some(encoder),
            encoder.frame_bytes(),
            format.sample_rate_hz,
            target_frames,
        ))
    }

    /// Build a scheduler straight from what the host reported.
    ///
    /// A descriptor that cannot be negotiated or encoded does not fail: the
    /// scheduler is degraded and renders silence of the host's block size.
    pub fn from_descriptor(tone: &ToneConfig, descriptor: &FormatDescriptor) -> Self {
        let format = match negotiate(descriptor) {
            Ok(format) => format,
            Err(err) => {
                warn!("Format negotiation failed, rendering silence: {}", err);
                return Self::degraded(tone, descriptor);
            }
        };
        match Self::new(tone, &format) {
            Ok(scheduler) => scheduler,
            Err(err) => {
                warn!("No encoder for {}, rendering silence: {}", format.describe(), err);
                Self::degraded(tone, descriptor)
            }
        }
    }

    fn degraded(tone: &ToneConfig, descriptor: &FormatDescriptor) -> Self {
        let target_frames = tone.duration.target_frames(descriptor.sample_rate_hz);
        let scheduler = Self::build(
            tone,
            None,
            descriptor.block_align(),
            descriptor.sample_rate_hz,
            target_frames,
        );
        scheduler.status.degraded.store(true, Ordering::Relaxed);
        scheduler
    }

    fn build(
        tone: &ToneConfig,
        encoder: Option<SampleEncoder>,
        frame_bytes: usize,
        sample_rate_hz: u32,
        target_frames: Option<u64>,
    ) -> Self {
        let (events, events_rx) = new_event_queue();
        debug!(
            "Render scheduler: {:.2} Hz, amp {:.3}, {} Hz, {} bytes/frame, target {:?}",
            tone.frequency_hz, tone.amplitude, sample_rate_hz, frame_bytes, target_frames
        );
        Self {
            osc: PhaseOscillator::new(tone.frequency_hz, f64::from(sample_rate_hz), tone.amplitude),
            encoder,
            frame_bytes,
            sample_rate_hz,
            target_frames,
            frames_produced: 0,
            state: RenderState::Idle,
            status: Arc::new(RenderStatus::default()),
            events,
            events_rx: Some(events_rx),
        }
    }

    /// Shared progress counters.
    pub fn status(&self) -> Arc<RenderStatus> {
        Arc::clone(&self.status)
    }

    /// Control handle for this scheduler. Only the first handle receives RT events.
    pub fn control(&mut self) -> RenderControl {
        RenderControl::new(
            self.status(),
            self.events_rx.take(),
            self.sample_rate_hz,
            self.target_frames,
        )
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn frames_produced(&self) -> u64 {
        self.frames_produced
    }

    pub fn target_frames(&self) -> Option<u64> {
        self.target_frames
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn is_degraded(&self) -> bool {
        self.encoder.is_none()
    }

    fn set_state(&mut self, state: RenderState) {
        self.state = state;
        self.status.set_state(state);
    }

    fn fill_inner(&mut self, frame_count: usize, buffer: &mut [u8]) -> usize {
        self.status.callbacks.fetch_add(1, Ordering::Relaxed);

        let frames = if self.frame_bytes == 0 {
            frame_count
        } else {
            frame_count.min(buffer.len() / self.frame_bytes)
        };
        let active_len = frames * self.frame_bytes;
        write_silence(&mut buffer[active_len..]);
        let active = &mut buffer[..active_len];

        if matches!(self.state, RenderState::Idle | RenderState::Priming) {
            self.set_state(RenderState::Running);
        }
        if self.state == RenderState::Running && self.status.stop_requested() {
            self.set_state(RenderState::Draining);
        }

        match self.state {
            RenderState::Running => {
                let remaining = self
                    .target_frames
                    .map_or(u64::MAX, |t| t.saturating_sub(self.frames_produced));
                let tone_frames = (frames as u64).min(remaining) as usize;
                let (head, tail) = active.split_at_mut(tone_frames * self.frame_bytes);

                match self.encoder {
                    Some(encoder) => {
                        let osc = &mut self.osc;
                        encoder.encode_frames(head, || osc.next_sample());
                    }
                    None => {
                        write_silence(head);
                        signal_event(&mut self.events, EV_DEGRADED_SILENCE);
                    }
                }
                self.frames_produced += tone_frames as u64;
                self.status
                    .frames_produced
                    .store(self.frames_produced, Ordering::Release);

                if !tail.is_empty() {
                    write_silence(tail);
                    signal_event(&mut self.events, EV_TAIL_ZERO_FILLED);
                }
                if self.target_frames.is_some_and(|t| self.frames_produced >= t) {
                    self.set_state(RenderState::Draining);
                }
                signal_event(&mut self.events, EV_BUFFER_FILLED);
            }
            RenderState::Draining => {
                write_silence(active);
                self.set_state(RenderState::Stopped);
                signal_event(&mut self.events, EV_DRAINED);
            }
            _ => write_silence(active),
        }
        frames
    }
}

impl RenderPort for RenderScheduler {
    fn start(&mut self) {
        if self.state == RenderState::Idle {
            self.set_state(RenderState::Priming);
        }
    }

    fn fill(&mut self, frame_count: usize, buffer: &mut [u8]) -> usize {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.fill_inner(frame_count, buffer)
        }));
        match result {
            Ok(frames) => frames,
            Err(_) => {
                // Fail closed: silence output
                write_silence(buffer);
                signal_event(&mut self.events, EV_CALLBACK_PANIC);
                frame_count
            }
        }
    }

    fn render_status(&self) -> Option<Arc<RenderStatus>> {
        Some(self.status())
    }
}

/// Run `port.fill` with panic containment. A panicking port yields silence.
pub fn fill_safe(port: &mut dyn RenderPort, frame_count: usize, buffer: &mut [u8]) -> usize {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        port.fill(frame_count, buffer)
    }));
    match result {
        Ok(frames) => frames,
        Err(_) => {
            write_silence(buffer);
            frame_count
        }
    }
}

/// Render `frames` frames offline in blocks of `block_frames`.
pub fn render_offline(
    port: &mut dyn RenderPort,
    frame_bytes: usize,
    frames: usize,
    block_frames: usize,
) -> Vec<u8> {
    let mut output = vec![0u8; frames * frame_bytes];
    let block_frames = block_frames.max(1);
    let mut offset = 0;
    while offset < frames {
        let end = (offset + block_frames).min(frames);
        port.fill(end - offset, &mut output[offset * frame_bytes..end * frame_bytes]);
        offset = end;
    }
    output
}

/// A host stream that is filled by polling rather than by callback.
pub trait PullStream {
    /// Frames the host can accept right now.
    fn available_frames(&mut self) -> Result<usize, BackendError>;
    /// Borrow the host buffer for `frame_count` frames.
    fn acquire_buffer(&mut self, frame_count: usize) -> Result<&mut [u8], BackendError>;
    /// Hand `frame_count` written frames back to the host.
    fn release_buffer(&mut self, frame_count: usize) -> Result<(), BackendError>;
}

/// Poll `stream` and feed it from `port` until `running` is cleared.
///
/// Sleeps `poll_interval` between polls. An xrun reported by the stream is
/// recorded on the port's status and the loop carries on. Returns the total
/// frames delivered.
pub fn drive_pull<S: PullStream + ?Sized>(
    stream: &mut S,
    port: &mut dyn RenderPort,
    running: &AtomicBool,
    poll_interval: Duration,
) -> Result<u64, BackendError> {
    let status = port.render_status();
    let mut delivered = 0u64;
    while running.load(Ordering::Acquire) {
        match stream.available_frames() {
            Ok(0) => {}
            Ok(available) => {
                let buffer = stream.acquire_buffer(available)?;
                let written = fill_safe(port, available, buffer);
                stream.release_buffer(written)?;
                delivered += written as u64;
            }
            Err(BackendError::Xrun(_)) => {
                if let Some(status) = &status {
                    status.record_xrun();
                }
            }
            Err(e) => return Err(e),
        }
        std::thread::sleep(poll_interval);
    }
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlayDuration;
    use crate::encode::{decode_sample, Encoding};
    use crate::format::{FormatDescriptor, SubFormatTag};

    fn tone(secs: u32) -> ToneConfig {
        ToneConfig {
            duration: PlayDuration::Seconds(secs),
            sample_rate_hz: 8_000,
            ..Default::default()
        }
    }

    fn float_format(rate: u32, channels: u16) -> StreamFormat {
        negotiate(&FormatDescriptor::ieee_float(rate, channels)).unwrap()
    }

    #[test]
    fn lifecycle_follows_fills() {
        let mut s = RenderScheduler::new(&tone(1), &float_format(8_000, 1)).unwrap();
        assert_eq!(s.state(), RenderState::Idle);
        s.start();
        assert_eq!(s.state(), RenderState::Priming);

        let mut buf = vec![0u8; 4 * 3_000];
        s.fill(3_000, &mut buf);
        assert_eq!(s.state(), RenderState::Running);
        s.fill(3_000, &mut buf);
        s.fill(3_000, &mut buf);
        // 9000 requested, target 8000: tail of the third fill is silence.
        assert_eq!(s.state(), RenderState::Draining);
        assert_eq!(s.frames_produced(), 8_000);
        assert!(buf[4 * 2_000..].iter().all(|&b| b == 0));

        s.fill(3_000, &mut buf);
        assert_eq!(s.state(), RenderState::Stopped);
        assert_eq!(s.status().state(), RenderState::Stopped);
    }

    #[test]
    fn stop_request_drains_in_one_callback() {
        let mut s = RenderScheduler::new(&tone(10), &float_format(8_000, 2)).unwrap();
        s.start();
        let mut buf = vec![0u8; 8 * 256];
        s.fill(256, &mut buf);
        s.status().request_stop();
        buf.fill(0xAA);
        s.fill(256, &mut buf);
        assert_eq!(s.state(), RenderState::Stopped);
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(s.frames_produced(), 256);
    }

    #[test]
    fn degraded_scheduler_writes_silence() {
        let odd = SubFormatTag::from_fields(0x55, 0, 0x10, [0x80, 0, 0, 0xaa, 0, 0x38, 0x9b, 0x71]);
        let d = FormatDescriptor::extensible(8_000, 2, 16, odd);
        let mut s = RenderScheduler::from_descriptor(&tone(1), &d);
        assert!(s.is_degraded());
        assert!(s.status().is_degraded());
        let mut buf = vec![0xAAu8; d.block_align() * 128];
        assert_eq!(s.fill(128, &mut buf), 128);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn unsupported_depth_degrades_too() {
        let d = FormatDescriptor::pcm(8_000, 1, 8);
        let s = RenderScheduler::from_descriptor(&tone(1), &d);
        assert!(s.is_degraded());
        assert_eq!(s.frame_bytes(), 1);
    }

    #[test]
    fn extended_pcm_renders_int16() {
        let d = FormatDescriptor::extensible(8_000, 2, 16, SubFormatTag::PCM);
        let mut s = RenderScheduler::from_descriptor(&tone(1), &d);
        let out = render_offline(&mut s, 4, 8, 8);
        // Second frame: both channels equal and positive.
        let l = decode_sample(Encoding::Int16, &out[4..6]);
        let r = decode_sample(Encoding::Int16, &out[6..8]);
        assert_eq!(l, r);
        assert!(l > 0.0);
    }

    #[test]
    fn small_buffer_is_not_overrun() {
        let mut s = RenderScheduler::new(&tone(1), &float_format(8_000, 1)).unwrap();
        let mut buf = vec![0u8; 4 * 10];
        assert_eq!(s.fill(64, &mut buf), 10);
        assert_eq!(s.frames_produced(), 10);
    }

    #[test]
    fn infinite_target_only_stops_on_request() {
        let t = ToneConfig {
            duration: PlayDuration::Infinite,
            sample_rate_hz: 8_000,
            ..Default::default()
        };
        let mut s = RenderScheduler::new(&t, &float_format(8_000, 1)).unwrap();
        let mut buf = vec![0u8; 4 * 8_000];
        for _ in 0..5 {
            s.fill(8_000, &mut buf);
        }
        assert_eq!(s.state(), RenderState::Running);
        s.status().request_stop();
        s.fill(8_000, &mut buf);
        assert_eq!(s.state(), RenderState::Stopped);
    }

    #[test]
    fn render_offline_blocks_cover_everything() {
        let mut s = RenderScheduler::new(&tone(1), &float_format(8_000, 1)).unwrap();
        let out = render_offline(&mut s, 4, 1_000, 333);
        assert_eq!(out.len(), 4_000);
        assert_eq!(s.frames_produced(), 1_000);
    }

    struct Panicker;

    impl RenderPort for Panicker {
        fn fill(&mut self, _frame_count: usize, _buffer: &mut [u8]) -> usize {
            panic!("boom");
        }
    }

    #[test]
    fn fill_safe_silences_a_panicking_port() {
        let mut buf = vec![0xAAu8; 64];
        assert_eq!(fill_safe(&mut Panicker, 16, &mut buf), 16);
        assert!(buf.iter().all(|&b| b == 0));
    }

    /// Hands out 16 frames per poll, reports one xrun on the first poll and
    /// clears `running` after `polls` polls.
    struct LaggingStream {
        buf: Vec<u8>,
        polls: u32,
        limit: u32,
        running: Arc<AtomicBool>,
    }

    impl PullStream for LaggingStream {
        fn available_frames(&mut self) -> Result<usize, BackendError> {
            self.polls += 1;
            if self.polls >= self.limit {
                self.running.store(false, Ordering::Release);
            }
            if self.polls == 1 {
                return Err(BackendError::Xrun("late poll".into()));
            }
            Ok(16)
        }

        fn acquire_buffer(&mut self, frame_count: usize) -> Result<&mut [u8], BackendError> {
            Ok(&mut self.buf[..frame_count * 4])
        }

        fn release_buffer(&mut self, _frame_count: usize) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[test]
    fn pull_xruns_show_up_on_the_control() {
        let mut s = RenderScheduler::new(&tone(1), &float_format(8_000, 1)).unwrap();
        let control = s.control();
        let running = Arc::new(AtomicBool::new(true));
        let mut stream = LaggingStream {
            buf: vec![0u8; 4 * 16],
            polls: 0,
            limit: 3,
            running: Arc::clone(&running),
        };
        let delivered = drive_pull(&mut stream, &mut s, &running, Duration::ZERO).unwrap();
        assert_eq!(delivered, 32);
        assert_eq!(control.xruns(), 1);
        assert_eq!(s.frames_produced(), 32);
    }

    #[test]
    fn pull_stream_errors_still_abort() {
        struct Broken;
        impl PullStream for Broken {
            fn available_frames(&mut self) -> Result<usize, BackendError> {
                Err(BackendError::Stream("gone".into()))
            }
            fn acquire_buffer(&mut self, _: usize) -> Result<&mut [u8], BackendError> {
                unreachable!()
            }
            fn release_buffer(&mut self, _: usize) -> Result<(), BackendError> {
                unreachable!()
            }
        }
        let mut s = RenderScheduler::new(&tone(1), &float_format(8_000, 1)).unwrap();
        let running = AtomicBool::new(true);
        let err = drive_pull(&mut Broken, &mut s, &running, Duration::ZERO).unwrap_err();
        assert_eq!(err, BackendError::Stream("gone".into()));
    }
}
