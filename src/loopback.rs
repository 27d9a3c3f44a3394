//! In-memory loopback backend.
//!
//! Behaves like a virtual cable: whatever the output stream renders shows up
//! on the paired input stream. Both ends are pull-model streams driven by
//! their own threads, and both report the same fixed descriptor, which by
//! default is the extended 16-bit PCM layout consumer virtual cables use.

use crate::backend::{
    AudioBackend, BackendError, DeviceDirection, DeviceInfo, DeviceSelector, InputStream,
    OutputStream, StreamRequest,
};
use crate::capture::{drive_capture_pull, CapturePort, PullSource};
use crate::format::{FormatDescriptor, SubFormatTag};
use crate::render::{drive_pull, PullStream, RenderPort, PULL_POLL_INTERVAL};
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const OUTPUT_DEVICE_NAME: &str = "Loopback Output";
pub const INPUT_DEVICE_NAME: &str = "Loopback Input";

/// Frames handed over per poll at most.
pub const DEFAULT_PERIOD_FRAMES: usize = 480;
/// Capacity of the cable, in seconds of audio.
const CABLE_SECONDS: f64 = 0.5;

/// How the output end paces itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopbackClock {
    /// Frames become available at the stream's sample rate; anything the
    /// cable cannot hold is dropped, like a device with nobody listening.
    /// Falling further behind than the cable holds is an xrun.
    Realtime,
    /// Frames become available whenever the cable has room.
    Freerun,
}

/// One side of the cable, waiting to be claimed by an open call.
struct CableEnds {
    output: Option<Producer<u8>>,
    input: Option<Consumer<u8>>,
}

/// In-memory backend context. Each end can be opened once.
pub struct LoopbackBackend {
    descriptor: FormatDescriptor,
    clock: LoopbackClock,
    period_frames: usize,
    poll_interval: Duration,
    ends: Mutex<CableEnds>,
}

impl LoopbackBackend {
    /// A cable reporting `descriptor` on both ends.
    pub fn new(descriptor: FormatDescriptor) -> Self {
        let bytes = (f64::from(descriptor.sample_rate_hz) * CABLE_SECONDS) as usize
            * descriptor.block_align().max(1);
        let (tx, rx) = RingBuffer::new(bytes.max(1));
        Self {
            descriptor,
            clock: LoopbackClock::Realtime,
            period_frames: DEFAULT_PERIOD_FRAMES,
            poll_interval: PULL_POLL_INTERVAL,
            ends: Mutex::new(CableEnds {
                output: Some(tx),
                input: Some(rx),
            }),
        }
    }

    /// Extended 16-bit PCM, as virtual cables typically report.
    pub fn virtual_cable(sample_rate_hz: u32, channel_count: u16) -> Self {
        Self::new(FormatDescriptor::extensible(
            sample_rate_hz,
            channel_count,
            16,
            SubFormatTag::PCM,
        ))
    }

    pub fn with_clock(mut self, clock: LoopbackClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_period(mut self, period_frames: usize) -> Self {
        self.period_frames = period_frames.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn descriptor(&self) -> &FormatDescriptor {
        &self.descriptor
    }

    fn check_device(&self, selector: &DeviceSelector, name: &str) -> Result<(), BackendError> {
        match selector {
            DeviceSelector::Default => Ok(()),
            DeviceSelector::Named(wanted)
                if name.to_lowercase().contains(&wanted.to_lowercase()) =>
            {
                Ok(())
            }
            DeviceSelector::Named(wanted) => Err(BackendError::DeviceNotFound(wanted.clone())),
        }
    }

    fn log_mismatch(&self, request: &StreamRequest) {
        if request.sample_rate_hz != self.descriptor.sample_rate_hz
            || request.channel_count != self.descriptor.channel_count
        {
            info!(
                "Loopback runs at {} Hz x{} (requested {} Hz x{})",
                self.descriptor.sample_rate_hz,
                self.descriptor.channel_count,
                request.sample_rate_hz,
                request.channel_count
            );
        }
    }
}

impl AudioBackend for LoopbackBackend {
    type Output = LoopbackOutput;
    type Input = LoopbackInput;

    fn name(&self) -> &'static str {
        "loopback"
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>, BackendError> {
        Ok(vec![
            DeviceInfo {
                name: OUTPUT_DEVICE_NAME.to_string(),
                direction: DeviceDirection::Output,
                is_default: true,
                default_format: Some(self.descriptor.clone()),
            },
            DeviceInfo {
                name: INPUT_DEVICE_NAME.to_string(),
                direction: DeviceDirection::Input,
                is_default: true,
                default_format: Some(self.descriptor.clone()),
            },
        ])
    }

    fn open_output_stream(
        &self,
        request: &StreamRequest,
    ) -> Result<(LoopbackOutput, FormatDescriptor), BackendError> {
        self.check_device(&request.device, OUTPUT_DEVICE_NAME)?;
        let tx = self
            .ends
            .lock()
            .map_err(|_| BackendError::Unavailable("loopback state poisoned".into()))?
            .output
            .take()
            .ok_or_else(|| BackendError::Unavailable("loopback output already open".into()))?;
        self.log_mismatch(request);

        let frame_bytes = self.descriptor.block_align();
        let lag_limit_frames = (tx.buffer().capacity() / frame_bytes.max(1)) as u64;
        let endpoint = RenderEndpoint {
            tx,
            frame_bytes,
            scratch: vec![0u8; self.period_frames * frame_bytes],
            period_frames: self.period_frames,
            sample_rate_hz: self.descriptor.sample_rate_hz,
            clock: self.clock,
            lag_limit_frames,
            started: None,
            frames_released: 0,
            bytes_dropped: 0,
        };
        debug!("Opened loopback output ({} bytes/frame)", frame_bytes);
        Ok((
            LoopbackOutput {
                endpoint: Some(endpoint),
                running: Arc::new(AtomicBool::new(false)),
                poll_interval: self.poll_interval,
                thread: None,
            },
            self.descriptor.clone(),
        ))
    }

    fn open_input_stream(
        &self,
        request: &StreamRequest,
    ) -> Result<(LoopbackInput, FormatDescriptor), BackendError> {
        self.check_device(&request.device, INPUT_DEVICE_NAME)?;
        let rx = self
            .ends
            .lock()
            .map_err(|_| BackendError::Unavailable("loopback state poisoned".into()))?
            .input
            .take()
            .ok_or_else(|| BackendError::Unavailable("loopback input already open".into()))?;
        self.log_mismatch(request);

        let frame_bytes = self.descriptor.block_align();
        let endpoint = CaptureEndpoint {
            rx,
            frame_bytes,
            scratch: vec![0u8; self.period_frames * frame_bytes],
            period_frames: self.period_frames,
        };
        debug!("Opened loopback input ({} bytes/frame)", frame_bytes);
        Ok((
            LoopbackInput {
                endpoint: Some(endpoint),
                running: Arc::new(AtomicBool::new(false)),
                poll_interval: self.poll_interval,
                thread: None,
            },
            self.descriptor.clone(),
        ))
    }
}

/// Output end of the cable, as seen by the pull loop.
struct RenderEndpoint {
    tx: Producer<u8>,
    frame_bytes: usize,
    scratch: Vec<u8>,
    period_frames: usize,
    sample_rate_hz: u32,
    clock: LoopbackClock,
    lag_limit_frames: u64,
    started: Option<Instant>,
    frames_released: u64,
    bytes_dropped: u64,
}

impl PullStream for RenderEndpoint {
    fn available_frames(&mut self) -> Result<usize, BackendError> {
        if self.frame_bytes == 0 {
            return Ok(0);
        }
        let available = match self.clock {
            LoopbackClock::Freerun => self.tx.slots() / self.frame_bytes,
            LoopbackClock::Realtime => {
                let started = *self.started.get_or_insert_with(Instant::now);
                let elapsed = started.elapsed().as_secs_f64();
                let due = (elapsed * f64::from(self.sample_rate_hz)) as u64;
                let lag = due.saturating_sub(self.frames_released);
                if lag > self.lag_limit_frames {
                    // The skipped frames are lost, as on a real device.
                    self.frames_released = due;
                    return Err(BackendError::Xrun(format!(
                        "render fell {} frames behind",
                        lag
                    )));
                }
                lag as usize
            }
        };
        Ok(available.min(self.period_frames))
    }

    fn acquire_buffer(&mut self, frame_count: usize) -> Result<&mut [u8], BackendError> {
        let len = frame_count.min(self.period_frames) * self.frame_bytes;
        Ok(&mut self.scratch[..len])
    }

    fn release_buffer(&mut self, frame_count: usize) -> Result<(), BackendError> {
        let len = frame_count.min(self.period_frames) * self.frame_bytes;
        let fits = (self.tx.slots() / self.frame_bytes.max(1)) * self.frame_bytes;
        let n = len.min(fits);
        if n > 0 {
            let chunk = self
                .tx
                .write_chunk_uninit(n)
                .map_err(|e| BackendError::Stream(e.to_string()))?;
            chunk.fill_from_iter(self.scratch[..n].iter().copied());
        }
        self.bytes_dropped += (len - n) as u64;
        self.frames_released += frame_count as u64;
        Ok(())
    }
}

/// Input end of the cable, as seen by the capture pull loop.
struct CaptureEndpoint {
    rx: Consumer<u8>,
    frame_bytes: usize,
    scratch: Vec<u8>,
    period_frames: usize,
}

impl PullSource for CaptureEndpoint {
    fn available_frames(&mut self) -> Result<usize, BackendError> {
        if self.frame_bytes == 0 {
            return Ok(0);
        }
        Ok((self.rx.slots() / self.frame_bytes).min(self.period_frames))
    }

    fn acquire_buffer(&mut self, frame_count: usize) -> Result<&[u8], BackendError> {
        let len = frame_count.min(self.period_frames) * self.frame_bytes;
        let chunk = self
            .rx
            .read_chunk(len)
            .map_err(|e| BackendError::Stream(e.to_string()))?;
        let (first, second) = chunk.as_slices();
        self.scratch[..first.len()].copy_from_slice(first);
        self.scratch[first.len()..len].copy_from_slice(second);
        chunk.commit_all();
        Ok(&self.scratch[..len])
    }

    fn release_buffer(&mut self, _frame_count: usize) -> Result<(), BackendError> {
        Ok(())
    }
}

/// An opened loopback output stream.
pub struct LoopbackOutput {
    endpoint: Option<RenderEndpoint>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
    thread: Option<JoinHandle<Result<u64, BackendError>>>,
}

impl OutputStream for LoopbackOutput {
    fn start(&mut self, mut port: Box<dyn RenderPort>) -> Result<(), BackendError> {
        let mut endpoint = self
            .endpoint
            .take()
            .ok_or_else(|| BackendError::Stream("loopback output already started".into()))?;
        let running = Arc::clone(&self.running);
        let poll_interval = self.poll_interval;
        running.store(true, Ordering::Release);

        let handle = std::thread::Builder::new()
            .name("loopback-render".into())
            .spawn(move || {
                port.start();
                let result = drive_pull(&mut endpoint, port.as_mut(), &running, poll_interval);
                if endpoint.bytes_dropped > 0 {
                    debug!(
                        "Loopback output dropped {} bytes nobody read",
                        endpoint.bytes_dropped
                    );
                }
                result
            })
            .map_err(|e| BackendError::Stream(format!("failed to spawn render thread: {}", e)))?;
        self.thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        self.running.store(false, Ordering::Release);
        join_worker(self.thread.take(), "render")
    }
}

impl Drop for LoopbackOutput {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Loopback output stopped with error: {}", e);
        }
    }
}

/// An opened loopback input stream.
pub struct LoopbackInput {
    endpoint: Option<CaptureEndpoint>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
    thread: Option<JoinHandle<Result<u64, BackendError>>>,
}

impl InputStream for LoopbackInput {
    fn start(&mut self, mut port: Box<dyn CapturePort>) -> Result<(), BackendError> {
        let mut endpoint = self
            .endpoint
            .take()
            .ok_or_else(|| BackendError::Stream("loopback input already started".into()))?;
        let running = Arc::clone(&self.running);
        let poll_interval = self.poll_interval;
        running.store(true, Ordering::Release);

        let handle = std::thread::Builder::new()
            .name("loopback-capture".into())
            .spawn(move || {
                port.start();
                drive_capture_pull(&mut endpoint, port.as_mut(), &running, poll_interval)
            })
            .map_err(|e| BackendError::Stream(format!("failed to spawn capture thread: {}", e)))?;
        self.thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        self.running.store(false, Ordering::Release);
        join_worker(self.thread.take(), "capture")
    }
}

impl Drop for LoopbackInput {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Loopback input stopped with error: {}", e);
        }
    }
}

fn join_worker(
    handle: Option<JoinHandle<Result<u64, BackendError>>>,
    what: &str,
) -> Result<(), BackendError> {
    let Some(handle) = handle else {
        return Ok(());
    };
    match handle.join() {
        Ok(Ok(frames)) => {
            debug!("Loopback {} thread finished after {} frames", what, frames);
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(BackendError::Stream(format!("loopback {} thread panicked", what))),
    }
}
